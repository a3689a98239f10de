//! Host-side implementations of the bridge operations: hostname, window
//! geometry, wall clock, and the provider-API geolocation call.

use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use chrono::Local;
use log::{debug, info};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::{
    bridge::{
        CapabilityRequest, CapabilityResponse, HostNotification, OrientationSnapshot,
        SystemTimeSnapshot,
    },
    location::{LocationMethod, LocationRecord},
    time::{format_clock, TimeFormat},
};

pub const GEOLOCATION_KEY_ENV: &str = "GOOGLE_API_KEY";
const DEFAULT_GEOLOCATE_ENDPOINT: &str = "https://www.googleapis.com/geolocation/v1/geolocate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub width: u32,
    pub height: u32,
}

struct HostState {
    bounds: RwLock<WindowBounds>,
    events: broadcast::Sender<HostNotification>,
}

/// Services bridge requests against the local machine. Cloneable; every
/// request is stateless apart from reads of the shared window geometry.
#[derive(Clone)]
pub struct HostProvider {
    state: Arc<HostState>,
    geolocator: ProviderGeolocator,
    time_format: TimeFormat,
}

impl HostProvider {
    pub fn new(initial_bounds: WindowBounds, time_format: TimeFormat) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(HostState {
                bounds: RwLock::new(initial_bounds),
                events,
            }),
            geolocator: ProviderGeolocator::from_env(),
            time_format,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_geolocator(
        initial_bounds: WindowBounds,
        time_format: TimeFormat,
        geolocator: ProviderGeolocator,
    ) -> Self {
        let mut provider = Self::new(initial_bounds, time_format);
        provider.geolocator = geolocator;
        provider
    }

    /// Called by the windowing service when the window is resized. Pushes
    /// a payload-free notification; the renderer re-reads orientation.
    pub fn set_window_bounds(&self, bounds: WindowBounds) {
        {
            let mut guard = self.state.bounds.write().unwrap();
            if *guard == bounds {
                return;
            }
            *guard = bounds;
        }
        debug!("window bounds now {}x{}", bounds.width, bounds.height);
        // No subscriber yet is fine; the notification is fire-and-forget.
        let _ = self.state.events.send(HostNotification::WindowResized);
    }

    pub(crate) fn events(&self) -> broadcast::Sender<HostNotification> {
        self.state.events.clone()
    }

    pub async fn handle(&self, request: CapabilityRequest) -> CapabilityResponse {
        match request {
            CapabilityRequest::GetHostname => CapabilityResponse::Hostname(self.hostname()),
            CapabilityRequest::GetOrientationData => self.orientation(),
            CapabilityRequest::GetSystemTime => {
                CapabilityResponse::SystemTime(self.system_time())
            }
            CapabilityRequest::GetPreciseLocation => match self.geolocator.locate().await {
                Ok(record) => CapabilityResponse::PreciseLocation(record),
                Err(err) => CapabilityResponse::Error {
                    error: err.to_string(),
                },
            },
        }
    }

    fn hostname(&self) -> String {
        sysinfo::System::host_name().unwrap_or_else(|| "unknown-host".into())
    }

    fn orientation(&self) -> CapabilityResponse {
        let bounds = *self.state.bounds.read().unwrap();
        if bounds.width == 0 || bounds.height == 0 {
            return CapabilityResponse::Error {
                error: "Window not available".into(),
            };
        }
        CapabilityResponse::Orientation(OrientationSnapshot {
            is_landscape: bounds.width > bounds.height,
            width: bounds.width,
            height: bounds.height,
        })
    }

    fn system_time(&self) -> SystemTimeSnapshot {
        let now = Local::now();
        let (time, date) = format_clock(&now, &self.time_format);
        SystemTimeSnapshot {
            time,
            date,
            timestamp_ms: now.timestamp_millis(),
        }
    }
}

#[derive(Deserialize)]
struct GeolocatePoint {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct GeolocateResponse {
    location: GeolocatePoint,
    accuracy: f64,
}

/// Provider-queried geolocation (IP-based consideration). The credential
/// comes from the process environment and must never be logged; reqwest
/// errors are stripped of their URL before display since the key is a
/// query parameter.
#[derive(Clone)]
pub struct ProviderGeolocator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl ProviderGeolocator {
    pub fn from_env() -> Self {
        let api_key = std::env::var(GEOLOCATION_KEY_ENV).ok().filter(|key| !key.is_empty());
        if api_key.is_none() {
            info!("no geolocation credential in {GEOLOCATION_KEY_ENV}; provider geolocation disabled");
        }
        Self::with_endpoint(DEFAULT_GEOLOCATE_ENDPOINT.into(), api_key)
    }

    pub fn with_endpoint(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }

    pub async fn locate(&self) -> Result<LocationRecord> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("geolocation credential not configured"))?;
        let url = format!("{}?key={}", self.endpoint, key);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "considerIp": true }))
            .send()
            .await
            .map_err(|err| anyhow!("geolocation request failed: {}", err.without_url()))?
            .error_for_status()
            .map_err(|err| anyhow!("geolocation request failed: {}", err.without_url()))?;

        let body: GeolocateResponse = response
            .json()
            .await
            .map_err(|err| anyhow!("geolocation response parse failed: {}", err.without_url()))?;

        Ok(LocationRecord {
            lat: body.location.lat,
            lon: body.location.lng,
            accuracy_m: body.accuracy,
            method: LocationMethod::ProviderApi,
            place: None,
        })
    }
}
