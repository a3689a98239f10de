//! Seams for the external location services. Each seam is a small trait
//! so the resolver can be exercised with canned responses; production
//! implementations call the real services with reqwest.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::bridge::BridgeHandle;

use super::{LocationMethod, LocationRecord, PlaceName, UNKNOWN_PLACE};

const DEFAULT_NOMINATIM_ENDPOINT: &str = "https://nominatim.openstreetmap.org/reverse";
const DEFAULT_IP_API_ENDPOINT: &str = "http://ip-api.com/json/";

/// Nominal accuracy radius attached to IP-based estimates; the service
/// reports none, and it is deliberately coarse enough to fail the cache
/// gate so IP results are never persisted.
pub const IP_NOMINAL_ACCURACY_M: f64 = 50_000.0;

#[derive(Debug, Clone)]
pub struct SensorOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Sensor-internal staleness hint, unrelated to the 7-day cache.
    pub maximum_age: Duration,
}

impl Default for SensorOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorFix {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: f64,
}

#[async_trait]
pub trait DeviceSensor: Send + Sync {
    async fn current_position(&self, options: &SensorOptions) -> Result<SensorFix>;
}

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn place_for(&self, lat: f64, lon: f64) -> Result<PlaceName>;
}

#[async_trait]
pub trait IpLocator: Send + Sync {
    async fn locate(&self) -> Result<LocationRecord>;
}

/// Device sensor backed by the bridge's `get-precise-location` operation,
/// bounded by the sensor timeout.
pub struct BridgeSensor {
    bridge: BridgeHandle,
}

impl BridgeSensor {
    pub fn new(bridge: BridgeHandle) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl DeviceSensor for BridgeSensor {
    async fn current_position(&self, options: &SensorOptions) -> Result<SensorFix> {
        let record = tokio::time::timeout(options.timeout, self.bridge.precise_location())
            .await
            .map_err(|_| anyhow!("device sensor timed out after {:?}", options.timeout))?
            .map_err(|err| anyhow!("device sensor unavailable: {err}"))?;

        Ok(SensorFix {
            lat: record.lat,
            lon: record.lon,
            accuracy_m: record.accuracy_m,
        })
    }
}

#[derive(Deserialize, Default)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    state: Option<String>,
    province: Option<String>,
    country: Option<String>,
}

#[derive(Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

impl NominatimAddress {
    fn into_place(self) -> PlaceName {
        // City falls through city -> town -> village before the sentinel.
        let city = self
            .city
            .or(self.town)
            .or(self.village)
            .unwrap_or_else(|| UNKNOWN_PLACE.into());
        let region = self
            .state
            .or(self.province)
            .unwrap_or_else(|| UNKNOWN_PLACE.into());
        let country = self.country.unwrap_or_else(|| UNKNOWN_PLACE.into());
        PlaceName {
            city,
            region,
            country,
        }
    }
}

pub struct NominatimGeocoder {
    client: reqwest::Client,
    endpoint: String,
}

impl NominatimGeocoder {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_NOMINATIM_ENDPOINT.into())
    }

    pub fn with_endpoint(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

impl Default for NominatimGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn place_for(&self, lat: f64, lon: f64) -> Result<PlaceName> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("format", "json"),
                ("lat", &lat.to_string()),
                ("lon", &lon.to_string()),
                ("zoom", "10"),
                ("addressdetails", "1"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: NominatimResponse = response.json().await?;
        Ok(body.address.unwrap_or_default().into_place())
    }
}

#[derive(Deserialize)]
struct IpApiResponse {
    city: Option<String>,
    country: Option<String>,
    #[serde(rename = "regionName")]
    region_name: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

pub struct IpApiLocator {
    client: reqwest::Client,
    endpoint: String,
}

impl IpApiLocator {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_IP_API_ENDPOINT.into())
    }

    pub fn with_endpoint(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

impl Default for IpApiLocator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IpLocator for IpApiLocator {
    async fn locate(&self) -> Result<LocationRecord> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|err| anyhow!("IP-based location failed: {err}"))?
            .error_for_status()
            .map_err(|err| anyhow!("IP-based location failed: {err}"))?;

        let body: IpApiResponse = response
            .json()
            .await
            .map_err(|err| anyhow!("IP-based location parse failed: {err}"))?;

        // The IP provider already names the place; no reverse geocoding.
        Ok(LocationRecord {
            lat: body.lat.unwrap_or(0.0),
            lon: body.lon.unwrap_or(0.0),
            accuracy_m: IP_NOMINAL_ACCURACY_M,
            method: LocationMethod::IpBased,
            place: Some(PlaceName {
                city: body.city.unwrap_or_else(|| UNKNOWN_PLACE.into()),
                region: body.region_name.unwrap_or_else(|| UNKNOWN_PLACE.into()),
                country: body.country.unwrap_or_else(|| UNKNOWN_PLACE.into()),
            }),
        })
    }
}
