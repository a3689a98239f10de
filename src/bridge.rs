//! Capability bridge between the privileged host and the presentation layer.
//!
//! The renderer may only invoke the closed set of operations in
//! [`CapabilityRequest`]; the host may only push [`HostNotification`]s.
//! Both directions carry plain serde-serializable values. Requests travel
//! over an mpsc channel into the host service task and each one is paired
//! with a oneshot reply, so every request gets exactly one response (or a
//! transport error when the host is gone). Adding an operation means
//! extending both enums in lockstep; nothing else crosses the boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{host::HostProvider, location::LocationRecord};

/// Derived from live window bounds on every request; never cached.
/// A square window (`width == height`) is NOT landscape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrientationSnapshot {
    pub is_landscape: bool,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemTimeSnapshot {
    pub time: String,
    pub date: String,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityRequest {
    GetHostname,
    GetOrientationData,
    GetSystemTime,
    GetPreciseLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "kebab-case")]
pub enum CapabilityResponse {
    Hostname(String),
    Orientation(OrientationSnapshot),
    SystemTime(SystemTimeSnapshot),
    PreciseLocation(LocationRecord),
    /// Structured failure value; host-side trouble never panics across
    /// the boundary, it becomes this variant.
    Error { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostNotification {
    /// Fire-and-forget; carries no payload. The renderer re-issues
    /// `GetOrientationData` on receipt.
    WindowResized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The host service task is gone; no further operations will succeed.
    HostGone,
    /// The operation resolved to a structured host-side error value.
    Host(String),
    /// The host answered with a response variant the operation does not
    /// produce. Indicates the two sides are out of lockstep.
    UnexpectedResponse,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::HostGone => write!(f, "bridge unavailable: host service is gone"),
            BridgeError::Host(message) => write!(f, "{message}"),
            BridgeError::UnexpectedResponse => write!(f, "unexpected response variant from host"),
        }
    }
}

impl std::error::Error for BridgeError {}

struct BridgeRequest {
    request: CapabilityRequest,
    reply: oneshot::Sender<CapabilityResponse>,
}

/// Renderer-side stub. Cloneable; each call site gets FIFO ordering for
/// its own requests via the channel + oneshot pairing, with no ordering
/// guarantee across concurrent operations.
#[derive(Clone)]
pub struct BridgeHandle {
    requests: mpsc::Sender<BridgeRequest>,
    events: broadcast::Sender<HostNotification>,
}

impl BridgeHandle {
    pub async fn invoke(
        &self,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse, BridgeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(BridgeRequest {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| BridgeError::HostGone)?;
        reply_rx.await.map_err(|_| BridgeError::HostGone)
    }

    pub async fn hostname(&self) -> Result<String, BridgeError> {
        match self.invoke(CapabilityRequest::GetHostname).await? {
            CapabilityResponse::Hostname(name) => Ok(name),
            CapabilityResponse::Error { error } => Err(BridgeError::Host(error)),
            _ => Err(BridgeError::UnexpectedResponse),
        }
    }

    pub async fn orientation(&self) -> Result<OrientationSnapshot, BridgeError> {
        match self.invoke(CapabilityRequest::GetOrientationData).await? {
            CapabilityResponse::Orientation(snapshot) => Ok(snapshot),
            CapabilityResponse::Error { error } => Err(BridgeError::Host(error)),
            _ => Err(BridgeError::UnexpectedResponse),
        }
    }

    pub async fn system_time(&self) -> Result<SystemTimeSnapshot, BridgeError> {
        match self.invoke(CapabilityRequest::GetSystemTime).await? {
            CapabilityResponse::SystemTime(snapshot) => Ok(snapshot),
            CapabilityResponse::Error { error } => Err(BridgeError::Host(error)),
            _ => Err(BridgeError::UnexpectedResponse),
        }
    }

    pub async fn precise_location(&self) -> Result<LocationRecord, BridgeError> {
        match self.invoke(CapabilityRequest::GetPreciseLocation).await? {
            CapabilityResponse::PreciseLocation(record) => Ok(record),
            CapabilityResponse::Error { error } => Err(BridgeError::Host(error)),
            _ => Err(BridgeError::UnexpectedResponse),
        }
    }

    /// One round for the initial paint: time and location gathered
    /// concurrently, each failing independently.
    pub async fn fetch_system_data(
        &self,
    ) -> (
        Result<SystemTimeSnapshot, BridgeError>,
        Result<LocationRecord, BridgeError>,
    ) {
        tokio::join!(self.system_time(), self.precise_location())
    }

    /// Subscribe to host notifications. Deliveries are fire-and-forget;
    /// a slow subscriber may observe lagged (dropped) notifications, which
    /// is fine for resize since the next orientation read is always fresh.
    pub fn subscribe(&self) -> broadcast::Receiver<HostNotification> {
        self.events.subscribe()
    }
}

/// Start the host service task and hand back the renderer-side stub.
/// Each request is serviced independently on its own task; shared state
/// is limited to the provider's window geometry.
pub fn spawn_host(provider: HostProvider) -> BridgeHandle {
    let (requests_tx, mut requests_rx) = mpsc::channel::<BridgeRequest>(32);
    let events = provider.events();

    tokio::spawn(async move {
        while let Some(BridgeRequest { request, reply }) = requests_rx.recv().await {
            let provider = provider.clone();
            tokio::spawn(async move {
                let response = provider.handle(request).await;
                // Caller may have dropped the reply half; nothing to do.
                let _ = reply.send(response);
            });
        }
    });

    BridgeHandle {
        requests: requests_tx,
        events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostProvider, WindowBounds};
    use crate::time::TimeFormat;

    fn test_provider(width: u32, height: u32) -> HostProvider {
        HostProvider::new(WindowBounds { width, height }, TimeFormat::default())
    }

    #[tokio::test]
    async fn orientation_request_reflects_current_bounds() {
        let bridge = spawn_host(test_provider(1920, 1080));
        let snapshot = bridge.orientation().await.unwrap();
        assert!(snapshot.is_landscape);
        assert_eq!((snapshot.width, snapshot.height), (1920, 1080));
    }

    #[tokio::test]
    async fn square_window_is_not_landscape() {
        let bridge = spawn_host(test_provider(800, 800));
        let snapshot = bridge.orientation().await.unwrap();
        assert!(!snapshot.is_landscape);
    }

    #[tokio::test]
    async fn portrait_window_is_not_landscape() {
        let bridge = spawn_host(test_provider(600, 1024));
        assert!(!bridge.orientation().await.unwrap().is_landscape);
    }

    #[tokio::test]
    async fn missing_window_yields_structured_error_not_panic() {
        let bridge = spawn_host(test_provider(0, 0));
        let result = bridge.orientation().await;
        assert!(matches!(result, Err(BridgeError::Host(_))));
    }

    #[tokio::test]
    async fn resize_notification_reaches_subscriber_and_orientation_is_fresh() {
        let provider = test_provider(1200, 800);
        let bridge = spawn_host(provider.clone());
        let mut events = bridge.subscribe();

        provider.set_window_bounds(WindowBounds {
            width: 700,
            height: 900,
        });

        assert_eq!(events.recv().await.unwrap(), HostNotification::WindowResized);
        // Renderer contract: re-issue the orientation request on receipt.
        let snapshot = bridge.orientation().await.unwrap();
        assert!(!snapshot.is_landscape);
        assert_eq!((snapshot.width, snapshot.height), (700, 900));
    }

    #[tokio::test]
    async fn unchanged_bounds_do_not_notify() {
        let provider = test_provider(1200, 800);
        let bridge = spawn_host(provider.clone());
        let mut events = bridge.subscribe();

        provider.set_window_bounds(WindowBounds {
            width: 1200,
            height: 800,
        });

        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn system_time_snapshot_carries_raw_timestamp() {
        let bridge = spawn_host(test_provider(1200, 800));
        let before = chrono::Utc::now().timestamp_millis();
        let snapshot = bridge.system_time().await.unwrap();
        let after = chrono::Utc::now().timestamp_millis();
        assert!(snapshot.timestamp_ms >= before && snapshot.timestamp_ms <= after);
        assert!(!snapshot.time.is_empty());
        assert!(!snapshot.date.is_empty());
    }

    #[tokio::test]
    async fn combined_fetch_fails_independently_per_operation() {
        use crate::host::ProviderGeolocator;

        // No geolocation credential: the location half fails with a
        // structured error while the time half still resolves.
        let provider = HostProvider::with_geolocator(
            WindowBounds {
                width: 1200,
                height: 800,
            },
            TimeFormat::default(),
            ProviderGeolocator::with_endpoint("http://127.0.0.1:9".into(), None),
        );
        let bridge = spawn_host(provider);

        let (time, location) = bridge.fetch_system_data().await;
        assert!(time.is_ok());
        assert!(matches!(location, Err(BridgeError::Host(_))));
    }

    #[test]
    fn request_names_match_wire_protocol() {
        let raw = serde_json::to_string(&CapabilityRequest::GetOrientationData).unwrap();
        assert_eq!(raw, "\"get-orientation-data\"");
        let raw = serde_json::to_string(&CapabilityRequest::GetPreciseLocation).unwrap();
        assert_eq!(raw, "\"get-precise-location\"");
    }

    #[test]
    fn error_response_serializes_as_structured_value() {
        let response = CapabilityResponse::Error {
            error: "Window not available".into(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["kind"], "error");
        assert_eq!(json["data"]["error"], "Window not available");
    }
}
