//! Location resolution: ordered strategy chain (device sensor, then
//! IP estimation), reverse geocoding, and the accuracy-gated 7-day cache.

pub mod providers;
pub mod resolver;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use providers::{
    BridgeSensor, DeviceSensor, IpApiLocator, IpLocator, NominatimGeocoder, ReverseGeocoder,
    SensorFix, SensorOptions,
};
pub use resolver::LocationResolver;

/// Sentinel for place fields the upstream services could not supply.
/// The renderer shows this string verbatim; `None`/null never reaches it.
pub const UNKNOWN_PLACE: &str = "Unknown";

pub const LOCATION_CACHE_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Cache writes only happen below this accuracy radius (strict `<`).
pub const ACCURACY_CACHE_GATE_M: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocationMethod {
    DeviceSensor,
    IpBased,
    ProviderApi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceName {
    pub city: String,
    pub region: String,
    pub country: String,
}

impl PlaceName {
    pub fn unknown() -> Self {
        Self {
            city: UNKNOWN_PLACE.into(),
            region: UNKNOWN_PLACE.into(),
            country: UNKNOWN_PLACE.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "accuracyMeters")]
    pub accuracy_m: f64,
    pub method: LocationMethod,
    #[serde(rename = "placeName", skip_serializing_if = "Option::is_none")]
    pub place: Option<PlaceName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationCacheEntry {
    pub record: LocationRecord,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

impl LocationCacheEntry {
    pub fn new(record: LocationRecord, created_at_ms: i64) -> Self {
        Self {
            record,
            created_at_ms,
            expires_at_ms: created_at_ms + LOCATION_CACHE_TTL_MS,
        }
    }

    /// Strict `>`: an entry read at exactly `expires_at_ms` is still valid.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at_ms
    }
}

/// The fallback chain, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationStrategy {
    DeviceSensor,
    IpFallback,
}

impl LocationStrategy {
    pub const RESOLUTION_ORDER: [LocationStrategy; 2] =
        [LocationStrategy::DeviceSensor, LocationStrategy::IpFallback];

    pub fn name(&self) -> &'static str {
        match self {
            LocationStrategy::DeviceSensor => "device-sensor",
            LocationStrategy::IpFallback => "ip-fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyFailure {
    pub strategy: LocationStrategy,
    pub message: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy.name(), self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationError {
    /// Every strategy in the chain failed; carries one failure per strategy.
    Exhausted(Vec<StrategyFailure>),
}

impl fmt::Display for LocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationError::Exhausted(failures) => {
                write!(f, "all location strategies failed: ")?;
                for (index, failure) in failures.iter().enumerate() {
                    if index > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{failure}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for LocationError {}
