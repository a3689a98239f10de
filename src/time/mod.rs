//! Time resolution: host-clock polling and timezone-lookup projection,
//! each behind the same display contract, plus the 7-day timezone cache.

pub mod ticker;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

pub use ticker::{spawn_host_clock_panel, spawn_timezone_panel, TimePanel};

pub const TIMEZONE_CACHE_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;

const DEFAULT_WORLDTIME_ENDPOINT: &str = "https://worldtimeapi.org/api/ip";

/// Display preferences for formatted clock output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeFormat {
    /// false means AM/PM.
    pub use_24_hour: bool,
    /// true means MM/DD/YYYY, false means DD/MM/YYYY.
    pub month_first: bool,
}

impl Default for TimeFormat {
    fn default() -> Self {
        Self {
            use_24_hour: false,
            month_first: false,
        }
    }
}

/// Format an instant into the displayed time and date strings.
pub fn format_clock<Tz>(now: &DateTime<Tz>, format: &TimeFormat) -> (String, String)
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let time = if format.use_24_hour {
        now.format("%H:%M:%S").to_string()
    } else {
        now.format("%I:%M:%S %p").to_string()
    };
    let date = if format.month_first {
        now.format("%m/%d/%Y").to_string()
    } else {
        now.format("%d/%m/%Y").to_string()
    };
    (time, date)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimezoneCacheEntry {
    pub timezone: String,
    pub created_at_ms: i64,
}

impl TimezoneCacheEntry {
    /// Strict `<`: an entry aged exactly seven days is no longer fresh.
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms - self.created_at_ms < TIMEZONE_CACHE_TTL_MS
    }
}

/// What a time panel currently shows.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeDisplay {
    Loading,
    Ready(TimeReading),
    /// Terminal: timezone lookup gave up after bounded retries.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeReading {
    pub time: String,
    pub date: String,
    pub timezone: Option<String>,
    pub timestamp_ms: i64,
}

#[async_trait]
pub trait TimezoneLookup: Send + Sync {
    async fn timezone_for_ip(&self) -> Result<String>;
}

#[derive(Deserialize)]
struct WorldTimeResponse {
    timezone: String,
}

pub struct WorldTimeClient {
    client: reqwest::Client,
    endpoint: String,
}

impl WorldTimeClient {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_WORLDTIME_ENDPOINT.into())
    }

    pub fn with_endpoint(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

impl Default for WorldTimeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimezoneLookup for WorldTimeClient {
    async fn timezone_for_ip(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|err| anyhow!("timezone lookup failed: {err}"))?
            .error_for_status()
            .map_err(|err| anyhow!("timezone lookup failed: {err}"))?;

        let body: WorldTimeResponse = response
            .json()
            .await
            .map_err(|err| anyhow!("timezone response parse failed: {err}"))?;
        Ok(body.timezone)
    }
}
