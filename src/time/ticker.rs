//! Cancellable 1-second redisplay ticks for the time panels.
//!
//! Each panel owns one background task bound to a cancellation token;
//! tearing the panel down cancels the token and the task exits, so no
//! orphaned polling survives an unmount.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{debug, warn};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, sleep, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    bridge::BridgeHandle,
    cache::{self, CacheStore, TIMEZONE_CACHE_KEY},
};

use super::{format_clock, TimeDisplay, TimeFormat, TimeReading, TimezoneCacheEntry, TimezoneLookup};

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

const LOOKUP_ATTEMPTS: u32 = 3;
const LOOKUP_BACKOFF: Duration = Duration::from_secs(2);

/// Handle to a running time panel. Watch the display for updates; call
/// [`TimePanel::shutdown`] on teardown. Dropping the handle also cancels
/// the tick task.
pub struct TimePanel {
    display: watch::Receiver<TimeDisplay>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TimePanel {
    pub fn display(&self) -> watch::Receiver<TimeDisplay> {
        self.display.clone()
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.task).await;
    }
}

impl Drop for TimePanel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Host-clock mode: poll `getSystemTime` every second; each tick wholly
/// replaces the displayed snapshot.
pub fn spawn_host_clock_panel(bridge: BridgeHandle) -> TimePanel {
    let (tx, rx) = watch::channel(TimeDisplay::Loading);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(host_clock_loop(bridge, tx, cancel.clone()));
    TimePanel {
        display: rx,
        cancel,
        task,
    }
}

async fn host_clock_loop(
    bridge: BridgeHandle,
    tx: watch::Sender<TimeDisplay>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match bridge.system_time().await {
                    Ok(snapshot) => {
                        let _ = tx.send(TimeDisplay::Ready(TimeReading {
                            time: snapshot.time,
                            date: snapshot.date,
                            timezone: None,
                            timestamp_ms: snapshot.timestamp_ms,
                        }));
                    }
                    // Keep the last good reading on a failed poll.
                    Err(err) => warn!("system time poll failed: {err}"),
                }
            }
            _ = cancel.cancelled() => {
                debug!("host clock panel shutting down");
                break;
            }
        }
    }
}

/// Timezone-lookup mode: resolve the IANA zone (cache first, then the
/// lookup service with bounded retries), then project the current instant
/// into that zone every second with no further network traffic.
pub fn spawn_timezone_panel<L>(
    lookup: L,
    store: Arc<dyn CacheStore>,
    format: TimeFormat,
) -> TimePanel
where
    L: TimezoneLookup + 'static,
{
    let (tx, rx) = watch::channel(TimeDisplay::Loading);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(timezone_loop(lookup, store, format, tx, cancel.clone()));
    TimePanel {
        display: rx,
        cancel,
        task,
    }
}

async fn timezone_loop<L>(
    lookup: L,
    store: Arc<dyn CacheStore>,
    format: TimeFormat,
    tx: watch::Sender<TimeDisplay>,
    cancel: CancellationToken,
) where
    L: TimezoneLookup,
{
    let timezone = tokio::select! {
        resolved = resolve_timezone(&lookup, store.as_ref()) => match resolved {
            Ok(timezone) => timezone,
            Err(err) => {
                let _ = tx.send(TimeDisplay::Failed(err.to_string()));
                return;
            }
        },
        _ = cancel.cancelled() => return,
    };

    let zone: chrono_tz::Tz = match timezone.parse() {
        Ok(zone) => zone,
        Err(_) => {
            // A bad cached zone would wedge the panel forever; drop it.
            store.delete(TIMEZONE_CACHE_KEY);
            let _ = tx.send(TimeDisplay::Failed(format!(
                "invalid timezone '{timezone}'"
            )));
            return;
        }
    };

    let mut ticker = interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now().with_timezone(&zone);
                let (time, date) = format_clock(&now, &format);
                let _ = tx.send(TimeDisplay::Ready(TimeReading {
                    time,
                    date,
                    timezone: Some(timezone.clone()),
                    timestamp_ms: now.timestamp_millis(),
                }));
            }
            _ = cancel.cancelled() => {
                debug!("timezone panel shutting down");
                break;
            }
        }
    }
}

/// Cache first; expired or missing entries trigger one lookup with
/// bounded retries (doubling backoff). Giving up is a terminal error,
/// not an indefinite loading state.
pub(crate) async fn resolve_timezone(
    lookup: &dyn TimezoneLookup,
    store: &dyn CacheStore,
) -> Result<String> {
    let now_ms = Utc::now().timestamp_millis();
    if let Some(entry) = cache::get_json::<TimezoneCacheEntry>(store, TIMEZONE_CACHE_KEY) {
        if entry.is_fresh(now_ms) {
            debug!("using cached timezone {}", entry.timezone);
            return Ok(entry.timezone);
        }
        debug!("cached timezone expired, deleting");
        store.delete(TIMEZONE_CACHE_KEY);
    }

    let mut backoff = LOOKUP_BACKOFF;
    let mut last_error = anyhow!("timezone lookup never attempted");
    for attempt in 1..=LOOKUP_ATTEMPTS {
        match lookup.timezone_for_ip().await {
            Ok(timezone) => {
                cache::set_json(
                    store,
                    TIMEZONE_CACHE_KEY,
                    &TimezoneCacheEntry {
                        timezone: timezone.clone(),
                        created_at_ms: Utc::now().timestamp_millis(),
                    },
                );
                return Ok(timezone);
            }
            Err(err) => {
                warn!("timezone lookup attempt {attempt}/{LOOKUP_ATTEMPTS} failed: {err}");
                last_error = err;
                if attempt < LOOKUP_ATTEMPTS {
                    sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    Err(anyhow!(
        "timezone lookup failed after {LOOKUP_ATTEMPTS} attempts: {last_error}"
    ))
}
