use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use log::{error, info, warn};

use mirrorgrid::{
    bridge,
    cache::JsonFileStore,
    host::{HostProvider, WindowBounds},
    language::LanguagePreference,
    layout::layout_for,
    location::{BridgeSensor, IpApiLocator, LocationResolver, NominatimGeocoder},
    time::{spawn_host_clock_panel, TimeDisplay, TimeFormat},
};

fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("MIRRORGRID_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("neither MIRRORGRID_DATA_DIR nor HOME is set")?;
    Ok(PathBuf::from(home).join(".local/share/mirrorgrid"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("mirrorgrid starting up...");

    let data_dir = data_dir()?;
    std::fs::create_dir_all(&data_dir)?;
    let store = Arc::new(JsonFileStore::new(data_dir.join("store.json"))?);

    let (_language, code) = LanguagePreference::load(store.clone());
    info!("display language: {code}");

    let provider = HostProvider::new(
        WindowBounds {
            width: 1200,
            height: 800,
        },
        TimeFormat::default(),
    );
    let bridge = bridge::spawn_host(provider.clone());

    let hostname = bridge.hostname().await?;
    info!("running on host '{hostname}'");

    match bridge.orientation().await {
        Ok(snapshot) => {
            let layout = layout_for(&snapshot);
            info!(
                "window {}x{} ({}), {}x{} grid",
                snapshot.width,
                snapshot.height,
                if snapshot.is_landscape { "landscape" } else { "portrait" },
                layout.columns,
                layout.rows
            );
        }
        Err(err) => error!("orientation unavailable: {err}"),
    }

    // Re-read orientation whenever the windowing service reports a resize.
    {
        let bridge = bridge.clone();
        let mut events = bridge.subscribe();
        tokio::spawn(async move {
            while events.recv().await.is_ok() {
                match bridge.orientation().await {
                    Ok(snapshot) => {
                        let layout = layout_for(&snapshot);
                        info!(
                            "resized to {}x{}, {}x{} grid",
                            snapshot.width, snapshot.height, layout.columns, layout.rows
                        );
                    }
                    Err(err) => warn!("orientation refresh failed: {err}"),
                }
            }
        });
    }

    // Location panel: resolve once, log the outcome.
    {
        let resolver = LocationResolver::new(
            BridgeSensor::new(bridge.clone()),
            NominatimGeocoder::new(),
            IpApiLocator::new(),
            store.clone(),
        );
        tokio::spawn(async move {
            match resolver.resolve().await {
                Ok(record) => {
                    let place = record
                        .place
                        .as_ref()
                        .map(|place| format!("{}, {}, {}", place.city, place.region, place.country))
                        .unwrap_or_else(|| "no place name".into());
                    info!(
                        "location: {:.4}, {:.4} (±{:.0} m) {place}",
                        record.lat, record.lon, record.accuracy_m
                    );
                }
                Err(err) => error!("location panel error: {err}"),
            }
        });
    }

    // Time panel: host-clock mode, 1-second redisplay.
    let time_panel = spawn_host_clock_panel(bridge.clone());
    {
        let mut display = time_panel.display();
        tokio::spawn(async move {
            while display.changed().await.is_ok() {
                if let TimeDisplay::Ready(reading) = &*display.borrow() {
                    log::debug!("time panel: {} {}", reading.time, reading.date);
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    time_panel.shutdown().await;
    Ok(())
}
