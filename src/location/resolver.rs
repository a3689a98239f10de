//! The location resolution policy: cache check, then the strategy chain
//! in [`LocationStrategy::RESOLUTION_ORDER`], with reverse geocoding and
//! the accuracy cache gate on the sensor path.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use crate::cache::{self, CacheStore, LOCATION_CACHE_KEY};

use super::{
    providers::{DeviceSensor, IpLocator, ReverseGeocoder, SensorOptions},
    LocationCacheEntry, LocationError, LocationMethod, LocationRecord, LocationStrategy,
    PlaceName, StrategyFailure, ACCURACY_CACHE_GATE_M,
};

pub struct LocationResolver<S, G, I> {
    sensor: S,
    geocoder: G,
    ip: I,
    store: Arc<dyn CacheStore>,
    sensor_options: SensorOptions,
    /// Whether IP-based results are offered to the cache gate at all.
    /// Off by default; even when on, the nominal IP accuracy fails the
    /// gate, so this stays an explicit configuration choice.
    cache_ip_results: bool,
}

impl<S, G, I> LocationResolver<S, G, I>
where
    S: DeviceSensor,
    G: ReverseGeocoder,
    I: IpLocator,
{
    pub fn new(sensor: S, geocoder: G, ip: I, store: Arc<dyn CacheStore>) -> Self {
        Self {
            sensor,
            geocoder,
            ip,
            store,
            sensor_options: SensorOptions::default(),
            cache_ip_results: false,
        }
    }

    pub fn with_ip_caching(mut self, enabled: bool) -> Self {
        self.cache_ip_results = enabled;
        self
    }

    /// Resolve a location. Exactly one value comes out of every call:
    /// a cached record, a fresh record from the first strategy that
    /// succeeds, or an error naming every failed strategy.
    pub async fn resolve(&self) -> Result<LocationRecord, LocationError> {
        self.resolve_at(Utc::now().timestamp_millis()).await
    }

    pub(crate) async fn resolve_at(&self, now_ms: i64) -> Result<LocationRecord, LocationError> {
        if let Some(entry) = self.read_cache(now_ms) {
            info!("using cached location (expires at {})", entry.expires_at_ms);
            return Ok(entry.record);
        }

        let mut failures = Vec::new();
        for strategy in LocationStrategy::RESOLUTION_ORDER {
            match self.try_strategy(strategy, now_ms).await {
                Ok(record) => return Ok(record),
                Err(failure) => {
                    // Recoverable: the next strategy may still succeed.
                    warn!("location strategy {failure}, falling back");
                    failures.push(failure);
                }
            }
        }

        Err(LocationError::Exhausted(failures))
    }

    fn read_cache(&self, now_ms: i64) -> Option<LocationCacheEntry> {
        let entry: LocationCacheEntry = cache::get_json(self.store.as_ref(), LOCATION_CACHE_KEY)?;
        if entry.is_expired(now_ms) {
            info!("cached location expired, deleting");
            self.store.delete(LOCATION_CACHE_KEY);
            return None;
        }
        Some(entry)
    }

    async fn try_strategy(
        &self,
        strategy: LocationStrategy,
        now_ms: i64,
    ) -> Result<LocationRecord, StrategyFailure> {
        match strategy {
            LocationStrategy::DeviceSensor => self.resolve_from_sensor(now_ms).await,
            LocationStrategy::IpFallback => self.resolve_from_ip(now_ms).await,
        }
    }

    async fn resolve_from_sensor(&self, now_ms: i64) -> Result<LocationRecord, StrategyFailure> {
        let fix = self
            .sensor
            .current_position(&self.sensor_options)
            .await
            .map_err(|err| StrategyFailure {
                strategy: LocationStrategy::DeviceSensor,
                message: err.to_string(),
            })?;

        // Geocode failure degrades to the sentinel; the fix still counts.
        let place = match self.geocoder.place_for(fix.lat, fix.lon).await {
            Ok(place) => place,
            Err(err) => {
                warn!("reverse geocoding failed: {err}");
                PlaceName::unknown()
            }
        };

        let record = LocationRecord {
            lat: fix.lat,
            lon: fix.lon,
            accuracy_m: fix.accuracy_m,
            method: LocationMethod::DeviceSensor,
            place: Some(place),
        };
        self.maybe_cache(&record, now_ms);
        Ok(record)
    }

    async fn resolve_from_ip(&self, now_ms: i64) -> Result<LocationRecord, StrategyFailure> {
        let record = self.ip.locate().await.map_err(|err| StrategyFailure {
            strategy: LocationStrategy::IpFallback,
            message: err.to_string(),
        })?;

        if self.cache_ip_results {
            self.maybe_cache(&record, now_ms);
        }
        Ok(record)
    }

    fn maybe_cache(&self, record: &LocationRecord, now_ms: i64) {
        // Strict gate: exactly 1000 m is not cached.
        if record.accuracy_m < ACCURACY_CACHE_GATE_M {
            info!("caching location (accuracy {} m)", record.accuracy_m);
            cache::set_json(
                self.store.as_ref(),
                LOCATION_CACHE_KEY,
                &LocationCacheEntry::new(record.clone(), now_ms),
            );
        } else {
            info!(
                "not caching location (accuracy {} m >= {} m)",
                record.accuracy_m, ACCURACY_CACHE_GATE_M
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use super::*;
    use crate::cache::MemoryStore;
    use crate::location::{SensorFix, LOCATION_CACHE_TTL_MS};

    const NOW_MS: i64 = 1_700_000_000_000;

    struct StubSensor {
        fix: Option<SensorFix>,
        calls: AtomicU32,
    }

    impl StubSensor {
        fn returning(fix: SensorFix) -> Self {
            Self {
                fix: Some(fix),
                calls: AtomicU32::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fix: None,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DeviceSensor for StubSensor {
        async fn current_position(&self, _options: &SensorOptions) -> Result<SensorFix> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.fix.ok_or_else(|| anyhow!("permission denied"))
        }
    }

    struct StubGeocoder {
        place: Option<PlaceName>,
    }

    #[async_trait]
    impl ReverseGeocoder for StubGeocoder {
        async fn place_for(&self, _lat: f64, _lon: f64) -> Result<PlaceName> {
            self.place
                .clone()
                .ok_or_else(|| anyhow!("geocoding service unreachable"))
        }
    }

    struct StubIp {
        record: Option<LocationRecord>,
    }

    #[async_trait]
    impl IpLocator for StubIp {
        async fn locate(&self) -> Result<LocationRecord> {
            self.record
                .clone()
                .ok_or_else(|| anyhow!("IP service unreachable"))
        }
    }

    fn london_fix() -> SensorFix {
        SensorFix {
            lat: 51.5,
            lon: -0.12,
            accuracy_m: 50.0,
        }
    }

    fn london_place() -> PlaceName {
        PlaceName {
            city: "London".into(),
            region: "England".into(),
            country: "UK".into(),
        }
    }

    fn ip_record() -> LocationRecord {
        LocationRecord {
            lat: 43.65,
            lon: -79.38,
            accuracy_m: crate::location::providers::IP_NOMINAL_ACCURACY_M,
            method: LocationMethod::IpBased,
            place: Some(PlaceName {
                city: "Toronto".into(),
                region: "Ontario".into(),
                country: "Canada".into(),
            }),
        }
    }

    fn resolver(
        sensor: StubSensor,
        geocoder: StubGeocoder,
        ip: StubIp,
        store: Arc<MemoryStore>,
    ) -> LocationResolver<StubSensor, StubGeocoder, StubIp> {
        LocationResolver::new(sensor, geocoder, ip, store)
    }

    fn stored_entry(store: &MemoryStore) -> Option<LocationCacheEntry> {
        let raw = store.get(LOCATION_CACHE_KEY)?;
        Some(serde_json::from_str(&raw).unwrap())
    }

    #[tokio::test]
    async fn sensor_fix_is_geocoded_and_cached() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(
            StubSensor::returning(london_fix()),
            StubGeocoder {
                place: Some(london_place()),
            },
            StubIp { record: None },
            store.clone(),
        );

        let record = resolver.resolve_at(NOW_MS).await.unwrap();
        assert_eq!(record.lat, 51.5);
        assert_eq!(record.lon, -0.12);
        assert_eq!(record.accuracy_m, 50.0);
        assert_eq!(record.method, LocationMethod::DeviceSensor);
        assert_eq!(record.place, Some(london_place()));

        let entry = stored_entry(&store).expect("50 m accuracy should be cached");
        assert_eq!(entry.record, record);
        assert_eq!(entry.created_at_ms, NOW_MS);
        assert_eq!(entry.expires_at_ms, NOW_MS + LOCATION_CACHE_TTL_MS);
    }

    #[tokio::test]
    async fn valid_cache_short_circuits_without_sensor_call() {
        let store = Arc::new(MemoryStore::new());
        let cached = LocationRecord {
            lat: 1.0,
            lon: 2.0,
            accuracy_m: 10.0,
            method: LocationMethod::DeviceSensor,
            place: Some(london_place()),
        };
        cache::set_json(
            store.as_ref(),
            LOCATION_CACHE_KEY,
            &LocationCacheEntry::new(cached.clone(), NOW_MS - 1_000),
        );

        let sensor = StubSensor::returning(london_fix());
        let resolver = resolver(
            sensor,
            StubGeocoder { place: None },
            StubIp { record: None },
            store,
        );

        let record = resolver.resolve_at(NOW_MS).await.unwrap();
        assert_eq!(record, cached);
        assert_eq!(resolver.sensor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_cache_is_deleted_on_read_and_resolution_proceeds() {
        let store = Arc::new(MemoryStore::new());
        let created = NOW_MS - LOCATION_CACHE_TTL_MS - 1;
        cache::set_json(
            store.as_ref(),
            LOCATION_CACHE_KEY,
            &LocationCacheEntry::new(ip_record(), created),
        );

        let resolver = resolver(
            StubSensor::returning(london_fix()),
            StubGeocoder {
                place: Some(london_place()),
            },
            StubIp { record: None },
            store.clone(),
        );

        let record = resolver.resolve_at(NOW_MS).await.unwrap();
        assert_eq!(record.method, LocationMethod::DeviceSensor);
        // The expired entry was deleted, then replaced by the fresh fix.
        let entry = stored_entry(&store).unwrap();
        assert_eq!(entry.created_at_ms, NOW_MS);
    }

    #[tokio::test]
    async fn entry_at_exact_expiry_still_serves() {
        let store = Arc::new(MemoryStore::new());
        let entry = LocationCacheEntry::new(ip_record(), NOW_MS - LOCATION_CACHE_TTL_MS);
        assert_eq!(entry.expires_at_ms, NOW_MS);
        cache::set_json(store.as_ref(), LOCATION_CACHE_KEY, &entry);

        let resolver = resolver(
            StubSensor::failing(),
            StubGeocoder { place: None },
            StubIp { record: None },
            store,
        );

        let record = resolver.resolve_at(NOW_MS).await.unwrap();
        assert_eq!(record, entry.record);
    }

    #[tokio::test]
    async fn accuracy_gate_boundary_is_strict() {
        for (accuracy, expect_cached) in [(999.0, true), (1000.0, false)] {
            let store = Arc::new(MemoryStore::new());
            let resolver = resolver(
                StubSensor::returning(SensorFix {
                    accuracy_m: accuracy,
                    ..london_fix()
                }),
                StubGeocoder {
                    place: Some(london_place()),
                },
                StubIp { record: None },
                store.clone(),
            );

            let record = resolver.resolve_at(NOW_MS).await.unwrap();
            assert_eq!(record.accuracy_m, accuracy, "record is returned either way");
            assert_eq!(
                stored_entry(&store).is_some(),
                expect_cached,
                "accuracy {accuracy}"
            );
        }
    }

    #[tokio::test]
    async fn geocode_failure_degrades_to_unknown_place() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(
            StubSensor::returning(london_fix()),
            StubGeocoder { place: None },
            StubIp { record: None },
            store.clone(),
        );

        let record = resolver.resolve_at(NOW_MS).await.unwrap();
        assert_eq!(record.lat, 51.5);
        assert_eq!(record.lon, -0.12);
        assert_eq!(record.place, Some(PlaceName::unknown()));
        // Still cached; the gate looks at accuracy, not the place fields.
        assert!(stored_entry(&store).is_some());
    }

    #[tokio::test]
    async fn sensor_failure_falls_back_to_ip_without_caching() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(
            StubSensor::failing(),
            StubGeocoder {
                place: Some(london_place()),
            },
            StubIp {
                record: Some(ip_record()),
            },
            store.clone(),
        );

        let record = resolver.resolve_at(NOW_MS).await.unwrap();
        assert_eq!(record.method, LocationMethod::IpBased);
        assert_eq!(record.place.as_ref().unwrap().city, "Toronto");
        assert!(
            stored_entry(&store).is_none(),
            "IP results are not cached by default"
        );
    }

    #[tokio::test]
    async fn ip_caching_opt_in_still_faces_the_accuracy_gate() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(
            StubSensor::failing(),
            StubGeocoder { place: None },
            StubIp {
                record: Some(ip_record()),
            },
            store.clone(),
        )
        .with_ip_caching(true);

        resolver.resolve_at(NOW_MS).await.unwrap();
        assert!(
            stored_entry(&store).is_none(),
            "nominal IP accuracy must fail the gate"
        );
    }

    #[tokio::test]
    async fn total_failure_is_structured_with_one_entry_per_strategy() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(
            StubSensor::failing(),
            StubGeocoder { place: None },
            StubIp { record: None },
            store,
        );

        let err = resolver.resolve_at(NOW_MS).await.unwrap_err();
        let LocationError::Exhausted(failures) = err;
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].strategy, LocationStrategy::DeviceSensor);
        assert_eq!(failures[1].strategy, LocationStrategy::IpFallback);
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_treated_as_miss() {
        let store = Arc::new(MemoryStore::new());
        store.set(LOCATION_CACHE_KEY, "{broken".into());

        let resolver = resolver(
            StubSensor::returning(london_fix()),
            StubGeocoder {
                place: Some(london_place()),
            },
            StubIp { record: None },
            store.clone(),
        );

        let record = resolver.resolve_at(NOW_MS).await.unwrap();
        assert_eq!(record.method, LocationMethod::DeviceSensor);
        // The corrupt blob was replaced by a parseable entry.
        assert!(stored_entry(&store).is_some());
    }

    #[tokio::test]
    async fn cache_round_trip_preserves_record_fields() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(
            StubSensor::returning(london_fix()),
            StubGeocoder {
                place: Some(london_place()),
            },
            StubIp { record: None },
            store.clone(),
        );

        let written = resolver.resolve_at(NOW_MS).await.unwrap();

        // A second resolve before expiry must read back the identical record.
        let read_back = resolver.resolve_at(NOW_MS + 1).await.unwrap();
        assert_eq!(read_back, written);
        assert_eq!(resolver.sensor.calls.load(Ordering::SeqCst), 1);
    }
}
