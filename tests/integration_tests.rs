// Integration tests for the proximity pipeline

use async_trait::async_trait;
use cep_proximity::core::{DistanceMethod, Pipeline, PipelineConfig, PipelineError, RunParameters};
use cep_proximity::models::{
    CandidateFilter, CandidateRecord, Coordinate, NormalizedKey, PostalAddress, RecordId, Stage,
    DEFAULT_REFERENCE,
};
use cep_proximity::services::{
    GeocodeError, GeocodingService, InMemoryStore, LookupError, PostalLookup, RecordStore,
    StoreError,
};
use geo::{GeodesicDestination, Point};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Postal lookup double that records every key it is asked for
#[derive(Default)]
struct CountingLookup {
    addresses: HashMap<String, PostalAddress>,
    failing: Vec<String>,
    hanging: Vec<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CountingLookup {
    fn with_city(mut self, key: &str, street: &str) -> Self {
        self.addresses.insert(
            key.to_string(),
            PostalAddress {
                street: street.to_string(),
                neighborhood: String::new(),
                city: "São Paulo".to_string(),
                state: "SP".to_string(),
            },
        );
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PostalLookup for CountingLookup {
    async fn lookup(&self, key: &NormalizedKey) -> Result<PostalAddress, LookupError> {
        self.calls.lock().unwrap().push(key.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.hanging.iter().any(|k| k == key.as_str()) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.iter().any(|k| k == key.as_str()) {
            return Err(LookupError::ApiError("503 Service Unavailable".to_string()));
        }
        self.addresses
            .get(key.as_str())
            .cloned()
            .ok_or_else(|| LookupError::NotFound(key.to_string()))
    }
}

/// Geocoding double with a fixed address table
#[derive(Default)]
struct CountingGeocoder {
    coordinates: HashMap<String, Coordinate>,
    failing: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl CountingGeocoder {
    fn with(mut self, address: &str, coordinate: Coordinate) -> Self {
        self.coordinates.insert(address.to_string(), coordinate);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GeocodingService for CountingGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, GeocodeError> {
        self.calls.lock().unwrap().push(address.to_string());
        if self.failing.iter().any(|a| a == address) {
            return Err(GeocodeError::InvalidResponse("truncated body".to_string()));
        }
        Ok(self.coordinates.get(address).copied())
    }
}

struct BrokenStore;

#[async_trait]
impl RecordStore for BrokenStore {
    async fn fetch_candidates(
        &self,
        _filter: &CandidateFilter,
    ) -> Result<Vec<CandidateRecord>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(false)
    }
}

fn store(records: &[(&str, &str)]) -> Arc<InMemoryStore> {
    Arc::new(
        records
            .iter()
            .map(|(id, cep)| CandidateRecord::new(*id, *cep))
            .collect(),
    )
}

fn pipeline(
    store: Arc<dyn RecordStore>,
    lookup: Arc<CountingLookup>,
    geocoder: Arc<CountingGeocoder>,
) -> Pipeline {
    Pipeline::new(store, lookup, geocoder, PipelineConfig::default())
}

/// Point at `distance_km` due east of the reference, on the WGS-84 ellipsoid
fn east_of_reference(distance_km: f64) -> Coordinate {
    let origin = Point::new(DEFAULT_REFERENCE.longitude, DEFAULT_REFERENCE.latitude);
    let destination = origin.geodesic_destination(90.0, distance_km * 1000.0);
    Coordinate::new(destination.y(), destination.x())
}

const FRANCA: &str = "Alameda Franca, São Paulo - SP";

#[tokio::test]
async fn test_shared_key_resolved_and_geocoded_once() {
    let lookup = Arc::new(CountingLookup::default().with_city("01422000", "Alameda Franca"));
    let geocoder = Arc::new(CountingGeocoder::default().with(FRANCA, east_of_reference(1.0)));
    let pipeline = pipeline(
        store(&[("a", "01422000"), ("b", "01422999")]),
        lookup.clone(),
        geocoder.clone(),
    );

    let report = pipeline.run().await.unwrap();

    assert_eq!(lookup.calls(), vec!["01422000"]);
    assert_eq!(geocoder.calls(), vec![FRANCA]);
    assert_eq!(report.candidates, 2);
    assert_eq!(report.distinct_keys, 1);
    assert_eq!(report.distinct_addresses, 1);
    assert_eq!(report.retained_ids(), vec![RecordId::from("a"), RecordId::from("b")]);
}

#[tokio::test]
async fn test_shared_key_dropped_together() {
    let lookup = Arc::new(CountingLookup::default().with_city("01422000", "Alameda Franca"));
    let geocoder = Arc::new(CountingGeocoder::default().with(FRANCA, east_of_reference(50.0)));
    let pipeline = pipeline(
        store(&[("a", "01422000"), ("b", "01422999")]),
        lookup,
        geocoder,
    );

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.geocoded_records, 2);
    assert_eq!(report.retained_count(), 0);
}

#[tokio::test]
async fn test_not_found_key_never_reaches_geocoder() {
    let lookup = Arc::new(CountingLookup::default().with_city("01422000", "Alameda Franca"));
    let geocoder = Arc::new(CountingGeocoder::default().with(FRANCA, east_of_reference(1.0)));
    let pipeline = pipeline(
        store(&[("known", "01422123"), ("unknown", "09999123")]),
        lookup.clone(),
        geocoder.clone(),
    );

    let report = pipeline.run().await.unwrap();

    assert_eq!(lookup.calls().len(), 2);
    assert_eq!(geocoder.calls(), vec![FRANCA]);
    assert_eq!(report.resolved_records, 1);
    assert_eq!(report.retained_ids(), vec![RecordId::from("known")]);
}

#[tokio::test]
async fn test_threshold_boundary_is_inclusive() {
    let lookup = Arc::new(
        CountingLookup::default()
            .with_city("01422000", "Exactly Five")
            .with_city("01423000", "Just Beyond"),
    );
    let geocoder = Arc::new(
        CountingGeocoder::default()
            .with("Exactly Five, São Paulo - SP", east_of_reference(5.0))
            .with("Just Beyond, São Paulo - SP", east_of_reference(5.01)),
    );
    let pipeline = pipeline(
        store(&[("at", "01422000"), ("beyond", "01423000")]),
        lookup,
        geocoder,
    );

    let report = pipeline
        .run_with(RunParameters {
            reference: DEFAULT_REFERENCE,
            threshold_km: 5.0,
        })
        .await
        .unwrap();

    assert_eq!(report.retained_ids(), vec![RecordId::from("at")]);
    assert!((report.retained[0].distance_km - 5.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_ungeocodable_address_is_dropped() {
    let lookup = Arc::new(
        CountingLookup::default()
            .with_city("01422000", "Alameda Franca")
            .with_city("01310000", "Avenida Paulista"),
    );
    // Only one of the two addresses has a match
    let geocoder = Arc::new(CountingGeocoder::default().with(FRANCA, east_of_reference(2.0)));
    let pipeline = pipeline(
        store(&[("a", "01422000"), ("b", "01310100")]),
        lookup,
        geocoder.clone(),
    );

    let report = pipeline.run().await.unwrap();

    assert_eq!(geocoder.calls().len(), 2);
    assert_eq!(report.resolved_records, 2);
    assert_eq!(report.geocoded_records, 1);
    assert_eq!(report.retained_ids(), vec![RecordId::from("a")]);
}

#[tokio::test]
async fn test_transport_failure_aborts_run() {
    let lookup = Arc::new(CountingLookup {
        failing: vec!["01422000".to_string()],
        ..Default::default()
    });
    let geocoder = Arc::new(CountingGeocoder::default());
    let pipeline = pipeline(store(&[("a", "01422000")]), lookup, geocoder.clone());

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Resolve { ref key, .. } if key == "01422000"));
    assert_eq!(err.stage(), Some(Stage::Resolve));
    assert!(geocoder.calls().is_empty());
}

#[tokio::test]
async fn test_geocoding_failure_aborts_run() {
    let lookup = Arc::new(
        CountingLookup::default()
            .with_city("01422000", "Alameda Franca")
            .with_city("01310000", "Avenida Paulista"),
    );
    let geocoder = Arc::new(CountingGeocoder {
        failing: vec![FRANCA.to_string()],
        ..Default::default()
    }
    .with("Avenida Paulista, São Paulo - SP", east_of_reference(1.0)));
    let pipeline = pipeline(
        store(&[("a", "01422000"), ("b", "01310100")]),
        lookup,
        geocoder,
    );

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Geocode { ref address, .. } if address == FRANCA));
    assert_eq!(err.stage(), Some(Stage::Geocode));
}

#[tokio::test]
async fn test_slow_postal_lookup_drops_record() {
    let lookup = Arc::new(
        CountingLookup {
            hanging: vec!["04538000".to_string()],
            ..Default::default()
        }
        .with_city("01422000", "Alameda Franca"),
    );
    let geocoder = Arc::new(CountingGeocoder::default().with(FRANCA, east_of_reference(2.0)));
    let config = PipelineConfig {
        lookup_timeout: Duration::from_millis(100),
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(
        store(&[("fast", "01422000"), ("slow", "04538133")]),
        lookup,
        geocoder.clone(),
        config,
    );

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.resolved_records, 1);
    assert_eq!(report.retained_ids(), vec![RecordId::from("fast")]);
    assert_eq!(geocoder.calls(), vec![FRANCA]);
}

#[tokio::test]
async fn test_store_failure_aborts_before_lookups() {
    let lookup = Arc::new(CountingLookup::default());
    let geocoder = Arc::new(CountingGeocoder::default());
    let pipeline = pipeline(Arc::new(BrokenStore), lookup.clone(), geocoder.clone());

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Store(_)));
    assert!(lookup.calls().is_empty());
    assert!(geocoder.calls().is_empty());
}

#[tokio::test]
async fn test_placeholder_codes_are_not_candidates() {
    let lookup = Arc::new(CountingLookup::default());
    let geocoder = Arc::new(CountingGeocoder::default());
    let pipeline = pipeline(
        store(&[("zero", "0"), ("zeros", "00000000"), ("rio", "22041001")]),
        lookup.clone(),
        geocoder,
    );

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.candidates, 0);
    assert!(lookup.calls().is_empty());
}

#[tokio::test]
async fn test_stage_reports_count_cache_traffic() {
    let lookup = Arc::new(
        CountingLookup::default()
            .with_city("01422000", "Alameda Franca")
            .with_city("01423000", "Alameda Franca"),
    );
    let geocoder = Arc::new(CountingGeocoder::default().with(FRANCA, east_of_reference(1.0)));
    let pipeline = pipeline(
        store(&[("a", "01422000"), ("b", "01423000"), ("c", "01423555")]),
        lookup,
        geocoder.clone(),
    );

    let report = pipeline.run().await.unwrap();

    // Two keys resolve to the same address string: one geocoding call
    assert_eq!(geocoder.calls().len(), 1);

    let resolve = report.stage(Stage::Resolve).unwrap();
    assert_eq!(resolve.inputs, 2);
    assert_eq!(resolve.cache_misses, 2);

    let distance = report.stage(Stage::Distance).unwrap();
    assert_eq!(distance.lookups, 3);
    assert_eq!(distance.cache_misses, 1);
    assert_eq!(distance.cache_hits, 2);
}

#[tokio::test]
async fn test_worker_pool_is_bounded() {
    let mut lookup = CountingLookup {
        delay: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let mut records = Vec::new();
    for i in 0..12 {
        let key = format!("01{:03}000", i);
        lookup = lookup.with_city(&key, &format!("Rua {}", i));
        records.push(CandidateRecord::new(i.to_string().as_str(), key));
    }
    let lookup = Arc::new(lookup);
    let config = PipelineConfig {
        concurrency: 3,
        distance_method: DistanceMethod::Haversine,
        ..Default::default()
    };
    let pipeline = Pipeline::new(
        Arc::new(InMemoryStore::new(records)),
        lookup.clone(),
        Arc::new(CountingGeocoder::default()),
        config,
    );

    let report = pipeline.run().await.unwrap();

    assert_eq!(lookup.calls().len(), 12);
    assert_eq!(report.resolved_records, 12);
    assert!(lookup.max_in_flight.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_concurrent_runs_are_rejected() {
    let lookup = Arc::new(CountingLookup {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let pipeline = pipeline(
        store(&[("a", "01422000")]),
        lookup,
        Arc::new(CountingGeocoder::default()),
    );

    let (first, second) = tokio::join!(pipeline.run(), pipeline.run());

    assert!(first.is_ok());
    assert!(matches!(second, Err(PipelineError::AlreadyRunning)));

    // The lock is released once the first run completes
    assert!(pipeline.run().await.is_ok());
}
