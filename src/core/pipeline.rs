use crate::core::distance::{DistanceEvaluator, DistanceMethod};
use crate::core::geocoder::Geocoder;
use crate::core::normalizer::{PostalCodeNormalizer, DEFAULT_COARSEN_DIGITS};
use crate::core::resolver::AddressResolver;
use crate::models::{
    CandidateFilter, CandidateRecord, Coordinate, EnrichedRecord, NormalizedKey, RetainedRecord,
    RunReport, Stage, StageReport, DEFAULT_REFERENCE,
};
use crate::services::{
    GeocodeError, GeocodingService, LookupError, PostalLookup, RecordStore, StoreError,
};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;

/// Fatal pipeline failures; per-record drops never surface here
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store query failed: {0}")]
    Store(#[from] StoreError),

    #[error("Resolve stage failed for postal code {key}: {source}")]
    Resolve {
        key: String,
        #[source]
        source: Arc<LookupError>,
    },

    #[error("Geocode stage failed for address {address:?}: {source}")]
    Geocode {
        address: String,
        #[source]
        source: Arc<GeocodeError>,
    },

    #[error("Worker task failed during {stage} stage: {message}")]
    Task { stage: Stage, message: String },

    #[error("A pipeline run is already in progress")]
    AlreadyRunning,
}

impl PipelineError {
    /// Stage in which the failure happened, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Resolve { .. } => Some(Stage::Resolve),
            PipelineError::Geocode { .. } => Some(Stage::Geocode),
            PipelineError::Task { stage, .. } => Some(*stage),
            PipelineError::Store(_) | PipelineError::AlreadyRunning => None,
        }
    }
}

/// Static pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub filter: CandidateFilter,
    pub coarsen_digits: usize,
    pub reference: Coordinate,
    pub threshold_km: f64,
    pub distance_method: DistanceMethod,
    /// Maximum in-flight external calls within a stage
    pub concurrency: usize,
    pub lookup_timeout: Duration,
    pub geocode_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter: CandidateFilter::default(),
            coarsen_digits: DEFAULT_COARSEN_DIGITS,
            reference: DEFAULT_REFERENCE,
            threshold_km: 5.0,
            distance_method: DistanceMethod::Geodesic,
            concurrency: 4,
            lookup_timeout: Duration::from_secs(10),
            geocode_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-run overrides of the configured reference point and threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunParameters {
    pub reference: Coordinate,
    pub threshold_km: f64,
}

/// Staged enrichment pipeline
///
/// # Pipeline Stages
/// 1. Candidate query against the record store
/// 2. Postal code normalization and key deduplication
/// 3. Address resolution per distinct key
/// 4. Geocoding per distinct address
/// 5. Distance filtering against the reference point
///
/// Every stage drains its whole input before the next one starts, and each
/// stage's cache is cleared when the stage ends.
pub struct Pipeline {
    store: Arc<dyn RecordStore>,
    resolver: Arc<AddressResolver>,
    geocoder: Arc<Geocoder>,
    normalizer: PostalCodeNormalizer,
    config: PipelineConfig,
    run_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        lookup: Arc<dyn PostalLookup>,
        geocoding: Arc<dyn GeocodingService>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            resolver: Arc::new(AddressResolver::new(lookup, config.lookup_timeout)),
            geocoder: Arc::new(Geocoder::new(geocoding, config.geocode_timeout)),
            normalizer: PostalCodeNormalizer::new(config.coarsen_digits),
            config,
            run_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn default_parameters(&self) -> RunParameters {
        RunParameters {
            reference: self.config.reference,
            threshold_km: self.config.threshold_km,
        }
    }

    pub async fn store_healthy(&self) -> bool {
        self.store.health_check().await.unwrap_or(false)
    }

    /// Run the pipeline with the configured reference point and threshold
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        self.run_with(self.default_parameters()).await
    }

    /// Run the pipeline once; only one run may be active at a time
    pub async fn run_with(&self, params: RunParameters) -> Result<RunReport, PipelineError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| PipelineError::AlreadyRunning)?;

        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("pipeline_run", %run_id);

        self.execute(run_id, params).instrument(span).await
    }

    async fn execute(
        &self,
        run_id: uuid::Uuid,
        params: RunParameters,
    ) -> Result<RunReport, PipelineError> {
        let started_at = chrono::Utc::now();
        tracing::info!(
            "Starting proximity run: reference {}, threshold {} km",
            params.reference,
            params.threshold_km
        );

        // Stage 0: candidate query (fatal on failure, before any external call)
        let candidates = self.store.fetch_candidates(&self.config.filter).await?;
        let candidate_count = candidates.len();
        tracing::info!("Fetched {} candidate records", candidate_count);

        // Stage 1: normalization
        let keyed: Vec<(CandidateRecord, NormalizedKey)> = candidates
            .into_iter()
            .map(|record| {
                let key = self.normalizer.normalize(&record.postal_code);
                (record, key)
            })
            .collect();
        let distinct_keys = distinct(keyed.iter().map(|(_, key)| key));
        let distinct_key_count = distinct_keys.len();
        tracing::info!(
            "Normalized {} postal codes into {} distinct keys",
            candidate_count,
            distinct_key_count
        );

        // Stage 2: address resolution
        let resolved = self.resolve_stage(distinct_keys).await;
        let resolve_stats = self.resolver.finish_stage().await;
        let resolved = resolved?;

        let with_address: Vec<(CandidateRecord, String)> = keyed
            .into_iter()
            .filter_map(|(record, key)| {
                resolved
                    .get(&key)
                    .and_then(|address| address.clone())
                    .map(|address| (record, address))
            })
            .collect();
        drop(resolved);
        tracing::info!(
            "Resolved addresses for {} of {} records",
            with_address.len(),
            candidate_count
        );

        // Stage 3: geocoding
        let distinct_addresses = distinct(with_address.iter().map(|(_, address)| address));
        let distinct_address_count = distinct_addresses.len();
        let geocoded = self.geocode_stage(distinct_addresses).await;
        let geocode_stats = self.geocoder.finish_stage().await;
        let geocoded = geocoded?;

        let resolved_count = with_address.len();
        let enriched: Vec<EnrichedRecord> = with_address
            .into_iter()
            .filter_map(|(record, address)| {
                let coordinate = geocoded.get(&address).copied().flatten()?;
                Some(EnrichedRecord {
                    id: record.id,
                    postal_code: record.postal_code,
                    address,
                    latitude: coordinate.latitude,
                    longitude: coordinate.longitude,
                })
            })
            .collect();
        drop(geocoded);
        tracing::info!(
            "Geocoded {} of {} records ({} distinct addresses)",
            enriched.len(),
            resolved_count,
            distinct_address_count
        );

        // Stage 4: distance filter
        let geocoded_count = enriched.len();
        let mut evaluator = DistanceEvaluator::new(self.config.distance_method);
        let retained: Vec<RetainedRecord> = enriched
            .into_iter()
            .filter_map(|record| {
                let verdict =
                    evaluator.evaluate(record.coordinate(), params.reference, params.threshold_km);
                verdict.within.then_some(RetainedRecord {
                    record,
                    distance_km: verdict.distance_km,
                })
            })
            .collect();
        let distance_stats = evaluator.finish();

        tracing::info!(
            "{} of {} geocoded records are within {} km",
            retained.len(),
            geocoded_count,
            params.threshold_km
        );

        Ok(RunReport {
            run_id,
            started_at,
            finished_at: chrono::Utc::now(),
            reference: params.reference,
            threshold_km: params.threshold_km,
            candidates: candidate_count,
            distinct_keys: distinct_key_count,
            resolved_records: resolved_count,
            distinct_addresses: distinct_address_count,
            geocoded_records: geocoded_count,
            stages: vec![
                StageReport::new(Stage::Resolve, distinct_key_count, resolved_count, resolve_stats),
                StageReport::new(
                    Stage::Geocode,
                    distinct_address_count,
                    geocoded_count,
                    geocode_stats,
                ),
                StageReport::new(Stage::Distance, geocoded_count, retained.len(), distance_stats),
            ],
            retained,
        })
    }

    async fn resolve_stage(
        &self,
        keys: Vec<NormalizedKey>,
    ) -> Result<HashMap<NormalizedKey, Option<String>>, PipelineError> {
        let resolver = Arc::clone(&self.resolver);
        let results = fan_out(Stage::Resolve, self.config.concurrency, keys, move |key| {
            let resolver = Arc::clone(&resolver);
            async move {
                resolver
                    .resolve(&key)
                    .await
                    .map(|resolved| resolved.address)
                    .map_err(|source| PipelineError::Resolve {
                        key: key.to_string(),
                        source,
                    })
            }
        })
        .await?;

        Ok(results.into_iter().collect())
    }

    async fn geocode_stage(
        &self,
        addresses: Vec<String>,
    ) -> Result<HashMap<String, Option<Coordinate>>, PipelineError> {
        let geocoder = Arc::clone(&self.geocoder);
        let results = fan_out(Stage::Geocode, self.config.concurrency, addresses, move |address| {
            let geocoder = Arc::clone(&geocoder);
            async move {
                geocoder
                    .geocode(&address)
                    .await
                    .map_err(|source| PipelineError::Geocode {
                        address: address.clone(),
                        source,
                    })
            }
        })
        .await?;

        Ok(results.into_iter().collect())
    }
}

/// Distinct values in first-seen order
fn distinct<'a, T>(values: impl Iterator<Item = &'a T>) -> Vec<T>
where
    T: Clone + Eq + std::hash::Hash + 'a,
{
    let mut seen = HashSet::new();
    values.filter(|v| seen.insert(*v)).cloned().collect()
}

/// Run `work` for every input on a bounded pool of tasks
///
/// Returns once every input has been processed, or on the first error, in
/// which case the remaining tasks are aborted.
async fn fan_out<I, O, F, Fut>(
    stage: Stage,
    concurrency: usize,
    inputs: Vec<I>,
    work: F,
) -> Result<Vec<(I, O)>, PipelineError>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<O, PipelineError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut outputs = Vec::with_capacity(inputs.len());

    for input in inputs {
        // Surface failures early instead of queueing the whole stage
        while let Some(joined) = tasks.try_join_next() {
            outputs.push(collect_task(stage, joined)?);
        }

        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Task {
                stage,
                message: e.to_string(),
            })?;
        let future = work(input.clone());

        tasks.spawn(
            async move {
                let _permit = permit;
                (input, future.await)
            }
            .in_current_span(),
        );
    }

    while let Some(joined) = tasks.join_next().await {
        outputs.push(collect_task(stage, joined)?);
    }

    Ok(outputs)
}

fn collect_task<I, O>(
    stage: Stage,
    joined: Result<(I, Result<O, PipelineError>), tokio::task::JoinError>,
) -> Result<(I, O), PipelineError> {
    let (input, result) = joined.map_err(|e| PipelineError::Task {
        stage,
        message: e.to_string(),
    })?;
    result.map(|output| (input, output))
}
