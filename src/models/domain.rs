use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a registry record in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

/// Registry entry selected for enrichment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: RecordId,
    #[serde(rename = "postalCode")]
    pub postal_code: String,
}

impl CandidateRecord {
    pub fn new(id: impl Into<RecordId>, postal_code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            postal_code: postal_code.into(),
        }
    }
}

/// Postal code with its lowest-order digits coarsened
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub(crate) fn new_unchecked(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address record returned by the postal-code lookup service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub street: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
}

impl fmt::Display for PostalAddress {
    /// Renders as `street, neighborhood, city - state`, skipping blank parts
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = [&self.street, &self.neighborhood, &self.city]
            .into_iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect();

        f.write_str(&parts.join(", "))?;

        let state = self.state.trim();
        if !state.is_empty() {
            if parts.is_empty() {
                f.write_str(state)?;
            } else {
                write!(f, " - {}", state)?;
            }
        }
        Ok(())
    }
}

/// Outcome of resolving one normalized key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub key: NormalizedKey,
    /// `None` when the key was invalid, unknown or timed out
    pub address: Option<String>,
}

impl ResolvedAddress {
    pub fn is_resolved(&self) -> bool {
        self.address.is_some()
    }
}

/// Latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// Reference point used when no other is configured: postal code 01422000, São Paulo
pub const DEFAULT_REFERENCE: Coordinate = Coordinate::new(-23.5648196, -46.6600444);

/// Candidate that survived both resolution stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub id: RecordId,
    #[serde(rename = "postalCode")]
    pub postal_code: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl EnrichedRecord {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Enriched record that lies within the distance threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetainedRecord {
    #[serde(flatten)]
    pub record: EnrichedRecord,
    #[serde(rename = "distanceKm")]
    pub distance_km: f64,
}

/// Inclusion predicate applied by the record store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFilter {
    /// Postal codes must start with this prefix
    pub prefix: String,
    /// Known placeholder values that never identify a real location
    pub placeholders: Vec<String>,
}

impl CandidateFilter {
    pub fn new(prefix: impl Into<String>, placeholders: Vec<String>) -> Self {
        Self {
            prefix: prefix.into(),
            placeholders,
        }
    }

    pub fn matches(&self, postal_code: &str) -> bool {
        postal_code.starts_with(&self.prefix)
            && !self.placeholders.iter().any(|p| p == postal_code)
    }
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self::new("0", vec!["0".to_string(), "00000000".to_string()])
    }
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Geocode,
    Distance,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Geocode => "geocode",
            Stage::Distance => "distance",
        };
        f.write_str(name)
    }
}

/// Cache counters collected over one stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    pub lookups: u64,
    /// Lookups that missed the cache and went to the backing computation
    pub misses: u64,
}

impl StageStats {
    pub fn hits(&self) -> u64 {
        self.lookups.saturating_sub(self.misses)
    }
}

/// Per-stage summary included in the run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub inputs: usize,
    pub outputs: usize,
    pub lookups: u64,
    #[serde(rename = "cacheMisses")]
    pub cache_misses: u64,
    #[serde(rename = "cacheHits")]
    pub cache_hits: u64,
}

impl StageReport {
    pub fn new(stage: Stage, inputs: usize, outputs: usize, stats: StageStats) -> Self {
        Self {
            stage,
            inputs,
            outputs,
            lookups: stats.lookups,
            cache_misses: stats.misses,
            cache_hits: stats.hits(),
        }
    }
}

/// Terminal output of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(rename = "runId")]
    pub run_id: uuid::Uuid,
    #[serde(rename = "startedAt")]
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "finishedAt")]
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub reference: Coordinate,
    #[serde(rename = "thresholdKm")]
    pub threshold_km: f64,
    pub candidates: usize,
    #[serde(rename = "distinctKeys")]
    pub distinct_keys: usize,
    #[serde(rename = "resolvedRecords")]
    pub resolved_records: usize,
    #[serde(rename = "distinctAddresses")]
    pub distinct_addresses: usize,
    #[serde(rename = "geocodedRecords")]
    pub geocoded_records: usize,
    pub stages: Vec<StageReport>,
    pub retained: Vec<RetainedRecord>,
}

impl RunReport {
    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }

    pub fn retained_ids(&self) -> Vec<RecordId> {
        self.retained.iter().map(|r| r.record.id.clone()).collect()
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}
