//! CEP Proximity - geocoding enrichment for company registry records
//!
//! Resolves approximate coordinates for registry entries from their postal
//! code (CEP) and keeps the ones within a radius of a reference point. The
//! work runs as a staged pipeline: normalize, resolve address, geocode,
//! filter by distance, with a memoization table scoped to each stage.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use crate::core::{normalize_postal_code, Pipeline, PipelineConfig, PipelineError, RunParameters};
pub use models::{CandidateRecord, Coordinate, NormalizedKey, RecordId, RunReport};
