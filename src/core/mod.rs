// Core algorithm exports
pub mod distance;
pub mod geocoder;
pub mod normalizer;
pub mod pipeline;
pub mod resolver;
pub mod stage_cache;

pub use distance::{geodesic_distance, haversine_distance, is_within_threshold, DistanceEvaluator, DistanceMethod, DistanceVerdict};
pub use geocoder::Geocoder;
pub use normalizer::{normalize_postal_code, PostalCodeNormalizer, DEFAULT_COARSEN_DIGITS};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, RunParameters};
pub use resolver::AddressResolver;
pub use stage_cache::StageCache;
