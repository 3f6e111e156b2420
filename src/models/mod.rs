// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    CandidateFilter, CandidateRecord, Coordinate, EnrichedRecord, NormalizedKey, PostalAddress,
    RecordId, ResolvedAddress, RetainedRecord, RunReport, Stage, StageReport, StageStats,
    DEFAULT_REFERENCE,
};
pub use requests::RunProximityRequest;
pub use responses::{ErrorResponse, HealthResponse, RunProximityResponse};
