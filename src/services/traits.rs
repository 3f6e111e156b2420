use crate::models::{CandidateFilter, CandidateRecord, Coordinate, NormalizedKey, PostalAddress};
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a record store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by a postal-code lookup service
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Invalid postal code: {0}")]
    InvalidKey(String),

    #[error("Postal code not found: {0}")]
    NotFound(String),

    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("API returned error: {0}")]
    ApiError(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

impl LookupError {
    /// Whether the failure says something about the key rather than the transport
    pub fn is_unresolvable(&self) -> bool {
        matches!(self, LookupError::InvalidKey(_) | LookupError::NotFound(_))
    }

    /// Whether the request gave up waiting on the service
    pub fn is_timeout(&self) -> bool {
        matches!(self, LookupError::RequestError(e) if e.is_timeout())
    }
}

/// Errors raised by a geocoding service
///
/// "No match" is not an error: services return `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("API returned error: {0}")]
    ApiError(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

impl GeocodeError {
    /// Whether the request gave up waiting on the service
    pub fn is_timeout(&self) -> bool {
        matches!(self, GeocodeError::RequestError(e) if e.is_timeout())
    }
}

/// Queryable store of registry records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch every record whose postal code satisfies `filter`
    async fn fetch_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<CandidateRecord>, StoreError>;

    async fn health_check(&self) -> Result<bool, StoreError>;
}

/// Postal code to address lookup
#[async_trait]
pub trait PostalLookup: Send + Sync {
    async fn lookup(&self, key: &NormalizedKey) -> Result<PostalAddress, LookupError>;
}

/// Free-text address to coordinate lookup
#[async_trait]
pub trait GeocodingService: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, GeocodeError>;
}
