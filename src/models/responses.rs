use serde::{Deserialize, Serialize};
use crate::models::domain::RunReport;

/// Response for the run endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunProximityResponse {
    #[serde(rename = "runId")]
    pub run_id: uuid::Uuid,
    #[serde(rename = "retainedCount")]
    pub retained_count: usize,
    pub report: RunReport,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}
