use actix_web::{web, HttpResponse, Responder};
use validator::Validate;
use crate::core::{Pipeline, PipelineError, RunParameters};
use crate::models::{Coordinate, ErrorResponse, HealthResponse, RunProximityRequest, RunProximityResponse};
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// Configure all proximity routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/proximity/run", web::post().to(run_proximity));
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let store_healthy = state.pipeline.store_healthy().await;

    let status = if store_healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Merge request overrides with the configured defaults
fn run_parameters(defaults: RunParameters, req: &RunProximityRequest) -> RunParameters {
    RunParameters {
        reference: Coordinate::new(
            req.reference_latitude.unwrap_or(defaults.reference.latitude),
            req.reference_longitude.unwrap_or(defaults.reference.longitude),
        ),
        threshold_km: req.threshold_km.unwrap_or(defaults.threshold_km),
    }
}

fn error_response(err: &PipelineError) -> HttpResponse {
    let body = |error: &str, status_code: u16| ErrorResponse {
        error: error.to_string(),
        message: err.to_string(),
        status_code,
    };

    match err {
        PipelineError::AlreadyRunning => HttpResponse::Conflict().json(body("Run in progress", 409)),
        PipelineError::Resolve { .. } | PipelineError::Geocode { .. } => {
            HttpResponse::BadGateway().json(body("Upstream service failed", 502))
        }
        PipelineError::Store(_) => HttpResponse::InternalServerError().json(body("Store query failed", 500)),
        PipelineError::Task { .. } => HttpResponse::InternalServerError().json(body("Pipeline failed", 500)),
    }
}

/// Run the proximity pipeline
///
/// POST /api/v1/proximity/run
///
/// Request body:
/// ```json
/// {
///   "thresholdKm": 5.0,
///   "referenceLatitude": -23.5648196,
///   "referenceLongitude": -46.6600444,
///   "includeRecords": true
/// }
/// ```
async fn run_proximity(
    state: web::Data<AppState>,
    req: web::Json<RunProximityRequest>,
) -> impl Responder {
    if let Err(errors) = req.validate() {
        tracing::info!("Validation failed for run request: field_errors={:?}", errors);
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Validation failed".to_string(),
            message: errors.to_string(),
            status_code: 400,
        });
    }

    let params = run_parameters(state.pipeline.default_parameters(), &req);

    match state.pipeline.run_with(params).await {
        Ok(mut report) => {
            let retained_count = report.retained_count();
            tracing::info!("Run {} retained {} records", report.run_id, retained_count);
            if !req.include_records {
                report.retained.clear();
            }
            HttpResponse::Ok().json(RunProximityResponse {
                run_id: report.run_id,
                retained_count,
                report,
            })
        }
        Err(e) => {
            match e.stage() {
                Some(stage) => tracing::error!("Proximity run failed in {} stage: {}", stage, e),
                None => tracing::error!("Proximity run failed: {}", e),
            }
            error_response(&e)
        }
    }
}
