use actix_cors::Cors;
use actix_web::{web, App, HttpServer, HttpResponse, middleware, error, http::StatusCode};
use cep_proximity::config::{LogFormat, RunMode, Settings};
use cep_proximity::models::ErrorResponse;
use cep_proximity::routes::{self, proximity::AppState};
use cep_proximity::services::{PhotonClient, PostgresStore, ViaCepClient};
use cep_proximity::Pipeline;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, error};
use tracing_subscriber::EnvFilter;

/// JSON error response for JSON payload errors
#[derive(Debug, serde::Serialize)]
pub struct JsonError(ErrorResponse);

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.0.error, self.0.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::from_u16(self.0.status_code).unwrap_or(StatusCode::BAD_REQUEST))
            .json(&self.0)
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(err: error::JsonPayloadError, req: &actix_web::HttpRequest) -> actix_web::Error {
    tracing::info!("JSON payload error on {}: {}", req.path(), err);
    JsonError(ErrorResponse {
        error: "invalid_json".to_string(),
        message: format!("Invalid JSON: {}", err),
        status_code: 400,
    })
    .into()
}

fn io_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    error!("{}: {}", context, err);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    // Load configuration
    let settings = Settings::load().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    // Initialize logging; LOG_LEVEL / LOG_FORMAT override the config file
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| settings.logging.level.clone());
    let log_format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|value| LogFormat::parse(&value))
        .unwrap_or(settings.logging.format);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true);

    match log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.pretty().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    info!("Starting CEP proximity service ({:?} mode)...", settings.mode);

    // Open the record store; it lives until shutdown
    let store = Arc::new(
        PostgresStore::from_settings(
            &settings.database.url,
            settings.database.max_connections,
            settings.database.min_connections,
            settings.database.acquire_timeout_secs,
        )
        .await
        .map_err(|e| io_error("PostgreSQL connection error", e))?,
    );

    info!("PostgreSQL store initialized");

    let postal_lookup = ViaCepClient::new(
        settings.postal_lookup.endpoint.clone(),
        Duration::from_secs(settings.postal_lookup.timeout_secs),
    )
    .map_err(|e| io_error("Failed to create postal lookup client", e))?;

    let geocoder = PhotonClient::new(
        settings.geocoder.endpoint.clone(),
        &settings.geocoder.user_agent,
        settings.geocoder.language.clone(),
        Duration::from_secs(settings.geocoder.timeout_secs),
    )
    .map_err(|e| io_error("Failed to create geocoding client", e))?;

    let pipeline_config = settings.pipeline_config();
    info!(
        "Pipeline configured: prefix {:?}, coarsen {} digits, {} km from {}, {} workers",
        pipeline_config.filter.prefix,
        pipeline_config.coarsen_digits,
        pipeline_config.threshold_km,
        pipeline_config.reference,
        pipeline_config.concurrency
    );

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        Arc::new(postal_lookup),
        Arc::new(geocoder),
        pipeline_config,
    ));

    let result = match settings.mode {
        RunMode::Batch => run_batch(&pipeline).await,
        RunMode::Server => serve(&settings, pipeline).await,
    };

    store.close().await;
    result
}

/// Run the pipeline once and print the report as JSON
async fn run_batch(pipeline: &Pipeline) -> std::io::Result<()> {
    let report = pipeline
        .run()
        .await
        .map_err(|e| io_error("Proximity run failed", e))?;

    info!(
        "Run {} finished: {} of {} candidates within {} km",
        report.run_id,
        report.retained_count(),
        report.candidates,
        report.threshold_km
    );

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| io_error("Failed to serialize report", e))?;
    println!("{}", json);
    Ok(())
}

async fn serve(settings: &Settings, pipeline: Arc<Pipeline>) -> std::io::Result<()> {
    let app_state = AppState { pipeline };

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(2);

    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await
}
