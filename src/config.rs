use crate::core::distance::DistanceMethod;
use crate::core::normalizer::DEFAULT_COARSEN_DIGITS;
use crate::core::pipeline::PipelineConfig;
use crate::models::{CandidateFilter, Coordinate, DEFAULT_REFERENCE};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub mode: RunMode,
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub postal_lookup: PostalLookupSettings,
    #[serde(default)]
    pub geocoder: GeocoderSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Whether the process serves HTTP or performs a single run and exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Server,
    Batch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostalLookupSettings {
    #[serde(default = "default_postal_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocoderSettings {
    #[serde(default = "default_geocoder_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    pub language: Option<String>,
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PostalLookupSettings {
    fn default() -> Self {
        Self {
            endpoint: default_postal_endpoint(),
            timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            endpoint: default_geocoder_endpoint(),
            user_agent: default_user_agent(),
            language: None,
            timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_postal_endpoint() -> String { "https://viacep.com.br".to_string() }
fn default_geocoder_endpoint() -> String { "https://photon.komoot.io".to_string() }
fn default_user_agent() -> String { format!("cep-proximity/{}", env!("CARGO_PKG_VERSION")) }
fn default_call_timeout_secs() -> u64 { 10 }

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_postal_prefix")]
    pub postal_prefix: String,
    #[serde(default = "default_placeholder_codes")]
    pub placeholder_codes: Vec<String>,
    #[serde(default = "default_coarsen_digits")]
    pub coarsen_digits: usize,
    #[serde(default = "default_threshold_km")]
    pub threshold_km: f64,
    #[serde(default = "default_reference_latitude")]
    pub reference_latitude: f64,
    #[serde(default = "default_reference_longitude")]
    pub reference_longitude: f64,
    #[serde(default)]
    pub distance_method: DistanceMethod,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            postal_prefix: default_postal_prefix(),
            placeholder_codes: default_placeholder_codes(),
            coarsen_digits: default_coarsen_digits(),
            threshold_km: default_threshold_km(),
            reference_latitude: default_reference_latitude(),
            reference_longitude: default_reference_longitude(),
            distance_method: DistanceMethod::default(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_postal_prefix() -> String { "0".to_string() }
fn default_placeholder_codes() -> Vec<String> { vec!["0".to_string(), "00000000".to_string()] }
fn default_coarsen_digits() -> usize { DEFAULT_COARSEN_DIGITS }
fn default_threshold_km() -> f64 { 5.0 }
fn default_reference_latitude() -> f64 { DEFAULT_REFERENCE.latitude }
fn default_reference_longitude() -> f64 { DEFAULT_REFERENCE.longitude }
fn default_concurrency() -> usize { 4 }

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Parse a `LOG_FORMAT` value; unknown values yield `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "pretty" => Some(LogFormat::Pretty),
            "compact" => Some(LogFormat::Compact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Local overrides (config/local.toml)
    /// 4. Environment variables (prefixed with CEP_PROXIMITY__)
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g., CEP_PROXIMITY__PIPELINE__THRESHOLD_KM -> pipeline.threshold_km
            .add_source(
                Environment::with_prefix("CEP_PROXIMITY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings = apply_database_url(settings)?;

        settings.try_deserialize()
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("CEP_PROXIMITY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// Pipeline configuration derived from these settings
    pub fn pipeline_config(&self) -> PipelineConfig {
        let pipeline = &self.pipeline;
        PipelineConfig {
            filter: CandidateFilter::new(
                pipeline.postal_prefix.clone(),
                pipeline.placeholder_codes.clone(),
            ),
            coarsen_digits: pipeline.coarsen_digits,
            reference: Coordinate::new(pipeline.reference_latitude, pipeline.reference_longitude),
            threshold_km: pipeline.threshold_km,
            distance_method: pipeline.distance_method,
            concurrency: pipeline.concurrency.max(1),
            lookup_timeout: Duration::from_secs(self.postal_lookup.timeout_secs),
            geocode_timeout: Duration::from_secs(self.geocoder.timeout_secs),
        }
    }
}

/// Let the conventional DATABASE_URL variable override `database.url`
fn apply_database_url(settings: Config) -> Result<Config, ConfigError> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => Config::builder()
            .add_source(settings)
            .set_override("database.url", url)?
            .build(),
        Err(_) => Ok(settings),
    }
}
