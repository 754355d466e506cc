//! Engine configuration

use crate::query::time::TimePrecision;
use anyhow::Result;
use serde::Deserialize;

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Directory holding model and node-set configuration files
    #[serde(default = "default_model_dir")]
    pub model_dir: String,

    /// Time-series store base URL
    #[serde(default = "default_tsdb_url")]
    pub tsdb_url: String,

    /// Time-series store database name
    #[serde(default = "default_tsdb_database")]
    pub tsdb_database: String,

    /// Store request timeout in seconds
    #[serde(default = "default_tsdb_timeout")]
    pub tsdb_timeout_secs: u64,

    /// Epoch precision for store round trips; None means full calendar
    /// instants
    #[serde(default)]
    pub time_precision: Option<TimePrecision>,
}

fn default_model_dir() -> String {
    std::env::var("PREDICTOR_DATA_DIR").unwrap_or_else(|_| "/var/lib/predictor".to_string())
}

fn default_tsdb_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_tsdb_database() -> String {
    "telemetry".to_string()
}

fn default_tsdb_timeout() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            tsdb_url: default_tsdb_url(),
            tsdb_database: default_tsdb_database(),
            tsdb_timeout_secs: default_tsdb_timeout(),
            time_precision: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("PREDICTOR"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }
}
