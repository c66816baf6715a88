//! Application configuration loaded from environment variables.

use crate::errors::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// How often (in seconds) the expiry sweeper runs
    pub sweep_interval_secs: u64,
    /// Per-type available-unit count below which a low-stock alert fires
    pub low_stock_threshold: i64,
    /// TTL (hours) applied to inter-hospital requests at creation
    pub request_ttl_hours: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./hemoledger.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| EngineError::Config("Invalid API_PORT".to_string()))?,
            sweep_interval_secs: env_var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| EngineError::Config("Invalid SWEEP_INTERVAL_SECS".to_string()))?,
            low_stock_threshold: env_var("LOW_STOCK_THRESHOLD")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| EngineError::Config("Invalid LOW_STOCK_THRESHOLD".to_string()))?,
            request_ttl_hours: env_var("REQUEST_TTL_HOURS")
                .unwrap_or_else(|_| "72".to_string())
                .parse()
                .map_err(|_| EngineError::Config("Invalid REQUEST_TTL_HOURS".to_string()))?,
        })
    }

    pub fn request_ttl_secs(&self) -> i64 {
        self.request_ttl_hours * 3600
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| EngineError::Config(format!("Missing env var: {key}")))
}
