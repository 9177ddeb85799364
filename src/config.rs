//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::dispatch::{BackoffConfig, DispatcherConfig};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Admin server host
    pub host: String,

    /// Admin server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Outbox poll interval in milliseconds
    pub outbox_poll_interval_ms: u64,

    /// Messages leased per dispatch cycle
    pub outbox_batch_size: usize,

    /// Failures allowed before a message is dead-lettered
    pub outbox_max_retries: i32,

    /// Lease length in seconds
    pub outbox_lease_secs: u64,

    pub outbox_backoff_base_ms: u64,
    pub outbox_backoff_max_ms: u64,

    /// Recorded on every claimed message
    pub worker_id: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10)?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = parse_or("PORT", 3000)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let outbox_batch_size: usize = parse_or("OUTBOX_BATCH_SIZE", 50)?;
        if outbox_batch_size == 0 {
            return Err(ConfigError::InvalidValue("OUTBOX_BATCH_SIZE"));
        }

        let outbox_max_retries: i32 = parse_or("OUTBOX_MAX_RETRIES", 5)?;
        if outbox_max_retries < 0 {
            return Err(ConfigError::InvalidValue("OUTBOX_MAX_RETRIES"));
        }

        let worker_id = env::var("WORKER_ID")
            .unwrap_or_else(|_| format!("dispatcher-{}", std::process::id()));

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            outbox_poll_interval_ms: parse_or("OUTBOX_POLL_INTERVAL_MS", 1000)?,
            outbox_batch_size,
            outbox_max_retries,
            outbox_lease_secs: parse_or("OUTBOX_LEASE_SECS", 30)?,
            outbox_backoff_base_ms: parse_or("OUTBOX_BACKOFF_BASE_MS", 1000)?,
            outbox_backoff_max_ms: parse_or("OUTBOX_BACKOFF_MAX_MS", 300_000)?,
            worker_id,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Dispatcher settings derived from the outbox variables
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            worker_id: self.worker_id.clone(),
            poll_interval: Duration::from_millis(self.outbox_poll_interval_ms),
            batch_size: self.outbox_batch_size,
            max_retries: self.outbox_max_retries,
            lease_duration: Duration::from_secs(self.outbox_lease_secs),
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(self.outbox_backoff_base_ms),
                max_delay: Duration::from_millis(self.outbox_backoff_max_ms),
                ..BackoffConfig::default()
            },
        }
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
