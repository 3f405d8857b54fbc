//! Import configuration
//!
//! Loaded from the environment (and `.env`) with defaults, then overridden by CLI
//! flags through the `with_*` setters.

use aligner_common::{AlignerError, Result};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Import Configuration Constants
// ============================================================================

/// Default export location.
pub const DEFAULT_SOURCE: &str = "activities.csv";

/// Rows per transaction in the sequential importer.
pub const DEFAULT_COMMIT_INTERVAL: usize = 100;

/// Rows between progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;

/// Rows per batch in the parallel importer.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Worker count; 1 selects the sequential importer.
pub const DEFAULT_WORKERS: usize = 1;

/// Batches read ahead of the workers in the parallel importer.
pub const DEFAULT_MAX_IN_FLIGHT_BATCHES: usize = 4;

/// Per-field size limit (10 MiB), large enough for embedded payloads.
pub const DEFAULT_FIELD_SIZE_LIMIT: usize = 10 * 1024 * 1024;

/// Row errors logged individually before switching to counting only.
pub const DEFAULT_MAX_REPORTED_ERRORS: usize = 10;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/aligner";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Database pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
            min_connections: env_parse("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
            connect_timeout_secs: env_parse(
                "DATABASE_CONNECT_TIMEOUT",
                DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            ),
            idle_timeout_secs: env_parse("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
        }
    }

    /// Open the pool. Failure here is fatal to any run.
    pub async fn connect(&self) -> std::result::Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .connect(&self.url)
            .await
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(AlignerError::config("Database URL cannot be empty"));
        }

        if self.max_connections == 0 {
            return Err(AlignerError::config("Database max_connections must be greater than 0"));
        }

        if self.min_connections > self.max_connections {
            return Err(AlignerError::config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }

        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
        }
    }
}

/// Settings for one import run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub source: PathBuf,
    pub database: DatabaseConfig,
    pub commit_interval: usize,
    pub progress_interval: u64,
    pub batch_size: usize,
    pub workers: usize,
    pub max_in_flight_batches: usize,
    pub field_size_limit: usize,
    pub max_reported_errors: usize,
    pub show_progress_bar: bool,
}

impl ImportConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env();
        config.validate()?;

        Ok(config)
    }

    /// Read the environment without touching `.env` or validating
    pub fn from_env() -> Self {
        Self {
            source: std::env::var("ALIGNER_SOURCE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOURCE)),
            database: DatabaseConfig::from_env(),
            commit_interval: env_parse("ALIGNER_COMMIT_INTERVAL", DEFAULT_COMMIT_INTERVAL),
            progress_interval: env_parse("ALIGNER_PROGRESS_INTERVAL", DEFAULT_PROGRESS_INTERVAL),
            batch_size: env_parse("ALIGNER_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            workers: env_parse("ALIGNER_WORKERS", DEFAULT_WORKERS),
            max_in_flight_batches: env_parse(
                "ALIGNER_MAX_IN_FLIGHT_BATCHES",
                DEFAULT_MAX_IN_FLIGHT_BATCHES,
            ),
            field_size_limit: env_parse("ALIGNER_FIELD_SIZE_LIMIT", DEFAULT_FIELD_SIZE_LIMIT),
            max_reported_errors: env_parse(
                "ALIGNER_MAX_REPORTED_ERRORS",
                DEFAULT_MAX_REPORTED_ERRORS,
            ),
            show_progress_bar: false,
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database.url = url.into();
        self
    }

    pub fn with_commit_interval(mut self, rows: usize) -> Self {
        self.commit_interval = rows;
        self
    }

    pub fn with_progress_interval(mut self, rows: u64) -> Self {
        self.progress_interval = rows;
        self
    }

    pub fn with_batch_size(mut self, rows: usize) -> Self {
        self.batch_size = rows;
        self
    }

    /// Also grows the pool so every worker gets its own connection
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        let needed = u32::try_from(workers).unwrap_or(u32::MAX);
        self.database.max_connections = self.database.max_connections.max(needed);
        self
    }

    pub fn with_field_size_limit(mut self, bytes: usize) -> Self {
        self.field_size_limit = bytes;
        self
    }

    pub fn with_max_reported_errors(mut self, count: usize) -> Self {
        self.max_reported_errors = count;
        self
    }

    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress_bar = show;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.source.as_os_str().is_empty() {
            return Err(AlignerError::config("Source path cannot be empty"));
        }

        for (name, value) in [
            ("commit_interval", self.commit_interval),
            ("batch_size", self.batch_size),
            ("workers", self.workers),
            ("max_in_flight_batches", self.max_in_flight_batches),
            ("field_size_limit", self.field_size_limit),
        ] {
            if value == 0 {
                return Err(AlignerError::config(format!("{name} must be greater than 0")));
            }
        }

        if self.progress_interval == 0 {
            return Err(AlignerError::config("progress_interval must be greater than 0"));
        }

        self.database.validate()
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from(DEFAULT_SOURCE),
            database: DatabaseConfig::default(),
            commit_interval: DEFAULT_COMMIT_INTERVAL,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            max_in_flight_batches: DEFAULT_MAX_IN_FLIGHT_BATCHES,
            field_size_limit: DEFAULT_FIELD_SIZE_LIMIT,
            max_reported_errors: DEFAULT_MAX_REPORTED_ERRORS,
            show_progress_bar: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
