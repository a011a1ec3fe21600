//! Configuration module for filedepot.

use serde::Deserialize;
use std::path::Path;

use crate::{DepotError, Result};

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Which store implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// MongoDB collection + GridFS bucket.
    Mongodb,
    /// Local SQLite database with chunked blob tables.
    Sqlite,
}

/// Blob+metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Backend selection.
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// MongoDB connection URL.
    #[serde(default = "default_store_url")]
    pub url: String,
    /// Database name.
    #[serde(default = "default_database")]
    pub database: String,
    /// Metadata collection name.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// GridFS bucket name.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Blob chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: u32,
    /// Path to the SQLite database file (sqlite backend only).
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

fn default_backend() -> StoreBackend {
    StoreBackend::Mongodb
}

fn default_store_url() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database() -> String {
    "filedepot".to_string()
}

fn default_collection() -> String {
    "files".to_string()
}

fn default_bucket() -> String {
    "fs".to_string()
}

fn default_chunk_size() -> u32 {
    255 * 1024 // GridFS default
}

fn default_sqlite_path() -> String {
    "data/filedepot.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_store_url(),
            database: default_database(),
            collection: default_collection(),
            bucket: default_bucket(),
            chunk_size_bytes: default_chunk_size(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

/// Local staging directories.
#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    /// Directory uploads are staged in before they go to the blob store.
    #[serde(default = "default_input_path")]
    pub input_path: String,
    /// Directory downloaded blobs are written to.
    #[serde(default = "default_output_path")]
    pub output_path: String,
}

fn default_input_path() -> String {
    "data/in".to_string()
}

fn default_output_path() -> String {
    "data/out".to_string()
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            input_path: default_input_path(),
            output_path: default_output_path(),
        }
    }
}

/// Upload limits.
#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    /// Maximum upload size in megabytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u64,
}

fn default_max_upload_size() -> u64 {
    10
}

/// Largest accepted `max_upload_size_mb` (1 TiB).
pub const MAX_UPLOAD_SIZE_MB: u64 = 1024 * 1024;

impl FilesConfig {
    /// Maximum upload size in bytes, saturating at `u64::MAX`.
    pub fn max_upload_size_bytes(&self) -> u64 {
        self.max_upload_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_upload_size_mb: default_max_upload_size(),
        }
    }
}

/// Reconciliation sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Whether the periodic sweep runs.
    #[serde(default = "default_reconcile_enabled")]
    pub enabled: bool,
    /// Interval between sweeps in seconds.
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
    /// Age after which a pending record is considered abandoned.
    #[serde(default = "default_pending_grace")]
    pub pending_grace_secs: u64,
}

impl ReconcileConfig {
    /// Grace period for pending records, capped at 100 years.
    pub fn pending_grace(&self) -> chrono::Duration {
        const MAX_GRACE_SECS: u64 = 100 * 365 * 24 * 3600;
        chrono::Duration::seconds(self.pending_grace_secs.min(MAX_GRACE_SECS) as i64)
    }
}

fn default_reconcile_enabled() -> bool {
    true
}

fn default_reconcile_interval() -> u64 {
    3600 // 1 hour
}

fn default_pending_grace() -> u64 {
    600 // 10 minutes
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconcile_enabled(),
            interval_secs: default_reconcile_interval(),
            pending_grace_secs: default_pending_grace(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/filedepot.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Staging directories.
    #[serde(default)]
    pub staging: StagingConfig,
    /// Upload limits.
    #[serde(default)]
    pub files: FilesConfig,
    /// Reconciliation sweep.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(DepotError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist. Environment overrides are applied either way.
    ///
    /// Any other failure, such as a malformed file, is returned.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match Self::load_with_env(path) {
            Err(DepotError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut config = Self::default();
                config.apply_env_overrides()?;
                Ok(config)
            }
            result => result,
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| DepotError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `MONGO_URL`: store connection URL
    /// - `DATABASE`: database name
    /// - `COLLECTION`: metadata collection name
    /// - `PATH_INPUT`: input staging directory
    /// - `PATH_OUT`: output staging directory
    /// - `PORT`: listen port
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(url) = get("MONGO_URL") {
            self.store.url = url;
        }
        if let Some(database) = get("DATABASE") {
            self.store.database = database;
        }
        if let Some(collection) = get("COLLECTION") {
            self.store.collection = collection;
        }
        if let Some(input) = get("PATH_INPUT") {
            self.staging.input_path = input;
        }
        if let Some(output) = get("PATH_OUT") {
            self.staging.output_path = output;
        }
        if let Some(port) = get("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| DepotError::Config(format!("invalid PORT value: {port}")))?;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Mongodb && self.store.url.is_empty() {
            return Err(DepotError::Config(
                "store.url is not set. Set it in config.toml or via MONGO_URL.".to_string(),
            ));
        }
        if self.store.database.is_empty() || self.store.collection.is_empty() {
            return Err(DepotError::Config(
                "store.database and store.collection must not be empty".to_string(),
            ));
        }
        if self.store.bucket.is_empty() {
            return Err(DepotError::Config("store.bucket must not be empty".to_string()));
        }
        if self.store.chunk_size_bytes == 0 {
            return Err(DepotError::Config(
                "store.chunk_size_bytes must be greater than zero".to_string(),
            ));
        }
        if self.staging.input_path.is_empty() || self.staging.output_path.is_empty() {
            return Err(DepotError::Config(
                "staging.input_path and staging.output_path must be set".to_string(),
            ));
        }
        if self.files.max_upload_size_mb == 0 {
            return Err(DepotError::Config(
                "files.max_upload_size_mb must be greater than zero".to_string(),
            ));
        }
        if self.files.max_upload_size_mb > MAX_UPLOAD_SIZE_MB {
            return Err(DepotError::Config(format!(
                "files.max_upload_size_mb must be at most {MAX_UPLOAD_SIZE_MB}"
            )));
        }
        if self.reconcile.enabled && self.reconcile.interval_secs == 0 {
            return Err(DepotError::Config(
                "reconcile.interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
