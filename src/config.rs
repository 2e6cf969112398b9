//! Configuration loading for the condo management core
//!
//! Three JSON files are consumed at startup: `app.json`, `database.json` and
//! `logging.json`. Each is decoded into a typed struct with unknown fields
//! rejected, then validated. Configuration is loaded exactly once and treated
//! as immutable afterwards; there is no hot-reload.

use crate::errors::{AppError, AppResult};
use crate::models::Validate;
use log::LevelFilter;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default SQLite busy timeout, matching the documented blocking contract
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Settings consumed by the HTTP collaborator and the launcher
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
    pub secret_key: String,
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data")
}

impl Validate for AppConfig {
    fn validate(&self) -> AppResult<()> {
        if self.host.trim().is_empty() {
            return Err(AppError::validation("host", "Host cannot be empty"));
        }
        if self.port == 0 {
            return Err(AppError::validation("port", "Port cannot be 0"));
        }
        if self.secret_key.trim().is_empty() {
            return Err(AppError::validation(
                "secret_key",
                "Secret key cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Settings for the SQLite store and the migration engine
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub backend: String,
    pub path: PathBuf,
    pub migrations_path: PathBuf,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> AppResult<()> {
        if self.backend != "sqlite" {
            return Err(AppError::validation(
                "type",
                format!("Unsupported database backend: {}", self.backend),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(AppError::validation(
                "timeout_ms",
                "Busy timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSink {
    Console,
    File,
}

/// Logging settings applied by the launcher before anything else starts
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub global_level: LogLevel,
    #[serde(default)]
    pub per_module_levels: BTreeMap<String, LogLevel>,
    #[serde(default = "default_sinks")]
    pub sinks: Vec<LogSink>,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    /// Rotation threshold for the file sink; rotation itself is handled by
    /// the deployment (logrotate), the value is only validated here.
    #[serde(default)]
    pub rotation_size_bytes: Option<u64>,
}

fn default_sinks() -> Vec<LogSink> {
    vec![LogSink::Console]
}

impl Validate for LoggingConfig {
    fn validate(&self) -> AppResult<()> {
        if self.sinks.is_empty() {
            return Err(AppError::validation(
                "sinks",
                "At least one log sink is required",
            ));
        }
        if self.sinks.contains(&LogSink::File) && self.file_path.is_none() {
            return Err(AppError::validation(
                "file_path",
                "File sink requires file_path",
            ));
        }
        if self.rotation_size_bytes == Some(0) {
            return Err(AppError::validation(
                "rotation_size_bytes",
                "Rotation size must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl LoggingConfig {
    /// Initialize the global logger from this configuration.
    ///
    /// The console sink wins when both sinks are configured; `env_logger`
    /// writes to a single target. Repeated initialization (tests) is a no-op.
    pub fn init_logger(&self) -> AppResult<()> {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(self.global_level.to_filter());
        for (module, level) in &self.per_module_levels {
            builder.filter_module(module, level.to_filter());
        }

        if !self.sinks.contains(&LogSink::Console) {
            if let Some(path) = &self.file_path {
                let file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        AppError::configuration(path.display().to_string(), e.to_string())
                    })?;
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }

        let _ = builder.try_init();
        Ok(())
    }
}

/// The complete startup configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate `app.json`, `database.json` and `logging.json` from
    /// the given directory.
    pub fn load(config_dir: &Path) -> AppResult<Self> {
        let app: AppConfig = read_config(&config_dir.join("app.json"))?;
        let database: DatabaseConfig = read_config(&config_dir.join("database.json"))?;
        let logging: LoggingConfig = read_config(&config_dir.join("logging.json"))?;

        app.validate()?;
        database.validate()?;
        logging.validate()?;

        Ok(Config {
            app,
            database,
            logging,
        })
    }
}

fn read_config<T: DeserializeOwned>(path: &Path) -> AppResult<T> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::configuration(path.display().to_string(), e.to_string()))?;
    serde_json::from_str(&raw)
        .map_err(|e| AppError::configuration(path.display().to_string(), e.to_string()))
}
