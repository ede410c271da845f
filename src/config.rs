//! Application configuration.
//!
//! ## Resolution order
//!
//! 1. Environment variables (`TQ_` prefix, dotted path mapped to
//!    underscored uppercase: `queue.visibility_timeout_secs` ->
//!    `TQ_QUEUE_VISIBILITY_TIMEOUT_SECS`)
//! 2. TOML config file
//! 3. Built-in defaults
//!
//! Duration-valued keys are integer fields with an explicit unit suffix
//! (`*_secs`, `*_ms`).

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};
use crate::queue::QueueConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub queue: QueueSection,
    pub worker: WorkerSection,
    pub log: LogConfig,
}

/// HTTP server settings (consumed by the gateway).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub tls_enabled: bool,
    pub tls_cert_file: String,
    pub tls_key_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            shutdown_timeout_secs: 10,
            tls_enabled: false,
            tls_cert_file: String::new(),
            tls_key_file: String::new(),
        }
    }
}

/// Postgres mirror settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    pub max_connections: u32,
    pub max_idle_conns: u32,
    pub conn_max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "tq".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 25,
            max_idle_conns: 5,
            conn_max_lifetime_secs: 300,
        }
    }
}

impl DatabaseConfig {
    /// Assembles a Postgres connection URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

/// Redis primary-store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: u32,
    pub pool_size: u32,
    pub min_idle_conns: u32,
    pub dial_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: String::new(),
            db: 0,
            pool_size: 10,
            min_idle_conns: 5,
            dial_timeout_secs: 5,
            read_timeout_secs: 3,
            write_timeout_secs: 3,
        }
    }
}

impl RedisConfig {
    /// Assembles a Redis connection URL.
    #[must_use]
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.password, self.host, self.port, self.db
            )
        }
    }
}

/// Queue-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueSection {
    pub max_queue_size: i64,
    pub poll_interval_ms: u64,
    pub visibility_timeout_secs: u64,
    pub retention_period_secs: u64,
    pub dead_letter_max_retries: u32,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            poll_interval_ms: 100,
            visibility_timeout_secs: 30 * 60,
            retention_period_secs: 7 * 24 * 60 * 60,
            dead_letter_max_retries: 3,
        }
    }
}

impl QueueSection {
    /// Builds a [`QueueConfig`] for the named queue.
    #[must_use]
    pub fn to_queue_config(&self, name: impl Into<String>) -> QueueConfig {
        QueueConfig {
            name: name.into(),
            max_size: self.max_queue_size,
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            retention_period: Duration::from_secs(self.retention_period_secs),
            max_retries: self.dead_letter_max_retries,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..QueueConfig::default()
        }
    }
}

/// Worker runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerSection {
    pub concurrency: u32,
    pub batch_size: u32,
    pub process_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            concurrency: 10,
            batch_size: 10,
            process_timeout_secs: 300,
            heartbeat_interval_secs: 30,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
    pub output_path: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            output_path: String::new(),
        }
    }
}

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "TQ";

impl Config {
    /// Loads configuration: defaults, then the TOML file at `path` (when
    /// given), then `TQ_` environment overrides; validates the result.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an unreadable/unparsable file, a bad
    /// override value, or an invalid final configuration.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::wrap(e, format!("failed to read config file {}", path.display()))
                        .with_kind(ErrorKind::Configuration)
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` on parse failure.
    pub fn from_toml(raw: &str) -> crate::Result<Self> {
        toml::from_str(raw).map_err(|e| {
            Error::wrap(e, "failed to parse config").with_kind(ErrorKind::Configuration)
        })
    }

    /// Applies `TQ_`-prefixed environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when an override value fails to parse.
    pub fn apply_env(&mut self) -> crate::Result<()> {
        override_str("SERVER_HOST", &mut self.server.host);
        override_parse("SERVER_PORT", &mut self.server.port)?;
        override_parse("SERVER_READ_TIMEOUT_SECS", &mut self.server.read_timeout_secs)?;
        override_parse(
            "SERVER_WRITE_TIMEOUT_SECS",
            &mut self.server.write_timeout_secs,
        )?;
        override_parse(
            "SERVER_SHUTDOWN_TIMEOUT_SECS",
            &mut self.server.shutdown_timeout_secs,
        )?;

        override_str("DATABASE_HOST", &mut self.database.host);
        override_parse("DATABASE_PORT", &mut self.database.port)?;
        override_str("DATABASE_USER", &mut self.database.user);
        override_str("DATABASE_PASSWORD", &mut self.database.password);
        override_str("DATABASE_DATABASE", &mut self.database.database);
        override_str("DATABASE_SSL_MODE", &mut self.database.ssl_mode);
        override_parse("DATABASE_MAX_CONNECTIONS", &mut self.database.max_connections)?;

        override_str("REDIS_HOST", &mut self.redis.host);
        override_parse("REDIS_PORT", &mut self.redis.port)?;
        override_str("REDIS_PASSWORD", &mut self.redis.password);
        override_parse("REDIS_DB", &mut self.redis.db)?;
        override_parse("REDIS_POOL_SIZE", &mut self.redis.pool_size)?;

        override_parse("QUEUE_MAX_QUEUE_SIZE", &mut self.queue.max_queue_size)?;
        override_parse("QUEUE_POLL_INTERVAL_MS", &mut self.queue.poll_interval_ms)?;
        override_parse(
            "QUEUE_VISIBILITY_TIMEOUT_SECS",
            &mut self.queue.visibility_timeout_secs,
        )?;
        override_parse(
            "QUEUE_RETENTION_PERIOD_SECS",
            &mut self.queue.retention_period_secs,
        )?;
        override_parse(
            "QUEUE_DEAD_LETTER_MAX_RETRIES",
            &mut self.queue.dead_letter_max_retries,
        )?;

        override_parse("WORKER_CONCURRENCY", &mut self.worker.concurrency)?;
        override_parse("WORKER_BATCH_SIZE", &mut self.worker.batch_size)?;
        override_parse(
            "WORKER_PROCESS_TIMEOUT_SECS",
            &mut self.worker.process_timeout_secs,
        )?;
        override_parse(
            "WORKER_HEARTBEAT_INTERVAL_SECS",
            &mut self.worker.heartbeat_interval_secs,
        )?;

        override_str("LOG_LEVEL", &mut self.log.level);
        override_str("LOG_FORMAT", &mut self.log.format);
        override_str("LOG_OUTPUT_PATH", &mut self.log.output_path);
        Ok(())
    }

    /// Validates the assembled configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` on invalid values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.queue.visibility_timeout_secs == 0 {
            return Err(Error::configuration(
                "queue.visibility_timeout_secs must be non-zero",
            ));
        }
        if self.worker.concurrency == 0 {
            return Err(Error::configuration("worker.concurrency must be at least 1"));
        }
        if self.worker.batch_size == 0 {
            return Err(Error::configuration("worker.batch_size must be at least 1"));
        }
        if !matches!(self.log.level.as_str(), "debug" | "info" | "warn" | "error") {
            return Err(Error::configuration(format!(
                "log.level must be one of debug/info/warn/error, got '{}'",
                self.log.level
            )));
        }
        Ok(())
    }
}

fn override_str(key: &str, target: &mut String) {
    if let Ok(value) = env::var(format!("{ENV_PREFIX}_{key}")) {
        *target = value;
    }
}

fn override_parse<T>(key: &str, target: &mut T) -> crate::Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let var = format!("{ENV_PREFIX}_{key}");
    if let Ok(value) = env::var(&var) {
        *target = value
            .parse()
            .map_err(|e| Error::configuration(format!("invalid value for {var}: {e}")))?;
    }
    Ok(())
}
