use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::query::is_plain_identifier;
use crate::types::RetryPolicy;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 30; // connect + query, per attempt
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SINK_TABLE: &str = "query_results";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 60_000;

/// Top-level config (querybeat.toml + QUERYBEAT_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuerybeatConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub retry: RetryDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file shared by the catalog, triggers, ledger and results sink.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Dispatcher clock resolution.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// IANA zone the cron fields are evaluated in (e.g. "Europe/Berlin").
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of attempts that may run in parallel.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Capacity of the dispatcher → worker queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Hard ceiling on a single attempt (connect + query). External sources
    /// carry no timeout of their own.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Destination table for successful results. Created on first use.
    #[serde(default = "default_sink_table")]
    pub table_name: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            table_name: default_sink_table(),
        }
    }
}

/// Retry policy applied to task drafts that do not carry their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDefaults {
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub default_delay_ms: u64,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            default_max_retries: DEFAULT_MAX_RETRIES,
            default_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl RetryDefaults {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.default_max_retries,
            retry_delay_ms: self.default_delay_ms,
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.querybeat/querybeat.db", home)
}
fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_attempt_timeout_secs() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT_SECS
}
fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}
fn default_sink_table() -> String {
    DEFAULT_SINK_TABLE.to_string()
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl QuerybeatConfig {
    /// Load config from a TOML file with QUERYBEAT_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.querybeat/querybeat.toml
    ///
    /// Nested keys use a double underscore: `QUERYBEAT_WORKERS__MAX_CONCURRENCY=8`.
    /// A missing file is not an error; every field has a default.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: QuerybeatConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("QUERYBEAT_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        config.validate()?;
        tracing::debug!(path = %path, db = %config.database.path, "config loaded");
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.tick_interval_ms must be greater than 0".into(),
            ));
        }
        if self.scheduler.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "scheduler.timezone '{}' is not a known IANA zone",
                self.scheduler.timezone
            )));
        }
        if self.workers.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "workers.max_concurrency must be greater than 0".into(),
            ));
        }
        if self.workers.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "workers.queue_capacity must be greater than 0".into(),
            ));
        }
        if self.workers.attempt_timeout_secs == 0 || self.workers.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "worker timeouts must be greater than 0".into(),
            ));
        }
        if !is_plain_identifier(&self.sink.table_name) {
            return Err(ConfigError::Invalid(format!(
                "sink.table_name '{}' is not a plain SQL identifier",
                self.sink.table_name
            )));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.querybeat/querybeat.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = QuerybeatConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sink.table_name, "query_results");
        assert_eq!(config.workers.max_concurrency, DEFAULT_MAX_CONCURRENCY);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let config = QuerybeatConfig::load(Some("does-not-exist.toml"))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.scheduler.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
            Ok(())
        });
    }

    #[test]
    fn file_and_env_are_merged() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "querybeat.toml",
                r#"
                [database]
                path = "/tmp/qb.db"

                [scheduler]
                timezone = "Europe/Berlin"

                [workers]
                max_concurrency = 2
                "#,
            )?;
            jail.set_env("QUERYBEAT_WORKERS__MAX_CONCURRENCY", "8");
            jail.set_env("QUERYBEAT_SINK__TABLE_NAME", "nightly_results");

            let config =
                QuerybeatConfig::load(Some("querybeat.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.database.path, "/tmp/qb.db");
            assert_eq!(config.scheduler.timezone, "Europe/Berlin");
            assert_eq!(config.workers.max_concurrency, 8);
            assert_eq!(config.sink.table_name, "nightly_results");
            Ok(())
        });
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let mut config = QuerybeatConfig::default();
        config.scheduler.timezone = "Mars/Olympus".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn sink_table_must_be_identifier() {
        let mut config = QuerybeatConfig::default();
        config.sink.table_name = "results; DROP TABLE tasks".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = QuerybeatConfig::default();
        config.workers.max_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
