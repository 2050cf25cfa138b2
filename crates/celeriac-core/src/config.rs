//! Configuration for clients, workers and logging.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CELERIAC_CONFIG (explicit override)
//!   2. ./celeriac.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_QUEUE: &str = "celery";
pub const DEFAULT_PREFETCH: u16 = 2;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CeleriacConfig {
    pub client: ClientConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub broker_uri: String,
    /// No backend means fire-and-forget submissions.
    pub backend_uri: Option<String>,
    pub queue: String,
    /// How long an unclaimed result is kept, measured from creation.
    pub result_ttl_secs: u64,
    /// Channels unused for this long are closed.
    pub channel_idle_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub broker_uri: String,
    pub backend_uri: String,
    pub queue: String,
    /// Number of workers. 0 = available parallelism.
    pub concurrency: usize,
    /// Unacknowledged deliveries per worker.
    pub prefetch: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: String,
    pub json: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_uri: "memory://".to_string(),
            backend_uri: None,
            queue: DEFAULT_QUEUE.to_string(),
            result_ttl_secs: 2 * 60 * 60,
            channel_idle_secs: 10 * 60,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            broker_uri: "memory://".to_string(),
            backend_uri: "memory://".to_string(),
            queue: DEFAULT_QUEUE.to_string(),
            concurrency: 0,
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl ClientConfig {
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn channel_idle(&self) -> Duration {
        Duration::from_secs(self.channel_idle_secs)
    }
}

impl WorkerConfig {
    /// `concurrency`, with 0 resolved to the available parallelism.
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CeleriacConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let lookup = |key: &str| std::env::var(key).ok();
        let path = Self::file_path(&lookup);
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
        lookup("CELERIAC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("celeriac.toml"))
    }

    /// Apply CELERIAC_* overrides read through `lookup`.
    ///
    /// Broker, backend and queue overrides apply to both the client and the
    /// worker sections.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("CELERIAC_BROKER_URI") {
            self.client.broker_uri = v.clone();
            self.worker.broker_uri = v;
        }
        if let Some(v) = lookup("CELERIAC_BACKEND_URI") {
            self.client.backend_uri = (!v.is_empty()).then(|| v.clone());
            self.worker.backend_uri = v;
        }
        if let Some(v) = lookup("CELERIAC_QUEUE") {
            self.client.queue = v.clone();
            self.worker.queue = v;
        }
        if let Some(v) = lookup("CELERIAC_WORKERS") {
            self.worker.concurrency = parse_number("CELERIAC_WORKERS", &v)?;
        }
        if let Some(v) = lookup("CELERIAC_PREFETCH") {
            self.worker.prefetch = parse_number("CELERIAC_PREFETCH", &v)?;
        }
        if let Some(v) = lookup("CELERIAC_LOG") {
            self.logging.filter = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.queue.is_empty() {
            return Err(invalid("client.queue", "must not be empty"));
        }
        if self.worker.queue.is_empty() {
            return Err(invalid("worker.queue", "must not be empty"));
        }
        if self.worker.prefetch == 0 {
            return Err(invalid("worker.prefetch", "must be at least 1"));
        }
        if self.client.result_ttl_secs == 0 {
            return Err(invalid("client.result_ttl_secs", "must be positive"));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: format!("'{raw}': {e}"),
    })
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}
