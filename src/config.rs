//! Configuration management for Turnstile.
//!
//! Two independent pieces:
//! - [`TurnstileConfig`]: where to listen, which store to use, how to log.
//!   Layered from an optional YAML file and `TURNSTILE__*` environment
//!   variables.
//! - [`LimitSettings`]: per-dimension limits, read from `MAX_REQUESTS`,
//!   `WINDOW_SECONDS` and `BLOCK_SECONDS` with `_IP` / `_TOKEN` overrides.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ratelimit::{Dimension, LimitConfig};

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnstileConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Counter store configuration
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Which counter store backs the limiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server
    #[default]
    Redis,
    /// Process-local memory; counts are not shared between processes
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix for every Redis key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// How often the memory store drops stale entries, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_key_prefix() -> String {
    "turnstile:".to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `LOG_LEVEL`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `TURNSTILE__SECTION__KEY` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("TURNSTILE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

/// Limits for both identity dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitSettings {
    pub ip: LimitConfig,
    pub token: LimitConfig,
}

impl LimitSettings {
    /// Read limits from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read limits through `lookup`, which maps a variable name to its value.
    ///
    /// For each of `MAX_REQUESTS`, `WINDOW_SECONDS` and `BLOCK_SECONDS` the
    /// dimension-specific variable (`_IP` / `_TOKEN`) wins when set;
    /// otherwise the bare name is used. Values must be positive integers.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            ip: dimension_limits(Dimension::Ip, &lookup)?,
            token: dimension_limits(Dimension::Token, &lookup)?,
        })
    }

    /// Longest window or block across both dimensions.
    ///
    /// Nothing older than this is ever read back, so it bounds how long a
    /// store needs to keep an idle key.
    pub fn longest_retention(&self) -> Duration {
        [self.ip, self.token]
            .iter()
            .flat_map(|limits| [limits.window(), limits.block()])
            .max()
            .unwrap_or_default()
    }

    pub fn for_dimension(&self, dimension: Dimension) -> &LimitConfig {
        match dimension {
            Dimension::Ip => &self.ip,
            Dimension::Token => &self.token,
        }
    }
}

fn dimension_limits<F>(dimension: Dimension, lookup: &F) -> Result<LimitConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let suffix = match dimension {
        Dimension::Ip => "IP",
        Dimension::Token => "TOKEN",
    };
    let capacity = read_positive("MAX_REQUESTS", suffix, lookup)?;
    let window = read_positive("WINDOW_SECONDS", suffix, lookup)?;
    let block = read_positive("BLOCK_SECONDS", suffix, lookup)?;

    LimitConfig::new(
        capacity,
        Duration::from_secs(window),
        Duration::from_secs(block),
    )
}

fn read_positive<F>(base: &str, suffix: &str, lookup: &F) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let specific = format!("{base}_{suffix}");
    let (name, raw) = match non_empty(lookup(&specific)) {
        Some(raw) => (specific, raw),
        None => match non_empty(lookup(base)) {
            Some(raw) => (base.to_string(), raw),
            None => {
                return Err(ConfigError::Missing {
                    name: specific,
                    fallback: base.to_string(),
                })
            }
        },
    };

    let value: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name: name.clone(),
        value: raw.clone(),
    })?;
    if value == 0 {
        return Err(ConfigError::OutOfRange { name });
    }
    Ok(value)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
