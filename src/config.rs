//! Agent configuration: compiled-in defaults, overridden by an optional TOML
//! file, overridden in turn by `AGENT_*` environment variables.
//!
//! Every tunable that carries a validation rule is a `nutype` newtype, so a
//! malformed value is rejected at load time rather than surfacing as a panic
//! deep inside a supervisor loop.

use crate::domain::RegistryId;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file was not valid TOML.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// An environment variable override held a value outside its valid range.
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvValue {
        /// Name of the offending environment variable.
        var: String,
        /// Human-readable reason.
        reason: String,
    },
}

/// TCP port the local HTTP/WebSocket API binds to.
#[nutype(
    validate(greater_or_equal = 1),
    default = 8080,
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)
)]
pub struct ApiPort(u16);

/// How often the speed sampler publishes an average messages/second figure.
#[nutype(
    validate(greater_or_equal = 1),
    default = 1,
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)
)]
pub struct SpeedSamplerIntervalMinutes(u64);

impl SpeedSamplerIntervalMinutes {
    /// The interval expressed as a [`Duration`].
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.into_inner() * 60)
    }
}

/// How often the liveness watchdog polls the broker and endpoints.
#[nutype(
    validate(greater_or_equal = 1),
    default = 5,
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)
)]
pub struct WatchdogIntervalSeconds(u64);

impl WatchdogIntervalSeconds {
    /// The interval expressed as a [`Duration`].
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.into_inner())
    }
}

/// Grace period given to an in-flight runtime/broker call during shutdown
/// before it is abandoned.
#[nutype(
    validate(greater_or_equal = 1),
    default = 30,
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)
)]
pub struct ShutdownGraceSeconds(u64);

impl ShutdownGraceSeconds {
    /// The grace period expressed as a [`Duration`].
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.into_inner())
    }
}

/// Complete, validated agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Address the local HTTP/WebSocket API binds to.
    pub bind_address: String,
    /// Port the local HTTP/WebSocket API binds to.
    pub api_port: ApiPort,
    /// Path to the embedded SQLite database backing the Workload Registry mirror.
    pub database_path: PathBuf,
    /// Directory where per-connector trust-store files are materialized.
    pub trust_store_dir: PathBuf,
    /// Speed sampler interval.
    pub speed_sampler_interval: SpeedSamplerIntervalMinutes,
    /// Liveness watchdog interval.
    pub watchdog_interval: WatchdogIntervalSeconds,
    /// Shutdown grace period for in-flight calls.
    pub shutdown_grace: ShutdownGraceSeconds,
    /// Registry id treated as the cache-only sentinel.
    pub cache_registry_id: RegistryId,
    /// When true, connector sessions use plaintext instead of a trust-store.
    pub connector_dev_mode: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            api_port: ApiPort::default(),
            database_path: PathBuf::from("fogline.db"),
            trust_store_dir: PathBuf::from("trust-stores"),
            speed_sampler_interval: SpeedSamplerIntervalMinutes::default(),
            watchdog_interval: WatchdogIntervalSeconds::default(),
            shutdown_grace: ShutdownGraceSeconds::default(),
            cache_registry_id: RegistryId(0),
            connector_dev_mode: false,
        }
    }
}

impl AgentConfig {
    /// Load configuration: defaults, then an optional TOML file, then
    /// `AGENT_*` environment variable overrides, in that order of
    /// precedence. The daemon refuses to start if this returns an error.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a given file path cannot be read or
    /// parsed, or if an environment override is malformed.
    pub fn load(file_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = file_path {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let from_file: PartialAgentConfig =
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            from_file.apply_onto(&mut config);
        }

        apply_env_overrides(&mut config)?;
        Ok(config)
    }
}

/// Mirrors [`AgentConfig`] with every field optional, for partial TOML files.
#[derive(Debug, Clone, Default, Deserialize)]
struct PartialAgentConfig {
    bind_address: Option<String>,
    api_port: Option<u16>,
    database_path: Option<PathBuf>,
    trust_store_dir: Option<PathBuf>,
    speed_sampler_interval_minutes: Option<u64>,
    watchdog_interval_seconds: Option<u64>,
    shutdown_grace_seconds: Option<u64>,
    cache_registry_id: Option<u64>,
    connector_dev_mode: Option<bool>,
}

impl PartialAgentConfig {
    fn apply_onto(self, config: &mut AgentConfig) {
        if let Some(v) = self.bind_address {
            config.bind_address = v;
        }
        if let Some(v) = self.api_port {
            if let Ok(port) = ApiPort::try_new(v) {
                config.api_port = port;
            }
        }
        if let Some(v) = self.database_path {
            config.database_path = v;
        }
        if let Some(v) = self.trust_store_dir {
            config.trust_store_dir = v;
        }
        if let Some(v) = self.speed_sampler_interval_minutes {
            if let Ok(interval) = SpeedSamplerIntervalMinutes::try_new(v) {
                config.speed_sampler_interval = interval;
            }
        }
        if let Some(v) = self.watchdog_interval_seconds {
            if let Ok(interval) = WatchdogIntervalSeconds::try_new(v) {
                config.watchdog_interval = interval;
            }
        }
        if let Some(v) = self.shutdown_grace_seconds {
            if let Ok(grace) = ShutdownGraceSeconds::try_new(v) {
                config.shutdown_grace = grace;
            }
        }
        if let Some(v) = self.cache_registry_id {
            config.cache_registry_id = RegistryId(v);
        }
        if let Some(v) = self.connector_dev_mode {
            config.connector_dev_mode = v;
        }
    }
}

fn apply_env_overrides(config: &mut AgentConfig) -> Result<(), ConfigError> {
    if let Ok(v) = std::env::var("AGENT_BIND_ADDRESS") {
        config.bind_address = v;
    }
    if let Ok(v) = std::env::var("AGENT_API_PORT") {
        let parsed: u16 = v
            .parse()
            .map_err(|_| ConfigError::InvalidEnvValue {
                var: "AGENT_API_PORT".to_string(),
                reason: "must be a u16".to_string(),
            })?;
        config.api_port = ApiPort::try_new(parsed).map_err(|_| ConfigError::InvalidEnvValue {
            var: "AGENT_API_PORT".to_string(),
            reason: "must be >= 1".to_string(),
        })?;
    }
    if let Ok(v) = std::env::var("AGENT_DATABASE_PATH") {
        config.database_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("AGENT_TRUST_STORE_DIR") {
        config.trust_store_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("AGENT_CONNECTOR_DEV_MODE") {
        config.connector_dev_mode = v == "1" || v.eq_ignore_ascii_case("true");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = AgentConfig::default();
        assert_eq!(config.api_port.into_inner(), 8080);
        assert_eq!(config.cache_registry_id, RegistryId(0));
    }

    #[test]
    fn load_without_file_returns_defaults_modulo_env() {
        let config = AgentConfig::load(None).expect("defaults are always valid");
        assert_eq!(config.bind_address, "127.0.0.1");
    }

    #[test]
    fn load_rejects_unparsable_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid = = toml").unwrap();
        let result = AgentConfig::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn load_applies_partial_file_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api_port = 9090\nconnector_dev_mode = true\n").unwrap();
        let config = AgentConfig::load(Some(&path)).expect("valid partial config");
        assert_eq!(config.api_port.into_inner(), 9090);
        assert!(config.connector_dev_mode);
    }
}
