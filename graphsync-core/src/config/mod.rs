//! Configuration management for graphsync
//!
//! Settings come from defaults, a TOML file or `GRAPHSYNC_*` environment
//! variables, and are validated before use.

use crate::sync::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Session configuration shared by host and client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Reconciliation cycles per second
    pub sync_frequency: f64,

    /// bzip2 + base64 framing on the wire
    pub use_compress: bool,

    /// Which side wins a conflicting edit
    pub conflict_policy: ConflictPolicy,

    /// Only share objects whose class opted in
    pub snippet_share_only: bool,

    /// Hops from the root to encode; -1 means unlimited
    pub dump_object_depth: i64,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_frequency: 10.0,
            use_compress: true,
            conflict_policy: ConflictPolicy::ClientPrioritized,
            snippet_share_only: true,
            dump_object_depth: -1,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern GRAPHSYNC_<KEY>, for example
    /// GRAPHSYNC_SYNC_FREQUENCY=100 or GRAPHSYNC_CONFLICT_POLICY=host.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`SyncConfig::from_env`] with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(frequency) = lookup("GRAPHSYNC_SYNC_FREQUENCY") {
            config.sync_frequency = frequency
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid sync frequency: {}", e)))?;
        }
        if let Some(compress) = lookup("GRAPHSYNC_USE_COMPRESS") {
            config.use_compress = compress
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid compress flag: {}", e)))?;
        }
        if let Some(policy) = lookup("GRAPHSYNC_CONFLICT_POLICY") {
            config.conflict_policy = parse_policy(&policy)?;
        }
        if let Some(share_only) = lookup("GRAPHSYNC_SNIPPET_SHARE_ONLY") {
            config.snippet_share_only = share_only
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid share flag: {}", e)))?;
        }
        if let Some(depth) = lookup("GRAPHSYNC_DUMP_OBJECT_DEPTH") {
            config.dump_object_depth = depth
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid object depth: {}", e)))?;
        }

        if let Some(level) = lookup("GRAPHSYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = lookup("GRAPHSYNC_LOG_JSON") {
            config.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid JSON flag: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(format!("{}: {}", path.display(), e)))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sync_frequency.is_finite() || self.sync_frequency <= 0.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "sync_frequency must be a positive number, got {}",
                self.sync_frequency
            )));
        }

        if self.dump_object_depth < -1 {
            return Err(ConfigError::ValidationFailed(format!(
                "dump_object_depth must be -1 or more, got {}",
                self.dump_object_depth
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents)
            .map_err(|e| ConfigError::FileWriteError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Encode depth limit; `None` when unlimited
    pub fn max_depth(&self) -> Option<usize> {
        usize::try_from(self.dump_object_depth).ok()
    }

    /// Minimum time between two host cycles
    pub fn sync_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sync_frequency)
    }
}

fn parse_policy(raw: &str) -> Result<ConflictPolicy, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "host" | "host_prioritized" | "1" => Ok(ConflictPolicy::HostPrioritized),
        "client" | "client_prioritized" | "2" => Ok(ConflictPolicy::ClientPrioritized),
        other => Err(ConfigError::InvalidValue(format!("Invalid conflict policy: {}", other))),
    }
}
