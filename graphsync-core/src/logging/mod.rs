//! Logging subsystem for graphsync
//!
//! A thin layer over `tracing-subscriber`: configuration comes either from a
//! [`LogConfig`] built in code or from the `logging` section of
//! [`SyncConfig`](crate::config::SyncConfig). `RUST_LOG` overrides the level
//! when it is set.

use crate::config::{LoggingConfig, SyncConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// The minimum log level to display
    pub level: LogLevel,
    /// Whether to include timestamps
    pub with_timestamp: bool,
    /// Whether to include target module information
    pub with_target: bool,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_timestamp: true,
            with_target: true,
            json_format: false,
        }
    }
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.with_timestamp = enabled;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }
}

impl TryFrom<&LoggingConfig> for LogConfig {
    type Error = LoggingError;

    fn try_from(section: &LoggingConfig) -> Result<Self, Self::Error> {
        let level: LogLevel = section.level.parse()?;
        Ok(LogConfig::new(level)
            .with_timestamp(section.with_timestamp)
            .with_target(section.with_target)
            .json_format(section.json_format))
    }
}

/// Initialize the logging subsystem with default configuration
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize logging from the `logging` section of a session config
pub fn init_from_config(config: &SyncConfig) -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::try_from(&config.logging)?)
}

/// Initialize the logging subsystem with custom configuration
///
/// # Example
/// ```
/// use graphsync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
///
/// let config = LogConfig::new(LogLevel::Debug).with_target(false);
/// init_logging_with_config(config).expect("Failed to initialize logging");
/// ```
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let layer = fmt::layer().with_target(config.with_target);
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match (config.json_format, config.with_timestamp) {
        (true, true) => registry.with(layer.json()).try_init(),
        (true, false) => registry.with(layer.json().without_time()).try_init(),
        (false, true) => registry.with(layer).try_init(),
        (false, false) => registry.with(layer.without_time()).try_init(),
    };
    result.map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}
