//! Configuration module for the lifecycle engine.
//!
//! The engine is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [store]
//! host = "clickhouse.internal"
//! port = 8123
//! database = "telemetry"
//! table = "flow_records"
//! password = "${CLICKHOUSE_PASSWORD}"
//!
//! [sink]
//! endpoint = "https://s3.example.net"
//! bucket = "flow-archive"
//! access_key_id = "${S3_ACCESS_KEY}"
//! secret_access_key = "${S3_SECRET_KEY}"
//!
//! [lifecycle]
//! dry_run = true
//! expected_statements = 4
//! ```

mod lifecycle;
mod observability;
mod sink;
mod store;

use std::path::Path;

pub use lifecycle::{LifecycleConfig, RetryConfig};
pub use observability::{LogFormat, LogLevel, LoggingConfig, MetricsConfig, ObservabilityConfig};
use serde::{Deserialize, Serialize};
pub use sink::SinkConfig;
pub use store::StoreConfig;

/// Root configuration for the lifecycle engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Hot-store connection.
    #[serde(default)]
    pub store: StoreConfig,

    /// Object sink receiving export artifacts.
    pub sink: SinkConfig,

    /// Run behavior: dry-run gate, script location, retry policy.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;
        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: EngineConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate().map_err(ConfigError::Validation)?;
        self.sink.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand `${VAR_NAME}` references in config text.
///
/// Expansion is line-wise and comment-aware: a `${...}` appearing after a
/// `#` on the same line is left alone.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    // Unwrap: the pattern is a compile-time constant.
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else { continue };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    if !input.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
