//! Lifecycle run configuration: dry-run gate and retry policy.

use serde::{Deserialize, Serialize};

/// Settings governing a lifecycle run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct LifecycleConfig {
    /// If true, substitute every mutating statement with a read-only count
    /// probe. Defaults to true: going live is always an explicit decision,
    /// in the config file or on the command line.
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Path to the lifecycle script.
    #[serde(default = "default_script_path")]
    pub script_path: std::path::PathBuf,

    /// Expected statement count in the script, asserted after parsing.
    /// Guards against a truncated or mis-split script silently executing a
    /// partial lifecycle.
    #[serde(default)]
    pub expected_statements: Option<usize>,

    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            script_path: default_script_path(),
            expected_statements: None,
            retry: RetryConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_script_path() -> std::path::PathBuf {
    std::path::PathBuf::from("scripts/flow-export.sql")
}

/// Retry configuration for transient store failures.
///
/// Retries apply per mutating statement, with exponential backoff. Which
/// failures are retried at all is decided elsewhere, by failure class and
/// by what the current run has already confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Whether retries are enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum retry attempts, not counting the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Cap on the delay between retries, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Random jitter applied to each delay (fraction, 0.0-1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

impl RetryConfig {
    /// Delay for a given retry attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let base = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64);

        let jitter_range = capped * self.jitter;
        let jitter = if jitter_range > 0.0 {
            use rand::Rng;
            rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };

        std::time::Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}
