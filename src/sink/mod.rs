//! Object sink: artifact naming and archive verification.
//!
//! The store itself writes export artifacts (via its `s3()` table function);
//! this module owns the artifact *names* and the ability to prove an
//! artifact exists before any delete is allowed to proceed.

mod memory;
#[cfg(feature = "s3-verify")]
mod s3;

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
pub use memory::MemorySink;
#[cfg(feature = "s3-verify")]
pub use s3::S3Sink;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink configuration error: {0}")]
    Config(String),

    #[error("sink request failed: {0}")]
    Request(String),
}

/// A key-addressed blob sink holding export artifacts.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    /// Whether an artifact exists under `key`.
    async fn artifact_exists(&self, key: &str) -> Result<bool, SinkError>;

    /// Keys of artifacts whose name starts with `prefix`.
    async fn list_artifacts(&self, prefix: &str) -> Result<Vec<String>, SinkError>;
}

/// A generated artifact object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates artifact keys of the form `{prefix}_{YYYYMMDD_HHMMSS}.{ext}`.
///
/// Timestamps have second granularity, so two runs inside the same second
/// would collide and the later artifact would silently overwrite the
/// earlier one. The namer remembers the last second it issued a key for and
/// appends a run-id disambiguator on reuse; `append_run_id` makes the
/// disambiguator unconditional for schedulers that run faster than once a
/// second.
pub struct ArtifactNamer {
    prefix: String,
    extension: String,
    append_run_id: bool,
    last_stamp: Mutex<Option<String>>,
}

impl ArtifactNamer {
    pub fn new(prefix: &str, extension: &str, append_run_id: bool) -> Self {
        Self {
            prefix: prefix.to_string(),
            extension: extension.to_string(),
            append_run_id,
            last_stamp: Mutex::new(None),
        }
    }

    pub fn next(&self, now: DateTime<Utc>, run_id: Uuid) -> ArtifactKey {
        let stamp = format!("{}_{}", self.prefix, now.format("%Y%m%d_%H%M%S"));

        let mut last = self
            .last_stamp
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let reused = last.as_deref() == Some(stamp.as_str());
        *last = Some(stamp.clone());
        drop(last);

        let key = if self.append_run_id || reused {
            let short = run_id.simple().to_string();
            format!("{stamp}_{}.{}", &short[..8], self.extension)
        } else {
            format!("{stamp}.{}", self.extension)
        };
        ArtifactKey(key)
    }
}
