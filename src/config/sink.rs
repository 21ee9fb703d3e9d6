//! Object sink configuration.

use serde::{Deserialize, Serialize};

/// S3-compatible sink settings.
///
/// The endpoint/credential values double as template variables for the
/// lifecycle script and as the verification client's configuration, so the
/// two can never drift apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    /// Endpoint URL for S3-compatible services.
    /// Examples: "https://s3.example.net", "http://minio.local:9000".
    /// Omit for AWS S3 proper.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bucket receiving export artifacts.
    pub bucket: String,

    /// Artifact key prefix.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Artifact file extension, matching the export format the script asks
    /// the store to produce.
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Region name. Optional for most S3-compatible services.
    #[serde(default)]
    pub region: Option<String>,

    /// Access key id. Usually supplied via `${VAR}` interpolation.
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret access key. Usually supplied via `${VAR}` interpolation.
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Use path-style URLs. Required for MinIO and most self-hosted
    /// S3-compatible services.
    #[serde(default = "default_true")]
    pub force_path_style: bool,

    /// Always append a run-id suffix to artifact keys. Keys carry
    /// second-granularity timestamps; enable this when runs can start less
    /// than a second apart.
    #[serde(default)]
    pub append_run_id: bool,

    /// Verify the artifact exists in the sink after export, before any
    /// delete is issued. Requires the `s3-verify` feature.
    #[serde(default = "default_true")]
    pub verify_artifacts: bool,
}

fn default_prefix() -> String {
    "flows".to_string()
}

fn default_extension() -> String {
    "parquet".to_string()
}

fn default_true() -> bool {
    true
}

impl SinkConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.bucket.is_empty() {
            return Err("sink.bucket must not be empty".to_string());
        }
        if self.prefix.is_empty() {
            return Err("sink.prefix must not be empty".to_string());
        }
        if self
            .prefix
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '/'))
        {
            return Err(format!(
                "sink.prefix may contain only alphanumerics, '_', '-' and '/', got {:?}",
                self.prefix
            ));
        }
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(_), None) | (None, Some(_)) => Err(
                "sink.access_key_id and sink.secret_access_key must be set together".to_string(),
            ),
            _ => Ok(()),
        }
    }
}
