//! S3-compatible object sink (AWS S3, MinIO, R2, ...).
//!
//! Read-only from the engine's point of view: the analytical store writes
//! the artifacts, this client only verifies and lists them.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;

use super::{ObjectSink, SinkError};
use crate::config::SinkConfig;

pub struct S3Sink {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Sink {
    /// Build a client from sink configuration.
    ///
    /// Explicit credentials in the config take precedence; otherwise the
    /// standard provider chain (environment, profile, IAM role) applies.
    pub async fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader
                .credentials_provider(Credentials::from_keys(access_key, secret_key, None));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        // MinIO and most self-hosted S3 implementations require path-style
        // addressing.
        builder = builder.force_path_style(config.force_path_style);

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectSink for S3Sink {
    async fn artifact_exists(&self, key: &str) -> Result<bool, SinkError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(SinkError::Request(service_err.to_string()))
                }
            }
        }
    }

    async fn list_artifacts(&self, prefix: &str) -> Result<Vec<String>, SinkError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let page = request
                .send()
                .await
                .map_err(|e| SinkError::Request(e.to_string()))?;

            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }
}
