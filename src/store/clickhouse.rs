//! ClickHouse client over the HTTP interface.
//!
//! Uses the HTTP interface (port 8123 by default), not the native protocol:
//! credentials travel as `X-ClickHouse-*` headers and per-request settings as
//! query parameters. Mutations are sent with `mutations_sync` so the server
//! only acknowledges once the mutation has fully applied on all replicas,
//! and `wait_end_of_query=1` keeps the HTTP response open until then.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use super::{AnalyticalStore, StoreError, StoreResult};
use crate::config::StoreConfig;

pub struct ClickHouseHttpStore {
    client: reqwest::Client,
    base: Url,
    database: String,
    user: String,
    password: String,
    mutation_sync: u8,
    timeout: Duration,
}

impl ClickHouseHttpStore {
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let base = Url::parse(&format!("http://{}:{}/", config.host, config.port))
            .map_err(|e| StoreError::Connection(format!("invalid store address: {e}")))?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base,
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            mutation_sync: config.mutation_sync,
            timeout,
        })
    }

    fn request(&self, sql: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.base.clone())
            .query(&[("database", self.database.as_str())])
            .query(&[("wait_end_of_query", "1")])
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .body(sql.to_string())
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> StoreResult<String> {
        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::from_transport(e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::from_transport(e, self.timeout))?;

        match status {
            s if s.is_success() => Ok(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(StoreError::Auth(body.trim().to_string()))
            }
            s => Err(StoreError::Http {
                status: s.as_u16(),
                body: body.trim().to_string(),
            }),
        }
    }
}

#[async_trait]
impl AnalyticalStore for ClickHouseHttpStore {
    async fn command(&self, sql: &str) -> StoreResult<()> {
        let mutation_sync = self.mutation_sync.to_string();
        let builder = self
            .request(sql)
            .query(&[("mutations_sync", mutation_sync.as_str())]);
        self.send(builder).await.map(|_| ())
    }

    async fn query_count(&self, sql: &str) -> StoreResult<u64> {
        let body = self.send(self.request(sql)).await?;
        let value = body.trim();
        value.parse::<u64>().map_err(|_| {
            StoreError::Protocol(format!("expected a single count, got: {value:.60}"))
        })
    }

    async fn query_raw(&self, sql: &str) -> StoreResult<String> {
        self.send(self.request(sql)).await
    }
}
