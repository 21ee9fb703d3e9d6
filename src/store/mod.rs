//! Analytical store clients.
//!
//! The engine talks to the hot store through the [`AnalyticalStore`] trait:
//! one method for confirmed mutations, one for scalar count queries. The
//! production implementation speaks the ClickHouse HTTP interface; an
//! in-memory implementation backs the lifecycle tests.

mod clickhouse;
mod error;
mod memory;

use async_trait::async_trait;
pub use clickhouse::ClickHouseHttpStore;
pub use error::{StoreError, StoreResult, is_permanent_message, is_transient_message};
pub use memory::{FailOn, MemoryStore};

/// A SQL-executing analytical store.
///
/// Implementations must guarantee that `command` returns only once the
/// mutation has fully applied. A store that acknowledges mutations
/// asynchronously must be driven in its synchronous mode (for ClickHouse,
/// the `mutations_sync` setting); an unconfirmed mutation is a failure of
/// the call, not a success.
#[async_trait]
pub trait AnalyticalStore: Send + Sync {
    /// Execute a mutating statement to confirmed completion.
    async fn command(&self, sql: &str) -> StoreResult<()>;

    /// Execute a query returning a single count.
    async fn query_count(&self, sql: &str) -> StoreResult<u64>;

    /// Execute an informational read-only query, returning the raw
    /// response body for logging.
    async fn query_raw(&self, sql: &str) -> StoreResult<String>;
}
