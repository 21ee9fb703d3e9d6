//! In-memory analytical store for lifecycle tests.
//!
//! Models a single hot table as two row counters (marker clear / marker set)
//! plus a log of export sizes. Statements are interpreted through the same
//! classifier the planner uses, so the double stays honest about which
//! statements mutate what. Failure injection and a mid-mark insert hook let
//! tests exercise retry paths and the moving-target consistency cases.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{AnalyticalStore, StoreError, StoreResult};
use crate::script::{StatementRole, classify};

/// Which operation a planned failure or trigger applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Mark,
    Export,
    Delete,
    Count,
}

impl FailOn {
    fn matches(self, role: StatementRole) -> bool {
        matches!(
            (self, role),
            (FailOn::Mark, StatementRole::Mark)
                | (FailOn::Export, StatementRole::Export)
                | (FailOn::Delete, StatementRole::Delete)
        )
    }
}

#[derive(Debug, Default)]
struct TableState {
    unmarked: u64,
    marked: u64,
    /// Marked-row count at the time of each export statement.
    exports: Vec<u64>,
    /// Rows inserted by a simulated concurrent producer while the mark
    /// mutation is applying. They land after the batch freezes.
    insert_during_mark: u64,
}

pub struct MemoryStore {
    state: Mutex<TableState>,
    failures: Mutex<Vec<(FailOn, StoreError)>>,
    cancel_on: Mutex<Option<(FailOn, CancellationToken)>>,
}

impl MemoryStore {
    pub fn with_rows(unmarked: u64) -> Self {
        Self {
            state: Mutex::new(TableState {
                unmarked,
                ..TableState::default()
            }),
            failures: Mutex::new(Vec::new()),
            cancel_on: Mutex::new(None),
        }
    }

    /// Pre-set rows that already carry the marker, as left by an
    /// interrupted earlier run.
    pub fn with_marked_rows(unmarked: u64, marked: u64) -> Self {
        let store = Self::with_rows(unmarked);
        store.lock().marked = marked;
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Simulate a producer inserting rows between runs.
    pub fn insert_unmarked(&self, rows: u64) {
        self.lock().unmarked += rows;
    }

    /// Arrange for `rows` to be inserted while the mark mutation applies.
    pub fn insert_during_mark(&self, rows: u64) {
        self.lock().insert_during_mark = rows;
    }

    /// Queue an error for the next matching operation. Queue it several
    /// times to fail several consecutive attempts.
    pub fn fail_next(&self, on: FailOn, error: StoreError) {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((on, error));
    }

    /// Cancel `token` when the next matching operation executes.
    pub fn cancel_when(&self, on: FailOn, token: CancellationToken) {
        *self
            .cancel_on
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some((on, token));
    }

    pub fn unmarked(&self) -> u64 {
        self.lock().unmarked
    }

    pub fn marked(&self) -> u64 {
        self.lock().marked
    }

    pub fn total(&self) -> u64 {
        let state = self.lock();
        state.unmarked + state.marked
    }

    pub fn exports(&self) -> Vec<u64> {
        self.lock().exports.clone()
    }

    fn take_failure(&self, role: Option<StatementRole>, count: bool) -> Option<StoreError> {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let position = failures.iter().position(|(on, _)| match role {
            Some(role) => on.matches(role),
            None => count && *on == FailOn::Count,
        })?;
        Some(failures.remove(position).1)
    }

    fn fire_cancel(&self, role: StatementRole) {
        let mut slot = self
            .cancel_on
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let matches = slot.as_ref().is_some_and(|(on, _)| on.matches(role));
        if matches && let Some((_, token)) = slot.take() {
            token.cancel();
        }
    }
}

#[async_trait]
impl AnalyticalStore for MemoryStore {
    async fn command(&self, sql: &str) -> StoreResult<()> {
        let role = classify(sql).map_err(|e| StoreError::Statement(e.to_string()))?;

        if let Some(error) = self.take_failure(Some(role), false) {
            return Err(error);
        }

        let mut state = self.lock();
        match role {
            StatementRole::Mark => {
                state.marked += state.unmarked;
                state.unmarked = 0;
                // Concurrent inserts land only after the batch is frozen.
                state.unmarked += state.insert_during_mark;
                state.insert_during_mark = 0;
            }
            StatementRole::Export => {
                let batch = state.marked;
                state.exports.push(batch);
            }
            StatementRole::Delete => {
                state.marked = 0;
            }
            StatementRole::Query => {}
        }
        drop(state);

        self.fire_cancel(role);
        Ok(())
    }

    async fn query_count(&self, sql: &str) -> StoreResult<u64> {
        if let Some(error) = self.take_failure(None, true) {
            return Err(error);
        }

        let state = self.lock();
        let lower = sql.to_ascii_lowercase();
        let Some(where_at) = lower.find(" where ") else {
            return Ok(state.unmarked + state.marked);
        };
        let predicate = &lower[where_at + 7..];

        if predicate.contains("= 0") || predicate.contains("= false") {
            Ok(state.unmarked)
        } else if predicate.contains("= 1") || predicate.contains("= true") {
            Ok(state.marked)
        } else {
            Err(StoreError::Statement(format!(
                "memory store cannot evaluate predicate: {predicate}"
            )))
        }
    }

    async fn query_raw(&self, sql: &str) -> StoreResult<String> {
        self.query_count(sql).await.map(|n| n.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARK: &str = "ALTER TABLE db.t UPDATE exported = 1 WHERE exported = 0";
    const EXPORT: &str =
        "INSERT INTO FUNCTION s3('https://e/b/k', 'ak', 'sk', 'Parquet') SELECT * FROM db.t WHERE exported = 1";
    const DELETE: &str = "ALTER TABLE db.t DELETE WHERE exported = 1";

    #[tokio::test]
    async fn mark_export_delete_cycle() {
        let store = MemoryStore::with_rows(10);

        store.command(MARK).await.unwrap();
        assert_eq!(store.marked(), 10);
        assert_eq!(store.unmarked(), 0);

        store.command(EXPORT).await.unwrap();
        assert_eq!(store.exports(), vec![10]);

        store.command(DELETE).await.unwrap();
        assert_eq!(store.total(), 0);
    }

    #[tokio::test]
    async fn count_queries_follow_predicates() {
        let store = MemoryStore::with_marked_rows(7, 3);
        assert_eq!(
            store
                .query_count("SELECT count() FROM db.t WHERE exported = 0")
                .await
                .unwrap(),
            7
        );
        assert_eq!(
            store
                .query_count("SELECT count() FROM db.t WHERE exported = 1")
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            store.query_count("SELECT count() FROM db.t").await.unwrap(),
            10
        );
    }

    #[tokio::test]
    async fn rows_inserted_during_mark_stay_out_of_the_batch() {
        let store = MemoryStore::with_rows(100);
        store.insert_during_mark(5);

        store.command(MARK).await.unwrap();
        assert_eq!(store.marked(), 100);
        assert_eq!(store.unmarked(), 5);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let store = MemoryStore::with_rows(1);
        store.fail_next(FailOn::Mark, StoreError::Connection("reset".into()));

        assert!(store.command(MARK).await.is_err());
        assert!(store.command(MARK).await.is_ok());
    }
}
