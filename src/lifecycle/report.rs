//! Run outcomes and their aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// States of a lifecycle run.
///
/// Runs move strictly forward through `Idle`, `Marking`, `Marked`,
/// `Exporting`, `Exported`, `Deleting`, `Completed`; `Aborted` is reachable
/// from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Marking,
    Marked,
    Exporting,
    Exported,
    Deleting,
    Completed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }
}

/// Outcome of one run invocation.
///
/// Finalized at run end or on abort and never mutated afterward; retries
/// produce new outcomes appended to a [`RunHistory`] rather than rewriting
/// this one.
///
/// In dry-run mode the row counts are the counts the count probes reported:
/// `rows_marked` is the number of rows the mark would claim, and
/// `rows_exported`/`rows_deleted` project what export and delete would see
/// once that mark completes (claimed rows plus any rows already marked).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub dry_run: bool,
    /// Furthest state the run reached.
    pub state: RunState,
    pub rows_marked: u64,
    pub rows_exported: u64,
    pub rows_deleted: u64,
    /// Rows that already carried the marker at run start.
    pub rows_already_marked: u64,
    /// Total rows in the hot table at run start, when measured.
    pub rows_total: Option<u64>,
    /// Artifact key this run exported to, once export completed.
    pub artifact: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunOutcome {
    pub(crate) fn begin(run_id: Uuid, dry_run: bool) -> Self {
        Self {
            run_id,
            dry_run,
            state: RunState::Idle,
            rows_marked: 0,
            rows_exported: 0,
            rows_deleted: 0,
            rows_already_marked: 0,
            rows_total: None,
            artifact: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn finalize(&mut self, state: RunState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn abort(&mut self, error: impl std::fmt::Display) {
        self.error = Some(error.to_string());
        self.finalize(RunState::Aborted);
    }

    /// Wall-clock duration of the run, once finished.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// What happened to the batch, without re-querying the store.
    pub fn disposition(&self) -> Disposition {
        if self.dry_run {
            return Disposition::DryRun;
        }
        match self.state {
            RunState::Completed if self.rows_marked == 0 && self.rows_deleted == 0 => {
                Disposition::NothingToDo
            }
            RunState::Completed => Disposition::SafelyArchived,
            _ if self.rows_exported > 0 && self.rows_deleted == 0 => {
                Disposition::ExportedNotDeleted
            }
            _ => Disposition::AbortedBeforeExport,
        }
    }
}

/// Summary of a finished run's effect on the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Counts reported, nothing mutated.
    DryRun,
    /// The batch was archived and removed from the hot store.
    SafelyArchived,
    /// No rows were waiting; nothing was written or removed.
    NothingToDo,
    /// The batch is archived in the sink but still present in the hot
    /// store. Deleting alone is safe; re-exporting is unnecessary.
    ExportedNotDeleted,
    /// The run stopped before any export completed. All rows remain in the
    /// hot store; nothing was lost.
    AbortedBeforeExport,
}

/// Append-only record of run outcomes.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RunHistory {
    outcomes: Vec<RunOutcome>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: RunOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn last(&self) -> Option<&RunOutcome> {
        self.outcomes.last()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunOutcome> {
        self.outcomes.iter()
    }
}
