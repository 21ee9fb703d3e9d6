use thiserror::Error;

use super::report::{RunOutcome, RunState};
use crate::{
    script::{ClassificationError, ParseError, StatementRole},
    sink::SinkError,
    store::StoreError,
};

/// Errors surfaced by a lifecycle run.
///
/// Variants carrying a [`RunOutcome`] describe failures of a run that had
/// started executing; the outcome records the furthest state reached and
/// the row counts so far. Everything else failed before any statement was
/// sent to the store.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error("another run already holds the lease for {table}")]
    LeaseHeld { table: String },

    #[error(
        "{marked} rows in {table} already carry the export marker at run start; a prior \
         run was interrupted between export and delete and must be resolved (resume the \
         delete, or clear the markers after verifying the archive) before a new run can start"
    )]
    MarkerResidue { table: String, marked: u64 },

    #[error("preflight query failed: {0}")]
    Preflight(StoreError),

    #[error("read-only query failed: {0}")]
    Probe(StoreError),

    #[error("{phase} phase failed: {cause}")]
    Phase {
        phase: StatementRole,
        cause: StoreError,
        outcome: Box<RunOutcome>,
    },

    #[error("run cancelled after {reached:?}")]
    Cancelled {
        reached: RunState,
        outcome: Box<RunOutcome>,
    },

    #[error("cannot prove artifact {key} exists in the sink; refusing to delete unarchived rows")]
    UnverifiedArtifact { key: String },

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

impl LifecycleError {
    /// Partial outcome of a run that failed mid-execution, if any.
    pub fn outcome(&self) -> Option<&RunOutcome> {
        match self {
            LifecycleError::Phase { outcome, .. } | LifecycleError::Cancelled { outcome, .. } => {
                Some(outcome)
            }
            _ => None,
        }
    }
}
