//! Run-level mutual exclusion.
//!
//! Two concurrent runs against the same hot table would race each other's
//! mark and delete mutations, so a run must hold the table's lease for its
//! whole duration. The registry is in-process; cross-process exclusion is
//! the scheduler's responsibility, backed by the marker-residue preflight
//! check failing fast when that guarantee is violated.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

/// Registry of per-table run leases.
///
/// Lease scope is the fully qualified table name: two scripts targeting the
/// same table contend on the same marker column, while one engine process
/// archiving two tables runs two independent lifecycles.
#[derive(Debug, Default)]
pub struct RunLeases {
    active: DashMap<String, Uuid>,
}

impl RunLeases {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire the lease for `table`, or return `None` if another run
    /// already holds it.
    pub fn try_acquire(registry: &Arc<Self>, table: &str, run_id: Uuid) -> Option<RunLease> {
        match registry.active.entry(table.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(run_id);
                Some(RunLease {
                    table: table.to_string(),
                    registry: Arc::clone(registry),
                })
            }
        }
    }

    /// Run currently holding the lease for `table`, if any.
    pub fn holder(&self, table: &str) -> Option<Uuid> {
        self.active.get(table).map(|entry| *entry.value())
    }
}

/// RAII lease guard; dropping it releases the table.
pub struct RunLease {
    table: String,
    registry: Arc<RunLeases>,
}

impl Drop for RunLease {
    fn drop(&mut self) {
        self.registry.active.remove(&self.table);
    }
}
