//! The export-and-purge lifecycle: executor, retry policy, run leases,
//! and run reporting.

mod error;
mod executor;
mod lease;
mod report;
mod retry;

pub use error::LifecycleError;
pub use executor::{LifecycleExecutor, RunParams};
pub use lease::{RunLease, RunLeases};
pub use report::{Disposition, RunHistory, RunOutcome, RunState};
pub use retry::{FailureClass, RetryController, classify};
