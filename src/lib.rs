//! coldstream: an export-and-purge lifecycle engine.
//!
//! Moves high-velocity records out of an online analytical store into
//! durable object storage, then removes them from the hot store, keeping
//! it small and query-fast. Every run walks a fixed sequence: mark the
//! unexported rows (freezing the batch), export the marked rows to the
//! sink, delete exactly the exported rows. A dry-run gate is on by
//! default and substitutes every mutation with a read-only count probe.

pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod script;
pub mod sink;
pub mod store;

#[cfg(test)]
mod tests;

pub use config::EngineConfig;
pub use lifecycle::{
    Disposition, LifecycleError, LifecycleExecutor, RunHistory, RunOutcome, RunParams, RunState,
};
