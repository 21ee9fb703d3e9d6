//! Consolidated test modules.
//!
//! This module contains end-to-end lifecycle tests driven against the
//! in-memory store and sink.

#[cfg(test)]
mod lifecycle_e2e;
