//! End-to-end lifecycle tests against the in-memory store and sink.
//!
//! These drive the shipped lifecycle script through the full engine:
//! template substitution, planning, the dry-run gate, phase execution,
//! retries, artifact verification, and resume.

use std::sync::Arc;

use crate::{
    config::EngineConfig,
    lifecycle::{Disposition, LifecycleError, LifecycleExecutor, RunParams, RunState},
    script::{ParseError, StatementRole},
    sink::MemorySink,
    store::{AnalyticalStore, FailOn, MemoryStore, StoreError},
};

const SCRIPT: &str = include_str!("../../scripts/flow-export.sql");

fn test_config() -> EngineConfig {
    EngineConfig::from_str(
        r#"
        [store]
        database = "telemetry"
        table = "flow_records"

        [sink]
        endpoint = "https://s3.example.net"
        bucket = "flow-archive"
        prefix = "flows"
        access_key_id = "AKID"
        secret_access_key = "SECRET"

        [lifecycle]
        expected_statements = 4

        [lifecycle.retry]
        max_retries = 2
        initial_delay_ms = 1
        max_delay_ms = 2
        jitter = 0.0
        "#,
    )
    .unwrap()
}

fn executor(store: &Arc<MemoryStore>) -> LifecycleExecutor {
    LifecycleExecutor::new(Arc::clone(store) as Arc<dyn AnalyticalStore>, test_config())
}

fn params() -> RunParams {
    RunParams::new(SCRIPT).expecting(4)
}

#[tokio::test]
async fn dry_run_reports_counts_and_mutates_nothing() {
    let store = Arc::new(MemoryStore::with_rows(1_000_000));
    let outcome = executor(&store).run(params()).await.unwrap();

    assert!(outcome.dry_run);
    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.rows_marked, 1_000_000);
    assert_eq!(outcome.rows_exported, 1_000_000);
    assert_eq!(outcome.rows_deleted, 1_000_000);
    assert_eq!(outcome.rows_already_marked, 0);
    assert_eq!(outcome.rows_total, Some(1_000_000));
    assert_eq!(outcome.disposition(), Disposition::DryRun);

    // The store is untouched: same rows, same marker states, no artifact.
    assert_eq!(store.unmarked(), 1_000_000);
    assert_eq!(store.marked(), 0);
    assert!(store.exports().is_empty());
    assert!(outcome.artifact.is_none());
}

#[tokio::test]
async fn live_run_archives_and_purges_the_batch() {
    let store = Arc::new(MemoryStore::with_rows(1_000_000));
    let sink = Arc::new(MemorySink::accepting_all());
    let exec = executor(&store).with_sink(sink);

    let outcome = exec.run(params().live()).await.unwrap();

    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.rows_marked, 1_000_000);
    assert_eq!(outcome.rows_exported, 1_000_000);
    assert_eq!(outcome.rows_deleted, 1_000_000);
    assert_eq!(outcome.disposition(), Disposition::SafelyArchived);
    assert!(outcome.artifact.as_deref().unwrap().starts_with("flows_"));

    assert_eq!(store.total(), 0);
    assert_eq!(store.exports(), vec![1_000_000]);
}

#[tokio::test]
async fn live_run_on_empty_store_completes_with_all_zero() {
    let store = Arc::new(MemoryStore::with_rows(0));
    let outcome = executor(&store).run(params().live()).await.unwrap();

    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.rows_marked, 0);
    assert_eq!(outcome.rows_exported, 0);
    assert_eq!(outcome.rows_deleted, 0);
    assert_eq!(outcome.disposition(), Disposition::NothingToDo);
    assert!(outcome.artifact.is_none());
    assert!(store.exports().is_empty());
}

#[tokio::test]
async fn rows_inserted_after_mark_stay_out_of_the_run() {
    let store = Arc::new(MemoryStore::with_rows(100));
    store.insert_during_mark(7);

    let outcome = executor(&store).run(params().live()).await.unwrap();

    assert_eq!(outcome.rows_marked, 100);
    assert_eq!(outcome.rows_deleted, 100);
    // The concurrently inserted rows survive, unmarked, for the next run.
    assert_eq!(store.unmarked(), 7);
    assert_eq!(store.marked(), 0);
    assert_eq!(store.exports(), vec![100]);
}

#[tokio::test]
async fn export_transient_failure_is_retried_to_success() {
    let store = Arc::new(MemoryStore::with_rows(50));
    store.fail_next(FailOn::Export, StoreError::Connection("reset".into()));

    let outcome = executor(&store).run(params().live()).await.unwrap();

    assert_eq!(outcome.rows_deleted, 50);
    assert_eq!(store.total(), 0);
    assert_eq!(store.exports(), vec![50]);
}

#[tokio::test]
async fn export_retry_exhaustion_leaves_the_batch_intact() {
    let store = Arc::new(MemoryStore::with_rows(50));
    // max_retries = 2 gives three attempts; queue four failures.
    for _ in 0..4 {
        store.fail_next(FailOn::Export, StoreError::Connection("down".into()));
    }

    let err = executor(&store).run(params().live()).await.unwrap_err();
    match err {
        LifecycleError::Phase {
            phase, outcome, ..
        } => {
            assert_eq!(phase, StatementRole::Export);
            assert_eq!(outcome.state, RunState::Aborted);
            assert_eq!(outcome.disposition(), Disposition::AbortedBeforeExport);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Nothing archived, nothing deleted: the marked batch is still there.
    assert_eq!(store.marked(), 50);
    assert!(store.exports().is_empty());
}

#[tokio::test]
async fn mark_failure_aborts_without_issuing_later_phases() {
    let store = Arc::new(MemoryStore::with_rows(50));
    store.fail_next(FailOn::Mark, StoreError::Connection("reset".into()));

    let err = executor(&store).run(params().live()).await.unwrap_err();
    match err {
        LifecycleError::Phase { phase, .. } => assert_eq!(phase, StatementRole::Mark),
        other => panic!("unexpected error: {other}"),
    }

    // Mark is not retried: the single queued failure was the only attempt.
    assert_eq!(store.unmarked(), 50);
    assert_eq!(store.marked(), 0);
    assert!(store.exports().is_empty());
}

#[tokio::test]
async fn delete_failure_is_reported_as_exported_not_deleted() {
    let store = Arc::new(MemoryStore::with_rows(50));
    let sink = Arc::new(MemorySink::accepting_all());
    store.fail_next(
        FailOn::Delete,
        StoreError::Statement("Syntax error".into()),
    );

    let err = executor(&store)
        .with_sink(sink)
        .run(params().live())
        .await
        .unwrap_err();

    match err {
        LifecycleError::Phase {
            phase, outcome, ..
        } => {
            assert_eq!(phase, StatementRole::Delete);
            assert_eq!(outcome.disposition(), Disposition::ExportedNotDeleted);
            assert_eq!(outcome.rows_exported, 50);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The archive exists and the hot rows are still marked, so a delete can
    // safely be resumed without re-exporting.
    assert_eq!(store.marked(), 50);
    assert_eq!(store.exports(), vec![50]);
}

#[tokio::test]
async fn leftover_markers_block_a_new_live_run() {
    let store = Arc::new(MemoryStore::with_marked_rows(10, 5));

    let err = executor(&store).run(params().live()).await.unwrap_err();
    match err {
        LifecycleError::MarkerResidue { marked, .. } => assert_eq!(marked, 5),
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(store.unmarked(), 10);
    assert_eq!(store.marked(), 5);
    assert!(store.exports().is_empty());
}

#[tokio::test]
async fn dry_run_reports_leftover_markers_instead_of_failing() {
    let store = Arc::new(MemoryStore::with_marked_rows(10, 5));

    let outcome = executor(&store).run(params()).await.unwrap();
    assert_eq!(outcome.rows_already_marked, 5);
    assert_eq!(outcome.rows_marked, 10);
    assert_eq!(outcome.rows_total, Some(15));
}

#[tokio::test]
async fn resume_delete_refuses_without_artifact_proof() {
    let store = Arc::new(MemoryStore::with_marked_rows(0, 50));

    // No sink attached: export success cannot be proven.
    let err = executor(&store)
        .resume_delete(params().live())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::UnverifiedArtifact { .. }));
    assert_eq!(store.marked(), 50);

    // A sink without any matching artifact is refused too.
    let empty_sink = Arc::new(MemorySink::new());
    let err = executor(&store)
        .with_sink(empty_sink)
        .resume_delete(params().live())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::UnverifiedArtifact { .. }));
    assert_eq!(store.marked(), 50);
}

#[tokio::test]
async fn resume_delete_purges_the_stalled_batch_without_reexporting() {
    let store = Arc::new(MemoryStore::with_marked_rows(0, 50));
    let sink = Arc::new(MemorySink::new());
    sink.put("flows_20260806_115500.parquet");
    sink.put("flows_20260806_120000.parquet");

    let outcome = executor(&store)
        .with_sink(sink)
        .resume_delete(params().live())
        .await
        .unwrap();

    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.rows_deleted, 50);
    assert_eq!(outcome.disposition(), Disposition::SafelyArchived);
    // Proof is pinned to the most recent artifact.
    assert_eq!(
        outcome.artifact.as_deref(),
        Some("flows_20260806_120000.parquet")
    );

    assert_eq!(store.total(), 0);
    // Crucially, export never ran again.
    assert!(store.exports().is_empty());
}

#[tokio::test]
async fn resume_delete_dry_run_counts_only() {
    let store = Arc::new(MemoryStore::with_marked_rows(0, 50));

    let outcome = executor(&store).resume_delete(params()).await.unwrap();

    assert!(outcome.dry_run);
    assert_eq!(outcome.rows_deleted, 50);
    assert_eq!(store.marked(), 50);
}

#[tokio::test]
async fn resume_delete_with_no_stalled_batch_is_a_no_op() {
    let store = Arc::new(MemoryStore::with_rows(10));

    let outcome = executor(&store).resume_delete(params().live()).await.unwrap();
    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.rows_deleted, 0);
    assert_eq!(store.unmarked(), 10);
}

#[tokio::test]
async fn unverifiable_artifact_blocks_the_delete() {
    let store = Arc::new(MemoryStore::with_rows(50));
    // The sink never sees the artifact the store claims to have written.
    let sink = Arc::new(MemorySink::new());

    let err = executor(&store)
        .with_sink(sink)
        .run(params().live())
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::UnverifiedArtifact { .. }));
    // Export ran, delete did not: rows are safe in the hot store.
    assert_eq!(store.marked(), 50);
    assert_eq!(store.exports(), vec![50]);
}

#[tokio::test]
async fn concurrent_run_is_refused_by_the_lease() {
    let store = Arc::new(MemoryStore::with_rows(10));
    let exec = executor(&store);

    // Simulate a run in flight by holding the table's lease.
    use crate::lifecycle::RunLeases;
    let leases = RunLeases::new();
    let held = RunLeases::try_acquire(&leases, "telemetry.flow_records", uuid::Uuid::new_v4());
    assert!(held.is_some());

    let exec = exec.with_leases(Arc::clone(&leases));
    let err = exec.run(params().live()).await.unwrap_err();
    assert!(matches!(err, LifecycleError::LeaseHeld { .. }));

    drop(held);
    assert!(exec.run(params().live()).await.is_ok());
}

#[tokio::test]
async fn cancellation_stops_at_the_next_phase_boundary() {
    let store = Arc::new(MemoryStore::with_rows(50));
    let exec = executor(&store);

    // Cancel while the mark mutation is applying; the run must finish the
    // mark and stop before export.
    store.cancel_when(FailOn::Mark, exec.cancellation_token());

    let err = exec.run(params().live()).await.unwrap_err();
    match err {
        LifecycleError::Cancelled { reached, .. } => assert_eq!(reached, RunState::Marked),
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(store.marked(), 50);
    assert!(store.exports().is_empty());
}

#[tokio::test]
async fn statement_count_mismatch_refuses_the_run() {
    let store = Arc::new(MemoryStore::with_rows(10));

    let err = executor(&store)
        .run(RunParams::new(SCRIPT).expecting(5))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Parse(ParseError::StatementCountMismatch {
            expected: 5,
            actual: 4
        })
    ));
    assert_eq!(store.unmarked(), 10);
}

#[tokio::test]
async fn preflight_count_failure_executes_nothing() {
    let store = Arc::new(MemoryStore::with_rows(10));
    store.fail_next(FailOn::Count, StoreError::Connection("down".into()));

    let err = executor(&store).run(params().live()).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Preflight(_)));
    assert_eq!(store.unmarked(), 10);
    assert_eq!(store.marked(), 0);
}

#[tokio::test]
async fn million_row_scenario_dry_then_live_then_empty() {
    let store = Arc::new(MemoryStore::with_rows(1_000_000));
    let sink = Arc::new(MemorySink::accepting_all());
    let exec = executor(&store).with_sink(sink);

    // Dry run: would archive everything, nothing changes.
    let dry = exec.run(params()).await.unwrap();
    assert_eq!(dry.rows_marked, 1_000_000);
    assert_eq!(dry.rows_already_marked, 0);
    assert_eq!(store.total(), 1_000_000);

    // Live run: archive and purge.
    let live = exec.run(params().live()).await.unwrap();
    assert_eq!(live.rows_marked, 1_000_000);
    assert_eq!(live.rows_exported, 1_000_000);
    assert_eq!(live.rows_deleted, 1_000_000);
    assert_eq!(store.total(), 0);

    // A further live run on the now-empty store succeeds at zero.
    let empty = exec.run(params().live()).await.unwrap();
    assert_eq!(empty.rows_marked, 0);
    assert_eq!(empty.rows_deleted, 0);
    assert_eq!(empty.disposition(), Disposition::NothingToDo);
}
