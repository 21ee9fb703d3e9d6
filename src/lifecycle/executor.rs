//! The lifecycle executor: mark, export, delete, strictly in that order.
//!
//! A run is sequential by design. Every mutation is driven to confirmed
//! completion before the next phase is considered, because the correctness
//! of the whole lifecycle rests on the batch being frozen at mark time and
//! on nothing being deleted that has not been archived. Cancellation is
//! honored between phases only; a mutation already sent is always awaited.

use std::{sync::Arc, time::Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    error::LifecycleError,
    lease::RunLeases,
    report::{RunOutcome, RunState},
    retry::RetryController,
};
use crate::{
    config::EngineConfig,
    observability::metrics,
    script::{ExecutionPlan, StatementPlan, StatementRole, StepKind, TemplateVars},
    sink::{ArtifactKey, ArtifactNamer, ObjectSink},
    store::{AnalyticalStore, StoreError, StoreResult},
};

/// Parameters for one run invocation.
#[derive(Debug, Clone)]
pub struct RunParams {
    /// Raw lifecycle script text (template variables not yet substituted).
    pub script: String,
    /// Dry-run gate. Defaults to true; going live is an explicit decision.
    pub dry_run: bool,
    /// Expected statement count, asserted after parsing.
    pub expected_statements: Option<usize>,
}

impl RunParams {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            dry_run: true,
            expected_statements: None,
        }
    }

    /// Disable the dry-run gate for this invocation.
    pub fn live(mut self) -> Self {
        self.dry_run = false;
        self
    }

    pub fn expecting(mut self, statements: usize) -> Self {
        self.expected_statements = Some(statements);
        self
    }
}

pub struct LifecycleExecutor {
    store: Arc<dyn AnalyticalStore>,
    sink: Option<Arc<dyn ObjectSink>>,
    retry: RetryController,
    namer: ArtifactNamer,
    leases: Arc<RunLeases>,
    cancel: CancellationToken,
    config: EngineConfig,
}

impl LifecycleExecutor {
    pub fn new(store: Arc<dyn AnalyticalStore>, config: EngineConfig) -> Self {
        let retry = RetryController::new(config.lifecycle.retry.clone());
        let namer = ArtifactNamer::new(
            &config.sink.prefix,
            &config.sink.extension,
            config.sink.append_run_id,
        );
        Self {
            store,
            sink: None,
            retry,
            namer,
            leases: RunLeases::new(),
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Attach an object sink for artifact verification.
    pub fn with_sink(mut self, sink: Arc<dyn ObjectSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share a lease registry with other executors in this process.
    pub fn with_leases(mut self, leases: Arc<RunLeases>) -> Self {
        self.leases = leases;
        self
    }

    /// Token cancelling this executor's runs at the next phase boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute a full lifecycle run.
    pub async fn run(&self, params: RunParams) -> Result<RunOutcome, LifecycleError> {
        let run_id = Uuid::new_v4();
        let table = self.config.store.qualified_table();
        let _lease = RunLeases::try_acquire(&self.leases, &table, run_id).ok_or_else(|| {
            LifecycleError::LeaseHeld {
                table: table.clone(),
            }
        })?;

        let mut outcome = RunOutcome::begin(run_id, params.dry_run);

        let artifact = self.namer.next(Utc::now(), run_id);
        let text = self.template_vars(&artifact).apply(&params.script)?;
        let plan = StatementPlan::parse(&text)?;
        if let Some(expected) = params.expected_statements {
            plan.expect_len(expected)?;
        }
        let exec = ExecutionPlan::build(&plan, params.dry_run)?;

        info!(
            run_id = %run_id,
            table = %table,
            dry_run = params.dry_run,
            statements = plan.len(),
            "starting lifecycle run"
        );

        // Preflight: measure the table before touching anything.
        let already_marked = self
            .count_marker(true)
            .await
            .map_err(LifecycleError::Preflight)?;
        let total = self
            .count_total()
            .await
            .map_err(LifecycleError::Preflight)?;
        outcome.rows_already_marked = already_marked;
        outcome.rows_total = Some(total);

        // Marked rows at run start mean a prior run stalled between export
        // and delete. They would not be re-selected by this run's mark, so
        // starting anyway would strand them forever. Operator resolution
        // required; never auto-resolved.
        if !params.dry_run && already_marked > 0 {
            warn!(
                table = %table,
                marked = already_marked,
                "refusing to start over leftover export markers"
            );
            return Err(LifecycleError::MarkerResidue {
                table,
                marked: already_marked,
            });
        }

        if params.dry_run {
            self.dry_run(&exec, outcome).await
        } else {
            self.live_run(&exec, artifact, outcome).await
        }
    }

    /// Re-run the delete of a stalled batch, without re-exporting.
    ///
    /// Only legal when the prior run's export is provable: the sink must be
    /// attached and hold at least one artifact under the configured prefix.
    /// In dry-run mode (the default) this reports what would be deleted.
    pub async fn resume_delete(&self, params: RunParams) -> Result<RunOutcome, LifecycleError> {
        let run_id = Uuid::new_v4();
        let table = self.config.store.qualified_table();
        let _lease = RunLeases::try_acquire(&self.leases, &table, run_id).ok_or_else(|| {
            LifecycleError::LeaseHeld {
                table: table.clone(),
            }
        })?;

        let mut outcome = RunOutcome::begin(run_id, params.dry_run);

        let marked = self
            .count_marker(true)
            .await
            .map_err(LifecycleError::Preflight)?;
        outcome.rows_already_marked = marked;

        if marked == 0 {
            info!(table = %table, "no stalled batch to resume");
            outcome.finalize(RunState::Completed);
            return Ok(outcome);
        }

        if !params.dry_run {
            outcome.artifact = Some(self.verify_stalled_artifact().await?);
        }

        info!(
            run_id = %run_id,
            table = %table,
            marked,
            dry_run = params.dry_run,
            "resuming delete of stalled batch"
        );

        let text = self
            .template_vars(&self.namer.next(Utc::now(), run_id))
            .apply(&params.script)?;
        let plan = StatementPlan::parse(&text)?;
        let exec = ExecutionPlan::build(&plan, params.dry_run)?;

        if params.dry_run {
            for step in exec.steps_for(StatementRole::Delete) {
                let would_delete = self
                    .store
                    .query_count(&step.sql)
                    .await
                    .map_err(LifecycleError::Probe)?;
                outcome.rows_deleted = would_delete;
            }
            outcome.finalize(RunState::Completed);
            return Ok(outcome);
        }

        outcome.state = RunState::Deleting;
        self.delete_phase(&exec, marked, &mut outcome).await?;
        outcome.finalize(RunState::Completed);
        info!(
            run_id = %run_id,
            rows_deleted = outcome.rows_deleted,
            "stalled batch deleted"
        );
        metrics::record_run(&outcome);
        Ok(outcome)
    }

    async fn dry_run(
        &self,
        exec: &ExecutionPlan,
        mut outcome: RunOutcome,
    ) -> Result<RunOutcome, LifecycleError> {
        let mut mark_probe = 0u64;
        let mut export_probe = 0u64;
        let mut delete_probe = 0u64;

        for step in exec.steps() {
            match step.kind {
                StepKind::Query => {
                    let body = self
                        .store
                        .query_raw(&step.sql)
                        .await
                        .map_err(LifecycleError::Probe)?;
                    info!(result = %body.trim(), sql = %step.sql, "informational query");
                }
                StepKind::CountProbe => {
                    let count = self
                        .store
                        .query_count(&step.sql)
                        .await
                        .map_err(LifecycleError::Probe)?;
                    info!(role = %step.role, rows = count, "count probe");
                    match step.role {
                        StatementRole::Mark => mark_probe = count,
                        StatementRole::Export => export_probe = count,
                        StatementRole::Delete => delete_probe = count,
                        StatementRole::Query => {}
                    }
                }
                // The gate never emits mutations in a dry-run plan.
                StepKind::Mutation => {
                    unreachable!("mutation step in dry-run plan")
                }
            }
        }

        outcome.rows_marked = mark_probe;
        outcome.rows_exported = mark_probe + export_probe;
        outcome.rows_deleted = mark_probe + delete_probe;
        outcome.finalize(RunState::Completed);

        info!(
            would_mark = outcome.rows_marked,
            would_export = outcome.rows_exported,
            would_delete = outcome.rows_deleted,
            already_marked = outcome.rows_already_marked,
            "dry run complete, nothing was exported or deleted"
        );
        metrics::record_run(&outcome);
        Ok(outcome)
    }

    async fn live_run(
        &self,
        exec: &ExecutionPlan,
        artifact: ArtifactKey,
        mut outcome: RunOutcome,
    ) -> Result<RunOutcome, LifecycleError> {
        // Informational queries run first, read-only, exactly as scripted.
        for step in exec.steps_for(StatementRole::Query) {
            let body = self
                .store
                .query_raw(&step.sql)
                .await
                .map_err(LifecycleError::Probe)?;
            info!(result = %body.trim(), sql = %step.sql, "informational query");
        }

        // Mark: freeze the batch. Not retried; a failed mark aborts the run
        // and a fresh run re-selects the same unmarked rows.
        outcome.state = RunState::Marking;
        let phase_started = Instant::now();
        self.mutate_all(exec, StatementRole::Mark, false, &mut outcome)
            .await?;
        let marked = self.checked_count(StatementRole::Mark, &mut outcome).await?;
        outcome.rows_marked = marked;
        outcome.state = RunState::Marked;
        info!(rows = marked, "mark complete, batch frozen");
        metrics::record_phase("mark", marked, phase_started.elapsed());

        if marked == 0 {
            outcome.finalize(RunState::Completed);
            info!("no rows awaiting export, nothing to do");
            metrics::record_run(&outcome);
            return Ok(outcome);
        }

        self.checkpoint(RunState::Marked, &mut outcome)?;

        // Export: archive the frozen batch. Safe to retry; re-running an
        // export over the same predicate reproduces rather than loses data.
        outcome.state = RunState::Exporting;
        let phase_started = Instant::now();
        self.mutate_all(exec, StatementRole::Export, false, &mut outcome)
            .await?;
        let still_marked = self
            .checked_count(StatementRole::Export, &mut outcome)
            .await?;
        if still_marked != marked {
            warn!(
                expected = marked,
                found = still_marked,
                "marked row count changed during export"
            );
        }
        outcome.rows_exported = still_marked;
        outcome.artifact = Some(artifact.to_string());
        outcome.state = RunState::Exported;
        info!(rows = still_marked, artifact = %artifact, "export complete");
        metrics::record_phase("export", still_marked, phase_started.elapsed());

        if self.config.sink.verify_artifacts
            && let Some(sink) = &self.sink
        {
            match sink.artifact_exists(artifact.as_str()).await {
                Ok(true) => info!(artifact = %artifact, "artifact verified in sink"),
                Ok(false) => {
                    outcome.abort(format!("artifact {artifact} not found in sink"));
                    return Err(LifecycleError::UnverifiedArtifact {
                        key: artifact.to_string(),
                    });
                }
                Err(cause) => {
                    outcome.abort(&cause);
                    return Err(LifecycleError::Sink(cause));
                }
            }
        }

        self.checkpoint(RunState::Exported, &mut outcome)?;

        // Delete: remove exactly the archived batch.
        outcome.state = RunState::Deleting;
        let phase_started = Instant::now();
        self.delete_phase(exec, marked, &mut outcome).await?;
        metrics::record_phase("delete", outcome.rows_deleted, phase_started.elapsed());

        outcome.finalize(RunState::Completed);
        info!(
            rows_marked = outcome.rows_marked,
            rows_exported = outcome.rows_exported,
            rows_deleted = outcome.rows_deleted,
            "lifecycle run complete"
        );
        metrics::record_run(&outcome);
        Ok(outcome)
    }

    /// Run the delete statements and confirm no marked rows remain.
    ///
    /// Only called with export success already established, either earlier
    /// in the same run or through artifact verification, so retries are
    /// admitted.
    async fn delete_phase(
        &self,
        exec: &ExecutionPlan,
        batch: u64,
        outcome: &mut RunOutcome,
    ) -> Result<(), LifecycleError> {
        self.mutate_all(exec, StatementRole::Delete, true, outcome)
            .await?;

        let remaining = self
            .checked_count(StatementRole::Delete, outcome)
            .await?;
        if remaining > 0 {
            let cause = StoreError::Protocol(format!(
                "delete acknowledged but {remaining} marked rows remain"
            ));
            outcome.abort(&cause);
            return Err(LifecycleError::Phase {
                phase: StatementRole::Delete,
                cause,
                outcome: Box::new(outcome.clone()),
            });
        }

        outcome.rows_deleted = batch;
        Ok(())
    }

    /// Execute every mutation of `role`, aborting the outcome on failure.
    async fn mutate_all(
        &self,
        exec: &ExecutionPlan,
        role: StatementRole,
        export_confirmed: bool,
        outcome: &mut RunOutcome,
    ) -> Result<(), LifecycleError> {
        for step in exec.steps_for(role) {
            debug_assert_eq!(step.kind, StepKind::Mutation);
            let result = self
                .retry
                .execute(role, export_confirmed, || self.store.command(&step.sql))
                .await;
            if let Err(cause) = result {
                outcome.abort(&cause);
                return Err(LifecycleError::Phase {
                    phase: role,
                    cause,
                    outcome: Box::new(outcome.clone()),
                });
            }
        }
        Ok(())
    }

    /// Count marked rows, attributing a failure to the phase being closed.
    async fn checked_count(
        &self,
        phase: StatementRole,
        outcome: &mut RunOutcome,
    ) -> Result<u64, LifecycleError> {
        match self.count_marker(true).await {
            Ok(count) => Ok(count),
            Err(cause) => {
                outcome.abort(&cause);
                Err(LifecycleError::Phase {
                    phase,
                    cause,
                    outcome: Box::new(outcome.clone()),
                })
            }
        }
    }

    /// Cancellation is honored only here, between phases.
    fn checkpoint(
        &self,
        reached: RunState,
        outcome: &mut RunOutcome,
    ) -> Result<(), LifecycleError> {
        if self.cancel.is_cancelled() {
            warn!(reached = ?reached, "run cancelled at phase boundary");
            outcome.abort("cancelled");
            return Err(LifecycleError::Cancelled {
                reached,
                outcome: Box::new(outcome.clone()),
            });
        }
        Ok(())
    }

    /// Prove a stalled batch's artifact exists before resuming its delete.
    async fn verify_stalled_artifact(&self) -> Result<String, LifecycleError> {
        let missing = || LifecycleError::UnverifiedArtifact {
            key: format!("{}_*", self.config.sink.prefix),
        };

        let sink = self.sink.as_ref().ok_or_else(missing)?;
        let mut artifacts = sink.list_artifacts(&self.config.sink.prefix).await?;
        artifacts.sort();

        // Keys embed zero-padded timestamps, so the lexical maximum is the
        // most recent artifact.
        artifacts.pop().ok_or_else(missing)
    }

    fn template_vars(&self, artifact: &ArtifactKey) -> TemplateVars {
        let sink = &self.config.sink;
        TemplateVars {
            s3_endpoint: sink
                .endpoint
                .as_deref()
                .map(TemplateVars::strip_protocol),
            s3_bucket: Some(sink.bucket.clone()),
            s3_access_key: sink.access_key_id.clone(),
            s3_secret_key: sink.secret_access_key.clone(),
            s3_key: Some(artifact.as_str().to_string()),
        }
    }

    async fn count_marker(&self, set: bool) -> StoreResult<u64> {
        let value = if set { 1 } else { 0 };
        let sql = format!(
            "SELECT count() FROM {} WHERE {} = {}",
            self.config.store.qualified_table(),
            self.config.store.marker_column,
            value
        );
        self.store.query_count(&sql).await
    }

    async fn count_total(&self) -> StoreResult<u64> {
        let sql = format!(
            "SELECT count() FROM {}",
            self.config.store.qualified_table()
        );
        self.store.query_count(&sql).await
    }
}
