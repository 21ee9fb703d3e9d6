use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use coldstream::{
    EngineConfig, LifecycleExecutor, RunOutcome, RunParams,
    observability::{self, metrics},
    store::ClickHouseHttpStore,
};

/// Export-and-purge lifecycle engine for analytical hot stores.
#[derive(Debug, Parser)]
#[command(name = "coldstream", version, about)]
struct Cli {
    /// Path to the engine configuration file.
    #[arg(long, short, default_value = "coldstream.toml")]
    config: PathBuf,

    /// Lifecycle script to run (overrides lifecycle.script_path).
    #[arg(long)]
    script: Option<PathBuf>,

    /// Disable the dry-run gate and actually export and delete.
    ///
    /// Dry-run is the default everywhere; this flag is the explicit,
    /// auditable decision to mutate.
    #[arg(long)]
    live: bool,

    /// Assert the script parses to exactly this many statements
    /// (overrides lifecycle.expected_statements).
    #[arg(long)]
    expect_statements: Option<usize>,

    /// Re-run only the delete of a stalled batch whose export already
    /// succeeded. Combine with --live to actually delete.
    #[arg(long)]
    resume_delete: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            eprintln!("coldstream: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = EngineConfig::from_file(&cli.config)?;
    observability::init_tracing(&config.observability.logging)?;
    metrics::init_metrics(&config.observability.metrics)?;

    let script_path = cli
        .script
        .as_ref()
        .unwrap_or(&config.lifecycle.script_path);
    let script = std::fs::read_to_string(script_path)
        .map_err(|e| format!("failed to read script {}: {e}", script_path.display()))?;

    let dry_run = if cli.live {
        false
    } else {
        config.lifecycle.dry_run
    };
    if dry_run {
        tracing::info!("dry-run mode: counting only, nothing will be exported or deleted");
    } else {
        tracing::warn!("live mode: rows will be exported and deleted");
    }

    let mut params = RunParams::new(script);
    params.dry_run = dry_run;
    params.expected_statements = cli
        .expect_statements
        .or(config.lifecycle.expected_statements);

    let store = Arc::new(ClickHouseHttpStore::new(&config.store)?);
    let executor = LifecycleExecutor::new(store, config.clone());

    #[cfg(feature = "s3-verify")]
    let executor =
        executor.with_sink(Arc::new(coldstream::sink::S3Sink::new(&config.sink).await?));

    // Cancel at the next phase boundary on ctrl-c; in-flight mutations are
    // always awaited.
    let cancel = executor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping at the next phase boundary");
            cancel.cancel();
        }
    });

    let result = if cli.resume_delete {
        executor.resume_delete(params).await
    } else {
        executor.run(params).await
    };

    match result {
        Ok(outcome) => {
            print_outcome(&outcome)?;
            Ok(())
        }
        Err(err) => {
            // A failed run still reports the counts it reached.
            if let Some(outcome) = err.outcome() {
                print_outcome(outcome)?;
            }
            Err(err.into())
        }
    }
}

fn print_outcome(outcome: &RunOutcome) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(())
}
