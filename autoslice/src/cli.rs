/// This module implements the full CLI interface for autoslice—handling
/// command parsing, argument validation, main entrypoints, and user-visible
/// invocations.
///
/// All core business logic (data models, pipeline, packing) lives in the
/// [`autoslice-core`] crate. This module is strictly for CLI glue, ergonomic
/// argument exposure, and orchestration.
///
/// ## Features
/// - Entry struct [`Cli`] defines all user-facing options and subcommands.
/// - Subcommand routing (e.g., `process`) and argument validation.
/// - Async entrypoint (`run`) for programmatic invocation and integration
///   testing.
/// - Ctrl-C wiring: an interrupt cancels any pending wait on the printer
///   without touching jobs already queued on the server.
///
/// ## How To Use
/// - For command-line users: use the installed `autoslice` binary with
///   `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed
///   [`Cli`].
///
/// ## Extending
/// When adding features or subcommands, update [`Commands`] below and keep
/// all non-trivial business logic inside `autoslice-core`.
use crate::load_config::{load_bom, load_run_config};
use crate::queue::OctoClient;
use anyhow::Result;
use autoslice_core::convert::CliConverter;
use autoslice_core::inventory::FileSource;
use autoslice_core::pipeline::{self, FailureReason, RunReport};
use autoslice_core::slice::CliSlicer;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::watch;

/// CLI for autoslice: slice CAD parts and keep a print queue continuously fed.
#[derive(Parser)]
#[clap(
    name = "autoslice",
    version,
    about = "Slice STEP/STL part inventories and queue the jobs on a print server"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Slice every part in the source and queue the resulting job batches
    Process {
        /// Path to the YAML run config file
        #[clap(long)]
        config: PathBuf,
        /// Path to a YAML bill of materials (part name -> quantity);
        /// overrides any `bom` section in the config file
        #[clap(long)]
        bom: Option<PathBuf>,
        /// STEP assembly file, or a folder of STL/STEP part files
        #[clap(long)]
        source: PathBuf,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Process {
            config,
            bom,
            source,
        } => {
            let loaded = load_run_config(&config)?;
            loaded.run.trace_loaded();

            let bom = match bom {
                Some(path) => load_bom(&path)?,
                None => loaded.bom()?,
            };
            let source = if source.is_file() {
                FileSource::Assembly(source)
            } else {
                FileSource::Folder(source)
            };

            let converter = CliConverter::new(&loaded.run.tools);
            let slicer = CliSlicer::new(&loaded.run.tools);
            let queue = OctoClient::new_from_env()?;

            let (cancel_tx, mut cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, cancelling run");
                    let _ = cancel_tx.send(true);
                }
            });

            tracing::info!(command = "process", "Starting slice pipeline");
            match pipeline::run(
                &loaded.run,
                &bom,
                &source,
                &converter,
                &slicer,
                &queue,
                &mut cancel_rx,
            )
            .await
            {
                Ok(report) => {
                    print_summary(&report);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "process", error = %e, "Pipeline failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}

/// Human-readable run summary: queued, skipped and unbatchable parts plus
/// totals. Printed even after partial failure.
fn print_summary(report: &RunReport) {
    println!("Run summary");
    println!("===========");
    println!("Queued batches: {}", report.batches.len());
    for batch in &report.batches {
        let members = batch
            .members
            .iter()
            .map(|m| format!("{}#{}", m.part, m.instance))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  [{}] job {} ({}s): {}",
            batch.label, batch.job_id, batch.duration_s, members
        );
    }
    let skipped = report
        .failures
        .iter()
        .filter(|f| f.reason != FailureReason::Unbatchable)
        .collect::<Vec<_>>();
    let unbatchable = report
        .failures
        .iter()
        .filter(|f| f.reason == FailureReason::Unbatchable)
        .collect::<Vec<_>>();
    println!("Skipped (failed): {}", skipped.len());
    for failure in skipped {
        println!("  {} [{}]: {}", failure.part, failure.reason, failure.message);
    }
    println!("Unbatchable: {}", unbatchable.len());
    for failure in unbatchable {
        println!("  {}: {}", failure.part, failure.message);
    }
    for warning in &report.warnings {
        println!("Warning: {warning}");
    }
    println!(
        "Estimated total print time: {}s, material cost: {:.2}",
        report.total_duration_s, report.total_cost
    );
}
