//! High-level pipeline: inventory -> normalise -> slice -> pack -> submit.
//!
//! Walks the part inventory, drives conversion and slicing for each part
//! exactly once, accumulates a [`SliceRecord`] per part, packs instances
//! into job batches and hands them to the upload scheduler. Per-part
//! failures (conversion, slicing, unbatchable) never abort the run; they
//! reduce the worklist and are surfaced in the [`RunReport`]. Only an
//! inventory failure, exhausted upload retries or cancellation abort.
//!
//! Packing is a strict barrier: every part has either a record or a
//! recorded failure before the packer runs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::batch::{self, PlacedInstance};
use crate::config::RunConfig;
use crate::contract::{MeshConverter, PrintQueue, Slicer};
use crate::convert;
use crate::inventory::{self, Bom, FileSource, InventoryError, ReconcileWarning};
use crate::schedule::{self, ScheduleError};
use crate::slice::{self, SliceRecord};
use tokio::sync::watch;

/// Why a part dropped out of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReason {
    Conversion,
    Slice,
    Unbatchable,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Conversion => write!(f, "conversion"),
            FailureReason::Slice => write!(f, "slice"),
            FailureReason::Unbatchable => write!(f, "unbatchable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartFailure {
    pub part: String,
    pub reason: FailureReason,
    pub message: String,
}

/// One submitted batch, for the final report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub label: String,
    pub job_id: i64,
    pub members: Vec<PlacedInstance>,
    pub duration_s: u64,
    pub cost: f64,
}

/// Output of one run, for the CLI/reporting layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub batches: Vec<BatchReport>,
    pub failures: Vec<PartFailure>,
    pub warnings: Vec<ReconcileWarning>,
    pub total_duration_s: u64,
    pub total_cost: f64,
}

#[derive(Debug)]
pub enum PipelineError {
    Inventory(InventoryError),
    Schedule(ScheduleError),
    Cancelled,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Inventory(e) => write!(f, "inventory failed: {e}"),
            PipelineError::Schedule(e) => write!(f, "upload scheduling failed: {e}"),
            PipelineError::Cancelled => write!(f, "run cancelled"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Inventory(e) => Some(e),
            PipelineError::Schedule(e) => Some(e),
            PipelineError::Cancelled => None,
        }
    }
}

impl From<InventoryError> for PipelineError {
    fn from(e: InventoryError) -> Self {
        PipelineError::Inventory(e)
    }
}

/// Run the full slice-and-queue pipeline for one BOM and file source.
pub async fn run<C, S, Q>(
    config: &RunConfig,
    bom: &Bom,
    source: &FileSource,
    converter: &C,
    slicer: &S,
    queue: &Q,
    cancel: &mut watch::Receiver<bool>,
) -> Result<RunReport, PipelineError>
where
    C: MeshConverter + ?Sized,
    S: Slicer + ?Sized,
    Q: PrintQueue + ?Sized,
{
    let run_id = Uuid::new_v4();
    info!(project = %config.project_name, run_id = %run_id, "Starting slice pipeline");

    let inventory = inventory::walk_source(source, converter, bom).await?;

    let mut failures: Vec<PartFailure> = Vec::new();
    let mut records: BTreeMap<String, SliceRecord> = BTreeMap::new();
    let mut parts = inventory.parts.clone();

    for part in &mut parts {
        if let Err(e) = convert::normalise_part(converter, &config.work_dir, part).await {
            error!(part = %part.name, error = %e, "Conversion failed, skipping part");
            failures.push(PartFailure {
                part: part.name.clone(),
                reason: FailureReason::Conversion,
                message: e.to_string(),
            });
            continue;
        }
        match slice::slice_part(slicer, &config.tools, &config.material, &config.work_dir, part)
            .await
        {
            Ok(record) => {
                records.insert(part.name.clone(), record);
            }
            Err(e) => {
                error!(part = %part.name, error = %e, "Slicing failed, skipping part");
                failures.push(PartFailure {
                    part: part.name.clone(),
                    reason: FailureReason::Slice,
                    message: e.to_string(),
                });
            }
        }
    }

    // Barrier: every part now has a record or a recorded failure.
    let items = parts
        .iter()
        .filter_map(|part| records.get(&part.name).map(|record| (part, record)))
        .collect::<Vec<_>>();
    let packed = batch::pack(items, &config.printer, config.plate_time);
    for unbatchable in &packed.unbatchable {
        failures.push(PartFailure {
            part: unbatchable.part.clone(),
            reason: FailureReason::Unbatchable,
            message: unbatchable.reason.clone(),
        });
    }

    let gcode_by_part: BTreeMap<String, PathBuf> = records
        .iter()
        .map(|(name, record)| (name.clone(), record.gcode_path.clone()))
        .collect();
    let submitted = schedule::submit_batches(
        queue,
        &config.project_name,
        &run_id.to_string(),
        &packed.batches,
        &gcode_by_part,
        &config.retry,
        config.fresh_queue,
        cancel,
    )
    .await
    .map_err(|e| match e {
        ScheduleError::Cancelled => PipelineError::Cancelled,
        other => PipelineError::Schedule(other),
    })?;

    let batches = packed
        .batches
        .iter()
        .zip(&submitted)
        .map(|(batch, job)| BatchReport {
            label: job.label.clone(),
            job_id: job.job_id,
            members: batch.members.clone(),
            duration_s: batch.duration_s,
            cost: batch.cost,
        })
        .collect::<Vec<_>>();
    let total_duration_s = batches.iter().map(|b| b.duration_s).sum();
    let total_cost = batches.iter().map(|b| b.cost).sum();

    let report = RunReport {
        batches,
        failures,
        warnings: inventory.warnings.clone(),
        total_duration_s,
        total_cost,
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => debug!(json = %json, "Run report"),
        Err(e) => error!(error = ?e, "Failed to serialize run report"),
    }
    info!(
        batches = report.batches.len(),
        skipped = report.failures.len(),
        total_duration_s = report.total_duration_s,
        "Pipeline complete"
    );
    Ok(report)
}
