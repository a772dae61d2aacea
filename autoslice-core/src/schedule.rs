//! Upload scheduling: keep the print queue fed while batches remain.
//!
//! The first batch is submitted immediately; every later batch waits for
//! the printer to go idle first, so the server's queue is never starved
//! while unsent work exists. Every queue call is wrapped in bounded retry
//! with linear backoff; exhausting the attempt limit is fatal for the run
//! but leaves already-submitted jobs queued on the server.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;

use futures::future::try_join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::batch::JobBatch;
use crate::config::RetryPolicy;
use crate::contract::{JobStatus, NewPrintJob, PrintQueue, PrintSet, SubmittedJob, UploadError};

#[derive(Debug)]
pub enum ScheduleError {
    /// A queue call still failed after the configured number of attempts.
    Retry { attempts: u32, source: UploadError },
    /// The run was cancelled while waiting on the printer.
    Cancelled,
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::Retry { attempts, source } => {
                write!(f, "print-queue call failed after {attempts} attempts: {source}")
            }
            ScheduleError::Cancelled => write!(f, "run cancelled while waiting on the printer"),
        }
    }
}

impl std::error::Error for ScheduleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScheduleError::Retry { source, .. } => Some(source),
            ScheduleError::Cancelled => None,
        }
    }
}

/// Submit all batches to the print queue in order.
///
/// Uploads each part's Gcode exactly once, then submits batch 1 right away
/// and every following batch as soon as the printer reports idle.
/// Cancellation aborts a pending idle wait without touching jobs already
/// submitted.
#[allow(clippy::too_many_arguments)]
pub async fn submit_batches<Q>(
    queue: &Q,
    project: &str,
    run_id: &str,
    batches: &[JobBatch],
    gcode_by_part: &BTreeMap<String, PathBuf>,
    retry: &RetryPolicy,
    fresh_queue: bool,
    cancel: &mut watch::Receiver<bool>,
) -> Result<Vec<SubmittedJob>, ScheduleError>
where
    Q: PrintQueue + ?Sized,
{
    if batches.is_empty() {
        info!("No batches to submit");
        return Ok(Vec::new());
    }

    with_retries(retry, "create project folder", || {
        queue.ensure_folder(project)
    })
    .await?;

    if fresh_queue {
        info!(project, "Purging previously queued jobs for project");
        with_retries(retry, "purge queued jobs", || {
            purge_project_jobs(queue, project)
        })
        .await?;
    }

    // Each part prints from one uploaded file, however many batches it is in.
    let mut upload_order: Vec<&str> = Vec::new();
    for batch in batches {
        for member in &batch.members {
            if !upload_order.contains(&member.part.as_str()) {
                upload_order.push(&member.part);
            }
        }
    }

    let mut remote_by_part: BTreeMap<String, String> = BTreeMap::new();
    for part in upload_order {
        let Some(local) = gcode_by_part.get(part) else {
            error!(part, "no Gcode recorded for batched part, skipping upload");
            continue;
        };
        let remote = with_retries(retry, "upload gcode", || {
            queue.upload_gcode(local, project)
        })
        .await?;
        info!(part, remote = %remote, "Uploaded Gcode");
        remote_by_part.insert(part.to_owned(), remote);
    }

    let mut submitted: Vec<SubmittedJob> = Vec::with_capacity(batches.len());
    for (idx, batch) in batches.iter().enumerate() {
        if idx > 0 {
            wait_until_idle(queue, retry, cancel).await?;
            if let Some(previous) = submitted.last() {
                let status =
                    with_retries(retry, "fetch job status", || queue.job_status(previous.job_id))
                        .await?;
                if status == JobStatus::Failed {
                    warn!(job_id = previous.job_id, "previous job reported failed, continuing");
                } else {
                    debug!(job_id = previous.job_id, ?status, "Previous job status");
                }
            }
        }

        let label = format!("{project} batch {} {run_id}", idx + 1);
        let mut counts: Vec<(String, u32)> = Vec::new();
        for member in &batch.members {
            match counts.iter_mut().find(|(part, _)| part == &member.part) {
                Some((_, count)) => *count += 1,
                None => counts.push((member.part.clone(), 1)),
            }
        }
        let sets = counts
            .into_iter()
            .filter_map(|(part, count)| {
                remote_by_part.get(&part).map(|remote_path| PrintSet {
                    remote_path: remote_path.clone(),
                    count,
                })
            })
            .collect::<Vec<_>>();

        let job = NewPrintJob {
            label: label.clone(),
            sets,
        };
        let ack = with_retries(retry, "submit job", || queue.submit_job(job.clone())).await?;
        info!(job_id = ack.job_id, label = %ack.label, "Submitted job batch");

        if idx == 0 {
            // Hand queue management to the server once work exists.
            with_retries(retry, "activate queue", || queue.set_active(true)).await?;
        }
        submitted.push(ack);
    }

    info!(jobs = submitted.len(), "All batches submitted");
    Ok(submitted)
}

/// Delete every queued job whose label belongs to this project.
pub async fn purge_project_jobs<Q>(queue: &Q, project: &str) -> Result<(), UploadError>
where
    Q: PrintQueue + ?Sized,
{
    let jobs = queue.list_jobs().await?;
    let stale = jobs
        .into_iter()
        .filter(|job| job.label.starts_with(project))
        .collect::<Vec<_>>();
    debug!(count = stale.len(), project, "Deleting stale project jobs");
    let deletions = stale.iter().map(|job| queue.delete_job(job.job_id));
    try_join_all(deletions).await?;
    Ok(())
}

async fn wait_until_idle<Q>(
    queue: &Q,
    retry: &RetryPolicy,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), ScheduleError>
where
    Q: PrintQueue + ?Sized,
{
    if *cancel.borrow() {
        info!("Cancellation requested, aborting idle wait");
        return Err(ScheduleError::Cancelled);
    }
    loop {
        let busy =
            with_retries(retry, "poll printer state", || queue.is_printer_busy()).await?;
        if !busy {
            debug!("Printer idle, next batch may be submitted");
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(retry.poll()) => {}
            changed = cancel.changed() => {
                match changed {
                    Ok(()) if *cancel.borrow() => {
                        info!("Cancellation requested, aborting idle wait");
                        return Err(ScheduleError::Cancelled);
                    }
                    Ok(()) => {}
                    // Sender gone: nobody can cancel any more, keep polling.
                    Err(_) => tokio::time::sleep(retry.poll()).await,
                }
            }
        }
    }
}

async fn with_retries<T, F, Fut>(
    retry: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, ScheduleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UploadError>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= retry.max_attempts => {
                error!(what, attempt, error = %e, "print-queue call exhausted retries");
                return Err(ScheduleError::Retry {
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) => {
                warn!(what, attempt, error = %e, "print-queue call failed, backing off");
                tokio::time::sleep(retry.backoff() * attempt).await;
                attempt += 1;
            }
        }
    }
}
