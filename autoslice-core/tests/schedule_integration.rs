use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use autoslice_core::batch::{JobBatch, PlacedInstance};
use autoslice_core::config::RetryPolicy;
use autoslice_core::contract::{JobStatus, MockPrintQueue, SubmittedJob, UploadError};
use autoslice_core::schedule::{submit_batches, ScheduleError};
use tokio::sync::watch;

fn batch(members: &[(&str, u32)]) -> JobBatch {
    JobBatch {
        members: members
            .iter()
            .map(|(part, instance)| PlacedInstance {
                part: part.to_string(),
                instance: *instance,
            })
            .collect(),
        used_area_mm2: 100.0,
        max_height_mm: 10.0,
        duration_s: 60,
        cost: 1.0,
    }
}

fn gcode_map(parts: &[&str]) -> BTreeMap<String, PathBuf> {
    parts
        .iter()
        .map(|part| (part.to_string(), PathBuf::from(format!("{part}.gcode"))))
        .collect()
}

fn retry_fast(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_secs: 0,
        poll_secs: 0,
    }
}

#[tokio::test]
async fn submits_first_batch_immediately_without_polling() {
    let mut queue = MockPrintQueue::new();
    queue.expect_ensure_folder().times(1).returning(|_| Ok(()));
    queue
        .expect_upload_gcode()
        .times(1)
        .returning(|_, folder| Ok(format!("{folder}/a.gcode")));
    queue
        .expect_submit_job()
        .times(1)
        .returning(|job| Ok(SubmittedJob {
            job_id: 1,
            label: job.label,
        }));
    queue.expect_set_active().times(1).returning(|_| Ok(()));
    // No is_printer_busy expectation: a poll before batch 1 would panic.

    let (_tx, mut cancel) = watch::channel(false);
    let jobs = submit_batches(
        &queue,
        "clock",
        "run-1",
        &[batch(&[("a", 1)])],
        &gcode_map(&["a"]),
        &retry_fast(3),
        false,
        &mut cancel,
    )
    .await
    .expect("submission should succeed");

    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].label.contains("batch 1"));
    assert!(jobs[0].label.contains("run-1"));
}

#[tokio::test]
async fn waits_for_printer_idle_before_next_batch() {
    let mut queue = MockPrintQueue::new();
    queue.expect_ensure_folder().times(1).returning(|_| Ok(()));
    queue
        .expect_upload_gcode()
        .times(2)
        .returning(|_, folder| Ok(format!("{folder}/part.gcode")));

    let submissions = Arc::new(AtomicUsize::new(0));
    let submissions_in_mock = submissions.clone();
    queue.expect_submit_job().times(2).returning(move |job| {
        let n = submissions_in_mock.fetch_add(1, Ordering::SeqCst);
        Ok(SubmittedJob {
            job_id: n as i64 + 1,
            label: job.label,
        })
    });
    queue.expect_set_active().times(1).returning(|_| Ok(()));

    // Busy on the first poll, idle on the second.
    let polls = Arc::new(AtomicUsize::new(0));
    let polls_in_mock = polls.clone();
    let submissions_at_poll = submissions.clone();
    queue.expect_is_printer_busy().times(2).returning(move || {
        assert_eq!(
            submissions_at_poll.load(Ordering::SeqCst),
            1,
            "polling must happen after batch 1 and before batch 2"
        );
        let n = polls_in_mock.fetch_add(1, Ordering::SeqCst);
        Ok(n == 0)
    });
    queue
        .expect_job_status()
        .times(1)
        .returning(|_| Ok(JobStatus::Done));

    let (_tx, mut cancel) = watch::channel(false);
    let jobs = submit_batches(
        &queue,
        "clock",
        "run-2",
        &[batch(&[("a", 1)]), batch(&[("b", 1)])],
        &gcode_map(&["a", "b"]),
        &retry_fast(3),
        false,
        &mut cancel,
    )
    .await
    .expect("submission should succeed");

    assert_eq!(jobs.len(), 2);
    assert!(jobs[0].label.contains("batch 1"));
    assert!(jobs[1].label.contains("batch 2"));
    assert_eq!(polls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transient_failures_retry_within_the_attempt_limit() {
    let mut queue = MockPrintQueue::new();
    queue.expect_ensure_folder().times(1).returning(|_| Ok(()));
    queue
        .expect_upload_gcode()
        .times(1)
        .returning(|_, folder| Ok(format!("{folder}/a.gcode")));
    queue.expect_set_active().times(1).returning(|_| Ok(()));

    // Fails three times, succeeds on the fourth attempt (limit is 5).
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_mock = attempts.clone();
    queue.expect_submit_job().times(4).returning(move |job| {
        let n = attempts_in_mock.fetch_add(1, Ordering::SeqCst);
        if n < 3 {
            Err(UploadError::Http("connection reset".to_string()))
        } else {
            Ok(SubmittedJob {
                job_id: 9,
                label: job.label,
            })
        }
    });

    let (_tx, mut cancel) = watch::channel(false);
    let jobs = submit_batches(
        &queue,
        "clock",
        "run-3",
        &[batch(&[("a", 1)])],
        &gcode_map(&["a"]),
        &retry_fast(5),
        false,
        &mut cancel,
    )
    .await
    .expect("retries within the limit must succeed");

    assert_eq!(jobs.len(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn retry_exhaustion_is_fatal() {
    let mut queue = MockPrintQueue::new();
    queue.expect_ensure_folder().times(1).returning(|_| Ok(()));
    queue
        .expect_upload_gcode()
        .times(2)
        .returning(|_, _| Err(UploadError::Http("gateway down".to_string())));

    let (_tx, mut cancel) = watch::channel(false);
    let err = submit_batches(
        &queue,
        "clock",
        "run-4",
        &[batch(&[("a", 1)])],
        &gcode_map(&["a"]),
        &retry_fast(2),
        false,
        &mut cancel,
    )
    .await
    .expect_err("exhausted retries must be fatal");

    assert!(matches!(err, ScheduleError::Retry { attempts: 2, .. }));
}

#[tokio::test]
async fn cancellation_aborts_idle_wait_and_keeps_submitted_jobs() {
    let mut queue = MockPrintQueue::new();
    queue.expect_ensure_folder().times(1).returning(|_| Ok(()));
    queue
        .expect_upload_gcode()
        .times(2)
        .returning(|_, folder| Ok(format!("{folder}/part.gcode")));
    queue
        .expect_submit_job()
        .times(1)
        .returning(|job| Ok(SubmittedJob {
            job_id: 1,
            label: job.label,
        }));
    queue.expect_set_active().times(1).returning(|_| Ok(()));
    // Cancellation pre-empts the idle wait, so the printer is never polled
    // and batch 2 is never submitted.

    let (tx, mut cancel) = watch::channel(false);
    tx.send(true).unwrap();

    let err = submit_batches(
        &queue,
        "clock",
        "run-5",
        &[batch(&[("a", 1)]), batch(&[("b", 1)])],
        &gcode_map(&["a", "b"]),
        &retry_fast(3),
        false,
        &mut cancel,
    )
    .await
    .expect_err("cancelled run must abort");

    assert!(matches!(err, ScheduleError::Cancelled));
}

#[tokio::test]
async fn fresh_queue_purges_only_this_projects_jobs() {
    let mut queue = MockPrintQueue::new();
    queue.expect_ensure_folder().times(1).returning(|_| Ok(()));
    queue.expect_list_jobs().times(1).returning(|| {
        Ok(vec![
            SubmittedJob {
                job_id: 7,
                label: "clock batch 1 old-run".to_string(),
            },
            SubmittedJob {
                job_id: 8,
                label: "other-project batch 1".to_string(),
            },
        ])
    });
    queue
        .expect_delete_job()
        .times(1)
        .withf(|job_id| *job_id == 7)
        .returning(|_| Ok(()));
    queue
        .expect_upload_gcode()
        .times(1)
        .returning(|_, folder| Ok(format!("{folder}/a.gcode")));
    queue
        .expect_submit_job()
        .times(1)
        .returning(|job| Ok(SubmittedJob {
            job_id: 2,
            label: job.label,
        }));
    queue.expect_set_active().times(1).returning(|_| Ok(()));

    let (_tx, mut cancel) = watch::channel(false);
    let jobs = submit_batches(
        &queue,
        "clock",
        "run-6",
        &[batch(&[("a", 1)])],
        &gcode_map(&["a"]),
        &retry_fast(3),
        true,
        &mut cancel,
    )
    .await
    .expect("purge and submit should succeed");
    assert_eq!(jobs.len(), 1);
}

#[tokio::test]
async fn a_part_shared_between_batches_uploads_once() {
    let mut queue = MockPrintQueue::new();
    queue.expect_ensure_folder().times(1).returning(|_| Ok(()));
    // "a" appears in both batches but must be uploaded exactly once.
    queue
        .expect_upload_gcode()
        .times(1)
        .returning(|_, folder| Ok(format!("{folder}/a.gcode")));
    queue
        .expect_submit_job()
        .times(2)
        .returning(|job| Ok(SubmittedJob {
            job_id: 1,
            label: job.label,
        }));
    queue.expect_set_active().times(1).returning(|_| Ok(()));
    queue
        .expect_is_printer_busy()
        .times(1)
        .returning(|| Ok(false));
    queue
        .expect_job_status()
        .times(1)
        .returning(|_| Ok(JobStatus::Done));

    let (_tx, mut cancel) = watch::channel(false);
    let jobs = submit_batches(
        &queue,
        "clock",
        "run-7",
        &[batch(&[("a", 1)]), batch(&[("a", 2)])],
        &gcode_map(&["a"]),
        &retry_fast(3),
        false,
        &mut cancel,
    )
    .await
    .expect("submission should succeed");
    assert_eq!(jobs.len(), 2);
}
