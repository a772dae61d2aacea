//! # contract: interfaces to the external tools and the print-queue server
//!
//! This module defines the traits the pipeline depends on: the geometry
//! kernel that turns STEP input into meshes ([`MeshConverter`]), the slicing
//! engine that turns meshes into Gcode ([`Slicer`]), and the queue-managing
//! print server that receives finished jobs ([`PrintQueue`]).
//!
//! ## Interface & Extensibility
//! - Implement [`PrintQueue`] to target a different print server; the trait
//!   is agnostic of authentication and transport details.
//! - All methods are async; queue methods return [`UploadError`], which the
//!   scheduler treats as retryable.
//! - The traits are annotated for `mockall` so consumers can generate
//!   deterministic mocks for unit/integration tests (enabled through the
//!   `test-export-mocks` feature).
//!
//! ## Type Sources
//! - Request and response types (`NewPrintJob`, `PrintSet`, `SubmittedJob`,
//!   `JobStatus`, `SliceOutcome`) are plain data; see field docs.
//!
//! Concrete implementors: [`crate::convert::CliConverter`],
//! [`crate::slice::CliSlicer`], and the OctoPrint-style client in the CLI
//! crate.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::convert::ConvertError;
use crate::inventory::Part;
use crate::slice::SliceError;

/// External geometry kernel: explodes assemblies and converts CAD input to
/// sliceable mesh files. Success of a conversion means the tool exited 0 and
/// the output file exists.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait MeshConverter: Send + Sync {
    /// List the component names of a multi-component assembly file, in the
    /// order the kernel reports them.
    async fn list_components(&self, assembly: &Path) -> Result<Vec<String>, ConvertError>;

    /// Convert one part (the whole file, or the component named on the part)
    /// into a mesh at `output`.
    async fn convert_to_mesh(&self, part: &Part, output: &Path) -> Result<(), ConvertError>;
}

/// Result of one slicing-tool invocation.
#[derive(Debug, Clone)]
pub struct SliceOutcome {
    pub gcode_path: PathBuf,
    /// Raw slicing report text, parsed by [`crate::slice::parse_report`].
    pub report: String,
}

/// External slicing engine: mesh + profile in, Gcode + report out.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Slicer: Send + Sync {
    async fn slice(
        &self,
        mesh: &Path,
        profile: &Path,
        gcode_out: &Path,
    ) -> Result<SliceOutcome, SliceError>;
}

/// One Gcode file queued `count` times within a print job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintSet {
    /// Server-side path of the uploaded Gcode.
    pub remote_path: String,
    pub count: u32,
}

/// A print job to submit: a label plus the sets printed on its plate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrintJob {
    pub label: String,
    pub sets: Vec<PrintSet>,
}

/// A job as acknowledged by the print server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub job_id: i64,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Printing,
    Done,
    Failed,
}

/// Error type for print-queue calls. Every variant is considered transient
/// by the scheduler and retried up to the configured attempt limit.
#[derive(Debug)]
pub enum UploadError {
    /// Transport-level failure (connection refused, timeout, bad TLS...).
    Http(String),
    /// The server answered with a non-success status or an invalid payload.
    Api { status: u16, body: String },
    Io(std::io::Error),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Http(msg) => write!(f, "http error: {msg}"),
            UploadError::Api { status, body } => {
                write!(f, "print server rejected request (status {status}): {body}")
            }
            UploadError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UploadError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        UploadError::Io(e)
    }
}

/// Queue-managing print server (e.g. OctoPrint with a continuous-print
/// plugin). The implementor is responsible for connecting to the backing
/// service; this trait only fixes the operations the scheduler needs.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait PrintQueue: Send + Sync {
    /// Create the server-side folder if it does not exist yet.
    async fn ensure_folder(&self, folder: &str) -> Result<(), UploadError>;

    /// Upload a local Gcode file into `folder`, returning its remote path.
    async fn upload_gcode(&self, local: &Path, folder: &str) -> Result<String, UploadError>;

    /// Submit a print job; sets reference previously uploaded Gcode.
    async fn submit_job(&self, job: NewPrintJob) -> Result<SubmittedJob, UploadError>;

    async fn job_status(&self, job_id: i64) -> Result<JobStatus, UploadError>;

    /// List all jobs currently known to the queue.
    async fn list_jobs(&self) -> Result<Vec<SubmittedJob>, UploadError>;

    async fn delete_job(&self, job_id: i64) -> Result<(), UploadError>;

    /// Whether the printer is currently executing a job.
    async fn is_printer_busy(&self) -> Result<bool, UploadError>;

    /// Start or stop the server's automatic queue management.
    async fn set_active(&self, active: bool) -> Result<(), UploadError>;
}
