use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Top-level configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Project name, used for the server-side folder and job labels.
    pub project_name: String,
    /// Working directory for generated meshes and Gcode.
    pub work_dir: PathBuf,
    pub printer: PrinterLimits,
    pub material: MaterialConfig,
    pub tools: ToolConfig,
    #[serde(default)]
    pub plate_time: PlateTimePolicy,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Remove jobs previously queued for this project before submitting.
    #[serde(default)]
    pub fresh_queue: bool,
}

impl RunConfig {
    pub fn trace_loaded(&self) {
        info!(
            project = %self.project_name,
            work_dir = %self.work_dir.display(),
            "Loaded run config"
        );
        debug!(?self, "Run config (full debug)");
    }
}

/// Physical build-volume limits of the target printer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrinterLimits {
    pub bed_width_mm: f64,
    pub bed_depth_mm: f64,
    pub max_height_mm: f64,
}

impl PrinterLimits {
    pub fn bed_area_mm2(&self) -> f64 {
        self.bed_width_mm * self.bed_depth_mm
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MaterialConfig {
    /// Unit material cost, multiplied by extruded volume per part.
    pub cost_per_mm3: f64,
}

/// Locations and limits for the external conversion and slicing tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub converter_bin: PathBuf,
    pub slicer_bin: PathBuf,
    /// Slicer profile passed via `--load`.
    pub profile: PathBuf,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_tool_timeout_secs() -> u64 {
    600
}

/// How the print time of a multi-part plate is estimated.
///
/// `Simultaneous` takes the max of the members (parts share the plate),
/// `Sequential` sums them (one plate per member, printed back to back).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlateTimePolicy {
    #[default]
    Simultaneous,
    Sequential,
}

/// Retry and polling behaviour for print-queue calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub poll_secs: u64,
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_secs: 2,
            poll_secs: 10,
        }
    }
}
