//! Slice execution and report parsing.
//!
//! Drives the external slicing tool once per part, then extracts the
//! per-part metadata (print duration, extruded volume, bed footprint,
//! height) from the generated Gcode. The duration and volume come from the
//! slicer's comment footer; footprint and height are measured from the
//! movement commands themselves, the same way queue servers analyse
//! uploaded Gcode.
//!
//! A part is sliced at most once per run; any failure here is terminal for
//! the part, not for the run.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{MaterialConfig, ToolConfig};
use crate::contract::{SliceOutcome, Slicer};
use crate::inventory::Part;

/// Computed facts about a part after slicing. One per successfully sliced
/// part; immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceRecord {
    pub duration_s: u64,
    pub volume_mm3: f64,
    /// Derived: volume x unit material cost.
    pub cost: f64,
    pub footprint: Footprint,
    pub height_mm: f64,
    pub gcode_path: PathBuf,
}

/// 2D bounding rectangle of a part on the bed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footprint {
    pub width_mm: f64,
    pub depth_mm: f64,
}

impl Footprint {
    pub fn area_mm2(&self) -> f64 {
        self.width_mm * self.depth_mm
    }
}

/// Metrics extracted from one slicing report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportMetrics {
    pub duration_s: u64,
    pub volume_mm3: f64,
    pub footprint: Footprint,
    pub height_mm: f64,
}

#[derive(Debug)]
pub enum SliceError {
    Io(std::io::Error),
    ToolFailed { status: Option<i32>, stderr: String },
    Timeout { secs: u64 },
    MissingOutput(PathBuf),
    MalformedReport(String),
    NotNormalised(String),
}

impl std::fmt::Display for SliceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SliceError::Io(e) => write!(f, "io error running slicer: {e}"),
            SliceError::ToolFailed { status, stderr } => {
                write!(f, "slicer exited with {:?}: {}", status, stderr.trim())
            }
            SliceError::Timeout { secs } => write!(f, "slicer timed out after {secs}s"),
            SliceError::MissingOutput(p) => {
                write!(f, "slicer produced no Gcode at {}", p.display())
            }
            SliceError::MalformedReport(msg) => write!(f, "malformed slicing report: {msg}"),
            SliceError::NotNormalised(part) => {
                write!(f, "part '{part}' has no mesh path; normalisation did not run")
            }
        }
    }
}

impl std::error::Error for SliceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SliceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SliceError {
    fn from(e: std::io::Error) -> Self {
        SliceError::Io(e)
    }
}

/// Slice one normalised part and build its [`SliceRecord`].
pub async fn slice_part<S>(
    slicer: &S,
    tools: &ToolConfig,
    material: &MaterialConfig,
    work_dir: &Path,
    part: &Part,
) -> Result<SliceRecord, SliceError>
where
    S: Slicer + ?Sized,
{
    let mesh = part
        .mesh_path
        .as_deref()
        .ok_or_else(|| SliceError::NotNormalised(part.name.clone()))?;
    let gcode_dir = work_dir.join("gcode");
    std::fs::create_dir_all(&gcode_dir)?;
    let gcode_out = gcode_dir.join(format!("{}.gcode", part.name));

    info!(part = %part.name, mesh = %mesh.display(), "Slicing part");
    let outcome = slicer.slice(mesh, &tools.profile, &gcode_out).await?;
    let metrics = parse_report(&outcome.report)?;

    let record = SliceRecord {
        duration_s: metrics.duration_s,
        volume_mm3: metrics.volume_mm3,
        cost: metrics.volume_mm3 * material.cost_per_mm3,
        footprint: metrics.footprint,
        height_mm: metrics.height_mm,
        gcode_path: outcome.gcode_path,
    };
    info!(
        part = %part.name,
        duration_s = record.duration_s,
        volume_mm3 = record.volume_mm3,
        height_mm = record.height_mm,
        "Sliced part"
    );
    Ok(record)
}

/// Parse duration, volume, footprint and height out of a slicing report.
///
/// A missing duration or volume, a duration of zero, a negative volume or a
/// report without extruding moves is malformed.
pub fn parse_report(report: &str) -> Result<ReportMetrics, SliceError> {
    let time_re =
        Regex::new(r"(?m)^;\s*estimated printing time \(normal mode\)\s*=\s*(.+?)\s*$").unwrap();
    let volume_re = Regex::new(r"(?m)^;\s*filament used \[mm3\]\s*=\s*(-?[0-9.]+)").unwrap();

    let duration_s = match time_re.captures(report) {
        Some(caps) => parse_duration(caps.get(1).map_or("", |m| m.as_str()))?,
        None => {
            return Err(SliceError::MalformedReport(
                "missing estimated printing time".into(),
            ))
        }
    };
    if duration_s == 0 {
        return Err(SliceError::MalformedReport("zero print duration".into()));
    }

    let volume_mm3 = match volume_re.captures(report) {
        Some(caps) => caps
            .get(1)
            .map_or("", |m| m.as_str())
            .parse::<f64>()
            .map_err(|e| SliceError::MalformedReport(format!("bad filament volume: {e}")))?,
        None => {
            return Err(SliceError::MalformedReport(
                "missing filament volume".into(),
            ))
        }
    };
    if volume_mm3 < 0.0 {
        return Err(SliceError::MalformedReport(
            "negative filament volume".into(),
        ));
    }

    let (footprint, height_mm) = measure_moves(report)?;
    debug!(
        duration_s,
        volume_mm3,
        width_mm = footprint.width_mm,
        depth_mm = footprint.depth_mm,
        height_mm,
        "Parsed slicing report"
    );
    Ok(ReportMetrics {
        duration_s,
        volume_mm3,
        footprint,
        height_mm,
    })
}

/// Parse a slicer duration like `2d 2h 11m 30s` (any subset of fields).
fn parse_duration(text: &str) -> Result<u64, SliceError> {
    let token_re = Regex::new(r"(\d+)\s*([dhms])").unwrap();
    let mut total = 0u64;
    let mut matched = false;
    for caps in token_re.captures_iter(text) {
        matched = true;
        let value: u64 = caps[1]
            .parse()
            .map_err(|e| SliceError::MalformedReport(format!("bad duration field: {e}")))?;
        let unit = match &caps[2] {
            "d" => 86_400,
            "h" => 3_600,
            "m" => 60,
            _ => 1,
        };
        total += value * unit;
    }
    if !matched {
        return Err(SliceError::MalformedReport(format!(
            "unparsable duration '{text}'"
        )));
    }
    Ok(total)
}

/// Bounding rectangle of extruding moves and max Z of any move.
fn measure_moves(report: &str) -> Result<(Footprint, f64), SliceError> {
    let axis_re = Regex::new(r"([XYZE])(-?\d+(?:\.\d+)?)").unwrap();

    let mut min_x = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    let mut max_z = 0.0f64;
    let mut extruded = false;

    for line in report.lines() {
        let line = line.trim();
        if !(line.starts_with("G1 ") || line.starts_with("G0 ")) {
            continue;
        }
        let mut x = None;
        let mut y = None;
        let mut z = None;
        let mut e = None;
        for caps in axis_re.captures_iter(line) {
            let value: f64 = match caps[2].parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            match &caps[1] {
                "X" => x = Some(value),
                "Y" => y = Some(value),
                "Z" => z = Some(value),
                _ => e = Some(value),
            }
        }
        if let Some(z) = z {
            max_z = max_z.max(z);
        }
        // Only moves that lay down material count towards the footprint.
        if e.map_or(false, |e| e > 0.0) {
            if let Some(x) = x {
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                extruded = true;
            }
            if let Some(y) = y {
                min_y = min_y.min(y);
                max_y = max_y.max(y);
                extruded = true;
            }
        }
    }

    if !extruded {
        return Err(SliceError::MalformedReport(
            "no extruding moves in Gcode".into(),
        ));
    }
    let footprint = Footprint {
        width_mm: (max_x - min_x).max(0.0),
        depth_mm: (max_y - min_y).max(0.0),
    };
    Ok((footprint, max_z))
}

/// Wrapper around the external slicing tool.
///
/// Invocation mirrors the PrusaSlicer console interface:
/// `<bin> --load <profile> --slice --export-gcode --output <out> <mesh>`.
/// The generated Gcode doubles as the slicing report.
pub struct CliSlicer {
    bin: PathBuf,
    timeout: Duration,
}

impl CliSlicer {
    pub fn new(tools: &ToolConfig) -> Self {
        Self {
            bin: tools.slicer_bin.clone(),
            timeout: tools.timeout(),
        }
    }
}

#[async_trait]
impl Slicer for CliSlicer {
    async fn slice(
        &self,
        mesh: &Path,
        profile: &Path,
        gcode_out: &Path,
    ) -> Result<SliceOutcome, SliceError> {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("--load")
            .arg(profile)
            .arg("--slice")
            .arg("--export-gcode")
            .arg("--output")
            .arg(gcode_out)
            .arg(mesh)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| SliceError::Timeout {
                secs: self.timeout.as_secs(),
            })??;
        if !output.status.success() {
            return Err(SliceError::ToolFailed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        if !gcode_out.is_file() {
            return Err(SliceError::MissingOutput(gcode_out.to_path_buf()));
        }
        let report = tokio::fs::read_to_string(gcode_out).await?;
        Ok(SliceOutcome {
            gcode_path: gcode_out.to_path_buf(),
            report,
        })
    }
}
