//! Format normalisation: every part entering the slicer must be a mesh.
//!
//! Mesh parts pass through untouched; STEP parts are converted by the
//! external geometry kernel into a deterministic location under the working
//! directory. Conversion failures are per-part and never abort the run.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::ToolConfig;
use crate::contract::MeshConverter;
use crate::inventory::{Part, SourceFormat};

#[derive(Debug)]
pub enum ConvertError {
    Io(std::io::Error),
    ToolFailed { status: Option<i32>, stderr: String },
    Timeout { secs: u64 },
    MissingOutput(PathBuf),
}

impl std::fmt::Display for ConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertError::Io(e) => write!(f, "io error running converter: {e}"),
            ConvertError::ToolFailed { status, stderr } => write!(
                f,
                "converter exited with {:?}: {}",
                status,
                stderr.trim()
            ),
            ConvertError::Timeout { secs } => {
                write!(f, "converter timed out after {secs}s")
            }
            ConvertError::MissingOutput(p) => {
                write!(f, "converter produced no output file at {}", p.display())
            }
        }
    }
}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConvertError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConvertError {
    fn from(e: std::io::Error) -> Self {
        ConvertError::Io(e)
    }
}

/// Ensure the part has an effective mesh path, converting if needed.
///
/// Idempotent: a part whose `mesh_path` is already set is skipped, and mesh
/// parts never trigger an external call. The STEP source is left in place.
pub async fn normalise_part<C>(
    converter: &C,
    work_dir: &Path,
    part: &mut Part,
) -> Result<(), ConvertError>
where
    C: MeshConverter + ?Sized,
{
    if part.mesh_path.is_some() {
        debug!(part = %part.name, "mesh path already set, skipping normalisation");
        return Ok(());
    }
    match part.format {
        SourceFormat::Mesh => {
            debug!(part = %part.name, "already a mesh, no conversion needed");
            part.mesh_path = Some(part.source_path.clone());
            Ok(())
        }
        SourceFormat::AssemblyStep => {
            let out_dir = work_dir.join("meshes");
            std::fs::create_dir_all(&out_dir)?;
            let output = out_dir.join(format!("{}.stl", part.name));
            info!(
                part = %part.name,
                input = %part.source_path.display(),
                output = %output.display(),
                "Converting to mesh"
            );
            converter.convert_to_mesh(part, &output).await?;
            part.mesh_path = Some(output);
            Ok(())
        }
    }
}

/// Wrapper around the external conversion tool.
///
/// Invocations: `<bin> list <assembly>` prints one component name per line;
/// `<bin> convert <input> <output> [--component <name>]` writes the mesh.
pub struct CliConverter {
    bin: PathBuf,
    timeout: Duration,
}

impl CliConverter {
    pub fn new(tools: &ToolConfig) -> Self {
        Self {
            bin: tools.converter_bin.clone(),
            timeout: tools.timeout(),
        }
    }
}

#[async_trait]
impl MeshConverter for CliConverter {
    async fn list_components(&self, assembly: &Path) -> Result<Vec<String>, ConvertError> {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("list").arg(assembly);
        let output = run_tool(cmd, self.timeout).await?;
        let components = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect::<Vec<_>>();
        debug!(
            assembly = %assembly.display(),
            components = components.len(),
            "Assembly components listed"
        );
        Ok(components)
    }

    async fn convert_to_mesh(&self, part: &Part, output: &Path) -> Result<(), ConvertError> {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("convert").arg(&part.source_path).arg(output);
        if let Some(component) = &part.component {
            cmd.arg("--component").arg(component);
        }
        run_tool(cmd, self.timeout).await?;
        // Exit 0 alone is not success; the tool must have created the file.
        if !output.is_file() {
            error!(part = %part.name, output = %output.display(), "converter exited 0 but wrote nothing");
            return Err(ConvertError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }
}

async fn run_tool(
    mut cmd: Command,
    limit: Duration,
) -> Result<std::process::Output, ConvertError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let output = tokio::time::timeout(limit, cmd.output())
        .await
        .map_err(|_| ConvertError::Timeout {
            secs: limit.as_secs(),
        })??;
    if !output.status.success() {
        return Err(ConvertError::ToolFailed {
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output)
}
