//! Part discovery and BOM reconciliation.
//!
//! Builds the ordered worklist for one run from either a multi-component
//! assembly file or a folder tree of individual CAD files, then reconciles
//! the discovered parts against the bill of materials. Reconciliation never
//! fails the run: mismatches are logged and collected as warnings on the
//! [`Inventory`].

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::contract::MeshConverter;
use crate::convert::ConvertError;

/// Bill of materials: required quantity per part identifier. Ordered by
/// part name so reconciliation output is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bom(BTreeMap<String, u32>);

impl Bom {
    pub fn from_entries(entries: impl IntoIterator<Item = (String, u32)>) -> Self {
        Self(entries.into_iter().collect())
    }

    pub fn get(&self, part: &str) -> Option<u32> {
        self.0.get(part).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u32)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Where parts are discovered from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// One multi-component assembly file; every component becomes a part.
    Assembly(PathBuf),
    /// A directory tree of individual part files.
    Folder(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    AssemblyStep,
    Mesh,
}

/// One physical component to be printed.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    /// Stable identity: file stem, or component name for assembly parts.
    pub name: String,
    pub source_path: PathBuf,
    pub format: SourceFormat,
    /// Component within `source_path`, for parts of an assembly file.
    pub component: Option<String>,
    pub quantity: u32,
    /// Effective mesh path, set by the normaliser.
    pub mesh_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReconcileWarning {
    /// A BOM entry with no matching discovered part.
    Missing { part: String, quantity: u32 },
    /// A discovered part with no BOM entry; quantity defaulted to 1.
    Unlisted { part: String },
    /// A later discovery with an identity already taken; dropped.
    Duplicate { part: String },
}

impl std::fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileWarning::Missing { part, quantity } => {
                write!(f, "BOM part '{part}' (x{quantity}) not found in file source")
            }
            ReconcileWarning::Unlisted { part } => {
                write!(f, "part '{part}' not listed in BOM, defaulting quantity to 1")
            }
            ReconcileWarning::Duplicate { part } => {
                write!(f, "duplicate part identity '{part}', keeping the first")
            }
        }
    }
}

/// The full ordered worklist for one run.
#[derive(Debug, Clone)]
pub struct Inventory {
    pub parts: Vec<Part>,
    pub warnings: Vec<ReconcileWarning>,
}

#[derive(Debug)]
pub enum InventoryError {
    SourceMissing(PathBuf),
    NoSupportedFiles(PathBuf),
    Converter(ConvertError),
    Io(std::io::Error),
}

impl std::fmt::Display for InventoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventoryError::SourceMissing(p) => {
                write!(f, "file source does not exist: {}", p.display())
            }
            InventoryError::NoSupportedFiles(p) => {
                write!(f, "no supported CAD/mesh files under {}", p.display())
            }
            InventoryError::Converter(e) => write!(f, "assembly listing failed: {e}"),
            InventoryError::Io(e) => write!(f, "io error walking file source: {e}"),
        }
    }
}

impl std::error::Error for InventoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InventoryError::Converter(e) => Some(e),
            InventoryError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for InventoryError {
    fn from(e: std::io::Error) -> Self {
        InventoryError::Io(e)
    }
}

const MESH_EXTENSIONS: [&str; 1] = ["stl"];
const STEP_EXTENSIONS: [&str; 2] = ["step", "stp"];

fn supported_format(path: &Path) -> Option<SourceFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if MESH_EXTENSIONS.contains(&ext.as_str()) {
        Some(SourceFormat::Mesh)
    } else if STEP_EXTENSIONS.contains(&ext.as_str()) {
        Some(SourceFormat::AssemblyStep)
    } else {
        None
    }
}

/// Discover parts from the file source and reconcile them against the BOM.
///
/// Fatal ([`InventoryError`]) when the source path does not exist or yields
/// zero supported parts; every other mismatch is a warning.
pub async fn walk_source<C>(
    source: &FileSource,
    converter: &C,
    bom: &Bom,
) -> Result<Inventory, InventoryError>
where
    C: MeshConverter + ?Sized,
{
    let parts = match source {
        FileSource::Assembly(path) => {
            if !path.is_file() {
                return Err(InventoryError::SourceMissing(path.clone()));
            }
            info!(assembly = %path.display(), "Listing assembly components");
            let components = converter
                .list_components(path)
                .await
                .map_err(InventoryError::Converter)?;
            if components.is_empty() {
                return Err(InventoryError::NoSupportedFiles(path.clone()));
            }
            components
                .into_iter()
                .map(|name| Part {
                    name: name.clone(),
                    source_path: path.clone(),
                    format: SourceFormat::AssemblyStep,
                    component: Some(name),
                    quantity: 1,
                    mesh_path: None,
                })
                .collect()
        }
        FileSource::Folder(path) => {
            if !path.is_dir() {
                return Err(InventoryError::SourceMissing(path.clone()));
            }
            let mut files = Vec::new();
            visit_dir(path, &mut files)?;
            if files.is_empty() {
                return Err(InventoryError::NoSupportedFiles(path.clone()));
            }
            files
                .into_iter()
                .map(|(file, format)| {
                    let name = file
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    Part {
                        name,
                        source_path: file,
                        format,
                        component: None,
                        quantity: 1,
                        mesh_path: None,
                    }
                })
                .collect::<Vec<_>>()
        }
    };

    let mut warnings = Vec::new();
    let parts = dedupe(parts, &mut warnings);
    let parts = reconcile(parts, bom, &mut warnings);

    info!(
        parts = parts.len(),
        warnings = warnings.len(),
        "Inventory built"
    );
    Ok(Inventory { parts, warnings })
}

/// Recursively collect supported files, entries sorted by name per directory
/// so the worklist order is stable across runs.
fn visit_dir(dir: &Path, found: &mut Vec<(PathBuf, SourceFormat)>) -> Result<(), std::io::Error> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            visit_dir(&path, found)?;
        } else if let Some(format) = supported_format(&path) {
            debug!(file = %path.display(), ?format, "Discovered part file");
            found.push((path, format));
        }
    }
    Ok(())
}

fn dedupe(parts: Vec<Part>, warnings: &mut Vec<ReconcileWarning>) -> Vec<Part> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(parts.len());
    for part in parts {
        if seen.insert(part.name.clone()) {
            kept.push(part);
        } else {
            warn!(part = %part.name, "duplicate part identity, dropping later discovery");
            warnings.push(ReconcileWarning::Duplicate {
                part: part.name,
            });
        }
    }
    kept
}

fn reconcile(mut parts: Vec<Part>, bom: &Bom, warnings: &mut Vec<ReconcileWarning>) -> Vec<Part> {
    for part in &mut parts {
        match bom.get(&part.name) {
            Some(quantity) => part.quantity = quantity,
            None => {
                warn!(part = %part.name, "part not listed in BOM, defaulting quantity to 1");
                warnings.push(ReconcileWarning::Unlisted {
                    part: part.name.clone(),
                });
            }
        }
    }
    for (name, quantity) in bom.iter() {
        if !parts.iter().any(|p| &p.name == name) {
            warn!(part = %name, quantity, "BOM part not found in file source");
            warnings.push(ReconcileWarning::Missing {
                part: name.clone(),
                quantity: *quantity,
            });
        }
    }
    parts
}
