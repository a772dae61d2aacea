//! Batch packing: group part instances into print jobs that fit the bed.
//!
//! Greedy first-fit by descending footprint area. The area check is a simple
//! additive budget against the bed area, not true 2D packing; height is
//! bounded by the tallest member since everything on one plate prints
//! together. Identical inputs always produce identical batches: the sort is
//! stable and ties break on `(name, instance)`.

use std::cmp::Ordering;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{PlateTimePolicy, PrinterLimits};
use crate::inventory::Part;
use crate::slice::SliceRecord;

/// One part instance placed in a batch. `instance` is 1-based and unique per
/// part within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedInstance {
    pub part: String,
    pub instance: u32,
}

/// A set of part instances grouped for one continuous print.
#[derive(Debug, Clone, PartialEq)]
pub struct JobBatch {
    pub members: Vec<PlacedInstance>,
    pub used_area_mm2: f64,
    pub max_height_mm: f64,
    pub duration_s: u64,
    pub cost: f64,
}

/// A part whose single instance can never fit the build volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnbatchableError {
    pub part: String,
    pub reason: String,
}

impl std::fmt::Display for UnbatchableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "part '{}' cannot be batched: {}", self.part, self.reason)
    }
}

impl std::error::Error for UnbatchableError {}

#[derive(Debug, Clone, PartialEq)]
pub struct PackOutcome {
    /// Batches in creation (first-fit) order.
    pub batches: Vec<JobBatch>,
    pub unbatchable: Vec<UnbatchableError>,
}

struct Candidate {
    part: String,
    instance: u32,
    area_mm2: f64,
    height_mm: f64,
    duration_s: u64,
    cost: f64,
}

/// Pack every required instance of every sliced part into job batches.
///
/// Unbatchable parts are reported, not fatal; all other instances are
/// placed, so per-part instance counts across batches equal the required
/// quantity.
pub fn pack<'a>(
    items: impl IntoIterator<Item = (&'a Part, &'a SliceRecord)>,
    limits: &PrinterLimits,
    policy: PlateTimePolicy,
) -> PackOutcome {
    let bed_area = limits.bed_area_mm2();
    let mut unbatchable = Vec::new();
    let mut candidates = Vec::new();

    for (part, record) in items {
        let area = record.footprint.area_mm2();
        if area > bed_area {
            warn!(part = %part.name, area_mm2 = area, bed_area_mm2 = bed_area, "part footprint exceeds bed area");
            unbatchable.push(UnbatchableError {
                part: part.name.clone(),
                reason: format!(
                    "footprint {:.1}mm2 exceeds bed area {:.1}mm2",
                    area, bed_area
                ),
            });
            continue;
        }
        if record.height_mm > limits.max_height_mm {
            warn!(part = %part.name, height_mm = record.height_mm, "part height exceeds build height");
            unbatchable.push(UnbatchableError {
                part: part.name.clone(),
                reason: format!(
                    "height {:.1}mm exceeds build height {:.1}mm",
                    record.height_mm, limits.max_height_mm
                ),
            });
            continue;
        }
        for instance in 1..=part.quantity {
            candidates.push(Candidate {
                part: part.name.clone(),
                instance,
                area_mm2: area,
                height_mm: record.height_mm,
                duration_s: record.duration_s,
                cost: record.cost,
            });
        }
    }

    candidates.sort_by(|a, b| {
        b.area_mm2
            .partial_cmp(&a.area_mm2)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.part.cmp(&b.part))
            .then_with(|| a.instance.cmp(&b.instance))
    });

    let mut batches: Vec<JobBatch> = Vec::new();
    for cand in candidates {
        let slot = batches.iter_mut().find(|b| {
            b.used_area_mm2 + cand.area_mm2 <= bed_area
                && b.max_height_mm.max(cand.height_mm) <= limits.max_height_mm
        });
        match slot {
            Some(batch) => place(batch, &cand, policy),
            None => {
                let mut batch = JobBatch {
                    members: Vec::new(),
                    used_area_mm2: 0.0,
                    max_height_mm: 0.0,
                    duration_s: 0,
                    cost: 0.0,
                };
                place(&mut batch, &cand, policy);
                batches.push(batch);
            }
        }
    }

    info!(
        batches = batches.len(),
        unbatchable = unbatchable.len(),
        "Packed part instances into job batches"
    );
    PackOutcome {
        batches,
        unbatchable,
    }
}

fn place(batch: &mut JobBatch, cand: &Candidate, policy: PlateTimePolicy) {
    batch.members.push(PlacedInstance {
        part: cand.part.clone(),
        instance: cand.instance,
    });
    batch.used_area_mm2 += cand.area_mm2;
    batch.max_height_mm = batch.max_height_mm.max(cand.height_mm);
    batch.duration_s = match policy {
        PlateTimePolicy::Simultaneous => batch.duration_s.max(cand.duration_s),
        PlateTimePolicy::Sequential => batch.duration_s + cand.duration_s,
    };
    batch.cost += cand.cost;
}
