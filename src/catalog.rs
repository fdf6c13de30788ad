//! The projections making up a scan, ordered by rotation angle.

use std::collections::BTreeMap;
use std::f32::consts::PI;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{debug, info};
use ordered_float::OrderedFloat;

use crate::config::{ProjectionConfig, ScanType};
use crate::error::{ReconError, ReconResult};
use units::todo::{Degreesf32, Weightf32};

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionDescriptor {
    pub path  : PathBuf,
    pub index : usize,
    pub angle : Degreesf32,
    pub weight: Weightf32,
}

/// Projections keyed by angle. Equal angles keep the order in which they
/// were added.
#[derive(Clone, Debug, Default)]
pub struct ProjectionCatalog {
    entries: BTreeMap<(OrderedFloat<f32>, usize), ProjectionDescriptor>,
}

impl ProjectionCatalog {

    /// Expand the file mask and index range of `config` into descriptors.
    pub fn build(config: &ProjectionConfig) -> ReconResult<Self> {
        let [arc_start, arc_end] = config.scan_arc;
        let span = arc_end - arc_start;
        let indices = (config.first_index..=config.last_index).step_by(config.step.max(1)).collect_vec();
        let n = indices.len() as f32;
        let golden_step = span / GOLDEN_RATIO;

        let mut items = Vec::with_capacity(indices.len());
        for (k, &index) in indices.iter().enumerate() {
            if config.skip.contains(&index) { continue }
            let offset = match config.scan_type {
                ScanType::Sequential    => k as f32 * span / n,
                ScanType::GoldenSection => (k as f32 * golden_step).rem_euclid(span),
            };
            let path = file_name(&config.file_mask, index).ok_or_else(|| ReconError::Configuration(
                format!("projection mask {} has no '#' index placeholder", config.file_mask.display())))?;
            items.push((path, index, arc_start + offset));
        }
        if items.is_empty() {
            return Err(ReconError::Configuration(
                format!("no projections selected from {} in {}..={}",
                        config.file_mask.display(), config.first_index, config.last_index)));
        }

        let catalog = Self::from_angles(items, config.scan_arc);
        info!("Catalog holds {} projections over [{arc_start}, {arc_end}] degrees", catalog.len());
        Ok(catalog)
    }

    /// Build from explicit `(path, index, angle)` triples; weights follow from
    /// the angular gaps between neighbours on the periodic `arc`.
    pub fn from_angles(items: impl IntoIterator<Item = (PathBuf, usize, Degreesf32)>, arc: [f32; 2]) -> Self {
        let mut entries = BTreeMap::new();
        for (seq, (path, index, angle)) in items.into_iter().enumerate() {
            let descriptor = ProjectionDescriptor { path, index, angle, weight: 0.0 };
            entries.insert((OrderedFloat(angle), seq), descriptor);
        }
        let mut catalog = Self { entries };
        catalog.assign_weights(arc[1] - arc[0]);
        catalog
    }

    // Each projection stands for half the arc to each of its neighbours.
    // Normalised so that the weights add up to π.
    fn assign_weights(&mut self, span: f32) {
        let angles = self.entries.values().map(|d| d.angle).collect_vec();
        let n = angles.len();
        if n == 0 { return }
        for (i, d) in self.entries.values_mut().enumerate() {
            let gap = if n == 1 {
                span
            } else {
                let prev = if i == 0     { angles[n - 1] - span } else { angles[i - 1] };
                let next = if i == n - 1 { angles[0]     + span } else { angles[i + 1] };
                (next - prev) / 2.0
            };
            d.weight = gap / span * PI;
        }
        debug!("Projection weights assigned over a {span} degree arc");
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Descriptors in increasing angle order.
    pub fn iter(&self) -> impl Iterator<Item = &ProjectionDescriptor> + '_ {
        self.entries.values()
    }

    pub fn first(&self) -> Option<&ProjectionDescriptor> { self.entries.values().next() }
}

const GOLDEN_RATIO: f32 = 1.618_034;

/// Replace the last run of `#` in the file name part of `mask` with `index`,
/// zero-padded to the length of the run. `None` if there is no such run.
pub fn file_name(mask: &Path, index: usize) -> Option<PathBuf> {
    let name = mask.file_name()?.to_string_lossy();
    let end = name.rfind('#')? + 1;
    let start = name[..end].trim_end_matches('#').len();
    let width = end - start;
    let substituted = format!("{}{index:0width$}{}", &name[..start], &name[end..]);
    Some(mask.with_file_name(substituted))
}
