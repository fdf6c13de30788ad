use log::{debug, warn};
use ndarray::{parallel::prelude::*, Axis};

use crate::config::{ReconConfig, Tilt};
use crate::module::{BackProjector, Module, ModuleResult};
use crate::parameters::Parameters;
use crate::publication::Publication;
use crate::reader::BlockParameters;
use crate::types::{ProjectionStack, Volume};
use geometry::{BeamGeometry, Roi};
use units::mm_;

use super::{allocate, check_stack, interpolate, stack_roi, trigonometry, FilterCache, FilterSettings};

/// Filtered back-projection of parallel-beam projections.
#[derive(Debug, Default)]
pub struct ParallelFbp {
    filter  : FilterCache,
    /// Detector column of the rotation axis, counting pixel edges
    center  : f32,
    tilt    : Tilt,
    /// Degrees added to every projection angle
    rotation: f32,
    /// Voxel edge over detector pixel size
    zoom    : f32,
    roi     : Roi,
    volume  : Volume,
    configured: bool,
}

impl ParallelFbp {

    /// Rotation axis column at detector row `row`.
    fn axis_at(&self, row: usize) -> f32 {
        if self.tilt.correct {
            self.center + (row as f32 - self.tilt.pivot) * self.tilt.angle.to_radians().tan()
        } else {
            self.center
        }
    }
}

impl Module for ParallelFbp {

    fn name(&self) -> &str { "ParallelFbp" }

    fn configure(&mut self, config: &ReconConfig, parameters: &Parameters) -> ModuleResult<()> {
        let p = &config.projections;
        if p.geometry != BeamGeometry::Parallel {
            return Err(format!("cannot reconstruct {} beam data", p.geometry).into());
        }
        self.filter   = FilterCache::new(FilterSettings::from_parameters(parameters)?);
        self.center   = config.center();
        self.tilt     = p.tilt;
        self.rotation = config.matrix.rotation;
        self.zoom     = mm_(config.voxel_size()) / mm_(p.resolution);
        if !self.zoom.is_finite() || self.zoom <= 0.0 {
            return Err(format!("voxel to pixel ratio {} is not positive", self.zoom).into());
        }
        if self.tilt.correct && self.tilt.angle.abs() > 5.0 {
            warn!("tilt of {} degrees is unusually large", self.tilt.angle);
        }
        debug!("ParallelFbp: axis at column {}, matrix rotation {}", self.center, self.rotation);
        self.configured = true;
        Ok(())
    }

    fn set_roi(&mut self, roi: &Roi) -> ModuleResult<()> {
        self.volume = allocate(roi)?;
        self.roi = *roi;
        Ok(())
    }

    fn valid(&self) -> bool { self.configured }

    fn publications(&self) -> Vec<Publication> {
        vec![Publication::new(&["A.C. Kak", "M. Slaney"],
                              "Principles of computerized tomographic imaging",
                              "IEEE Press", 1988, 0, 0, "49-75", "10.1137/1.9780898719277")]
    }
}

impl BackProjector for ParallelFbp {

    fn process(&mut self, stack: &ProjectionStack, params: &BlockParameters) -> ModuleResult<()> {
        check_stack(stack, params)?;
        let source = stack_roi(stack, params);
        if source.y0 > self.roi.y0 || source.y1 < self.roi.y1 {
            return Err(format!("projection rows {:?} do not cover slices {:?}", source.rows(), self.roi.rows()).into());
        }
        let trig = trigonometry(params, self.rotation)?;
        let mut filtered = stack.to_owned();
        self.filter.filter_rows(&mut filtered);

        let size = self.volume.len_of(Axis(1));
        let half = (size as f32 - 1.0) / 2.0;
        let zoom = self.zoom;
        let axes = self.roi.rows().map(|row| self.axis_at(row) - source.x0 as f32 - 0.5).collect::<Vec<_>>();
        let first = self.roi.y0 - source.y0;

        self.volume.axis_iter_mut(Axis(0)).into_par_iter().enumerate().for_each(|(s, mut slice)| {
            let sinogram = filtered.index_axis(Axis(1), first + s);
            let axis = axes[s];
            for ((iy, ix), voxel) in slice.indexed_iter_mut() {
                let x = (ix as f32 - half) * zoom;
                let y = (half - iy as f32) * zoom;
                *voxel += trig.iter().zip(sinogram.rows())
                    .map(|(&(cos, sin, weight), row)| weight * interpolate(row, axis + x * cos + y * sin))
                    .sum::<f32>() * zoom;
            }
        });
        Ok(())
    }

    fn n_slices(&self) -> usize { self.volume.len_of(Axis(0)) }

    fn volume(&self) -> ndarray::ArrayView3<'_, f32> { self.volume.view() }
}
