//! Configuration of a reconstruction run

use std::fs;
use std::path::{Path, PathBuf};

use geometry::{BeamGeometry, ConeGeometry, Margins, Roi, Voi};
use serde::Deserialize;
use units::{mm, Length};

use super::{deserialize_parameters, deserialize_uom, deserialize_uom_opt};
use crate::error::{ReconError, ReconResult};
use crate::parameters::Parameters;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReconConfig {
    #[serde(default)]
    pub user: UserInformation,

    pub projections: ProjectionConfig,

    pub matrix: MatrixConfig,

    #[serde(default)]
    pub system: SystemConfig,

    /// Preprocessing stages, applied in this order
    #[serde(default)]
    pub preprocessing: Vec<ModuleConfig>,

    pub backprojector: BackProjectorConfig,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UserInformation {
    #[serde(default)] pub operator  : String,
    #[serde(default)] pub instrument: String,
    #[serde(default)] pub sample    : String,
    #[serde(default)] pub comment   : String,
}

// ----- Projections -----------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProjectionConfig {

    /// File name pattern; a run of `#` is replaced by the zero-padded index
    pub file_mask: PathBuf,
    pub first_index: usize,
    pub last_index: usize,
    #[serde(default = "one")]
    pub step: usize,
    /// Indices to leave out
    #[serde(default)]
    pub skip: Vec<usize>,

    #[serde(default)] pub flip: Flip,
    #[serde(default)] pub rotate: Rotate,
    #[serde(default = "one")]
    pub binning: usize,

    #[serde(default)] pub open_beam: Option<ReferenceImages>,
    #[serde(default)] pub dark_current: Option<ReferenceImages>,
    /// Open area of the frame used to estimate the dose of each projection
    #[serde(default)] pub dose_roi: Option<Roi>,

    /// First and last angle (degrees) of the scan
    #[serde(default = "full_arc")]
    pub scan_arc: [f32; 2],
    #[serde(default)] pub scan_type: ScanType,
    #[serde(default)] pub image_type: ImageType,
    #[serde(default)] pub geometry: BeamGeometry,

    /// Column of the rotation axis; the middle of the ROI when absent
    #[serde(default)] pub center: Option<f32>,
    #[serde(default)] pub tilt: Tilt,

    /// Source to object (rotation axis) distance
    #[serde(default, deserialize_with = "deserialize_uom_opt")]
    pub sod: Option<Length>,
    /// Source to detector distance
    #[serde(default, deserialize_with = "deserialize_uom_opt")]
    pub sdd: Option<Length>,
    /// `[u, v]` in detector pixels; the middle of the frame when absent
    #[serde(default)] pub piercing_point: Option<[f32; 2]>,

    /// Detector pixel size
    #[serde(deserialize_with = "deserialize_uom")]
    pub resolution: Length,

    /// Columns and slice rows to reconstruct
    pub roi: Roi,
    /// Part of the frame that may be read; the whole frame when absent
    #[serde(default)] pub projection_roi: Option<Roi>,
    /// Extra rows read on each side of a parallel-beam block
    #[serde(default)] pub margin: usize,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReferenceImages {
    pub file_mask: PathBuf,
    pub first_index: usize,
    pub count: usize,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Flip { #[default] None, Horizontal, Vertical, Both }

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Rotate {
    #[default]
    #[serde(rename = "none"  )] None,
    #[serde(rename = "rot90" )] Quarter,
    #[serde(rename = "rot180")] Half,
    #[serde(rename = "rot270")] ThreeQuarters,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanType { #[default] Sequential, GoldenSection }

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    #[default]
    Projections,
    /// A single detector row repeated for every output slice
    RepeatSinogram,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Tilt {
    /// Degrees
    #[serde(default)] pub angle: f32,
    /// Detector row about which the axis is tilted
    #[serde(default)] pub pivot: f32,
    #[serde(default)] pub correct: bool,
}

// ----- Matrix ----------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MatrixConfig {
    /// Directory receiving slices, containers and `citations.txt`
    pub destination: PathBuf,
    #[serde(default = "default_slice_mask")]
    pub file_mask: String,
    #[serde(default)]
    pub file_type: FileType,
    /// Values mapped onto the 16-bit range when quantizing
    #[serde(default = "unit_interval")]
    pub gray_interval: [f32; 2],
    /// Crop applied to slices when they are written
    #[serde(default)] pub roi: Option<Roi>,
    #[serde(default)] pub voi: Option<Voi>,
    /// Stream blocks to disk instead of keeping the volume in memory
    #[serde(default)] pub automatic_serialize: bool,
    #[serde(default, deserialize_with = "deserialize_uom_opt")]
    pub voxel_size: Option<Length>,
    /// Degrees added to every projection angle
    #[serde(default)] pub rotation: f32,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    #[default]
    Float32,
    Uint16,
    Float32Container,
    Uint16Container,
}

impl FileType {
    pub fn is_container(&self) -> bool {
        matches!(self, FileType::Float32Container | FileType::Uint16Container)
    }
    pub fn is_quantized(&self) -> bool {
        matches!(self, FileType::Uint16 | FileType::Uint16Container)
    }
}

// ----- System and modules ----------------------------------------------------------------

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    /// Memory budget in MB
    #[serde(default = "default_memory")]
    pub memory: usize,
    /// Count NaN and infinite values after every stage
    #[serde(default)]
    pub validate_data: bool,
    /// Rows added on each side of a cone-beam extent
    #[serde(default = "default_cone_margin")]
    pub cone_margin: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self { memory: default_memory(), validate_data: false, cone_margin: default_cone_margin() }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_parameters")]
    pub parameters: Parameters,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackProjectorConfig {
    pub name: String,
    /// Number of slices reconstructed per block
    #[serde(default = "default_slice_block")]
    pub slice_block: usize,
    #[serde(default, deserialize_with = "deserialize_parameters")]
    pub parameters: Parameters,
}

fn one() -> usize { 1 }
fn full_arc() -> [f32; 2] { [0.0, 360.0] }
fn unit_interval() -> [f32; 2] { [0.0, 1.0] }
fn default_slice_mask() -> String { "slice_####.trf".into() }
fn default_memory() -> usize { 1500 }
fn default_cone_margin() -> usize { 8 }
fn default_slice_block() -> usize { 32 }

// ----- Derived quantities ----------------------------------------------------------------

/// Settings whose change makes previously preprocessed projections stale.
///
/// Everything not listed here only affects back-projection or output: the
/// rotation centre, tilt, matrix rotation, gray interval, matrix ROI and VOI,
/// user information and the back-projector's parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessingKey {
    projections  : ProjectionConfig,
    preprocessing: Vec<ModuleConfig>,
    slice_block  : usize,
    voxel_size   : Option<Length>,
    cone_margin  : usize,
}

impl ReconConfig {

    pub fn preprocessing_key(&self) -> PreprocessingKey {
        let mut projections = self.projections.clone();
        projections.center = None;
        projections.tilt = Tilt::default();
        PreprocessingKey {
            projections,
            preprocessing: self.preprocessing.clone(),
            slice_block  : self.backprojector.slice_block,
            voxel_size   : self.matrix.voxel_size,
            cone_margin  : self.system.cone_margin,
        }
    }

    /// Check the settings that can be judged without touching any files.
    pub fn validate(&self) -> ReconResult<()> {
        let p = &self.projections;
        let err = |msg: String| Err(ReconError::Configuration(msg));

        if p.geometry == BeamGeometry::Helix {
            return Err(ReconError::UnsupportedGeometry(p.geometry));
        }
        if self.total_slices() == 0 {
            return err(format!("slice range of ROI {} is empty", p.roi));
        }
        if p.roi.width() == 0 {
            return err(format!("ROI {} has no columns", p.roi));
        }
        if self.preprocessing.is_empty() {
            return err("module chain is empty".into());
        }
        if self.backprojector.name.trim().is_empty() {
            return err("no back-projector given".into());
        }
        if self.backprojector.slice_block == 0 {
            return err("slice block size must be positive".into());
        }
        if p.last_index < p.first_index {
            return err(format!("last projection index {} precedes first {}", p.last_index, p.first_index));
        }
        if p.step == 0 || p.binning == 0 {
            return err("projection step and binning must be positive".into());
        }
        if p.resolution <= mm(0.0) {
            return err("detector resolution must be positive".into());
        }
        if p.scan_arc[1] <= p.scan_arc[0] {
            return err(format!("scan arc {:?} is empty", p.scan_arc));
        }
        if p.geometry == BeamGeometry::Cone {
            match (p.sod, p.sdd) {
                (Some(sod), Some(sdd)) if sod > mm(0.0) && sdd > mm(0.0) => {
                    if sdd < sod {
                        log::warn!("source to detector distance is shorter than source to object distance");
                    }
                }
                _ => return err("cone beam needs positive sod and sdd".into()),
            }
            if matches!(self.matrix.voxel_size, Some(v) if v <= mm(0.0)) {
                return err("voxel size must be positive".into());
            }
        }
        let [lo, hi] = self.matrix.gray_interval;
        if self.matrix.file_type.is_quantized() && lo >= hi {
            return err(format!("gray interval [{lo}, {hi}] is empty"));
        }
        Ok(())
    }

    /// Index of the first reconstructed slice, in detector rows.
    pub fn first_slice(&self) -> usize {
        match self.projections.image_type {
            ImageType::Projections    => self.projections.roi.y0,
            ImageType::RepeatSinogram => 0,
        }
    }

    pub fn total_slices(&self) -> usize {
        let roi = &self.projections.roi;
        match self.projections.image_type {
            ImageType::Projections    => roi.height(),
            ImageType::RepeatSinogram => roi.y1,
        }
    }

    /// Edge length of the reconstructed voxels.
    pub fn voxel_size(&self) -> Length {
        let p = &self.projections;
        self.matrix.voxel_size.unwrap_or(match (p.geometry, p.sod, p.sdd) {
            (BeamGeometry::Cone, Some(sod), Some(sdd)) => p.resolution * sod / sdd,
            _ => p.resolution,
        })
    }

    pub fn margins(&self) -> Margins {
        Margins { parallel: self.projections.margin, cone: self.system.cone_margin }
    }

    /// Cone-beam description; `frame` supplies the default piercing point.
    pub fn cone_geometry(&self, frame: Roi) -> ConeGeometry {
        let p = &self.projections;
        let centre = [(frame.x0 + frame.x1) as f32 / 2.0, (frame.y0 + frame.y1) as f32 / 2.0];
        ConeGeometry {
            sod: p.sod.unwrap_or(mm(1.0)),
            sdd: p.sdd.unwrap_or(mm(1.0)),
            piercing_point: p.piercing_point.unwrap_or(centre),
            voxel_size: self.voxel_size(),
            resolution: p.resolution,
        }
    }

    /// Column of the rotation axis in detector coordinates.
    pub fn center(&self) -> f32 {
        let roi = &self.projections.roi;
        self.projections.center.unwrap_or((roi.x0 + roi.x1) as f32 / 2.0)
    }

    /// Estimate in MB of the memory needed to keep the whole run in memory:
    /// the volume, one block of back-projector buffer and all the projections.
    pub fn required_memory(&self, n_projections: usize) -> usize {
        let width  = self.projections.roi.width();
        let slices = self.total_slices();
        let block  = self.backprojector.slice_block.min(slices);
        let matrix      = width * width * slices;
        let buffer      = width * width * block;
        let projections = width * slices * n_projections;
        (matrix + buffer + projections) * std::mem::size_of::<f32>() / (1024 * 1024)
    }

    /// Make every relative path absolute by anchoring it at `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let anchor = |p: &mut PathBuf| if p.is_relative() { *p = base.join(&*p) };
        anchor(&mut self.projections.file_mask);
        if let Some(r) = self.projections.open_beam   .as_mut() { anchor(&mut r.file_mask) }
        if let Some(r) = self.projections.dark_current.as_mut() { anchor(&mut r.file_mask) }
        anchor(&mut self.matrix.destination);
    }
}

/// Read a configuration file, anchoring its relative paths at the directory
/// containing it.
pub fn read_config_file(path: impl AsRef<Path>) -> ReconResult<ReconConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| ReconError::Configuration(format!("couldn't read config file {}: {e}", path.display())))?;
    let mut config = parse_config(&text)?;
    let base = path.parent().unwrap_or(Path::new("."));
    config.resolve_paths(base);
    Ok(config)
}

pub fn parse_config(text: &str) -> ReconResult<ReconConfig> {
    toml::from_str(text).map_err(|e| ReconError::Configuration(e.to_string()))
}
