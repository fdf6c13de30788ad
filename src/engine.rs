//! The reconstruction engine.
//!
//! A run splits the slices of the configured ROI into blocks (`BlockPlan`)
//! and drives each block through
//!
//! 1. the geometry calculator, for the band of detector rows the block needs,
//!
//! 2. the projection reader,
//!
//! 3. the preprocessing stages, in configured order,
//!
//! 4. the back-projector,
//!
//! 5. the result sink: the in-memory volume, or files on disk.
//!
//! Blocks are processed one after the other. The interactor is asked at the
//! start of every block, and again before its back-projection, whether the
//! run should stop.
//!
//! When the volume is kept in memory, the preprocessed projections of every
//! block are retained, so that a later run which only changes back-projection
//! settings can skip reading and preprocessing.

mod blocks;
mod factory;
mod sink;

pub use blocks::{Block, BlockPlan};
pub use factory::EngineFactory;
pub use sink::{ResultSink, SliceWriter};

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use ndarray::{s, ArrayBase, Data, Dimension};

use crate::catalog::ProjectionCatalog;
use crate::config::{ImageType, MatrixConfig, PreprocessingKey, ReconConfig};
use crate::error::{ReconError, ReconResult, Stage};
use crate::image::{self, count_non_finite, Histogram, Plane};
use crate::interactor::Interactor;
use crate::module::{BackProjector, ModuleItem, ModuleResult, Preprocessor};
use crate::publication::Publication;
use crate::reader::{BlockParameters, FrameTransform, ProjectionReader};
use crate::types::{ProjectionStack, Slice, Volume};
use crate::utils::group_digits;
use geometry::{extended_roi, BeamGeometry, Roi};
use units::mm_;

/// Where the engine is in its life cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    /// Working on the full block with this index
    RunningBlock(usize),
    /// Working on the shorter block after the full ones
    RunningFinalBlock,
    Done,
    Cancelled,
    Failed,
}

/// How a run that did not fail ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Done,
    Cancelled,
}

/// Preprocessed projections of one block.
#[derive(Clone, Debug)]
pub struct ProjectionBlock {
    pub stack : ProjectionStack,
    /// Output slices of the block
    pub roi   : Roi,
    pub params: BlockParameters,
}

pub struct ReconEngine {
    config        : Option<ReconConfig>,
    preprocessing : Vec<ModuleItem<dyn Preprocessor>>,
    back_projector: Option<ModuleItem<dyn BackProjector>>,
    reader        : Box<dyn ProjectionReader>,
    interactor    : Box<dyn Interactor>,
    catalog       : ProjectionCatalog,
    /// Detector region within which projections may be read
    frame         : Roi,
    retained      : Vec<ProjectionBlock>,
    /// Settings the retained blocks were preprocessed with
    retained_key  : Option<PreprocessingKey>,
    sink          : Option<ResultSink>,
    state         : EngineState,
    diagnostics   : Vec<String>,
}

impl ReconEngine {

    pub fn new(reader: Box<dyn ProjectionReader>, interactor: Box<dyn Interactor>) -> Self {
        Self {
            config        : None,
            preprocessing : Vec::new(),
            back_projector: None,
            reader,
            interactor,
            catalog       : ProjectionCatalog::default(),
            frame         : Roi::default(),
            retained      : Vec::new(),
            retained_key  : None,
            sink          : None,
            state         : EngineState::Idle,
            diagnostics   : Vec::new(),
        }
    }

    // ----- Setup ---------------------------------------------------------------------------

    /// Take a copy of `config` for the next run. Retained projections survive
    /// only if none of the settings affecting preprocessing changed.
    pub fn set_config(&mut self, config: ReconConfig) {
        if !self.retained.is_empty() && self.retained_key.as_ref() != Some(&config.preprocessing_key()) {
            info!("Preprocessing settings changed: dropping {} retained blocks", self.retained.len());
            self.drop_retained();
        }
        if self.check_modules(&config).is_ok() {
            for (item, module) in self.preprocessing.iter_mut().zip(&config.preprocessing) {
                item.set_parameters(module.parameters.clone());
            }
            if let Some(bp) = self.back_projector.as_mut() {
                bp.set_parameters(config.backprojector.parameters.clone());
            }
        } else {
            warn!("Configured modules differ from the loaded ones: the engine must be rebuilt before running");
        }
        self.config = Some(config);
    }

    /// Whether the loaded modules are those `config` names, in the same
    /// order. Modules are only loaded by the factory, so a configuration
    /// with another chain needs a new engine.
    pub fn check_modules(&self, config: &ReconConfig) -> ReconResult<()> {
        let loaded: Vec<&str> = self.preprocessing.iter().map(|m| m.name())
            .chain(self.back_projector.iter().map(|m| m.name()))
            .collect();
        let configured: Vec<&str> = config.preprocessing.iter().map(|m| m.name.as_str())
            .chain(Some(config.backprojector.name.as_str()))
            .collect();
        if loaded != configured {
            return Err(ReconError::configuration(format!(
                "configured modules [{}] differ from loaded [{}]: rebuild the engine",
                configured.join(", "), loaded.join(", "))));
        }
        Ok(())
    }

    pub fn config(&self) -> Option<&ReconConfig> { self.config.as_ref() }

    /// Append a stage to the preprocessing chain.
    pub fn add_preproc_module(&mut self, item: ModuleItem<dyn Preprocessor>) {
        debug!("Adding preprocessing module {}", item.name());
        self.drop_retained();
        self.preprocessing.push(item);
    }

    pub fn set_back_projector(&mut self, item: ModuleItem<dyn BackProjector>) {
        debug!("Using back-projector {}", item.name());
        self.back_projector = Some(item);
    }

    fn drop_retained(&mut self) {
        self.retained.clear();
        self.retained_key = None;
    }

    // ----- Running -------------------------------------------------------------------------

    /// Reconstruct the whole configured volume.
    pub fn run(&mut self) -> ReconResult<RunStatus> { self.run_3d(false) }

    /// Reconstruct the whole configured volume. With `rerun_backprojection`,
    /// projections retained from the previous run are back-projected again,
    /// without reading or preprocessing, provided they are still valid.
    pub fn run_3d(&mut self, rerun_backprojection: bool) -> ReconResult<RunStatus> {
        let config = self.config.clone()
            .ok_or_else(|| ReconError::configuration("no configuration has been set"))?;
        self.diagnostics.clear();
        self.state = EngineState::Idle;
        let start = Instant::now();

        let outcome = self.execute(&config, rerun_backprojection)
            .and_then(|status| match status {
                RunStatus::Done      => self.finish(&config, start.elapsed()).map(|_| status),
                RunStatus::Cancelled => Ok(status),
            });
        match outcome {
            Ok(RunStatus::Done) => Ok(RunStatus::Done),
            Ok(RunStatus::Cancelled) => {
                self.state = EngineState::Cancelled;
                info!("Reconstruction cancelled");
                self.diagnostics.push("cancelled by user".into());
                Ok(RunStatus::Cancelled)
            }
            Err(e) => {
                self.state = EngineState::Failed;
                error!("{e}");
                self.diagnostics.push(e.to_string());
                Err(e)
            }
        }
    }

    fn execute(&mut self, config: &ReconConfig, rerun_backprojection: bool) -> ReconResult<RunStatus> {
        config.validate()?;
        if self.preprocessing.is_empty() {
            return Err(ReconError::configuration("no preprocessing modules loaded"));
        }
        if self.back_projector.is_none() {
            return Err(ReconError::configuration("no back-projector loaded"));
        }
        self.check_modules(config)?;
        for m in self.preprocessing.iter_mut() { m.reset_timer() }
        if let Some(bp) = self.back_projector.as_mut() { bp.reset_timer() }

        let key = config.preprocessing_key();
        let plan = BlockPlan::new(config.first_slice(), config.total_slices(), config.backprojector.slice_block);
        if rerun_backprojection {
            if self.retained_key.as_ref() == Some(&key) && self.retained.len() == plan.len() {
                return self.replay(config, &plan);
            }
            info!("No valid preprocessed projections retained: running all stages");
        }
        self.full_run(config, &plan, key)
    }

    fn full_run(&mut self, config: &ReconConfig, plan: &BlockPlan, key: PreprocessingKey) -> ReconResult<RunStatus> {
        self.drop_retained();
        self.catalog = ProjectionCatalog::build(&config.projections)?;
        self.frame = self.projection_frame(config)?;
        let p = &config.projections;
        if !self.frame.contains(&p.roi) {
            return Err(ReconError::configuration(format!("ROI {} lies outside the projection frame {}", p.roi, self.frame)));
        }

        let module_config = self.module_config(config);
        self.configure_preprocessing(&module_config).map_err(|e| e.during("configuration"))?;
        self.configure_back_projector(&module_config).map_err(|e| e.during("configuration"))?;
        let sink = self.open_sink(config)?;
        let retain = sink.is_memory();
        self.sink = Some(sink);

        info!("Reconstructing {} slices from {} projections: {} blocks of {} and {} left over",
              group_digits(plan.total()), group_digits(self.catalog.len()), plan.full_blocks(),
              config.backprojector.slice_block, plan.remainder());

        for block in plan.iter() {
            self.state = block_state(plan, &block);
            if self.interactor.set_overall_progress(block.index as f32 / plan.len() as f32) {
                return Ok(RunStatus::Cancelled);
            }
            let prepared = self.prepare_block(config, &block).map_err(|e| e.during(block_context(&block)))?;
            let status = self.back_project(config, plan, &block, &prepared).map_err(|e| e.during(block_context(&block)))?;
            if status == RunStatus::Cancelled { return Ok(status) }
            if retain { self.retained.push(prepared) }
        }
        if retain { self.retained_key = Some(key) }
        Ok(RunStatus::Done)
    }

    /// Back-project the retained blocks again.
    fn replay(&mut self, config: &ReconConfig, plan: &BlockPlan) -> ReconResult<RunStatus> {
        info!("Back-projecting {} retained blocks", self.retained.len());
        let module_config = self.module_config(config);
        self.configure_back_projector(&module_config).map_err(|e| e.during("configuration"))?;
        self.sink = Some(self.open_sink(config)?);

        let blocks = std::mem::take(&mut self.retained);
        let outcome = self.replay_blocks(config, plan, &blocks);
        self.retained = blocks;
        outcome
    }

    fn replay_blocks(&mut self, config: &ReconConfig, plan: &BlockPlan, blocks: &[ProjectionBlock]) -> ReconResult<RunStatus> {
        for (block, prepared) in plan.iter().zip(blocks) {
            self.state = block_state(plan, &block);
            if self.interactor.set_overall_progress(block.index as f32 / plan.len() as f32) {
                return Ok(RunStatus::Cancelled);
            }
            let status = self.back_project(config, plan, &block, prepared).map_err(|e| e.during(block_context(&block)))?;
            if status == RunStatus::Cancelled { return Ok(status) }
        }
        Ok(RunStatus::Done)
    }

    /// Read and preprocess the projections needed by `block`.
    fn prepare_block(&mut self, config: &ReconConfig, block: &Block) -> ReconResult<ProjectionBlock> {
        let p = &config.projections;
        let geometry = p.geometry;
        let cb_roi = block.roi(&p.roi);
        let read_roi = match p.image_type {
            ImageType::Projections    => extended_roi(geometry, cb_roi, &config.cone_geometry(self.frame), self.frame, config.margins())?,
            ImageType::RepeatSinogram => cb_roi,
        };
        debug!("Block {}: slices {:?}, reading rows {:?}", block.index, cb_roi.rows(), read_roi.rows());

        let (mut stack, mut params) = self.reader.read_stack(config, &self.catalog, &read_roi)?;
        let validate = config.system.validate_data;
        let mut notes = Vec::new();
        if validate { notes.extend(non_finite_report("projections as read", &stack)) }

        for m in self.preprocessing.iter_mut() {
            let result = m.timed(|m| m.set_roi(&read_roi));
            attribute(result, m.name(), Stage::SetRoi, geometry, read_roi)?;
        }
        for m in self.preprocessing.iter_mut() {
            let result = m.timed(|m| m.process(&mut stack, &mut params));
            attribute(result, m.name(), Stage::Process, geometry, read_roi)?;
            if validate { notes.extend(non_finite_report(&format!("after {}", m.name()), &stack)) }
        }
        self.note(notes);

        // Parallel rays: slices only need their own rows, so the margin goes
        let (stack, stack_roi) = match geometry {
            BeamGeometry::Cone => (stack, read_roi),
            _ => {
                let offset = cb_roi.y0 - read_roi.y0;
                (stack.slice(s![.., offset..offset + cb_roi.height(), ..]).to_owned(), cb_roi)
            }
        };
        params.stack_roi = stack_roi;
        Ok(ProjectionBlock { stack, roi: cb_roi, params })
    }

    fn back_project(&mut self, config: &ReconConfig, plan: &BlockPlan, block: &Block, prepared: &ProjectionBlock)
                    -> ReconResult<RunStatus> {
        if self.interactor.set_overall_progress((block.index as f32 + 0.9) / plan.len() as f32) {
            return Ok(RunStatus::Cancelled);
        }
        let geometry = config.projections.geometry;
        let bp = self.back_projector.as_mut()
            .ok_or_else(|| ReconError::configuration("no back-projector loaded"))?;
        let result = bp.timed(|m| m.set_roi(&prepared.roi));
        attribute(result, bp.name(), Stage::SetRoi, geometry, prepared.roi)?;
        let result = bp.timed(|m| m.process(&prepared.stack, &prepared.params));
        attribute(result, bp.name(), Stage::BackProject, geometry, prepared.roi)?;

        let slices = bp.module().volume();
        if config.system.validate_data {
            let notes = non_finite_report(&format!("slices from {}", bp.name()), &slices);
            for note in notes { warn!("{note}"); self.diagnostics.push(note) }
        }
        let sink = self.sink.as_mut()
            .ok_or_else(|| ReconError::configuration("no result sink"))?;
        sink.store(block.first - config.first_slice(), slices)?;
        Ok(RunStatus::Done)
    }

    fn note(&mut self, notes: Vec<String>) {
        for note in notes {
            warn!("{note}");
            self.diagnostics.push(note);
        }
    }

    /// Everything after the last block of a successful run.
    fn finish(&mut self, config: &ReconConfig, elapsed: Duration) -> ReconResult<()> {
        if config.matrix.automatic_serialize && self.sink.as_ref().map_or(false, ResultSink::is_memory) {
            self.serialize(&config.matrix)?;
        }
        self.report_times(config, elapsed);
        self.state = EngineState::Done;
        self.interactor.set_overall_progress(1.0);
        self.interactor.done();
        let citations = config.matrix.destination.join("citations.txt");
        if let Err(e) = self.write_publication_list(&citations) {
            warn!("{e}");
            self.diagnostics.push(e.to_string());
        }
        Ok(())
    }

    fn report_times(&self, config: &ReconConfig, elapsed: Duration) {
        let items = self.preprocessing.iter().map(|m| (m.name(), m.exec_time()))
            .chain(self.back_projector.iter().map(|m| (m.name(), m.exec_time())));
        for (name, time) in items {
            info!("{name:>16}: {:.3} s", time.as_secs_f64());
        }
        let total = elapsed.as_secs_f64();
        let slices = config.total_slices().max(1);
        info!("Reconstructed {} slices in {total:.2} s ({:.4} s/slice)", group_digits(slices), total / slices as f64);
    }

    // ----- Run preparation -----------------------------------------------------------------

    /// The projection ROI, or the whole frame of the first projection.
    fn projection_frame(&self, config: &ReconConfig) -> ReconResult<Roi> {
        let p = &config.projections;
        if let Some(roi) = p.projection_roi { return Ok(roi) }
        let first = self.catalog.first()
            .ok_or_else(|| ReconError::configuration("no projections in catalog"))?;
        let [height, width] = self.reader.image_size(&first.path, p.binning)?;
        let [height, width] = FrameTransform::from(p).rotated_dims([height, width]);
        Ok(Roi::full(width, height))
    }

    /// The configuration seen by modules: the projection frame is filled in.
    fn module_config(&self, config: &ReconConfig) -> ReconConfig {
        let mut config = config.clone();
        config.projections.projection_roi = Some(self.frame);
        config
    }

    fn configure_preprocessing(&mut self, config: &ReconConfig) -> ReconResult<()> {
        let geometry = config.projections.geometry;
        let roi = config.projections.roi;
        for m in self.preprocessing.iter_mut() {
            let result = m.configure(config);
            attribute(result, m.name(), Stage::Configure, geometry, roi)?;
            if !m.module().valid() {
                return attribute(Err("not valid after configuration".into()), m.name(), Stage::Configure, geometry, roi);
            }
        }
        Ok(())
    }

    fn configure_back_projector(&mut self, config: &ReconConfig) -> ReconResult<()> {
        let geometry = config.projections.geometry;
        let roi = config.projections.roi;
        let bp = self.back_projector.as_mut()
            .ok_or_else(|| ReconError::configuration("no back-projector loaded"))?;
        let result = bp.configure(config);
        attribute(result, bp.name(), Stage::Configure, geometry, roi)?;
        if !bp.module().valid() {
            return attribute(Err("not valid after configuration".into()), bp.name(), Stage::Configure, geometry, roi);
        }
        Ok(())
    }

    /// Keep the volume in memory unless it is allowed to go to disk and does
    /// not fit the memory budget.
    fn open_sink(&self, config: &ReconConfig) -> ReconResult<ResultSink> {
        let dims = matrix_dims(config);
        let required = config.required_memory(self.catalog.len());
        let budget = config.system.memory;
        if config.matrix.automatic_serialize && required > budget {
            info!("Needs {required} MB of a {budget} MB budget: writing slices to {}", config.matrix.destination.display());
            let writer = SliceWriter::new(&config.matrix, dims, config.first_slice(), mm_(config.voxel_size()))?;
            Ok(ResultSink::Disk(writer))
        } else {
            if required > budget { warn!("Needs {required} MB, more than the {budget} MB budget") }
            info!("Needs {required} MB: keeping the volume in memory");
            Ok(ResultSink::memory(dims))
        }
    }

    // ----- Results -------------------------------------------------------------------------

    /// Write the in-memory volume to disk as described by `matrix`.
    pub fn serialize(&self, matrix: &MatrixConfig) -> ReconResult<()> {
        let config = self.config.as_ref()
            .ok_or_else(|| ReconError::configuration("no configuration has been set"))?;
        let volume = self.volume()
            .ok_or_else(|| ReconError::configuration("no volume in memory to serialize"))?;
        let (nz, ny, nx) = volume.dim();
        let writer = SliceWriter::new(matrix, [nx, ny, nz], config.first_slice(), mm_(config.voxel_size()))?;
        writer.write(0, volume.view())?;
        info!("Volume written to {}", writer.path().display());
        Ok(())
    }

    pub fn state(&self) -> EngineState { self.state }

    /// Messages about the last run: failures, data validation findings,
    /// cancellation.
    pub fn diagnostics(&self) -> &[String] { &self.diagnostics }

    /// The reconstructed volume, `[slice, y, x]`, when kept in memory.
    pub fn volume(&self) -> Option<&Volume> {
        self.sink.as_ref().and_then(ResultSink::volume)
    }

    pub fn slice(&self, index: usize, plane: Plane) -> Option<Slice> {
        self.volume().and_then(|v| image::slice(v, index, plane))
    }

    /// Histogram of the volume in memory, or else of the last block.
    pub fn histogram(&self, bins: usize) -> Histogram {
        match (self.volume(), &self.back_projector) {
            (Some(v), _)     => image::histogram(v, bins),
            (None, Some(bp)) => bp.module().histogram(bins),
            (None, None)     => Histogram::default(),
        }
    }

    /// `[nx, ny, nz]` of the volume the current configuration produces.
    pub fn matrix_dims(&self) -> Option<[usize; 3]> {
        self.config.as_ref().map(matrix_dims)
    }

    /// Number of blocks available for back-projection-only reruns.
    pub fn retained_blocks(&self) -> usize { self.retained.len() }

    pub fn preprocessing_modules(&self) -> &[ModuleItem<dyn Preprocessor>] { &self.preprocessing }

    pub fn back_projector(&self) -> Option<&ModuleItem<dyn BackProjector>> { self.back_projector.as_ref() }

    // ----- Citations -----------------------------------------------------------------------

    pub fn engine_publications() -> Vec<Publication> {
        vec![
            Publication::new(&["A.P. Kaestner"],
                             "MuhRec - A new tomography reconstructor",
                             "Nuclear Instruments and Methods in Physics Research Section A",
                             2011, 651, 1, "156-160", "10.1016/j.nima.2011.01.129"),
        ]
    }

    /// Engine references followed by those of every loaded module.
    pub fn publication_list(&self) -> Vec<Publication> {
        let mut list = Self::engine_publications();
        list.extend(self.preprocessing.iter().flat_map(|m| m.module().publications()));
        list.extend(self.back_projector.iter().flat_map(|m| m.module().publications()));
        list
    }

    /// References as text, grouped by the part of the run they belong to.
    pub fn citations(&self) -> String {
        let mut text = String::from("Reconstruction engine\n");
        for p in Self::engine_publications() { let _ = writeln!(text, "    {p}"); }
        text.push_str("\nPreprocessing\n");
        for m in &self.preprocessing {
            cite_module(&mut text, m.name(), &m.module().publications());
        }
        text.push_str("\nBack-projector\n");
        for m in &self.back_projector {
            cite_module(&mut text, m.name(), &m.module().publications());
        }
        text
    }

    pub fn write_publication_list(&self, path: &Path) -> ReconResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| ReconError::serialization(dir, e))?;
        }
        fs::write(path, self.citations()).map_err(|e| ReconError::serialization(path, e))?;
        debug!("Citations written to {}", path.display());
        Ok(())
    }
}

fn cite_module(text: &mut String, name: &str, publications: &[Publication]) {
    let _ = writeln!(text, "    {name}");
    if publications.is_empty() {
        text.push_str("        no references\n");
    }
    for p in publications { let _ = writeln!(text, "        {p}"); }
}

fn matrix_dims(config: &ReconConfig) -> [usize; 3] {
    let width = config.projections.roi.width();
    [width, width, config.total_slices()]
}

fn block_state(plan: &BlockPlan, block: &Block) -> EngineState {
    if plan.is_remainder(block) { EngineState::RunningFinalBlock } else { EngineState::RunningBlock(block.index) }
}

fn block_context(block: &Block) -> String {
    format!("block {} (slices {:?})", block.index, block.rows())
}

/// Attribute a module's failure to the module, its stage and the data it was
/// working on.
fn attribute<T>(result: ModuleResult<T>, module: &str, stage: Stage, geometry: BeamGeometry, roi: Roi) -> ReconResult<T> {
    result.map_err(|e| ReconError::ModuleFailure {
        module: module.into(),
        stage,
        geometry,
        roi,
        message: e.to_string(),
    })
}

fn non_finite_report<S, D>(what: &str, data: &ArrayBase<S, D>) -> Option<String>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let found = count_non_finite(data);
    found.any().then(|| format!("{what}: {} NaN and {} infinite values", found.nan, found.inf))
}
