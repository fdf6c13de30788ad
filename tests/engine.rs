//! End-to-end runs of the engine with scripted readers, stages and
//! interactors.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Mutex};

use float_eq::assert_float_eq;
use ndarray::{s, Array3, ArrayView3, Axis};
use pretty_assertions::assert_eq;

use tomorec::config::parse_config;
use tomorec::error::ReadResult;
use tomorec::io::stack::read_slice_stack;
use tomorec::parameters::Parameters;
use tomorec::reader::FrameTransform;
use tomorec::types::{Projection, ProjectionStack};
use tomorec::{BackProjector, BlockParameters, EngineFactory, EngineState, ErrorKind, Interactor, Module,
              ModuleRegistry, ModuleResult, Preprocessor, ProjectionReader, ReconConfig, ReconEngine, Roi, RunStatus};

const FRAME: [usize; 2] = [120, 256];

// ----- Scripted collaborators ------------------------------------------------------------

/// Frames whose pixels hold their row number plus one. Records the rows of
/// every read.
#[derive(Clone, Default)]
struct Reader {
    reads: Arc<AtomicUsize>,
    rows : Arc<Mutex<Vec<Range<usize>>>>,
}

impl ProjectionReader for Reader {
    fn read(&self, _: &Path, _: &FrameTransform, roi: Option<&Roi>) -> ReadResult<Projection> {
        let [height, width] = FRAME;
        let roi = roi.copied().unwrap_or(Roi::full(width, height));
        self.reads.fetch_add(1, SeqCst);
        self.rows.lock().unwrap().push(roi.rows());
        Ok(Projection::from_shape_fn((roi.height(), roi.width()), |(r, _)| (roi.y0 + r + 1) as f32))
    }

    fn image_size(&self, _: &Path, _: usize) -> ReadResult<[usize; 2]> { Ok(FRAME) }
}

/// Counts the blocks it processes.
struct Count(Arc<AtomicUsize>);

impl Module for Count {
    fn name(&self) -> &str { "Count" }
    fn configure(&mut self, _: &ReconConfig, _: &Parameters) -> ModuleResult<()> { Ok(()) }
    fn set_roi(&mut self, _: &Roi) -> ModuleResult<()> { Ok(()) }
}

impl Preprocessor for Count {
    fn process(&mut self, _: &mut ProjectionStack, _: &mut BlockParameters) -> ModuleResult<()> {
        self.0.fetch_add(1, SeqCst);
        Ok(())
    }
}

/// Refuses the block starting at row `row`.
struct Fail { row: usize, current: usize }

impl Module for Fail {
    fn name(&self) -> &str { "Fail" }
    fn configure(&mut self, _: &ReconConfig, _: &Parameters) -> ModuleResult<()> { Ok(()) }
    fn set_roi(&mut self, roi: &Roi) -> ModuleResult<()> { self.current = roi.y0; Ok(()) }
}

impl Preprocessor for Fail {
    fn process(&mut self, _: &mut ProjectionStack, _: &mut BlockParameters) -> ModuleResult<()> {
        if self.current == self.row { Err(format!("refusing rows from {}", self.row).into()) } else { Ok(()) }
    }
}

/// Fails to configure.
struct Refuse;

impl Module for Refuse {
    fn name(&self) -> &str { "Refuse" }
    fn configure(&mut self, _: &ReconConfig, _: &Parameters) -> ModuleResult<()> { Err("no references found".into()) }
    fn set_roi(&mut self, _: &Roi) -> ModuleResult<()> { Ok(()) }
}

impl Preprocessor for Refuse {
    fn process(&mut self, _: &mut ProjectionStack, _: &mut BlockParameters) -> ModuleResult<()> { Ok(()) }
}

/// Puts a NaN in the first pixel of every block.
struct Poison;

impl Module for Poison {
    fn name(&self) -> &str { "Poison" }
    fn configure(&mut self, _: &ReconConfig, _: &Parameters) -> ModuleResult<()> { Ok(()) }
    fn set_roi(&mut self, _: &Roi) -> ModuleResult<()> { Ok(()) }
}

impl Preprocessor for Poison {
    fn process(&mut self, stack: &mut ProjectionStack, _: &mut BlockParameters) -> ModuleResult<()> {
        stack[[0, 0, 0]] = f32::NAN;
        Ok(())
    }
}

/// `(slices, detector rows of the stack)` of every back-projected block
type Seen = Arc<Mutex<Vec<(Roi, Roi)>>>;

/// Fills every voxel of slice `s` of a block with the detector row number of
/// that slice plus one.
#[derive(Default)]
struct Stamp {
    roi   : Roi,
    volume: Array3<f32>,
    seen  : Seen,
}

impl Module for Stamp {
    fn name(&self) -> &str { "Stamp" }
    fn configure(&mut self, _: &ReconConfig, _: &Parameters) -> ModuleResult<()> { Ok(()) }
    fn set_roi(&mut self, roi: &Roi) -> ModuleResult<()> {
        self.roi = *roi;
        self.volume = Array3::zeros((roi.height(), roi.width(), roi.width()));
        Ok(())
    }
}

impl BackProjector for Stamp {
    fn process(&mut self, stack: &ProjectionStack, params: &BlockParameters) -> ModuleResult<()> {
        if stack.len_of(Axis(1)) != params.stack_roi.height() || !params.stack_roi.contains(&self.roi) {
            return Err(format!("stack {:?} at {} does not cover {}", stack.dim(), params.stack_roi, self.roi).into());
        }
        self.seen.lock().unwrap().push((self.roi, params.stack_roi));
        for (s, mut slice) in self.volume.axis_iter_mut(Axis(0)).enumerate() {
            slice.fill((self.roi.y0 + s + 1) as f32);
        }
        Ok(())
    }
    fn n_slices(&self) -> usize { self.volume.len_of(Axis(0)) }
    fn volume(&self) -> ArrayView3<'_, f32> { self.volume.view() }
}

/// Asks to stop once progress reaches `stop_at`.
#[derive(Clone, Default)]
struct Script {
    stop_at: Option<f32>,
    done   : Arc<AtomicBool>,
}

impl Interactor for Script {
    fn set_overall_progress(&self, fraction: f32) -> bool {
        self.stop_at.map_or(false, |stop| fraction >= stop)
    }
    fn done(&self) { self.done.store(true, SeqCst) }
}

// ----- Setup -----------------------------------------------------------------------------

struct Rig {
    engine : ReconEngine,
    reader : Reader,
    counted: Arc<AtomicUsize>,
    done   : Arc<AtomicBool>,
    seen   : Seen,
    config : ReconConfig,
    _dir   : tempfile::TempDir,
}

fn config_text(dest: &Path, roi: &str, projections: &str, matrix: &str, stages: &[&str]) -> String {
    let stages = stages.iter().map(|name| format!("[[preprocessing]]\nname = \"{name}\"\n")).collect::<String>();
    format!(r#"
        [projections]
        file_mask   = "p_##.trf"
        first_index = 0
        last_index  = 3
        resolution  = "1 mm"
        roi         = {roi}
        {projections}
        [matrix]
        destination = "{}"
        file_mask   = "s_###.trf"
        {matrix}
        {stages}
        [backprojector]
        name        = "Stamp"
        slice_block = 10
    "#, dest.display())
}

fn rig(roi: &str, projections: &str, matrix: &str, stages: &[&str], stop_at: Option<f32>) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let config = parse_config(&config_text(dir.path(), roi, projections, matrix, stages)).unwrap();

    let counted = Arc::new(AtomicUsize::new(0));
    let mut registry = ModuleRegistry::empty();
    let c = counted.clone();
    registry.register_preprocessor("Count", move || Box::new(Count(c.clone())));
    registry.register_preprocessor("Fail", || Box::new(Fail { row: 20, current: 0 }));
    registry.register_preprocessor("Refuse", || Box::new(Refuse));
    registry.register_preprocessor("Poison", || Box::new(Poison));
    let seen = Seen::default();
    let s = seen.clone();
    registry.register_back_projector("Stamp", move || Box::new(Stamp { seen: s.clone(), ..Stamp::default() }));

    let reader = Reader::default();
    let script = Script { stop_at, ..Script::default() };
    let done = script.done.clone();
    let engine = EngineFactory::build_engine(&config, &registry, Box::new(reader.clone()), Box::new(script)).unwrap();
    Rig { engine, reader, counted, done, seen, config, _dir: dir }
}

fn destination(rig: &Rig) -> PathBuf { rig.config.matrix.destination.clone() }

/// Value the stamping back-projector leaves in slice `s` of a run starting
/// at detector row `first`.
fn stamped(first: usize, s: usize) -> f32 { (first + s + 1) as f32 }

// ----- Runs ------------------------------------------------------------------------------

#[test]
fn ninety_seven_slices_in_blocks_of_ten() {
    let mut rig = rig("[0, 10, 8, 107]", "", "", &["Count"], None);
    assert_eq!(rig.engine.run().unwrap(), RunStatus::Done);
    assert_eq!(rig.engine.state(), EngineState::Done);
    assert!(rig.done.load(SeqCst));

    let volume = rig.engine.volume().unwrap();
    assert_eq!(volume.dim(), (97, 8, 8));
    for (s, slice) in volume.axis_iter(Axis(0)).enumerate() {
        assert!(slice.iter().all(|&v| v == stamped(10, s)), "slice {s}");
    }
    assert_eq!(rig.counted.load(SeqCst), 10);
    assert_eq!(rig.reader.reads.load(SeqCst), 10 * 4);
    assert_eq!(rig.engine.retained_blocks(), 10);
    assert!(rig.engine.diagnostics().is_empty());

    let citations = std::fs::read_to_string(destination(&rig).join("citations.txt")).unwrap();
    assert!(citations.contains("Kaestner"));
    assert!(citations.contains("Stamp"));
}

#[test]
fn cancellation_keeps_finished_blocks() {
    let mut rig = rig("[0, 0, 8, 97]", "", "", &["Count"], Some(0.3));
    assert_eq!(rig.engine.run().unwrap(), RunStatus::Cancelled);
    assert_eq!(rig.engine.state(), EngineState::Cancelled);
    assert!(!rig.done.load(SeqCst));
    assert!(rig.engine.diagnostics().iter().any(|d| d.contains("cancelled")));

    let volume = rig.engine.volume().unwrap();
    for s in 0..30 { assert_float_eq!(volume[[s, 3, 3]], stamped(0, s), abs <= 0.0) }
    assert_eq!(volume.slice(s![30.., .., ..]).sum(), 0.0);
    assert_eq!(rig.counted.load(SeqCst), 3);
    assert!(!destination(&rig).join("citations.txt").exists());
}

#[test]
fn cancellation_before_back_projection() {
    // Ten blocks: the second poll of the first block comes at 0.09
    let mut rig = rig("[0, 0, 8, 97]", "", "", &["Count"], Some(0.085));
    assert_eq!(rig.engine.run().unwrap(), RunStatus::Cancelled);
    assert_eq!(rig.engine.state(), EngineState::Cancelled);
    assert_eq!(rig.counted.load(SeqCst), 1);
    assert!(rig.seen.lock().unwrap().is_empty());
    assert_eq!(rig.engine.volume().unwrap().sum(), 0.0);
    assert_eq!(rig.engine.retained_blocks(), 0);
    assert!(!rig.done.load(SeqCst));
}

#[test]
fn failing_stage_is_named() {
    let mut rig = rig("[0, 0, 8, 50]", "", "", &["Count", "Fail"], None);
    let err = rig.engine.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReconstructionFailure);
    assert_eq!(err.root().kind(), ErrorKind::ModuleFailure);
    assert_eq!(err.module_name(), Some("Fail"));
    assert_eq!(rig.engine.state(), EngineState::Failed);

    let text = rig.engine.diagnostics().join("\n");
    assert!(text.contains("Fail"), "{text}");
    assert!(text.contains("refusing rows from 20"), "{text}");
    assert!(text.contains("block 2"), "{text}");
    // Blocks 0 and 1 went through both stages, block 2 only through the first
    assert_eq!(rig.counted.load(SeqCst), 3);
}

#[test]
fn back_projection_only_rerun_skips_reading() {
    let mut rig = rig("[0, 0, 8, 25]", "", "", &["Count"], None);
    rig.engine.run().unwrap();
    let (reads, counted) = (rig.reader.reads.load(SeqCst), rig.counted.load(SeqCst));
    assert_eq!(rig.engine.retained_blocks(), 3);

    let mut moved = rig.config.clone();
    moved.projections.center = Some(3.5);
    moved.matrix.rotation = 30.0;
    rig.engine.set_config(moved.clone());
    assert_eq!(rig.engine.run_3d(true).unwrap(), RunStatus::Done);
    assert_eq!(rig.reader.reads.load(SeqCst), reads);
    assert_eq!(rig.counted.load(SeqCst), counted);
    assert_float_eq!(rig.engine.volume().unwrap()[[24, 0, 0]], stamped(0, 24), abs <= 0.0);
    assert_eq!(rig.engine.retained_blocks(), 3);

    // Without the flag everything runs again
    rig.engine.run().unwrap();
    assert_eq!(rig.reader.reads.load(SeqCst), 2 * reads);

    // Preprocessing parameters invalidate the retained blocks
    let mut retuned = moved;
    retuned.preprocessing[0].parameters.insert("gain".into(), "2".into());
    rig.engine.set_config(retuned);
    assert_eq!(rig.engine.retained_blocks(), 0);
    rig.engine.run_3d(true).unwrap();
    assert_eq!(rig.reader.reads.load(SeqCst), 3 * reads);
    assert_eq!(rig.counted.load(SeqCst), 3 * counted);
}

#[test]
fn repeated_sinogram_reads_one_row() {
    let mut rig = rig("[0, 5, 8, 25]", r#"image_type = "repeat_sinogram""#, "", &["Count"], None);
    rig.engine.run().unwrap();
    assert_eq!(rig.engine.volume().unwrap().dim(), (25, 8, 8));
    assert_eq!(rig.reader.reads.load(SeqCst), 3 * 4);
    assert!(rig.reader.rows.lock().unwrap().iter().all(|rows| *rows == (5..6)));
}

#[test]
fn in_memory_volume_is_serialized_on_request() {
    let mut rig = rig("[0, 10, 8, 107]", "", "", &["Count"], None);
    rig.engine.run().unwrap();
    assert!(!destination(&rig).join("s_010.trf").exists());

    let matrix = rig.config.matrix.clone();
    rig.engine.serialize(&matrix).unwrap();
    let back = read_slice_stack(&destination(&rig).join("s_###.trf"), 10, 97).unwrap();
    assert_eq!(&back, rig.engine.volume().unwrap());
}

#[test]
fn large_volumes_stream_to_disk() {
    let mut rig = rig("[0, 0, 256, 40]", "", "automatic_serialize = true\n[system]\nmemory = 0", &["Count"], None);
    assert_eq!(rig.engine.run().unwrap(), RunStatus::Done);
    assert!(rig.engine.volume().is_none());
    assert_eq!(rig.engine.retained_blocks(), 0);

    let back = read_slice_stack(&destination(&rig).join("s_###.trf"), 0, 40).unwrap();
    assert_eq!(back.dim(), (40, 256, 256));
    for s in [0, 9, 10, 39] {
        assert_float_eq!(back[[s, 100, 200]], stamped(0, s), abs <= 0.0);
    }
}

#[test]
fn roi_outside_frame_is_refused() {
    let mut rig = rig("[0, 100, 8, 130]", "", "", &["Count"], None);
    let err = rig.engine.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(rig.engine.state(), EngineState::Failed);
    assert_eq!(rig.reader.reads.load(SeqCst), 0);
}

#[test]
fn failed_configuration_names_the_module() {
    let mut rig = rig("[0, 0, 8, 20]", "", "", &["Count", "Refuse"], None);
    let err = rig.engine.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReconstructionFailure);
    assert_eq!(err.root().kind(), ErrorKind::ModuleFailure);
    assert_eq!(err.module_name(), Some("Refuse"));
    let text = err.to_string();
    assert!(text.contains("configuration"), "{text}");
    assert!(text.contains("no references found"), "{text}");
    assert_eq!(rig.engine.state(), EngineState::Failed);
    assert_eq!(rig.reader.reads.load(SeqCst), 0);
}

#[test]
fn other_module_chain_needs_a_new_engine() {
    let mut rig = rig("[0, 0, 8, 20]", "", "", &["Count"], None);
    rig.engine.run().unwrap();
    let (reads, counted) = (rig.reader.reads.load(SeqCst), rig.counted.load(SeqCst));
    assert!(rig.engine.check_modules(&rig.config).is_ok());

    let mut renamed = rig.config.clone();
    renamed.preprocessing[0].name = "Fail".into();
    let mut longer = rig.config.clone();
    longer.preprocessing.push(rig.config.preprocessing[0].clone());
    let mut other_bp = rig.config.clone();
    other_bp.backprojector.name = "ParallelFbp".into();

    for config in [renamed, longer, other_bp] {
        rig.engine.set_config(config);
        let err = rig.engine.run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("rebuild the engine"), "{err}");
        assert_eq!(rig.engine.state(), EngineState::Failed);
    }
    assert_eq!(rig.reader.reads.load(SeqCst), reads);
    assert_eq!(rig.counted.load(SeqCst), counted);

    // The original chain runs again on the same engine
    rig.engine.set_config(rig.config.clone());
    assert_eq!(rig.engine.run().unwrap(), RunStatus::Done);
}

#[test]
fn cone_beam_blocks_read_a_wider_band() {
    let cone = "geometry = \"cone\"\nsod = \"100 mm\"\nsdd = \"200 mm\"";
    let mut rig = rig("[0, 20, 64, 50]", cone, "", &["Count"], None);
    assert_eq!(rig.engine.run().unwrap(), RunStatus::Done);

    let seen = rig.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    for (cb_roi, stack_roi) in &seen {
        assert!(stack_roi.contains(cb_roi), "{stack_roi} {cb_roi}");
        assert!(stack_roi.height() > cb_roi.height(), "{stack_roi} {cb_roi}");
    }
    // Piercing point at row 60, voxels of 0.5 mm, 8 rows of padding
    assert_eq!(seen[0].1.rows(), 4..43);
    assert_eq!(rig.reader.rows.lock().unwrap()[0], 4..43);

    let volume = rig.engine.volume().unwrap();
    assert_eq!(volume.dim(), (30, 64, 64));
    for (s, slice) in volume.axis_iter(Axis(0)).enumerate() {
        assert!(slice.iter().all(|&v| v == stamped(20, s)), "slice {s}");
    }
}

#[test]
fn parallel_margin_is_read_then_stripped() {
    let mut rig = rig("[0, 10, 8, 40]", "margin = 3", "", &["Count"], None);
    assert_eq!(rig.engine.run().unwrap(), RunStatus::Done);

    let mut rows = rig.reader.rows.lock().unwrap().clone();
    rows.dedup();
    assert_eq!(rows, vec![7..23, 17..33, 27..43]);
    let seen = rig.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|(cb_roi, stack_roi)| cb_roi == stack_roi));
    assert_float_eq!(rig.engine.volume().unwrap()[[29, 0, 0]], stamped(10, 29), abs <= 0.0);
}

#[test]
fn non_finite_values_are_reported() {
    let mut rig = rig("[0, 0, 8, 10]", "", "[system]\nvalidate_data = true", &["Count", "Poison"], None);
    assert_eq!(rig.engine.run().unwrap(), RunStatus::Done);
    let notes = rig.engine.diagnostics();
    assert!(notes.iter().any(|n| n.contains("after Poison: 1 NaN and 0 infinite values")), "{notes:?}");
    assert!(!notes.iter().any(|n| n.contains("as read") || n.contains("after Count")), "{notes:?}");
}
