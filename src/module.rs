//! The contract between the engine and the stages it drives.
//!
//! Preprocessing stages transform a block of projections in place; the
//! back-projector accumulates a block of projections into slices. Concrete
//! stages are looked up by name in a `ModuleRegistry` handed to the engine
//! factory.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use ndarray::ArrayView3;

use crate::config::ReconConfig;
use crate::error::{ReconError, ReconResult};
use crate::image::{self, Histogram};
use crate::parameters::Parameters;
use crate::publication::Publication;
use crate::reader::BlockParameters;
use crate::types::{ProjectionStack, Slice};
use geometry::Roi;

/// Failures inside modules may be of any error type.
pub type ModuleResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Capabilities shared by every stage.
pub trait Module {
    fn name(&self) -> &str;

    /// Take settings from the run configuration and the stage's own
    /// parameters. Called once, before any block.
    fn configure(&mut self, config: &ReconConfig, parameters: &Parameters) -> ModuleResult<()>;

    /// Region of the frame covered by the next block.
    fn set_roi(&mut self, roi: &Roi) -> ModuleResult<()>;

    /// Whether the module has been configured and can process data.
    fn valid(&self) -> bool { true }

    fn publications(&self) -> Vec<Publication> { Vec::new() }
}

pub trait Preprocessor: Module {
    /// Transform `stack` in place. May update the per-projection
    /// information in `params`.
    fn process(&mut self, stack: &mut ProjectionStack, params: &mut BlockParameters) -> ModuleResult<()>;
}

pub trait BackProjector: Module {
    /// Add the contribution of `stack` to the slices of the current ROI.
    fn process(&mut self, stack: &ProjectionStack, params: &BlockParameters) -> ModuleResult<()>;

    /// Number of slices in the current ROI.
    fn n_slices(&self) -> usize;

    /// Slice `index` of the current ROI.
    fn slice(&self, index: usize) -> Option<Slice> {
        let volume = self.volume();
        (index < volume.len_of(ndarray::Axis(0))).then(|| volume.index_axis(ndarray::Axis(0), index).to_owned())
    }

    /// All slices of the current ROI, indexed `[slice, y, x]`.
    fn volume(&self) -> ArrayView3<'_, f32>;

    fn histogram(&self, bins: usize) -> Histogram {
        image::histogram(&self.volume(), bins)
    }
}

// ----- Module handles --------------------------------------------------------------------

/// A module together with its parameters and the time spent inside it.
pub struct ModuleItem<M: ?Sized> {
    module    : Box<M>,
    parameters: Parameters,
    exec_time : Duration,
}

impl<M: Module + ?Sized> ModuleItem<M> {

    pub fn new(module: Box<M>, parameters: Parameters) -> Self {
        Self { module, parameters, exec_time: Duration::ZERO }
    }

    pub fn name      (&self) -> &str        { self.module.name() }
    pub fn parameters(&self) -> &Parameters { &self.parameters }
    pub fn exec_time (&self) -> Duration    { self.exec_time }
    pub fn module    (&self) -> &M          { &self.module }

    pub fn reset_timer(&mut self) { self.exec_time = Duration::ZERO }

    /// Replace the parameters used by the next `configure`.
    pub fn set_parameters(&mut self, parameters: Parameters) { self.parameters = parameters }

    /// Run `f` on the module, adding its duration to the module's execution
    /// time. Panics inside the module are reported as errors.
    pub fn timed<T>(&mut self, f: impl FnOnce(&mut M) -> ModuleResult<T>) -> ModuleResult<T> {
        let start = Instant::now();
        let module = &mut *self.module;
        let outcome = catch_unwind(AssertUnwindSafe(|| f(module)));
        self.exec_time += start.elapsed();
        outcome.unwrap_or_else(|panic| Err(panic_message(panic).into()))
    }

    /// Configure the module with its own parameters.
    pub fn configure(&mut self, config: &ReconConfig) -> ModuleResult<()> {
        let parameters = self.parameters.clone();
        self.timed(|m| m.configure(config, &parameters))
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let text = panic.downcast_ref::<&str>().map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".into());
    format!("panicked: {text}")
}

// ----- Registry --------------------------------------------------------------------------

type Constructor<T> = Box<dyn Fn() -> Box<T> + Send + Sync>;

/// Maps module names to constructors.
pub struct ModuleRegistry {
    preprocessors  : BTreeMap<String, Constructor<dyn Preprocessor>>,
    back_projectors: BTreeMap<String, Constructor<dyn BackProjector>>,
}

impl ModuleRegistry {

    /// A registry that knows no modules.
    pub fn empty() -> Self {
        Self { preprocessors: BTreeMap::new(), back_projectors: BTreeMap::new() }
    }

    /// A registry holding the modules shipped with this crate.
    pub fn with_builtin_modules() -> Self {
        use crate::preproc::{LogNorm, SpotClean};
        use crate::projector::{ConeFdk, ParallelFbp};
        let mut registry = Self::empty();
        registry.register_preprocessor  ("LogNorm"    , || Box::new(LogNorm    ::default()));
        registry.register_preprocessor  ("SpotClean"  , || Box::new(SpotClean  ::default()));
        registry.register_back_projector("ParallelFbp", || Box::new(ParallelFbp::default()));
        registry.register_back_projector("ConeFdk"    , || Box::new(ConeFdk    ::default()));
        registry
    }

    pub fn register_preprocessor<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn() -> Box<dyn Preprocessor> + Send + Sync + 'static,
    {
        self.preprocessors.insert(name.into(), Box::new(constructor));
    }

    pub fn register_back_projector<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn() -> Box<dyn BackProjector> + Send + Sync + 'static,
    {
        self.back_projectors.insert(name.into(), Box::new(constructor));
    }

    pub fn preprocessor(&self, name: &str) -> ReconResult<Box<dyn Preprocessor>> {
        self.preprocessors.get(name).map(|make| make()).ok_or_else(|| unknown("preprocessing module", name, self.preprocessors.keys()))
    }

    pub fn back_projector(&self, name: &str) -> ReconResult<Box<dyn BackProjector>> {
        self.back_projectors.get(name).map(|make| make()).ok_or_else(|| unknown("back-projector", name, self.back_projectors.keys()))
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self { Self::with_builtin_modules() }
}

fn unknown<'a>(what: &str, name: &str, known: impl Iterator<Item = &'a String>) -> ReconError {
    let known = known.map(String::as_str).collect::<Vec<_>>().join(", ");
    ReconError::Configuration(format!("unknown {what} '{name}' (known: {known})"))
}
