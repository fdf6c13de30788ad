//! Block-wise tomographic reconstruction.
//!
//! Projections are read band by band, passed through a chain of
//! preprocessing modules and back-projected into slices, one block of slices
//! at a time, so that scans larger than memory can be reconstructed.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod image;
pub mod interactor;
pub mod io;
pub mod module;
pub mod parameters;
pub mod preproc;
pub mod projector;
pub mod publication;
pub mod reader;
pub mod types;
pub mod utils;

pub use crate::catalog::{ProjectionCatalog, ProjectionDescriptor};
pub use crate::config::{read_config_file, ReconConfig};
pub use crate::engine::{EngineFactory, EngineState, ReconEngine, RunStatus};
pub use crate::error::{ErrorKind, ReconError, ReconResult};
pub use crate::interactor::{Interactor, NullInteractor};
pub use crate::module::{BackProjector, Module, ModuleItem, ModuleRegistry, ModuleResult, Preprocessor};
pub use crate::reader::{BlockParameters, FrameReader, ProjectionReader};

pub use geometry::{BeamGeometry, Roi};
