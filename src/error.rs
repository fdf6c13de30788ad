//! Errors surfaced at the engine boundary.
//!
//! Modules report failures as boxed errors of any type; the engine turns
//! them into `ReconError::ModuleFailure`, keeping only their text.

use std::fmt;
use std::path::PathBuf;

use geometry::{BeamGeometry, GeometryError, Roi};
use thiserror::Error;

/// Point in the module life cycle at which a failure happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Configure,
    SetRoi,
    Process,
    BackProject,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configure   => "configure",
            Stage::SetRoi      => "set ROI",
            Stage::Process     => "process",
            Stage::BackProject => "back-projection",
        };
        write!(f, "{name}")
    }
}

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("projection file {0} does not exist")]
    Missing(PathBuf),

    #[error("could not decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("ROI {roi} lies outside the {width}x{height} frame in {path}")]
    RoiOutOfBounds { path: PathBuf, roi: Roi, width: usize, height: usize },
}

pub type ReadResult<T> = Result<T, ReadError>;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0} beam geometry is not supported")]
    UnsupportedGeometry(BeamGeometry),

    #[error("module '{module}' failed during {stage} ({geometry} beam, ROI {roi}): {message}")]
    ModuleFailure {
        module  : String,
        stage   : Stage,
        geometry: BeamGeometry,
        roi     : Roi,
        message : String,
    },

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("failed to write {path}: {message}")]
    Serialization { path: PathBuf, message: String },

    #[error("reconstruction failed at {context}: {source}")]
    ReconstructionFailure {
        context: String,
        #[source]
        source: Box<ReconError>,
    },
}

pub type ReconResult<T> = Result<T, ReconError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    UnsupportedGeometry,
    ModuleFailure,
    Read,
    Serialization,
    ReconstructionFailure,
}

impl ReconError {

    pub fn configuration(message: impl Into<String>) -> Self {
        ReconError::Configuration(message.into())
    }

    pub fn serialization(path: impl Into<PathBuf>, error: impl fmt::Display) -> Self {
        ReconError::Serialization { path: path.into(), message: error.to_string() }
    }

    /// Wrap `self` with the place in the run where it surfaced.
    pub fn during(self, context: impl Into<String>) -> Self {
        ReconError::ReconstructionFailure { context: context.into(), source: Box::new(self) }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconError::Configuration(_)              => ErrorKind::Configuration,
            ReconError::UnsupportedGeometry(_)        => ErrorKind::UnsupportedGeometry,
            ReconError::ModuleFailure { .. }          => ErrorKind::ModuleFailure,
            ReconError::Read(_)                       => ErrorKind::Read,
            ReconError::Serialization { .. }          => ErrorKind::Serialization,
            ReconError::ReconstructionFailure { .. }  => ErrorKind::ReconstructionFailure,
        }
    }

    /// The innermost error, beneath any `ReconstructionFailure` wrappers.
    pub fn root(&self) -> &ReconError {
        let mut error = self;
        while let ReconError::ReconstructionFailure { source, .. } = error {
            error = source;
        }
        error
    }

    /// Name of the module responsible, if a module failed.
    pub fn module_name(&self) -> Option<&str> {
        match self.root() {
            ReconError::ModuleFailure { module, .. } => Some(module),
            _ => None,
        }
    }
}

impl From<GeometryError> for ReconError {
    fn from(error: GeometryError) -> Self {
        match error {
            GeometryError::UnsupportedGeometry(beam) => ReconError::UnsupportedGeometry(beam),
            other => ReconError::Configuration(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn module_failure() -> ReconError {
        ReconError::ModuleFailure {
            module: "SpotClean".into(),
            stage: Stage::Process,
            geometry: BeamGeometry::Parallel,
            roi: Roi::new(0, 20, 64, 30),
            message: "boom".into(),
        }
    }

    #[test]
    fn wrapped_failure_keeps_module_identity() {
        let error = module_failure().during("block 2 of 5").during("run");
        assert_eq!(error.kind(), ErrorKind::ReconstructionFailure);
        assert_eq!(error.root().kind(), ErrorKind::ModuleFailure);
        assert_eq!(error.module_name(), Some("SpotClean"));
        let text = error.to_string();
        assert!(text.contains("block 2 of 5"), "{text}");
        assert!(text.contains("SpotClean"), "{text}");
        assert!(text.contains("[0, 20, 64, 30]"), "{text}");
    }

    #[test]
    fn geometry_errors_map_to_kinds() {
        let unsupported: ReconError = GeometryError::UnsupportedGeometry(BeamGeometry::Helix).into();
        assert_eq!(unsupported.kind(), ErrorKind::UnsupportedGeometry);
        let inside: ReconError = GeometryError::SourceInsideObject { sod: 1.0, radius: 2.0 }.into();
        assert_eq!(inside.kind(), ErrorKind::Configuration);
        assert_eq!(inside.module_name(), None);
    }
}
