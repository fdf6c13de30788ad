//! Progress reporting and cancellation requests from whoever drives a run.

pub trait Interactor {
    /// Report overall progress in `[0, 1]`. Returns `true` when the run
    /// should stop.
    fn set_overall_progress(&self, fraction: f32) -> bool;

    /// The run finished without being cancelled.
    fn done(&self);
}

/// Interactor that never asks to stop and ignores progress.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullInteractor;

impl Interactor for NullInteractor {
    fn set_overall_progress(&self, _: f32) -> bool { false }
    fn done(&self) {}
}
