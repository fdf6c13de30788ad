use indicatif::{ProgressBar, ProgressStyle};

use tomorec::Interactor;

const STEPS: u64 = 1000;

/// Progress bar for `recon` executable
pub (super) struct Progress(ProgressBar);

impl Progress {

    pub (super) fn new(label: &str) -> Self {
        let bar = ProgressBar::new(STEPS).with_message(label.to_string());
        if let Ok(style) = ProgressStyle::default_bar()
            .template("Reconstructing {msg}\n[{elapsed_precise}] {wide_bar} {percent}% ({eta_precise})")
        {
            bar.set_style(style);
        }
        bar.tick();
        Self(bar)
    }
}

impl Interactor for Progress {

    fn set_overall_progress(&self, fraction: f32) -> bool {
        self.0.set_position((fraction.clamp(0.0, 1.0) * STEPS as f32) as u64);
        false
    }

    fn done(&self) { self.0.finish() }
}
