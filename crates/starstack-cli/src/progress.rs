use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use starstack_core::pipeline::{PipelineStage, ProgressReporter};

/// Progress bar reporter for interactive runs.
///
/// Frame-counted stages render a bar; unbounded stages stay silent (the
/// log carries them). Dropped frames still tick the bar forward, matching
/// the pipeline's convention that a drop counts as handled work.
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }
}

impl ProgressReporter for CliReporter {
    fn stage_started(&self, stage: PipelineStage, frames: Option<usize>) {
        let mut guard = self.bar.lock().expect("progress bar lock");
        if let Some(previous) = guard.take() {
            previous.finish_and_clear();
        }
        if let Some(total) = frames {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{msg} [{bar:40}] {pos}/{len}")
                    .expect("static progress template")
                    .progress_chars("=> "),
            );
            bar.set_message(stage.to_string());
            *guard = Some(bar);
        }
    }

    fn frame_done(&self, frames_done: usize) {
        if let Some(bar) = &*self.bar.lock().expect("progress bar lock") {
            bar.set_position(frames_done as u64);
        }
    }

    fn frame_dropped(&self, id: usize) {
        if let Some(bar) = &*self.bar.lock().expect("progress bar lock") {
            bar.println(format!("frame {id} dropped"));
        }
    }

    fn stage_finished(&self) {
        if let Some(bar) = self.bar.lock().expect("progress bar lock").take() {
            bar.finish_and_clear();
        }
    }
}
