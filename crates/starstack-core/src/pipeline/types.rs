use crate::frame::Frame;

/// Pipeline processing stage, used for progress reporting.
#[derive(Clone, Copy, Debug)]
pub enum PipelineStage {
    Loading,
    Preprocessing,
    ReferenceSelection,
    Postprocessing,
    Stacking,
    Finalizing,
    Writing,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loading => write!(f, "Loading calibration frames"),
            Self::Preprocessing => write!(f, "Preprocessing frames"),
            Self::ReferenceSelection => write!(f, "Selecting reference"),
            Self::Postprocessing => write!(f, "Aligning and normalizing"),
            Self::Stacking => write!(f, "Stacking"),
            Self::Finalizing => write!(f, "Finalizing stack"),
            Self::Writing => write!(f, "Writing output"),
        }
    }
}

/// Observer for the batched stacking run.
///
/// The orchestrator drives a single observer across every batch: each
/// batch opens its preprocess/postprocess/stack stages in turn,
/// `frame_done` ticks as frames clear the current stage, and frames the
/// batch abandons (unreadable input, no stars, alignment over threshold)
/// are announced through `frame_dropped` so a front end can keep its
/// kept/dropped tally consistent with what ends up in the stack. Because
/// a dropped frame still counts as handled, `frame_done` includes it.
/// All hooks default to no-ops; implementations must tolerate being
/// called from whichever worker finished the frame.
pub trait ProgressReporter: Send + Sync {
    /// A stage is starting. `frames` is the number of frames entering it,
    /// when the stage works frame-by-frame (reference selection and
    /// finalization do not).
    fn stage_started(&self, _stage: PipelineStage, _frames: Option<usize>) {}

    /// `frames_done` frames of the current stage are handled, kept or
    /// dropped.
    fn frame_done(&self, _frames_done: usize) {}

    /// Frame `id` was dropped from the current batch and will not reach
    /// the stacker.
    fn frame_dropped(&self, _id: usize) {}

    /// The current stage is over; any remaining display for it can be
    /// cleared.
    fn stage_finished(&self) {}
}

/// Observer that swallows every event, for headless runs and tests.
pub struct SilentReporter;
impl ProgressReporter for SilentReporter {}

/// Why a frame was dropped without aborting the batch.
#[derive(Clone, Debug)]
pub enum DropReason {
    /// The input could not be read or decoded.
    ReadFailed(String),
    /// No stars were detected, but alignment needs them.
    NoStars,
    /// Alignment residual exceeded the threshold or too few stars matched.
    AlignmentFailed {
        residual_px: f32,
        match_count: usize,
    },
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(reason) => write!(f, "read failed: {reason}"),
            Self::NoStars => write!(f, "no stars detected"),
            Self::AlignmentFailed {
                residual_px,
                match_count,
            } => write!(
                f,
                "alignment failed: residual {residual_px:.2} px over {match_count} matches"
            ),
        }
    }
}

/// Outcome of a per-frame pipeline stage: the frame moves on, or it is
/// dropped with a reason and the batch continues without it.
#[derive(Debug)]
pub enum FrameOutcome {
    Kept(Frame),
    Dropped { id: usize, reason: DropReason },
}
