use rayon::prelude::*;
use tracing::{info, warn};

use crate::align::{self, OutOfBounds};
use crate::detect::Star;
use crate::error::Result;
use crate::frame::Frame;
use crate::io::fits::{self, OutputHeader};
use crate::normalize::{self, HistoNormMode};
use crate::stats::{self, Stats};

use super::config::{artifact_path, PipelineConfig};
use super::types::{DropReason, FrameOutcome, ProgressReporter};

/// Alignment/normalization reference, owned by the orchestrator and
/// borrowed read-only by every worker. Captured in batch 0 and reused for
/// all subsequent batches.
#[derive(Clone, Debug)]
pub struct Reference {
    pub frame_id: usize,
    pub stars: Vec<Star>,
    pub stats: Stats,
}

impl Reference {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            frame_id: frame.id,
            stars: frame.stars.clone(),
            stats: frame.stats.unwrap_or_default(),
        }
    }
}

/// Align a frame onto the reference and normalize its histogram.
///
/// Frames whose alignment residual exceeds the threshold, or that have no
/// stars while alignment is enabled, are dropped with a reason.
pub fn postprocess_frame(
    mut frame: Frame,
    reference: &Reference,
    config: &PipelineConfig,
    mode: HistoNormMode,
    oob: OutOfBounds,
) -> Result<FrameOutcome> {
    let id = frame.id;

    if config.align.enabled && frame.id != reference.frame_id {
        if frame.stars.is_empty() {
            return Ok(FrameOutcome::Dropped {
                id,
                reason: DropReason::NoStars,
            });
        }

        let Some(result) = align::compute_transform(&reference.stars, &frame.stars, config.align.k)
        else {
            return Ok(FrameOutcome::Dropped {
                id,
                reason: DropReason::AlignmentFailed {
                    residual_px: f32::INFINITY,
                    match_count: 0,
                },
            });
        };
        if result.residual_px > config.align.threshold {
            return Ok(FrameOutcome::Dropped {
                id,
                reason: DropReason::AlignmentFailed {
                    residual_px: result.residual_px,
                    match_count: result.match_count,
                },
            });
        }

        let own_location = frame.stats.map(|s| s.location).unwrap_or(0.0);
        frame.data = align::resample(&frame.data, &result.transform, oob, own_location);
        frame.transform = Some(result.transform);
        info!(
            frame = id,
            residual_px = result.residual_px,
            matches = result.match_count,
            scale = result.transform.scale,
            rotation = result.transform.rotation,
            tx = result.transform.tx,
            ty = result.transform.ty,
            "Aligned frame"
        );
    }

    if mode != HistoNormMode::None {
        let frame_stats = frame
            .stats
            .unwrap_or_else(|| stats::compute_stats(&frame.data, config.estimator, id as u64));
        normalize::normalize(&mut frame.data, &frame_stats, &reference.stats, mode);
        frame.stats = Some(stats::compute_stats(&frame.data, config.estimator, id as u64));
    }

    if let Some(pattern) = &config.artifacts.post {
        fits::write_mono(
            &artifact_path(pattern, id),
            &frame.data,
            &OutputHeader::default(),
        )?;
    }

    Ok(FrameOutcome::Kept(frame))
}

/// Postprocess a batch with bounded frame-level parallelism, dropping
/// failed frames.
pub fn postprocess_batch(
    frames: Vec<Frame>,
    reference: &Reference,
    config: &PipelineConfig,
    mode: HistoNormMode,
    oob: OutOfBounds,
    parallelism: usize,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<Frame>> {
    let mut kept = Vec::with_capacity(frames.len());
    let mut done = 0usize;
    let mut frames = frames;

    while !frames.is_empty() {
        let take = parallelism.max(1).min(frames.len());
        let chunk: Vec<Frame> = frames.drain(..take).collect();
        let outcomes: Vec<Result<FrameOutcome>> = chunk
            .into_par_iter()
            .map(|frame| postprocess_frame(frame, reference, config, mode, oob))
            .collect();

        for outcome in outcomes {
            match outcome? {
                FrameOutcome::Kept(frame) => kept.push(frame),
                FrameOutcome::Dropped { id, reason } => {
                    warn!(frame = id, %reason, "Dropped frame during postprocessing");
                    reporter.frame_dropped(id);
                }
            }
            done += 1;
            reporter.frame_done(done);
        }
    }
    Ok(kept)
}
