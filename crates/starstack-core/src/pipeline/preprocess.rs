use std::path::{Path, PathBuf};

use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::background;
use crate::calibrate::{self, CalibrationSet};
use crate::cosmetic;
use crate::detect;
use crate::error::Result;
use crate::frame::Frame;
use crate::io::fits::{self, OutputHeader};
use crate::stats;

use super::config::{artifact_path, PipelineConfig};
use super::types::{DropReason, FrameOutcome, ProgressReporter};

/// Run one frame through ingest, calibration, cosmetic repair, background
/// extraction and star detection.
///
/// Unreadable or malformed inputs drop the frame; a dimension mismatch
/// with the calibration frames is fatal and aborts the pipeline.
pub fn preprocess_frame(
    id: usize,
    path: &Path,
    config: &PipelineConfig,
    calibration: &CalibrationSet,
) -> Result<FrameOutcome> {
    let (data, header) = match fits::read_mono(path) {
        Ok(ok) => ok,
        Err(e) => {
            return Ok(FrameOutcome::Dropped {
                id,
                reason: DropReason::ReadFailed(e.to_string()),
            })
        }
    };
    let mut frame = Frame::new(id, data, header);

    calibration.apply(&mut frame)?;

    if let Some(channel) = config.calibration.debayer {
        let pattern = frame
            .header
            .bayer_pattern
            .unwrap_or(config.calibration.cfa);
        frame.data = calibrate::extract_cfa_channel(&frame.data, pattern, channel);
        frame.header.bayer_pattern = None;
    }

    if config.calibration.binning >= 2 {
        frame.data = calibrate::bin(&frame.data, config.calibration.binning as usize);
    }

    let (cleaned, replaced) = cosmetic::remove_bad_pixels(
        &frame.data,
        config.bad_pixel.sig_low,
        config.bad_pixel.sig_high,
    );
    frame.data = cleaned;
    if replaced > 0 {
        debug!(frame = id, replaced, "Repaired bad pixels");
    }

    if config.calibration.normalize_range {
        calibrate::normalize_range(&mut frame.data);
    }

    let mut frame_stats = stats::compute_stats(&frame.data, config.estimator, id as u64);

    if config.background.grid > 0 {
        let map = background::subtract_background(&mut frame.data, &config.background);
        if let Some(pattern) = &config.artifacts.background {
            write_artifact(&artifact_path(pattern, id), &map)?;
        }
        frame_stats = stats::compute_stats(&frame.data, config.estimator, id as u64);
    }

    let (stars, hfr) = detect::find_stars(
        &frame.data,
        frame_stats.location,
        frame_stats.scale,
        &config.star_detect,
    );
    info!(
        frame = id,
        stars = stars.len(),
        hfr,
        %frame_stats,
        "Preprocessed frame"
    );

    frame.stats = Some(frame_stats);
    frame.stars = stars;
    frame.hfr = hfr;

    if let Some(pattern) = &config.artifacts.pre {
        write_artifact(&artifact_path(pattern, id), &frame.data)?;
    }
    if let Some(pattern) = &config.artifacts.stars {
        let map = star_map(&frame);
        write_artifact(&artifact_path(pattern, id), &map)?;
    }

    Ok(FrameOutcome::Kept(frame))
}

/// Preprocess a batch with bounded frame-level parallelism.
///
/// Frames run in chunks of `parallelism` concurrent tasks so no more than
/// the planned number of working sets is in flight. Dropped frames are
/// logged and skipped; fatal errors abort.
pub fn preprocess_batch(
    entries: &[(usize, PathBuf)],
    config: &PipelineConfig,
    calibration: &CalibrationSet,
    parallelism: usize,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<Frame>> {
    let mut kept = Vec::with_capacity(entries.len());
    let mut done = 0usize;

    for chunk in entries.chunks(parallelism.max(1)) {
        let outcomes: Vec<Result<FrameOutcome>> = chunk
            .par_iter()
            .map(|(id, path)| preprocess_frame(*id, path, config, calibration))
            .collect();

        for outcome in outcomes {
            match outcome? {
                FrameOutcome::Kept(frame) => kept.push(frame),
                FrameOutcome::Dropped { id, reason } => {
                    warn!(frame = id, %reason, "Dropped frame during preprocessing");
                    reporter.frame_dropped(id);
                }
            }
            done += 1;
            reporter.frame_done(done);
        }
    }
    Ok(kept)
}

/// Synthetic image marking each detected star with a Gaussian spot scaled
/// by its measured HFR.
fn star_map(frame: &Frame) -> Array2<f32> {
    let (h, w) = frame.data.dim();
    let mut map = Array2::zeros((h, w));
    for star in &frame.stars {
        let sigma = (star.hfr * 0.6).max(0.5);
        let radius = (sigma * 3.0).ceil() as i64;
        let cx = star.x;
        let cy = star.y;
        for dr in -radius..=radius {
            for dc in -radius..=radius {
                let r = cy.round() as i64 + dr;
                let c = cx.round() as i64 + dc;
                if r < 0 || c < 0 || r >= h as i64 || c >= w as i64 {
                    continue;
                }
                let dx = c as f32 - cx;
                let dy = r as f32 - cy;
                let value = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
                let cell: &mut f32 = &mut map[[r as usize, c as usize]];
                *cell = cell.max(value);
            }
        }
    }
    map
}

fn write_artifact(path: &Path, data: &Array2<f32>) -> Result<()> {
    fits::write_mono(path, data, &OutputHeader::default())
}
