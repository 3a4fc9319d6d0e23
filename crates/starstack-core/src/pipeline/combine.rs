use std::path::PathBuf;

use tracing::info;

use crate::align::OutOfBounds;
use crate::calibrate::CalibrationSet;
use crate::color::{self, ColorImage};
use crate::error::{Result, StackError};
use crate::io::fits::OutputHeader;
use crate::normalize::HistoNormMode;
use crate::stack::reference;

use super::config::PipelineConfig;
use super::postprocess::{self, Reference};
use super::preprocess;
use super::types::{DropReason, FrameOutcome, PipelineStage, ProgressReporter};

/// Channel combination flavor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CombineMode {
    /// Three inputs: r, g, b.
    Rgb,
    /// Four inputs: l, r, g, b — channels aligned to luminance, which is
    /// not applied.
    Argb,
    /// Four inputs: l, r, g, b — aligned to luminance and modulated by it.
    Lrgb,
}

impl CombineMode {
    pub fn expected_inputs(self) -> usize {
        match self {
            CombineMode::Rgb => 3,
            CombineMode::Argb | CombineMode::Lrgb => 4,
        }
    }
}

/// Combine pre-stacked channels into an RGB image.
///
/// Channels are loaded and star-detected, aligned onto the combination
/// reference (score-selected for rgb, the luminance input otherwise) and
/// optionally histogram-matched. Out-of-bounds resample samples take each
/// channel's own location so combined borders stay neutral. Any channel
/// failure is fatal here; there is no frame to drop and continue without.
pub fn run_combine(
    files: &[PathBuf],
    config: &PipelineConfig,
    mode: CombineMode,
    reporter: &dyn ProgressReporter,
) -> Result<(ColorImage, OutputHeader)> {
    let expected = mode.expected_inputs();
    if files.len() != expected {
        return Err(StackError::NumericDegenerate(format!(
            "{mode:?} combination needs exactly {expected} inputs, got {}",
            files.len()
        )));
    }

    let calibration = CalibrationSet::default();
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(expected);

    reporter.stage_started(PipelineStage::Preprocessing, Some(expected));
    let mut channels = Vec::with_capacity(expected);
    for (id, path) in files.iter().enumerate() {
        match preprocess::preprocess_frame(id, path, config, &calibration)? {
            FrameOutcome::Kept(frame) => channels.push(frame),
            FrameOutcome::Dropped { id, reason } => {
                return Err(channel_failure(id, reason));
            }
        }
        reporter.frame_done(channels.len());
    }
    reporter.stage_finished();

    let norm_mode = config.normalize.resolve(HistoNormMode::None);

    // Alignment reference: best-scored channel for rgb, luminance otherwise.
    let reference_data = if config.align.enabled || norm_mode != HistoNormMode::None {
        let align_index = match mode {
            CombineMode::Rgb => reference::select_reference(&channels)?.0,
            CombineMode::Argb | CombineMode::Lrgb => 0,
        };
        let mut reference = Reference::from_frame(&channels[align_index]);

        // The histogram reference is the dimmest color channel, so the
        // black-point shift never pushes a channel negative.
        if norm_mode != HistoNormMode::None {
            let color_channels = match mode {
                CombineMode::Rgb => &channels[..],
                CombineMode::Argb | CombineMode::Lrgb => &channels[1..],
            };
            if let Some(dimmest) = color_channels.iter().min_by(|a, b| {
                let la = a.stats.map(|s| s.location).unwrap_or(f32::MAX);
                let lb = b.stats.map(|s| s.location).unwrap_or(f32::MAX);
                la.total_cmp(&lb)
            }) {
                reference.stats = dimmest.stats.unwrap_or_default();
                info!(
                    channel = dimmest.id,
                    location = reference.stats.location,
                    "Histogram reference channel"
                );
            }
        }
        Some(reference)
    } else {
        None
    };

    let channels = match &reference_data {
        Some(reference) => {
            reporter.stage_started(PipelineStage::Postprocessing, Some(channels.len()));
            let kept = postprocess::postprocess_batch(
                channels,
                reference,
                config,
                norm_mode,
                OutOfBounds::OwnLocation,
                parallelism,
                reporter,
            )?;
            reporter.stage_finished();
            if kept.len() != expected {
                return Err(StackError::NumericDegenerate(
                    "all channels must align for color combination".into(),
                ));
            }
            kept
        }
        None => channels,
    };

    let total_exposure: f32 = channels.iter().map(|c| c.header.exposure_seconds).sum();
    let date_obs = channels
        .iter()
        .filter_map(|c| c.header.date_obs.clone())
        .min();

    reporter.stage_started(PipelineStage::Stacking, None);
    let mut iter = channels.into_iter();
    let image = match mode {
        CombineMode::Rgb => {
            let (r, g, b) = (
                iter.next().expect("three channels"),
                iter.next().expect("three channels"),
                iter.next().expect("three channels"),
            );
            color::combine_rgb(r, g, b)?
        }
        CombineMode::Argb | CombineMode::Lrgb => {
            let luminance = iter.next().expect("four channels");
            let (r, g, b) = (
                iter.next().expect("four channels"),
                iter.next().expect("four channels"),
                iter.next().expect("four channels"),
            );
            let mut image = color::combine_rgb(r, g, b)?;
            if mode == CombineMode::Lrgb {
                info!("Applying luminance channel");
                color::apply_luminance(&mut image, &luminance.data)?;
            }
            image
        }
    };
    reporter.stage_finished();
    info!(?mode, "Combined color channels");

    let header = OutputHeader {
        exposure_seconds: total_exposure,
        date_obs,
        frames_combined: Some(expected),
        ..Default::default()
    };
    Ok((image, header))
}

fn channel_failure(id: usize, reason: DropReason) -> StackError {
    match reason {
        DropReason::AlignmentFailed {
            residual_px,
            match_count,
        } => StackError::AlignmentFailed {
            id,
            residual_px,
            match_count,
        },
        DropReason::NoStars => StackError::NoStars { id },
        DropReason::ReadFailed(reason) => StackError::NumericDegenerate(format!(
            "channel {id} could not be read: {reason}"
        )),
    }
}
