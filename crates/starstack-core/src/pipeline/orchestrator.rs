use std::path::PathBuf;

use ndarray::Array2;
use tracing::{info, warn};

use crate::align::OutOfBounds;
use crate::calibrate::CalibrationSet;
use crate::consts::BATCH_SHUFFLE_SEED;
use crate::detect::{self, Star};
use crate::error::{Result, StackError};
use crate::filters;
use crate::io::fits::{self, OutputHeader};
use crate::normalize::HistoNormMode;
use crate::stack::{self, adaptive, incremental::IncrementalStack, reference, StackMode};
use crate::stats::{self, Stats};

use super::batch;
use super::config::{artifact_path, PipelineConfig};
use super::postprocess::{self, Reference};
use super::preprocess;
use super::types::{PipelineStage, ProgressReporter};

/// Final stack, ready for the writer.
#[derive(Clone, Debug)]
pub struct StackOutput {
    pub data: Array2<f32>,
    pub stats: Stats,
    pub stars: Vec<Star>,
    pub hfr: f32,
    pub frames_combined: usize,
    pub total_exposure: f32,
    pub date_obs: Option<String>,
    pub sig_low: f32,
    pub sig_high: f32,
    pub mode: StackMode,
}

impl StackOutput {
    /// Provenance header fields for egress.
    pub fn output_header(&self) -> OutputHeader {
        OutputHeader {
            exposure_seconds: self.total_exposure,
            date_obs: self.date_obs.clone(),
            frames_combined: Some(self.frames_combined),
            sig_low: (self.sig_low >= 0.0).then_some(self.sig_low),
            sig_high: (self.sig_high >= 0.0).then_some(self.sig_high),
            stack_mode: Some(format!("{:?}", self.mode)),
        }
    }
}

/// Run the batched stacking pipeline over the input light frames.
///
/// Batch 0 selects the reference frame and, when no explicit sigmas are
/// configured, runs the adaptive sigma search; both are pinned and reused
/// by every subsequent batch. Batch results fold into an incremental
/// accumulator so peak memory stays within the planned budget.
pub fn run_stack(
    files: &[PathBuf],
    config: &PipelineConfig,
    reporter: &dyn ProgressReporter,
) -> Result<StackOutput> {
    if files.is_empty() {
        return Err(StackError::StackEmpty);
    }

    reporter.stage_started(PipelineStage::Loading, None);
    let calibration = CalibrationSet::load(
        config.calibration.dark.as_deref(),
        config.calibration.flat.as_deref(),
    )?;
    let axes = match calibration.axes() {
        Some(axes) => axes,
        None => first_readable_axes(files)?,
    };
    reporter.stage_finished();

    let plan = batch::plan_batches(files.len(), axes, config.stack.memory_mib)?;
    let norm_mode = config.normalize.resolve(HistoNormMode::LocationScale);

    let mut reference_data: Option<Reference> = None;
    let mut sig_low = config.stack.sig_low;
    let mut sig_high = config.stack.sig_high;
    let mut accumulator = IncrementalStack::new();
    let mut frames_combined = 0usize;
    let mut total_exposure = 0.0f32;
    let mut date_obs: Option<String> = None;
    let mut noise_weighted = 0.0f32;
    let mut resolved_mode = config.stack.mode;

    for b in 0..plan.num_batches {
        let entries: Vec<(usize, PathBuf)> = plan
            .batch(b)
            .iter()
            .map(|&i| (i, files[i].clone()))
            .collect();
        info!(
            batch = b,
            of = plan.num_batches,
            frames = entries.len(),
            "Starting batch"
        );

        reporter.stage_started(PipelineStage::Preprocessing, Some(entries.len()));
        let lights = preprocess::preprocess_batch(
            &entries,
            config,
            &calibration,
            plan.image_parallelism,
            reporter,
        )?;
        reporter.stage_finished();
        if lights.is_empty() {
            warn!(batch = b, "Every frame in this batch was dropped");
            continue;
        }

        let avg_noise = lights
            .iter()
            .filter_map(|f| f.stats.map(|s| s.noise))
            .sum::<f32>()
            / lights.len() as f32;
        info!(batch = b, avg_noise, "Average input frame noise");

        if (config.align.enabled || norm_mode != HistoNormMode::None) && reference_data.is_none() {
            reporter.stage_started(PipelineStage::ReferenceSelection, None);
            let (index, _) = reference::select_reference(&lights)?;
            reference_data = Some(Reference::from_frame(&lights[index]));
            reporter.stage_finished();
        }

        let lights = match &reference_data {
            Some(reference) => {
                reporter.stage_started(PipelineStage::Postprocessing, Some(lights.len()));
                let kept = postprocess::postprocess_batch(
                    lights,
                    reference,
                    config,
                    norm_mode,
                    OutOfBounds::Nan,
                    plan.image_parallelism,
                    reporter,
                )?;
                reporter.stage_finished();
                kept
            }
            None => lights,
        };
        if lights.is_empty() {
            warn!(batch = b, "Every frame in this batch failed alignment");
            continue;
        }

        for light in &lights {
            total_exposure += light.header.exposure_seconds;
            if let Some(date) = &light.header.date_obs {
                if date_obs.as_ref().map_or(true, |d| date < d) {
                    date_obs = Some(date.clone());
                }
            }
        }

        let weights = stack::compute_weights(&lights, config.stack.weight)?;
        let ref_location = reference_data.as_ref().map(|r| r.stats.location);
        resolved_mode = config.stack.mode.resolve(lights.len());

        reporter.stage_started(PipelineStage::Stacking, Some(lights.len()));
        let outcome = if resolved_mode.uses_sigmas() && (sig_low < 0.0 || sig_high < 0.0) {
            info!(
                batch = b,
                clip_low = config.stack.clip_percent_low,
                clip_high = config.stack.clip_percent_high,
                "Searching sigmas for requested clipping percentages"
            );
            let (outcome, found_low, found_high) = adaptive::find_sigmas_and_stack(
                &lights,
                resolved_mode,
                weights.as_deref(),
                ref_location,
                config.stack.clip_percent_low,
                config.stack.clip_percent_high,
                BATCH_SHUFFLE_SEED ^ b as u64,
            )?;
            // Pinned: subsequent batches reuse these bounds verbatim.
            sig_low = found_low;
            sig_high = found_high;
            outcome
        } else {
            stack::stack(
                &lights,
                resolved_mode,
                weights.as_deref(),
                ref_location,
                sig_low.max(0.0),
                sig_high.max(0.0),
            )?
        };
        reporter.stage_finished();

        let batch_frames = outcome.frames_combined;
        let (low_pct, high_pct) = outcome.rejection_percentages();
        let expected_noise = avg_noise / (batch_frames as f32).sqrt();
        info!(
            batch = b,
            frames = batch_frames,
            sig_low,
            sig_high,
            low_pct,
            high_pct,
            expected_noise,
            "Stacked batch"
        );

        if let Some(pattern) = &config.artifacts.batch {
            let path = artifact_path(pattern, b);
            info!(path = %path.display(), "Writing batch stack");
            fits::write_mono(
                &path,
                &outcome.data,
                &OutputHeader {
                    frames_combined: Some(batch_frames),
                    sig_low: (sig_low >= 0.0).then_some(sig_low),
                    sig_high: (sig_high >= 0.0).then_some(sig_high),
                    stack_mode: Some(format!("{resolved_mode:?}")),
                    ..Default::default()
                },
            )?;
        }

        noise_weighted += stats::estimate_noise(&outcome.data) * batch_frames as f32;
        frames_combined += batch_frames;
        accumulator.add(&outcome.data, batch_frames as f32);
        // Batch frames drop here, keeping resident pixels within budget.
    }

    reporter.stage_started(PipelineStage::Finalizing, None);
    let mut data = accumulator.finalize().ok_or(StackError::StackEmpty)?;
    let final_stats = stats::compute_stats(&data, config.estimator, 0);
    let (stars, hfr) = detect::find_stars(
        &data,
        final_stats.location,
        final_stats.scale,
        &config.star_detect,
    );
    info!(
        stars = stars.len(),
        hfr,
        frames = frames_combined,
        avg_batch_noise = noise_weighted / frames_combined.max(1) as f32,
        "Final stack"
    );

    if (config.output.gamma - 1.0).abs() > f32::EPSILON {
        info!(gamma = config.output.gamma, "Applying output gamma");
        filters::apply_gamma(&mut data, config.output.gamma);
    }
    reporter.stage_finished();

    Ok(StackOutput {
        data,
        stats: final_stats,
        stars,
        hfr,
        frames_combined,
        total_exposure,
        date_obs,
        sig_low,
        sig_high,
        mode: resolved_mode,
    })
}

/// Preprocess every input and report statistics, without stacking.
pub fn run_stats(
    files: &[PathBuf],
    config: &PipelineConfig,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    if files.is_empty() {
        return Err(StackError::StackEmpty);
    }

    let calibration = CalibrationSet::load(
        config.calibration.dark.as_deref(),
        config.calibration.flat.as_deref(),
    )?;

    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let entries: Vec<(usize, PathBuf)> = files.iter().cloned().enumerate().collect();

    reporter.stage_started(PipelineStage::Preprocessing, Some(entries.len()));
    let kept =
        preprocess::preprocess_batch(&entries, config, &calibration, parallelism, reporter)?;
    reporter.stage_finished();

    info!(
        analyzed = kept.len(),
        dropped = entries.len() - kept.len(),
        "Statistics run complete"
    );
    Ok(())
}

fn first_readable_axes(files: &[PathBuf]) -> Result<(usize, usize)> {
    for file in files {
        if let Ok(axes) = fits::peek_axes(file) {
            return Ok(axes);
        }
    }
    Err(StackError::StackEmpty)
}
