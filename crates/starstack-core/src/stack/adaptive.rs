use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::consts::{
    ADAPTIVE_MAX_ITERATIONS, ADAPTIVE_SAMPLE_FRACTION, ADAPTIVE_TOLERANCE_PERCENT,
};
use crate::error::Result;
use crate::frame::Frame;

use super::{linear_fit, sigma_clip, stack, StackMode, StackOutcome};

/// Search sigma bounds matching the requested clipping percentages, then
/// stack with them.
///
/// Trial stacks run on a deterministic sample of 1% of the pixel
/// positions, drawn without replacement; each bound is bisected until its
/// empirical rejection percentage lands within tolerance of the target or
/// the iteration cap is reached. The found bounds are returned so later
/// batches can reuse them verbatim.
pub fn find_sigmas_and_stack(
    frames: &[Frame],
    mode: StackMode,
    weights: Option<&[f32]>,
    ref_location: Option<f32>,
    clip_percent_low: f32,
    clip_percent_high: f32,
    seed: u64,
) -> Result<(StackOutcome, f32, f32)> {
    if frames.is_empty() {
        return Err(crate::error::StackError::StackEmpty);
    }
    let resolved = mode.resolve(frames.len());
    if !resolved.uses_sigmas() {
        let outcome = stack(frames, resolved, weights, ref_location, 0.0, 0.0)?;
        return Ok((outcome, 0.0, 0.0));
    }

    let (h, w) = frames[0].data.dim();
    let pixel_count = h * w;
    let sample_count = ((pixel_count as f64 * ADAPTIVE_SAMPLE_FRACTION) as usize)
        .max(64)
        .min(pixel_count);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    // Distinct positions, kept in draw order so the trial is reproducible;
    // repeats would silently double-weight their pixels in the measured
    // rejection fraction.
    let mut drawn = std::collections::HashSet::with_capacity(sample_count);
    let mut indices = Vec::with_capacity(sample_count);
    while indices.len() < sample_count {
        let index = rng.gen_range(0..pixel_count);
        if drawn.insert(index) {
            indices.push(index);
        }
    }

    // Gather the sampled columns once per frame.
    let sampled: Vec<Vec<f32>> = frames
        .iter()
        .map(|f| {
            let pixels = f.pixels();
            indices.iter().map(|&i| pixels[i]).collect()
        })
        .collect();

    let mut low_bracket = (0.5f32, 10.0f32);
    let mut high_bracket = (0.5f32, 10.0f32);
    let mut sig_low = 0.5 * (low_bracket.0 + low_bracket.1);
    let mut sig_high = 0.5 * (high_bracket.0 + high_bracket.1);

    for iteration in 0..ADAPTIVE_MAX_ITERATIONS {
        let (measured_low, measured_high) = trial_rejection(
            &sampled,
            resolved,
            weights,
            ref_location,
            sig_low,
            sig_high,
        );
        debug!(
            iteration,
            sig_low, sig_high, measured_low, measured_high, "Adaptive sigma trial"
        );

        let low_done = (measured_low - clip_percent_low).abs() <= ADAPTIVE_TOLERANCE_PERCENT;
        let high_done = (measured_high - clip_percent_high).abs() <= ADAPTIVE_TOLERANCE_PERCENT;
        if low_done && high_done {
            break;
        }

        // A larger sigma rejects fewer samples.
        if !low_done {
            if measured_low > clip_percent_low {
                low_bracket.0 = sig_low;
            } else {
                low_bracket.1 = sig_low;
            }
            sig_low = 0.5 * (low_bracket.0 + low_bracket.1);
        }
        if !high_done {
            if measured_high > clip_percent_high {
                high_bracket.0 = sig_high;
            } else {
                high_bracket.1 = sig_high;
            }
            sig_high = 0.5 * (high_bracket.0 + high_bracket.1);
        }
    }

    info!(sig_low, sig_high, "Adaptive sigma search converged");
    let outcome = stack(frames, resolved, weights, ref_location, sig_low, sig_high)?;
    Ok((outcome, sig_low, sig_high))
}

/// Rejection percentages of a trial stack over the sampled pixels.
fn trial_rejection(
    sampled: &[Vec<f32>],
    mode: StackMode,
    weights: Option<&[f32]>,
    ref_location: Option<f32>,
    sig_low: f32,
    sig_high: f32,
) -> (f32, f32) {
    let n = sampled.len();
    let m = sampled[0].len();
    let midpoint = (n.saturating_sub(1)) as f32 * 0.5;

    let mut low = 0u64;
    let mut high = 0u64;
    let mut samples = 0u64;
    let mut values: Vec<f32> = Vec::with_capacity(n);
    let mut pixel_weights: Vec<f32> = Vec::with_capacity(n);
    let mut points: Vec<(f32, f32)> = Vec::with_capacity(n);
    let mut residuals: Vec<f32> = Vec::with_capacity(n);

    for col in 0..m {
        match mode {
            StackMode::LinearFit => {
                points.clear();
                for (i, frame_samples) in sampled.iter().enumerate() {
                    let v = frame_samples[col];
                    if v.is_finite() {
                        points.push((i as f32, v));
                    }
                }
                samples += points.len() as u64;
                let (_, l, h) =
                    linear_fit::fit_samples(&mut points, &mut residuals, sig_low, sig_high, midpoint);
                low += l as u64;
                high += h as u64;
            }
            _ => {
                values.clear();
                pixel_weights.clear();
                for (i, frame_samples) in sampled.iter().enumerate() {
                    let v = frame_samples[col];
                    if v.is_finite() {
                        values.push(v);
                        pixel_weights.push(weights.map_or(1.0, |ws| ws[i]));
                    }
                }
                samples += values.len() as u64;
                let winsorize = mode == StackMode::WinsorizedSigmaClip;
                let anchor = if winsorize { ref_location } else { None };
                let (_, l, h) = sigma_clip::clip_samples(
                    &mut values,
                    &pixel_weights,
                    sig_low,
                    sig_high,
                    winsorize,
                    anchor,
                );
                low += l as u64;
                high += h as u64;
            }
        }
    }

    if samples == 0 {
        return (0.0, 0.0);
    }
    (
        100.0 * low as f32 / samples as f32,
        100.0 * high as f32 / samples as f32,
    )
}
