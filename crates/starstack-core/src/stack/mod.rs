pub mod adaptive;
pub mod incremental;
pub mod linear_fit;
pub mod mean;
pub mod median;
pub mod reference;
pub mod sigma_clip;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StackError};
use crate::frame::Frame;

/// Per-pixel combination estimator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StackMode {
    Median,
    Mean,
    SigmaClip,
    WinsorizedSigmaClip,
    LinearFit,
    /// Picks winsorized sigma-clip for 6+ frames, sigma-clip for 3+,
    /// mean otherwise.
    #[default]
    Auto,
}

impl StackMode {
    pub fn from_flag(flag: i64) -> Self {
        match flag {
            0 => StackMode::Median,
            1 => StackMode::Mean,
            2 => StackMode::SigmaClip,
            3 => StackMode::WinsorizedSigmaClip,
            4 => StackMode::LinearFit,
            _ => StackMode::Auto,
        }
    }

    /// Resolve `Auto` for a concrete frame count.
    pub fn resolve(self, frame_count: usize) -> StackMode {
        match self {
            StackMode::Auto => {
                if frame_count >= 6 {
                    StackMode::WinsorizedSigmaClip
                } else if frame_count >= 3 {
                    StackMode::SigmaClip
                } else {
                    StackMode::Mean
                }
            }
            other => other,
        }
    }

    /// Whether the mode rejects samples by sigma bounds.
    pub fn uses_sigmas(self) -> bool {
        matches!(
            self,
            StackMode::SigmaClip | StackMode::WinsorizedSigmaClip | StackMode::LinearFit
        )
    }
}

/// Frame weighting for stacking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WeightMode {
    #[default]
    Unweighted,
    Exposure,
    InverseNoise,
}

impl WeightMode {
    pub fn from_flag(flag: i64) -> Self {
        match flag {
            1 => WeightMode::Exposure,
            2 => WeightMode::InverseNoise,
            _ => WeightMode::Unweighted,
        }
    }
}

/// Per-frame stacking weights, or None for unweighted modes.
pub fn compute_weights(frames: &[Frame], mode: WeightMode) -> Result<Option<Vec<f32>>> {
    match mode {
        WeightMode::Unweighted => Ok(None),
        WeightMode::Exposure => {
            let mut weights = Vec::with_capacity(frames.len());
            for frame in frames {
                let exposure = frame.header.exposure_seconds;
                if exposure <= 0.0 {
                    return Err(StackError::MissingExposure { id: frame.id });
                }
                weights.push(exposure);
            }
            Ok(Some(weights))
        }
        WeightMode::InverseNoise => {
            let noises: Vec<f32> = frames
                .iter()
                .map(|f| f.stats.map(|s| s.noise).unwrap_or(0.0))
                .collect();
            let min = noises.iter().copied().fold(f32::MAX, f32::min);
            let max = noises.iter().copied().fold(f32::MIN, f32::max);
            if max - min < f32::EPSILON {
                return Ok(Some(vec![1.0; frames.len()]));
            }
            Ok(Some(
                noises
                    .iter()
                    .map(|&n| 1.0 / (1.0 + 4.0 * (n - min) / (max - min)))
                    .collect(),
            ))
        }
    }
}

/// Result of one per-pixel stack: combined image plus rejection accounting.
#[derive(Clone, Debug)]
pub struct StackOutcome {
    pub data: Array2<f32>,
    pub frames_combined: usize,
    /// Samples rejected below/above the clipping bounds.
    pub low_rejected: u64,
    pub high_rejected: u64,
    /// Finite samples considered across all pixels.
    pub samples: u64,
}

impl StackOutcome {
    /// Low/high rejection as a percentage of considered samples.
    pub fn rejection_percentages(&self) -> (f32, f32) {
        if self.samples == 0 {
            return (0.0, 0.0);
        }
        (
            100.0 * self.low_rejected as f32 / self.samples as f32,
            100.0 * self.high_rejected as f32 / self.samples as f32,
        )
    }
}

/// Combine aligned frames per pixel with the configured estimator.
///
/// `weights` must match the frame count when present. `ref_location`
/// anchors the first winsorizing iteration. `sig_low`/`sig_high` bound
/// rejection for the sigma modes. A pixel with too few surviving samples
/// yields NaN; the stack as a whole proceeds.
pub fn stack(
    frames: &[Frame],
    mode: StackMode,
    weights: Option<&[f32]>,
    ref_location: Option<f32>,
    sig_low: f32,
    sig_high: f32,
) -> Result<StackOutcome> {
    if frames.is_empty() {
        return Err(StackError::StackEmpty);
    }
    let dim = frames[0].data.dim();
    for frame in frames {
        if frame.data.dim() != dim {
            return Err(StackError::DimensionMismatch {
                context: format!("frame {} vs stack", frame.id),
                expected_width: dim.1,
                expected_height: dim.0,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }
    }
    if let Some(w) = weights {
        debug_assert_eq!(w.len(), frames.len());
    }

    let views: Vec<&[f32]> = frames.iter().map(|f| f.pixels()).collect();
    let resolved = mode.resolve(frames.len());

    let (data, low, high, samples) = match resolved {
        StackMode::Median => median::stack(&views, dim, weights),
        StackMode::Mean => mean::stack(&views, dim, weights),
        StackMode::SigmaClip => {
            sigma_clip::stack(&views, dim, weights, sig_low, sig_high, false, None)
        }
        StackMode::WinsorizedSigmaClip => {
            sigma_clip::stack(&views, dim, weights, sig_low, sig_high, true, ref_location)
        }
        StackMode::LinearFit => linear_fit::stack(&views, dim, sig_low, sig_high),
        StackMode::Auto => unreachable!("auto mode resolved above"),
    };

    Ok(StackOutcome {
        data,
        frames_combined: frames.len(),
        low_rejected: low,
        high_rejected: high,
        samples,
    })
}
