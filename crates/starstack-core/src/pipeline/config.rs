use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::align::AlignConfig;
use crate::background::BackgroundConfig;
use crate::calibrate::CfaChannel;
use crate::detect::StarDetectConfig;
use crate::frame::CfaPattern;
use crate::normalize::HistoNormMode;
use crate::stack::{StackMode, WeightMode};
use crate::stats::LocationScaleMode;

/// Full pipeline configuration, populated from the command line.
///
/// Every stage reads its settings from here; there is no global mutable
/// state.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub bad_pixel: BadPixelConfig,
    #[serde(default)]
    pub star_detect: StarDetectConfig,
    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub align: AlignConfig,
    #[serde(default)]
    pub normalize: HistoNormMode,
    #[serde(default)]
    pub estimator: LocationScaleMode,
    #[serde(default)]
    pub stack: StackConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
}

/// Calibration and geometry applied on ingress.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub dark: Option<PathBuf>,
    pub flat: Option<PathBuf>,
    /// Extract this CFA channel at half resolution.
    pub debayer: Option<CfaChannel>,
    /// CFA layout when the header does not carry one.
    pub cfa: CfaPattern,
    /// NxN binning; 0 or 1 disables.
    pub binning: u32,
    /// Rescale each frame to [0, 1] after calibration.
    pub normalize_range: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            dark: None,
            flat: None,
            debayer: None,
            cfa: CfaPattern::Rggb,
            binning: 0,
            normalize_range: false,
        }
    }
}

/// Bad-pixel rejection bounds in local sigmas.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BadPixelConfig {
    pub sig_low: f32,
    pub sig_high: f32,
}

impl Default for BadPixelConfig {
    fn default() -> Self {
        Self {
            sig_low: 3.0,
            sig_high: 5.0,
        }
    }
}

/// Stacking estimator and resource settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StackConfig {
    pub mode: StackMode,
    /// Target clipping percentages driving the adaptive sigma search.
    pub clip_percent_low: f32,
    pub clip_percent_high: f32,
    /// Explicit sigma bounds; negative values mean "search for them".
    /// Explicit sigmas take priority over the clipping percentages.
    pub sig_low: f32,
    pub sig_high: f32,
    pub weight: WeightMode,
    /// Memory budget in MiB; 0 means 70% of physical memory.
    pub memory_mib: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            mode: StackMode::Auto,
            clip_percent_low: 0.5,
            clip_percent_high: 0.5,
            sig_low: -1.0,
            sig_high: -1.0,
            weight: WeightMode::Unweighted,
            memory_mib: 0,
        }
    }
}

/// Output shaping applied after the stack is folded.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output gamma; 1 keeps linear light data.
    pub gamma: f32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { gamma: 1.0 }
    }
}

/// Filename patterns for intermediate artifacts. Each pattern contains an
/// `{id}` placeholder replaced by the zero-padded frame or batch number.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ArtifactConfig {
    /// Pre-processed frames.
    pub pre: Option<String>,
    /// Star detection maps.
    pub stars: Option<String>,
    /// Extracted background maps.
    pub background: Option<String>,
    /// Post-processed (aligned, normalized) frames.
    pub post: Option<String>,
    /// Per-batch stack results.
    pub batch: Option<String>,
}

/// Expand an artifact pattern for a frame or batch id.
pub fn artifact_path(pattern: &str, id: usize) -> PathBuf {
    PathBuf::from(pattern.replace("{id}", &format!("{id:04}")))
}
