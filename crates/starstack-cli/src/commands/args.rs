use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;

use starstack_core::normalize::HistoNormMode;
use starstack_core::pipeline::config::PipelineConfig;
use starstack_core::stack::{StackMode, WeightMode};
use starstack_core::stats::LocationScaleMode;

/// Calibration, detection and background flags shared by every command
/// that ingests frames.
#[derive(Args, Debug)]
pub struct PreprocessArgs {
    /// Subtract this dark frame
    #[arg(long)]
    pub dark: Option<PathBuf>,

    /// Divide by this flat frame
    #[arg(long)]
    pub flat: Option<PathBuf>,

    /// Extract the given CFA channel (R, G or B) at half resolution
    #[arg(long)]
    pub debayer: Option<String>,

    /// Color filter array layout for debayering
    #[arg(long, default_value = "RGGB")]
    pub cfa: String,

    /// Apply NxN binning; 0 or 1 disables
    #[arg(long, default_value_t = 0)]
    pub binning: u32,

    /// Normalize each frame to [0,1] after calibration (1=on)
    #[arg(long = "normRange", default_value_t = 0)]
    pub norm_range: i64,

    /// Low sigma for bad pixel removal, in standard deviations
    #[arg(long = "bpSigLow", default_value_t = 3.0)]
    pub bp_sig_low: f32,

    /// High sigma for bad pixel removal, in standard deviations
    #[arg(long = "bpSigHigh", default_value_t = 5.0)]
    pub bp_sig_high: f32,

    /// Sigma for star detection, in standard deviations
    #[arg(long = "starSig", default_value_t = 10.0)]
    pub star_sig: f32,

    /// Sigma for the star detection bad-pixel pre-pass; -1 picks the
    /// command default
    #[arg(long = "starBpSig", default_value_t = -1.0, allow_hyphen_values = true)]
    pub star_bp_sig: f32,

    /// Radius for star detection, pixels
    #[arg(long = "starRadius", default_value_t = 16)]
    pub star_radius: usize,

    /// Background extraction grid size, pixels; 0 disables
    #[arg(long = "backGrid", default_value_t = 0)]
    pub back_grid: usize,

    /// Background extraction: sigma for foreground rejection
    #[arg(long = "backSigma", default_value_t = 1.5)]
    pub back_sigma: f32,

    /// Background extraction: clip the k brightest cells to their
    /// neighborhood median
    #[arg(long = "backClip", default_value_t = 0)]
    pub back_clip: usize,

    /// Location/scale estimator: 0=mean/stddev, 1=median/MAD, 2=IKSS,
    /// 3=iterative sigma-clipped sampled median and sampled Qn
    #[arg(long = "lsEst", default_value_t = 3)]
    pub ls_est: i64,

    /// Save pre-processed frames with this pattern, e.g. pre{id}.fits
    #[arg(long)]
    pub pre: Option<String>,

    /// Save star detection maps with this pattern, e.g. stars{id}.fits
    #[arg(long)]
    pub stars: Option<String>,

    /// Save extracted backgrounds with this pattern, e.g. back{id}.fits
    #[arg(long)]
    pub back: Option<String>,
}

/// Alignment and normalization flags.
#[derive(Args, Debug)]
pub struct PostprocessArgs {
    /// 1=align frames to the reference, 0=do not align
    #[arg(long, default_value_t = 1)]
    pub align: i64,

    /// Number of brightest stars used for triangle alignment
    #[arg(long = "alignK", default_value_t = 20)]
    pub align_k: usize,

    /// Drop frames whose alignment residual exceeds this many pixels
    #[arg(long = "alignT", default_value_t = 1.0)]
    pub align_t: f32,

    /// Histogram normalization: 0=off, 1=location and scale,
    /// 2=black point shift, 3=auto
    #[arg(long = "normHist", default_value_t = 3)]
    pub norm_hist: i64,

    /// Save post-processed frames with this pattern, e.g. post{id}.fits
    #[arg(long)]
    pub post: Option<String>,
}

/// Stacking estimator and resource flags.
#[derive(Args, Debug)]
pub struct StackingArgs {
    /// Stacking mode: 0=median, 1=mean, 2=sigma clip,
    /// 3=winsorized sigma clip, 4=linear fit, 5=auto
    #[arg(long = "stMode", default_value_t = 5)]
    pub st_mode: i64,

    /// Desired low clipping percentage; ignored when explicit sigmas are
    /// given
    #[arg(long = "stClipPercLow", default_value_t = 0.5)]
    pub st_clip_perc_low: f32,

    /// Desired high clipping percentage; ignored when explicit sigmas are
    /// given
    #[arg(long = "stClipPercHigh", default_value_t = 0.5)]
    pub st_clip_perc_high: f32,

    /// Low sigma for stacking; -1 searches via the clipping percentage.
    /// Explicit sigmas take priority over clipping percentages.
    #[arg(long = "stSigLow", default_value_t = -1.0, allow_hyphen_values = true)]
    pub st_sig_low: f32,

    /// High sigma for stacking; -1 searches via the clipping percentage.
    /// Explicit sigmas take priority over clipping percentages.
    #[arg(long = "stSigHigh", default_value_t = -1.0, allow_hyphen_values = true)]
    pub st_sig_high: f32,

    /// Stacking weights: 0=unweighted, 1=by exposure, 2=by inverse noise
    #[arg(long = "stWeight", default_value_t = 0)]
    pub st_weight: i64,

    /// Memory budget for stacking in MiB; 0 uses 70% of physical memory
    #[arg(long = "stMemory", default_value_t = 0)]
    pub st_memory: usize,
}

/// Per-command defaults for flags whose neutral value means "auto".
pub struct CommandDefaults {
    /// starBpSig when -1: 5 for raw lights, 0 for pre-stacked channels.
    pub star_bp_sig: f32,
    /// normHist when auto.
    pub norm_hist: HistoNormMode,
    /// Force [0,1] range normalization regardless of the flag.
    pub force_norm_range: bool,
}

impl PreprocessArgs {
    pub fn apply(
        &self,
        config: &mut PipelineConfig,
        defaults: &CommandDefaults,
    ) -> Result<()> {
        config.calibration.dark = self.dark.clone();
        config.calibration.flat = self.flat.clone();
        config.calibration.debayer = match &self.debayer {
            Some(channel) => Some(channel.parse().map_err(anyhow::Error::msg)?),
            None => None,
        };
        config.calibration.cfa = self.cfa.parse().map_err(anyhow::Error::msg)?;
        config.calibration.binning = self.binning;
        config.calibration.normalize_range = defaults.force_norm_range || self.norm_range != 0;

        config.bad_pixel.sig_low = self.bp_sig_low;
        config.bad_pixel.sig_high = self.bp_sig_high;

        config.star_detect.sigma = self.star_sig;
        config.star_detect.bad_pixel_sigma = if self.star_bp_sig < 0.0 {
            defaults.star_bp_sig
        } else {
            self.star_bp_sig
        };
        config.star_detect.radius = self.star_radius;

        config.background.grid = self.back_grid;
        config.background.sigma = self.back_sigma;
        config.background.clip = self.back_clip;

        config.estimator = LocationScaleMode::from_flag(self.ls_est);

        config.artifacts.pre = self.pre.clone();
        config.artifacts.stars = self.stars.clone();
        config.artifacts.background = self.back.clone();
        Ok(())
    }
}

impl PostprocessArgs {
    pub fn apply(&self, config: &mut PipelineConfig, defaults: &CommandDefaults) {
        config.align.enabled = self.align != 0;
        config.align.k = self.align_k;
        config.align.threshold = self.align_t;
        config.normalize = HistoNormMode::from_flag(self.norm_hist).resolve(defaults.norm_hist);
        config.artifacts.post = self.post.clone();
    }
}

impl StackingArgs {
    pub fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        config.stack.mode = StackMode::from_flag(self.st_mode);
        config.stack.clip_percent_low = self.st_clip_perc_low;
        config.stack.clip_percent_high = self.st_clip_perc_high;
        config.stack.sig_low = self.st_sig_low;
        config.stack.sig_high = self.st_sig_high;
        config.stack.weight = WeightMode::from_flag(self.st_weight);
        config.stack.memory_mib = self.st_memory;

        if (self.st_sig_low >= 0.0) != (self.st_sig_high >= 0.0) {
            bail!("stSigLow and stSigHigh must be given together");
        }
        Ok(())
    }
}
