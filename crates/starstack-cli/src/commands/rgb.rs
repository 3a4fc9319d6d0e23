use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use starstack_core::io::fits;
use starstack_core::normalize::HistoNormMode;
use starstack_core::pipeline::{self, CombineMode, PipelineConfig};

use super::args::{CommandDefaults, PostprocessArgs, PreprocessArgs};
use crate::progress::CliReporter;

#[derive(Args, Debug)]
pub struct RgbArgs {
    #[command(flatten)]
    pub preprocess: PreprocessArgs,

    #[command(flatten)]
    pub postprocess: PostprocessArgs,

    /// Save output to this file
    #[arg(long, default_value = "out.fits")]
    pub out: PathBuf,

    /// Input channels, in command order
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

pub fn run(args: &RgbArgs, mode: CombineMode) -> Result<()> {
    // Channels are pre-stacked and already noise-cleaned; combine on a
    // common [0,1] range without reshaping histograms.
    let defaults = CommandDefaults {
        star_bp_sig: 0.0,
        norm_hist: HistoNormMode::None,
        force_norm_range: true,
    };
    let mut config = PipelineConfig::default();
    args.preprocess.apply(&mut config, &defaults)?;
    args.postprocess.apply(&mut config, &defaults);

    let reporter = CliReporter::new();
    let (image, header) = pipeline::run_combine(&args.inputs, &config, mode, &reporter)?;

    info!(path = %args.out.display(), ?mode, "Writing combined output");
    fits::write_rgb(&args.out, image.planes(), &header)?;
    Ok(())
}
