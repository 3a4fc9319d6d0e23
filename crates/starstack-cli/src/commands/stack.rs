use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use starstack_core::io::fits;
use starstack_core::normalize::HistoNormMode;
use starstack_core::pipeline::{self, PipelineConfig};

use super::args::{CommandDefaults, PostprocessArgs, PreprocessArgs, StackingArgs};
use crate::progress::CliReporter;

#[derive(Args, Debug)]
pub struct StackArgs {
    #[command(flatten)]
    pub preprocess: PreprocessArgs,

    #[command(flatten)]
    pub postprocess: PostprocessArgs,

    #[command(flatten)]
    pub stacking: StackingArgs,

    /// Save output to this file
    #[arg(long, default_value = "out.fits")]
    pub out: PathBuf,

    /// Save stacked batches with this pattern, e.g. batch{id}.fits
    #[arg(long)]
    pub batch: Option<String>,

    /// Apply output gamma; 1 keeps linear light data
    #[arg(long, default_value_t = 1.0)]
    pub gamma: f32,

    /// Input light frames
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

pub fn run(args: &StackArgs) -> Result<()> {
    // Individual subexposures: default to the noise-elimination pre-pass
    // and location/scale histogram matching.
    let defaults = CommandDefaults {
        star_bp_sig: 5.0,
        norm_hist: HistoNormMode::LocationScale,
        force_norm_range: false,
    };
    let mut config = PipelineConfig::default();
    args.preprocess.apply(&mut config, &defaults)?;
    args.postprocess.apply(&mut config, &defaults);
    args.stacking.apply(&mut config)?;
    config.artifacts.batch = args.batch.clone();
    config.output.gamma = args.gamma;

    let reporter = CliReporter::new();
    let output = pipeline::run_stack(&args.inputs, &config, &reporter)?;

    info!(
        path = %args.out.display(),
        frames = output.frames_combined,
        exposure = output.total_exposure,
        "Writing stacked output"
    );
    fits::write_mono(&args.out, &output.data, &output.output_header())?;
    Ok(())
}
