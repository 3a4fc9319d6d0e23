use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use starstack_core::normalize::HistoNormMode;
use starstack_core::pipeline::{self, PipelineConfig};

use super::args::{CommandDefaults, PreprocessArgs};
use crate::progress::CliReporter;

#[derive(Args, Debug)]
pub struct StatsArgs {
    #[command(flatten)]
    pub preprocess: PreprocessArgs,

    /// Input light frames
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

pub fn run(args: &StatsArgs) -> Result<()> {
    // Inputs may be single frames or finished stacks, so keep the noise
    // elimination pre-pass on by default.
    let defaults = CommandDefaults {
        star_bp_sig: 5.0,
        norm_hist: HistoNormMode::None,
        force_norm_range: false,
    };
    let mut config = PipelineConfig::default();
    args.preprocess.apply(&mut config, &defaults)?;

    let reporter = CliReporter::new();
    pipeline::run_stats(&args.inputs, &config, &reporter)?;
    Ok(())
}
