use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use starstack_core::filters;
use starstack_core::io::fits::{self, OutputHeader};
use starstack_core::stats::{self, LocationScaleMode};

#[derive(Args, Debug)]
pub struct StretchArgs {
    /// Save output to this file
    #[arg(long, default_value = "out.fits")]
    pub out: PathBuf,

    /// Histogram peak location to target, in percent; 0 disables
    #[arg(long = "autoLoc", default_value_t = 10.0)]
    pub auto_loc: f32,

    /// Apply output gamma; 1 keeps linear light data
    #[arg(long, default_value_t = 1.0)]
    pub gamma: f32,

    /// Input image
    pub input: PathBuf,
}

pub fn run(args: &StretchArgs) -> Result<()> {
    let (mut data, header) = fits::read_mono(&args.input)?;
    let input_stats = stats::compute_stats(&data, LocationScaleMode::SampledSigmaClip, 0);
    info!(%input_stats, "Input statistics");

    if args.auto_loc > 0.0 {
        filters::auto_stretch(&mut data, args.auto_loc);
    }
    if (args.gamma - 1.0).abs() > f32::EPSILON {
        filters::apply_gamma(&mut data, args.gamma);
    }

    info!(path = %args.out.display(), "Writing stretched output");
    fits::write_mono(
        &args.out,
        &data,
        &OutputHeader {
            exposure_seconds: header.exposure_seconds,
            date_obs: header.date_obs,
            ..Default::default()
        },
    )?;
    Ok(())
}
