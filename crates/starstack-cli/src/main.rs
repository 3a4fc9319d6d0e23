mod commands;
mod progress;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "starstack", about = "Astrophotography image stacking pipeline")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Tee log output to this file; %auto derives it from the output
    /// filename, an empty value disables the log file
    #[arg(long, global = true, default_value = "%auto")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show input frame statistics
    Stats(commands::stats::StatsArgs),
    /// Calibrate, align and stack input frames
    Stack(commands::stack::StackArgs),
    /// Stretch a single image
    Stretch(commands::stretch::StretchArgs),
    /// Combine color channels; inputs are r, g, b in that order
    Rgb(commands::rgb::RgbArgs),
    /// Combine color channels aligned to a luminance input (l, r, g, b)
    Argb(commands::rgb::RgbArgs),
    /// Combine color channels and apply the luminance input (l, r, g, b)
    Lrgb(commands::rgb::RgbArgs),
    /// Show license and attribution information
    Legal,
    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_path = resolve_log_path(&cli.log, output_of(&cli.command));
    init_logging(cli.verbose, log_path.as_deref())?;

    match &cli.command {
        Commands::Stats(args) => commands::stats::run(args),
        Commands::Stack(args) => commands::stack::run(args),
        Commands::Stretch(args) => commands::stretch::run(args),
        Commands::Rgb(args) => commands::rgb::run(args, starstack_core::pipeline::CombineMode::Rgb),
        Commands::Argb(args) => {
            commands::rgb::run(args, starstack_core::pipeline::CombineMode::Argb)
        }
        Commands::Lrgb(args) => {
            commands::rgb::run(args, starstack_core::pipeline::CombineMode::Lrgb)
        }
        Commands::Legal => {
            commands::legal::run();
            Ok(())
        }
        Commands::Version => {
            println!("starstack {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn output_of(command: &Commands) -> Option<&Path> {
    match command {
        Commands::Stack(args) => Some(&args.out),
        Commands::Stretch(args) => Some(&args.out),
        Commands::Rgb(args) | Commands::Argb(args) | Commands::Lrgb(args) => Some(&args.out),
        _ => None,
    }
}

/// Resolve the `%auto` log filename: the output path with a `.log` suffix.
fn resolve_log_path(flag: &str, output: Option<&Path>) -> Option<PathBuf> {
    match flag {
        "" => None,
        "%auto" => output.map(|out| out.with_extension("log")),
        path => Some(PathBuf::from(path)),
    }
}

fn init_logging(verbose: bool, log_path: Option<&Path>) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    let registry = tracing_subscriber::registry().with(filter).with(stdout_layer);

    match log_path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("unable to open logfile '{}'", path.display()))?;
            let file_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Arc::new(file));
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
    Ok(())
}
