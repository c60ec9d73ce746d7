//! Panoptic CLI - launches and drives segmentation training runs
//!
//! This CLI provides a `panoptic` command that resolves a model, dataset and
//! configuration into a run and hands it to a trainer backend.

mod commands;
mod logging;

use clap::{Parser, Subcommand};
use colored::Colorize;
use panoptic_training::TrainingError;
use std::process::ExitCode;

use commands::types::{CheckpointsCommand, LaunchCommand, RunCommand};
use commands::{checkpoints, launch, run};

/// Panoptic - EfficientPS / Mask R-CNN training launcher
#[derive(Parser, Debug)]
#[command(
    name = "panoptic",
    author,
    version,
    about = "Panoptic - segmentation training launcher",
    long_about = "Resolves a model, dataset and configuration into a training run and executes exactly one of tune, predict, eval or fit.\nDistributed runs are coordinated through the environment of the spawned training runtime."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        default_value = "info",
        global = true,
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a multi-node fit for an EfficientPS variant
    ///
    /// Builds the distributed environment (master address, port 12355,
    /// world size = nodes x gpus) and runs the model's training entry point.
    Launch(LaunchCommand),

    /// Run a single model: fit, or tune / predict / eval when flagged
    Run(RunCommand),

    /// Inspect checkpoints in a checkpoint directory
    #[command(subcommand)]
    Checkpoints(CheckpointsCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let log = logging::init(&args.log_level)?;

    let result = match args.command {
        Command::Launch(cmd) => launch::execute(cmd, &log).await,
        Command::Run(cmd) => run::execute(cmd, &log).await,
        Command::Checkpoints(cmd) => checkpoints::execute(cmd),
    };

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => match err.downcast_ref::<TrainingError>().and_then(TrainingError::exit_code) {
            // Exit with the training runtime's own status.
            Some(code) => {
                eprintln!("{} {err:#}", "Error:".red().bold());
                Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
            }
            None => Err(err),
        },
    }
}
