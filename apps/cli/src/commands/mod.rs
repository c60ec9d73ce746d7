//! Command implementations for the Panoptic CLI.

pub mod checkpoints;
pub mod launch;
pub mod report;
pub mod run;
pub mod types;

use anyhow::Result;
use panoptic_core::{DryRunTrainer, ProcessTrainer};
use panoptic_training::Trainer;
use types::BackendArgs;

/// Pick the trainer backend from the command-line flags.
pub fn select_trainer(backend: &BackendArgs) -> Result<Box<dyn Trainer>> {
    if backend.dry_run {
        return Ok(Box::new(DryRunTrainer::new()));
    }
    let trainer = match &backend.trainer_cmd {
        Some(cmd) => ProcessTrainer::from_command_line(cmd)?,
        None => ProcessTrainer::from_env()?,
    };
    Ok(Box::new(trainer))
}
