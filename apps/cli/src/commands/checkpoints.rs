//! `panoptic checkpoints`: inspect checkpoint directories.

use crate::commands::types::CheckpointsCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use panoptic_training::{discover_checkpoints, CheckpointRole};
use std::path::Path;

pub fn execute(cmd: CheckpointsCommand) -> Result<()> {
    match cmd {
        CheckpointsCommand::List { dir, json } => list(&dir, json),
    }
}

fn list(dir: &Path, json: bool) -> Result<()> {
    let entries = discover_checkpoints(dir).with_context(|| format!("Failed to list {}", dir.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Checkpoints ({})", entries.len()).bold().cyan());
    println!();

    if entries.is_empty() {
        println!("  {}", "No checkpoints found.".dimmed());
        println!();
        return Ok(());
    }

    println!("{:<10} {:>6} {:>10} {:>12}  {}", "Role", "Epoch", "Score", "Size", "Path");
    println!("{}", "─".repeat(90));
    for entry in entries {
        let role = match entry.role {
            CheckpointRole::Last => "last".green(),
            CheckpointRole::Monitored => "best".cyan(),
            CheckpointRole::Other => "other".dimmed(),
        };
        let epoch = entry.epoch.map(|e| e.to_string()).unwrap_or_default();
        let score = entry.score.map(|s| format!("{s:.4}")).unwrap_or_default();
        println!(
            "{:<10} {:>6} {:>10} {:>12}  {}",
            role,
            epoch,
            score,
            entry.size_bytes,
            entry.path.display().to_string().dimmed()
        );
    }
    println!();
    Ok(())
}
