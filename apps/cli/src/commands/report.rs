//! Human-readable run summaries.

use anyhow::Result;
use colored::Colorize;
use panoptic_training::{RunManifest, RunOutcome};

pub fn print_manifest(manifest: &RunManifest, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(manifest)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Run {} complete ({})", manifest.mode, manifest.trainer).bold().green());
    println!("  Run:     {}", manifest.run_id.cyan());
    println!("  Model:   {}", manifest.arch);
    println!("  Dataset: {}", manifest.dataset);
    if let Some(path) = &manifest.restored_from {
        println!("  Restored from: {}", path.display().to_string().dimmed());
    }

    match &manifest.outcome {
        RunOutcome::Fit(report) => {
            println!("  Epochs:  {}{}", report.epochs_run, if report.stopped_early { " (stopped early)" } else { "" });
            if let (Some(score), Some(path)) = (report.best_score, &report.best_checkpoint) {
                println!("  Best:    {score:.4} {}", path.display().to_string().dimmed());
            }
            if let Some(path) = &report.last_checkpoint {
                println!("  Last:    {}", path.display().to_string().dimmed());
            }
        }
        RunOutcome::Validation(report) => {
            for (key, value) in &report.metrics {
                println!("  {key:<16} {value:.4}");
            }
        }
        RunOutcome::Predictions { batches } => println!("  Prediction batches: {batches}"),
        RunOutcome::LrFind(report) => match report.suggestion {
            Some(lr) => println!("  LR found: {}", format!("{lr:e}").cyan()),
            None => println!("  {}", "No learning rate suggestion".yellow()),
        },
    }
    println!();
    Ok(())
}
