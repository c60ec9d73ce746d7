use crate::run_mode::RunMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { run_id: String, mode: RunMode },
    Message { run_id: String, message: String },
    Epoch { run_id: String, epoch: u32, metrics: BTreeMap<String, f64>, lr: Option<f64> },
    LrSuggestion { run_id: String, lr: f64 },
    Finished { run_id: String },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards progress to the tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run_id, mode } => info!("[run:{run_id}] {mode} started"),
            ProgressEvent::Message { run_id, message } => info!("[run:{run_id}] {message}"),
            ProgressEvent::Epoch { run_id, epoch, metrics, lr } => {
                let rendered: Vec<String> = metrics.iter().map(|(k, v)| format!("{k}={v:.4}")).collect();
                match lr {
                    Some(lr) => info!("[run:{run_id}] epoch {epoch} {} lr={lr:e}", rendered.join(" ")),
                    None => info!("[run:{run_id}] epoch {epoch} {}", rendered.join(" ")),
                }
            }
            ProgressEvent::LrSuggestion { run_id, lr } => info!("[run:{run_id}] LR found: {lr:e}"),
            ProgressEvent::Finished { run_id } => info!("[run:{run_id}] finished"),
        }
    }
}
