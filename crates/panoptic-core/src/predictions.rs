use panoptic_training::{PredictionBatch, PredictionSink, TrainingResult};
use std::path::{Path, PathBuf};
use tracing::debug;

const BATCH_PREFIX: &str = "batch_";

/// Writes each prediction batch to `<dir>/batch_<idx>.json`.
#[derive(Debug, Clone)]
pub struct JsonPredictionSink {
    dir: PathBuf,
}

/// Whether `path` is a batch file written by [`JsonPredictionSink`].
#[must_use]
pub fn is_batch_file(path: &Path) -> bool {
    path.is_file()
        && path.extension().is_some_and(|e| e == "json")
        && path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with(BATCH_PREFIX))
}

impl JsonPredictionSink {
    /// Open `dir` for a new prediction run, removing batches left by an
    /// earlier one.
    pub fn create(dir: &Path) -> TrainingResult<Self> {
        std::fs::create_dir_all(dir)?;
        let mut removed = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if is_batch_file(&path) {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("removed {removed} stale prediction batches from {}", dir.display());
        }
        Ok(Self { dir: dir.to_path_buf() })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn batch_path(&self, batch_idx: usize) -> PathBuf {
        self.dir.join(format!("{BATCH_PREFIX}{batch_idx:05}.json"))
    }
}

impl PredictionSink for JsonPredictionSink {
    fn write(&self, batch: &PredictionBatch) -> TrainingResult<()> {
        std::fs::write(self.batch_path(batch.batch_idx), serde_json::to_string_pretty(batch)?)?;
        Ok(())
    }
}
