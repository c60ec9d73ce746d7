use crate::dataset::DatasetKind;
use crate::error::{TrainingError, TrainingResult};
use crate::model::{ModelArch, ModelOrigin};
use crate::run_mode::RunMode;
use crate::trainer::{FitReport, LrFindReport, ValidationReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    BestCheckpoint,
    LastCheckpoint,
    RunPlan,
    Log,
    Predictions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunOutcome {
    Fit(FitReport),
    Validation(ValidationReport),
    Predictions { batches: usize },
    LrFind(LrFindReport),
}

/// Summary written next to the checkpoints after every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub trainer: String,
    pub arch: ModelArch,
    pub dataset: DatasetKind,
    pub mode: RunMode,
    pub restored_from: Option<PathBuf>,
    pub outcome: RunOutcome,
    pub artifacts: Vec<RunArtifact>,
}

impl RunManifest {
    #[must_use]
    pub fn restored_path(origin: &ModelOrigin) -> Option<PathBuf> {
        match origin {
            ModelOrigin::Fresh => None,
            ModelOrigin::Restored(path) => Some(path.clone()),
        }
    }

    pub fn write(&self, path: &Path) -> TrainingResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> TrainingResult<RunArtifact> {
    if !path.exists() {
        return Err(TrainingError::Checkpoint(format!("artifact path does not exist: {}", path.display())));
    }

    let hash = sha256_file(&path)?;
    Ok(RunArtifact { kind, path, sha256: hash })
}
