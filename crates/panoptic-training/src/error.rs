use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid run configuration: {0}")]
    Config(String),

    #[error("unsupported dataset type '{value}', expected one of: {}", .accepted.join(", "))]
    UnsupportedDataset { value: String, accepted: Vec<&'static str> },

    #[error("unsupported model name '{value}', expected one of: {}", .accepted.join(", "))]
    UnsupportedModel { value: String, accepted: Vec<&'static str> },

    #[error("unsupported solver '{value}', expected one of: {}", .accepted.join(", "))]
    UnsupportedSolver { value: String, accepted: Vec<&'static str> },

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("trainer error: {0}")]
    Trainer(String),

    #[error("training runtime exited with {status}")]
    RuntimeExit { status: String, code: Option<i32> },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    /// Exit code of a training runtime that failed, if it exited with one.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::RuntimeExit { code, .. } => *code,
            _ => None,
        }
    }
}
