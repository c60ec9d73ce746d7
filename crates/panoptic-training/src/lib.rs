//! Panoptic Training
//!
//! Backend-agnostic pieces of a segmentation training run:
//! - Resolving a run configuration (`RunConfiguration`)
//! - Selecting a dataset and its categories (`DatasetDescriptor`)
//! - Constructing or restoring a model (`resolve_model`)
//! - Assembling training-loop observers (`CallbackSet`)
//! - Choosing a run mode and driving a backend (`RunMode`, `Trainer`)

pub mod artifacts;
pub mod callbacks;
pub mod config;
pub mod dataset;
pub mod distributed;
pub mod error;
pub mod layout;
pub mod model;
pub mod progress;
pub mod registry;
pub mod run_mode;
pub mod trainer;

pub use artifacts::{ArtifactKind, RunArtifact, RunManifest, RunOutcome};
pub use callbacks::{
    CallbackAction, CallbackSet, Direction, EpochOutcome, Metric, MonitorProfile, DEFAULT_PATIENCE, SHORT_PATIENCE,
};
pub use config::{CheckpointSlot, RunConfiguration, RuntimeEnvironment, SolverKind, CHECKPOINT_SENTINEL};
pub use dataset::{log_interval, select_dataset, DataModule, DataModuleSpec, DataSplits, DatasetDescriptor, DatasetKind};
pub use distributed::DistributedEnv;
pub use error::{TrainingError, TrainingResult};
pub use layout::RunLayout;
pub use model::{
    resolve_model, InferenceScope, ModelArch, ModelFactory, ModelHandle, ModelOrigin, ModelSummary, ParameterGroup,
    ResolvedModel,
};
pub use progress::{ProgressEvent, ProgressSink, TracingProgressSink};
pub use registry::{discover_checkpoints, CheckpointEntry, CheckpointRole};
pub use run_mode::{LrRange, RunFlags, RunMode};
pub use trainer::{
    FitReport, LrFindReport, LrProbe, OptimizerPlan, PredictionBatch, PredictionSink, RunContext, RunPlan, Trainer,
    TrainerOptions, ValidationReport,
};
