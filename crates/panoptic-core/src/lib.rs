//! Panoptic Core
//!
//! Concrete collaborators for segmentation training runs: the model wrapper,
//! folder-backed data modules, trainer backends, the run pipeline and the
//! multi-node launcher.

pub mod datamodule;
pub mod launcher;
pub mod model;
pub mod pipeline;
pub mod predictions;
pub mod profiles;
pub mod training;

pub use datamodule::FolderDataModule;
pub use launcher::{entry_point, launch, EntryPoint, LaunchArgs, LaunchModel};
pub use model::{CheckpointFile, SegmentationModel, SegmentationModelFactory};
pub use pipeline::{dispatch, PreparedRun, ResolvedRun, RunRequest};
pub use predictions::JsonPredictionSink;
pub use profiles::{profile_for, ModelProfile};
pub use training::{DryRunTrainer, ProcessTrainer, TRAINER_CMD_ENV};
