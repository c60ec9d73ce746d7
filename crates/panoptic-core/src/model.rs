//! Segmentation model wrapper backed by a JSON checkpoint document.
//!
//! The network itself runs in the external training runtime. What lives
//! here is the state the launcher is responsible for: architecture,
//! categories, optimizer hyper-parameters, parameter groups, train/eval and
//! gradient flags, and a reference to the weights file.

use panoptic_training::artifacts::sha256_file;
use panoptic_training::{
    ModelArch, ModelFactory, ModelHandle, ParameterGroup, RunConfiguration, SolverKind, TrainingError,
    TrainingResult,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParameters {
    pub learning_rate: f64,
    pub solver: SolverKind,
    pub weight_decay: f64,
    pub categories: Vec<String>,
}

/// Weights produced by the training runtime, stored next to the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightsRef {
    /// Relative to the checkpoint file's directory unless absolute.
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointFile {
    pub arch: ModelArch,
    pub epoch: u32,
    pub global_step: u64,
    pub hyper_parameters: HyperParameters,
    pub parameter_groups: Vec<ParameterGroup>,
    #[serde(default)]
    pub weights: Option<WeightsRef>,
}

impl CheckpointFile {
    pub fn read(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TrainingError::Checkpoint(format!("{} is not a valid checkpoint: {}", path.display(), e)))
    }
}

fn group(name: &str, count: u64, trainable: bool) -> ParameterGroup {
    ParameterGroup { name: name.to_string(), count, trainable }
}

/// Nominal parameter layout per architecture. The stem stays frozen.
fn default_parameter_groups(arch: ModelArch) -> Vec<ParameterGroup> {
    let mut groups = vec![group("backbone.stem", 9_536, false)];
    match arch {
        ModelArch::EfficientPs | ModelArch::EfficientPsPlus => {
            groups.push(group("backbone.blocks", 28_331_200, true));
            groups.push(group("two_way_fpn", 6_215_424, true));
            groups.push(group("semantic_head", 1_308_944, true));
            groups.push(group("instance_head", 14_126_380, true));
            if arch == ModelArch::EfficientPsPlus {
                groups.push(group("panoptic_refiner", 2_360_064, true));
            }
        }
        ModelArch::EfficientPsSemantic => {
            groups.push(group("backbone.blocks", 28_331_200, true));
            groups.push(group("two_way_fpn", 6_215_424, true));
            groups.push(group("semantic_head", 1_308_944, true));
        }
        ModelArch::EfficientPsInstance => {
            groups.push(group("backbone.blocks", 28_331_200, true));
            groups.push(group("two_way_fpn", 6_215_424, true));
            groups.push(group("instance_head", 14_126_380, true));
        }
        ModelArch::MaskRcnn => {
            groups.push(group("backbone.body", 23_454_912, true));
            groups.push(group("backbone.fpn", 3_344_384, true));
            groups.push(group("rpn", 593_935, true));
            groups.push(group("roi_heads", 16_466_130, true));
        }
        ModelArch::PanDepth => {
            groups.push(group("backbone.blocks", 28_331_200, true));
            groups.push(group("two_way_fpn", 6_215_424, true));
            groups.push(group("semantic_head", 1_308_944, true));
            groups.push(group("depth_head", 1_181_953, true));
        }
    }
    groups
}

#[derive(Debug, Clone)]
pub struct SegmentationModel {
    arch: ModelArch,
    categories: Vec<String>,
    learning_rate: f64,
    solver: SolverKind,
    weight_decay: f64,
    groups: Vec<ParameterGroup>,
    training: bool,
    grad_enabled: bool,
    epoch: u32,
    global_step: u64,
    weights: Option<WeightsRef>,
}

impl SegmentationModel {
    #[must_use]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    #[must_use]
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    #[must_use]
    pub fn solver(&self) -> SolverKind {
        self.solver
    }

    #[must_use]
    pub fn weights(&self) -> Option<&WeightsRef> {
        self.weights.as_ref()
    }

    fn to_checkpoint(&self) -> CheckpointFile {
        CheckpointFile {
            arch: self.arch,
            epoch: self.epoch,
            global_step: self.global_step,
            hyper_parameters: HyperParameters {
                learning_rate: self.learning_rate,
                solver: self.solver,
                weight_decay: self.weight_decay,
                categories: self.categories.clone(),
            },
            parameter_groups: self.groups.clone(),
            weights: self.weights.clone(),
        }
    }
}

impl ModelHandle for SegmentationModel {
    fn arch(&self) -> ModelArch {
        self.arch
    }

    fn categories(&self) -> &[String] {
        &self.categories
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_grad_enabled(&self) -> bool {
        self.grad_enabled
    }

    fn set_grad_enabled(&mut self, enabled: bool) {
        self.grad_enabled = enabled;
    }

    fn parameter_groups(&self) -> &[ParameterGroup] {
        &self.groups
    }

    fn save_checkpoint(&self, path: &Path) -> TrainingResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.to_checkpoint())?;
        std::fs::write(path, json)?;
        debug!("saved {} checkpoint to {}", self.arch, path.display());
        Ok(())
    }

    fn record_progress(&mut self, epoch: u32, global_step: u64) {
        self.epoch = epoch;
        self.global_step = global_step;
    }
}

/// Builds [`SegmentationModel`]s for one architecture.
#[derive(Debug, Clone, Copy)]
pub struct SegmentationModelFactory {
    arch: ModelArch,
}

impl SegmentationModelFactory {
    #[must_use]
    pub const fn new(arch: ModelArch) -> Self {
        Self { arch }
    }
}

impl ModelFactory for SegmentationModelFactory {
    type Model = SegmentationModel;

    fn construct(&self, config: &RunConfiguration, categories: &[String]) -> TrainingResult<SegmentationModel> {
        Ok(SegmentationModel {
            arch: self.arch,
            categories: categories.to_vec(),
            learning_rate: config.solver.learning_rate_for(self.arch),
            solver: config.solver.name,
            weight_decay: config.solver.weight_decay,
            groups: default_parameter_groups(self.arch),
            training: true,
            grad_enabled: true,
            epoch: 0,
            global_step: 0,
            weights: None,
        })
    }

    /// Restore weights and progress from `checkpoint`. Hyper-parameters and
    /// categories come from the current run, not from the file.
    fn restore(
        &self,
        config: &RunConfiguration,
        checkpoint: &Path,
        categories: &[String],
    ) -> TrainingResult<SegmentationModel> {
        let file = CheckpointFile::read(checkpoint)?;
        if file.arch != self.arch {
            return Err(TrainingError::Checkpoint(format!(
                "{} holds a {} model, expected {}",
                checkpoint.display(),
                file.arch,
                self.arch
            )));
        }

        if let Some(weights) = &file.weights {
            let base = checkpoint.parent().unwrap_or_else(|| Path::new("."));
            let weights_path = base.join(&weights.path);
            if !weights_path.exists() {
                return Err(TrainingError::Checkpoint(format!(
                    "weights referenced by {} not found: {}",
                    checkpoint.display(),
                    weights_path.display()
                )));
            }
            if sha256_file(&weights_path)? != weights.sha256 {
                return Err(TrainingError::Checkpoint(format!(
                    "checksum mismatch for {}",
                    weights_path.display()
                )));
            }
        }

        if file.hyper_parameters.categories != categories {
            warn!(
                "checkpoint categories {:?} differ from configured {:?}, using configured",
                file.hyper_parameters.categories, categories
            );
        }

        Ok(SegmentationModel {
            arch: self.arch,
            categories: categories.to_vec(),
            learning_rate: config.solver.learning_rate_for(self.arch),
            solver: config.solver.name,
            weight_decay: config.solver.weight_decay,
            groups: file.parameter_groups,
            training: true,
            grad_enabled: true,
            epoch: file.epoch,
            global_step: file.global_step,
            weights: file.weights,
        })
    }
}
