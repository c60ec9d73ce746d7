//! Model contract and checkpoint-aware model resolution.
//!
//! Network internals live behind [`ModelHandle`]; this module only decides
//! whether a run starts from scratch or from a persisted checkpoint.

use crate::config::{CheckpointSlot, RunConfiguration};
use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Segmentation architectures the launcher knows how to wire up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelArch {
    #[serde(rename = "EfficientPS")]
    EfficientPs,
    #[serde(rename = "EfficientPS_Plus")]
    EfficientPsPlus,
    #[serde(rename = "EfficientPS_semantic")]
    EfficientPsSemantic,
    #[serde(rename = "EfficientPS_instance")]
    EfficientPsInstance,
    #[serde(rename = "MaskRCNN")]
    MaskRcnn,
    #[serde(rename = "PanDepth")]
    PanDepth,
}

impl ModelArch {
    pub const ALL: [Self; 6] = [
        Self::EfficientPs,
        Self::EfficientPsPlus,
        Self::EfficientPsSemantic,
        Self::EfficientPsInstance,
        Self::MaskRcnn,
        Self::PanDepth,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EfficientPs => "EfficientPS",
            Self::EfficientPsPlus => "EfficientPS_Plus",
            Self::EfficientPsSemantic => "EfficientPS_semantic",
            Self::EfficientPsInstance => "EfficientPS_instance",
            Self::MaskRcnn => "MaskRCNN",
            Self::PanDepth => "PanDepth",
        }
    }
}

impl fmt::Display for ModelArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelArch {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|arch| arch.as_str() == s).ok_or_else(|| {
            TrainingError::UnsupportedModel {
                value: s.to_string(),
                accepted: Self::ALL.iter().map(|a| a.as_str()).collect(),
            }
        })
    }
}

/// A named block of weights (backbone, fpn, heads...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterGroup {
    pub name: String,
    pub count: u64,
    pub trainable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub arch: ModelArch,
    pub total_params: u64,
    pub trainable_params: u64,
    pub groups: Vec<ParameterGroup>,
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<24} {:>14} {:>10}", "Name", "Params", "Trainable")?;
        for group in &self.groups {
            writeln!(f, "{:<24} {:>14} {:>10}", group.name, group.count, group.trainable)?;
        }
        write!(
            f,
            "{}: {} trainable / {} total params",
            self.arch, self.trainable_params, self.total_params
        )
    }
}

/// The model wrapper the delegated trainer drives.
pub trait ModelHandle: Send + Sync {
    fn arch(&self) -> ModelArch;

    fn categories(&self) -> &[String];

    fn learning_rate(&self) -> f64;

    fn is_training(&self) -> bool;

    fn set_training(&mut self, training: bool);

    fn is_grad_enabled(&self) -> bool;

    fn set_grad_enabled(&mut self, enabled: bool);

    fn parameter_groups(&self) -> &[ParameterGroup];

    /// Persist the model so `ModelFactory::restore` can read it back.
    fn save_checkpoint(&self, path: &Path) -> TrainingResult<()>;

    /// Called by trainers after each completed epoch.
    fn record_progress(&mut self, _epoch: u32, _global_step: u64) {}

    fn trainable_parameters(&self) -> Box<dyn Iterator<Item = &ParameterGroup> + '_> {
        Box::new(self.parameter_groups().iter().filter(|g| g.trainable))
    }

    fn summary(&self) -> ModelSummary {
        let groups = self.parameter_groups().to_vec();
        ModelSummary {
            arch: self.arch(),
            total_params: groups.iter().map(|g| g.count).sum(),
            trainable_params: self.trainable_parameters().map(|g| g.count).sum(),
            groups,
        }
    }
}

/// Builds or restores a concrete model. One implementation serves every
/// architecture; the arch is part of the factory's own state.
pub trait ModelFactory {
    type Model: ModelHandle;

    fn construct(&self, config: &RunConfiguration, categories: &[String]) -> TrainingResult<Self::Model>;

    fn restore(
        &self,
        config: &RunConfiguration,
        checkpoint: &Path,
        categories: &[String],
    ) -> TrainingResult<Self::Model>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOrigin {
    Fresh,
    Restored(PathBuf),
}

#[derive(Debug)]
pub struct ResolvedModel<M> {
    pub model: M,
    /// Configuration with the checkpoint slot cleared when nothing was restored.
    pub config: RunConfiguration,
    pub origin: ModelOrigin,
}

/// Construct a fresh model or restore one from the checkpoint named by `slot`.
///
/// The checkpoint slot is cleared in the returned configuration when the
/// path is unset or missing, so the trainer never tries to resume from it.
pub fn resolve_model<F: ModelFactory>(
    config: RunConfiguration,
    slot: CheckpointSlot,
    categories: &[String],
    factory: &F,
) -> TrainingResult<ResolvedModel<F::Model>> {
    let existing = config.checkpoint_path(slot).filter(|p| p.exists()).map(Path::to_path_buf);
    match existing {
        Some(path) => {
            info!("Loading model from {}", path.display());
            let model = factory.restore(&config, &path, categories)?;
            Ok(ResolvedModel { model, config, origin: ModelOrigin::Restored(path) })
        }
        None => {
            info!("Creating a new model");
            let model = factory.construct(&config, categories)?;
            Ok(ResolvedModel { model, config: config.without_checkpoint(slot), origin: ModelOrigin::Fresh })
        }
    }
}

/// Eval mode with gradient tracking off for the lifetime of the scope.
///
/// Both flags are put back to their prior values on drop, so a later fit in
/// the same process sees the model exactly as it was.
pub struct InferenceScope<'a, M: ModelHandle + ?Sized> {
    model: &'a mut M,
    was_training: bool,
    grad_was_enabled: bool,
}

impl<'a, M: ModelHandle + ?Sized> InferenceScope<'a, M> {
    pub fn enter(model: &'a mut M) -> Self {
        let was_training = model.is_training();
        let grad_was_enabled = model.is_grad_enabled();
        model.set_training(false);
        model.set_grad_enabled(false);
        Self { model, was_training, grad_was_enabled }
    }
}

impl<M: ModelHandle + ?Sized> Deref for InferenceScope<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.model
    }
}

impl<M: ModelHandle + ?Sized> DerefMut for InferenceScope<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        self.model
    }
}

impl<M: ModelHandle + ?Sized> Drop for InferenceScope<'_, M> {
    fn drop(&mut self) {
        self.model.set_grad_enabled(self.grad_was_enabled);
        self.model.set_training(self.was_training);
    }
}
