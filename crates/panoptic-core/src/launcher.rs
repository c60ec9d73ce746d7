//! Multi-node launcher for the EfficientPS family.
//!
//! Maps a model name onto its training entry point and builds the
//! distributed coordination parameters from the node and GPU counts.

use crate::pipeline::RunRequest;
use crate::profiles::{profile_for, ModelProfile};
use panoptic_training::{
    DistributedEnv, ModelArch, ProgressSink, RunFlags, RunManifest, RuntimeEnvironment, Trainer, TrainingError,
    TrainingResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

/// Model names accepted by the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LaunchModel {
    #[serde(rename = "EfficientPS")]
    EfficientPs,
    #[serde(rename = "EfficientPS_Plus")]
    EfficientPsPlus,
    #[serde(rename = "EfficientPS_semantic")]
    EfficientPsSemantic,
    #[serde(rename = "EfficientPS_instance")]
    EfficientPsInstance,
}

impl LaunchModel {
    pub const ALL: [Self; 4] =
        [Self::EfficientPs, Self::EfficientPsPlus, Self::EfficientPsSemantic, Self::EfficientPsInstance];

    #[must_use]
    pub const fn arch(self) -> ModelArch {
        match self {
            Self::EfficientPs => ModelArch::EfficientPs,
            Self::EfficientPsPlus => ModelArch::EfficientPsPlus,
            Self::EfficientPsSemantic => ModelArch::EfficientPsSemantic,
            Self::EfficientPsInstance => ModelArch::EfficientPsInstance,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.arch().as_str()
    }
}

impl fmt::Display for LaunchModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LaunchModel {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|m| m.as_str() == s).ok_or_else(|| TrainingError::UnsupportedModel {
            value: s.to_string(),
            accepted: Self::ALL.iter().map(|m| m.as_str()).collect(),
        })
    }
}

/// The training routine a launch runs on every rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: &'static str,
    pub profile: ModelProfile,
}

#[must_use]
pub const fn entry_point(model: LaunchModel) -> EntryPoint {
    let name = match model {
        LaunchModel::EfficientPs => "train_effps",
        LaunchModel::EfficientPsPlus => "train_effps_plus",
        LaunchModel::EfficientPsSemantic => "train_effps_semantic",
        LaunchModel::EfficientPsInstance => "train_effps_instance",
    };
    EntryPoint { name, profile: profile_for(model.arch()) }
}

/// Launcher inputs, one field per command-line flag.
#[derive(Debug, Clone)]
pub struct LaunchArgs {
    pub nodes: u32,
    /// Rank of this node among `nodes`.
    pub local_ranks: u32,
    pub ip_address: String,
    pub ngpus: u32,
    pub model_name: String,
    pub config: PathBuf,
    pub fast_dev: bool,
}

impl LaunchArgs {
    #[must_use]
    pub const fn runtime(&self) -> RuntimeEnvironment {
        RuntimeEnvironment::new(self.ngpus, self.nodes)
    }

    #[must_use]
    pub fn distributed(&self) -> DistributedEnv {
        DistributedEnv::for_runtime(self.ip_address.clone(), self.runtime(), self.local_ranks)
    }

    /// Validate the model name and build the fit request for its entry point.
    pub fn plan(&self) -> TrainingResult<(EntryPoint, RunRequest)> {
        let model: LaunchModel = self.model_name.parse()?;
        let entry = entry_point(model);
        let distributed = self.distributed();
        info!(
            "{}: {} node(s) x {} gpu(s), world size {}, master {}:{}",
            entry.name, self.nodes, self.ngpus, distributed.world_size, distributed.master_addr, distributed.master_port
        );

        let request = RunRequest {
            config_path: self.config.clone(),
            profile: entry.profile,
            flags: RunFlags::default(),
            fast_dev: self.fast_dev,
            runtime: self.runtime(),
            distributed,
        };
        Ok((entry, request))
    }
}

/// Launch a fit for `args.model_name` on `trainer`.
pub async fn launch(args: &LaunchArgs, trainer: &dyn Trainer, progress: &dyn ProgressSink) -> TrainingResult<RunManifest> {
    let (_, request) = args.plan()?;
    request.resolve()?.prepare()?.execute(trainer, progress).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodule::tests::touch_images;
    use crate::model::tests::write_config;
    use crate::training::fixtures::RecordingSink;
    use crate::training::{DryRunTrainer, TrainerCall};
    use panoptic_training::{Metric, RunMode, SHORT_PATIENCE};
    use tempfile::TempDir;

    fn args(dir: &std::path::Path, model_name: &str, nodes: u32, ngpus: u32) -> LaunchArgs {
        LaunchArgs {
            nodes,
            local_ranks: 0,
            ip_address: "192.168.1.10".to_string(),
            ngpus,
            model_name: model_name.to_string(),
            config: write_config(dir, ""),
            fast_dev: true,
        }
    }

    #[test]
    fn test_each_model_has_its_own_entry_point() {
        let mut names: Vec<_> = LaunchModel::ALL.iter().map(|m| entry_point(*m).name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 4);

        let semantic = entry_point(LaunchModel::EfficientPsSemantic);
        assert_eq!(semantic.name, "train_effps_semantic");
        assert_eq!(semantic.profile.monitor.metric, Metric::IoU);
        assert_eq!(semantic.profile.monitor.patience, SHORT_PATIENCE);
    }

    #[test]
    fn test_unknown_model_lists_accepted_names() {
        let err = "MaskRCNN".parse::<LaunchModel>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'MaskRCNN'"));
        for name in ["EfficientPS", "EfficientPS_Plus", "EfficientPS_semantic", "EfficientPS_instance"] {
            assert!(msg.contains(name));
        }
    }

    #[test]
    fn test_unknown_model_fails_before_config_is_read() {
        let temp = TempDir::new().unwrap();
        let mut launch_args = args(temp.path(), "EfficientPS_depth", 1, 4);
        launch_args.config = temp.path().join("missing.yaml");
        assert!(matches!(launch_args.plan(), Err(TrainingError::UnsupportedModel { .. })));
    }

    #[tokio::test]
    async fn test_instance_launch_on_two_nodes_fits_with_world_size_eight() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("data").join("vkitti2");
        touch_images(&root.join("train"), 4);
        touch_images(&root.join("val"), 2);

        let trainer = DryRunTrainer::new();
        let manifest = launch(&args(temp.path(), "EfficientPS_instance", 2, 4), &trainer, &RecordingSink::default())
            .await
            .unwrap();

        assert_eq!(manifest.mode, RunMode::Fit);
        assert_eq!(manifest.arch, ModelArch::EfficientPsInstance);
        let calls = trainer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call, TrainerCall::Fit);
        assert_eq!(calls[0].distributed.world_size, 8);
        assert_eq!(calls[0].distributed.master_port, 12355);
        assert_eq!(calls[0].distributed.master_addr, "192.168.1.10");
        assert_eq!(calls[0].devices, vec![0, 1, 2, 3]);
        assert!(std::env::var("WORLD_SIZE").is_err());
    }
}
