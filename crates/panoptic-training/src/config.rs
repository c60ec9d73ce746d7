//! Run configuration: base schema, file overrides and runtime-derived fields.
//!
//! Override files use the same upper-case keys as the model configs
//! (`SOLVER.NAME`, `CALLBACKS.CHECKPOINT_DIR`, `DATASET_TYPE`, ...) and may be
//! YAML or TOML. Unknown keys are rejected.

use crate::error::{TrainingError, TrainingResult};
use crate::model::ModelArch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Written in place of a checkpoint path that must not be resumed from.
pub const CHECKPOINT_SENTINEL: &str = "none";

const DEFAULT_BASE_LR: f64 = 1e-3;
const DEFAULT_WEIGHT_DECAY: f64 = 1e-4;
const DEFAULT_BATCH_SIZE: u32 = 2;
const DEFAULT_NUM_WORKERS: u32 = 4;
const DEFAULT_IMAGE_SIZE: u32 = 512;
const DEFAULT_PRECISION: u32 = 32;
const DEFAULT_FAST_DEV_RUN: u32 = 1;
const DEFAULT_MAX_EPOCHS: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverKind {
    Adam,
    #[serde(rename = "SGD")]
    Sgd,
}

impl SolverKind {
    pub const ALL: [Self; 2] = [Self::Adam, Self::Sgd];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Adam => "Adam",
            Self::Sgd => "SGD",
        }
    }

    #[must_use]
    pub const fn momentum(self) -> Option<f64> {
        match self {
            Self::Adam => None,
            Self::Sgd => Some(0.9),
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SolverKind {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|k| k.as_str() == s).ok_or_else(|| TrainingError::UnsupportedSolver {
            value: s.to_string(),
            accepted: Self::ALL.iter().map(|k| k.as_str()).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SolverConfig {
    pub name: SolverKind,
    pub base_lr: f64,
    pub base_lr_instance: Option<f64>,
    pub base_lr_semantic: Option<f64>,
    pub base_lr_pan_depth: Option<f64>,
    pub weight_decay: f64,
    pub accumulate_grad: u32,
    /// Optimizer steps of linear warm-up; 0 disables it.
    pub warmup_iters: u64,
    /// Batches per stage when running with `--fast-dev`.
    pub fast_dev_run: u32,
    pub max_epochs: u32,
}

impl SolverConfig {
    /// Learning rate for `arch`, honouring the per-head overrides.
    #[must_use]
    pub fn learning_rate_for(&self, arch: ModelArch) -> f64 {
        let specific = match arch {
            ModelArch::EfficientPsInstance | ModelArch::MaskRcnn => self.base_lr_instance,
            ModelArch::EfficientPsSemantic => self.base_lr_semantic,
            ModelArch::PanDepth => self.base_lr_pan_depth,
            ModelArch::EfficientPs | ModelArch::EfficientPsPlus => None,
        };
        specific.unwrap_or(self.base_lr)
    }

    /// Rate applied at optimizer step `global_step`, ramping linearly from
    /// `lr / warmup_iters` up to `lr` during warm-up.
    #[must_use]
    pub fn warmup_learning_rate(&self, lr: f64, global_step: u64) -> f64 {
        if global_step >= self.warmup_iters {
            return lr;
        }
        let scale = ((global_step + 1) as f64 / self.warmup_iters as f64).min(1.0);
        lr * scale
    }
}

/// Plateau scheduler settings handed to the trainer with the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerConfig {
    pub patience: u32,
    pub factor: f64,
    /// Floor for the learning rate, as a fraction of the base rate.
    pub min_lr_scale: f64,
    pub monitor: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { patience: 10, factor: 0.1, min_lr_scale: 1e-4, monitor: "train_loss_epoch".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CallbacksConfig {
    pub checkpoint_dir: PathBuf,
}

/// Which checkpoint field a run resumes or restores from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointSlot {
    Training,
    Inference,
}

/// Fully resolved parameters for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RunConfiguration {
    pub solver: SolverConfig,
    pub scheduler: SchedulerConfig,
    pub callbacks: CallbacksConfig,
    pub dataset_type: String,
    pub dataset_root: PathBuf,
    pub categories: Option<Vec<String>>,
    pub batch_size: u32,
    pub num_workers: u32,
    pub image_size: u32,
    pub precision: u32,
    pub log_every_n_steps: Option<u64>,
    #[serde(default, with = "sentinel_path")]
    pub checkpoint_path_training: Option<PathBuf>,
    #[serde(default, with = "sentinel_path")]
    pub checkpoint_path_inference: Option<PathBuf>,
    pub num_gpus: u32,
    pub world_size: u32,
    /// Model-specific keys (`MODEL_CUSTOM.BACKBONE.EFFICIENTNET_ID`, ...)
    /// forwarded untouched to the training runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_custom: Option<serde_json::Value>,
}

/// Values computed from the machine and launcher flags rather than the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    pub gpus_per_node: u32,
    pub nodes: u32,
}

impl RuntimeEnvironment {
    #[must_use]
    pub const fn new(gpus_per_node: u32, nodes: u32) -> Self {
        Self { gpus_per_node, nodes }
    }

    /// Count visible GPUs from `CUDA_VISIBLE_DEVICES`; single node.
    ///
    /// Unset means every device is visible, which cannot be counted from
    /// here, so the caller has to say how many GPUs to use.
    #[must_use]
    pub fn detect() -> Option<Self> {
        Self::from_visible_devices(std::env::var("CUDA_VISIBLE_DEVICES").ok().as_deref())
    }

    fn from_visible_devices(raw: Option<&str>) -> Option<Self> {
        raw.map(|v| Self::new(count_visible_devices(v), 1))
    }

    #[must_use]
    pub const fn world_size(&self) -> u32 {
        self.gpus_per_node * self.nodes
    }
}

fn count_visible_devices(raw: &str) -> u32 {
    raw.split(',').filter(|d| !d.trim().is_empty() && d.trim() != "-1").count() as u32
}

impl RunConfiguration {
    /// Load `path`, merge it over the base schema and apply runtime values.
    ///
    /// Creates the checkpoint directory if it does not exist yet.
    pub fn resolve(path: &Path, runtime: RuntimeEnvironment) -> TrainingResult<Self> {
        let overrides = ConfigOverrides::load_from_file(path)?;
        let mut merged = ConfigOverrides::base_schema();
        merged.merge(overrides);
        let config = merged.finalize(runtime)?;

        if !config.callbacks.checkpoint_dir.exists() {
            debug!("creating checkpoint dir {}", config.callbacks.checkpoint_dir.display());
            std::fs::create_dir_all(&config.callbacks.checkpoint_dir)?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn checkpoint_dir(&self) -> &Path {
        &self.callbacks.checkpoint_dir
    }

    #[must_use]
    pub fn checkpoint_path(&self, slot: CheckpointSlot) -> Option<&Path> {
        match slot {
            CheckpointSlot::Training => self.checkpoint_path_training.as_deref(),
            CheckpointSlot::Inference => self.checkpoint_path_inference.as_deref(),
        }
    }

    #[must_use]
    pub fn without_checkpoint(mut self, slot: CheckpointSlot) -> Self {
        match slot {
            CheckpointSlot::Training => self.checkpoint_path_training = None,
            CheckpointSlot::Inference => self.checkpoint_path_inference = None,
        }
        self
    }
}

/// Partial configuration as read from an override file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(default)]
    pub solver: SolverOverrides,
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
    #[serde(default)]
    pub callbacks: CallbacksOverrides,
    pub dataset_type: Option<String>,
    pub dataset_root: Option<PathBuf>,
    pub categories: Option<Vec<String>>,
    pub batch_size: Option<u32>,
    pub num_workers: Option<u32>,
    pub image_size: Option<u32>,
    pub precision: Option<u32>,
    pub log_every_n_steps: Option<u64>,
    pub checkpoint_path_training: Option<String>,
    pub checkpoint_path_inference: Option<String>,
    pub num_gpus: Option<u32>,
    pub world_size: Option<u32>,
    pub model_custom: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct SolverOverrides {
    pub name: Option<String>,
    pub base_lr: Option<f64>,
    pub base_lr_instance: Option<f64>,
    pub base_lr_semantic: Option<f64>,
    pub base_lr_pan_depth: Option<f64>,
    pub weight_decay: Option<f64>,
    pub accumulate_grad: Option<u32>,
    pub warmup_iters: Option<u64>,
    pub fast_dev_run: Option<u32>,
    pub max_epochs: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct CallbacksOverrides {
    pub checkpoint_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Defaults for every optional field. Solver name, dataset type and
    /// checkpoint directory have no default and must come from the file.
    #[must_use]
    pub fn base_schema() -> Self {
        Self {
            solver: SolverOverrides {
                name: None,
                base_lr: Some(DEFAULT_BASE_LR),
                base_lr_instance: None,
                base_lr_semantic: None,
                base_lr_pan_depth: None,
                weight_decay: Some(DEFAULT_WEIGHT_DECAY),
                accumulate_grad: Some(1),
                warmup_iters: Some(0),
                fast_dev_run: Some(DEFAULT_FAST_DEV_RUN),
                max_epochs: Some(DEFAULT_MAX_EPOCHS),
            },
            scheduler: Some(SchedulerConfig::default()),
            callbacks: CallbacksOverrides::default(),
            dataset_type: None,
            dataset_root: Some(PathBuf::from("datasets")),
            categories: None,
            batch_size: Some(DEFAULT_BATCH_SIZE),
            num_workers: Some(DEFAULT_NUM_WORKERS),
            image_size: Some(DEFAULT_IMAGE_SIZE),
            precision: Some(DEFAULT_PRECISION),
            log_every_n_steps: None,
            checkpoint_path_training: None,
            checkpoint_path_inference: None,
            num_gpus: None,
            world_size: None,
            model_custom: None,
        }
    }

    /// Load overrides from a YAML or TOML file, chosen by extension.
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        if !path.exists() {
            return Err(TrainingError::Config(format!("config file not found: {}", path.display())));
        }
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        match ext {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| TrainingError::Config(format!("{}: {}", path.display(), e))),
            "toml" => toml::from_str(&content)
                .map_err(|e| TrainingError::Config(format!("{}: {}", path.display(), e))),
            other => Err(TrainingError::Config(format!(
                "unsupported config format '{}' for {}, expected .yaml, .yml or .toml",
                other,
                path.display()
            ))),
        }
    }

    /// Merge `other` into `self`; any value set in `other` wins.
    pub fn merge(&mut self, other: Self) {
        let s = &mut self.solver;
        let o = other.solver;
        s.name = o.name.or(s.name.take());
        s.base_lr = o.base_lr.or(s.base_lr);
        s.base_lr_instance = o.base_lr_instance.or(s.base_lr_instance);
        s.base_lr_semantic = o.base_lr_semantic.or(s.base_lr_semantic);
        s.base_lr_pan_depth = o.base_lr_pan_depth.or(s.base_lr_pan_depth);
        s.weight_decay = o.weight_decay.or(s.weight_decay);
        s.accumulate_grad = o.accumulate_grad.or(s.accumulate_grad);
        s.warmup_iters = o.warmup_iters.or(s.warmup_iters);
        s.fast_dev_run = o.fast_dev_run.or(s.fast_dev_run);
        s.max_epochs = o.max_epochs.or(s.max_epochs);

        if other.scheduler.is_some() {
            self.scheduler = other.scheduler;
        }
        if other.callbacks.checkpoint_dir.is_some() {
            self.callbacks.checkpoint_dir = other.callbacks.checkpoint_dir;
        }
        self.dataset_type = other.dataset_type.or(self.dataset_type.take());
        self.dataset_root = other.dataset_root.or(self.dataset_root.take());
        self.categories = other.categories.or(self.categories.take());
        self.batch_size = other.batch_size.or(self.batch_size);
        self.num_workers = other.num_workers.or(self.num_workers);
        self.image_size = other.image_size.or(self.image_size);
        self.precision = other.precision.or(self.precision);
        self.log_every_n_steps = other.log_every_n_steps.or(self.log_every_n_steps);
        self.checkpoint_path_training = other.checkpoint_path_training.or(self.checkpoint_path_training.take());
        self.checkpoint_path_inference = other.checkpoint_path_inference.or(self.checkpoint_path_inference.take());
        self.num_gpus = other.num_gpus.or(self.num_gpus);
        self.world_size = other.world_size.or(self.world_size);
        self.model_custom = other.model_custom.or(self.model_custom.take());
    }

    /// Check required fields and overwrite runtime-derived values.
    pub fn finalize(self, runtime: RuntimeEnvironment) -> TrainingResult<RunConfiguration> {
        let solver_name = require(self.solver.name, "SOLVER.NAME")?;
        let dataset_type = require(self.dataset_type, "DATASET_TYPE")?;
        let checkpoint_dir = self
            .callbacks
            .checkpoint_dir
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| TrainingError::Config("missing required field CALLBACKS.CHECKPOINT_DIR".to_string()))?;

        if self.num_gpus.is_some_and(|n| n != runtime.gpus_per_node)
            || self.world_size.is_some_and(|n| n != runtime.world_size())
        {
            warn!(
                "NUM_GPUS/WORLD_SIZE in config ignored, using runtime values {}/{}",
                runtime.gpus_per_node,
                runtime.world_size()
            );
        }

        let solver = SolverConfig {
            name: solver_name.parse()?,
            base_lr: self.solver.base_lr.unwrap_or(DEFAULT_BASE_LR),
            base_lr_instance: self.solver.base_lr_instance,
            base_lr_semantic: self.solver.base_lr_semantic,
            base_lr_pan_depth: self.solver.base_lr_pan_depth,
            weight_decay: self.solver.weight_decay.unwrap_or(DEFAULT_WEIGHT_DECAY),
            accumulate_grad: self.solver.accumulate_grad.unwrap_or(1).max(1),
            warmup_iters: self.solver.warmup_iters.unwrap_or(0),
            fast_dev_run: self.solver.fast_dev_run.unwrap_or(DEFAULT_FAST_DEV_RUN),
            max_epochs: self.solver.max_epochs.unwrap_or(DEFAULT_MAX_EPOCHS),
        };
        if !solver.base_lr.is_finite() || solver.base_lr <= 0.0 {
            return Err(TrainingError::Config("SOLVER.BASE_LR must be > 0".to_string()));
        }

        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(TrainingError::Config("BATCH_SIZE must be >= 1".to_string()));
        }
        if self.categories.as_ref().is_some_and(Vec::is_empty) {
            return Err(TrainingError::Config("CATEGORIES must not be empty when set".to_string()));
        }

        Ok(RunConfiguration {
            solver,
            scheduler: self.scheduler.unwrap_or_default(),
            callbacks: CallbacksConfig { checkpoint_dir },
            dataset_type,
            dataset_root: self.dataset_root.unwrap_or_else(|| PathBuf::from("datasets")),
            categories: self.categories,
            batch_size,
            num_workers: self.num_workers.unwrap_or(DEFAULT_NUM_WORKERS),
            image_size: self.image_size.unwrap_or(DEFAULT_IMAGE_SIZE),
            precision: self.precision.unwrap_or(DEFAULT_PRECISION),
            log_every_n_steps: self.log_every_n_steps,
            checkpoint_path_training: self.checkpoint_path_training.as_deref().and_then(parse_checkpoint_path),
            checkpoint_path_inference: self.checkpoint_path_inference.as_deref().and_then(parse_checkpoint_path),
            num_gpus: runtime.gpus_per_node,
            world_size: runtime.world_size(),
            model_custom: self.model_custom,
        })
    }
}

fn require(value: Option<String>, field: &str) -> TrainingResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| TrainingError::Config(format!("missing required field {field}")))
}

/// `None`, empty and the sentinel all mean "no checkpoint".
#[must_use]
pub fn parse_checkpoint_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(CHECKPOINT_SENTINEL) {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

mod sentinel_path {
    use super::{parse_checkpoint_path, CHECKPOINT_SENTINEL};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::path::PathBuf;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<PathBuf>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(path) => serializer.serialize_str(&path.to_string_lossy()),
            None => serializer.serialize_str(CHECKPOINT_SENTINEL),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<PathBuf>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse_checkpoint_path))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn sample_config(dir: &Path) -> RunConfiguration {
        let mut overrides = ConfigOverrides::base_schema();
        overrides.solver.name = Some("Adam".to_string());
        overrides.dataset_type = Some("vkitti2".to_string());
        overrides.dataset_root = Some(dir.join("data"));
        overrides.callbacks.checkpoint_dir = Some(dir.join("ckpt"));
        overrides.finalize(RuntimeEnvironment::new(2, 1)).unwrap()
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_resolve_yaml_merges_over_base_schema() {
        let temp = TempDir::new().unwrap();
        let ckpt_dir = temp.path().join("checkpoints");
        let path = write(
            &temp,
            "effps.yaml",
            &format!(
                r#"
SOLVER:
  NAME: SGD
  BASE_LR_INSTANCE: 0.0016
  ACCUMULATE_GRAD: 4
CALLBACKS:
  CHECKPOINT_DIR: "{}"
DATASET_TYPE: vkitti2
BATCH_SIZE: 3
CHECKPOINT_PATH_TRAINING: ""
"#,
                ckpt_dir.display()
            ),
        );

        let config = RunConfiguration::resolve(&path, RuntimeEnvironment::new(4, 2)).unwrap();
        assert_eq!(config.solver.name, SolverKind::Sgd);
        assert_eq!(config.solver.accumulate_grad, 4);
        assert!((config.solver.learning_rate_for(ModelArch::EfficientPsInstance) - 0.0016).abs() < f64::EPSILON);
        assert!((config.solver.learning_rate_for(ModelArch::EfficientPs) - DEFAULT_BASE_LR).abs() < f64::EPSILON);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.num_workers, DEFAULT_NUM_WORKERS);
        assert_eq!(config.checkpoint_path_training, None);
        assert!(ckpt_dir.is_dir());
    }

    #[test]
    fn test_runtime_fields_overwrite_file_values() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            "run.toml",
            &format!(
                r#"
DATASET_TYPE = "forest"
NUM_GPUS = 8
WORLD_SIZE = 64

[SOLVER]
NAME = "Adam"

[CALLBACKS]
CHECKPOINT_DIR = "{}"
"#,
                temp.path().join("ck").display()
            ),
        );

        let config = RunConfiguration::resolve(&path, RuntimeEnvironment::new(4, 2)).unwrap();
        assert_eq!(config.num_gpus, 4);
        assert_eq!(config.world_size, 8);
    }

    #[test]
    fn test_missing_required_fields_fail() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "partial.yaml", "SOLVER:\n  NAME: Adam\nDATASET_TYPE: yt\n");
        let err = RunConfiguration::resolve(&path, RuntimeEnvironment::new(1, 1)).unwrap_err();
        assert!(matches!(err, TrainingError::Config(ref m) if m.contains("CALLBACKS.CHECKPOINT_DIR")));

        let path = write(&temp, "nosolver.yaml", "DATASET_TYPE: yt\nCALLBACKS:\n  CHECKPOINT_DIR: out\n");
        let err = RunConfiguration::resolve(&path, RuntimeEnvironment::new(1, 1)).unwrap_err();
        assert!(matches!(err, TrainingError::Config(ref m) if m.contains("SOLVER.NAME")));
    }

    #[test]
    fn test_unknown_key_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "bad.yaml", "SOLVER:\n  NAME: Adam\n  MOMENTUMM: 0.5\n");
        let err = RunConfiguration::resolve(&path, RuntimeEnvironment::new(1, 1)).unwrap_err();
        assert!(matches!(err, TrainingError::Config(_)));
    }

    #[test]
    fn test_unsupported_solver_lists_accepted() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            "rms.yaml",
            "SOLVER:\n  NAME: RMSprop\nDATASET_TYPE: yt\nCALLBACKS:\n  CHECKPOINT_DIR: out\n",
        );
        let err = RunConfiguration::resolve(&path, RuntimeEnvironment::new(1, 1)).unwrap_err();
        match err {
            TrainingError::UnsupportedSolver { value, accepted } => {
                assert_eq!(value, "RMSprop");
                assert_eq!(accepted, vec!["Adam", "SGD"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_checkpoint_sentinel_round_trips_as_none() {
        let temp = TempDir::new().unwrap();
        let config = sample_config(temp.path());
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["CHECKPOINT_PATH_TRAINING"], CHECKPOINT_SENTINEL);
        let back: RunConfiguration = serde_json::from_value(json).unwrap();
        assert_eq!(back.checkpoint_path_training, None);
    }

    #[test]
    fn test_count_visible_devices() {
        assert_eq!(count_visible_devices("0,1,2"), 3);
        assert_eq!(count_visible_devices(""), 0);
        assert_eq!(count_visible_devices("-1"), 0);
    }

    #[test]
    fn test_unset_visible_devices_is_unknown() {
        assert_eq!(RuntimeEnvironment::from_visible_devices(None), None);
        assert_eq!(RuntimeEnvironment::from_visible_devices(Some("0,1")), Some(RuntimeEnvironment::new(2, 1)));
        assert_eq!(RuntimeEnvironment::from_visible_devices(Some("")), Some(RuntimeEnvironment::new(0, 1)));
    }

    #[test]
    fn test_instance_config_with_warmup_and_backbone_keys() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            "instance.yaml",
            &format!(
                r#"
MODEL_CUSTOM:
  BACKBONE:
    EFFICIENTNET_ID: 5
SOLVER:
  NAME: Adam
  BASE_LR_INSTANCE: 0.002
  WARMUP_ITERS: 500
DATASET_TYPE: vkitti2
CALLBACKS:
  CHECKPOINT_DIR: "{}"
"#,
                temp.path().join("ckpt").display()
            ),
        );

        let config = RunConfiguration::resolve(&path, RuntimeEnvironment::new(1, 1)).unwrap();
        assert_eq!(config.solver.warmup_iters, 500);
        let custom = config.model_custom.as_ref().unwrap();
        assert_eq!(custom["BACKBONE"]["EFFICIENTNET_ID"], 5);

        let lr = config.solver.learning_rate_for(ModelArch::EfficientPsInstance);
        assert!((config.solver.warmup_learning_rate(lr, 0) - 0.002 / 500.0).abs() < 1e-12);
        assert!((config.solver.warmup_learning_rate(lr, 249) - 0.001).abs() < 1e-12);
        assert!((config.solver.warmup_learning_rate(lr, 500) - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_no_warmup_by_default() {
        let temp = TempDir::new().unwrap();
        let config = sample_config(temp.path());
        assert_eq!(config.solver.warmup_iters, 0);
        assert!((config.solver.warmup_learning_rate(0.01, 0) - 0.01).abs() < f64::EPSILON);
        assert!(config.model_custom.is_none());
    }
}
