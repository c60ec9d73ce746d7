use crate::callbacks::CallbackSet;
use crate::config::{CheckpointSlot, RunConfiguration, SolverKind};
use crate::dataset::{DataModule, DatasetDescriptor};
use crate::distributed::DistributedEnv;
use crate::error::TrainingResult;
use crate::layout::RunLayout;
use crate::model::{ModelArch, ModelHandle};
use crate::progress::ProgressSink;
use crate::run_mode::{LrRange, RunMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Ddp,
    Single,
}

/// Knobs for the delegated training loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerOptions {
    pub accelerator: Accelerator,
    pub devices: Vec<u32>,
    pub strategy: Strategy,
    pub num_sanity_val_steps: u32,
    pub log_every_n_steps: u64,
    /// Batches per stage for a smoke run; `None` for a full run.
    pub fast_dev_run: Option<u32>,
    pub accumulate_grad_batches: u32,
    pub max_epochs: u32,
    pub precision: u32,
    pub resume_from_checkpoint: Option<PathBuf>,
}

impl TrainerOptions {
    /// Options for `mode`, resuming from `slot` if it survived model
    /// resolution. Tuning always runs on one device without a distributed
    /// strategy.
    #[must_use]
    pub fn for_run(
        config: &RunConfiguration,
        mode: &RunMode,
        slot: CheckpointSlot,
        log_every_n_steps: u64,
        fast_dev: bool,
    ) -> Self {
        let (accelerator, devices, strategy) = if config.num_gpus == 0 {
            (Accelerator::Cpu, vec![0], Strategy::Single)
        } else if matches!(mode, RunMode::Tune(_)) || config.num_gpus == 1 {
            (Accelerator::Gpu, vec![0], Strategy::Single)
        } else {
            (Accelerator::Gpu, (0..config.num_gpus).collect(), Strategy::Ddp)
        };

        Self {
            accelerator,
            devices,
            strategy,
            num_sanity_val_steps: 0,
            log_every_n_steps,
            fast_dev_run: fast_dev.then_some(config.solver.fast_dev_run),
            accumulate_grad_batches: config.solver.accumulate_grad,
            max_epochs: config.solver.max_epochs,
            precision: config.precision,
            resume_from_checkpoint: config.checkpoint_path(slot).map(Path::to_path_buf),
        }
    }
}

/// Everything a backend needs besides the model and the callbacks.
pub struct RunContext<'a> {
    pub run_id: String,
    pub arch: ModelArch,
    pub config: &'a RunConfiguration,
    pub dataset: &'a DatasetDescriptor,
    pub datamodule: &'a dyn DataModule,
    pub options: TrainerOptions,
    pub distributed: DistributedEnv,
    pub layout: RunLayout,
}

/// Optimizer settings the runtime builds its optimizer from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerPlan {
    pub solver: SolverKind,
    pub learning_rate: f64,
    pub weight_decay: f64,
    /// Set for SGD only.
    pub momentum: Option<f64>,
    /// Linear warm-up length in optimizer steps; 0 disables it.
    pub warmup_iters: u64,
}

impl OptimizerPlan {
    #[must_use]
    pub fn from_config(config: &RunConfiguration, learning_rate: f64) -> Self {
        Self {
            solver: config.solver.name,
            learning_rate,
            weight_decay: config.solver.weight_decay,
            momentum: config.solver.name.momentum(),
            warmup_iters: config.solver.warmup_iters,
        }
    }
}

/// Serialised hand-off to an external training runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlan {
    pub run_id: String,
    pub arch: ModelArch,
    pub mode: RunMode,
    pub optimizer: OptimizerPlan,
    pub categories: Vec<String>,
    pub config: RunConfiguration,
    pub dataset: DatasetDescriptor,
    pub options: TrainerOptions,
    pub distributed: DistributedEnv,
    pub callbacks: Option<CallbackSet>,
}

impl RunPlan {
    #[must_use]
    pub fn new(ctx: &RunContext<'_>, model: &dyn ModelHandle, mode: RunMode, callbacks: Option<&CallbackSet>) -> Self {
        Self {
            run_id: ctx.run_id.clone(),
            arch: ctx.arch,
            mode,
            optimizer: OptimizerPlan::from_config(ctx.config, model.learning_rate()),
            categories: model.categories().to_vec(),
            config: ctx.config.clone(),
            dataset: ctx.dataset.clone(),
            options: ctx.options.clone(),
            distributed: ctx.distributed.clone(),
            callbacks: callbacks.cloned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub epochs_run: u32,
    pub stopped_early: bool,
    pub best_score: Option<f64>,
    pub best_checkpoint: Option<PathBuf>,
    pub last_checkpoint: Option<PathBuf>,
    pub final_metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LrProbe {
    pub lr: f64,
    pub loss: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LrFindReport {
    pub suggestion: Option<f64>,
    pub results: Vec<LrProbe>,
}

impl LrFindReport {
    /// Suggest the rate at the steepest loss descent.
    #[must_use]
    pub fn from_probes(results: Vec<LrProbe>) -> Self {
        let suggestion = results
            .windows(2)
            .filter(|w| w[0].loss.is_finite() && w[1].loss.is_finite())
            .min_by(|a, b| (a[1].loss - a[0].loss).total_cmp(&(b[1].loss - b[0].loss)))
            .map(|w| w[1].lr);
        Self { suggestion, results }
    }
}

/// One batch of instance predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionBatch {
    pub batch_idx: usize,
    pub image_ids: Vec<String>,
    pub instances: usize,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Receives prediction batches; writing results is left to implementors.
pub trait PredictionSink: Send + Sync {
    fn write(&self, batch: &PredictionBatch) -> TrainingResult<()>;
}

/// The delegated training framework.
#[async_trait]
pub trait Trainer: Send + Sync {
    fn id(&self) -> &'static str;

    async fn fit(
        &self,
        ctx: &RunContext<'_>,
        model: &mut dyn ModelHandle,
        callbacks: &mut CallbackSet,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<FitReport>;

    async fn validate(
        &self,
        ctx: &RunContext<'_>,
        model: &dyn ModelHandle,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<ValidationReport>;

    async fn predict(
        &self,
        ctx: &RunContext<'_>,
        model: &dyn ModelHandle,
        sink: &dyn PredictionSink,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<usize>;

    async fn lr_find(
        &self,
        ctx: &RunContext<'_>,
        model: &dyn ModelHandle,
        range: LrRange,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<LrFindReport>;
}
