//! Resolve a run request into concrete collaborators and execute one mode.
//!
//! Order matters: configuration, dataset, model, callbacks, then exactly one
//! of tune / predict / eval / fit.

use crate::datamodule::FolderDataModule;
use crate::model::{SegmentationModel, SegmentationModelFactory};
use crate::predictions::{is_batch_file, JsonPredictionSink};
use crate::profiles::ModelProfile;
use chrono::Utc;
use panoptic_training::artifacts::make_artifact;
use panoptic_training::{
    log_interval, resolve_model, select_dataset, ArtifactKind, CallbackSet, CheckpointSlot, DatasetDescriptor,
    DistributedEnv, InferenceScope, ModelHandle, ModelOrigin, ProgressEvent, ProgressSink, ResolvedModel,
    RunArtifact, RunConfiguration, RunContext, RunFlags, RunLayout, RunManifest, RunMode, RunOutcome,
    RuntimeEnvironment, Trainer, TrainerOptions, TrainingResult,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Everything needed to start one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub config_path: PathBuf,
    pub profile: ModelProfile,
    pub flags: RunFlags,
    pub fast_dev: bool,
    pub runtime: RuntimeEnvironment,
    pub distributed: DistributedEnv,
}

impl RunRequest {
    /// Load the configuration and fix the run mode.
    pub fn resolve(self) -> TrainingResult<ResolvedRun> {
        let config = RunConfiguration::resolve(&self.config_path, self.runtime)?;
        let mode = RunMode::from_flags(self.flags);
        let layout = RunLayout::new(config.checkpoint_dir());
        Ok(ResolvedRun { request: self, config, mode, layout })
    }
}

/// A run whose configuration is known but whose model is not built yet.
#[derive(Debug)]
pub struct ResolvedRun {
    request: RunRequest,
    config: RunConfiguration,
    mode: RunMode,
    layout: RunLayout,
}

impl ResolvedRun {
    #[must_use]
    pub fn mode(&self) -> &RunMode {
        &self.mode
    }

    #[must_use]
    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Per-model log file inside the checkpoint directory.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.layout.log_path(self.request.profile.log_suffix)
    }

    pub fn prepare(self) -> TrainingResult<PreparedRun> {
        let Self { request, config, mode, layout } = self;
        let arch = request.profile.arch;
        // Inference modes restore from the inference slot, everything else
        // resumes from the training slot.
        let slot = if mode.is_inference() { CheckpointSlot::Inference } else { CheckpointSlot::Training };

        let dataset = select_dataset(&config)?;
        info!("Dataset {} with {} categories", dataset.kind, dataset.categories.len());
        let datamodule = FolderDataModule::open(&dataset.datamodule)?;

        let factory = SegmentationModelFactory::new(arch);
        let ResolvedModel { model, config, origin } = resolve_model(config, slot, &dataset.categories, &factory)?;
        info!("{}", model.summary());

        let callbacks = CallbackSet::assemble(request.profile.monitor, config.checkpoint_dir());
        let log_every = log_interval(&config, &datamodule);
        let options = TrainerOptions::for_run(&config, &mode, slot, log_every, request.fast_dev);

        Ok(PreparedRun {
            run_id: Uuid::new_v4().to_string(),
            profile: request.profile,
            mode,
            config,
            dataset,
            datamodule,
            model,
            origin,
            callbacks,
            options,
            distributed: request.distributed,
            layout,
        })
    }
}

/// A fully resolved run, ready to hand to a trainer.
#[derive(Debug)]
pub struct PreparedRun {
    pub run_id: String,
    pub profile: ModelProfile,
    pub mode: RunMode,
    pub config: RunConfiguration,
    pub dataset: DatasetDescriptor,
    pub datamodule: FolderDataModule,
    pub model: SegmentationModel,
    pub origin: ModelOrigin,
    pub callbacks: CallbackSet,
    pub options: TrainerOptions,
    pub distributed: DistributedEnv,
    pub layout: RunLayout,
}

impl PreparedRun {
    /// Run the selected mode and write the run manifest.
    ///
    /// Tuning only reports a learning rate and leaves no manifest behind.
    pub async fn execute(mut self, trainer: &dyn Trainer, progress: &dyn ProgressSink) -> TrainingResult<RunManifest> {
        let started_at = Utc::now();
        self.layout.ensure_dirs()?;

        let ctx = RunContext {
            run_id: self.run_id.clone(),
            arch: self.profile.arch,
            config: &self.config,
            dataset: &self.dataset,
            datamodule: &self.datamodule,
            options: self.options.clone(),
            distributed: self.distributed.clone(),
            layout: self.layout.clone(),
        };

        progress.on_event(ProgressEvent::Started { run_id: self.run_id.clone(), mode: self.mode });
        let outcome = dispatch(self.mode, trainer, &ctx, &mut self.model, &mut self.callbacks, progress).await?;
        progress.on_event(ProgressEvent::Finished { run_id: self.run_id.clone() });

        let manifest = RunManifest {
            run_id: self.run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            trainer: trainer.id().to_string(),
            arch: self.profile.arch,
            dataset: self.dataset.kind,
            mode: self.mode,
            restored_from: RunManifest::restored_path(&self.origin),
            artifacts: collect_artifacts(&self.layout, self.profile.log_suffix, &outcome)?,
            outcome,
        };
        if !matches!(self.mode, RunMode::Tune(_)) {
            manifest.write(&self.layout.manifest_path())?;
        }
        Ok(manifest)
    }
}

/// Execute exactly one mode against `trainer`.
///
/// Predict and eval run inside an [`InferenceScope`]; fit always starts with
/// the model in training mode and the callback set attached.
pub async fn dispatch<M: ModelHandle>(
    mode: RunMode,
    trainer: &dyn Trainer,
    ctx: &RunContext<'_>,
    model: &mut M,
    callbacks: &mut CallbackSet,
    progress: &dyn ProgressSink,
) -> TrainingResult<RunOutcome> {
    match mode {
        RunMode::Tune(range) => {
            let report = trainer.lr_find(ctx, model, range, progress).await?;
            match report.suggestion {
                Some(lr) => info!("LR found: {lr:e}"),
                None => warn!("learning rate finder returned no suggestion"),
            }
            Ok(RunOutcome::LrFind(report))
        }
        RunMode::Predict => {
            let sink = JsonPredictionSink::create(&ctx.layout.predictions_dir())?;
            let scope = InferenceScope::enter(model);
            let batches = trainer.predict(ctx, &*scope, &sink, progress).await?;
            Ok(RunOutcome::Predictions { batches })
        }
        RunMode::Eval => {
            let scope = InferenceScope::enter(model);
            let report = trainer.validate(ctx, &*scope, progress).await?;
            Ok(RunOutcome::Validation(report))
        }
        RunMode::Fit => {
            model.set_training(true);
            model.set_grad_enabled(true);
            let report = trainer.fit(ctx, model, callbacks, progress).await?;
            Ok(RunOutcome::Fit(report))
        }
    }
}

fn push_if_exists(out: &mut Vec<RunArtifact>, kind: ArtifactKind, path: &Path) -> TrainingResult<()> {
    if path.is_file() {
        out.push(make_artifact(kind, path.to_path_buf())?);
    }
    Ok(())
}

fn collect_artifacts(layout: &RunLayout, log_suffix: &str, outcome: &RunOutcome) -> TrainingResult<Vec<RunArtifact>> {
    let mut out = Vec::new();
    match outcome {
        RunOutcome::Fit(report) => {
            if let Some(best) = &report.best_checkpoint {
                push_if_exists(&mut out, ArtifactKind::BestCheckpoint, best)?;
            }
            if let Some(last) = &report.last_checkpoint {
                push_if_exists(&mut out, ArtifactKind::LastCheckpoint, last)?;
            }
        }
        RunOutcome::Predictions { .. } => {
            let mut files: Vec<PathBuf> = std::fs::read_dir(layout.predictions_dir())?
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| is_batch_file(p))
                .collect();
            files.sort();
            for file in files {
                push_if_exists(&mut out, ArtifactKind::Predictions, &file)?;
            }
        }
        RunOutcome::Validation(_) | RunOutcome::LrFind(_) => {}
    }
    push_if_exists(&mut out, ArtifactKind::RunPlan, &layout.run_plan_path())?;
    push_if_exists(&mut out, ArtifactKind::Log, &layout.log_path(log_suffix))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodule::tests::touch_images;
    use crate::model::tests::write_config;
    use crate::profiles::profile_for;
    use crate::training::fixtures::RecordingSink;
    use crate::training::{DryRunTrainer, TrainerCall};
    use panoptic_training::{ModelArch, ModelFactory};
    use tempfile::TempDir;

    fn request(dir: &Path, arch: ModelArch, flags: RunFlags, extra: &str) -> RunRequest {
        let root = dir.join("data").join("vkitti2");
        touch_images(&root.join("train"), 4);
        touch_images(&root.join("val"), 2);
        RunRequest {
            config_path: write_config(dir, extra),
            profile: profile_for(arch),
            flags,
            fast_dev: true,
            runtime: RuntimeEnvironment::new(2, 1),
            distributed: DistributedEnv::local(),
        }
    }

    #[tokio::test]
    async fn test_fit_without_checkpoint_clears_slot_and_writes_manifest() {
        let temp = TempDir::new().unwrap();
        let prepared = request(temp.path(), ModelArch::EfficientPs, RunFlags::default(), "")
            .resolve()
            .unwrap()
            .prepare()
            .unwrap();
        assert_eq!(prepared.origin, ModelOrigin::Fresh);
        assert_eq!(prepared.config.checkpoint_path_training, None);
        assert_eq!(prepared.options.resume_from_checkpoint, None);
        assert_eq!(prepared.options.devices, vec![0, 1]);

        let trainer = DryRunTrainer::new();
        let manifest = prepared.execute(&trainer, &RecordingSink::default()).await.unwrap();
        assert_eq!(manifest.mode, RunMode::Fit);
        assert!(manifest.artifacts.iter().any(|a| a.kind == ArtifactKind::LastCheckpoint));
        assert!(temp.path().join("ckpt").join("run_manifest.json").exists());

        let calls = trainer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call, TrainerCall::Fit);
        assert!(calls[0].training);
    }

    #[tokio::test]
    async fn test_missing_training_checkpoint_is_not_resumed() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("gone.ckpt");
        let extra = format!("CHECKPOINT_PATH_TRAINING: {}\n", missing.display());
        let prepared = request(temp.path(), ModelArch::EfficientPsSemantic, RunFlags::default(), &extra)
            .resolve()
            .unwrap()
            .prepare()
            .unwrap();
        assert_eq!(prepared.origin, ModelOrigin::Fresh);
        assert_eq!(prepared.config.checkpoint_path_training, None);
        assert_eq!(prepared.options.resume_from_checkpoint, None);
    }

    #[tokio::test]
    async fn test_predict_restores_inference_checkpoint_and_restores_flags() {
        let temp = TempDir::new().unwrap();
        let ckpt = temp.path().join("best.ckpt");
        let extra = format!("CHECKPOINT_PATH_INFERENCE: {}\n", ckpt.display());
        let flags = RunFlags { tune: false, predict: true, eval: true };
        let resolved = request(temp.path(), ModelArch::EfficientPs, flags, &extra).resolve().unwrap();
        SegmentationModelFactory::new(ModelArch::EfficientPs)
            .construct(resolved.config(), &[])
            .unwrap()
            .save_checkpoint(&ckpt)
            .unwrap();

        let mut prepared = resolved.prepare().unwrap();
        assert_eq!(prepared.mode, RunMode::Predict);
        assert_eq!(prepared.origin, ModelOrigin::Restored(ckpt));

        let trainer = DryRunTrainer::new();
        let ctx = RunContext {
            run_id: prepared.run_id.clone(),
            arch: prepared.profile.arch,
            config: &prepared.config,
            dataset: &prepared.dataset,
            datamodule: &prepared.datamodule,
            options: prepared.options.clone(),
            distributed: prepared.distributed.clone(),
            layout: prepared.layout.clone(),
        };
        let outcome = dispatch(
            prepared.mode,
            &trainer,
            &ctx,
            &mut prepared.model,
            &mut prepared.callbacks,
            &RecordingSink::default(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, RunOutcome::Predictions { batches: 1 }));
        let calls = trainer.calls();
        assert_eq!(calls[0].call, TrainerCall::Predict);
        assert!(!calls[0].training && !calls[0].grad_enabled);
        assert!(prepared.model.is_training() && prepared.model.is_grad_enabled());
    }

    #[tokio::test]
    async fn test_predict_manifest_lists_only_this_runs_batches() {
        let temp = TempDir::new().unwrap();
        let flags = RunFlags { tune: false, predict: true, eval: false };
        let predictions = temp.path().join("ckpt").join("predictions");
        std::fs::create_dir_all(&predictions).unwrap();
        for idx in 0..3 {
            std::fs::write(predictions.join(format!("batch_{idx:05}.json")), "{}").unwrap();
        }

        let prepared = request(temp.path(), ModelArch::EfficientPs, flags, "").resolve().unwrap().prepare().unwrap();
        let manifest = prepared.execute(&DryRunTrainer::new(), &RecordingSink::default()).await.unwrap();

        let RunOutcome::Predictions { batches } = manifest.outcome else {
            panic!("expected prediction outcome");
        };
        let listed = manifest.artifacts.iter().filter(|a| a.kind == ArtifactKind::Predictions).count();
        assert_eq!(batches, 1);
        assert_eq!(listed, batches);
    }

    #[tokio::test]
    async fn test_tune_uses_one_device_and_leaves_no_manifest() {
        let temp = TempDir::new().unwrap();
        let flags = RunFlags { tune: true, predict: true, eval: false };
        let prepared = request(temp.path(), ModelArch::MaskRcnn, flags, "").resolve().unwrap().prepare().unwrap();
        assert_eq!(prepared.options.devices, vec![0]);

        let trainer = DryRunTrainer::new();
        let manifest = prepared.execute(&trainer, &RecordingSink::default()).await.unwrap();
        assert!(matches!(manifest.outcome, RunOutcome::LrFind(ref r) if r.suggestion.is_some()));
        assert!(!temp.path().join("ckpt").join("run_manifest.json").exists());
        assert_eq!(trainer.calls().len(), 1);
        assert_eq!(trainer.calls()[0].call, TrainerCall::LrFind);
    }

    #[tokio::test]
    async fn test_eval_reports_metrics() {
        let temp = TempDir::new().unwrap();
        let flags = RunFlags { tune: false, predict: false, eval: true };
        let prepared =
            request(temp.path(), ModelArch::EfficientPsSemantic, flags, "").resolve().unwrap().prepare().unwrap();
        let manifest = prepared.execute(&DryRunTrainer::new(), &RecordingSink::default()).await.unwrap();
        let RunOutcome::Validation(report) = manifest.outcome else {
            panic!("expected validation outcome");
        };
        assert!(report.metrics.contains_key("IoU"));
    }
}
