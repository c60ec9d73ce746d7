use async_trait::async_trait;
use panoptic_training::{
    CallbackAction, CallbackSet, Direction, DistributedEnv, FitReport, LrFindReport, LrProbe, LrRange, ModelArch,
    ModelHandle, PredictionBatch, PredictionSink, ProgressEvent, ProgressSink, RunContext, Trainer, TrainingError,
    TrainingResult, ValidationReport,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Epochs over which the synthetic score keeps improving.
const PLATEAU_EPOCH: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerCall {
    Fit,
    Validate,
    Predict,
    LrFind,
}

/// What the dry-run backend was asked to do, and the model state it saw.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub call: TrainerCall,
    pub arch: ModelArch,
    pub distributed: DistributedEnv,
    pub devices: Vec<u32>,
    pub training: bool,
    pub grad_enabled: bool,
    pub resume_from: Option<PathBuf>,
}

/// Backend that runs no network and produces a deterministic metric curve.
///
/// Checkpoints are real files written through the model handle, so restore
/// paths can be exercised end to end.
#[derive(Debug, Clone, Default)]
pub struct DryRunTrainer {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl DryRunTrainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: TrainerCall, ctx: &RunContext<'_>, model: &dyn ModelHandle) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                call,
                arch: ctx.arch,
                distributed: ctx.distributed.clone(),
                devices: ctx.options.devices.clone(),
                training: model.is_training(),
                grad_enabled: model.is_grad_enabled(),
                resume_from: ctx.options.resume_from_checkpoint.clone(),
            });
        }
    }
}

fn require_eval_mode(model: &dyn ModelHandle, stage: &str) -> TrainingResult<()> {
    if model.is_training() || model.is_grad_enabled() {
        return Err(TrainingError::Trainer(format!("{stage} needs the model in eval mode without gradients")));
    }
    Ok(())
}

/// Score for `epoch`: improves linearly, then stays flat.
fn synthetic_score(direction: Direction, epoch: u32) -> f64 {
    let step = f64::from(epoch.min(PLATEAU_EPOCH));
    match direction {
        Direction::Max => 0.1 + 0.05 * step,
        Direction::Min => 2.0 - 0.2 * step,
    }
}

/// Loss curve with its minimum near 3e-3.
fn synthetic_lr_loss(lr: f64) -> f64 {
    (lr.log10() + 2.5).powi(2) + 1.0
}

#[async_trait]
impl Trainer for DryRunTrainer {
    fn id(&self) -> &'static str {
        "dry-run"
    }

    async fn fit(
        &self,
        ctx: &RunContext<'_>,
        model: &mut dyn ModelHandle,
        callbacks: &mut CallbackSet,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<FitReport> {
        self.record(TrainerCall::Fit, ctx, model);
        let run_id = ctx.run_id.clone();
        let monitor = callbacks.monitor();
        let max_epochs = if ctx.options.fast_dev_run.is_some() { 1 } else { ctx.options.max_epochs };
        let steps_per_epoch = ctx.datamodule.train_len().max(1) as u64;

        let mut report = FitReport::default();
        for epoch in 0..max_epochs {
            let score = synthetic_score(monitor.direction(), epoch);
            let mut metrics = BTreeMap::from([(monitor.key().to_string(), score)]);
            metrics
                .entry("train_loss_epoch".to_string())
                .or_insert_with(|| synthetic_score(Direction::Min, epoch));

            let global_step = u64::from(epoch + 1) * steps_per_epoch;
            model.record_progress(epoch + 1, global_step);
            let lr = ctx.config.solver.warmup_learning_rate(model.learning_rate(), global_step - 1);
            progress.on_event(ProgressEvent::Epoch {
                run_id: run_id.clone(),
                epoch,
                metrics: metrics.clone(),
                lr: Some(lr),
            });

            let outcome = callbacks.on_epoch_end(epoch, &metrics, Some(lr));
            if let Some(path) = outcome.save_best {
                model.save_checkpoint(&path)?;
                report.best_checkpoint = Some(path);
                report.best_score = Some(score);
            }
            report.epochs_run = epoch + 1;
            report.final_metrics = metrics;
            if outcome.action == CallbackAction::Stop {
                report.stopped_early = true;
                break;
            }
        }

        if let Some(last) = callbacks.checkpoint.last_path() {
            model.save_checkpoint(&last)?;
            report.last_checkpoint = Some(last);
        }
        info!("dry run fit finished after {} epochs", report.epochs_run);
        Ok(report)
    }

    async fn validate(
        &self,
        ctx: &RunContext<'_>,
        model: &dyn ModelHandle,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<ValidationReport> {
        self.record(TrainerCall::Validate, ctx, model);
        require_eval_mode(model, "validation")?;

        let metrics = BTreeMap::from([
            ("IoU".to_string(), 0.5),
            ("map".to_string(), 0.3),
            ("map_segm".to_string(), 0.25),
            ("val_loss".to_string(), 1.0),
        ]);
        progress.on_event(ProgressEvent::Message {
            run_id: ctx.run_id.clone(),
            message: format!("validated {} batches", ctx.datamodule.val_len()),
        });
        Ok(ValidationReport { metrics })
    }

    async fn predict(
        &self,
        ctx: &RunContext<'_>,
        model: &dyn ModelHandle,
        sink: &dyn PredictionSink,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<usize> {
        self.record(TrainerCall::Predict, ctx, model);
        require_eval_mode(model, "prediction")?;

        let mut batches = ctx.datamodule.predict_len();
        if let Some(limit) = ctx.options.fast_dev_run {
            batches = batches.min(limit as usize);
        }
        let per_batch = ctx.dataset.datamodule.batch_size as usize;
        for batch_idx in 0..batches {
            let image_ids = (0..per_batch).map(|i| format!("{:06}", batch_idx * per_batch + i)).collect();
            sink.write(&PredictionBatch {
                batch_idx,
                image_ids,
                instances: 0,
                payload: serde_json::Value::Null,
            })?;
        }
        progress.on_event(ProgressEvent::Message {
            run_id: ctx.run_id.clone(),
            message: format!("wrote {batches} prediction batches"),
        });
        Ok(batches)
    }

    async fn lr_find(
        &self,
        ctx: &RunContext<'_>,
        model: &dyn ModelHandle,
        range: LrRange,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<LrFindReport> {
        self.record(TrainerCall::LrFind, ctx, model);
        let probes = range.candidates().into_iter().map(|lr| LrProbe { lr, loss: synthetic_lr_loss(lr) }).collect();
        let report = LrFindReport::from_probes(probes);
        if let Some(lr) = report.suggestion {
            progress.on_event(ProgressEvent::LrSuggestion { run_id: ctx.run_id.clone(), lr });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SegmentationModelFactory;
    use crate::predictions::JsonPredictionSink;
    use crate::training::fixtures::{Fixture, RecordingSink};
    use panoptic_training::{Metric, ModelFactory, MonitorProfile, RunMode};

    #[tokio::test]
    async fn test_fit_stops_after_plateau_and_writes_checkpoints() {
        let fx = Fixture::new();
        let ctx = fx.ctx(ModelArch::EfficientPs, &RunMode::Fit, DistributedEnv::local());
        let mut model = SegmentationModelFactory::new(ModelArch::EfficientPs).construct(&fx.config, &[]).unwrap();
        let mut callbacks =
            CallbackSet::assemble(MonitorProfile { metric: Metric::MapSegm, patience: 3 }, fx.config.checkpoint_dir());

        let trainer = DryRunTrainer::new();
        let report = trainer.fit(&ctx, &mut model, &mut callbacks, &RecordingSink::default()).await.unwrap();

        assert!(report.stopped_early);
        assert_eq!(report.epochs_run, PLATEAU_EPOCH + 1 + 3);
        assert!(report.best_checkpoint.unwrap().exists());
        assert!(report.last_checkpoint.unwrap().exists());
        assert_eq!(trainer.calls().len(), 1);
        assert_eq!(trainer.calls()[0].call, TrainerCall::Fit);
    }

    #[tokio::test]
    async fn test_fit_reports_warmup_learning_rate() {
        let mut fx = Fixture::new();
        fx.config.solver.warmup_iters = 4;
        let ctx = fx.ctx(ModelArch::EfficientPs, &RunMode::Fit, DistributedEnv::local());
        let mut model = SegmentationModelFactory::new(ModelArch::EfficientPs).construct(&fx.config, &[]).unwrap();
        let mut callbacks =
            CallbackSet::assemble(MonitorProfile { metric: Metric::MapSegm, patience: 1 }, fx.config.checkpoint_dir());

        DryRunTrainer::new().fit(&ctx, &mut model, &mut callbacks, &RecordingSink::default()).await.unwrap();

        // Two batches per epoch: step 1 is half way through a four-step warm-up.
        let history = callbacks.lr_monitor.history();
        assert!((history[0].lr - 0.0005).abs() < 1e-12);
        assert!((history[1].lr - 0.001).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_predict_refuses_training_mode() {
        let fx = Fixture::new();
        let ctx = fx.ctx(ModelArch::EfficientPs, &RunMode::Predict, DistributedEnv::local());
        let model = SegmentationModelFactory::new(ModelArch::EfficientPs).construct(&fx.config, &[]).unwrap();
        let sink = JsonPredictionSink::create(&ctx.layout.predictions_dir()).unwrap();

        let err = DryRunTrainer::new().predict(&ctx, &model, &sink, &RecordingSink::default()).await.unwrap_err();
        assert!(matches!(err, TrainingError::Trainer(_)));
    }

    #[tokio::test]
    async fn test_lr_find_suggests_within_range() {
        let fx = Fixture::new();
        let range = LrRange::default();
        let ctx = fx.ctx(ModelArch::MaskRcnn, &RunMode::Tune(range), DistributedEnv::local());
        let model = SegmentationModelFactory::new(ModelArch::MaskRcnn).construct(&fx.config, &[]).unwrap();
        let sink = RecordingSink::default();

        let report = DryRunTrainer::new().lr_find(&ctx, &model, range, &sink).await.unwrap();
        let lr = report.suggestion.unwrap();
        assert!((range.min_lr..=range.max_lr).contains(&lr));
        assert_eq!(report.results.len(), range.num_training as usize);
        assert!(sink.events.lock().unwrap().iter().any(|e| matches!(e, ProgressEvent::LrSuggestion { .. })));
    }
}
