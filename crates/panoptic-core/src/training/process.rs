use async_trait::async_trait;
use panoptic_training::{
    CallbackAction, CallbackSet, FitReport, LrFindReport, LrProbe, LrRange, ModelHandle, PredictionBatch,
    PredictionSink, ProgressEvent, ProgressSink, RunContext, RunMode, RunPlan, Trainer, TrainingError,
    TrainingResult, ValidationReport,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Names the external training runtime, e.g. `python -m effps.runtime`.
pub const TRAINER_CMD_ENV: &str = "PANOPTIC_TRAINER_CMD";

/// Lines the runtime writes to stdout, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum RuntimeEvent {
    EpochEnd {
        epoch: u32,
        #[serde(default)]
        global_step: u64,
        metrics: BTreeMap<String, f64>,
        #[serde(default)]
        lr: Option<f64>,
    },
    Validation {
        metrics: BTreeMap<String, f64>,
    },
    Prediction(PredictionBatch),
    LrProbe {
        lr: f64,
        loss: f64,
    },
    LrSuggestion {
        lr: f64,
    },
    Log {
        message: String,
    },
}

/// Instructions sent back on the runtime's stdin.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum RuntimeCommand {
    SaveCheckpoint { path: PathBuf },
    Stop,
}

enum StreamLine {
    Event(RuntimeEvent),
    Text(String),
}

fn parse_line(line: &str) -> StreamLine {
    match serde_json::from_str::<RuntimeEvent>(line) {
        Ok(event) => StreamLine::Event(event),
        Err(_) => StreamLine::Text(line.to_string()),
    }
}

/// A running child runtime with its pipes.
struct ChildSession {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
}

impl ChildSession {
    async fn next_line(&mut self) -> TrainingResult<Option<StreamLine>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let line = line.trim();
            if !line.is_empty() {
                return Ok(Some(parse_line(line)));
            }
        }
    }

    /// Send a command; a runtime that already closed stdin is not an error.
    async fn send(&mut self, command: &RuntimeCommand) -> TrainingResult<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Ok(());
        };
        let mut payload = serde_json::to_vec(command)?;
        payload.push(b'\n');
        let result = async {
            stdin.write_all(&payload).await?;
            stdin.flush().await
        }
        .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                warn!("training runtime closed stdin, dropping {:?}", command);
                self.stdin = None;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Signal end of input; the runtime is expected to wind down.
    fn close_stdin(&mut self) {
        drop(self.stdin.take());
    }

    async fn finish(mut self) -> TrainingResult<()> {
        self.close_stdin();
        let status = self.child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(TrainingError::RuntimeExit { status: status.to_string(), code: status.code() })
        }
    }
}

/// Backend that hands the run plan to an external training runtime.
///
/// The runtime is started as `<program> <args..> --plan <run_plan.json>` with
/// the distributed coordination variables in its environment. Callbacks are
/// applied here, on the epoch events it reports.
#[derive(Debug, Clone)]
pub struct ProcessTrainer {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessTrainer {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// Split a whitespace-separated command line into program and args.
    pub fn from_command_line(command: &str) -> TrainingResult<Self> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| TrainingError::Config("trainer command is empty".to_string()))?;
        Ok(Self::new(program, parts.map(str::to_string).collect()))
    }

    pub fn from_env() -> TrainingResult<Self> {
        let command = std::env::var(TRAINER_CMD_ENV).map_err(|_| {
            TrainingError::Config(format!("{TRAINER_CMD_ENV} is not set; pass --trainer-cmd or use --dry-run"))
        })?;
        Self::from_command_line(&command)
    }

    fn write_plan(path: &Path, plan: &RunPlan) -> TrainingResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(plan)?)?;
        Ok(())
    }

    fn spawn(&self, ctx: &RunContext<'_>, plan: &RunPlan) -> TrainingResult<ChildSession> {
        ctx.layout.ensure_dirs()?;
        let plan_path = ctx.layout.run_plan_path();
        Self::write_plan(&plan_path, plan)?;

        info!("starting training runtime {} for {}", self.program.display(), plan.mode);
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--plan")
            .arg(&plan_path)
            .envs(ctx.distributed.env_vars())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TrainingError::Trainer(format!("failed to start {}: {}", self.program.display(), e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrainingError::Trainer("training runtime stdout unavailable".to_string()))?;
        let stdin = child.stdin.take();
        Ok(ChildSession { child, stdin, lines: BufReader::new(stdout).lines() })
    }

    fn forward_text(ctx: &RunContext<'_>, progress: &dyn ProgressSink, message: String) {
        progress.on_event(ProgressEvent::Message { run_id: ctx.run_id.clone(), message });
    }

    fn unexpected(ctx: &RunContext<'_>, progress: &dyn ProgressSink, stage: &str, event: &RuntimeEvent) {
        debug!("ignoring {:?} during {}", event, stage);
        Self::forward_text(ctx, progress, format!("unexpected runtime event during {stage}"));
    }
}

#[async_trait]
impl Trainer for ProcessTrainer {
    fn id(&self) -> &'static str {
        "process"
    }

    async fn fit(
        &self,
        ctx: &RunContext<'_>,
        model: &mut dyn ModelHandle,
        callbacks: &mut CallbackSet,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<FitReport> {
        let plan = RunPlan::new(ctx, model, RunMode::Fit, Some(&*callbacks));
        let mut session = self.spawn(ctx, &plan)?;
        let mut report = FitReport::default();
        let mut stop_sent = false;

        while let Some(line) = session.next_line().await? {
            let event = match line {
                StreamLine::Event(event) => event,
                StreamLine::Text(text) => {
                    Self::forward_text(ctx, progress, text);
                    continue;
                }
            };
            match event {
                RuntimeEvent::EpochEnd { epoch, global_step, metrics, lr } => {
                    model.record_progress(epoch + 1, global_step);
                    progress.on_event(ProgressEvent::Epoch {
                        run_id: ctx.run_id.clone(),
                        epoch,
                        metrics: metrics.clone(),
                        lr,
                    });

                    let outcome = callbacks.on_epoch_end(epoch, &metrics, lr);
                    if let Some(path) = outcome.save_best {
                        session.send(&RuntimeCommand::SaveCheckpoint { path: path.clone() }).await?;
                        report.best_score = metrics.get(callbacks.monitor().key()).copied();
                        report.best_checkpoint = Some(path);
                    }
                    report.epochs_run = epoch + 1;
                    report.final_metrics = metrics;
                    if outcome.action == CallbackAction::Stop && !stop_sent {
                        session.send(&RuntimeCommand::Stop).await?;
                        session.close_stdin();
                        report.stopped_early = true;
                        stop_sent = true;
                    }
                }
                RuntimeEvent::Log { message } => Self::forward_text(ctx, progress, message),
                other => Self::unexpected(ctx, progress, "fit", &other),
            }
        }
        session.finish().await?;

        report.last_checkpoint = callbacks.checkpoint.last_path().filter(|p| p.exists());
        Ok(report)
    }

    async fn validate(
        &self,
        ctx: &RunContext<'_>,
        model: &dyn ModelHandle,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<ValidationReport> {
        let plan = RunPlan::new(ctx, model, RunMode::Eval, None);
        let mut session = self.spawn(ctx, &plan)?;
        let mut report = ValidationReport::default();

        while let Some(line) = session.next_line().await? {
            match line {
                StreamLine::Event(RuntimeEvent::Validation { metrics }) => report.metrics.extend(metrics),
                StreamLine::Event(RuntimeEvent::Log { message }) | StreamLine::Text(message) => {
                    Self::forward_text(ctx, progress, message);
                }
                StreamLine::Event(other) => Self::unexpected(ctx, progress, "eval", &other),
            }
        }
        session.finish().await?;
        Ok(report)
    }

    async fn predict(
        &self,
        ctx: &RunContext<'_>,
        model: &dyn ModelHandle,
        sink: &dyn PredictionSink,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<usize> {
        let plan = RunPlan::new(ctx, model, RunMode::Predict, None);
        let mut session = self.spawn(ctx, &plan)?;
        let mut batches = 0;

        while let Some(line) = session.next_line().await? {
            match line {
                StreamLine::Event(RuntimeEvent::Prediction(batch)) => {
                    sink.write(&batch)?;
                    batches += 1;
                }
                StreamLine::Event(RuntimeEvent::Log { message }) | StreamLine::Text(message) => {
                    Self::forward_text(ctx, progress, message);
                }
                StreamLine::Event(other) => Self::unexpected(ctx, progress, "predict", &other),
            }
        }
        session.finish().await?;
        Ok(batches)
    }

    async fn lr_find(
        &self,
        ctx: &RunContext<'_>,
        model: &dyn ModelHandle,
        range: LrRange,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<LrFindReport> {
        let plan = RunPlan::new(ctx, model, RunMode::Tune(range), None);
        let mut session = self.spawn(ctx, &plan)?;
        let mut probes = Vec::new();
        let mut reported = None;

        while let Some(line) = session.next_line().await? {
            match line {
                StreamLine::Event(RuntimeEvent::LrProbe { lr, loss }) => probes.push(LrProbe { lr, loss }),
                StreamLine::Event(RuntimeEvent::LrSuggestion { lr }) => reported = Some(lr),
                StreamLine::Event(RuntimeEvent::Log { message }) | StreamLine::Text(message) => {
                    Self::forward_text(ctx, progress, message);
                }
                StreamLine::Event(other) => Self::unexpected(ctx, progress, "tune", &other),
            }
        }
        session.finish().await?;

        let mut report = LrFindReport::from_probes(probes);
        if reported.is_some() {
            report.suggestion = reported;
        }
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
    use crate::training::fixtures::{Fixture, RecordingSink};
    use panoptic_training::{DistributedEnv, Metric, ModelArch, ModelFactory, MonitorProfile};

    fn shell(script: &str) -> ProcessTrainer {
        ProcessTrainer::new("sh", vec!["-c".to_string(), script.to_string(), "runtime".to_string()])
    }

    #[test]
    fn test_parse_line_falls_back_to_text() {
        assert!(matches!(
            parse_line(r#"{"event":"lr_probe","lr":0.001,"loss":1.5}"#),
            StreamLine::Event(RuntimeEvent::LrProbe { .. })
        ));
        assert!(matches!(parse_line("Epoch 1: 100%"), StreamLine::Text(_)));
        assert!(matches!(parse_line(r#"{"event":"unknown"}"#), StreamLine::Text(_)));
    }

    #[test]
    fn test_command_line_split() {
        let trainer = ProcessTrainer::from_command_line("python -m effps.runtime").unwrap();
        assert_eq!(trainer.program, PathBuf::from("python"));
        assert_eq!(trainer.args, vec!["-m".to_string(), "effps.runtime".to_string()]);
        assert!(ProcessTrainer::from_command_line("   ").is_err());
    }

    #[tokio::test]
    async fn test_child_receives_distributed_env_and_plan() {
        let fx = Fixture::new();
        let ctx = fx.ctx(ModelArch::EfficientPs, &RunMode::Eval, DistributedEnv::new("10.1.2.3", 2, 4, 1));
        let model = SegmentationModelFactory::new(ModelArch::EfficientPs).construct(&fx.config, &[]).unwrap();
        let trainer = shell(
            r#"echo "addr=$MASTER_ADDR port=$MASTER_PORT world=$WORLD_SIZE rank=$NODE_RANK plan=$1"
echo '{"event":"validation","metrics":{"IoU":0.61}}'"#,
        );
        let sink = RecordingSink::default();

        let report = trainer.validate(&ctx, &model, &sink).await.unwrap();
        assert_eq!(report.metrics.get("IoU"), Some(&0.61));
        let messages = sink.messages();
        assert_eq!(messages[0], "addr=10.1.2.3 port=12355 world=8 rank=1 plan=--plan");
        assert!(ctx.layout.run_plan_path().exists());
        assert!(std::env::var("MASTER_ADDR").is_err());
    }

    #[tokio::test]
    async fn test_fit_applies_callbacks_to_epoch_events() {
        let fx = Fixture::new();
        let ctx = fx.ctx(ModelArch::MaskRcnn, &RunMode::Fit, DistributedEnv::local());
        let mut model = SegmentationModelFactory::new(ModelArch::MaskRcnn).construct(&fx.config, &[]).unwrap();
        let mut callbacks = CallbackSet::assemble(
            MonitorProfile { metric: Metric::TrainLossEpoch, patience: 1 },
            fx.config.checkpoint_dir(),
        );
        let trainer = shell(
            r#"echo '{"event":"epoch_end","epoch":0,"global_step":10,"metrics":{"train_loss_epoch":2.0},"lr":0.001}'
echo '{"event":"epoch_end","epoch":1,"global_step":20,"metrics":{"train_loss_epoch":2.5},"lr":0.001}'
cat > /dev/null"#,
        );

        let report = trainer.fit(&ctx, &mut model, &mut callbacks, &RecordingSink::default()).await.unwrap();
        assert_eq!(report.epochs_run, 2);
        assert!(report.stopped_early);
        assert_eq!(report.best_score, Some(2.0));
        assert!(report.best_checkpoint.is_some());
        assert_eq!(callbacks.lr_monitor.history().len(), 2);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_trainer_error() {
        let fx = Fixture::new();
        let ctx = fx.ctx(ModelArch::EfficientPs, &RunMode::Predict, DistributedEnv::local());
        let model = SegmentationModelFactory::new(ModelArch::EfficientPs).construct(&fx.config, &[]).unwrap();
        let sink = crate::predictions::JsonPredictionSink::create(&ctx.layout.predictions_dir()).unwrap();

        let err = shell("exit 3").predict(&ctx, &model, &sink, &RecordingSink::default()).await.unwrap_err();
        assert!(matches!(err, TrainingError::RuntimeExit { code: Some(3), .. }));
        assert_eq!(err.exit_code(), Some(3));
    }
}
