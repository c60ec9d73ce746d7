//! Training-loop observers: early stopping, best-checkpoint saving and
//! learning-rate logging.
//!
//! A [`CallbackSet`] always holds exactly one of each. The monitored metric
//! decides the comparison direction; callers never pass it separately.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Epochs without improvement before stopping, for most model profiles.
pub const DEFAULT_PATIENCE: u32 = 30;
/// Patience for profiles that plateau early (semantic-only training).
pub const SHORT_PATIENCE: u32 = 20;

pub const LAST_CHECKPOINT_NAME: &str = "last.ckpt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Min,
    Max,
}

impl Direction {
    fn improves(self, value: f64, best: f64, min_delta: f64) -> bool {
        match self {
            Self::Min => value < best - min_delta,
            Self::Max => value > best + min_delta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "map_segm")]
    MapSegm,
    #[serde(rename = "map")]
    MapBbox,
    #[serde(rename = "IoU")]
    IoU,
    #[serde(rename = "train_loss_epoch")]
    TrainLossEpoch,
    #[serde(rename = "val_loss")]
    ValLoss,
}

impl Metric {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::MapSegm => "map_segm",
            Self::MapBbox => "map",
            Self::IoU => "IoU",
            Self::TrainLossEpoch => "train_loss_epoch",
            Self::ValLoss => "val_loss",
        }
    }

    /// Losses are minimised, accuracy-like scores maximised.
    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Self::TrainLossEpoch | Self::ValLoss => Direction::Min,
            Self::MapSegm | Self::MapBbox | Self::IoU => Direction::Max,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// What a model profile monitors and how long it waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorProfile {
    pub metric: Metric,
    pub patience: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallbackAction {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub monitor: Metric,
    pub mode: Direction,
    pub patience: u32,
    pub min_delta: f64,
    #[serde(skip)]
    best: Option<f64>,
    #[serde(skip)]
    wait: u32,
}

impl EarlyStopping {
    #[must_use]
    pub fn new(monitor: Metric, patience: u32) -> Self {
        Self { monitor, mode: monitor.direction(), patience, min_delta: 0.0, best: None, wait: 0 }
    }

    #[must_use]
    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta.abs();
        self
    }

    #[must_use]
    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn observe(&mut self, value: f64) -> CallbackAction {
        let improved = match self.best {
            None => !value.is_nan(),
            Some(best) => self.mode.improves(value, best, self.min_delta),
        };
        if improved {
            self.best = Some(value);
            self.wait = 0;
            return CallbackAction::Continue;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            info!(
                "Early stopping: {} did not improve for {} epochs (best: {:?})",
                self.monitor, self.patience, self.best
            );
            CallbackAction::Stop
        } else {
            CallbackAction::Continue
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCheckpoint {
    pub monitor: Metric,
    pub mode: Direction,
    pub dirpath: PathBuf,
    pub save_last: bool,
    pub verbose: bool,
    #[serde(skip)]
    best: Option<(f64, PathBuf)>,
}

impl ModelCheckpoint {
    #[must_use]
    pub fn new(monitor: Metric, dirpath: PathBuf) -> Self {
        Self { monitor, mode: monitor.direction(), dirpath, save_last: true, verbose: true, best: None }
    }

    #[must_use]
    pub fn filename_for(&self, epoch: u32, value: f64) -> PathBuf {
        self.dirpath.join(format!("epoch={epoch}-{}={value:.4}.ckpt", self.monitor))
    }

    #[must_use]
    pub fn last_path(&self) -> Option<PathBuf> {
        self.save_last.then(|| self.dirpath.join(LAST_CHECKPOINT_NAME))
    }

    #[must_use]
    pub fn best_path(&self) -> Option<&Path> {
        self.best.as_ref().map(|(_, p)| p.as_path())
    }

    /// Returns the file the new best checkpoint should be written to.
    pub fn observe(&mut self, epoch: u32, value: f64) -> Option<PathBuf> {
        let improved = match &self.best {
            None => !value.is_nan(),
            Some((best, _)) => self.mode.improves(value, *best, 0.0),
        };
        if !improved {
            return None;
        }
        let path = self.filename_for(epoch, value);
        if self.verbose {
            info!("Epoch {epoch}: {} reached {value:.5}, saving {}", self.monitor, path.display());
        }
        self.best = Some((value, path.clone()));
        Some(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LrRecord {
    pub epoch: u64,
    pub lr: f64,
}

/// Records the learning rate once per epoch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningRateMonitor {
    #[serde(skip)]
    history: Vec<LrRecord>,
}

impl LearningRateMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, epoch: u64, lr: f64) {
        if self.history.last().is_some_and(|r| (r.lr - lr).abs() > f64::EPSILON) {
            info!("lr changed to {lr:e} at epoch {epoch}");
        }
        self.history.push(LrRecord { epoch, lr });
    }

    #[must_use]
    pub fn history(&self) -> &[LrRecord] {
        &self.history
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    EarlyStopping,
    ModelCheckpoint,
    LearningRateMonitor,
}

/// What a trainer should do after an epoch has been observed.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochOutcome {
    pub action: CallbackAction,
    pub save_best: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackSet {
    pub early_stopping: EarlyStopping,
    pub checkpoint: ModelCheckpoint,
    pub lr_monitor: LearningRateMonitor,
}

impl CallbackSet {
    #[must_use]
    pub fn assemble(profile: MonitorProfile, checkpoint_dir: &Path) -> Self {
        Self {
            early_stopping: EarlyStopping::new(profile.metric, profile.patience),
            checkpoint: ModelCheckpoint::new(profile.metric, checkpoint_dir.to_path_buf()),
            lr_monitor: LearningRateMonitor::new(),
        }
    }

    #[must_use]
    pub const fn kinds(&self) -> [CallbackKind; 3] {
        [CallbackKind::EarlyStopping, CallbackKind::ModelCheckpoint, CallbackKind::LearningRateMonitor]
    }

    #[must_use]
    pub const fn monitor(&self) -> Metric {
        self.early_stopping.monitor
    }

    /// Feed one epoch's logged metrics through all three observers.
    pub fn on_epoch_end(&mut self, epoch: u32, metrics: &BTreeMap<String, f64>, lr: Option<f64>) -> EpochOutcome {
        if let Some(lr) = lr {
            self.lr_monitor.record(u64::from(epoch), lr);
        }

        let key = self.monitor().key();
        let Some(&value) = metrics.get(key) else {
            warn!("metric '{key}' not logged for epoch {epoch}, skipping early stopping and checkpointing");
            return EpochOutcome { action: CallbackAction::Continue, save_best: None };
        };

        let save_best = self.checkpoint.observe(epoch, value);
        let action = self.early_stopping.observe(value);
        EpochOutcome { action, save_best }
    }
}
