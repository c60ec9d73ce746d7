use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

pub const LR_FIND_MIN: f64 = 1e-4;
pub const LR_FIND_MAX: f64 = 1e-1;
pub const LR_FIND_STEPS: u32 = 100;

/// Learning-rate range searched by `tune`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LrRange {
    pub min_lr: f64,
    pub max_lr: f64,
    pub num_training: u32,
}

impl Default for LrRange {
    fn default() -> Self {
        Self { min_lr: LR_FIND_MIN, max_lr: LR_FIND_MAX, num_training: LR_FIND_STEPS }
    }
}

impl LrRange {
    /// Exponentially spaced candidate rates from `min_lr` to `max_lr`.
    #[must_use]
    pub fn candidates(&self) -> Vec<f64> {
        let n = self.num_training.max(2);
        let ratio = (self.max_lr / self.min_lr).ln();
        (0..n).map(|i| self.min_lr * (ratio * f64::from(i) / f64::from(n - 1)).exp()).collect()
    }
}

/// Raw mode switches as they arrive from the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    pub tune: bool,
    pub predict: bool,
    pub eval: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunMode {
    Tune(LrRange),
    Predict,
    Eval,
    Fit,
}

impl RunMode {
    /// Pick exactly one mode. Precedence is tune, predict, eval, then fit;
    /// flags that lose are reported once.
    #[must_use]
    pub fn from_flags(flags: RunFlags) -> Self {
        let set: Vec<&str> = [("tune", flags.tune), ("predict", flags.predict), ("eval", flags.eval)]
            .into_iter()
            .filter_map(|(name, on)| on.then_some(name))
            .collect();

        let mode = if flags.tune {
            Self::Tune(LrRange::default())
        } else if flags.predict {
            Self::Predict
        } else if flags.eval {
            Self::Eval
        } else {
            Self::Fit
        };

        if set.len() > 1 {
            warn!("multiple run modes requested ({}), running {}", set.join(", "), mode);
        }
        mode
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Tune(_) => "tune",
            Self::Predict => "predict",
            Self::Eval => "eval",
            Self::Fit => "fit",
        }
    }

    /// Modes that run without gradient tracking.
    #[must_use]
    pub const fn is_inference(&self) -> bool {
        matches!(self, Self::Predict | Self::Eval)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
