use crate::config::RunConfiguration;
use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

const VKITTI2_CATEGORIES: &[&str] = &[
    "Terrain",
    "Sky",
    "Tree",
    "Vegetation",
    "Building",
    "Road",
    "GuardRail",
    "TrafficSign",
    "TrafficLight",
    "Pole",
    "Misc",
    "Truck",
    "Car",
    "Van",
];
const FRIDGE_CATEGORIES: &[&str] = &["carton", "milk_bottle", "can", "water_bottle"];
const YT_CATEGORIES: &[&str] = &["person", "animal", "vehicle"];
const FOREST_CATEGORIES: &[&str] = &["tree"];

const FRIDGE_IMAGE_SIZE: u32 = 512;
const FRIDGE_BATCH_SIZE: u32 = 8;
const FRIDGE_NUM_WORKERS: u32 = 8;
const FRIDGE_VAL_FRACTION: f32 = 0.2;

/// Datasets with a registered data module. New tags are added here explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetKind {
    #[serde(rename = "vkitti2")]
    Vkitti2,
    #[serde(rename = "odFridgeObjects")]
    OdFridgeObjects,
    #[serde(rename = "yt")]
    Yt,
    #[serde(rename = "forest")]
    Forest,
}

impl DatasetKind {
    pub const ALL: [Self; 4] = [Self::Vkitti2, Self::OdFridgeObjects, Self::Yt, Self::Forest];

    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Vkitti2 => "vkitti2",
            Self::OdFridgeObjects => "odFridgeObjects",
            Self::Yt => "yt",
            Self::Forest => "forest",
        }
    }

    #[must_use]
    pub fn builtin_categories(self) -> Vec<String> {
        let cats = match self {
            Self::Vkitti2 => VKITTI2_CATEGORIES,
            Self::OdFridgeObjects => FRIDGE_CATEGORIES,
            Self::Yt => YT_CATEGORIES,
            Self::Forest => FOREST_CATEGORIES,
        };
        cats.iter().map(|c| (*c).to_string()).collect()
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DatasetKind {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|k| k.tag() == s).ok_or_else(|| TrainingError::UnsupportedDataset {
            value: s.to_string(),
            accepted: Self::ALL.iter().map(|k| k.tag()).collect(),
        })
    }
}

/// How a dataset's images are divided into train and validation sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSplits {
    Directories { train: PathBuf, val: PathBuf },
    /// One image folder; the data module holds out a fraction for validation.
    Holdout { images: PathBuf, val_fraction: f32 },
}

/// Paths and sizes a data module is constructed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModuleSpec {
    pub root: PathBuf,
    pub splits: DataSplits,
    pub annotations: Option<PathBuf>,
    pub image_size: u32,
    pub batch_size: u32,
    pub num_workers: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub kind: DatasetKind,
    pub datamodule: DataModuleSpec,
    pub categories: Vec<String>,
}

/// Data-loading collaborator handed to the trainer.
pub trait DataModule: Send + Sync {
    /// Number of training batches per epoch.
    fn train_len(&self) -> usize;

    /// Number of validation batches.
    fn val_len(&self) -> usize;

    /// Batches seen by `predict`; prediction runs over the training split.
    fn predict_len(&self) -> usize {
        self.train_len()
    }
}

/// Resolve the configured `DATASET_TYPE` into a descriptor.
///
/// A `CATEGORIES` list in the configuration replaces the built-in list.
pub fn select_dataset(config: &RunConfiguration) -> TrainingResult<DatasetDescriptor> {
    let kind: DatasetKind = config.dataset_type.parse()?;
    let root = config.dataset_root.join(kind.tag());

    let datamodule = match kind {
        DatasetKind::OdFridgeObjects => DataModuleSpec {
            splits: DataSplits::Holdout { images: root.join("images"), val_fraction: FRIDGE_VAL_FRACTION },
            annotations: Some(root.join("ann_clean.json")),
            image_size: FRIDGE_IMAGE_SIZE,
            batch_size: FRIDGE_BATCH_SIZE,
            num_workers: FRIDGE_NUM_WORKERS,
            root,
        },
        DatasetKind::Vkitti2 | DatasetKind::Yt | DatasetKind::Forest => DataModuleSpec {
            splits: DataSplits::Directories { train: root.join("train"), val: root.join("val") },
            annotations: None,
            image_size: config.image_size,
            batch_size: config.batch_size,
            num_workers: config.num_workers,
            root,
        },
    };

    let categories = config.categories.clone().unwrap_or_else(|| kind.builtin_categories());
    Ok(DatasetDescriptor { kind, datamodule, categories })
}

/// Steps between trainer log lines: configured value, else half an epoch.
#[must_use]
pub fn log_interval(config: &RunConfiguration, datamodule: &dyn DataModule) -> u64 {
    config
        .log_every_n_steps
        .unwrap_or_else(|| (datamodule.train_len() / 2) as u64)
        .max(1)
}
