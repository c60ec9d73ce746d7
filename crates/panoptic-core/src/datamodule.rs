use panoptic_training::{DataModule, DataModuleSpec, DataSplits, TrainingError, TrainingResult};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Data module over image folders on disk.
///
/// Only counts images; decoding and augmentation belong to the training
/// runtime that receives the data module spec.
#[derive(Debug, Clone)]
pub struct FolderDataModule {
    batch_size: u32,
    train_images: usize,
    val_images: usize,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

fn count_images(dir: &Path) -> TrainingResult<usize> {
    if !dir.is_dir() {
        return Err(TrainingError::Config(format!("dataset split not found: {}", dir.display())));
    }
    let mut count = 0;
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if entry.file_type().is_file() && is_image(entry.path()) {
            count += 1;
        }
    }
    Ok(count)
}

impl FolderDataModule {
    pub fn open(spec: &DataModuleSpec) -> TrainingResult<Self> {
        let (train_images, val_images) = match &spec.splits {
            DataSplits::Directories { train, val } => (count_images(train)?, count_images(val)?),
            DataSplits::Holdout { images, val_fraction } => {
                let total = count_images(images)?;
                let val = ((total as f64) * f64::from(*val_fraction)).round() as usize;
                (total - val.min(total), val.min(total))
            }
        };
        debug!("data module at {}: {train_images} train / {val_images} val images", spec.root.display());
        Ok(Self { batch_size: spec.batch_size, train_images, val_images })
    }

    fn batches(&self, images: usize) -> usize {
        images.div_ceil(self.batch_size.max(1) as usize)
    }
}

impl DataModule for FolderDataModule {
    fn train_len(&self) -> usize {
        self.batches(self.train_images)
    }

    fn val_len(&self) -> usize {
        self.batches(self.val_images)
    }
}
