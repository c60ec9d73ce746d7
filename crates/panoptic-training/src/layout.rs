use crate::callbacks::LAST_CHECKPOINT_NAME;
use crate::error::TrainingResult;
use std::path::{Path, PathBuf};

/// Files a run writes inside its checkpoint directory.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(checkpoint_dir: &Path) -> Self {
        Self { root: checkpoint_dir.to_path_buf() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-model text log, e.g. `core_instance.log`.
    #[must_use]
    pub fn log_path(&self, suffix: &str) -> PathBuf {
        if suffix.is_empty() {
            self.root.join("core.log")
        } else {
            self.root.join(format!("core_{suffix}.log"))
        }
    }

    #[must_use]
    pub fn run_plan_path(&self) -> PathBuf {
        self.root.join("run_plan.json")
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("run_manifest.json")
    }

    #[must_use]
    pub fn last_checkpoint_path(&self) -> PathBuf {
        self.root.join(LAST_CHECKPOINT_NAME)
    }

    #[must_use]
    pub fn predictions_dir(&self) -> PathBuf {
        self.root.join("predictions")
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::new(&temp.path().join("ckpt"));
        layout.ensure_dirs().unwrap();

        assert!(layout.root().is_dir());
        assert!(layout.log_path("instance").ends_with("core_instance.log"));
        assert!(layout.log_path("").ends_with("core.log"));
        assert!(layout.last_checkpoint_path().ends_with("last.ckpt"));
    }
}
