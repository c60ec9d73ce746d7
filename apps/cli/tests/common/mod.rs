//! Shared fixtures for CLI integration tests.

use std::path::{Path, PathBuf};

/// Write a vkitti2 config plus a tiny image tree under `dir`.
pub fn write_workspace(dir: &Path) -> PathBuf {
    let root = dir.join("data").join("vkitti2");
    for (split, n) in [("train", 4), ("val", 2)] {
        let split_dir = root.join(split);
        std::fs::create_dir_all(&split_dir).unwrap();
        for i in 0..n {
            std::fs::write(split_dir.join(format!("{i:04}.png")), b"").unwrap();
        }
    }

    let config = dir.join("config.yaml");
    std::fs::write(
        &config,
        format!(
            "SOLVER:\n  NAME: Adam\n  BASE_LR: 0.001\nDATASET_TYPE: vkitti2\nDATASET_ROOT: {}\nBATCH_SIZE: 2\nCALLBACKS:\n  CHECKPOINT_DIR: {}\n",
            dir.join("data").display(),
            dir.join("ckpt").display()
        ),
    )
    .unwrap();
    config
}
