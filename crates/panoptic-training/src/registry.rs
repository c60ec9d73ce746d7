use crate::callbacks::LAST_CHECKPOINT_NAME;
use crate::error::TrainingResult;
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointRole {
    Last,
    /// Saved by the best-checkpoint monitor (`epoch=<e>-<metric>=<v>.ckpt`).
    Monitored,
    Other,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    pub role: CheckpointRole,
    pub epoch: Option<u32>,
    pub score: Option<f64>,
    pub size_bytes: u64,
}

/// Parse `epoch=12-map_segm=0.4312.ckpt` into `(12, 0.4312)`.
fn parse_monitored_name(stem: &str) -> Option<(u32, f64)> {
    let rest = stem.strip_prefix("epoch=")?;
    let (epoch, metric) = rest.split_once('-')?;
    let (_, score) = metric.rsplit_once('=')?;
    Some((epoch.parse().ok()?, score.parse().ok()?))
}

/// List `.ckpt` files under `dir`, sorted by path.
pub fn discover_checkpoints(dir: &Path) -> TrainingResult<Vec<CheckpointEntry>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("ckpt") {
            continue;
        }

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let stem = path.file_stem().and_then(|n| n.to_str()).unwrap_or_default();
        let (role, epoch, score) = if name == LAST_CHECKPOINT_NAME {
            (CheckpointRole::Last, None, None)
        } else if let Some((epoch, score)) = parse_monitored_name(stem) {
            (CheckpointRole::Monitored, Some(epoch), Some(score))
        } else {
            (CheckpointRole::Other, None, None)
        };

        out.push(CheckpointEntry {
            path: path.to_path_buf(),
            role,
            epoch,
            score,
            size_bytes: entry.metadata().map(|m| m.len()).unwrap_or(0),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_monitored_name() {
        assert_eq!(parse_monitored_name("epoch=12-map_segm=0.4312"), Some((12, 0.4312)));
        assert_eq!(parse_monitored_name("epoch=3-train_loss_epoch=1.2500"), Some((3, 1.25)));
        assert_eq!(parse_monitored_name("last"), None);
    }

    #[test]
    fn test_discover_classifies_checkpoints() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("last.ckpt"), "{}").unwrap();
        std::fs::write(temp.path().join("epoch=4-IoU=0.7100.ckpt"), "{}").unwrap();
        std::fs::write(temp.path().join("manual.ckpt"), "{}").unwrap();
        std::fs::write(temp.path().join("core.log"), "").unwrap();

        let found = discover_checkpoints(temp.path()).unwrap();
        assert_eq!(found.len(), 3);
        let roles: Vec<_> = found.iter().map(|c| c.role).collect();
        assert!(roles.contains(&CheckpointRole::Last));
        assert!(roles.contains(&CheckpointRole::Monitored));
        assert!(roles.contains(&CheckpointRole::Other));
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(discover_checkpoints(&temp.path().join("absent")).unwrap().is_empty());
    }
}
