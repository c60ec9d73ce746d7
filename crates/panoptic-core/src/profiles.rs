use panoptic_training::{Metric, ModelArch, MonitorProfile, DEFAULT_PATIENCE, SHORT_PATIENCE};

/// Per-architecture run settings: what is monitored and where it logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelProfile {
    pub arch: ModelArch,
    pub monitor: MonitorProfile,
    /// Suffix of the per-model log file (`core_<suffix>.log`).
    pub log_suffix: &'static str,
}

#[must_use]
pub const fn profile_for(arch: ModelArch) -> ModelProfile {
    let (metric, patience, log_suffix) = match arch {
        ModelArch::EfficientPs => (Metric::MapSegm, DEFAULT_PATIENCE, ""),
        ModelArch::EfficientPsPlus => (Metric::MapSegm, DEFAULT_PATIENCE, "plus"),
        ModelArch::EfficientPsSemantic => (Metric::IoU, SHORT_PATIENCE, "semantic"),
        ModelArch::EfficientPsInstance => (Metric::MapSegm, DEFAULT_PATIENCE, "instance"),
        ModelArch::MaskRcnn => (Metric::TrainLossEpoch, DEFAULT_PATIENCE, "maskrcnn"),
        ModelArch::PanDepth => (Metric::IoU, DEFAULT_PATIENCE, "pan_depth"),
    };
    ModelProfile { arch, monitor: MonitorProfile { metric, patience }, log_suffix }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panoptic_training::Direction;

    #[test]
    fn test_semantic_profile_uses_iou_with_short_patience() {
        let profile = profile_for(ModelArch::EfficientPsSemantic);
        assert_eq!(profile.monitor.metric, Metric::IoU);
        assert_eq!(profile.monitor.patience, SHORT_PATIENCE);
        assert_eq!(profile.monitor.metric.direction(), Direction::Max);
    }

    #[test]
    fn test_maskrcnn_minimises_training_loss() {
        let profile = profile_for(ModelArch::MaskRcnn);
        assert_eq!(profile.monitor.metric.direction(), Direction::Min);
        assert_eq!(profile.monitor.patience, DEFAULT_PATIENCE);
    }

    #[test]
    fn test_log_suffixes_are_distinct() {
        let mut suffixes: Vec<_> = ModelArch::ALL.iter().map(|a| profile_for(*a).log_suffix).collect();
        suffixes.sort_unstable();
        suffixes.dedup();
        assert_eq!(suffixes.len(), ModelArch::ALL.len());
    }
}
