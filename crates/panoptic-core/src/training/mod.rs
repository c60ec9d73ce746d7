//! Trainer backends (external runtime + dry run).
//!
//! The backend-agnostic types live in `panoptic-training`. This module
//! contains the concrete implementations used by the `panoptic` binary.

pub mod dry_run;
pub mod process;

pub use dry_run::{DryRunTrainer, RecordedCall, TrainerCall};
pub use process::{ProcessTrainer, TRAINER_CMD_ENV};

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::datamodule::tests::touch_images;
    use crate::datamodule::FolderDataModule;
    use panoptic_training::{
        select_dataset, CheckpointSlot, DatasetDescriptor, DistributedEnv, ModelArch, ProgressEvent, ProgressSink,
        RunConfiguration, RunContext, RunLayout, RunMode, RuntimeEnvironment, TrainerOptions,
    };
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSink for RecordingSink {
        fn on_event(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl RecordingSink {
        pub(crate) fn messages(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    ProgressEvent::Message { message, .. } => Some(message.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    /// A vkitti2 run over four train and two val images.
    pub(crate) struct Fixture {
        pub(crate) _temp: TempDir,
        pub(crate) config: RunConfiguration,
        pub(crate) dataset: DatasetDescriptor,
        pub(crate) datamodule: FolderDataModule,
    }

    impl Fixture {
        pub(crate) fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let config_path = crate::model::tests::write_config(temp.path(), "BATCH_SIZE: 2\n");
            let config = RunConfiguration::resolve(&config_path, RuntimeEnvironment::new(1, 1)).unwrap();
            let root = temp.path().join("data").join("vkitti2");
            touch_images(&root.join("train"), 4);
            touch_images(&root.join("val"), 2);
            let dataset = select_dataset(&config).unwrap();
            let datamodule = FolderDataModule::open(&dataset.datamodule).unwrap();
            Self { _temp: temp, config, dataset, datamodule }
        }

        pub(crate) fn ctx(&self, arch: ModelArch, mode: &RunMode, distributed: DistributedEnv) -> RunContext<'_> {
            RunContext {
                run_id: "test-run".to_string(),
                arch,
                config: &self.config,
                dataset: &self.dataset,
                datamodule: &self.datamodule,
                options: TrainerOptions::for_run(&self.config, mode, CheckpointSlot::Training, 1, false),
                distributed,
                layout: RunLayout::new(self.config.checkpoint_dir()),
            }
        }
    }
}
