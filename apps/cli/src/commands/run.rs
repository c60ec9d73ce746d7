//! `panoptic run`: one model on this machine.

use crate::commands::report::print_manifest;
use crate::commands::select_trainer;
use crate::commands::types::RunCommand;
use crate::logging::LogHandle;
use anyhow::{Context, Result};
use panoptic_core::{profile_for, RunRequest};
use panoptic_training::{DistributedEnv, ModelArch, RunFlags, RuntimeEnvironment, TracingProgressSink};

pub async fn execute(cmd: RunCommand, log: &LogHandle) -> Result<()> {
    let arch: ModelArch = cmd.model.parse()?;
    let trainer = select_trainer(&cmd.backend)?;

    let runtime = match cmd.ngpus {
        Some(n) => RuntimeEnvironment::new(n, 1),
        None => RuntimeEnvironment::detect().context("CUDA_VISIBLE_DEVICES is not set; pass --ngpus")?,
    };
    let request = RunRequest {
        config_path: cmd.config,
        profile: profile_for(arch),
        flags: RunFlags { tune: cmd.tune, predict: cmd.predict, eval: cmd.eval },
        fast_dev: cmd.fast_dev,
        runtime,
        distributed: DistributedEnv::for_runtime("127.0.0.1", runtime, 0),
    };

    let resolved = request.resolve()?;
    log.attach_file(&resolved.log_path())?;

    let manifest = resolved.prepare()?.execute(trainer.as_ref(), &TracingProgressSink).await?;
    print_manifest(&manifest, cmd.backend.json)
}
