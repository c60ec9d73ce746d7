//! `panoptic launch`: multi-node fit for an EfficientPS variant.

use crate::commands::report::print_manifest;
use crate::commands::select_trainer;
use crate::commands::types::LaunchCommand;
use crate::logging::LogHandle;
use anyhow::Result;
use colored::Colorize;
use panoptic_core::LaunchArgs;
use panoptic_training::TracingProgressSink;
use tracing::info;

pub async fn execute(cmd: LaunchCommand, log: &LogHandle) -> Result<()> {
    let args = LaunchArgs {
        nodes: cmd.nodes,
        local_ranks: cmd.local_ranks,
        ip_address: cmd.ip_address,
        ngpus: cmd.ngpus,
        model_name: cmd.model_name,
        config: cmd.config,
        fast_dev: cmd.fast_dev,
    };

    // Model name is checked before anything touches the filesystem.
    let (entry, request) = args.plan()?;
    let trainer = select_trainer(&cmd.backend)?;

    let resolved = request.resolve()?;
    log.attach_file(&resolved.log_path())?;
    info!("Running {} on {} node(s)", entry.name, args.nodes);

    if !cmd.backend.json {
        let env = args.distributed();
        println!(
            "{} {} (world size {}, master {}:{})",
            "Launching".bold(),
            entry.name.cyan(),
            env.world_size,
            env.master_addr,
            env.master_port
        );
    }

    let manifest = resolved.prepare()?.execute(trainer.as_ref(), &TracingProgressSink).await?;
    print_manifest(&manifest, cmd.backend.json)
}
