//! Argument types shared by the command implementations.

use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Trainer backend selection.
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Record what would run and synthesise results instead of training
    #[arg(long)]
    pub dry_run: bool,

    /// Training runtime command (defaults to $PANOPTIC_TRAINER_CMD)
    #[arg(long, conflicts_with = "dry_run")]
    pub trainer_cmd: Option<String>,

    /// Print the run manifest as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LaunchCommand {
    /// Number of nodes
    #[arg(long, default_value_t = 1)]
    pub nodes: u32,

    /// Rank of this node
    #[arg(long, alias = "local_ranks", default_value_t = 0)]
    pub local_ranks: u32,

    /// Address of the master node
    #[arg(long, alias = "ip_adress")]
    pub ip_address: String,

    /// GPUs per node
    #[arg(long, default_value_t = 4)]
    pub ngpus: u32,

    /// EfficientPS, EfficientPS_Plus, EfficientPS_semantic or EfficientPS_instance
    #[arg(long, alias = "model_name")]
    pub model_name: String,

    /// Run configuration file (.yaml, .yml or .toml)
    #[arg(long)]
    pub config: PathBuf,

    /// Run a single batch per stage
    #[arg(long, alias = "fast_dev")]
    pub fast_dev: bool,

    #[command(flatten)]
    pub backend: BackendArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RunCommand {
    /// Architecture (EfficientPS, EfficientPS_Plus, EfficientPS_semantic,
    /// EfficientPS_instance, MaskRCNN, PanDepth)
    #[arg(long)]
    pub model: String,

    /// Run configuration file (.yaml, .yml or .toml)
    #[arg(long)]
    pub config: PathBuf,

    /// Search for a learning rate
    #[arg(long)]
    pub tune: bool,

    /// Predict over the training split
    #[arg(long)]
    pub predict: bool,

    /// Validate only
    #[arg(long)]
    pub eval: bool,

    /// Run a single batch per stage
    #[arg(long)]
    pub fast_dev: bool,

    /// GPUs to use (defaults to the devices in CUDA_VISIBLE_DEVICES, which
    /// must then be set)
    #[arg(long)]
    pub ngpus: Option<u32>,

    #[command(flatten)]
    pub backend: BackendArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CheckpointsCommand {
    /// List checkpoints in a directory
    List {
        /// Checkpoint directory
        dir: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
