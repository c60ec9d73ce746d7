use crate::config::RuntimeEnvironment;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MASTER_PORT: u16 = 12355;

/// Coordination parameters for the distributed runtime.
///
/// Built once by the launcher and handed to the trainer backend by value.
/// Backends apply it to the environment of the processes they spawn; the
/// launcher's own environment is left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedEnv {
    pub master_addr: String,
    pub master_port: u16,
    pub world_size: u32,
    pub node_rank: u32,
}

impl DistributedEnv {
    #[must_use]
    pub fn new(master_addr: impl Into<String>, nodes: u32, gpus_per_node: u32, node_rank: u32) -> Self {
        Self::for_runtime(master_addr, RuntimeEnvironment::new(gpus_per_node, nodes), node_rank)
    }

    /// World size taken from `runtime`, the same value the run
    /// configuration records as `WORLD_SIZE`.
    #[must_use]
    pub fn for_runtime(master_addr: impl Into<String>, runtime: RuntimeEnvironment, node_rank: u32) -> Self {
        Self {
            master_addr: master_addr.into(),
            master_port: DEFAULT_MASTER_PORT,
            world_size: runtime.world_size(),
            node_rank,
        }
    }

    /// Single-process run on this host.
    #[must_use]
    pub fn local() -> Self {
        Self::new("127.0.0.1", 1, 1, 0)
    }

    /// Variables consumed by the distributed runtime.
    #[must_use]
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("MASTER_ADDR", self.master_addr.clone()),
            ("MASTER_PORT", self.master_port.to_string()),
            ("WORLD_SIZE", self.world_size.to_string()),
            ("NODE_RANK", self.node_rank.to_string()),
        ]
    }
}
