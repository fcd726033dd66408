use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{CompressionMode, DhtSettings, Device, LaunchPlan, OptimizerSpec};

use super::backend::ExpertBackend;

/// Compression as reported to clients: wire code and name
#[derive(Debug, Clone, Serialize)]
pub struct CompressionInfo {
    pub name: &'static str,
    pub code: i32,
}

impl From<CompressionMode> for CompressionInfo {
    fn from(mode: CompressionMode) -> Self {
        Self {
            name: mode.name(),
            code: mode.code(),
        }
    }
}

/// Static description of the running node
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub node_id: Uuid,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    /// Address actually bound, with `*` resolved
    pub listen_on: String,
    pub expert_cls: String,
    pub num_experts: usize,
    pub num_handlers: usize,
    pub hidden_dim: usize,
    pub max_batch_size: usize,
    pub device: Device,
    pub optimizer: OptimizerSpec,
    pub compression: CompressionInfo,
    pub dht: DhtSettings,
    pub checkpoint_dir: Option<PathBuf>,
}

impl NodeInfo {
    pub fn new(plan: &LaunchPlan, listen_on: String, num_experts: usize) -> Self {
        Self {
            node_id: Uuid::new_v4(),
            hostname: local_hostname(),
            started_at: Utc::now(),
            listen_on,
            expert_cls: plan.expert_cls.clone(),
            num_experts,
            num_handlers: plan.num_handlers,
            hidden_dim: plan.worker.hidden_dim,
            max_batch_size: plan.worker.max_batch_size,
            device: plan.device,
            optimizer: plan.optimizer,
            compression: plan.compression.into(),
            dht: plan.dht.clone(),
            checkpoint_dir: plan.checkpoint.dir.clone(),
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Shared state handed to every handler
#[derive(Clone)]
pub struct NodeState {
    pub info: Arc<NodeInfo>,
    pub experts: Arc<BTreeMap<String, ExpertBackend>>,
}

impl NodeState {
    pub fn new(info: NodeInfo, backends: Vec<ExpertBackend>) -> Self {
        let experts = backends
            .into_iter()
            .map(|backend| (backend.uid.clone(), backend))
            .collect();
        Self {
            info: Arc::new(info),
            experts: Arc::new(experts),
        }
    }

    pub fn expert(&self, uid: &str) -> Option<&ExpertBackend> {
        self.experts.get(uid)
    }

    /// Hosted uids in sorted order
    pub fn expert_uids(&self) -> Vec<String> {
        self.experts.keys().cloned().collect()
    }
}
