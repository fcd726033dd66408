use std::fmt;
use std::path::PathBuf;

use serde::{Serialize, Serializer};

use super::compression::CompressionMode;
use super::device::Device;
use super::optimizer::OptimizerSpec;
use super::selector::WorkUnitSelector;
use super::ConfigError;

/// Address the node listens on. A `*` port means "any free port".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    pub host: String,
    pub port: Option<u16>,
}

impl ListenAddr {
    /// Parse `host:port` or `host:*`. IPv6 hosts must be bracketed.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidListenAddr(value.to_string());

        let (host, port) = value.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || (host.contains(':') && !(host.starts_with('[') && host.ends_with(']')))
        {
            return Err(invalid());
        }
        let port = match port {
            "*" => None,
            p => Some(p.parse::<u16>().map_err(|_| invalid())?),
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// String suitable for binding a socket; `*` becomes port 0
    pub fn bind_target(&self) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(0))
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}:*", self.host),
        }
    }
}

impl Serialize for ListenAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Peer-discovery participation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DhtSettings {
    pub enabled: bool,
    pub initial_peers: Vec<String>,
    pub port: Option<u16>,
}

/// Where expert checkpoints live and whether to restore them at start
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CheckpointSettings {
    pub dir: Option<PathBuf>,
    pub load_on_start: bool,
}

/// Hyperparameters handed to every worker-class constructor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerParams {
    pub hidden_dim: usize,
    pub max_batch_size: usize,
}

/// Fully resolved configuration of one node instance.
///
/// Produced once by [`super::resolve`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchPlan {
    pub listen_on: ListenAddr,
    pub selector: WorkUnitSelector,
    pub expert_cls: String,
    pub worker: WorkerParams,
    pub num_handlers: usize,
    pub device: Device,
    pub optimizer: OptimizerSpec,
    pub compression: CompressionMode,
    pub dht: DhtSettings,
    pub checkpoint: CheckpointSettings,
    pub increase_file_limit: bool,
    /// Custom worker-class module, already checked to be a readable file
    pub custom_module_path: Option<PathBuf>,
}

impl LaunchPlan {
    /// Whether the lifecycle needs a configuring phase before start
    pub fn needs_environment_adjustments(&self) -> bool {
        self.increase_file_limit || self.custom_module_path.is_some()
    }
}
