//! The serving engine the lifecycle controller drives.
//!
//! A [`NodeFactory`] turns a [`LaunchPlan`] plus the worker-class registry
//! into a running [`WorkerNode`]. The default engine is [`ExpertServer`], an
//! HTTP node exposing the experts it hosts.

pub mod backend;
pub mod checkpoint;
pub mod handlers;
pub mod server;
pub mod state;

pub use backend::{build_backends, ExpertBackend};
pub use handlers::create_router;
pub use server::{ExpertServer, ExpertServerFactory};
pub use state::{NodeInfo, NodeState};

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::LaunchPlan;
use crate::plugin::WorkerRegistry;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Unknown expert class '{name}' (available: {})", .available.join(", "))]
    UnknownExpertClass { name: String, available: Vec<String> },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint directory {}: {source}", .path.display())]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("Node task failed: {0}")]
    Task(String),
}

/// A started node. Owned exclusively by the lifecycle controller.
#[async_trait]
pub trait WorkerNode: Send {
    /// Resolves once the node stops on its own. Must be cancel safe: the
    /// controller drops this future when it decides to stop the node.
    async fn join(&mut self) -> Result<(), NodeError>;

    /// Stop serving and release resources. Called exactly once.
    async fn shutdown(&mut self);
}

/// Builds and starts a node from a resolved plan
#[async_trait]
pub trait NodeFactory: Send + Sync {
    async fn start(
        &self,
        plan: &LaunchPlan,
        registry: &WorkerRegistry,
    ) -> Result<Box<dyn WorkerNode>, NodeError>;
}
