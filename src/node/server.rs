use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{CheckpointSettings, LaunchPlan};
use crate::plugin::WorkerRegistry;

use super::backend::{build_backends, merge_uids};
use super::checkpoint::{discover_checkpoints, ensure_checkpoint_dir};
use super::handlers::create_router;
use super::state::{NodeInfo, NodeState};
use super::{NodeError, NodeFactory, WorkerNode};

/// HTTP node hosting the plan's experts
pub struct ExpertServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: Option<JoinHandle<io::Result<()>>>,
}

impl ExpertServer {
    /// Build the experts, bind the listener and start serving in the background
    pub async fn start(plan: &LaunchPlan, registry: &WorkerRegistry) -> Result<Self, NodeError> {
        let checkpoint = plan.checkpoint.clone();
        let restored = tokio::task::spawn_blocking(move || restore_checkpoints(&checkpoint))
            .await
            .map_err(|e| NodeError::Task(e.to_string()))??;
        // thread_rng is not Send; keep it out of any await
        let selected = plan.selector.expert_uids(&mut rand::thread_rng());
        let uids = merge_uids(selected, &restored);
        let backends = build_backends(plan, registry, &uids, &restored)?;

        let bind_target = plan.listen_on.bind_target();
        let listener = TcpListener::bind(&bind_target)
            .await
            .map_err(|source| NodeError::Bind {
                addr: bind_target.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        if backends.is_empty() {
            info!("Serving no experts; running as a relay node");
        } else {
            info!(
                "Hosting {} '{}' expert(s) on {}",
                backends.len(),
                plan.expert_cls,
                plan.device
            );
        }
        announce_dht(plan);

        let info = NodeInfo::new(plan, local_addr.to_string(), backends.len());
        let app = create_router(NodeState::new(info, backends));

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        info!("Expert server listening on {}", local_addr);
        info!("Endpoints:");
        info!("  GET  /health        - Health check");
        info!("  GET  /info          - Node description");
        info!("  GET  /experts       - Hosted expert uids");
        info!("  GET  /experts/{{uid}} - Expert backend");

        Ok(Self {
            local_addr,
            shutdown,
            task: Some(task),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl WorkerNode for ExpertServer {
    async fn join(&mut self) -> Result<(), NodeError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        self.task = None;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NodeError::Serve(e)),
            Err(e) => Err(NodeError::Task(e.to_string())),
        }
    }

    async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Server error during shutdown: {}", e),
                Err(e) => error!("Server task failed during shutdown: {}", e),
            }
        }
        info!("Expert server on {} stopped", self.local_addr);
    }
}

impl Drop for ExpertServer {
    fn drop(&mut self) {
        // stop serving even if shutdown() was never awaited
        self.shutdown.cancel();
    }
}

/// Starts an [`ExpertServer`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpertServerFactory;

#[async_trait]
impl NodeFactory for ExpertServerFactory {
    async fn start(
        &self,
        plan: &LaunchPlan,
        registry: &WorkerRegistry,
    ) -> Result<Box<dyn WorkerNode>, NodeError> {
        let server = ExpertServer::start(plan, registry).await?;
        Ok(Box::new(server))
    }
}

/// Prepare the checkpoint directory and list the experts to restore from it.
///
/// Blocking filesystem access; run it off the async workers.
fn restore_checkpoints(checkpoint: &CheckpointSettings) -> Result<Vec<String>, NodeError> {
    let Some(dir) = checkpoint.dir.as_deref() else {
        return Ok(Vec::new());
    };
    let checkpoint_err = |source: io::Error| NodeError::Checkpoint {
        path: dir.to_path_buf(),
        source,
    };

    ensure_checkpoint_dir(dir).map_err(checkpoint_err)?;
    if !checkpoint.load_on_start {
        debug!("Checkpoints will be saved to {}", dir.display());
        return Ok(Vec::new());
    }

    let restored = discover_checkpoints(dir).map_err(checkpoint_err)?;
    info!(
        "Restoring {} expert(s) from {}",
        restored.len(),
        dir.display()
    );
    Ok(restored)
}

fn announce_dht(plan: &LaunchPlan) {
    let dht = &plan.dht;
    if !dht.enabled {
        info!("DHT disabled; experts are not announced to peers");
        return;
    }
    match (dht.initial_peers.len(), dht.port) {
        (0, Some(port)) => info!("Starting a new DHT on port {}", port),
        (0, None) => info!("Starting a new DHT"),
        (n, Some(port)) => info!("Joining DHT through {} initial peer(s) on port {}", n, port),
        (n, None) => info!("Joining DHT through {} initial peer(s)", n),
    }
}
