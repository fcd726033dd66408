//! Process lifecycle of one node.
//!
//! ```text
//! Created -> [Configuring] -> Running -> ShuttingDown -> Stopped
//! ```
//!
//! `Configuring` only happens when the plan asks for an environment
//! adjustment. Once the node is running the controller waits for whichever
//! comes first: an interruption signal, programmatic cancellation, or the node
//! exiting on its own. Every path out of `Running` shuts the node down once,
//! including a panicking node and a dropped `run_until` future.

pub mod limits;
pub mod signal;

pub use limits::{EnvironmentAdjustmentError, FileLimit, FileLimitRaiser, NofileLimit};

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::LaunchPlan;
use crate::node::{NodeError, NodeFactory, WorkerNode};
use crate::plugin::{DynamicLoadError, ManifestLoader, PluginLoader, WorkerRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Configuring,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Configuring => "configuring",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting down",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why a node that reached `Running` was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Operator interruption (Ctrl+C / SIGTERM)
    Interrupted,
    /// The cancellation token was triggered
    Cancelled,
    /// The node finished without error on its own
    NodeExited,
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Failed to load custom module: {0}")]
    DynamicLoad(#[from] DynamicLoadError),

    #[error("Node failed: {0}")]
    RuntimeFailure(#[from] NodeError),

    #[error("Lifecycle already ran (state: {0})")]
    AlreadyRun(LifecycleState),
}

impl LifecycleError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            LifecycleError::DynamicLoad(_) => 3,
            LifecycleError::RuntimeFailure(_) | LifecycleError::AlreadyRun(_) => 1,
        }
    }
}

/// Current state plus every state entered so far. Shared with the node guard
/// so a shutdown finished after `run_until` was dropped is still recorded.
#[derive(Clone)]
struct Transitions {
    state_tx: Arc<watch::Sender<LifecycleState>>,
    history: Arc<Mutex<Vec<LifecycleState>>>,
}

impl Transitions {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Created);
        Self {
            state_tx: Arc::new(state_tx),
            history: Arc::new(Mutex::new(vec![LifecycleState::Created])),
        }
    }

    fn current(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    fn record(&self, next: LifecycleState) {
        info!(from = %self.current(), to = %next, "Lifecycle transition");
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(next);
        self.state_tx.send_replace(next);
    }

    fn history(&self) -> Vec<LifecycleState> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Owns a started node until it has been shut down.
///
/// If the guard is dropped first (the `run_until` future was abandoned while
/// the node was running), shutdown is finished on the current runtime.
struct NodeGuard {
    node: Option<Box<dyn WorkerNode>>,
    transitions: Transitions,
}

impl NodeGuard {
    async fn join(&mut self) -> Result<(), NodeError> {
        match self.node.as_mut() {
            Some(node) => node.join().await,
            None => Ok(()),
        }
    }

    async fn shutdown(mut self) {
        if let Some(mut node) = self.node.take() {
            self.transitions.record(LifecycleState::ShuttingDown);
            node.shutdown().await;
            self.transitions.record(LifecycleState::Stopped);
        }
    }
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let Some(mut node) = self.node.take() else {
            return;
        };
        warn!("Lifecycle abandoned while the node was running, shutting down");
        let transitions = self.transitions.clone();
        transitions.record(LifecycleState::ShuttingDown);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    node.shutdown().await;
                    transitions.record(LifecycleState::Stopped);
                });
            }
            Err(_) => {
                drop(node);
                transitions.record(LifecycleState::Stopped);
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Drives one node from configuration to shutdown
pub struct LifecycleController {
    plan: LaunchPlan,
    registry: WorkerRegistry,
    factory: Box<dyn NodeFactory>,
    loader: Box<dyn PluginLoader>,
    file_limit: Box<dyn FileLimitRaiser>,
    transitions: Transitions,
    cancel: CancellationToken,
}

impl LifecycleController {
    /// Controller with the built-in worker classes, the manifest loader and
    /// the process `RLIMIT_NOFILE`
    pub fn new(plan: LaunchPlan, factory: impl NodeFactory + 'static) -> Self {
        Self {
            plan,
            registry: WorkerRegistry::with_builtins(),
            factory: Box::new(factory),
            loader: Box::new(ManifestLoader),
            file_limit: Box::new(NofileLimit::default()),
            transitions: Transitions::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_registry(mut self, registry: WorkerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_loader(mut self, loader: impl PluginLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_file_limit(mut self, file_limit: impl FileLimitRaiser + 'static) -> Self {
        self.file_limit = Box::new(file_limit);
        self
    }

    pub fn plan(&self) -> &LaunchPlan {
        &self.plan
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn state(&self) -> LifecycleState {
        self.transitions.current()
    }

    /// Every state entered so far, in order
    pub fn history(&self) -> Vec<LifecycleState> {
        self.transitions.history()
    }

    /// Watch state transitions from another task
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.transitions.state_tx.subscribe()
    }

    /// Token that stops a running node when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until Ctrl+C / SIGTERM, cancellation or node exit
    pub async fn run(&mut self) -> Result<Termination, LifecycleError> {
        self.run_until(signal::interrupted()).await
    }

    /// Run until `interrupt` resolves, cancellation or node exit
    pub async fn run_until<F>(&mut self, interrupt: F) -> Result<Termination, LifecycleError>
    where
        F: Future<Output = ()>,
    {
        if self.state() != LifecycleState::Created {
            return Err(LifecycleError::AlreadyRun(self.state()));
        }

        if self.plan.needs_environment_adjustments() {
            self.transition(LifecycleState::Configuring);
            if let Err(e) = self.configure() {
                error!("{}", e);
                self.transition(LifecycleState::Stopped);
                return Err(e.into());
            }
        }

        let node = match self.factory.start(&self.plan, &self.registry).await {
            Ok(node) => node,
            Err(e) => {
                error!("Failed to start node: {}", e);
                self.transition(LifecycleState::Stopped);
                return Err(e.into());
            }
        };
        self.transition(LifecycleState::Running);
        let mut node = NodeGuard {
            node: Some(node),
            transitions: self.transitions.clone(),
        };

        // no early return until shutdown has run
        let outcome = tokio::select! {
            _ = interrupt => {
                warn!("Caught interrupt, shutting down");
                Ok(Termination::Interrupted)
            }
            _ = self.cancel.cancelled() => {
                warn!("Cancellation requested, shutting down");
                Ok(Termination::Cancelled)
            }
            result = AssertUnwindSafe(node.join()).catch_unwind() => match result {
                Ok(Ok(())) => {
                    warn!("Node exited on its own, shutting down");
                    Ok(Termination::NodeExited)
                }
                Ok(Err(e)) => {
                    error!("Node failed: {}", e);
                    Err(LifecycleError::RuntimeFailure(e))
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("Node panicked: {}", message);
                    Err(LifecycleError::RuntimeFailure(NodeError::Task(format!(
                        "node panicked: {}",
                        message
                    ))))
                }
            },
        };

        node.shutdown().await;

        outcome
    }

    /// Apply the environment adjustments the plan asks for. Only a custom
    /// module failure is fatal.
    fn configure(&mut self) -> Result<(), DynamicLoadError> {
        if self.plan.increase_file_limit {
            match self.file_limit.raise() {
                Ok(limit) => info!(
                    soft = limit.soft,
                    hard = limit.hard,
                    "Open file limit adjusted"
                ),
                Err(e) => warn!("{}; continuing with the current limit", e),
            }
        }

        if let Some(path) = self.plan.custom_module_path.as_deref() {
            info!("Loading custom module {}", path.display());
            self.loader.load(path, &mut self.registry)?;
            info!(
                "Worker classes available: {}",
                self.registry.names().join(", ")
            );
        }
        Ok(())
    }

    fn transition(&mut self, next: LifecycleState) {
        self.transitions.record(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let load = LifecycleError::DynamicLoad(DynamicLoadError::DuplicateClass("ffn".into()));
        assert_eq!(load.exit_code(), 3);

        let runtime = LifecycleError::RuntimeFailure(NodeError::Task("boom".into()));
        assert_eq!(runtime.exit_code(), 1);
    }

    #[test]
    fn test_panic_message() {
        let panic = std::panic::catch_unwind(|| panic!("node internal fault")).unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "node internal fault");

        let panic = std::panic::catch_unwind(|| panic!("fault {}", 7)).unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "fault 7");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::ShuttingDown.to_string(), "shutting down");
        assert_eq!(LifecycleState::Stopped.to_string(), "stopped");
    }
}
