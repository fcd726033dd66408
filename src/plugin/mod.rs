//! Worker-class plugins.
//!
//! Worker classes live in a [`WorkerRegistry`] keyed by name. Built-in classes
//! are always present; a custom module given with `--custom_module_path` adds
//! more through a [`PluginLoader`] before the node starts.

pub mod manifest;
pub mod registry;

pub use manifest::{parse_manifest, LayerTemplate, ManifestLoader, PluginManifest};
pub use registry::{Layer, WorkerConstructor, WorkerModule, WorkerRegistry};

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failure to load a custom worker-class module. Always fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DynamicLoadError {
    #[error("Failed to read module {}: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },

    #[error("Invalid module {}: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("Worker class '{0}' is already registered")]
    DuplicateClass(String),
}

/// Contributes worker classes found at `path` to the registry
pub trait PluginLoader: Send + Sync {
    fn load(&self, path: &Path, registry: &mut WorkerRegistry) -> Result<(), DynamicLoadError>;
}
