//! Declarative worker-class modules.
//!
//! A custom module is a YAML file listing classes and their layers, with
//! sizes given as multiples of the node's hidden dimension:
//!
//! ```yaml
//! classes:
//!   - name: wide_ffn
//!     layers:
//!       - { kind: linear, in_mult: 1, out_mult: 8 }
//!       - { kind: activation, function: gelu }
//!       - { kind: linear, in_mult: 8, out_mult: 1 }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::config::WorkerParams;

use super::registry::{Layer, WorkerConstructor, WorkerModule, WorkerRegistry};
use super::{DynamicLoadError, PluginLoader};

/// Largest accepted size multiplier
pub const MAX_LAYER_MULT: usize = 64;

/// One layer of a class, sized relative to the hidden dimension
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerTemplate {
    Linear { in_mult: usize, out_mult: usize },
    Activation { function: String },
    LayerNorm {
        #[serde(default = "default_mult")]
        mult: usize,
    },
    Dropout { p: f64 },
    Identity,
}

fn default_mult() -> usize {
    1
}

impl LayerTemplate {
    fn instantiate(&self, hidden_dim: usize) -> Layer {
        match self {
            LayerTemplate::Linear { in_mult, out_mult } => {
                Layer::linear(in_mult * hidden_dim, out_mult * hidden_dim)
            }
            LayerTemplate::Activation { function } => Layer::activation(function),
            LayerTemplate::LayerNorm { mult } => Layer::LayerNorm {
                features: mult * hidden_dim,
            },
            LayerTemplate::Dropout { p } => Layer::Dropout { p: *p },
            LayerTemplate::Identity => Layer::Identity,
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            LayerTemplate::Linear { in_mult, out_mult } if *in_mult == 0 || *out_mult == 0 => {
                Err("linear multipliers must be positive".to_string())
            }
            LayerTemplate::Linear { in_mult, out_mult }
                if *in_mult > MAX_LAYER_MULT || *out_mult > MAX_LAYER_MULT =>
            {
                Err(format!("linear multipliers must be at most {}", MAX_LAYER_MULT))
            }
            LayerTemplate::LayerNorm { mult: 0 } => {
                Err("layer_norm multiplier must be positive".to_string())
            }
            LayerTemplate::LayerNorm { mult } if *mult > MAX_LAYER_MULT => Err(format!(
                "layer_norm multiplier must be at most {}",
                MAX_LAYER_MULT
            )),
            LayerTemplate::Dropout { p } if !(0.0..1.0).contains(p) => {
                Err(format!("dropout probability {} outside [0, 1)", p))
            }
            LayerTemplate::Activation { function } if function.trim().is_empty() => {
                Err("activation function name is empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassManifest {
    pub name: String,
    pub layers: Vec<LayerTemplate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    #[serde(default)]
    pub classes: Vec<ClassManifest>,
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Parse and validate a manifest. Pure function - no I/O.
pub fn parse_manifest(content: &str) -> Result<PluginManifest, String> {
    let manifest: PluginManifest = serde_yaml::from_str(content).map_err(|e| e.to_string())?;

    let mut seen = HashSet::new();
    for class in &manifest.classes {
        if class.name.trim().is_empty() {
            return Err("class name is empty".to_string());
        }
        if !seen.insert(class.name.as_str()) {
            return Err(format!("class '{}' is declared twice", class.name));
        }
        if class.layers.is_empty() {
            return Err(format!("class '{}' has no layers", class.name));
        }
        for layer in &class.layers {
            layer
                .validate()
                .map_err(|reason| format!("class '{}': {}", class.name, reason))?;
        }
    }

    Ok(manifest)
}

fn constructor_for(layers: Vec<LayerTemplate>) -> WorkerConstructor {
    Arc::new(move |params: &WorkerParams| {
        WorkerModule::new(
            layers
                .iter()
                .map(|layer| layer.instantiate(params.hidden_dim))
                .collect(),
        )
    })
}

/// Loads worker classes from YAML manifests
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestLoader;

impl PluginLoader for ManifestLoader {
    fn load(&self, path: &Path, registry: &mut WorkerRegistry) -> Result<(), DynamicLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| DynamicLoadError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let manifest = parse_manifest(&content).map_err(|reason| DynamicLoadError::Invalid {
            path: path.to_path_buf(),
            reason,
        })?;

        // all or nothing: check every name before registering any
        if let Some(clash) = manifest
            .classes
            .iter()
            .find(|class| registry.contains(&class.name))
        {
            return Err(DynamicLoadError::DuplicateClass(clash.name.clone()));
        }

        let count = manifest.classes.len();
        for class in manifest.classes {
            info!("Registering worker class '{}'", class.name);
            registry.register(class.name, constructor_for(class.layers))?;
        }
        info!("Loaded {} worker class(es) from {}", count, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const WIDE_FFN: &str = r#"
classes:
  - name: wide_ffn
    layers:
      - { kind: linear, in_mult: 1, out_mult: 8 }
      - { kind: activation, function: gelu }
      - { kind: dropout, p: 0.1 }
      - { kind: linear, in_mult: 8, out_mult: 1 }
  - name: normed
    layers:
      - { kind: layer_norm }
"#;

    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = parse_manifest(WIDE_FFN).unwrap();
        assert_eq!(manifest.classes.len(), 2);
        assert_eq!(manifest.classes[0].layers.len(), 4);
        assert_eq!(
            manifest.classes[1].layers[0],
            LayerTemplate::LayerNorm { mult: 1 }
        );
    }

    #[test]
    fn test_parse_manifest_rejects_bad_layers() {
        let zero = "classes:\n  - name: x\n    layers:\n      - { kind: linear, in_mult: 0, out_mult: 1 }\n";
        assert!(parse_manifest(zero).is_err());

        let dropout = "classes:\n  - name: x\n    layers:\n      - { kind: dropout, p: 1.5 }\n";
        assert!(parse_manifest(dropout).is_err());

        let empty = "classes:\n  - name: x\n    layers: []\n";
        assert!(parse_manifest(empty).is_err());

        let unknown = "classes:\n  - name: x\n    layers:\n      - { kind: conv2d }\n";
        assert!(parse_manifest(unknown).is_err());
    }

    #[test]
    fn test_parse_manifest_bounds_multipliers() {
        let huge = "classes:\n  - name: x\n    layers:\n      - { kind: linear, in_mult: 1, out_mult: 18446744073709551615 }\n";
        let err = parse_manifest(huge).unwrap_err();
        assert!(err.contains("at most 64"), "{}", err);

        let norm = "classes:\n  - name: x\n    layers:\n      - { kind: layer_norm, mult: 65 }\n";
        assert!(parse_manifest(norm).is_err());

        let widest = "classes:\n  - name: x\n    layers:\n      - { kind: linear, in_mult: 64, out_mult: 64 }\n";
        let manifest = parse_manifest(widest).unwrap();
        let layer = manifest.classes[0].layers[0].instantiate(crate::config::MAX_HIDDEN_DIM);
        assert_eq!(layer.num_parameters(), (1 << 44) + (1 << 22));
    }

    #[test]
    fn test_load_registers_classes() {
        let file = create_temp_file(WIDE_FFN);
        let mut registry = WorkerRegistry::with_builtins();

        ManifestLoader.load(file.path(), &mut registry).unwrap();

        assert!(registry.contains("wide_ffn"));
        let module = registry
            .construct(
                "wide_ffn",
                &WorkerParams {
                    hidden_dim: 4,
                    max_batch_size: 1,
                },
            )
            .unwrap();
        assert_eq!(module.layers[0], Layer::linear(4, 32));
        // 4*32 + 32 + 32*4 + 4
        assert_eq!(module.num_parameters(), 292);
    }

    #[test]
    fn test_load_missing_file() {
        let mut registry = WorkerRegistry::with_builtins();
        let result = ManifestLoader.load(Path::new("/nonexistent/module.yaml"), &mut registry);
        assert!(matches!(result, Err(DynamicLoadError::Read { .. })));
    }

    #[test]
    fn test_load_is_all_or_nothing() {
        let file = create_temp_file(
            "classes:\n  - name: fresh\n    layers: [{ kind: identity }]\n  - name: ffn\n    layers: [{ kind: identity }]\n",
        );
        let mut registry = WorkerRegistry::with_builtins();

        let result = ManifestLoader.load(file.path(), &mut registry);

        assert!(matches!(result, Err(DynamicLoadError::DuplicateClass(name)) if name == "ffn"));
        assert!(!registry.contains("fresh"));
    }
}
