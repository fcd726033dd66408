use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::WorkerParams;

use super::DynamicLoadError;

/// A concrete layer of an expert, with dimensions already resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layer {
    Linear {
        in_features: usize,
        out_features: usize,
    },
    Activation {
        function: String,
    },
    LayerNorm {
        features: usize,
    },
    Dropout {
        p: f64,
    },
    Identity,
}

impl Layer {
    pub fn linear(in_features: usize, out_features: usize) -> Self {
        Layer::Linear {
            in_features,
            out_features,
        }
    }

    pub fn activation(function: &str) -> Self {
        Layer::Activation {
            function: function.to_string(),
        }
    }

    /// Trainable parameters (weights and biases)
    pub fn num_parameters(&self) -> usize {
        match self {
            Layer::Linear {
                in_features,
                out_features,
            } => in_features * out_features + out_features,
            Layer::LayerNorm { features } => 2 * features,
            Layer::Activation { .. } | Layer::Dropout { .. } | Layer::Identity => 0,
        }
    }
}

/// The module a worker class builds for one expert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerModule {
    pub layers: Vec<Layer>,
}

impl WorkerModule {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(Layer::num_parameters).sum()
    }
}

/// Builds a worker module from the node-wide hyperparameters
pub type WorkerConstructor = Arc<dyn Fn(&WorkerParams) -> WorkerModule + Send + Sync>;

/// Worker classes known to this process, keyed by name
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    classes: HashMap<String, WorkerConstructor>,
}

impl WorkerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `ffn`, `transformer`, `det_dropout` and `nop`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (name, ctor) in builtin_classes() {
            registry.classes.insert(name.to_string(), ctor);
        }
        registry
    }

    /// Add a class. Names are unique; re-registering is an error.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        constructor: WorkerConstructor,
    ) -> Result<(), DynamicLoadError> {
        let name = name.into();
        if self.classes.contains_key(&name) {
            return Err(DynamicLoadError::DuplicateClass(name));
        }
        self.classes.insert(name, constructor);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Instantiate the module of class `name`
    pub fn construct(&self, name: &str, params: &WorkerParams) -> Option<WorkerModule> {
        self.classes.get(name).map(|ctor| ctor(params))
    }

    /// Registered class names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.classes.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("classes", &self.names())
            .finish()
    }
}

fn builtin_classes() -> Vec<(&'static str, WorkerConstructor)> {
    vec![
        ("ffn", Arc::new(ffn) as WorkerConstructor),
        ("transformer", Arc::new(transformer) as WorkerConstructor),
        ("det_dropout", Arc::new(det_dropout) as WorkerConstructor),
        ("nop", Arc::new(nop) as WorkerConstructor),
    ]
}

fn ffn(p: &WorkerParams) -> WorkerModule {
    let h = p.hidden_dim;
    WorkerModule::new(vec![
        Layer::linear(h, 4 * h),
        Layer::activation("gelu"),
        Layer::linear(4 * h, h),
    ])
}

fn transformer(p: &WorkerParams) -> WorkerModule {
    let h = p.hidden_dim;
    WorkerModule::new(vec![
        Layer::LayerNorm { features: h },
        // fused query/key/value projection
        Layer::linear(h, 3 * h),
        Layer::linear(h, h),
        Layer::LayerNorm { features: h },
        Layer::linear(h, 4 * h),
        Layer::activation("gelu"),
        Layer::linear(4 * h, h),
    ])
}

fn det_dropout(p: &WorkerParams) -> WorkerModule {
    let h = p.hidden_dim;
    WorkerModule::new(vec![
        Layer::linear(h, 2 * h),
        Layer::activation("relu"),
        Layer::Dropout { p: 0.2 },
        Layer::linear(2 * h, h),
    ])
}

fn nop(_: &WorkerParams) -> WorkerModule {
    WorkerModule::new(vec![Layer::Identity])
}
