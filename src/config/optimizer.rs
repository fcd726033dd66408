use std::fmt;

use serde::Serialize;

use super::ConfigError;

/// Learning rate used when `sgd` is selected
pub const SGD_LEARNING_RATE: f64 = 0.01;

/// Adam hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdamParams {
    pub learning_rate: f64,
    pub betas: (f64, f64),
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            betas: (0.9, 0.999),
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

/// Optimizer every expert on the node is trained with
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OptimizerSpec {
    Adam(AdamParams),
    Sgd { learning_rate: f64 },
    None,
}

impl OptimizerSpec {
    /// Resolve the optimizer name: exactly `adam`, `sgd` or `none`.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "adam" => Ok(OptimizerSpec::Adam(AdamParams::default())),
            "sgd" => Ok(OptimizerSpec::Sgd {
                learning_rate: SGD_LEARNING_RATE,
            }),
            "none" => Ok(OptimizerSpec::None),
            other => Err(ConfigError::InvalidOptimizer(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OptimizerSpec::Adam(_) => "adam",
            OptimizerSpec::Sgd { .. } => "sgd",
            OptimizerSpec::None => "none",
        }
    }
}

impl fmt::Display for OptimizerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerSpec::Adam(p) => write!(f, "adam(lr={})", p.learning_rate),
            OptimizerSpec::Sgd { learning_rate } => write!(f, "sgd(lr={})", learning_rate),
            OptimizerSpec::None => f.write_str("none"),
        }
    }
}
