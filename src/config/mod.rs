pub mod compression;
pub mod device;
pub mod optimizer;
pub mod options;
pub mod plan;
pub mod resolver;
pub mod selector;

pub use compression::{CompressionMode, COMPRESSION_TABLE};
pub use device::{probe_default_device, Device};
pub use optimizer::{AdamParams, OptimizerSpec, SGD_LEARNING_RATE};
pub use options::{parse_options, RawOptions};
pub use plan::{CheckpointSettings, DhtSettings, LaunchPlan, ListenAddr, WorkerParams};
pub use resolver::{resolve, MAX_HIDDEN_DIM, MAX_NUM_HANDLERS};
pub use selector::{ExpertPattern, PatternBlock, WorkUnitSelector};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "config.yml";

/// Configuration errors. All of them are reported before any resource is
/// acquired and abort the launch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Use either --expert_uids or --num_experts/--expert_pattern, not both")]
    ConflictingWorkUnits,

    #[error("Unknown compression mode '{0}' (expected NONE, MEANSTD, FLOAT16, ...)")]
    UnknownCompressionMode(String),

    #[error("Invalid optimizer '{0}': must be adam, sgd or none")]
    InvalidOptimizer(String),

    #[error("--{option} must be a positive integer, got {value}")]
    InvalidRange { option: &'static str, value: i64 },

    #[error("--{option} must be at most {limit}, got {value}")]
    AboveLimit {
        option: &'static str,
        value: i64,
        limit: u64,
    },

    #[error("Invalid expert pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Expert pattern '{pattern}' admits only {capacity} uids, {requested} requested")]
    PatternTooSmall {
        pattern: String,
        requested: usize,
        capacity: u64,
    },

    #[error("Invalid expert uid '{0}'")]
    InvalidExpertUid(String),

    #[error("Duplicate expert uid '{0}'")]
    DuplicateExpertUid(String),

    #[error("Invalid expert class '{0}'")]
    InvalidExpertClass(String),

    #[error("Invalid listen address '{0}': expected host:port or host:*")]
    InvalidListenAddr(String),

    #[error("Invalid initial peer '{0}': expected host:port")]
    InvalidPeer(String),

    #[error("Invalid device '{0}': expected cpu, cuda or cuda:<index>")]
    InvalidDevice(String),

    #[error("--load_experts requires --checkpoint_dir")]
    MissingCheckpointDir,

    #[error("Custom module {} is not readable: {reason}", .path.display())]
    CustomModuleUnreadable { path: PathBuf, reason: String },

    #[error("Config file not found: {}", .0.display())]
    ConfigFileNotFound(PathBuf),

    #[error("Failed to read config file {}: {reason}", .path.display())]
    ReadError { path: PathBuf, reason: String },

    #[error("Config parse error: {0}")]
    ParseError(String),
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Decide which config file to read, if any.
///
/// An explicitly named file must exist; otherwise `config.yml` in the working
/// directory is used when present.
pub fn locate_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    match explicit {
        Some(path) if path.is_file() => Ok(Some(path.to_path_buf())),
        Some(path) => Err(ConfigError::ConfigFileNotFound(path.to_path_buf())),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            Ok(default.is_file().then_some(default))
        }
    }
}

/// Load raw options from a YAML config file.
/// This is the I/O boundary - it reads the file and delegates to pure parsing functions.
pub fn load_options_file(path: &Path) -> Result<RawOptions, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_options(&content)
}

/// Values from the config file (if any) overlaid with command-line values
pub fn collect_options(explicit: Option<&Path>, cli: RawOptions) -> Result<RawOptions, ConfigError> {
    let file = match locate_config_file(explicit)? {
        Some(path) => {
            debug!("Reading options from {}", path.display());
            load_options_file(&path)?
        }
        None => RawOptions::default(),
    };
    Ok(file.merge(cli))
}
