use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Unvalidated launch options, as read from the command line or a config file.
///
/// Every field is optional so that file values and flags can be layered.
/// Integers are signed so that negative input reaches range validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawOptions {
    pub listen_on: Option<String>,
    pub num_experts: Option<i64>,
    pub expert_pattern: Option<String>,
    pub expert_uids: Option<Vec<String>>,
    pub expert_cls: Option<String>,
    pub hidden_dim: Option<i64>,
    pub num_handlers: Option<i64>,
    pub max_batch_size: Option<i64>,
    pub device: Option<String>,
    pub optimizer: Option<String>,
    #[serde(default)]
    pub no_dht: bool,
    pub initial_peers: Option<Vec<String>>,
    pub dht_port: Option<i64>,
    #[serde(default)]
    pub increase_file_limit: bool,
    pub compression: Option<String>,
    pub checkpoint_dir: Option<PathBuf>,
    #[serde(default)]
    pub load_experts: bool,
    pub custom_module_path: Option<PathBuf>,
}

impl RawOptions {
    /// Layer `overrides` on top of `self`.
    ///
    /// Values present in `overrides` win; flags are set if either side sets them.
    pub fn merge(self, overrides: RawOptions) -> RawOptions {
        RawOptions {
            listen_on: overrides.listen_on.or(self.listen_on),
            num_experts: overrides.num_experts.or(self.num_experts),
            expert_pattern: overrides.expert_pattern.or(self.expert_pattern),
            expert_uids: overrides.expert_uids.or(self.expert_uids),
            expert_cls: overrides.expert_cls.or(self.expert_cls),
            hidden_dim: overrides.hidden_dim.or(self.hidden_dim),
            num_handlers: overrides.num_handlers.or(self.num_handlers),
            max_batch_size: overrides.max_batch_size.or(self.max_batch_size),
            device: overrides.device.or(self.device),
            optimizer: overrides.optimizer.or(self.optimizer),
            no_dht: overrides.no_dht || self.no_dht,
            initial_peers: overrides.initial_peers.or(self.initial_peers),
            dht_port: overrides.dht_port.or(self.dht_port),
            increase_file_limit: overrides.increase_file_limit || self.increase_file_limit,
            compression: overrides.compression.or(self.compression),
            checkpoint_dir: overrides.checkpoint_dir.or(self.checkpoint_dir),
            load_experts: overrides.load_experts || self.load_experts,
            custom_module_path: overrides.custom_module_path.or(self.custom_module_path),
        }
    }
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Parse YAML config file contents into raw options.
/// This is a pure function - no I/O.
pub fn parse_options(content: &str) -> Result<RawOptions, ConfigError> {
    if content.trim().is_empty() {
        return Ok(RawOptions::default());
    }
    serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_options() {
        let yaml = r#"
listen_on: "127.0.0.1:8000"
num_experts: 16
expert_pattern: "ffn.[0:32]"
hidden_dim: 512
no_dht: true
initial_peers: ["10.0.0.1:1337", "10.0.0.2:1337"]
compression: MEANSTD
checkpoint_dir: /tmp/ckpt
"#;
        let options = parse_options(yaml).unwrap();
        assert_eq!(options.listen_on.as_deref(), Some("127.0.0.1:8000"));
        assert_eq!(options.num_experts, Some(16));
        assert_eq!(options.hidden_dim, Some(512));
        assert!(options.no_dht);
        assert!(!options.load_experts);
        assert_eq!(options.initial_peers.unwrap().len(), 2);
        assert_eq!(options.checkpoint_dir, Some(PathBuf::from("/tmp/ckpt")));
    }

    #[test]
    fn test_parse_empty_file() {
        assert_eq!(parse_options("  \n").unwrap(), RawOptions::default());
    }

    #[test]
    fn test_parse_unknown_key() {
        let result = parse_options("num_expert: 4\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_merge_overrides_win() {
        let file = RawOptions {
            hidden_dim: Some(256),
            optimizer: Some("sgd".to_string()),
            no_dht: true,
            ..Default::default()
        };
        let flags = RawOptions {
            hidden_dim: Some(1024),
            load_experts: true,
            ..Default::default()
        };

        let merged = file.merge(flags);
        assert_eq!(merged.hidden_dim, Some(1024));
        assert_eq!(merged.optimizer.as_deref(), Some("sgd"));
        assert!(merged.no_dht);
        assert!(merged.load_experts);
    }
}
