use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::{LaunchPlan, RawOptions, WorkUnitSelector};

/// Command-line options. Long flags keep their snake_case spelling so
/// existing launch scripts keep working.
#[derive(Parser, Debug)]
#[command(name = "expert-server")]
#[command(about = "Serve mixture-of-experts workers on a peer-to-peer network")]
#[command(version)]
pub struct Args {
    /// YAML file with default values for any of the options below
    #[arg(short, long, value_name = "FILE", env = "EXPERT_SERVER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Resolve and print the launch plan without starting the node
    #[arg(long = "dry_run")]
    pub dry_run: bool,

    /// 'host:port' to listen on; '*' as port picks a free one
    #[arg(long = "listen_on", value_name = "ADDR")]
    pub listen_on: Option<String>,

    /// Number of experts to serve
    #[arg(long = "num_experts", allow_negative_numbers = true)]
    pub num_experts: Option<i64>,

    /// Expert uid pattern, e.g. 'ffn.[0:256].[0:256]'
    #[arg(long = "expert_pattern", value_name = "PATTERN")]
    pub expert_pattern: Option<String>,

    /// Exact expert uids to serve
    #[arg(long = "expert_uids", num_args = 1.., value_name = "UID")]
    pub expert_uids: Option<Vec<String>>,

    /// Worker class of every expert
    #[arg(long = "expert_cls", value_name = "CLASS")]
    pub expert_cls: Option<String>,

    /// Hidden dimension of the experts
    #[arg(long = "hidden_dim", allow_negative_numbers = true)]
    pub hidden_dim: Option<i64>,

    /// Number of concurrent request handlers
    #[arg(long = "num_handlers", allow_negative_numbers = true)]
    pub num_handlers: Option<i64>,

    /// Largest batch an expert accepts
    #[arg(long = "max_batch_size", allow_negative_numbers = true)]
    pub max_batch_size: Option<i64>,

    /// 'cpu', 'cuda' or 'cuda:N'; defaults to an accelerator when present
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// 'adam', 'sgd' or 'none'
    #[arg(long, value_name = "NAME")]
    pub optimizer: Option<String>,

    /// Do not connect to the DHT
    #[arg(long = "no_dht")]
    pub no_dht: bool,

    /// DHT peers to bootstrap from
    #[arg(long = "initial_peers", num_args = 1.., value_name = "PEER")]
    pub initial_peers: Option<Vec<String>>,

    /// Port for DHT traffic
    #[arg(long = "dht_port", allow_negative_numbers = true)]
    pub dht_port: Option<i64>,

    /// Raise the open file limit before starting
    #[arg(long = "increase_file_limit")]
    pub increase_file_limit: bool,

    /// Tensor compression on the wire (e.g. NONE, FLOAT16, MEANSTD)
    #[arg(long, value_name = "MODE")]
    pub compression: Option<String>,

    /// Directory for expert checkpoints
    #[arg(long = "checkpoint_dir", value_name = "DIR")]
    pub checkpoint_dir: Option<PathBuf>,

    /// Restore experts found in the checkpoint directory
    #[arg(long = "load_experts")]
    pub load_experts: bool,

    /// YAML module with additional worker classes
    #[arg(long = "custom_module_path", value_name = "FILE")]
    pub custom_module_path: Option<PathBuf>,
}

impl Args {
    /// Options given on the command line; unset flags stay `None`/`false`
    pub fn to_raw_options(&self) -> RawOptions {
        RawOptions {
            listen_on: self.listen_on.clone(),
            num_experts: self.num_experts,
            expert_pattern: self.expert_pattern.clone(),
            expert_uids: self.expert_uids.clone(),
            expert_cls: self.expert_cls.clone(),
            hidden_dim: self.hidden_dim,
            num_handlers: self.num_handlers,
            max_batch_size: self.max_batch_size,
            device: self.device.clone(),
            optimizer: self.optimizer.clone(),
            no_dht: self.no_dht,
            initial_peers: self.initial_peers.clone(),
            dht_port: self.dht_port,
            increase_file_limit: self.increase_file_limit,
            compression: self.compression.clone(),
            checkpoint_dir: self.checkpoint_dir.clone(),
            load_experts: self.load_experts,
            custom_module_path: self.custom_module_path.clone(),
        }
    }
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

/// Format a dry-run summary of the resolved plan.
/// Pure function - returns a formatted string.
pub fn format_dry_run(plan: &LaunchPlan) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "expert-server v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!("Listen on: {}\n", plan.listen_on));

    output.push_str("\nExperts:\n");
    match &plan.selector {
        WorkUnitSelector::ExplicitList { ids } => {
            output.push_str(&format!("  Explicit list ({}):\n", ids.len()));
            for id in ids {
                output.push_str(&format!("    - {}\n", id));
            }
        }
        WorkUnitSelector::PatternGenerated { pattern, count } => {
            output.push_str(&format!("  Pattern: {}\n", pattern));
            match count {
                Some(n) => output.push_str(&format!("  Sampled: {}\n", n)),
                None => output.push_str(&format!(
                    "  All matching uids: {}\n",
                    plan.selector.expected_count()
                )),
            }
        }
        WorkUnitSelector::CountOnly { count } => {
            output.push_str(&format!("  Count: {}\n", count));
        }
        WorkUnitSelector::Empty => output.push_str("  None (relay node)\n"),
    }
    output.push_str(&format!("  Class: {}\n", plan.expert_cls));
    output.push_str(&format!("  Hidden dim: {}\n", plan.worker.hidden_dim));
    output.push_str(&format!("  Max batch size: {}\n", plan.worker.max_batch_size));

    output.push_str("\nRuntime:\n");
    output.push_str(&format!("  Device: {}\n", plan.device));
    output.push_str(&format!("  Handlers: {}\n", plan.num_handlers));
    output.push_str(&format!("  Optimizer: {}\n", plan.optimizer));
    output.push_str(&format!(
        "  Compression: {} ({})\n",
        plan.compression,
        plan.compression.code()
    ));

    output.push_str("\nDHT:\n");
    if plan.dht.enabled {
        if plan.dht.initial_peers.is_empty() {
            output.push_str("  Initial peers: none (new network)\n");
        } else {
            output.push_str("  Initial peers:\n");
            for peer in &plan.dht.initial_peers {
                output.push_str(&format!("    - {}\n", peer));
            }
        }
        if let Some(port) = plan.dht.port {
            output.push_str(&format!("  Port: {}\n", port));
        }
    } else {
        output.push_str("  Disabled\n");
    }

    if let Some(ref dir) = plan.checkpoint.dir {
        output.push_str(&format!(
            "\nCheckpoints: {}{}\n",
            dir.display(),
            if plan.checkpoint.load_on_start {
                " (restore on start)"
            } else {
                ""
            }
        ));
    }
    if plan.increase_file_limit {
        output.push_str("\nOpen file limit will be raised\n");
    }
    if let Some(ref path) = plan.custom_module_path {
        output.push_str(&format!("Custom module: {}\n", path.display()));
    }

    output.push_str("\nValidation: PASSED\n");
    output.push_str("Ready to start. Remove --dry_run to execute.\n");

    output
}

/// Log filter for a `-v` count. Shutdown acknowledgements are logged at
/// `warn`, so they show at every level.
/// Pure function - no I/O.
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolve;

    #[test]
    fn test_log_filter() {
        assert_eq!(log_filter(0), "warn");
        assert_eq!(log_filter(1), "info");
        assert_eq!(log_filter(2), "debug");
        assert_eq!(log_filter(9), "trace");
    }

    #[test]
    fn test_clap_parsing() {
        let args = Args::try_parse_from([
            "expert-server",
            "--num_experts",
            "4",
            "--expert_cls",
            "transformer",
            "--no_dht",
            "-vv",
        ])
        .unwrap();

        assert_eq!(args.num_experts, Some(4));
        assert_eq!(args.expert_cls.as_deref(), Some("transformer"));
        assert!(args.no_dht);
        assert!(!args.load_experts);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_clap_multiple_values() {
        let args = Args::try_parse_from([
            "expert-server",
            "--expert_uids",
            "ffn.0",
            "ffn.1",
            "--initial_peers",
            "10.0.0.1:1337",
        ])
        .unwrap();

        assert_eq!(
            args.expert_uids,
            Some(vec!["ffn.0".to_string(), "ffn.1".to_string()])
        );
        assert_eq!(args.initial_peers, Some(vec!["10.0.0.1:1337".to_string()]));
    }

    #[test]
    fn test_negative_numbers_reach_validation() {
        let args =
            Args::try_parse_from(["expert-server", "--max_batch_size", "-1"]).unwrap();
        assert_eq!(args.max_batch_size, Some(-1));

        let result = resolve(args.to_raw_options());
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Args::try_parse_from(["expert-server", "--num-experts", "4"]).is_err());
    }

    #[test]
    fn test_format_dry_run_basic() {
        let args = Args::try_parse_from([
            "expert-server",
            "--expert_pattern",
            "ffn.[0:4]",
            "--device",
            "cpu",
            "--compression",
            "MEANSTD",
            "--initial_peers",
            "10.0.0.1:1337",
        ])
        .unwrap();
        let plan = resolve(args.to_raw_options()).unwrap();

        let output = format_dry_run(&plan);

        assert!(output.contains("Pattern: ffn.[0:4]"));
        assert!(output.contains("All matching uids: 4"));
        assert!(output.contains("Device: cpu"));
        assert!(output.contains("MEANSTD_LAST_AXIS_FLOAT16 (1)"));
        assert!(output.contains("10.0.0.1:1337"));
        assert!(output.contains("Validation: PASSED"));
    }

    #[test]
    fn test_format_dry_run_relay_node() {
        let plan = resolve(RawOptions {
            device: Some("cpu".to_string()),
            no_dht: true,
            ..Default::default()
        })
        .unwrap();

        let output = format_dry_run(&plan);

        assert!(output.contains("None (relay node)"));
        assert!(output.contains("Disabled"));
    }
}
