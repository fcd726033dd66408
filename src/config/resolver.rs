//! Turn [`RawOptions`] into a [`LaunchPlan`].
//!
//! Resolution fails fast on the first violated constraint. The only side
//! effects are the device probe (when no device is given) and the existence
//! check of the custom module path; the module itself is not loaded here.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::compression::CompressionMode;
use super::device::{probe_default_device, Device};
use super::options::RawOptions;
use super::optimizer::OptimizerSpec;
use super::plan::{CheckpointSettings, DhtSettings, LaunchPlan, ListenAddr, WorkerParams};
use super::selector::WorkUnitSelector;
use super::ConfigError;

pub const DEFAULT_LISTEN_ON: &str = "0.0.0.0:*";
pub const DEFAULT_EXPERT_CLS: &str = "ffn";
pub const DEFAULT_HIDDEN_DIM: usize = 1024;
/// Largest accepted `hidden_dim`; keeps parameter counts of every worker
/// class within `usize`
pub const MAX_HIDDEN_DIM: usize = 1 << 16;
/// Largest accepted `num_handlers`
pub const MAX_NUM_HANDLERS: usize = 1 << 16;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 16384;
pub const DEFAULT_OPTIMIZER: &str = "adam";
pub const DEFAULT_COMPRESSION: &str = "NONE";

/// Resolve raw options into a launch plan.
pub fn resolve(options: RawOptions) -> Result<LaunchPlan, ConfigError> {
    let listen_on = ListenAddr::parse(options.listen_on.as_deref().unwrap_or(DEFAULT_LISTEN_ON))?;

    let selector = WorkUnitSelector::resolve(
        options.expert_uids,
        options.expert_pattern.as_deref(),
        options.num_experts,
    )?;

    let compression = CompressionMode::from_name(
        options.compression.as_deref().unwrap_or(DEFAULT_COMPRESSION),
    )?;
    let optimizer =
        OptimizerSpec::from_name(options.optimizer.as_deref().unwrap_or(DEFAULT_OPTIMIZER))?;

    let hidden_dim = at_most("hidden_dim", options.hidden_dim, MAX_HIDDEN_DIM)?
        .unwrap_or(DEFAULT_HIDDEN_DIM);
    let max_batch_size =
        positive("max_batch_size", options.max_batch_size)?.unwrap_or(DEFAULT_MAX_BATCH_SIZE);
    let num_handlers = match at_most("num_handlers", options.num_handlers, MAX_NUM_HANDLERS)? {
        Some(n) => n,
        None => default_num_handlers(),
    };

    let expert_cls = options
        .expert_cls
        .unwrap_or_else(|| DEFAULT_EXPERT_CLS.to_string());
    if expert_cls.trim().is_empty() {
        return Err(ConfigError::InvalidExpertClass(expert_cls));
    }

    let device = match options.device.as_deref() {
        Some(device) => device.parse::<Device>()?,
        None => probe_default_device(),
    };

    let dht = resolve_dht(options.no_dht, options.initial_peers, options.dht_port)?;

    if options.load_experts && options.checkpoint_dir.is_none() {
        return Err(ConfigError::MissingCheckpointDir);
    }
    let checkpoint = CheckpointSettings {
        dir: options.checkpoint_dir.map(|dir| expand_path(&dir)),
        load_on_start: options.load_experts,
    };

    let custom_module_path = options
        .custom_module_path
        .map(|path| check_readable_file(&expand_path(&path)))
        .transpose()?;

    let plan = LaunchPlan {
        listen_on,
        selector,
        expert_cls,
        worker: WorkerParams {
            hidden_dim,
            max_batch_size,
        },
        num_handlers,
        device,
        optimizer,
        compression,
        dht,
        checkpoint,
        increase_file_limit: options.increase_file_limit,
        custom_module_path,
    };
    debug!(?plan, "Launch plan resolved");
    Ok(plan)
}

/// Validate an optional count: present values must be strictly positive
fn positive(option: &'static str, value: Option<i64>) -> Result<Option<usize>, ConfigError> {
    match value {
        None => Ok(None),
        Some(v) if v > 0 => usize::try_from(v)
            .map(Some)
            .map_err(|_| ConfigError::InvalidRange { option, value: v }),
        Some(v) => Err(ConfigError::InvalidRange { option, value: v }),
    }
}

/// Like [`positive`], with an upper bound
fn at_most(
    option: &'static str,
    value: Option<i64>,
    limit: usize,
) -> Result<Option<usize>, ConfigError> {
    match positive(option, value)? {
        Some(v) if v > limit => Err(ConfigError::AboveLimit {
            option,
            value: v as i64,
            limit: limit as u64,
        }),
        other => Ok(other),
    }
}

fn default_num_handlers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn resolve_dht(
    no_dht: bool,
    initial_peers: Option<Vec<String>>,
    dht_port: Option<i64>,
) -> Result<DhtSettings, ConfigError> {
    let initial_peers = initial_peers.unwrap_or_default();
    for peer in &initial_peers {
        validate_peer(peer)?;
    }

    let port = dht_port
        .map(|p| match u16::try_from(p) {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(ConfigError::InvalidRange {
                option: "dht_port",
                value: p,
            }),
        })
        .transpose()?;

    if no_dht && (!initial_peers.is_empty() || port.is_some()) {
        warn!("--initial_peers and --dht_port are ignored because --no_dht is set");
    }

    Ok(DhtSettings {
        enabled: !no_dht,
        initial_peers,
        port,
    })
}

fn validate_peer(peer: &str) -> Result<(), ConfigError> {
    match peer.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => match port.parse::<u16>() {
            Ok(p) if p > 0 => Ok(()),
            _ => Err(ConfigError::InvalidPeer(peer.to_string())),
        },
        _ => Err(ConfigError::InvalidPeer(peer.to_string())),
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}

/// Confirm that `path` names a file we can open for reading
fn check_readable_file(path: &Path) -> Result<PathBuf, ConfigError> {
    let unreadable = |reason: String| ConfigError::CustomModuleUnreadable {
        path: path.to_path_buf(),
        reason,
    };

    if !path.is_file() {
        return Err(unreadable("no such file".to_string()));
    }
    File::open(path).map_err(|e| unreadable(e.to_string()))?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn options() -> RawOptions {
        RawOptions {
            device: Some("cpu".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let plan = resolve(options()).unwrap();
        assert_eq!(plan.listen_on.to_string(), "0.0.0.0:*");
        assert_eq!(plan.selector, WorkUnitSelector::Empty);
        assert_eq!(plan.expert_cls, "ffn");
        assert_eq!(plan.worker.hidden_dim, 1024);
        assert_eq!(plan.worker.max_batch_size, 16384);
        assert!(plan.num_handlers >= 1);
        assert_eq!(plan.compression, CompressionMode::NONE);
        assert!(matches!(plan.optimizer, OptimizerSpec::Adam(_)));
        assert!(plan.dht.enabled);
        assert!(plan.dht.initial_peers.is_empty());
        assert!(!plan.needs_environment_adjustments());
    }

    #[test]
    fn test_conflicting_work_units() {
        let opts = RawOptions {
            expert_uids: Some(vec!["ffn.0".to_string()]),
            num_experts: Some(4),
            ..options()
        };
        assert_eq!(resolve(opts), Err(ConfigError::ConflictingWorkUnits));

        let opts = RawOptions {
            expert_uids: Some(vec!["ffn.0".to_string()]),
            expert_pattern: Some("ffn.[0:8]".to_string()),
            ..options()
        };
        assert_eq!(resolve(opts), Err(ConfigError::ConflictingWorkUnits));
    }

    #[test]
    fn test_compression_resolution() {
        let resolve_compression = |name: &str| {
            resolve(RawOptions {
                compression: Some(name.to_string()),
                ..options()
            })
            .map(|plan| plan.compression)
        };

        assert_eq!(
            resolve_compression("MEANSTD"),
            Ok(CompressionMode::MEANSTD_LAST_AXIS_FLOAT16)
        );
        assert_eq!(resolve_compression("NONE"), Ok(CompressionMode::NONE));
        assert_eq!(
            resolve_compression("bogus"),
            Err(ConfigError::UnknownCompressionMode("bogus".to_string()))
        );
    }

    #[test]
    fn test_optimizer_resolution() {
        let resolve_optimizer = |name: &str| {
            resolve(RawOptions {
                optimizer: Some(name.to_string()),
                ..options()
            })
            .map(|plan| plan.optimizer)
        };

        assert!(matches!(resolve_optimizer("adam"), Ok(OptimizerSpec::Adam(_))));
        assert_eq!(
            resolve_optimizer("sgd"),
            Ok(OptimizerSpec::Sgd {
                learning_rate: 0.01
            })
        );
        assert_eq!(resolve_optimizer("none"), Ok(OptimizerSpec::None));
        assert_eq!(
            resolve_optimizer("adagrad"),
            Err(ConfigError::InvalidOptimizer("adagrad".to_string()))
        );
    }

    #[test]
    fn test_numeric_ranges() {
        let result = resolve(RawOptions {
            hidden_dim: Some(0),
            ..options()
        });
        assert_eq!(
            result,
            Err(ConfigError::InvalidRange {
                option: "hidden_dim",
                value: 0
            })
        );

        let result = resolve(RawOptions {
            max_batch_size: Some(-1),
            ..options()
        });
        assert_eq!(
            result,
            Err(ConfigError::InvalidRange {
                option: "max_batch_size",
                value: -1
            })
        );

        let result = resolve(RawOptions {
            num_handlers: Some(0),
            ..options()
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidRange {
                option: "num_handlers",
                ..
            })
        ));
    }

    #[test]
    fn test_hidden_dim_ceiling() {
        let result = resolve(RawOptions {
            hidden_dim: Some(i64::MAX),
            ..options()
        });
        assert_eq!(
            result,
            Err(ConfigError::AboveLimit {
                option: "hidden_dim",
                value: i64::MAX,
                limit: MAX_HIDDEN_DIM as u64,
            })
        );

        let result = resolve(RawOptions {
            hidden_dim: Some(MAX_HIDDEN_DIM as i64 + 1),
            ..options()
        });
        assert!(matches!(
            result,
            Err(ConfigError::AboveLimit {
                option: "hidden_dim",
                ..
            })
        ));

        let plan = resolve(RawOptions {
            hidden_dim: Some(MAX_HIDDEN_DIM as i64),
            ..options()
        })
        .unwrap();
        assert_eq!(plan.worker.hidden_dim, MAX_HIDDEN_DIM);
    }

    #[test]
    fn test_largest_hidden_dim_builds_every_builtin() {
        let plan = resolve(RawOptions {
            hidden_dim: Some(MAX_HIDDEN_DIM as i64),
            ..options()
        })
        .unwrap();
        let registry = crate::plugin::WorkerRegistry::with_builtins();
        for name in registry.names() {
            let module = registry.construct(&name, &plan.worker).unwrap();
            assert!(module.num_parameters() > 0);
        }
    }

    #[test]
    fn test_num_handlers_ceiling() {
        let result = resolve(RawOptions {
            num_handlers: Some(i64::MAX),
            ..options()
        });
        assert!(matches!(
            result,
            Err(ConfigError::AboveLimit {
                option: "num_handlers",
                ..
            })
        ));
    }

    #[test]
    fn test_explicit_values_kept() {
        let plan = resolve(RawOptions {
            hidden_dim: Some(64),
            max_batch_size: Some(128),
            num_handlers: Some(4),
            expert_cls: Some("transformer".to_string()),
            device: Some("cuda:1".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(plan.worker.hidden_dim, 64);
        assert_eq!(plan.worker.max_batch_size, 128);
        assert_eq!(plan.num_handlers, 4);
        assert_eq!(plan.expert_cls, "transformer");
        assert_eq!(plan.device, Device::Cuda(Some(1)));
    }

    #[test]
    fn test_dht_settings() {
        let plan = resolve(RawOptions {
            initial_peers: Some(vec!["1.2.3.4:1337".to_string()]),
            dht_port: Some(4321),
            ..options()
        })
        .unwrap();
        assert!(plan.dht.enabled);
        assert_eq!(plan.dht.initial_peers, vec!["1.2.3.4:1337"]);
        assert_eq!(plan.dht.port, Some(4321));

        let plan = resolve(RawOptions {
            no_dht: true,
            initial_peers: Some(vec!["1.2.3.4:1337".to_string()]),
            ..options()
        })
        .unwrap();
        assert!(!plan.dht.enabled);
    }

    #[test]
    fn test_invalid_dht_values() {
        assert_eq!(
            resolve(RawOptions {
                initial_peers: Some(vec!["1.2.3.4".to_string()]),
                ..options()
            }),
            Err(ConfigError::InvalidPeer("1.2.3.4".to_string()))
        );
        assert!(matches!(
            resolve(RawOptions {
                dht_port: Some(70000),
                ..options()
            }),
            Err(ConfigError::InvalidRange {
                option: "dht_port",
                ..
            })
        ));
    }

    #[test]
    fn test_load_experts_requires_checkpoint_dir() {
        assert_eq!(
            resolve(RawOptions {
                load_experts: true,
                ..options()
            }),
            Err(ConfigError::MissingCheckpointDir)
        );

        let plan = resolve(RawOptions {
            load_experts: true,
            checkpoint_dir: Some(PathBuf::from("/tmp/experts")),
            ..options()
        })
        .unwrap();
        assert!(plan.checkpoint.load_on_start);
        assert_eq!(plan.checkpoint.dir, Some(PathBuf::from("/tmp/experts")));
    }

    #[test]
    fn test_custom_module_must_exist() {
        let result = resolve(RawOptions {
            custom_module_path: Some(PathBuf::from("/nonexistent/layers.yaml")),
            ..options()
        });
        assert!(matches!(
            result,
            Err(ConfigError::CustomModuleUnreadable { .. })
        ));
    }

    #[test]
    fn test_custom_module_existing_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"classes: []\n").unwrap();

        let plan = resolve(RawOptions {
            custom_module_path: Some(file.path().to_path_buf()),
            ..options()
        })
        .unwrap();
        assert_eq!(plan.custom_module_path.as_deref(), Some(file.path()));
        assert!(plan.needs_environment_adjustments());
    }

    #[test]
    fn test_directory_is_not_a_module() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolve(RawOptions {
            custom_module_path: Some(dir.path().to_path_buf()),
            ..options()
        });
        assert!(matches!(
            result,
            Err(ConfigError::CustomModuleUnreadable { .. })
        ));
    }
}
