use std::collections::HashSet;

use serde::Serialize;

use crate::config::{Device, LaunchPlan, OptimizerSpec};
use crate::plugin::{WorkerModule, WorkerRegistry};

use super::NodeError;

/// Everything the serving engine needs to host one expert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpertBackend {
    pub uid: String,
    pub expert_cls: String,
    pub module: WorkerModule,
    pub num_parameters: usize,
    pub optimizer: OptimizerSpec,
    pub device: Device,
    pub max_batch_size: usize,
    /// Restored from a checkpoint rather than freshly initialized
    pub restored: bool,
}

/// Build one backend per uid using the plan's worker class.
///
/// `restored` lists the uids that come from checkpoints.
pub fn build_backends(
    plan: &LaunchPlan,
    registry: &WorkerRegistry,
    uids: &[String],
    restored: &[String],
) -> Result<Vec<ExpertBackend>, NodeError> {
    if !registry.contains(&plan.expert_cls) {
        return Err(NodeError::UnknownExpertClass {
            name: plan.expert_cls.clone(),
            available: registry.names(),
        });
    }

    let restored: HashSet<&str> = restored.iter().map(String::as_str).collect();
    uids.iter()
        .map(|uid| {
            let module = registry
                .construct(&plan.expert_cls, &plan.worker)
                .ok_or_else(|| NodeError::UnknownExpertClass {
                    name: plan.expert_cls.clone(),
                    available: registry.names(),
                })?;
            Ok(ExpertBackend {
                uid: uid.clone(),
                expert_cls: plan.expert_cls.clone(),
                num_parameters: module.num_parameters(),
                module,
                optimizer: plan.optimizer,
                device: plan.device,
                max_batch_size: plan.worker.max_batch_size,
                restored: restored.contains(uid.as_str()),
            })
        })
        .collect()
}

/// Selector uids followed by checkpointed uids not already present
pub fn merge_uids(selected: Vec<String>, restored: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = selected.iter().cloned().collect();
    let mut uids = selected;
    for uid in restored {
        if seen.insert(uid.clone()) {
            uids.push(uid.clone());
        }
    }
    uids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, RawOptions};

    fn plan(expert_cls: &str) -> LaunchPlan {
        resolve(RawOptions {
            expert_cls: Some(expert_cls.to_string()),
            hidden_dim: Some(8),
            device: Some("cpu".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_build_backends() {
        let registry = WorkerRegistry::with_builtins();
        let uids = vec!["ffn.0".to_string(), "ffn.1".to_string()];
        let restored = vec!["ffn.1".to_string()];

        let backends = build_backends(&plan("ffn"), &registry, &uids, &restored).unwrap();

        assert_eq!(backends.len(), 2);
        assert_eq!(backends[0].uid, "ffn.0");
        assert_eq!(backends[0].num_parameters, 552);
        assert_eq!(backends[0].device, Device::Cpu);
        assert!(!backends[0].restored);
        assert!(backends[1].restored);
    }

    #[test]
    fn test_unknown_class() {
        let registry = WorkerRegistry::with_builtins();
        let result = build_backends(&plan("moe"), &registry, &[], &[]);
        assert!(matches!(
            result,
            Err(NodeError::UnknownExpertClass { name, .. }) if name == "moe"
        ));
    }

    #[test]
    fn test_merge_uids() {
        let merged = merge_uids(
            vec!["a".to_string(), "b".to_string()],
            &["b".to_string(), "c".to_string()],
        );
        assert_eq!(merged, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_uids_repeated_restores() {
        let merged = merge_uids(
            vec!["a".to_string()],
            &["c".to_string(), "a".to_string(), "c".to_string()],
        );
        assert_eq!(merged, vec!["a", "c"]);
    }

    #[test]
    fn test_merge_uids_large_sets() {
        let selected: Vec<String> = (0..200_000).map(|i| format!("expert.{}", i)).collect();
        let restored: Vec<String> = (100_000..300_000)
            .map(|i| format!("expert.{}", i))
            .collect();

        let merged = merge_uids(selected, &restored);

        assert_eq!(merged.len(), 300_000);
        assert_eq!(merged[199_999], "expert.199999");
        assert_eq!(merged[200_000], "expert.200000");
    }

    #[test]
    fn test_build_backends_marks_restored_among_many() {
        let registry = WorkerRegistry::with_builtins();
        let uids: Vec<String> = (0..2_000).map(|i| format!("ffn.{}", i)).collect();
        let restored: Vec<String> = (1_000..3_000).map(|i| format!("ffn.{}", i)).collect();

        let backends = build_backends(&plan("ffn"), &registry, &uids, &restored).unwrap();

        assert_eq!(backends.iter().filter(|b| b.restored).count(), 1_000);
        assert!(!backends[999].restored);
        assert!(backends[1_000].restored);
    }
}
