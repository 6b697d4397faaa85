use super::{ScheduleOptions, RANK_POSSIBLE};
use crate::capability::EngineKind;
use crate::error::Result;
use crate::fleet::{NodeFilter, NodeLookup};
use crate::types::{Constraint, ConstraintOp, Job, NodeState};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Soft constraint key handled by the geo pass instead of the matcher
pub(crate) const PREFERRED_REGION_KEY: &str = "preferred-region";

/// A candidate that satisfies the job's hard requirements
#[derive(Debug, Clone)]
pub struct MatchedNode {
    pub node: NodeState,
    pub rank: i64,
    pub reason: String,
}

/// Produces candidates for the scheduling pipeline. Only nodes satisfying
/// every hard requirement come back; rejections are logged, never returned.
#[async_trait]
pub trait NodeMatcher: Send + Sync {
    async fn match_nodes(&self, job: &Job, options: &ScheduleOptions) -> Result<Vec<MatchedNode>>;
}

/// Default matcher over the registry view: engine availability, resource
/// minima, GPU requirements, and hard label constraints.
pub struct RegistryMatcher {
    registry: Arc<dyn NodeLookup>,
}

impl RegistryMatcher {
    pub fn new(registry: Arc<dyn NodeLookup>) -> Self {
        Self { registry }
    }

    fn reject_reason(job: &Job, options: &ScheduleOptions, node: &NodeState) -> Option<String> {
        let request = &job.task.resources;
        let available = node.effective_available();

        // engine requirement from the task shape; a node with no detection
        // data is given the benefit of the doubt
        let required_engine = if job.task.image.is_some() {
            Some(EngineKind::Docker)
        } else if job.task.wasm_module.is_some() {
            Some(EngineKind::Wasm)
        } else {
            None
        };
        if let Some(engine) = required_engine {
            if !node.capability.engines.is_empty() && !node.capability.has_engine(engine) {
                return Some(format!("missing engine {engine:?}"));
            }
        }

        if request.cpu_cores > 0.0 && available.cpu_cores < request.cpu_cores {
            return Some(format!(
                "insufficient cpu: {} < {}",
                available.cpu_cores, request.cpu_cores
            ));
        }
        if options.min_cpu > 0.0 && available.cpu_cores < options.min_cpu {
            return Some(format!(
                "below cpu floor: {} < {}",
                available.cpu_cores, options.min_cpu
            ));
        }

        if request.memory_bytes > 0 && available.memory_bytes < request.memory_bytes {
            return Some(format!(
                "insufficient memory: {} < {}",
                available.memory_bytes, request.memory_bytes
            ));
        }
        let min_memory_bytes = options.min_memory_gb << 30;
        if min_memory_bytes > 0 && available.memory_bytes < min_memory_bytes {
            return Some(format!(
                "below memory floor: {} < {}",
                available.memory_bytes, min_memory_bytes
            ));
        }

        if request.gpu_count > 0 {
            let matching = match request.gpu_vendor {
                Some(vendor) => available.gpus.iter().filter(|g| g.vendor == vendor).count(),
                None => available.gpus.len(),
            };
            if matching < request.gpu_count as usize {
                return Some(format!(
                    "insufficient gpus: {} < {}",
                    matching, request.gpu_count
                ));
            }
        }

        if !options.require_gpu_vendor.is_empty() {
            let has_required = available
                .gpus
                .iter()
                .any(|g| options.require_gpu_vendor.contains(&g.vendor));
            if !has_required {
                return Some("missing required gpu vendor".to_string());
            }
        }

        if options.exclusive && !node.available_capacity.is_zero() {
            let max = &node.max_capacity;
            let idle = node.available_capacity.cpu_cores >= max.cpu_cores
                && node.available_capacity.memory_bytes >= max.memory_bytes;
            if !idle {
                return Some("node busy, exclusive placement requested".to_string());
            }
        }

        for constraint in &job.constraints {
            if constraint.key == PREFERRED_REGION_KEY {
                continue;
            }
            if !constraint_holds(constraint, node) {
                return Some(format!("constraint failed: {}", constraint.key));
            }
        }

        None
    }
}

fn constraint_holds(constraint: &Constraint, node: &NodeState) -> bool {
    let value = node.labels.get(&constraint.key);
    match constraint.op {
        ConstraintOp::Exists => value.is_some(),
        ConstraintOp::Eq => value
            .map(|v| constraint.values.first().map(|c| c == v).unwrap_or(false))
            .unwrap_or(false),
        ConstraintOp::In => value.map(|v| constraint.values.contains(v)).unwrap_or(false),
        ConstraintOp::NotIn => value.map(|v| !constraint.values.contains(v)).unwrap_or(true),
    }
}

#[async_trait]
impl NodeMatcher for RegistryMatcher {
    async fn match_nodes(&self, job: &Job, options: &ScheduleOptions) -> Result<Vec<MatchedNode>> {
        let nodes = self.registry.list(&NodeFilter::healthy()).await?;
        let mut matched = Vec::with_capacity(nodes.len());

        for node in nodes {
            match Self::reject_reason(job, options, &node) {
                Some(reason) => {
                    debug!(job_id = %job.id, node_id = %node.id, %reason, "node rejected");
                }
                None => {
                    let rank = RANK_POSSIBLE + node.capability.capability_score() as i64;
                    matched.push(MatchedNode {
                        node,
                        rank,
                        reason: "meets resource and capability requirements".to_string(),
                    });
                }
            }
        }

        debug!(job_id = %job.id, candidates = matched.len(), "matcher pass complete");
        Ok(matched)
    }
}
