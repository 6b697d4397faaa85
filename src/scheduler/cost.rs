use crate::types::NodeState;

const GIB: f64 = (1u64 << 30) as f64;

/// Relative node cost used as a ranking tie-breaker. Total function: every
/// node gets a positive, finite figure. The GPU-job multiplier is applied
/// at the admission endpoint, not here.
#[derive(Debug, Clone, Default)]
pub struct CostCalculator;

impl CostCalculator {
    pub fn new() -> Self {
        Self
    }

    /// `1 + 0.1 * cpu + 0.01 * memory_gb + 0.5 * gpu_count`
    pub fn calculate_cost(&self, node: &NodeState) -> f64 {
        let capacity = &node.max_capacity;
        let memory_gb = capacity.memory_bytes as f64 / GIB;
        1.0 + 0.1 * capacity.cpu_cores + 0.01 * memory_gb + 0.5 * capacity.gpus.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GpuSpec, GpuVendor, NodeResources, NodeStatus};
    use chrono::Utc;

    fn node(cpus: f64, mem_gib: u64, gpu_count: usize) -> NodeState {
        let gpus = (0..gpu_count)
            .map(|i| GpuSpec {
                vendor: GpuVendor::Nvidia,
                model: format!("gpu-{i}"),
                memory_mib: 16 * 1024,
            })
            .collect();
        NodeState {
            id: "n".into(),
            public_key: vec![],
            architecture: "x86_64".into(),
            status: NodeStatus::Connected,
            last_heartbeat: Utc::now(),
            labels: Default::default(),
            max_capacity: NodeResources {
                cpu_cores: cpus,
                memory_bytes: mem_gib << 30,
                disk_bytes: 0,
                gpus,
            },
            available_capacity: NodeResources::default(),
            capability: Default::default(),
            address: None,
        }
    }

    #[test]
    fn cost_formula() {
        let calc = CostCalculator::new();
        // 1 + 0.1*4 + 0.01*16 + 0.5*0 = 1.56
        assert!((calc.calculate_cost(&node(4.0, 16, 0)) - 1.56).abs() < 1e-9);
        // 1 + 0.1*8 + 0.01*64 + 0.5*2 = 3.44
        assert!((calc.calculate_cost(&node(8.0, 64, 2)) - 3.44).abs() < 1e-9);
    }

    #[test]
    fn cost_is_always_positive() {
        let calc = CostCalculator::new();
        assert!(calc.calculate_cost(&node(0.0, 0, 0)) > 0.0);
    }
}
