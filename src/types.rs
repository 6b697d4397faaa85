use crate::capability::NodeCapability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// GPU vendor tag used for capability matching and fleet roll-ups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Other,
}

impl GpuVendor {
    /// Parse a vendor tag the way job requests spell it ("nvidia", "amd", ...)
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "nvidia" => GpuVendor::Nvidia,
            "amd" => GpuVendor::Amd,
            "intel" => GpuVendor::Intel,
            _ => GpuVendor::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GpuVendor::Nvidia => "nvidia",
            GpuVendor::Amd => "amd",
            GpuVendor::Intel => "intel",
            GpuVendor::Other => "other",
        }
    }
}

/// A single GPU advertised by a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSpec {
    pub vendor: GpuVendor,
    pub model: String,
    pub memory_mib: u64,
}

/// Per-node resource vector. `available_capacity <= max_capacity` holds
/// componentwise; readers fall back to max when available is all-zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeResources {
    pub cpu_cores: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    #[serde(default)]
    pub gpus: Vec<GpuSpec>,
}

impl NodeResources {
    /// True when every component is zero (no advertised availability)
    pub fn is_zero(&self) -> bool {
        self.cpu_cores <= 0.0
            && self.memory_bytes == 0
            && self.disk_bytes == 0
            && self.gpus.is_empty()
    }
}

/// Connection status as reported by the external node registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Connected,
    Disconnected,
}

/// A node as seen through the registry view. Liveness is supplied by the
/// external registry; atlas never writes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub id: String,
    #[serde(default)]
    pub public_key: Vec<u8>,
    pub architecture: String,
    pub status: NodeStatus,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub max_capacity: NodeResources,
    #[serde(default)]
    pub available_capacity: NodeResources,
    /// Detected capability record; GPU entries mirror `max_capacity.gpus`
    #[serde(default)]
    pub capability: NodeCapability,
    #[serde(default)]
    pub address: Option<String>,
}

impl NodeState {
    /// A node is healthy iff it is currently connected
    pub fn is_healthy(&self) -> bool {
        self.status == NodeStatus::Connected
    }

    /// Resources to count against the fleet: the advertised availability when
    /// any component is non-zero, otherwise the maximum capacity.
    pub fn effective_available(&self) -> &NodeResources {
        if self.available_capacity.is_zero() {
            &self.max_capacity
        } else {
            &self.available_capacity
        }
    }
}

/// Job classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Batch,
    Service,
}

/// Job lifecycle state. The job record itself lives in the external store;
/// atlas only holds transient snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

/// Constraint operator for node matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintOp {
    Eq,
    In,
    NotIn,
    Exists,
}

/// A hard placement constraint evaluated against node labels.
/// The `preferred-region` key is soft and only adjusts ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub key: String,
    pub op: ConstraintOp,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Resources one replica asks for
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpu_cores: f64,
    pub memory_bytes: u64,
    #[serde(default)]
    pub gpu_count: u32,
    #[serde(default)]
    pub gpu_vendor: Option<GpuVendor>,
}

impl ResourceRequest {
    pub fn needs_gpu(&self) -> bool {
        self.gpu_count > 0
    }
}

/// What a replica actually runs: a container image or a wasm module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub wasm_module: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub resources: ResourceRequest,
}

/// Well-known geographic hint labels on jobs
pub mod job_labels {
    pub const REGION: &str = "region";
    pub const PREFERRED_REGIONS: &str = "preferred-regions";
    pub const EXCLUDE_REGIONS: &str = "exclude-regions";
    pub const MAX_LATENCY: &str = "max-latency";
}

/// A job as submitted to the global VM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    /// Desired replica count, >= 1
    pub count: u32,
    pub task: TaskSpec,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    pub state: JobState,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Comma-separated region list from a geographic hint label
    pub fn label_regions(&self, key: &str) -> Vec<String> {
        self.labels
            .get(key)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One element of an allocation: a chosen node with its ranking context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSelection {
    pub node_id: String,
    pub rank: i64,
    pub reason: String,
    pub region: String,
    pub resources: NodeResources,
    /// None when the node's region could not be resolved to a latency figure
    #[serde(default)]
    pub estimated_latency: Option<Duration>,
    pub cost: f64,
}

/// One execution of a job replica, as reported by the external status source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub node_id: String,
    #[serde(default)]
    pub region: Option<String>,
    pub state: JobState,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl Execution {
    /// Wall-clock runtime of this execution, if it has started
    pub fn runtime(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some(end - start)
    }
}

/// Identifiers assigned by the external execution substrate on submit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub job_id: String,
    #[serde(default)]
    pub evaluation_id: Option<String>,
}

/// Options for fetching job logs from the substrate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogOptions {
    #[serde(default)]
    pub tail_lines: Option<u32>,
    #[serde(default)]
    pub follow: bool,
    #[serde(default)]
    pub stderr: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_available_falls_back_to_max() {
        let node = NodeState {
            id: "n1".into(),
            public_key: vec![],
            architecture: "x86_64".into(),
            status: NodeStatus::Connected,
            last_heartbeat: Utc::now(),
            labels: HashMap::new(),
            max_capacity: NodeResources {
                cpu_cores: 8.0,
                memory_bytes: 32 << 30,
                disk_bytes: 512 << 30,
                gpus: vec![],
            },
            available_capacity: NodeResources::default(),
            capability: NodeCapability::default(),
            address: None,
        };
        assert_eq!(node.effective_available().cpu_cores, 8.0);
    }

    #[test]
    fn label_regions_splits_and_trims() {
        let mut labels = HashMap::new();
        labels.insert(
            job_labels::PREFERRED_REGIONS.to_string(),
            "us-east, eu-west ,".to_string(),
        );
        let job = Job {
            id: "j".into(),
            job_type: JobType::Batch,
            count: 1,
            task: TaskSpec::default(),
            labels,
            constraints: vec![],
            state: JobState::Pending,
        };
        assert_eq!(
            job.label_regions(job_labels::PREFERRED_REGIONS),
            vec!["us-east".to_string(), "eu-west".to_string()]
        );
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }
}
