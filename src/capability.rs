//! Per-node capability model: execution engines, GPU inventory, and a
//! monotone capability score used by the scheduler's matcher.

use crate::types::{GpuSpec, GpuVendor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution engines a node can host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Docker,
    Wasm,
}

/// One engine entry in a node's capability record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineCapability {
    pub engine: EngineKind,
    pub available: bool,
    #[serde(default)]
    pub version: Option<String>,
}

/// One GPU entry. Entries correspond one-to-one with the GPU sequence in
/// the node's advertised resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuCapability {
    pub index: u32,
    pub name: String,
    pub vendor: GpuVendor,
    pub memory_mib: u64,
    pub available: bool,
}

/// Capability bundle detected on a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCapability {
    pub detected_at: DateTime<Utc>,
    pub os: String,
    pub architecture: String,
    pub hostname: String,
    #[serde(default)]
    pub engines: Vec<EngineCapability>,
    #[serde(default)]
    pub gpus: Vec<GpuCapability>,
}

impl NodeCapability {
    /// Build a capability record from the GPU sequence a node advertises
    pub fn from_resources(
        os: impl Into<String>,
        architecture: impl Into<String>,
        hostname: impl Into<String>,
        engines: Vec<EngineCapability>,
        gpus: &[GpuSpec],
    ) -> Self {
        let gpus = gpus
            .iter()
            .enumerate()
            .map(|(index, gpu)| GpuCapability {
                index: index as u32,
                name: gpu.model.clone(),
                vendor: gpu.vendor,
                memory_mib: gpu.memory_mib,
                available: true,
            })
            .collect();

        Self {
            detected_at: Utc::now(),
            os: os.into(),
            architecture: architecture.into(),
            hostname: hostname.into(),
            engines,
            gpus,
        }
    }

    /// Detect the capability record of the local machine. Engine probing is
    /// not attempted here; callers mark engines they actually host.
    pub fn detect_local(engines: Vec<EngineCapability>) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            detected_at: Utc::now(),
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            hostname: host,
            engines,
            gpus: Vec::new(),
        }
    }

    /// True iff an entry for the engine exists and is available
    pub fn has_engine(&self, engine: EngineKind) -> bool {
        self.engines.iter().any(|e| e.engine == engine && e.available)
    }

    /// True iff any GPU entry carries the vendor
    pub fn has_gpu_vendor(&self, vendor: GpuVendor) -> bool {
        self.gpus.iter().any(|g| g.vendor == vendor)
    }

    /// Sum of GPU memory over all entries, available or not
    pub fn total_gpu_memory_mib(&self) -> u64 {
        self.gpus.iter().map(|g| g.memory_mib).sum()
    }

    /// Positive integer summary of this node's capabilities. Monotone:
    /// adding an available engine or a GPU never decreases the score.
    pub fn capability_score(&self) -> u64 {
        let engine_score = self.engines.iter().filter(|e| e.available).count() as u64 * 10;
        let gpu_score = self.gpus.len() as u64 * 20;
        let gpu_memory_score = self.total_gpu_memory_mib() / 1024;
        1 + engine_score + gpu_score + gpu_memory_score
    }
}

impl Default for NodeCapability {
    fn default() -> Self {
        Self {
            detected_at: Utc::now(),
            os: String::new(),
            architecture: String::new(),
            hostname: String::new(),
            engines: Vec::new(),
            gpus: Vec::new(),
        }
    }
}

/// Resources of the local machine, for node agents advertising themselves.
/// Memory and disk stay zero here; agents fill them from their platform.
pub fn local_node_resources() -> crate::types::NodeResources {
    crate::types::NodeResources {
        cpu_cores: num_cpus::get() as f64,
        memory_bytes: 0,
        disk_bytes: 0,
        gpus: Vec::new(),
    }
}

/// Convenience constructor for an available engine entry
pub fn engine(kind: EngineKind) -> EngineCapability {
    EngineCapability {
        engine: kind,
        available: true,
        version: None,
    }
}
