//! Deterministic fleet, substrate and status-source fakes shared by the
//! integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use atlas::api::*;
use atlas::capability::{engine, EngineKind, NodeCapability};
use atlas::error::{CapacityError, Result};
use atlas::types::{
    Execution, GpuSpec, GpuVendor, Job, JobState, JobType, LogOptions, NodeResources,
    NodeSelection, NodeState, NodeStatus, ResourceRequest, SubmittedJob, TaskSpec,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Builder for one test node; connected, docker+wasm capable by default
pub struct NodeBuilder {
    id: String,
    region: Option<String>,
    labels: HashMap<String, String>,
    cpu_cores: f64,
    memory_bytes: u64,
    disk_bytes: u64,
    gpus: Vec<GpuSpec>,
    available: Option<NodeResources>,
    architecture: String,
    connected: bool,
}

pub fn node(id: &str) -> NodeBuilder {
    NodeBuilder {
        id: id.to_string(),
        region: None,
        labels: HashMap::new(),
        cpu_cores: 4.0,
        memory_bytes: 16 << 30,
        disk_bytes: 100 << 30,
        gpus: Vec::new(),
        available: None,
        architecture: "x86_64".to_string(),
        connected: true,
    }
}

impl NodeBuilder {
    pub fn region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn cpus(mut self, cpu_cores: f64) -> Self {
        self.cpu_cores = cpu_cores;
        self
    }

    pub fn mem_gib(mut self, gib: u64) -> Self {
        self.memory_bytes = gib << 30;
        self
    }

    pub fn disk_gib(mut self, gib: u64) -> Self {
        self.disk_bytes = gib << 30;
        self
    }

    pub fn gpu(mut self, vendor: GpuVendor, model: &str, memory_mib: u64) -> Self {
        self.gpus.push(GpuSpec {
            vendor,
            model: model.to_string(),
            memory_mib,
        });
        self
    }

    pub fn available(mut self, cpu_cores: f64, memory_gib: u64) -> Self {
        self.available = Some(NodeResources {
            cpu_cores,
            memory_bytes: memory_gib << 30,
            disk_bytes: self.disk_bytes,
            gpus: self.gpus.clone(),
        });
        self
    }

    pub fn arch(mut self, architecture: &str) -> Self {
        self.architecture = architecture.to_string();
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    pub fn build(self) -> NodeState {
        let mut labels = self.labels;
        if let Some(region) = &self.region {
            labels.insert("region".to_string(), region.clone());
        }
        let capability = NodeCapability::from_resources(
            "linux",
            &self.architecture,
            &self.id,
            vec![engine(EngineKind::Docker), engine(EngineKind::Wasm)],
            &self.gpus,
        );
        NodeState {
            id: self.id,
            public_key: vec![1, 2, 3],
            architecture: self.architecture,
            status: if self.connected {
                NodeStatus::Connected
            } else {
                NodeStatus::Disconnected
            },
            last_heartbeat: Utc::now(),
            labels,
            max_capacity: NodeResources {
                cpu_cores: self.cpu_cores,
                memory_bytes: self.memory_bytes,
                disk_bytes: self.disk_bytes,
                gpus: self.gpus.clone(),
            },
            available_capacity: self.available.unwrap_or_default(),
            capability,
            address: None,
        }
    }
}

/// Register the built nodes into a fresh in-memory registry
pub async fn fleet(nodes: Vec<NodeBuilder>) -> Arc<InMemoryNodeRegistry> {
    let registry = InMemoryNodeRegistry::shared();
    for builder in nodes {
        registry.register(builder.build()).await;
    }
    registry
}

/// Builder for one test job
pub struct JobBuilder {
    id: String,
    count: u32,
    image: Option<String>,
    wasm_module: Option<String>,
    cpu_cores: f64,
    memory_bytes: u64,
    gpu_count: u32,
    gpu_vendor: Option<GpuVendor>,
    labels: HashMap<String, String>,
    state: JobState,
}

pub fn job(id: &str) -> JobBuilder {
    JobBuilder {
        id: id.to_string(),
        count: 1,
        image: Some("alpine:latest".to_string()),
        wasm_module: None,
        cpu_cores: 0.0,
        memory_bytes: 0,
        gpu_count: 0,
        gpu_vendor: None,
        labels: HashMap::new(),
        state: JobState::Pending,
    }
}

impl JobBuilder {
    pub fn count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn cpu(mut self, cores: f64) -> Self {
        self.cpu_cores = cores;
        self
    }

    pub fn mem_gib(mut self, gib: u64) -> Self {
        self.memory_bytes = gib << 30;
        self
    }

    pub fn gpus(mut self, count: u32, vendor: Option<GpuVendor>) -> Self {
        self.gpu_count = count;
        self.gpu_vendor = vendor;
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn state(mut self, state: JobState) -> Self {
        self.state = state;
        self
    }

    pub fn build(self) -> Job {
        Job {
            id: self.id,
            job_type: JobType::Batch,
            count: self.count,
            task: TaskSpec {
                image: self.image,
                wasm_module: self.wasm_module,
                command: vec![],
                env: HashMap::new(),
                resources: ResourceRequest {
                    cpu_cores: self.cpu_cores,
                    memory_bytes: self.memory_bytes,
                    gpu_count: self.gpu_count,
                    gpu_vendor: self.gpu_vendor,
                },
            },
            labels: self.labels,
            constraints: vec![],
            state: self.state,
        }
    }
}

/// Records every submission and cancellation handed to the substrate
#[derive(Default)]
pub struct MockSubmitter {
    pub submissions: Mutex<Vec<(Job, Vec<NodeSelection>)>>,
    pub cancellations: Mutex<Vec<(String, String)>>,
    pub log_lines: Mutex<Vec<String>>,
}

impl MockSubmitter {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl JobSubmitter for MockSubmitter {
    async fn submit(&self, job: &Job, allocation: &[NodeSelection]) -> Result<SubmittedJob> {
        self.submissions
            .lock()
            .unwrap()
            .push((job.clone(), allocation.to_vec()));
        Ok(SubmittedJob {
            job_id: format!("ext-{}", job.id),
            evaluation_id: Some(format!("eval-{}", job.id)),
        })
    }

    async fn cancel(&self, job_id: &str, reason: &str) -> Result<()> {
        self.cancellations
            .lock()
            .unwrap()
            .push((job_id.to_string(), reason.to_string()));
        Ok(())
    }

    async fn logs(&self, _job_id: &str, _options: &LogOptions) -> Result<Vec<String>> {
        Ok(self.log_lines.lock().unwrap().clone())
    }
}

/// Scripted job/execution store
#[derive(Default)]
pub struct MockStatusProvider {
    pub jobs: Mutex<HashMap<String, Job>>,
    pub executions: Mutex<HashMap<String, Vec<Execution>>>,
}

impl MockStatusProvider {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_job(&self, job: Job) {
        self.jobs.lock().unwrap().insert(job.id.clone(), job);
    }

    pub fn put_executions(&self, job_id: &str, executions: Vec<Execution>) {
        self.executions
            .lock()
            .unwrap()
            .insert(job_id.to_string(), executions);
    }
}

#[async_trait]
impl JobStatusProvider for MockStatusProvider {
    async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.jobs
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| {
                atlas::error::NotFoundError::Job {
                    id: job_id.to_string(),
                }
                .into()
            })
    }

    async fn get_executions(&self, job_id: &str) -> Result<Vec<Execution>> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// A registry view whose enumeration always fails
pub struct UnreachableRegistry;

#[async_trait]
impl NodeLookup for UnreachableRegistry {
    async fn list(&self, _filter: &NodeFilter) -> Result<Vec<NodeState>> {
        Err(CapacityError::RegistryUnavailable {
            reason: "gossip mesh unreachable".to_string(),
        }
        .into())
    }

    async fn get(&self, id: &str) -> Result<NodeState> {
        Err(atlas::error::NotFoundError::Node { id: id.to_string() }.into())
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<NodeState> {
        Err(atlas::error::NotFoundError::Node {
            id: prefix.to_string(),
        }
        .into())
    }
}

/// Config with a fixed origin region so geo ranking is deterministic
pub fn config_in(region: &str) -> AtlasConfig {
    AtlasConfig {
        region: Some(region.to_string()),
        ..AtlasConfig::default()
    }
}

/// Runtime over a prepared registry with the mock substrate wired in
pub fn runtime_with(
    config: AtlasConfig,
    registry: Arc<InMemoryNodeRegistry>,
    submitter: Arc<MockSubmitter>,
    status: Arc<MockStatusProvider>,
) -> AtlasRuntime {
    let registry: Arc<dyn NodeLookup> = registry;
    let submitter: Arc<dyn JobSubmitter> = submitter;
    let status: Arc<dyn JobStatusProvider> = status;
    AtlasRuntime::build(config, registry, Some(submitter), Some(status))
}
