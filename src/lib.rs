//! Atlas - a global virtual machine over a fleet of heterogeneous compute
//! nodes.
//!
//! This crate aggregates live cluster capacity, ranks and selects nodes for
//! submitted jobs by resource, capability, geographic, latency and cost
//! criteria, and admits jobs against a credit-balance policy before handing
//! them to an external execution substrate.

pub mod capability;
pub mod capacity;
pub mod config;
pub mod credits;
pub mod endpoint;
pub mod error;
pub mod fleet;
pub mod geo;
pub mod scheduler;
pub mod telemetry;
pub mod types;

pub use config::AtlasConfig;
pub use error::{AtlasError, Result};

// Export main types at root level
pub use capacity::{CapacitySnapshot, GlobalResources};
pub use types::{Job, JobState, JobType, NodeSelection, NodeState};

// Re-export anyhow for compatibility
pub use anyhow;

/// Re-exports for easier API usage
pub mod api {
    pub use crate::capacity::{CapacityAggregator, CapacitySnapshot, GlobalResources};
    pub use crate::config::{AtlasConfig, GeoRankerConfig};
    pub use crate::credits::{CreditLedger, Transaction, TransactionFilter, TransactionKind};
    pub use crate::endpoint::{
        AdmissionEndpoint, GlobalJobStatus, JobStatusProvider, JobSubmitter, SubmitRequest,
        SubmitResponse,
    };
    pub use crate::fleet::{InMemoryNodeRegistry, NodeFilter, NodeLookup};
    pub use crate::geo::{LatencyMatrix, Location, LocationDetector, LocationSource};
    pub use crate::scheduler::{
        GlobalScheduler, NodeMatcher, RegistryMatcher, ScheduleOptions, ScheduleRequest,
    };
    pub use crate::AtlasRuntime;
}

use crate::capacity::CapacityAggregator;
use crate::credits::{CreditLedger, Transaction, TransactionFilter};
use crate::endpoint::{
    AdmissionEndpoint, GlobalJobStatus, JobStatusProvider, JobSubmitter, SubmitRequest,
    SubmitResponse,
};
use crate::fleet::{InMemoryNodeRegistry, NodeLookup};
use crate::geo::{LatencyMatrix, Location, LocationDetector};
use crate::scheduler::{GlobalScheduler, RegistryMatcher};
use crate::types::LogOptions;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Core Atlas API wiring the registry view, capacity aggregator, scheduler,
/// latency model, credit ledger and admission endpoint into one runtime.
/// Component-scoped state only: wire one runtime per endpoint instance.
pub struct AtlasRuntime {
    config: AtlasConfig,
    registry: Arc<dyn NodeLookup>,
    aggregator: Arc<CapacityAggregator>,
    detector: Arc<LocationDetector>,
    latency: Arc<LatencyMatrix>,
    ledger: Arc<CreditLedger>,
    endpoint: AdmissionEndpoint,
}

impl AtlasRuntime {
    /// Create a runtime instance backed by an in-memory registry
    pub fn new() -> Result<Self> {
        let config = AtlasConfig::load()?;
        Ok(Self::with_registry(config, InMemoryNodeRegistry::shared()))
    }

    /// Create a runtime instance with a custom config and an in-memory
    /// registry
    pub fn with_config(config: AtlasConfig) -> Self {
        Self::with_registry(config, InMemoryNodeRegistry::shared())
    }

    /// Create a runtime instance over an external registry view
    pub fn with_registry(config: AtlasConfig, registry: Arc<dyn NodeLookup>) -> Self {
        Self::build(config, registry, None, None)
    }

    /// Full wiring: external registry, execution substrate, status source
    pub fn build(
        config: AtlasConfig,
        registry: Arc<dyn NodeLookup>,
        submitter: Option<Arc<dyn JobSubmitter>>,
        status_provider: Option<Arc<dyn JobStatusProvider>>,
    ) -> Self {
        let aggregator = CapacityAggregator::new(Arc::clone(&registry), config.snapshot_interval());
        let detector = Arc::new(LocationDetector::new(&config));
        let latency = Arc::new(LatencyMatrix::new(&config));
        let ledger = Arc::new(CreditLedger::new(config.initial_credits));

        let matcher = Arc::new(RegistryMatcher::new(Arc::clone(&registry)));
        let scheduler = Arc::new(GlobalScheduler::new(
            matcher,
            Arc::clone(&detector),
            Arc::clone(&latency),
            &config,
        ));

        let mut endpoint = AdmissionEndpoint::new(Arc::clone(&aggregator), scheduler)
            .with_ledger(Arc::clone(&ledger));
        if let Some(submitter) = submitter {
            endpoint = endpoint.with_submitter(submitter);
        }
        if let Some(provider) = status_provider {
            endpoint = endpoint.with_status_provider(provider);
        }

        Self {
            config,
            registry,
            aggregator,
            detector,
            latency,
            ledger,
            endpoint,
        }
    }

    /// Submit a job to the global VM
    pub async fn submit_job(&self, request: &SubmitRequest) -> Result<SubmitResponse> {
        self.endpoint.submit_job(request).await
    }

    /// Joined job + execution status
    pub async fn job_status(&self, job_id: &str) -> Result<GlobalJobStatus> {
        self.endpoint.get_job_status(job_id).await
    }

    /// Re-run selection at a new replica count
    pub async fn scale_job(&self, job_id: &str, target_count: i64) -> Result<Vec<NodeSelection>> {
        self.endpoint.scale_job(job_id, target_count).await
    }

    /// Cancel a job on the substrate
    pub async fn cancel_job(&self, job_id: &str, reason: &str) -> Result<()> {
        self.endpoint.cancel_job(job_id, reason).await
    }

    /// Fetch job logs from the substrate
    pub async fn job_logs(&self, job_id: &str, options: &LogOptions) -> Result<Vec<String>> {
        self.endpoint.get_job_logs(job_id, options).await
    }

    /// Current fleet capacity
    pub async fn global_capacity(&self) -> Result<GlobalResources> {
        self.endpoint.global_capacity().await
    }

    /// Capacity update stream
    pub fn subscribe_capacity(&self) -> mpsc::Receiver<GlobalResources> {
        self.endpoint.capacity_updates()
    }

    /// Detected location of this process
    pub async fn location(&self) -> Location {
        self.detector.detect_self().await
    }

    /// Credit balance for a user
    pub fn balance(&self, user: &str) -> f64 {
        self.endpoint.credit_balance(user)
    }

    /// Create a ledger account with the configured initial grant
    pub fn create_account(&self, user: &str) -> f64 {
        self.ledger.create_account(user)
    }

    /// Add credits to a user
    pub fn credit(&self, user: &str, amount: f64, description: &str) -> Result<Transaction> {
        self.ledger.credit(user, amount, description)
    }

    /// Move credits between users
    pub fn transfer(&self, from: &str, to: &str, amount: f64) -> Result<Transaction> {
        self.endpoint.credit_transfer(from, to, amount)
    }

    /// Transactions for a user, newest first
    pub fn transactions(&self, user: &str, filter: &TransactionFilter) -> Vec<Transaction> {
        self.ledger.list_transactions(user, filter)
    }

    /// The latency matrix backing geographic scheduling
    pub fn latency_matrix(&self) -> &Arc<LatencyMatrix> {
        &self.latency
    }

    /// The registry view this runtime observes
    pub fn registry(&self) -> &Arc<dyn NodeLookup> {
        &self.registry
    }

    /// The capacity aggregator
    pub fn aggregator(&self) -> &Arc<CapacityAggregator> {
        &self.aggregator
    }

    /// Stop background loops (capacity subscriptions)
    pub fn shutdown(&self) {
        self.aggregator.shutdown();
    }

    /// The runtime configuration
    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }
}
