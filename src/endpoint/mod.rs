//! Admission endpoint: validates jobs, checks fleet capacity, runs the
//! scheduler, applies the credit debit, and forwards accepted jobs to the
//! external execution substrate. Lifecycle operations (status, scale,
//! cancel, logs) are thin facades over the scheduler and the external
//! status source.

use crate::capacity::{CapacityAggregator, GlobalResources};
use crate::credits::CreditLedger;
use crate::error::{CapacityError, JobError, Result, ValidationError};
use crate::scheduler::{GlobalScheduler, ScheduleOptions, ScheduleRequest};
use crate::types::{Execution, Job, LogOptions, NodeSelection, SubmittedJob};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Warning attached when the scheduler finds nothing; the job is queued,
/// not rejected
pub const QUEUED_WARNING: &str = "No suitable nodes available, job queued";

/// GPU jobs cost double
const GPU_COST_MULTIPLIER: f64 = 2.0;
const BASE_JOB_COST: f64 = 1.0;
const PER_NODE_COST: f64 = 0.5;

/// External execution substrate
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    /// Hand the job and its allocation to the executor
    async fn submit(&self, job: &Job, allocation: &[NodeSelection]) -> Result<SubmittedJob>;

    /// Ask the executor to stop a job
    async fn cancel(&self, job_id: &str, reason: &str) -> Result<()>;

    /// Fetch job logs
    async fn logs(&self, job_id: &str, options: &LogOptions) -> Result<Vec<String>>;
}

/// External job/execution status source
#[async_trait]
pub trait JobStatusProvider: Send + Sync {
    async fn get_job(&self, job_id: &str) -> Result<Job>;
    async fn get_executions(&self, job_id: &str) -> Result<Vec<Execution>>;
}

/// One submission request
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub job: Job,
    /// Ledger account debited for the submission
    pub user_id: String,
    pub options: ScheduleOptions,
}

/// Submission outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    #[serde(default)]
    pub evaluation_id: Option<String>,
    pub allocated_nodes: Vec<NodeSelection>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub estimated_cost: f64,
    /// 0 when allocated; >= 1 when queued without an allocation
    pub queue_position: u32,
}

/// Joined job + execution view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalJobStatus {
    pub job_id: String,
    pub state: crate::types::JobState,
    pub total_executions: usize,
    pub running_executions: usize,
    pub completed_executions: usize,
    pub failed_executions: usize,
    pub unique_regions: Vec<String>,
    pub executions: Vec<Execution>,
    /// Sum of execution wall-clock runtimes
    pub total_runtime: Duration,
}

/// The global VM's admission and lifecycle surface
pub struct AdmissionEndpoint {
    aggregator: Arc<CapacityAggregator>,
    scheduler: Arc<GlobalScheduler>,
    ledger: Option<Arc<CreditLedger>>,
    submitter: Option<Arc<dyn JobSubmitter>>,
    status_provider: Option<Arc<dyn JobStatusProvider>>,
}

impl AdmissionEndpoint {
    pub fn new(aggregator: Arc<CapacityAggregator>, scheduler: Arc<GlobalScheduler>) -> Self {
        Self {
            aggregator,
            scheduler,
            ledger: None,
            submitter: None,
            status_provider: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<CreditLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_submitter(mut self, submitter: Arc<dyn JobSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn with_status_provider(mut self, provider: Arc<dyn JobStatusProvider>) -> Self {
        self.status_provider = Some(provider);
        self
    }

    /// Validate → capacity check → select → debit → forward. A committed
    /// debit is never rolled back here; substrate errors after the debit
    /// propagate verbatim and callers retry or refund explicitly.
    pub async fn submit_job(&self, request: &SubmitRequest) -> Result<SubmitResponse> {
        let job = &request.job;
        validate_job(job)?;

        let capacity = match self.aggregator.get_available_capacity().await {
            Ok(capacity) => capacity,
            Err(e) => {
                return Err(CapacityError::RegistryUnavailable {
                    reason: e.to_string(),
                }
                .into())
            }
        };
        check_capacity(job, &capacity)?;

        let schedule_request = ScheduleRequest {
            job: job.clone(),
            target_count: job.count,
            options: request.options.clone(),
            capacity: Some(capacity),
        };
        let selections = self.scheduler.schedule(&schedule_request).await?;

        if selections.is_empty() {
            // accepted but unplaceable right now; no debit is taken
            info!(job_id = %job.id, "no allocation available, queueing job");
            return Ok(SubmitResponse {
                job_id: job.id.clone(),
                evaluation_id: None,
                allocated_nodes: Vec::new(),
                warnings: vec![QUEUED_WARNING.to_string()],
                estimated_cost: 0.0,
                queue_position: 1,
            });
        }

        let estimated_cost = estimate_cost(job, selections.len());

        if let Some(ledger) = &self.ledger {
            if estimated_cost > 0.0 {
                ledger.debit(
                    &request.user_id,
                    estimated_cost,
                    &format!("job {} submission", job.id),
                )?;
                debug!(job_id = %job.id, user = %request.user_id, cost = estimated_cost, "credits debited");
            }
        }

        let mut job_id = job.id.clone();
        let mut evaluation_id = None;
        if let Some(submitter) = &self.submitter {
            let submitted = submitter.submit(job, &selections).await?;
            job_id = submitted.job_id;
            evaluation_id = submitted.evaluation_id;
        }

        info!(
            job_id = %job_id,
            nodes = selections.len(),
            cost = estimated_cost,
            "job admitted"
        );
        Ok(SubmitResponse {
            job_id,
            evaluation_id,
            allocated_nodes: selections,
            warnings: Vec::new(),
            estimated_cost,
            queue_position: 0,
        })
    }

    /// Join the job record with its executions into a global status view
    pub async fn get_job_status(&self, job_id: &str) -> Result<GlobalJobStatus> {
        let provider = self.status_provider()?;
        let job = provider.get_job(job_id).await?;
        let executions = provider.get_executions(job_id).await?;

        let mut unique_regions: BTreeSet<String> = BTreeSet::new();
        let mut running = 0;
        let mut completed = 0;
        let mut failed = 0;
        let mut total_runtime = Duration::ZERO;

        for execution in &executions {
            if let Some(region) = &execution.region {
                unique_regions.insert(region.clone());
            }
            match execution.state {
                crate::types::JobState::Running => running += 1,
                crate::types::JobState::Completed => completed += 1,
                crate::types::JobState::Failed => failed += 1,
                _ => {}
            }
            if let Some(runtime) = execution.runtime() {
                total_runtime += runtime.to_std().unwrap_or(Duration::ZERO);
            }
        }

        Ok(GlobalJobStatus {
            job_id: job.id,
            state: job.state,
            total_executions: executions.len(),
            running_executions: running,
            completed_executions: completed,
            failed_executions: failed,
            unique_regions: unique_regions.into_iter().collect(),
            executions,
            total_runtime,
        })
    }

    /// Re-run the scheduler at a new replica count. Actual re-dispatch is
    /// the substrate's concern.
    pub async fn scale_job(&self, job_id: &str, target_count: i64) -> Result<Vec<NodeSelection>> {
        if target_count < 0 {
            return Err(ValidationError::NegativeTargetCount {
                count: target_count,
            }
            .into());
        }

        let provider = self.status_provider()?;
        let job = provider.get_job(job_id).await?;
        if job.is_terminal() {
            return Err(JobError::TerminalState {
                id: job_id.to_string(),
                state: job.state.as_str().to_string(),
            }
            .into());
        }

        let request = ScheduleRequest {
            job,
            target_count: target_count as u32,
            options: ScheduleOptions::default(),
            capacity: None,
        };
        let selections = self.scheduler.schedule(&request).await?;
        info!(job_id = %job_id, target = target_count, selected = selections.len(), "job rescaled");
        Ok(selections)
    }

    /// Delegate cancellation to the substrate
    pub async fn cancel_job(&self, job_id: &str, reason: &str) -> Result<()> {
        let submitter = self.submitter()?;
        warn!(%job_id, %reason, "cancelling job");
        submitter.cancel(job_id, reason).await
    }

    /// Delegate log retrieval to the substrate
    pub async fn get_job_logs(&self, job_id: &str, options: &LogOptions) -> Result<Vec<String>> {
        let submitter = self.submitter()?;
        submitter.logs(job_id, options).await
    }

    /// Current fleet capacity roll-up
    pub async fn global_capacity(&self) -> Result<GlobalResources> {
        self.aggregator.get_global_capacity().await
    }

    /// Stream of capacity updates
    pub fn capacity_updates(&self) -> mpsc::Receiver<GlobalResources> {
        self.aggregator.subscribe()
    }

    /// Ledger balance; zero when no ledger is wired
    pub fn credit_balance(&self, user: &str) -> f64 {
        self.ledger.as_ref().map(|l| l.get_balance(user)).unwrap_or(0.0)
    }

    /// Ledger transfer
    pub fn credit_transfer(
        &self,
        from: &str,
        to: &str,
        amount: f64,
    ) -> Result<crate::credits::Transaction> {
        let ledger = self
            .ledger
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no credit ledger configured"))?;
        ledger.transfer(from, to, amount, "credit transfer")
    }

    fn status_provider(&self) -> Result<&Arc<dyn JobStatusProvider>> {
        self.status_provider
            .as_ref()
            .ok_or_else(|| JobError::SubstrateNotConfigured.into())
    }

    fn submitter(&self) -> Result<&Arc<dyn JobSubmitter>> {
        self.submitter
            .as_ref()
            .ok_or_else(|| JobError::SubstrateNotConfigured.into())
    }
}

/// Estimated admission cost: base plus a per-node share, doubled for GPU
/// jobs
fn estimate_cost(job: &Job, allocated: usize) -> f64 {
    let multiplier = if job.task.resources.needs_gpu() {
        GPU_COST_MULTIPLIER
    } else {
        1.0
    };
    BASE_JOB_COST + PER_NODE_COST * allocated as f64 * multiplier
}

fn validate_job(job: &Job) -> Result<()> {
    if job.id.trim().is_empty() {
        return Err(ValidationError::InvalidJob {
            reason: "job id is empty".to_string(),
        }
        .into());
    }
    if job.count == 0 {
        return Err(ValidationError::NonPositiveCount { count: 0 }.into());
    }
    match (&job.task.image, &job.task.wasm_module) {
        (None, None) => {
            return Err(ValidationError::InvalidJob {
                reason: "task needs an image or a wasm module".to_string(),
            }
            .into())
        }
        (Some(_), Some(_)) => {
            return Err(ValidationError::InvalidJob {
                reason: "task specifies both an image and a wasm module".to_string(),
            }
            .into())
        }
        _ => {}
    }
    let resources = &job.task.resources;
    if !resources.cpu_cores.is_finite() || resources.cpu_cores < 0.0 {
        return Err(ValidationError::InvalidJob {
            reason: format!("invalid cpu request: {}", resources.cpu_cores),
        }
        .into());
    }
    Ok(())
}

/// Compare only the explicitly requested resources against availability, so
/// a job with no demands stays admissible even against an empty fleet.
fn check_capacity(job: &Job, capacity: &GlobalResources) -> Result<()> {
    let request = &job.task.resources;

    if request.cpu_cores > 0.0 && capacity.available_cpu < request.cpu_cores {
        return Err(CapacityError::Insufficient {
            resource: "cpu",
            requested: request.cpu_cores,
            available: capacity.available_cpu,
        }
        .into());
    }

    if request.memory_bytes > 0 && capacity.available_memory < request.memory_bytes {
        return Err(CapacityError::Insufficient {
            resource: "memory",
            requested: request.memory_bytes as f64,
            available: capacity.available_memory as f64,
        }
        .into());
    }

    if request.needs_gpu() && capacity.available_gpus == 0 {
        return Err(CapacityError::NoGpuCapacity.into());
    }

    Ok(())
}
