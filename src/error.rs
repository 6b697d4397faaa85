use thiserror::Error;

/// Atlas-specific error types for better error handling
#[derive(Error, Debug)]
pub enum AtlasError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Capacity error: {0}")]
    Capacity(#[from] CapacityError),

    #[error("Credit error: {0}")]
    Credits(#[from] CreditError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    Serialization(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generic error: {0}")]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Atlasfile not found at path: {path}")]
    AtlasfileNotFound { path: String },

    #[error("Invalid Atlasfile format: {reason}")]
    InvalidFormat { reason: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

/// Malformed input; reported, never retried
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid job spec: {reason}")]
    InvalidJob { reason: String },

    #[error("Replica count must be positive, got {count}")]
    NonPositiveCount { count: i64 },

    #[error("Target count must be non-negative, got {count}")]
    NegativeTargetCount { count: i64 },

    #[error("Amount must be positive, got {amount}")]
    NonPositiveAmount { amount: f64 },
}

/// Registry unreachable or hard resource shortage; caller may retry
#[derive(Error, Debug)]
pub enum CapacityError {
    #[error("Node registry unavailable: {reason}")]
    RegistryUnavailable { reason: String },

    #[error("Insufficient {resource}: requested {requested}, available {available}")]
    Insufficient {
        resource: &'static str,
        requested: f64,
        available: f64,
    },

    #[error("No GPU capacity available in the fleet")]
    NoGpuCapacity,
}

/// Ledger refused an operation; client must add credits
#[derive(Error, Debug)]
pub enum CreditError {
    #[error("Insufficient credits for {user}: required {required:.2}, available {available:.2}")]
    Insufficient {
        user: String,
        required: f64,
        available: f64,
    },
}

#[derive(Error, Debug)]
pub enum NotFoundError {
    #[error("Node not found: {id}")]
    Node { id: String },

    #[error("Job not found: {id}")]
    Job { id: String },
}

/// Probe failures are swallowed internally; callers receive fallbacks
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Probe timed out: {target}")]
    Timeout { target: String },

    #[error("Probe failed for {target}: {reason}")]
    Failed { target: String, reason: String },
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job {id} is in terminal state {state} and cannot be modified")]
    TerminalState { id: String, state: String },

    #[error("No execution substrate configured")]
    SubstrateNotConfigured,

    #[error("Execution substrate error: {reason}")]
    Substrate { reason: String },
}

/// Convenience type alias for Atlas results
pub type Result<T, E = AtlasError> = std::result::Result<T, E>;
