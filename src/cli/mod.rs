use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "atlas",
    about = "Global virtual machine over a fleet of heterogeneous compute nodes",
    version
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the Atlasfile configuration
    #[arg(short, long, default_value = "Atlasfile.toml", env = "ATLAS_CONFIG")]
    pub config: String,

    /// JSON file describing the fleet to load into the in-memory registry
    #[arg(long, env = "ATLAS_FLEET")]
    pub fleet: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the aggregated fleet capacity
    Capacity,

    /// List known nodes with liveness and resources
    Nodes {
        /// Only show connected nodes
        #[arg(long)]
        healthy: bool,
    },

    /// Submit a job to the global VM
    Submit {
        /// Container image to run
        #[arg(long)]
        image: Option<String>,

        /// Wasm module to run instead of an image
        #[arg(long)]
        wasm: Option<String>,

        /// Desired replica count
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Ledger account charged for the submission
        #[arg(long, default_value = "operator")]
        user: String,

        /// CPU cores requested per replica
        #[arg(long, default_value_t = 0.0)]
        cpu: f64,

        /// Memory requested per replica, GiB
        #[arg(long, default_value_t = 0)]
        memory_gb: u64,

        /// GPUs requested per replica
        #[arg(long, default_value_t = 0)]
        gpus: u32,

        /// Required GPU vendor (nvidia, amd, intel)
        #[arg(long)]
        gpu_vendor: Option<String>,

        /// Preferred regions, repeatable
        #[arg(long = "prefer-region")]
        prefer_regions: Vec<String>,

        /// Node ids to exclude, repeatable
        #[arg(long = "exclude-node")]
        exclude_nodes: Vec<String>,

        /// Spread replicas across this many regions
        #[arg(long)]
        spread: Option<u32>,

        /// Drop nodes above this latency, milliseconds
        #[arg(long)]
        max_latency_ms: Option<u64>,

        /// Prefer cheaper nodes on rank ties
        #[arg(long)]
        low_cost: bool,
    },

    /// Show joined job and execution status
    Status { job_id: String },

    /// Re-run node selection at a new replica count
    Scale { job_id: String, target: i64 },

    /// Cancel a job on the execution substrate
    Cancel {
        job_id: String,
        #[arg(long, default_value = "cancelled by operator")]
        reason: String,
    },

    /// Fetch job logs from the execution substrate
    Logs {
        job_id: String,
        #[arg(long)]
        tail: Option<u32>,
    },

    /// Show a user's credit balance
    Balance { user: String },

    /// Transfer credits between users
    Transfer {
        from: String,
        to: String,
        amount: f64,
    },

    /// Show the detected location of this process
    Location,

    /// Show the estimated latency between two regions
    Latency { from: String, to: String },

    /// Follow capacity updates from the aggregator
    Watch {
        /// Number of updates to print before exiting
        #[arg(long, default_value_t = 5)]
        updates: u32,
    },
}
