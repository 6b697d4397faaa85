mod cli;

use anyhow::{Context, Result};
use atlas::api::*;
use atlas::credits::TransactionFilter;
use atlas::types::{
    GpuVendor, Job, JobState, JobType, LogOptions, NodeState, ResourceRequest, TaskSpec,
};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if Path::new(&cli.config).exists() {
        AtlasConfig::load_from(&cli.config)?
    } else {
        AtlasConfig::load()?
    };
    config.verbose = cli.verbose;

    let _guard = atlas::telemetry::init_tracing(&config)?;

    let registry = InMemoryNodeRegistry::shared();
    if let Some(fleet_path) = &cli.fleet {
        load_fleet(&registry, fleet_path).await?;
    }

    let view: Arc<dyn NodeLookup> = Arc::clone(&registry) as Arc<dyn NodeLookup>;
    let runtime = AtlasRuntime::with_registry(config, view);

    match cli.command {
        Commands::Capacity => {
            let capacity = runtime.global_capacity().await?;
            println!(
                "{:<18} {:>12} {:>12}",
                "RESOURCE", "TOTAL", "AVAILABLE"
            );
            println!("{}", "─".repeat(44));
            println!(
                "{:<18} {:>12.1} {:>12.1}",
                "cpu cores", capacity.total_cpu, capacity.available_cpu
            );
            println!(
                "{:<18} {:>12} {:>12}",
                "memory (GiB)",
                capacity.total_memory >> 30,
                capacity.available_memory >> 30
            );
            println!(
                "{:<18} {:>12} {:>12}",
                "disk (GiB)",
                capacity.total_disk >> 30,
                capacity.available_disk >> 30
            );
            println!(
                "{:<18} {:>12} {:>12}",
                "gpus", capacity.total_gpus, capacity.available_gpus
            );
            for (vendor, count) in &capacity.gpus_by_vendor {
                println!("{:<18} {:>12}", format!("  {}", vendor.as_str()), count);
            }
            println!(
                "{:<18} {:>12} {:>12}",
                "nodes", capacity.total_nodes, capacity.healthy_nodes
            );
        }

        Commands::Nodes { healthy } => {
            let filter = if healthy {
                NodeFilter::healthy()
            } else {
                NodeFilter::all()
            };
            let nodes = runtime.registry().list(&filter).await?;
            if nodes.is_empty() {
                info!("No nodes known to the registry");
                return Ok(());
            }
            println!(
                "{:<20} {:<12} {:<10} {:>8} {:>12} {:>6}",
                "NODE ID", "STATUS", "ARCH", "CPU", "MEM (GiB)", "GPUS"
            );
            println!("{}", "─".repeat(74));
            for node in &nodes {
                println!(
                    "{:<20} {:<12} {:<10} {:>8.1} {:>12} {:>6}",
                    node.id,
                    if node.is_healthy() {
                        "connected"
                    } else {
                        "disconnected"
                    },
                    node.architecture,
                    node.max_capacity.cpu_cores,
                    node.max_capacity.memory_bytes >> 30,
                    node.max_capacity.gpus.len()
                );
            }
        }

        Commands::Submit {
            image,
            wasm,
            count,
            user,
            cpu,
            memory_gb,
            gpus,
            gpu_vendor,
            prefer_regions,
            exclude_nodes,
            spread,
            max_latency_ms,
            low_cost,
        } => {
            runtime.create_account(&user);

            let job = Job {
                id: format!("job-{}", Uuid::new_v4()),
                job_type: JobType::Batch,
                count,
                task: TaskSpec {
                    image,
                    wasm_module: wasm,
                    command: vec![],
                    env: Default::default(),
                    resources: ResourceRequest {
                        cpu_cores: cpu,
                        memory_bytes: memory_gb << 30,
                        gpu_count: gpus,
                        gpu_vendor: gpu_vendor.as_deref().map(GpuVendor::parse),
                    },
                },
                labels: Default::default(),
                constraints: vec![],
                state: JobState::Pending,
            };

            let options = ScheduleOptions {
                preferred_regions: prefer_regions,
                exclude_node_ids: exclude_nodes,
                max_latency: max_latency_ms.map(std::time::Duration::from_millis),
                prefer_low_cost: low_cost,
                spread_across_regions: spread.unwrap_or(0),
                ..ScheduleOptions::default()
            };

            let response = runtime
                .submit_job(&SubmitRequest {
                    job,
                    user_id: user.clone(),
                    options,
                })
                .await?;

            println!("Job:            {}", response.job_id);
            println!("Estimated cost: {:.2}", response.estimated_cost);
            println!("Queue position: {}", response.queue_position);
            for warning in &response.warnings {
                println!("Warning:        {warning}");
            }
            if !response.allocated_nodes.is_empty() {
                println!(
                    "{:<20} {:<14} {:>8} {:>10} {:>10}",
                    "NODE", "REGION", "RANK", "COST", "LATENCY"
                );
                println!("{}", "─".repeat(66));
                for selection in &response.allocated_nodes {
                    println!(
                        "{:<20} {:<14} {:>8} {:>10.2} {:>10}",
                        selection.node_id,
                        selection.region,
                        selection.rank,
                        selection.cost,
                        selection
                            .estimated_latency
                            .map(|l| format!("{}ms", l.as_millis()))
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            }
            println!("Balance:        {:.2}", runtime.balance(&user));
        }

        Commands::Status { job_id } => {
            let status = runtime.job_status(&job_id).await?;
            println!("Job:        {}", status.job_id);
            println!("State:      {}", status.state.as_str());
            println!(
                "Executions: {} total, {} running, {} completed, {} failed",
                status.total_executions,
                status.running_executions,
                status.completed_executions,
                status.failed_executions
            );
            println!("Regions:    {}", status.unique_regions.join(", "));
            println!("Runtime:    {:.1}s", status.total_runtime.as_secs_f64());
        }

        Commands::Scale { job_id, target } => {
            let selections = runtime.scale_job(&job_id, target).await?;
            println!("Rescheduled {} onto {} nodes", job_id, selections.len());
            for selection in &selections {
                println!("  {} ({})", selection.node_id, selection.region);
            }
        }

        Commands::Cancel { job_id, reason } => {
            runtime.cancel_job(&job_id, &reason).await?;
            println!("Cancelled {job_id}");
        }

        Commands::Logs { job_id, tail } => {
            let options = LogOptions {
                tail_lines: tail,
                ..LogOptions::default()
            };
            for line in runtime.job_logs(&job_id, &options).await? {
                println!("{line}");
            }
        }

        Commands::Balance { user } => {
            println!("{:.2}", runtime.balance(&user));
            let recent = runtime.transactions(
                &user,
                &TransactionFilter {
                    kind: None,
                    limit: Some(10),
                },
            );
            for txn in &recent {
                println!(
                    "  {} {:?} {:.2} {}",
                    txn.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    txn.kind,
                    txn.amount,
                    txn.description
                );
            }
        }

        Commands::Transfer { from, to, amount } => {
            let txn = runtime.transfer(&from, &to, amount)?;
            println!("Transferred {:.2} from {} to {} ({})", amount, from, to, txn.id);
        }

        Commands::Location => {
            let location = runtime.location().await;
            println!("Region:   {}", location.region);
            if let Some(zone) = &location.zone {
                println!("Zone:     {zone}");
            }
            if let Some(provider) = &location.cloud_provider {
                println!("Provider: {provider}");
            }
            if let (Some(country), Some(city)) = (&location.country, &location.city) {
                println!("Place:    {city}, {country}");
            }
            println!("Source:   {:?}", location.source);
        }

        Commands::Latency { from, to } => {
            let latency = runtime.latency_matrix().get_latency(&from, &to);
            println!("{} <-> {}: {}ms", from, to, latency.as_millis());
        }

        Commands::Watch { updates } => {
            let mut rx = runtime.subscribe_capacity();
            let mut seen = 0;
            while seen < updates {
                match rx.recv().await {
                    Some(capacity) => {
                        println!(
                            "[{}] nodes {}/{} cpu {:.1}/{:.1} gpus {}/{}",
                            capacity.timestamp.format("%H:%M:%S"),
                            capacity.healthy_nodes,
                            capacity.total_nodes,
                            capacity.available_cpu,
                            capacity.total_cpu,
                            capacity.available_gpus,
                            capacity.total_gpus
                        );
                        seen += 1;
                    }
                    None => break,
                }
            }
            runtime.shutdown();
        }
    }

    Ok(())
}

/// Load a JSON fleet description into the in-memory registry
async fn load_fleet(registry: &InMemoryNodeRegistry, path: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fleet file at {path}"))?;
    let nodes: Vec<NodeState> =
        serde_json::from_str(&content).with_context(|| "Failed to parse fleet file")?;
    let count = nodes.len();
    for node in nodes {
        registry.register(node).await;
    }
    info!(nodes = count, "fleet loaded from {path}");
    Ok(())
}
