//! Fleet-wide capacity roll-up with snapshot caching and change
//! subscriptions. The aggregator holds the registry view, never the other
//! way around; subscribers hold only the receive end of a channel.

use crate::error::Result;
use crate::fleet::{NodeFilter, NodeLookup};
use crate::types::{GpuVendor, NodeResources};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, trace, warn};

/// Buffered updates per subscriber; the producer drops instead of blocking
const SUBSCRIBER_BUFFER: usize = 10;

/// Aggregated totals and availability across the fleet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalResources {
    pub total_cpu: f64,
    pub available_cpu: f64,
    pub total_memory: u64,
    pub available_memory: u64,
    pub total_disk: u64,
    pub available_disk: u64,
    pub total_gpus: u32,
    pub available_gpus: u32,
    pub total_nodes: u32,
    pub healthy_nodes: u32,
    #[serde(default)]
    pub gpus_by_vendor: HashMap<GpuVendor, u32>,
    pub timestamp: DateTime<Utc>,
}

/// One node's contribution to a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeContribution {
    pub node_id: String,
    pub healthy: bool,
    pub resources: NodeResources,
}

/// Point-in-time capacity bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub resources: GlobalResources,
    pub contributions: Vec<NodeContribution>,
    pub taken_at: DateTime<Utc>,
}

struct CachedSnapshot {
    snapshot: CapacitySnapshot,
    taken: Instant,
}

/// Computes and caches global capacity from the node registry view.
/// Safe for concurrent callers: reads are non-blocking against the cache,
/// recomputation happens under the writer guard.
pub struct CapacityAggregator {
    registry: Arc<dyn NodeLookup>,
    cache: RwLock<Option<CachedSnapshot>>,
    interval: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl CapacityAggregator {
    pub fn new(registry: Arc<dyn NodeLookup>, interval: Duration) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            registry,
            cache: RwLock::new(None),
            interval,
            shutdown_tx,
        })
    }

    /// The full snapshot, reusing the cache when fresher than the
    /// configured interval. Registry errors surface; the stale cache is
    /// never served on error.
    pub async fn get_snapshot(&self) -> Result<CapacitySnapshot> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.taken.elapsed() < self.interval {
                    trace!("serving cached capacity snapshot");
                    return Ok(cached.snapshot.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        // another writer may have refreshed while we waited for the guard
        if let Some(cached) = cache.as_ref() {
            if cached.taken.elapsed() < self.interval {
                return Ok(cached.snapshot.clone());
            }
        }

        let snapshot = self.compute_snapshot().await?;
        *cache = Some(CachedSnapshot {
            snapshot: snapshot.clone(),
            taken: Instant::now(),
        });
        Ok(snapshot)
    }

    /// Aggregated fleet resources
    pub async fn get_global_capacity(&self) -> Result<GlobalResources> {
        Ok(self.get_snapshot().await?.resources)
    }

    /// Alias focused on the availability side of the roll-up
    pub async fn get_available_capacity(&self) -> Result<GlobalResources> {
        self.get_global_capacity().await
    }

    /// Minimum viable prediction: current capacity with the timestamp
    /// advanced by the horizon. The contract allows a real model later.
    pub async fn predict_capacity(&self, horizon: Duration) -> Result<GlobalResources> {
        let mut resources = self.get_global_capacity().await?;
        let shift = chrono::Duration::from_std(horizon).unwrap_or_else(|_| chrono::Duration::zero());
        resources.timestamp = resources.timestamp + shift;
        Ok(resources)
    }

    /// Force the next read to recompute
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Stream of fresh roll-ups, one per interval tick. The producer drops
    /// updates when the subscriber lags (latest-wins, bounded buffer); the
    /// loop exits when the receiver is dropped or the aggregator shuts
    /// down, closing the channel.
    pub fn subscribe(self: &Arc<Self>) -> mpsc::Receiver<GlobalResources> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let aggregator = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(aggregator.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => {
                        debug!("capacity subscription loop shutting down");
                        break;
                    }
                }

                let resources = match aggregator.get_global_capacity().await {
                    Ok(resources) => resources,
                    Err(e) => {
                        warn!(error = %e, "capacity recompute failed, skipping tick");
                        continue;
                    }
                };

                match tx.try_send(resources) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        trace!("subscriber lagging, dropping capacity update");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("capacity subscriber dropped, ending loop");
                        break;
                    }
                }
            }
        });

        rx
    }

    /// Stop all subscription loops
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn compute_snapshot(&self) -> Result<CapacitySnapshot> {
        let nodes = self.registry.list(&NodeFilter::all()).await?;
        debug!(node_count = nodes.len(), "recomputing capacity snapshot");

        let now = Utc::now();
        let mut resources = GlobalResources {
            timestamp: now,
            ..GlobalResources::default()
        };
        let mut contributions = Vec::with_capacity(nodes.len());

        for node in &nodes {
            resources.total_nodes += 1;
            let healthy = node.is_healthy();

            if healthy {
                resources.healthy_nodes += 1;

                resources.total_cpu += node.max_capacity.cpu_cores;
                resources.total_memory += node.max_capacity.memory_bytes;
                resources.total_disk += node.max_capacity.disk_bytes;
                resources.total_gpus += node.max_capacity.gpus.len() as u32;

                let available = node.effective_available();
                resources.available_cpu += available.cpu_cores;
                resources.available_memory += available.memory_bytes;
                resources.available_disk += available.disk_bytes;
                resources.available_gpus += available.gpus.len() as u32;

                for gpu in &node.max_capacity.gpus {
                    *resources.gpus_by_vendor.entry(gpu.vendor).or_insert(0) += 1;
                }
            }

            contributions.push(NodeContribution {
                node_id: node.id.clone(),
                healthy,
                resources: if healthy {
                    node.effective_available().clone()
                } else {
                    NodeResources::default()
                },
            });
        }

        Ok(CapacitySnapshot {
            resources,
            contributions,
            taken_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::InMemoryNodeRegistry;
    use crate::types::{GpuSpec, NodeState, NodeStatus};

    fn node(id: &str, cpus: f64, gpus: Vec<GpuSpec>, status: NodeStatus) -> NodeState {
        NodeState {
            id: id.to_string(),
            public_key: vec![],
            architecture: "x86_64".to_string(),
            status,
            last_heartbeat: Utc::now(),
            labels: HashMap::new(),
            max_capacity: NodeResources {
                cpu_cores: cpus,
                memory_bytes: 16 << 30,
                disk_bytes: 100 << 30,
                gpus,
            },
            available_capacity: NodeResources::default(),
            capability: Default::default(),
            address: None,
        }
    }

    #[tokio::test]
    async fn healthy_nodes_only_in_sums_all_in_counts() {
        let registry = InMemoryNodeRegistry::shared();
        registry.register(node("up-1", 4.0, vec![], NodeStatus::Connected)).await;
        registry.register(node("up-2", 8.0, vec![], NodeStatus::Connected)).await;
        registry
            .register(node("down", 16.0, vec![], NodeStatus::Disconnected))
            .await;

        let aggregator = CapacityAggregator::new(registry, Duration::from_secs(10));
        let capacity = aggregator.get_global_capacity().await.unwrap();

        assert_eq!(capacity.total_nodes, 3);
        assert_eq!(capacity.healthy_nodes, 2);
        assert_eq!(capacity.total_cpu, 12.0);
        assert_eq!(capacity.available_cpu, 12.0);
    }

    #[tokio::test]
    async fn gpu_vendors_counted_per_entry() {
        let registry = InMemoryNodeRegistry::shared();
        registry
            .register(node(
                "gpu-1",
                8.0,
                vec![
                    GpuSpec {
                        vendor: GpuVendor::Nvidia,
                        model: "A100".to_string(),
                        memory_mib: 40 * 1024,
                    },
                    GpuSpec {
                        vendor: GpuVendor::Amd,
                        model: "MI300".to_string(),
                        memory_mib: 192 * 1024,
                    },
                ],
                NodeStatus::Connected,
            ))
            .await;

        let aggregator = CapacityAggregator::new(registry, Duration::from_secs(10));
        let capacity = aggregator.get_global_capacity().await.unwrap();

        assert_eq!(capacity.total_gpus, 2);
        assert_eq!(capacity.gpus_by_vendor.get(&GpuVendor::Nvidia), Some(&1));
        assert_eq!(capacity.gpus_by_vendor.get(&GpuVendor::Amd), Some(&1));
    }

    #[tokio::test]
    async fn cache_reused_within_interval_and_invalidated_on_demand() {
        let registry = InMemoryNodeRegistry::shared();
        registry.register(node("n1", 4.0, vec![], NodeStatus::Connected)).await;

        let view: Arc<dyn NodeLookup> = Arc::clone(&registry) as Arc<dyn NodeLookup>;
        let aggregator = CapacityAggregator::new(view, Duration::from_secs(60));
        let first = aggregator.get_global_capacity().await.unwrap();
        assert_eq!(first.healthy_nodes, 1);

        // registered after the snapshot; the cached value hides it
        registry.register(node("n2", 4.0, vec![], NodeStatus::Connected)).await;
        let cached = aggregator.get_global_capacity().await.unwrap();
        assert_eq!(cached.healthy_nodes, 1);
        assert_eq!(cached.timestamp, first.timestamp);

        aggregator.invalidate().await;
        let fresh = aggregator.get_global_capacity().await.unwrap();
        assert_eq!(fresh.healthy_nodes, 2);
    }

    #[tokio::test]
    async fn predict_advances_timestamp_only() {
        let registry = InMemoryNodeRegistry::shared();
        registry.register(node("n1", 4.0, vec![], NodeStatus::Connected)).await;

        let aggregator = CapacityAggregator::new(registry, Duration::from_secs(10));
        let now = aggregator.get_global_capacity().await.unwrap();
        let predicted = aggregator
            .predict_capacity(Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(predicted.total_cpu, now.total_cpu);
        assert_eq!(predicted.timestamp, now.timestamp + chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn subscription_delivers_updates_and_closes_on_shutdown() {
        let registry = InMemoryNodeRegistry::shared();
        registry.register(node("n1", 4.0, vec![], NodeStatus::Connected)).await;

        let aggregator = CapacityAggregator::new(registry, Duration::from_millis(10));
        let mut rx = aggregator.subscribe();

        let update = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("update within deadline")
            .expect("channel open");
        assert_eq!(update.healthy_nodes, 1);

        aggregator.shutdown();
        // drain whatever was buffered; the channel must then close
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "channel closed after shutdown");
    }
}
