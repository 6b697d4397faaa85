//! Capacity aggregator invariants: monotonicity under fleet growth,
//! snapshot freshness, failure semantics, and subscription ordering.

mod common;

use async_trait::async_trait;
use atlas::api::*;
use atlas::error::{CapacityError, Result as AtlasResult};
use atlas::types::{GpuVendor, NodeState};
use chrono::Utc;
use common::*;
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wraps the in-memory registry with a failure switch
struct ToggleRegistry {
    inner: Arc<InMemoryNodeRegistry>,
    failing: AtomicBool,
}

impl ToggleRegistry {
    fn new(inner: Arc<InMemoryNodeRegistry>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl NodeLookup for ToggleRegistry {
    async fn list(&self, filter: &NodeFilter) -> AtlasResult<Vec<NodeState>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CapacityError::RegistryUnavailable {
                reason: "simulated outage".to_string(),
            }
            .into());
        }
        self.inner.list(filter).await
    }

    async fn get(&self, id: &str) -> AtlasResult<NodeState> {
        self.inner.get(id).await
    }

    async fn get_by_prefix(&self, prefix: &str) -> AtlasResult<NodeState> {
        self.inner.get_by_prefix(prefix).await
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn growing_the_healthy_set_never_shrinks_capacity(
        initial in 0usize..8,
        joined in 1usize..6,
        cpus in 1u8..32,
        gpu_nodes in 0usize..3,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let registry = InMemoryNodeRegistry::shared();
            for i in 0..initial {
                registry.register(node(&format!("old-{i}")).cpus(cpus as f64).build()).await;
            }
            let aggregator = CapacityAggregator::new(
                Arc::clone(&registry) as Arc<dyn atlas::fleet::NodeLookup>,
                Duration::from_secs(60),
            );
            let before = aggregator.get_global_capacity().await.unwrap();

            for i in 0..joined {
                let mut builder = node(&format!("new-{i}")).cpus(cpus as f64);
                if i < gpu_nodes {
                    builder = builder.gpu(GpuVendor::Nvidia, "L40", 48 * 1024);
                }
                registry.register(builder.build()).await;
            }
            aggregator.invalidate().await;
            let after = aggregator.get_global_capacity().await.unwrap();

            prop_assert!(after.total_cpu >= before.total_cpu);
            prop_assert!(after.available_cpu >= before.available_cpu);
            prop_assert!(after.total_memory >= before.total_memory);
            prop_assert!(after.available_memory >= before.available_memory);
            prop_assert!(after.total_disk >= before.total_disk);
            prop_assert!(after.total_gpus >= before.total_gpus);
            prop_assert!(after.available_gpus >= before.available_gpus);
            prop_assert!(after.total_nodes >= before.total_nodes);
            prop_assert!(after.healthy_nodes >= before.healthy_nodes);
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn stale_snapshot_is_recomputed_with_current_timestamp() {
    let registry = fleet(vec![node("n1")]).await;
    // zero interval: every read recomputes
    let aggregator = CapacityAggregator::new(
        registry,
        Duration::from_secs(0),
    );

    let first = aggregator.get_global_capacity().await.unwrap();
    let t = Utc::now();
    let second = aggregator.get_global_capacity().await.unwrap();
    assert!(second.timestamp >= t);
    assert!(second.timestamp >= first.timestamp);
}

#[tokio::test]
async fn registry_failure_is_not_papered_over_with_stale_data() {
    let inner = fleet(vec![node("n1"), node("n2")]).await;
    let toggle = Arc::new(ToggleRegistry::new(inner));
    let aggregator = CapacityAggregator::new(
        Arc::clone(&toggle) as Arc<dyn atlas::fleet::NodeLookup>,
        Duration::from_secs(0),
    );

    let healthy = aggregator.get_global_capacity().await.unwrap();
    assert_eq!(healthy.healthy_nodes, 2);

    toggle.fail();
    let err = aggregator.get_global_capacity().await.unwrap_err();
    assert!(
        matches!(err, atlas::error::AtlasError::Capacity(_)),
        "got {err:?}"
    );
}

#[tokio::test]
async fn available_capacity_prefers_advertised_availability() {
    let registry = fleet(vec![
        // advertises that half the node is already in use
        node("busy").cpus(8.0).mem_gib(32).available(4.0, 16),
        // no availability report: falls back to max
        node("fresh").cpus(4.0).mem_gib(16),
    ])
    .await;
    let aggregator = CapacityAggregator::new(
        registry,
        Duration::from_secs(60),
    );

    let capacity = aggregator.get_global_capacity().await.unwrap();
    assert_eq!(capacity.total_cpu, 12.0);
    assert_eq!(capacity.available_cpu, 8.0);
    assert_eq!(capacity.total_memory, 48 << 30);
    assert_eq!(capacity.available_memory, 32 << 30);
}

#[tokio::test]
async fn snapshot_lists_contributions_for_every_node() {
    let registry = fleet(vec![node("up"), node("down").disconnected()]).await;
    let aggregator = CapacityAggregator::new(
        registry,
        Duration::from_secs(60),
    );

    let snapshot = aggregator.get_snapshot().await.unwrap();
    assert_eq!(snapshot.contributions.len(), 2);
    let down = snapshot
        .contributions
        .iter()
        .find(|c| c.node_id == "down")
        .unwrap();
    assert!(!down.healthy);
    assert!(down.resources.is_zero());
}

#[tokio::test]
async fn subscribers_see_updates_in_timestamp_order() {
    let registry = fleet(vec![node("n1")]).await;
    let aggregator = CapacityAggregator::new(
        registry,
        Duration::from_millis(5),
    );

    let mut rx = aggregator.subscribe();
    let mut timestamps = Vec::new();
    for _ in 0..4 {
        let update = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("update within deadline")
            .expect("channel open");
        timestamps.push(update.timestamp);
    }
    aggregator.shutdown();

    for window in timestamps.windows(2) {
        assert!(window[1] >= window[0], "updates observed out of order");
    }
}
