use super::{node_not_found, NodeFilter, NodeLookup};
use crate::error::Result;
use crate::types::{NodeState, NodeStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory node registry. Backs the CLI's single-process mode and the
/// deterministic test fleets; production uses a gossiped view behind the
/// same [`NodeLookup`] contract.
#[derive(Debug, Default)]
pub struct InMemoryNodeRegistry {
    nodes: RwLock<HashMap<String, NodeState>>,
}

impl InMemoryNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register or replace a node
    pub async fn register(&self, node: NodeState) {
        debug!(node_id = %node.id, "registering node");
        self.nodes.write().await.insert(node.id.clone(), node);
    }

    /// Remove a node entirely
    pub async fn remove(&self, id: &str) -> bool {
        self.nodes.write().await.remove(id).is_some()
    }

    /// Flip a node to disconnected without forgetting it
    pub async fn mark_disconnected(&self, id: &str) {
        if let Some(node) = self.nodes.write().await.get_mut(id) {
            node.status = NodeStatus::Disconnected;
        }
    }

    /// Record a heartbeat, reconnecting the node
    pub async fn touch_heartbeat(&self, id: &str) {
        if let Some(node) = self.nodes.write().await.get_mut(id) {
            node.status = NodeStatus::Connected;
            node.last_heartbeat = Utc::now();
        }
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }
}

#[async_trait]
impl NodeLookup for InMemoryNodeRegistry {
    async fn list(&self, filter: &NodeFilter) -> Result<Vec<NodeState>> {
        let nodes = self.nodes.read().await;
        Ok(nodes.values().filter(|n| filter.matches(n)).cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<NodeState> {
        let nodes = self.nodes.read().await;
        nodes.get(id).cloned().ok_or_else(|| node_not_found(id))
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<NodeState> {
        let nodes = self.nodes.read().await;
        nodes
            .values()
            .find(|n| n.id.starts_with(prefix))
            .cloned()
            .ok_or_else(|| node_not_found(prefix))
    }
}
