//! Read-only view over the external node store.
//!
//! Atlas depends only on the [`NodeLookup`] contract; production backs it
//! with a gossiped registry, tests and the CLI with [`InMemoryNodeRegistry`].

use crate::error::{NotFoundError, Result};
use crate::types::NodeState;
use async_trait::async_trait;
use std::collections::HashMap;

mod memory;

pub use memory::InMemoryNodeRegistry;

/// Predicate filters for node enumeration
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub healthy_only: bool,
    pub architecture: Option<String>,
    pub labels: HashMap<String, String>,
}

impl NodeFilter {
    /// Match everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Match only connected nodes
    pub fn healthy() -> Self {
        Self {
            healthy_only: true,
            ..Self::default()
        }
    }

    pub fn with_architecture(mut self, arch: impl Into<String>) -> Self {
        self.architecture = Some(arch.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Whether a node passes this filter
    pub fn matches(&self, node: &NodeState) -> bool {
        if self.healthy_only && !node.is_healthy() {
            return false;
        }
        if let Some(arch) = &self.architecture {
            if !node.architecture.eq_ignore_ascii_case(arch) {
                return false;
            }
        }
        self.labels
            .iter()
            .all(|(k, v)| node.labels.get(k).map(|nv| nv == v).unwrap_or(false))
    }
}

/// Contract over the external node store. Enumeration is consistent within
/// a single call; callers must not assume any ordering.
#[async_trait]
pub trait NodeLookup: Send + Sync {
    /// Enumerate known nodes passing the filter
    async fn list(&self, filter: &NodeFilter) -> Result<Vec<NodeState>>;

    /// Look up a node by exact id
    async fn get(&self, id: &str) -> Result<NodeState>;

    /// Look up the first node whose id starts with the prefix
    async fn get_by_prefix(&self, prefix: &str) -> Result<NodeState>;
}

pub(crate) fn node_not_found(id: &str) -> crate::error::AtlasError {
    NotFoundError::Node { id: id.to_string() }.into()
}
