use std::sync::Arc;

use chrono::Utc;

use crate::config::MatchmakerConfig;
use crate::registry::{AllocationSelector, RenderNodeEntry, SharedRegistry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub selector: AllocationSelector,
    pub config: Arc<MatchmakerConfig>,
}

impl AppState {
    pub fn new(registry: SharedRegistry, config: MatchmakerConfig) -> Self {
        Self {
            registry,
            selector: AllocationSelector::default(),
            config: Arc::new(config),
        }
    }

    /// Replace the allocation selector (e.g. a shorter cooldown)
    pub fn with_selector(mut self, selector: AllocationSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Hand out an idle render node, stamping it so the next caller skips it
    pub async fn allocate(&self) -> Option<RenderNodeEntry> {
        let mut registry = self.registry.write().await;
        self.selector.select_available_node(&mut registry, Utc::now())
    }

    /// Number of registered render nodes, busy or not
    pub async fn node_count(&self) -> usize {
        self.registry.read().await.len()
    }
}
