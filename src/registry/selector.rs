//! Allocation selector
//!
//! Picks the first idle render node, in registry order, that has not been
//! handed out within the cooldown window. Stamping `last_redirect` on the
//! chosen entry is what keeps two back-to-back allocation requests from
//! landing on the same node before its client shows up and bumps
//! `num_connected_clients`.
//!
//! This is first-fit, not load balancing: no scoring, no randomization.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use super::{RenderNodeEntry, RenderNodeRegistry};

/// Seconds a node stays ineligible after being handed out
pub const REDIRECT_COOLDOWN_SECS: i64 = 45;

/// First-fit selector with a redirect cooldown
#[derive(Debug, Clone, Copy)]
pub struct AllocationSelector {
    cooldown: Duration,
}

impl Default for AllocationSelector {
    fn default() -> Self {
        Self {
            cooldown: Duration::seconds(REDIRECT_COOLDOWN_SECS),
        }
    }
}

impl AllocationSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the cooldown window
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether `entry` may be handed out at `now`
    pub fn is_eligible(&self, entry: &RenderNodeEntry, now: DateTime<Utc>) -> bool {
        if !entry.is_idle() {
            return false;
        }
        match entry.last_redirect {
            Some(last) => now.signed_duration_since(last) >= self.cooldown,
            None => true,
        }
    }

    /// Select a node and stamp it with `now`.
    ///
    /// Returns a copy of the chosen entry as it looks after stamping, or
    /// `None` when every node is busy, not ready, or cooling down.
    pub fn select_available_node(
        &self,
        registry: &mut RenderNodeRegistry,
        now: DateTime<Utc>,
    ) -> Option<RenderNodeEntry> {
        let selected = registry
            .values_mut()
            .find(|entry| self.is_eligible(entry, now))
            .map(|entry| {
                entry.last_redirect = Some(now);
                entry.clone()
            });

        if selected.is_none() {
            warn!("No empty render nodes are available");
        }

        selected
    }

    /// Number of nodes that would be eligible at `now`, without stamping any
    pub fn count_available(&self, registry: &RenderNodeRegistry, now: DateTime<Utc>) -> usize {
        registry
            .values()
            .filter(|entry| self.is_eligible(entry, now))
            .count()
    }
}
