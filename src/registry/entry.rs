//! Render node entry - the state tracked for one control connection

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque handle for an accepted control connection.
///
/// Handed out by the control listener in increasing order; never reused
/// within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A render node as seen through its control connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderNodeEntry {
    /// Address the node reported in its `connect` message
    pub address: String,

    /// Port the node reported in its `connect` message
    pub port: u16,

    /// Clients currently attached to the node.
    ///
    /// Signed on purpose: unmatched `clientDisconnected` messages drive it
    /// below zero and nothing clamps it.
    #[serde(rename = "numConnectedClients")]
    pub num_connected_clients: i64,

    /// Whether the node's stream is attached and usable
    pub ready: bool,

    /// Last liveness signal from the node
    #[serde(rename = "lastPingReceived")]
    pub last_ping_received: DateTime<Utc>,

    /// Last time the selector handed this node out
    #[serde(rename = "lastRedirect", skip_serializing_if = "Option::is_none")]
    pub last_redirect: Option<DateTime<Utc>>,
}

impl RenderNodeEntry {
    /// Create a freshly registered entry
    pub fn new(address: impl Into<String>, port: u16, now: DateTime<Utc>) -> Self {
        Self {
            address: address.into(),
            port,
            num_connected_clients: 0,
            ready: false,
            last_ping_received: now,
            last_redirect: None,
        }
    }

    /// Set the ready flag
    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    /// Set the initial client count
    pub fn with_connected_clients(mut self, count: i64) -> Self {
        self.num_connected_clients = count;
        self
    }

    /// `address:port`, the form handed to clients
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// True if this entry was registered for the given address and port
    pub fn matches_address(&self, address: &str, port: u16) -> bool {
        self.address == address && self.port == port
    }

    /// Idle and streaming; cooldown is checked separately by the selector
    pub fn is_idle(&self) -> bool {
        self.ready && self.num_connected_clients == 0
    }
}
