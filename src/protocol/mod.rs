//! Render node control protocol
//!
//! Render nodes keep a TCP connection open to the matchmaker and push small
//! JSON objects over it, one object per read. Every object carries a `type`:
//!
//! | type                   | effect on the connection's entry        |
//! |------------------------|-----------------------------------------|
//! | `connect`              | create, or replace a stale registration |
//! | `streamerConnected`    | `ready = true`                          |
//! | `streamerDisconnected` | `ready = false`                         |
//! | `clientConnected`      | `numConnectedClients += 1`              |
//! | `clientDisconnected`   | `numConnectedClients -= 1`              |
//! | `ping`                 | refresh `lastPingReceived`              |
//!
//! Anything else, including a non-`connect` message on a connection that
//! never registered, is a [`ProtocolError`] and ends the connection. Nothing
//! is sent back to the node.

pub mod listener;

pub use listener::ControlListener;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::registry::{ConnectionId, RenderNodeEntry, RenderNodeRegistry};

/// Errors that end a control connection
#[derive(Error, Debug, PartialEq)]
pub enum ProtocolError {
    #[error("Failed to parse control message: {0}")]
    Malformed(String),

    #[error("Control message has no 'type' field")]
    MissingType,

    #[error("Unknown control message type '{0}'")]
    UnknownType(String),

    #[error("Invalid '{message_type}' message: {reason}")]
    InvalidMessage {
        message_type: String,
        reason: String,
    },

    #[error("'{message_type}' received on {conn}, which never sent 'connect'")]
    NotRegistered {
        message_type: &'static str,
        conn: ConnectionId,
    },
}

/// Registration payload of a `connect` message
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectMessage {
    pub address: String,
    pub port: u16,

    /// Only a literal `true` counts; absent or any other value is false
    #[serde(default, deserialize_with = "literal_true")]
    pub ready: bool,

    /// Set by a node that reconnects while a player is still attached
    #[serde(default, rename = "playerConnected", deserialize_with = "literal_true")]
    pub player_connected: bool,
}

fn literal_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(matches!(value, Value::Bool(true)))
}

/// A decoded control message
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Connect(ConnectMessage),
    StreamerConnected,
    StreamerDisconnected,
    ClientConnected,
    ClientDisconnected,
    Ping,
}

impl ControlMessage {
    /// Wire name of the message type
    pub fn type_name(&self) -> &'static str {
        match self {
            ControlMessage::Connect(_) => "connect",
            ControlMessage::StreamerConnected => "streamerConnected",
            ControlMessage::StreamerDisconnected => "streamerDisconnected",
            ControlMessage::ClientConnected => "clientConnected",
            ControlMessage::ClientDisconnected => "clientDisconnected",
            ControlMessage::Ping => "ping",
        }
    }
}

/// What an accepted message did to the registry
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// A `connect` created an entry; `replaced` is the connection whose
    /// registration for the same address was dropped
    Registered { replaced: Option<ConnectionId> },

    /// The connection's existing entry was updated
    Updated,
}

// ============================================================================
// Parsing
// ============================================================================

/// Decode one inbound chunk.
///
/// The chunk must hold exactly one JSON object; partial or concatenated
/// objects are rejected as malformed.
pub fn parse_control_message(data: &[u8]) -> Result<ControlMessage, ProtocolError> {
    let value: Value =
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let message_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    debug!("Control message type: {}", message_type);

    match message_type.as_str() {
        "connect" => serde_json::from_value(value)
            .map(ControlMessage::Connect)
            .map_err(|e| ProtocolError::InvalidMessage {
                message_type: message_type.clone(),
                reason: e.to_string(),
            }),
        "streamerConnected" => Ok(ControlMessage::StreamerConnected),
        "streamerDisconnected" => Ok(ControlMessage::StreamerDisconnected),
        "clientConnected" => Ok(ControlMessage::ClientConnected),
        "clientDisconnected" => Ok(ControlMessage::ClientDisconnected),
        "ping" => Ok(ControlMessage::Ping),
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}

// ============================================================================
// Registry mutations
// ============================================================================

/// Apply a decoded message from `conn` to the registry.
///
/// On error the registry is left exactly as it was.
pub fn apply_control_message(
    registry: &mut RenderNodeRegistry,
    conn: ConnectionId,
    message: ControlMessage,
    now: DateTime<Utc>,
) -> Result<MessageOutcome, ProtocolError> {
    let message_type = message.type_name();

    match message {
        ControlMessage::Connect(connect) => Ok(register_node(registry, conn, connect, now)),
        ControlMessage::StreamerConnected => {
            let entry = registered_entry(registry, conn, message_type)?;
            entry.ready = true;
            info!("Render node {} ready for use", entry.endpoint());
            Ok(MessageOutcome::Updated)
        }
        ControlMessage::StreamerDisconnected => {
            let entry = registered_entry(registry, conn, message_type)?;
            entry.ready = false;
            info!("Render node {} no longer ready for use", entry.endpoint());
            Ok(MessageOutcome::Updated)
        }
        ControlMessage::ClientConnected => {
            let entry = registered_entry(registry, conn, message_type)?;
            entry.num_connected_clients += 1;
            info!("Client connected to render node {}", entry.endpoint());
            Ok(MessageOutcome::Updated)
        }
        ControlMessage::ClientDisconnected => {
            let entry = registered_entry(registry, conn, message_type)?;
            entry.num_connected_clients -= 1;
            info!("Client disconnected from render node {}", entry.endpoint());
            Ok(MessageOutcome::Updated)
        }
        ControlMessage::Ping => {
            let entry = registered_entry(registry, conn, message_type)?;
            entry.last_ping_received = now;
            debug!("Ping from render node {}", entry.endpoint());
            Ok(MessageOutcome::Updated)
        }
    }
}

/// Parse and apply one inbound chunk
pub fn handle_control_data(
    registry: &mut RenderNodeRegistry,
    conn: ConnectionId,
    data: &[u8],
    now: DateTime<Utc>,
) -> Result<MessageOutcome, ProtocolError> {
    let message = parse_control_message(data)?;
    apply_control_message(registry, conn, message, now)
}

/// Drop the entry of a connection that closed or failed
pub fn handle_disconnect(
    registry: &mut RenderNodeRegistry,
    conn: ConnectionId,
) -> Option<RenderNodeEntry> {
    let removed = registry.remove(conn);
    match &removed {
        Some(entry) => info!(
            "Render node {} disconnected from matchmaker",
            entry.endpoint()
        ),
        None => debug!("{} closed without a registered render node", conn),
    }
    removed
}

fn registered_entry<'a>(
    registry: &'a mut RenderNodeRegistry,
    conn: ConnectionId,
    message_type: &'static str,
) -> Result<&'a mut RenderNodeEntry, ProtocolError> {
    registry
        .get_mut(conn)
        .ok_or(ProtocolError::NotRegistered { message_type, conn })
}

/// Register `conn`, dropping any older connection that claimed the same
/// address and port.
///
/// The new entry takes its client count from the message alone; whatever
/// the replaced entry had counted is discarded.
fn register_node(
    registry: &mut RenderNodeRegistry,
    conn: ConnectionId,
    connect: ConnectMessage,
    now: DateTime<Utc>,
) -> MessageOutcome {
    let initial_clients = if connect.player_connected { 1 } else { 0 };
    let candidate = RenderNodeEntry::new(connect.address, connect.port, now)
        .with_ready(connect.ready)
        .with_connected_clients(initial_clients);

    let replaced = registry
        .find_by_address_excluding(&candidate.address, candidate.port, conn)
        .map(|(old, _)| old);

    match replaced {
        Some(old) => info!(
            "RECONNECT: render node {} already registered on {}, replacing with {} (playerConnected: {})",
            candidate.endpoint(),
            old,
            conn,
            connect.player_connected
        ),
        None => info!(
            "Adding render node {} on {} (playerConnected: {})",
            candidate.endpoint(),
            conn,
            connect.player_connected
        ),
    }

    registry.upsert(conn, candidate);
    if let Some(old) = replaced {
        registry.remove(old);
    }

    MessageOutcome::Registered { replaced }
}
