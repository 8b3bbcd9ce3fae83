//! Control connection listener
//!
//! Accepts render node connections and runs one task per connection. Each
//! read off the socket is handed to the protocol handler as one message.
//! The connection ends on EOF, on a read error, or on the first protocol
//! error; in every case its registry entry is removed before the task exits.
//! This includes a connection dropped for a bad message: the entry goes
//! with it rather than waiting for a transport error, so a closed
//! connection never leaves an entry behind.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::{debug, error, info, warn};

use super::{handle_control_data, handle_disconnect};
use crate::registry::{ConnectionId, SharedRegistry};

/// Accept loop for render node control connections
pub struct ControlListener {
    registry: SharedRegistry,
    next_connection_id: AtomicU64,
}

impl ControlListener {
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            next_connection_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Accept connections until `shutdown` flips to true.
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn run(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        match listener.local_addr() {
            Ok(addr) => info!("Matchmaker listening on {}", addr),
            Err(e) => warn!("Matchmaker listening on unknown address: {}", e),
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let conn = self.next_id();
                        let registry = self.registry.clone();
                        tokio::spawn(handle_connection(socket, peer, conn, registry));
                    }
                    Err(e) => {
                        error!("Failed to accept control connection: {}", e);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Control listener shutting down");
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    conn: ConnectionId,
    registry: SharedRegistry,
) {
    debug!("Accepted control connection {} from {}", conn, peer);

    let mut frames = FramedRead::new(socket, BytesCodec::new());

    while let Some(frame) = frames.next().await {
        let data = match frame {
            Ok(data) => data,
            Err(e) => {
                warn!("Control connection {} from {} failed: {}", conn, peer, e);
                break;
            }
        };

        let result = {
            let mut registry = registry.write().await;
            handle_control_data(&mut registry, conn, &data, Utc::now())
        };

        if let Err(e) = result {
            warn!(
                "Protocol error on {} from {}: {} (payload: {})",
                conn,
                peer,
                e,
                String::from_utf8_lossy(&data)
            );
            info!("Ending connection to remote address {}", peer);
            break;
        }
    }

    let mut socket = frames.into_inner();
    if let Err(e) = socket.shutdown().await {
        debug!("Shutdown of {} failed: {}", conn, e);
    }

    let removed = handle_disconnect(&mut *registry.write().await, conn);
    if removed.is_none() {
        info!(
            "Disconnected machine that was not a registered render node, remote address: {}",
            peer
        );
    }
}
