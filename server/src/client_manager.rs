//! Registry of open client connections and fan-out of outgoing messages
//!
//! This module tracks every live connection together with the channel that
//! feeds its socket writer. It knows nothing about the shared state; callers
//! hand it already-encoded text frames to deliver to one client, to
//! everyone, or to everyone except the sender of a mutation.
//!
//! Broadcasts copy the list of open connections before sending, so a
//! connection closing mid-broadcast is simply skipped.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;

/// Server-assigned identifier of one connection
pub type ConnectionId = u64;

/// Queue of text frames waiting to be written to a connection's socket
pub type Outbound = mpsc::UnboundedSender<String>;

/// A registered connection
#[derive(Debug)]
pub struct Client {
    pub id: ConnectionId,
    /// Remote address, for logging
    pub addr: SocketAddr,
    pub connected_at: Instant,
    sender: Outbound,
}

impl Client {
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: Outbound) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            sender,
        }
    }

    /// True while the connection's writer is still draining its queue
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queues a frame. Returns false if the connection has gone away.
    pub fn send(&self, text: &str) -> bool {
        self.sender.send(text.to_string()).is_ok()
    }
}

/// Tracks open connections up to a fixed capacity
pub struct ClientManager {
    clients: HashMap<ConnectionId, Client>,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
        }
    }

    /// Registers a connection.
    ///
    /// Returns false when the registry is at capacity or `id` is already
    /// taken; the sender is dropped and the connection's writer closes the
    /// socket. A registered connection is never replaced.
    pub fn add_client(&mut self, id: ConnectionId, addr: SocketAddr, sender: Outbound) -> bool {
        if self.clients.len() >= self.max_clients {
            return false;
        }
        if self.clients.contains_key(&id) {
            warn!("Client id {} is already registered", id);
            return false;
        }

        info!("Client {} connected from {}", id, addr);
        self.clients.insert(id, Client::new(id, addr, sender));
        true
    }

    /// Returns true if the connection was registered.
    pub fn remove_client(&mut self, id: &ConnectionId) -> bool {
        match self.clients.remove(id) {
            Some(client) => {
                info!(
                    "Client {} disconnected after {:?}",
                    client.id,
                    client.connected_at.elapsed()
                );
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.clients.contains_key(id)
    }

    /// Sends to a single connection. Returns false if it is unknown or closed.
    pub fn send_to(&self, id: ConnectionId, text: &str) -> bool {
        match self.clients.get(&id) {
            Some(client) => client.send(text),
            None => false,
        }
    }

    /// Copies out the currently open connections.
    pub fn open_clients(&self) -> Vec<(ConnectionId, Outbound)> {
        self.clients
            .values()
            .filter(|client| client.is_open())
            .map(|client| (client.id, client.sender.clone()))
            .collect()
    }

    /// Delivers `text` to every open connection except `exclude`.
    ///
    /// Returns how many connections accepted the frame.
    pub fn broadcast_to_others(&self, text: &str, exclude: Option<ConnectionId>) -> usize {
        let recipients = self.open_clients();
        let mut delivered = 0;

        for (id, sender) in recipients {
            if Some(id) == exclude {
                continue;
            }

            if sender.send(text.to_string()).is_ok() {
                delivered += 1;
            } else {
                debug!("Client {} closed before broadcast, skipping", id);
            }
        }

        delivered
    }

    pub fn broadcast(&self, text: &str) -> usize {
        self.broadcast_to_others(text, None)
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.clients.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
