//! Peer signaling relay
//!
//! A stateless alternative to the sync engine: peers are given random IDs,
//! told who else is present, and may address `signal` messages to each
//! other by ID. Nothing is stored or persisted.

use crate::client_manager::{ClientManager, ConnectionId};
use crate::network::{Engine, NetworkEvent};
use log::{debug, error, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::signaling::SignalMessage;
use std::collections::HashMap;

const PEER_ID_LEN: usize = 9;

pub struct SignalingRelay {
    clients: ClientManager,
    peers: HashMap<String, ConnectionId>,
    names: HashMap<ConnectionId, String>,
}

impl SignalingRelay {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: ClientManager::new(max_clients),
            peers: HashMap::new(),
            names: HashMap::new(),
        }
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn peer_id(&self, id: ConnectionId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    fn generate_peer_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let candidate: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(PEER_ID_LEN)
                .map(char::from)
                .collect();
            if !self.peers.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn send(&self, id: ConnectionId, message: &SignalMessage) {
        match message.to_json() {
            Ok(json) => {
                self.clients.send_to(id, &json);
            }
            Err(e) => error!("Failed to encode signaling message: {}", e),
        }
    }

    fn broadcast_except(&self, message: &SignalMessage, exclude: ConnectionId) {
        match message.to_json() {
            Ok(json) => {
                self.clients.broadcast_to_others(&json, Some(exclude));
            }
            Err(e) => error!("Failed to encode signaling message: {}", e),
        }
    }

    fn on_connect(&mut self, id: ConnectionId) {
        let peer_id = self.generate_peer_id();
        info!("Peer {} joined on connection {}", peer_id, id);

        let others: Vec<String> = self
            .names
            .iter()
            .filter(|(conn, _)| **conn != id)
            .map(|(_, name)| name.clone())
            .collect();

        self.peers.insert(peer_id.clone(), id);
        self.names.insert(id, peer_id.clone());

        self.send(id, &SignalMessage::Id { id: peer_id.clone() });
        self.send(id, &SignalMessage::AllUsers { users: others });
        self.broadcast_except(&SignalMessage::UserJoined { id: peer_id }, id);
    }

    fn on_message(&self, id: ConnectionId, text: &str) {
        match serde_json::from_str::<SignalMessage>(text) {
            Ok(SignalMessage::Signal { to, .. }) => match self.peers.get(&to) {
                Some(&target) => {
                    self.clients.send_to(target, text);
                }
                None => debug!("Dropping signal for unknown peer {}", to),
            },
            Ok(_) => debug!("Ignoring non-signal message from connection {}", id),
            Err(e) => warn!("Error processing message from connection {}: {}", id, e),
        }
    }

    fn on_disconnect(&mut self, id: ConnectionId) {
        self.clients.remove_client(&id);

        if let Some(peer_id) = self.names.remove(&id) {
            self.peers.remove(&peer_id);
            info!("Peer {} left", peer_id);
            self.broadcast_except(&SignalMessage::UserLeft { id: peer_id }, id);
        }
    }
}

impl Engine for SignalingRelay {
    fn handle(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Connected { id, addr, sender } => {
                if self.clients.add_client(id, addr, sender) {
                    self.on_connect(id);
                } else {
                    warn!("Rejecting connection {} from {}: server full", id, addr);
                }
            }
            NetworkEvent::Received { id, text } => {
                if self.clients.contains(&id) {
                    self.on_message(id, &text);
                }
            }
            NetworkEvent::Disconnected { id } => self.on_disconnect(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn connect(
        relay: &mut SignalingRelay,
        id: ConnectionId,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.handle(NetworkEvent::Connected {
            id,
            addr: test_addr(),
            sender: tx,
        });

        let peer_id = match serde_json::from_str(&rx.try_recv().unwrap()).unwrap() {
            SignalMessage::Id { id } => id,
            other => panic!("Expected id message, got {:?}", other),
        };
        (peer_id, rx)
    }

    fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> SignalMessage {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn test_presence_messages() {
        let mut relay = SignalingRelay::new(8);

        let (alice, mut alice_rx) = connect(&mut relay, 1);
        assert_eq!(alice.len(), PEER_ID_LEN);
        assert_eq!(next(&mut alice_rx), SignalMessage::AllUsers { users: vec![] });

        let (bob, mut bob_rx) = connect(&mut relay, 2);
        assert_ne!(alice, bob);
        assert_eq!(
            next(&mut bob_rx),
            SignalMessage::AllUsers {
                users: vec![alice.clone()]
            }
        );
        assert_eq!(
            next(&mut alice_rx),
            SignalMessage::UserJoined { id: bob.clone() }
        );

        relay.handle(NetworkEvent::Disconnected { id: 2 });
        assert_eq!(next(&mut alice_rx), SignalMessage::UserLeft { id: bob });
        assert!(relay.peer_id(2).is_none());
        assert_eq!(relay.clients().len(), 1);
    }

    #[test]
    fn test_signal_forwarded_verbatim() {
        let mut relay = SignalingRelay::new(8);
        let (alice, mut alice_rx) = connect(&mut relay, 1);
        let (bob, mut bob_rx) = connect(&mut relay, 2);
        let (_carol, mut carol_rx) = connect(&mut relay, 3);
        while alice_rx.try_recv().is_ok() {}
        while bob_rx.try_recv().is_ok() {}
        while carol_rx.try_recv().is_ok() {}

        let text = json!({"type": "signal", "to": bob, "from": alice, "signal": {"sdp": "offer"}})
            .to_string();
        relay.handle(NetworkEvent::Received { id: 1, text: text.clone() });

        assert_eq!(bob_rx.try_recv().unwrap(), text);
        assert!(alice_rx.try_recv().is_err());
        assert!(carol_rx.try_recv().is_err());
    }

    #[test]
    fn test_signal_to_unknown_peer_dropped() {
        let mut relay = SignalingRelay::new(8);
        let (alice, mut alice_rx) = connect(&mut relay, 1);
        let (_bob, mut bob_rx) = connect(&mut relay, 2);
        while alice_rx.try_recv().is_ok() {}
        while bob_rx.try_recv().is_ok() {}

        let text = json!({"type": "signal", "to": "nobody", "from": alice, "signal": {}}).to_string();
        relay.handle(NetworkEvent::Received { id: 1, text });
        relay.handle(NetworkEvent::Received {
            id: 1,
            text: "garbage".to_string(),
        });

        assert!(alice_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_err());
    }
}
