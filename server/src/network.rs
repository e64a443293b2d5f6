//! Server network layer handling WebSocket connections and the engine loop

use crate::client_manager::{ClientManager, ConnectionId, Outbound};
use crate::config::{Mode, ServerConfig};
use crate::persistence::{FileStorage, LoadOrigin, PersistenceGateway};
use crate::router::{Disposition, Router};
use crate::signaling::SignalingRelay;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::SyncMessage;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Events sent from connection tasks to the engine loop
#[derive(Debug)]
pub enum NetworkEvent {
    Connected {
        id: ConnectionId,
        addr: SocketAddr,
        sender: Outbound,
    },
    Received {
        id: ConnectionId,
        text: String,
    },
    Disconnected {
        id: ConnectionId,
    },
}

/// Consumer of connection events.
///
/// The engine loop feeds events one at a time, in arrival order, from a
/// single task. Everything an engine owns is therefore mutated without
/// locking, and events of one connection are always seen in the order the
/// connection produced them.
pub trait Engine: Send + 'static {
    fn handle(&mut self, event: NetworkEvent);
}

/// State synchronization engine.
///
/// New connections get a `full_state_update` before anything they send is
/// processed. Accepted mutations are persisted, then re-encoded and relayed
/// to every other open connection.
pub struct SyncEngine {
    router: Router,
    clients: ClientManager,
}

impl SyncEngine {
    pub fn new(router: Router, max_clients: usize) -> Self {
        Self {
            router,
            clients: ClientManager::new(max_clients),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    fn send_snapshot(&self, id: ConnectionId) {
        match SyncMessage::FullStateUpdate(self.router.snapshot()).to_json() {
            Ok(json) => {
                self.clients.send_to(id, &json);
            }
            Err(e) => error!("Failed to encode snapshot for client {}: {}", id, e),
        }
    }
}

impl Engine for SyncEngine {
    fn handle(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Connected { id, addr, sender } => {
                if !self.clients.add_client(id, addr, sender) {
                    warn!("Rejecting client {} from {}: server full", id, addr);
                    return;
                }
                self.send_snapshot(id);
            }
            NetworkEvent::Received { id, text } => {
                if !self.clients.contains(&id) {
                    debug!("Dropping message from unregistered client {}", id);
                    return;
                }

                if let Disposition::Accepted(mutation) = self.router.route(&text) {
                    // Relay the decoded form so peers see exactly what was stored
                    let frame = match mutation.to_json() {
                        Ok(frame) => frame,
                        Err(e) => {
                            error!("Failed to encode {} for relay: {}", mutation.kind(), e);
                            return;
                        }
                    };
                    let delivered = self.clients.broadcast_to_others(&frame, Some(id));
                    debug!(
                        "Relayed {} from client {} to {} clients",
                        mutation.kind(),
                        id,
                        delivered
                    );
                }
            }
            NetworkEvent::Disconnected { id } => {
                self.clients.remove_client(&id);
            }
        }
    }
}

/// Drains events into `engine` until every sender is gone.
pub async fn run_engine<E: Engine + ?Sized>(
    mut engine: Box<E>,
    mut events: mpsc::UnboundedReceiver<NetworkEvent>,
) {
    while let Some(event) = events.recv().await {
        engine.handle(event);
    }
    debug!("Engine loop finished");
}

/// Main server accepting WebSocket connections
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, BoxError> {
        let listener = TcpListener::bind(config.address()).await?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(Server { listener, config })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Builds the engine for the configured mode, restoring state if needed
    pub fn build_engine(&self) -> Box<dyn Engine> {
        match self.config.mode {
            Mode::Sync => {
                let storage = FileStorage::new(&self.config.data_dir);
                let gateway = PersistenceGateway::new(storage, &self.config.state_file);
                let (router, origin) = Router::restore(gateway);
                if origin == LoadOrigin::Unreadable {
                    warn!("Serving from an empty state until the next accepted change");
                }
                Box::new(SyncEngine::new(router, self.config.max_clients))
            }
            Mode::Signaling => Box::new(SignalingRelay::new(self.config.max_clients)),
        }
    }

    /// Restores state and serves connections until the task is dropped
    pub async fn run(self) -> Result<(), BoxError> {
        let engine = self.build_engine();
        self.serve(engine).await
    }

    /// Accepts connections until the engine loop ends.
    ///
    /// Returns an error if the engine task panics, since no connection could
    /// be served after that.
    pub async fn serve(self, engine: Box<dyn Engine>) -> Result<(), BoxError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut engine_task = tokio::spawn(run_engine(engine, events_rx));

        info!("Server started in {:?} mode", self.config.mode);

        let mut next_id: ConnectionId = 1;
        loop {
            tokio::select! {
                finished = &mut engine_task => {
                    return match finished {
                        Ok(()) => {
                            warn!("Engine loop stopped, no longer accepting connections");
                            Ok(())
                        }
                        Err(e) => {
                            error!("Engine loop failed: {}", e);
                            Err(e.into())
                        }
                    };
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let id = next_id;
                        next_id += 1;

                        let events_tx = events_tx.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, addr, id, events_tx).await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }
    }
}

/// Runs one connection: a writer task draining the outbound queue and a
/// reader loop forwarding frames to the engine.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    id: ConnectionId,
    events: mpsc::UnboundedSender<NetworkEvent>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let (mut sink, mut source) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    // Registered before the first frame is read, so the snapshot is queued
    // ahead of any reply to this client's own messages
    if events
        .send(NetworkEvent::Connected {
            id,
            addr,
            sender: out_tx,
        })
        .is_err()
    {
        return;
    }

    tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!("Failed to write to client {}: {}", id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Dropping non-UTF-8 binary frame from client {}", id);
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Read error from client {}: {}", id, e);
                break;
            }
        };

        if events.send(NetworkEvent::Received { id, text }).is_err() {
            break;
        }
    }

    let _ = events.send(NetworkEvent::Disconnected { id });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStorage;
    use serde_json::Value;
    use shared::{AppState, ClassRecord, GameRecord};
    use tokio_test::assert_ok;

    const KEY: &str = "app_state.json";

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn engine() -> (SyncEngine, MemoryStorage) {
        let storage = MemoryStorage::new();
        let (router, _) = Router::restore(PersistenceGateway::new(storage.clone(), KEY));
        (SyncEngine::new(router, 8), storage)
    }

    fn connect(engine: &mut SyncEngine, id: ConnectionId) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        engine.handle(NetworkEvent::Connected {
            id,
            addr: test_addr(),
            sender: tx,
        });
        rx
    }

    fn receive(engine: &mut SyncEngine, id: ConnectionId, text: &str) {
        engine.handle(NetworkEvent::Received {
            id,
            text: text.to_string(),
        });
    }

    fn snapshot_of(text: &str) -> AppState {
        match serde_json::from_str(text).unwrap() {
            SyncMessage::FullStateUpdate(state) => state,
            other => panic!("Expected full_state_update, got {:?}", other),
        }
    }

    const ADD_ALGEBRA: &str =
        r#"{"type":"class_add","payload":{"docId":"c1","title":"Algebra","content":"intro"}}"#;

    #[test]
    fn test_snapshot_sent_on_connect() {
        let (mut engine, _) = engine();
        let mut rx1 = connect(&mut engine, 1);
        assert_eq!(snapshot_of(&rx1.try_recv().unwrap()), AppState::default());

        receive(&mut engine, 1, ADD_ALGEBRA);

        let mut rx2 = connect(&mut engine, 2);
        let snapshot = snapshot_of(&rx2.try_recv().unwrap());
        assert_eq!(
            snapshot.classes,
            vec![ClassRecord::new("c1", "Algebra", "intro")]
        );
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_snapshot_precedes_own_messages() {
        let (mut engine, _) = engine();
        let mut rx1 = connect(&mut engine, 1);
        receive(&mut engine, 1, ADD_ALGEBRA);

        let first: Value = serde_json::from_str(&rx1.try_recv().unwrap()).unwrap();
        assert_eq!(first["type"], "full_state_update");
        assert_eq!(first["payload"]["classes"], serde_json::json!([]));
        // No echo of the client's own mutation
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn test_relay_to_others_matches_stored_record() {
        let (mut engine, _) = engine();
        let mut rx1 = connect(&mut engine, 1);
        let mut rx2 = connect(&mut engine, 2);
        let mut rx3 = connect(&mut engine, 3);
        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            assert_ok!(rx.try_recv());
        }

        let frame = r#"{ "type": "game_add", "payload": { "docId": "g1", "title": "Quiz", "color": "red" }, "extra": true }"#;
        receive(&mut engine, 2, frame);

        let relayed = r#"{"type":"game_add","payload":{"docId":"g1","title":"Quiz"}}"#;
        assert_eq!(rx1.try_recv().unwrap(), relayed);
        assert_eq!(rx3.try_recv().unwrap(), relayed);
        assert!(rx2.try_recv().is_err());

        // A late joiner's snapshot holds the same record the live clients got
        let mut rx4 = connect(&mut engine, 4);
        let snapshot = snapshot_of(&rx4.try_recv().unwrap());
        assert_eq!(snapshot.games, vec![GameRecord::new("g1", "Quiz")]);
    }

    #[test]
    fn test_duplicate_keys_relayed_as_stored() {
        let (mut engine, _) = engine();
        let _rx1 = connect(&mut engine, 1);
        let mut rx2 = connect(&mut engine, 2);
        assert_ok!(rx2.try_recv());

        let frame = r#"{"type":"game_add","payload":{"docId":"g1","title":"Quiz","docId":"g2"}}"#;
        receive(&mut engine, 1, frame);

        // Typed decoding rejects duplicate fields, so the relay must not carry them
        let relayed: SyncMessage = serde_json::from_str(&rx2.try_recv().unwrap()).unwrap();
        assert_eq!(
            relayed,
            SyncMessage::GameAdd(GameRecord::new("g2", "Quiz"))
        );
        assert_eq!(
            engine.router().snapshot().games,
            vec![GameRecord::new("g2", "Quiz")]
        );
    }

    #[test]
    fn test_ignored_messages_not_relayed() {
        let (mut engine, storage) = engine();
        let mut rx1 = connect(&mut engine, 1);
        let mut rx2 = connect(&mut engine, 2);
        assert_ok!(rx1.try_recv());
        assert_ok!(rx2.try_recv());
        let stored = storage.get(KEY);

        receive(&mut engine, 1, "not json at all");
        receive(&mut engine, 1, r#"{"type":"chat","payload":"hi"}"#);
        receive(
            &mut engine,
            1,
            r#"{"type":"class_update","payload":{"docId":"ghost","content":"x"}}"#,
        );

        assert!(rx2.try_recv().is_err());
        assert_eq!(storage.get(KEY), stored);

        // The sender stays connected and can still submit changes
        receive(&mut engine, 1, ADD_ALGEBRA);
        assert_eq!(rx2.try_recv().unwrap(), ADD_ALGEBRA);
    }

    #[test]
    fn test_delete_of_unknown_doc_relayed() {
        let (mut engine, _) = engine();
        let _rx1 = connect(&mut engine, 1);
        let mut rx2 = connect(&mut engine, 2);
        assert_ok!(rx2.try_recv());
        let saves = engine.router().persistence().saves();

        let frame = r#"{"type":"class_delete","payload":{"docId":"ghost"}}"#;
        receive(&mut engine, 1, frame);

        assert_eq!(rx2.try_recv().unwrap(), frame);
        assert_eq!(engine.router().persistence().saves(), saves + 1);
    }

    #[test]
    fn test_closed_connection_skipped() {
        let (mut engine, _) = engine();
        let _rx1 = connect(&mut engine, 1);
        let rx2 = connect(&mut engine, 2);
        let mut rx3 = connect(&mut engine, 3);
        assert_ok!(rx3.try_recv());
        drop(rx2);

        receive(&mut engine, 1, ADD_ALGEBRA);
        assert_eq!(rx3.try_recv().unwrap(), ADD_ALGEBRA);

        engine.handle(NetworkEvent::Disconnected { id: 2 });
        assert_eq!(engine.clients().len(), 2);
    }

    #[test]
    fn test_rejected_connection_gets_nothing() {
        let storage = MemoryStorage::new();
        let (router, _) = Router::restore(PersistenceGateway::new(storage, KEY));
        let mut engine = SyncEngine::new(router, 1);

        let _rx1 = connect(&mut engine, 1);
        let mut rx2 = connect(&mut engine, 2);
        assert!(rx2.try_recv().is_err());

        receive(&mut engine, 2, ADD_ALGEBRA);
        assert!(engine.router().snapshot().classes.is_empty());
    }

    #[tokio::test]
    async fn test_engine_loop_processes_in_order() {
        let (engine, _) = engine();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        events_tx
            .send(NetworkEvent::Connected {
                id: 1,
                addr: test_addr(),
                sender: tx1,
            })
            .unwrap();
        events_tx
            .send(NetworkEvent::Connected {
                id: 2,
                addr: test_addr(),
                sender: tx2,
            })
            .unwrap();
        events_tx
            .send(NetworkEvent::Received {
                id: 1,
                text: ADD_ALGEBRA.to_string(),
            })
            .unwrap();
        drop(events_tx);

        run_engine(Box::new(engine), events_rx).await;

        assert_eq!(snapshot_of(&rx1.recv().await.unwrap()), AppState::default());
        assert_eq!(snapshot_of(&rx2.recv().await.unwrap()), AppState::default());
        assert_eq!(rx2.recv().await.unwrap(), ADD_ALGEBRA);
        // Engine dropped, so every queue is closed after its contents
        assert!(rx1.recv().await.is_none());
    }

    struct FaultyEngine;

    impl Engine for FaultyEngine {
        fn handle(&mut self, _event: NetworkEvent) {
            panic!("engine fault");
        }
    }

    #[tokio::test]
    async fn test_serve_stops_when_engine_panics() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let serving = tokio::spawn(server.serve(Box::new(FaultyEngine)));

        let _ws = assert_ok!(tokio_tungstenite::connect_async(format!("ws://{}", addr)).await);

        let result = tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .expect("serve kept running after the engine died")
            .unwrap();
        assert!(result.is_err());
    }
}
