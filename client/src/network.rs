use crate::replica::Replica;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info};
use shared::{AppState, SyncMessage};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("invalid message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection closed by server")]
    Closed,

    #[error("expected full_state_update, got {0}")]
    UnexpectedMessage(String),
}

/// A connection to the sync server with its local replica
pub struct SyncClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    replica: Replica,
}

impl SyncClient {
    /// Connects and waits for the initial snapshot.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        info!("Connecting to {}...", url);
        let (ws, _) = connect_async(url).await?;

        let mut client = SyncClient {
            ws,
            replica: Replica::new(),
        };

        match client.recv().await? {
            Some(SyncMessage::FullStateUpdate(state)) => {
                info!(
                    "Synced: {} classes, {} games",
                    state.classes.len(),
                    state.games.len()
                );
                Ok(client)
            }
            Some(other) => Err(ClientError::UnexpectedMessage(other.kind().to_string())),
            None => Err(ClientError::Closed),
        }
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn state(&self) -> &AppState {
        self.replica.state()
    }

    /// Sends a change and applies it locally, since the server does not echo it.
    pub async fn send(&mut self, mutation: SyncMessage) -> Result<(), ClientError> {
        self.send_text(mutation.to_json()?).await?;
        self.replica.apply(&mutation);
        Ok(())
    }

    /// Sends a raw frame without touching the replica.
    pub async fn send_text(&mut self, text: String) -> Result<(), ClientError> {
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Waits for the next message from the server and applies it.
    ///
    /// Returns `Ok(None)` once the server closes the connection.
    pub async fn recv(&mut self) -> Result<Option<SyncMessage>, ClientError> {
        while let Some(frame) = self.ws.next().await {
            match frame? {
                Message::Text(text) => {
                    let message: SyncMessage = serde_json::from_str(&text)?;
                    debug!("Received {}", message.kind());
                    self.replica.apply(&message);
                    return Ok(Some(message));
                }
                Message::Close(_) => return Ok(None),
                _ => continue,
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.ws.close(None).await?;
        Ok(())
    }
}
