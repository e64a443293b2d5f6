//! # Sync Server Library
//!
//! This library provides the authoritative server for the shared classroom
//! state. It holds the class and game collections in memory, mirrors every
//! accepted change to durable storage, and relays each change to every other
//! connected client.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! The server owns the only writable copy of the collections. Clients keep
//! replicas that start from a full snapshot and then follow the relayed
//! changes.
//!
//! ### Durability
//! After every accepted change the whole state is rewritten as one
//! pretty-printed JSON document. On startup the document is restored; a
//! missing document is created, a corrupt one is left alone and the server
//! starts empty.
//!
//! ### Relay
//! Accepted client messages are forwarded unmodified to every other open
//! connection. The sender gets no echo.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Engine
//! Connection tasks only move frames between sockets and channels. All
//! decoding, state changes, persistence and fan-out happen in one engine
//! task that handles one event at a time, so no change is ever observed half
//! applied and no locking is needed around the state.
//!
//! ### Snapshot Before Deltas
//! A connection is registered with the engine before its first frame is
//! read. The engine queues the snapshot for it while registering, so the
//! snapshot always precedes any change the client could see.
//!
//! ## Module Organization
//!
//! - `store`: the record store and its five mutations
//! - `persistence`: storage backends and the fail-soft persistence gateway
//! - `client_manager`: registry of open connections and broadcast
//! - `router`: decode, apply, persist
//! - `network`: WebSocket transport, the engine trait and the sync engine
//! - `signaling`: alternative engine relaying peer signaling messages
//! - `config`: runtime configuration
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig {
//!         port: 3000,
//!         ..ServerConfig::default()
//!     };
//!
//!     let server = Server::bind(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod network;
pub mod persistence;
pub mod router;
pub mod signaling;
pub mod store;
