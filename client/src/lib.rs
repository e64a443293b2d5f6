//! # Sync Client Library
//!
//! This library provides a headless client for the shared classroom state.
//! It connects to the server, keeps a local replica of the class and game
//! collections, and submits changes.
//!
//! ## Architecture Overview
//!
//! ### Snapshot, Then Deltas
//! The first message on every connection is a `full_state_update` carrying
//! the whole state. Every later message is a single change submitted by
//! some other client, relayed as-is. Applying them in arrival order keeps
//! the replica equal to the server's state.
//!
//! ### Local Application
//! The server never echoes a client's own change back, so changes are
//! applied to the local replica as soon as they are sent. The replica uses
//! the same mutation rules as the server store from the shared library.
//!
//! ## Module Organization
//!
//! ### Replica Module (`replica`)
//! The local copy of the state and the bookkeeping of how it was built.
//!
//! ### Network Module (`network`)
//! WebSocket connection handling:
//! - Connecting and waiting for the initial snapshot
//! - Encoding and sending changes
//! - Receiving and applying relayed changes
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::SyncClient;
//! use shared::{ClassRecord, SyncMessage};
//!
//! # async fn example() -> Result<(), client::network::ClientError> {
//! let mut client = SyncClient::connect("ws://127.0.0.1:3000").await?;
//! println!("{} classes", client.state().classes.len());
//!
//! client
//!     .send(SyncMessage::ClassAdd(ClassRecord::new("c1", "Algebra", "intro")))
//!     .await?;
//!
//! while let Some(message) = client.recv().await? {
//!     println!("received {}", message.kind());
//! }
//! # Ok(())
//! # }
//! ```

pub mod network;
pub mod replica;
