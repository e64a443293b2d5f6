//! Decoding, application and persistence of client mutations
//!
//! Each inbound text frame is handled as one unit: decode, apply to the
//! record store, and on acceptance save the whole state before reporting
//! back. The caller relays accepted frames to the other connections.

use crate::persistence::{LoadOrigin, PersistenceGateway};
use crate::store::RecordStore;
use log::{debug, warn};
use shared::{AppState, DecodeError, Inbound, SyncMessage};

/// Why an inbound frame caused no change
#[derive(Debug)]
pub enum Ignored {
    Malformed(DecodeError),
    /// Well-formed, but not a client mutation
    Unrecognized(String),
    /// `class_update` for a `docId` with no class
    UnknownDoc(String),
}

/// What happened to an inbound frame
#[derive(Debug)]
pub enum Disposition {
    /// Applied and persisted (or persistence failed and was logged).
    /// Relay the original frame to the other clients.
    Accepted(SyncMessage),
    Ignored(Ignored),
}

impl Disposition {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Disposition::Accepted(_))
    }
}

pub struct Router {
    store: RecordStore,
    persistence: PersistenceGateway,
}

impl Router {
    pub fn new(store: RecordStore, persistence: PersistenceGateway) -> Self {
        Self { store, persistence }
    }

    /// Builds a router over the state restored by `persistence`.
    pub fn restore(mut persistence: PersistenceGateway) -> (Self, LoadOrigin) {
        let (state, origin) = persistence.load();
        (Self::new(RecordStore::new(state), persistence), origin)
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn persistence(&self) -> &PersistenceGateway {
        &self.persistence
    }

    pub fn snapshot(&self) -> AppState {
        self.store.snapshot()
    }

    pub fn route(&mut self, text: &str) -> Disposition {
        let mutation = match Inbound::decode(text) {
            Ok(Inbound::Mutation(mutation)) => mutation,
            Ok(Inbound::Unrecognized(kind)) => {
                debug!("Ignoring message of type {}", kind);
                return Disposition::Ignored(Ignored::Unrecognized(kind));
            }
            Err(e) => {
                warn!("Error processing message: {}", e);
                return Disposition::Ignored(Ignored::Malformed(e));
            }
        };

        if !self.store.apply(&mutation) {
            let doc_id = match &mutation {
                SyncMessage::ClassUpdate(update) => update.doc_id.clone(),
                _ => String::new(),
            };
            debug!("Ignoring {} for unknown docId {:?}", mutation.kind(), doc_id);
            return Disposition::Ignored(Ignored::UnknownDoc(doc_id));
        }

        if let Err(e) = self.persistence.save(self.store.state()) {
            warn!(
                "Failed to persist state after {}: {}; continuing in memory",
                mutation.kind(),
                e
            );
        }

        Disposition::Accepted(mutation)
    }
}
