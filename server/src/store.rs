use log::info;
use shared::{AppState, ClassRecord, GameRecord, SyncMessage};

/// Authoritative holder of the shared [`AppState`].
///
/// Only the router mutates it, one message at a time. Connections only ever
/// see copies produced by [`RecordStore::snapshot`] or the relayed messages.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    state: AppState,
}

impl RecordStore {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn snapshot(&self) -> AppState {
        self.state.snapshot()
    }

    pub fn add_class(&mut self, record: ClassRecord) {
        info!("Class added: {}", record.title);
        self.state.add_class(record);
    }

    /// Returns false when no class has `doc_id`.
    pub fn update_class(&mut self, doc_id: &str, content: &str) -> bool {
        match self.state.update_class(doc_id, content) {
            Some(class) => {
                info!("Class updated: {}", class.title);
                true
            }
            None => false,
        }
    }

    pub fn delete_class(&mut self, doc_id: &str) {
        let removed = self.state.delete_class(doc_id);
        info!("Class deleted: {} ({} removed)", doc_id, removed);
    }

    pub fn add_game(&mut self, record: GameRecord) {
        info!("Game added: {}", record.title);
        self.state.add_game(record);
    }

    pub fn delete_game(&mut self, doc_id: &str) {
        let removed = self.state.delete_game(doc_id);
        info!("Game deleted: {} ({} removed)", doc_id, removed);
    }

    /// Applies one client mutation, returning whether it was accepted.
    ///
    /// A `full_state_update` is never accepted from a client.
    pub fn apply(&mut self, mutation: &SyncMessage) -> bool {
        match mutation {
            SyncMessage::ClassAdd(record) => {
                self.add_class(record.clone());
                true
            }
            SyncMessage::ClassUpdate(update) => self.update_class(&update.doc_id, &update.content),
            SyncMessage::ClassDelete(doc) => {
                self.delete_class(&doc.doc_id);
                true
            }
            SyncMessage::GameAdd(record) => {
                self.add_game(record.clone());
                true
            }
            SyncMessage::GameDelete(doc) => {
                self.delete_game(&doc.doc_id);
                true
            }
            SyncMessage::FullStateUpdate(_) => false,
        }
    }
}
