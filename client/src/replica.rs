use log::warn;
use shared::{AppState, SyncMessage};

/// Client-side copy of the shared state
#[derive(Debug, Clone, Default)]
pub struct Replica {
    state: AppState,
    synced: bool,
    applied: u64,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// True once a full snapshot has been received
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Number of messages that changed the replica
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Applies a snapshot or a change, returning whether anything changed.
    pub fn apply(&mut self, message: &SyncMessage) -> bool {
        if let SyncMessage::FullStateUpdate(_) = message {
            self.synced = true;
        } else if !self.synced {
            warn!("Applying {} before the initial snapshot", message.kind());
        }

        let changed = self.state.apply(message);
        if changed {
            self.applied += 1;
        }
        changed
    }
}
