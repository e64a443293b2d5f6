use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod signaling;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_STATE_FILE: &str = "app_state.json";

/// Tags a client may submit. Anything else is dropped by the server.
pub const MUTATION_KINDS: [&str; 5] = [
    "class_add",
    "class_update",
    "class_delete",
    "game_add",
    "game_delete",
];

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClassRecord {
    #[serde(rename = "docId")]
    pub doc_id: String,
    pub title: String,
    pub content: String,
}

impl ClassRecord {
    pub fn new(doc_id: &str, title: &str, content: &str) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GameRecord {
    #[serde(rename = "docId")]
    pub doc_id: String,
    pub title: String,
}

impl GameRecord {
    pub fn new(doc_id: &str, title: &str) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            title: title.to_string(),
        }
    }
}

/// Payload of `class_update`: only the content is replaced.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClassUpdate {
    #[serde(rename = "docId")]
    pub doc_id: String,
    pub content: String,
}

/// Payload of the delete messages.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DocRef {
    #[serde(rename = "docId")]
    pub doc_id: String,
}

/// The shared document collection.
///
/// Insertion order of both collections is kept and is the order a snapshot
/// is delivered in. `docId` values come from clients and are trusted as-is:
/// adding a duplicate creates a second record, updates touch the first
/// match, deletes remove every match.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    #[serde(default)]
    pub classes: Vec<ClassRecord>,
    #[serde(default)]
    pub games: Vec<GameRecord>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&mut self, record: ClassRecord) {
        self.classes.push(record);
    }

    /// Replaces the content of the first class with `doc_id`.
    ///
    /// Returns the updated record, or None when no class matched, in which
    /// case nothing changed.
    pub fn update_class(&mut self, doc_id: &str, content: &str) -> Option<&ClassRecord> {
        let class = self.classes.iter_mut().find(|c| c.doc_id == doc_id)?;
        class.content = content.to_string();
        Some(class)
    }

    /// Removes every class with `doc_id`, returning how many were removed.
    pub fn delete_class(&mut self, doc_id: &str) -> usize {
        let before = self.classes.len();
        self.classes.retain(|c| c.doc_id != doc_id);
        before - self.classes.len()
    }

    pub fn add_game(&mut self, record: GameRecord) {
        self.games.push(record);
    }

    /// Removes every game with `doc_id`, returning how many were removed.
    pub fn delete_game(&mut self, doc_id: &str) -> usize {
        let before = self.games.len();
        self.games.retain(|g| g.doc_id != doc_id);
        before - self.games.len()
    }

    /// Deep, independent copy of the whole state.
    pub fn snapshot(&self) -> AppState {
        self.clone()
    }

    /// Applies a protocol message and reports whether it counts as a state
    /// change.
    ///
    /// Every kind is a change except `class_update` against an unknown
    /// `docId`. Deletes are a change even when nothing matched. A
    /// `full_state_update` replaces the whole state.
    pub fn apply(&mut self, message: &SyncMessage) -> bool {
        match message {
            SyncMessage::FullStateUpdate(state) => {
                *self = state.clone();
                true
            }
            SyncMessage::ClassAdd(record) => {
                self.add_class(record.clone());
                true
            }
            SyncMessage::ClassUpdate(update) => {
                self.update_class(&update.doc_id, &update.content).is_some()
            }
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
        }
    }
}

/// Every message of the state-sync protocol, encoded as
/// `{"type": "<kind>", "payload": ...}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SyncMessage {
    FullStateUpdate(AppState),
    ClassAdd(ClassRecord),
    ClassUpdate(ClassUpdate),
    ClassDelete(DocRef),
    GameAdd(GameRecord),
    GameDelete(DocRef),
}

impl SyncMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::FullStateUpdate(_) => "full_state_update",
            SyncMessage::ClassAdd(_) => "class_add",
            SyncMessage::ClassUpdate(_) => "class_update",
            SyncMessage::ClassDelete(_) => "class_delete",
            SyncMessage::GameAdd(_) => "game_add",
            SyncMessage::GameDelete(_) => "game_delete",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("message has no string `type` field")]
    MissingType,

    #[error("invalid payload for `{kind}`: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded client message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Mutation(SyncMessage),
    /// Well-formed message whose `type` is not a client mutation.
    Unrecognized(String),
}

impl Inbound {
    /// Parses one text frame sent by a client.
    ///
    /// The `type` tag is checked first so that unknown kinds are reported as
    /// [`Inbound::Unrecognized`] rather than as payload errors, while a known
    /// kind with missing or ill-typed fields fails explicitly.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(DecodeError::Json)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?
            .to_string();

        if !MUTATION_KINDS.contains(&kind.as_str()) {
            return Ok(Inbound::Unrecognized(kind));
        }

        serde_json::from_value(value)
            .map(Inbound::Mutation)
            .map_err(|source| DecodeError::Payload { kind, source })
    }
}
