//! Messages of the peer signaling relay.
//!
//! The relay assigns every peer an opaque ID, keeps everyone informed of who
//! is present, and forwards `signal` messages from one peer to another
//! without looking inside them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    /// Sent to a peer once, right after it connects.
    Id { id: String },
    /// IDs of every other connected peer, sent right after `Id`.
    AllUsers { users: Vec<String> },
    UserJoined { id: String },
    UserLeft { id: String },
    Signal {
        to: String,
        #[serde(default)]
        from: String,
        #[serde(default)]
        signal: Value,
    },
}

impl SignalMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_wire_format() {
        let json = SignalMessage::Id {
            id: "abc".to_string(),
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"id","id":"abc"}"#);

        let json = SignalMessage::AllUsers {
            users: vec!["a".to_string(), "b".to_string()],
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"all_users","users":["a","b"]}"#);
    }

    #[test]
    fn test_signal_decode() {
        let text = r#"{"type":"signal","to":"b","from":"a","signal":{"sdp":"offer"}}"#;
        let message: SignalMessage = serde_json::from_str(text).unwrap();

        match message {
            SignalMessage::Signal { to, from, signal } => {
                assert_eq!(to, "b");
                assert_eq!(from, "a");
                assert_eq!(signal["sdp"], "offer");
            }
            _ => panic!("Wrong message type after decode"),
        }
    }

    #[test]
    fn test_signal_requires_recipient() {
        let text = r#"{"type":"signal","from":"a","signal":{}}"#;
        assert!(serde_json::from_str::<SignalMessage>(text).is_err());
    }
}
