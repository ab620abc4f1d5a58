use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Who authored a conversation message.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Agent,
}

/// One turn's content.
///
/// User messages never change after creation. The agent message of the
/// turn in flight is overwritten in place on every observed screen change
/// and frozen once the conversation settles.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationMessage {
    pub id: u64,
    pub role: ConversationRole,
    pub content: String,
    /// Time of last mutation
    pub time: DateTime<Utc>,
}

/// Whether the agent is idle or working on a turn.
///
/// Serialized with the wire names: `Changing` goes out as `"running"`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConversationStatus {
    /// No outstanding turn, safe to send
    #[default]
    #[serde(rename = "stable")]
    Stable,
    /// A turn is in flight, sends are rejected
    #[serde(rename = "running")]
    Changing,
}

impl ConversationStatus {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            ConversationStatus::Stable => "stable",
            ConversationStatus::Changing => "running",
        }
    }
}

/// How the text of a send should reach the agent.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Conversational text, formatted into keystrokes and recorded as a turn
    User,
    /// Bytes written verbatim (control keys), outside the conversation
    Raw,
}

/// Immutable capture of the rendered screen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub screen: String,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(screen: String, taken_at: DateTime<Utc>) -> Self {
        Self { screen, taken_at }
    }
}

/// A single literal write produced by a message formatter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputPart {
    pub bytes: Vec<u8>,
    /// Pause after this write before sending the next part
    pub settle: Duration,
}

impl InputPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            bytes: text.into().into_bytes(),
            settle: Duration::ZERO,
        }
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            settle: Duration::ZERO,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ConversationStatus::Changing).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&ConversationStatus::Stable).unwrap(),
            "\"stable\""
        );
        assert_eq!(ConversationStatus::Changing.as_wire_str(), "running");
        assert_eq!(ConversationStatus::default(), ConversationStatus::Stable);
    }

    #[test]
    fn test_message_serializes_wire_shape() {
        let msg = ConversationMessage {
            id: 3,
            role: ConversationRole::Agent,
            content: "pong".to_string(),
            time: DateTime::parse_from_rfc3339("2025-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["role"], "agent");
        assert_eq!(json["content"], "pong");
        assert_eq!(json["time"], "2025-01-02T03:04:05Z");
    }

    #[test]
    fn test_message_kind_parses_lowercase() {
        let kind: MessageKind = serde_json::from_str("\"raw\"").unwrap();
        assert_eq!(kind, MessageKind::Raw);
        let kind: MessageKind = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(kind, MessageKind::User);
    }

    #[test]
    fn test_input_part_builders() {
        let part = InputPart::text("hi").with_settle(Duration::from_millis(50));
        assert_eq!(part.bytes, b"hi");
        assert_eq!(part.settle, Duration::from_millis(50));
        assert!(InputPart::bytes(Vec::new()).is_empty());
    }
}
