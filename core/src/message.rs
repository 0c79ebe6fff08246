/// Typed message model and the flat record form it is stored as.
use crate::identity::UserKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A typed chat message as seen by callers of the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Unique within its conversation.
    pub id: String,
    pub sender: UserKey,
    /// Display name of the sender at time of send.
    pub sender_name: String,
    /// RFC3339 timestamp string.
    pub sent_at: String,
    pub kind: MessageKind,
}

/// Message payload variants. Photo/Video carry a pre-resolved remote
/// URL — the codec never accepts raw media bytes (upload happens first,
/// through the object store).
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text(String),
    Photo(String),
    Video(String),
    Location { latitude: f64, longitude: f64 },
    // Kinds the store accepts but does not encode a payload for.
    AttributedText,
    Emoji,
    Audio,
    Contact,
    LinkPreview,
    Custom,
}

impl MessageKind {
    /// Storage tag string for this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            MessageKind::Text(_) => "text",
            MessageKind::AttributedText => "attributedText",
            MessageKind::Photo(_) => "Photo",
            MessageKind::Video(_) => "Video",
            MessageKind::Location { .. } => "location",
            MessageKind::Emoji => "emoji",
            MessageKind::Audio => "audio",
            MessageKind::Contact => "contact",
            MessageKind::LinkPreview => "linkPreview",
            MessageKind::Custom => "custom",
        }
    }
}

/// Flat stored form of a message inside a conversation's log.
///
/// Logs are append-only: records are never edited or deleted once
/// written. `is_read` is written as false and no code path updates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub date: String,
    pub sender: UserKey,
    pub is_read: bool,
    pub name: String,
}

/// Build a new message id from the two parties and the send time.
/// Shape: `<peer>_<sender>_<timestamp>_<random>`.
pub fn new_message_id(sender: &UserKey, peer: &UserKey, sent_at: &str) -> String {
    format!("{}_{}_{}_{}", peer, sender, sent_at, Uuid::new_v4().simple())
}

/// Conversation id derived from the first message of the conversation.
pub fn conversation_id_for(first_message_id: &str) -> String {
    format!("conversation_{}", first_message_id)
}
