//! Domain types mirrored from the messaging backend.
//!
//! The client never creates sessions or messages on its own; it only decodes
//! what the backend sends and keeps it. Wire names are camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle label of a WhatsApp pairing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    QrReady,
    Connected,
    Error,
}

impl SessionStatus {
    /// Whether the backend is expected to move from `self` to `next`.
    ///
    /// `disconnected → connecting → qr_ready → connected`, `error` from
    /// anywhere, `disconnected` back from `connected` (logout) or `error`
    /// (reset). `qr_ready` may repeat when the code is refreshed. The client
    /// mirrors unexpected transitions anyway; this only feeds diagnostics.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (_, Error)
                | (Disconnected, Connecting)
                | (Connecting, QrReady)
                | (Connecting, Connected)
                | (QrReady, Connected)
                | (Connected, Disconnected)
                | (Error, Disconnected)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::QrReady => "qr_ready",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one pairing session. Status events carry the whole snapshot,
/// never a delta, so applying the same one twice is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(id: impl Into<String>, status: SessionStatus) -> Self {
        Self {
            id: id.into(),
            connected: status == SessionStatus::Connected,
            last_activity: None,
            qr_code: None,
            status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Video,
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Customer,
    Agent,
    System,
}

/// Attachment reference for non-text messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub body: String,
    #[serde(rename = "type", default = "default_message_kind")]
    pub kind: MessageKind,
    pub sender: SenderRole,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
}

fn default_message_kind() -> MessageKind {
    MessageKind::Text
}

const PREVIEW_CHARS: usize = 80;

impl Message {
    /// Short, single-line text used as a conversation's last-message preview.
    pub fn preview(&self) -> String {
        let text = match (self.kind, self.body.trim()) {
            (MessageKind::Text, body) => body.to_string(),
            (kind, "") => format!("[{}]", kind_label(kind)),
            (kind, body) => format!("[{}] {}", kind_label(kind), body),
        };
        let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if single_line.chars().count() > PREVIEW_CHARS {
            let cut: String = single_line.chars().take(PREVIEW_CHARS).collect();
            format!("{cut}…")
        } else {
            single_line
        }
    }
}

fn kind_label(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::Image => "image",
        MessageKind::Audio => "audio",
        MessageKind::Video => "video",
        MessageKind::Document => "document",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Finished,
    Cancelled,
}

/// A customer support thread (atendimento).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub customer_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub status: ConversationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
}

/// Typing indicator for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub conversation_id: String,
    pub is_typing: bool,
}
