//! Wire protocol for the chat event channel.
//!
//! Every frame is a JSON text message `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::models::{Message, Session, TypingEvent};

pub const EVENT_QR: &str = "chat:qr";
pub const EVENT_SESSION_STATUS: &str = "chat:session_status";
pub const EVENT_MESSAGE_IN: &str = "chat:message_in";
pub const EVENT_TYPING: &str = "chat:typing";
pub const EVENT_SUBSCRIBE: &str = "chat:subscribe";
pub const EVENT_UNSUBSCRIBE: &str = "chat:unsubscribe";

/// Events delivered to router handlers.
///
/// All variants except `ConnectionLost` arrive over the wire.
/// `ConnectionLost` is raised locally when the transport drops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ChannelEvent {
    #[serde(rename = "chat:qr")]
    PairingCode(String),
    #[serde(rename = "chat:session_status")]
    SessionStatus(Session),
    #[serde(rename = "chat:message_in")]
    MessageIn(Message),
    #[serde(rename = "chat:typing")]
    Typing(TypingEvent),
    #[serde(skip)]
    ConnectionLost { reason: String },
}

/// Handler registration key, one per [`ChannelEvent`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PairingCode,
    SessionStatus,
    MessageIn,
    Typing,
    ConnectionLost,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::PairingCode,
        EventKind::SessionStatus,
        EventKind::MessageIn,
        EventKind::Typing,
        EventKind::ConnectionLost,
    ];

    /// Map an inbound wire event name. Local-only kinds have no wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            EVENT_QR => Some(Self::PairingCode),
            EVENT_SESSION_STATUS => Some(Self::SessionStatus),
            EVENT_MESSAGE_IN => Some(Self::MessageIn),
            EVENT_TYPING => Some(Self::Typing),
            _ => None,
        }
    }

    pub fn wire_name(self) -> Option<&'static str> {
        match self {
            Self::PairingCode => Some(EVENT_QR),
            Self::SessionStatus => Some(EVENT_SESSION_STATUS),
            Self::MessageIn => Some(EVENT_MESSAGE_IN),
            Self::Typing => Some(EVENT_TYPING),
            Self::ConnectionLost => None,
        }
    }
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PairingCode(_) => EventKind::PairingCode,
            Self::SessionStatus(_) => EventKind::SessionStatus,
            Self::MessageIn(_) => EventKind::MessageIn,
            Self::Typing(_) => EventKind::Typing,
            Self::ConnectionLost { .. } => EventKind::ConnectionLost,
        }
    }

    /// Decode one inbound text frame.
    ///
    /// Returns `Ok(None)` for event names this client does not handle, so the
    /// backend can add events without breaking older clients.
    pub fn decode(text: &str) -> Result<Option<Self>, ChannelError> {
        let frame: RawFrame = serde_json::from_str(text)?;
        if EventKind::from_wire(&frame.event).is_none() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(text)?))
    }

    /// Encode as a wire frame. Local-only events cannot be encoded.
    pub fn encode(&self) -> Result<String, ChannelError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
}

/// Payload of subscription requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: String,
}

/// Events sent from the client to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "chat:subscribe")]
    Subscribe(ConversationRef),
    #[serde(rename = "chat:unsubscribe")]
    Unsubscribe(ConversationRef),
    #[serde(rename = "chat:typing")]
    Typing(TypingEvent),
}

impl OutboundEvent {
    pub fn subscribe(conversation_id: impl Into<String>) -> Self {
        Self::Subscribe(ConversationRef {
            conversation_id: conversation_id.into(),
        })
    }

    pub fn unsubscribe(conversation_id: impl Into<String>) -> Self {
        Self::Unsubscribe(ConversationRef {
            conversation_id: conversation_id.into(),
        })
    }

    pub fn typing(conversation_id: impl Into<String>, is_typing: bool) -> Self {
        Self::Typing(TypingEvent {
            conversation_id: conversation_id.into(),
            is_typing,
        })
    }

    pub fn encode(&self) -> Result<String, ChannelError> {
        Ok(serde_json::to_string(self)?)
    }
}
