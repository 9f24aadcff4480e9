//! Chat state store: per-conversation messages, mirrored session status and
//! the pending pairing code.
//!
//! The store is an explicit object handed to the reconciler (and to whatever
//! renders it), so independent clients and tests each get their own state.
//! Every mutation is announced on a broadcast channel; renderers subscribe and
//! re-read what they need.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::{Conversation, Message, Session, SessionStatus};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// What to do with a message whose id is already in its conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Append it again. The backend does not promise at-most-once delivery,
    /// so duplicates are visible to the caller.
    #[default]
    Append,
    /// Drop messages whose id was already admitted for that conversation.
    SkipKnownIds,
}

/// Notification of a store mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    QrCode(Option<String>),
    SessionStatus(Session),
    MessageAdded {
        conversation_id: String,
        message_id: String,
    },
    Typing {
        conversation_id: String,
        is_typing: bool,
    },
    ConversationUpdated(String),
}

#[derive(Default)]
struct StoreState {
    qr_code: Option<String>,
    session: Option<Session>,
    messages: HashMap<String, Vec<Message>>,
    seen_ids: HashMap<String, HashSet<String>>,
    typing: HashMap<String, bool>,
    conversations: HashMap<String, Conversation>,
}

pub struct ChatStore {
    state: RwLock<StoreState>,
    duplicates: DuplicatePolicy,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        Self::with_duplicate_policy(DuplicatePolicy::default())
    }

    pub fn with_duplicate_policy(duplicates: DuplicatePolicy) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            duplicates,
            changes,
        }
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicates
    }

    /// Subscribe to mutation notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is normal (headless use, tests).
        let _ = self.changes.send(change);
    }

    // ── pairing code ────────────────────────────────────────────────────

    /// Set or clear the pending pairing code.
    ///
    /// A new code is refused while the last observed session is connected:
    /// a code only means something before pairing completes. Returns whether
    /// the stored value changed.
    pub fn set_qr_code(&self, code: Option<String>) -> bool {
        let mut state = self.state.write();
        if code.is_some() && state.session.as_ref().is_some_and(|s| s.connected) {
            warn!("ignoring pairing code while session is connected");
            return false;
        }
        if state.qr_code == code {
            return false;
        }
        state.qr_code = code.clone();
        drop(state);
        self.notify(StoreChange::QrCode(code));
        true
    }

    pub fn qr_code(&self) -> Option<String> {
        self.state.read().qr_code.clone()
    }

    // ── session status ──────────────────────────────────────────────────

    /// Mirror a session snapshot.
    ///
    /// Under the same write lock: a connected snapshot clears the pending
    /// pairing code, and a `qr_ready` snapshot that carries its own code
    /// replaces the pending one.
    pub fn set_whatsapp_status(&self, session: Session) {
        let mut state = self.state.write();
        if let Some(prev) = &state.session {
            if !prev.status.can_transition_to(session.status) {
                warn!(
                    session = %session.id,
                    from = %prev.status,
                    to = %session.status,
                    "unexpected session status transition"
                );
            }
        }

        let previous_code = state.qr_code.clone();
        if session.connected {
            state.qr_code = None;
        } else if session.status == SessionStatus::QrReady && session.qr_code.is_some() {
            state.qr_code = session.qr_code.clone();
        }
        let code_changed = state.qr_code != previous_code;
        let new_code = state.qr_code.clone();

        debug!(
            session = %session.id,
            status = %session.status,
            connected = session.connected,
            "session status mirrored"
        );
        state.session = Some(session.clone());
        drop(state);

        self.notify(StoreChange::SessionStatus(session));
        if code_changed {
            self.notify(StoreChange::QrCode(new_code));
        }
    }

    pub fn whatsapp_status(&self) -> Option<Session> {
        self.state.read().session.clone()
    }

    pub fn is_whatsapp_connected(&self) -> bool {
        self.state
            .read()
            .session
            .as_ref()
            .is_some_and(|s| s.connected)
    }

    /// Mark the mirrored session as disconnected after the transport dropped.
    ///
    /// The backend re-emits the real status once the channel is back; until
    /// then the session is shown as disconnected. An `error` status is kept so
    /// the backend's failure stays visible. A no-op when no session was ever
    /// observed or it is already down.
    pub fn mark_disconnected(&self) -> bool {
        let mut state = self.state.write();
        let Some(session) = state.session.as_mut() else {
            return false;
        };
        let keeps_status = matches!(
            session.status,
            SessionStatus::Disconnected | SessionStatus::Error
        );
        if !session.connected && keeps_status {
            return false;
        }
        session.connected = false;
        if !keeps_status {
            session.status = SessionStatus::Disconnected;
        }
        session.last_activity = Some(Utc::now());
        let snapshot = session.clone();
        drop(state);
        self.notify(StoreChange::SessionStatus(snapshot));
        true
    }

    // ── messages ────────────────────────────────────────────────────────

    /// Append a message to a conversation's list in arrival order.
    ///
    /// Returns false when the duplicate policy dropped it. A tracked
    /// conversation gets its preview and `updated_at` refreshed.
    pub fn add_message(&self, conversation_id: &str, message: Message) -> bool {
        let mut state = self.state.write();

        if self.duplicates == DuplicatePolicy::SkipKnownIds
            && !state
                .seen_ids
                .entry(conversation_id.to_string())
                .or_default()
                .insert(message.id.clone())
        {
            debug!(
                conversation = %conversation_id,
                message = %message.id,
                "duplicate message skipped"
            );
            return false;
        }

        let message_id = message.id.clone();
        let preview = message.preview();
        let timestamp = message.timestamp;
        state
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);

        let conversation_touched = match state.conversations.get_mut(conversation_id) {
            Some(conversation) => {
                conversation.last_message = Some(preview);
                conversation.updated_at = conversation.updated_at.max(timestamp);
                true
            }
            None => false,
        };
        drop(state);

        self.notify(StoreChange::MessageAdded {
            conversation_id: conversation_id.to_string(),
            message_id,
        });
        if conversation_touched {
            self.notify(StoreChange::ConversationUpdated(conversation_id.to_string()));
        }
        true
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.state
            .read()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn message_count(&self, conversation_id: &str) -> usize {
        self.state
            .read()
            .messages
            .get(conversation_id)
            .map_or(0, Vec::len)
    }

    // ── typing ──────────────────────────────────────────────────────────

    pub fn set_typing(&self, conversation_id: &str, is_typing: bool) {
        let mut state = self.state.write();
        let previous = if is_typing {
            state.typing.insert(conversation_id.to_string(), true)
        } else {
            state.typing.remove(conversation_id)
        };
        drop(state);
        if previous.unwrap_or(false) != is_typing {
            self.notify(StoreChange::Typing {
                conversation_id: conversation_id.to_string(),
                is_typing,
            });
        }
    }

    pub fn is_typing(&self, conversation_id: &str) -> bool {
        self.state
            .read()
            .typing
            .get(conversation_id)
            .copied()
            .unwrap_or(false)
    }

    // ── conversations ───────────────────────────────────────────────────

    /// Insert or replace a conversation record (loaded by the caller from the
    /// database; the realtime layer never creates one).
    pub fn upsert_conversation(&self, conversation: Conversation) {
        let id = conversation.id.clone();
        self.state.write().conversations.insert(id.clone(), conversation);
        self.notify(StoreChange::ConversationUpdated(id));
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.state.read().conversations.get(conversation_id).cloned()
    }

    /// All tracked conversations, most recently updated first.
    pub fn conversations(&self) -> Vec<Conversation> {
        let mut list: Vec<Conversation> =
            self.state.read().conversations.values().cloned().collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        list
    }
}
