//! Realtime WhatsApp session and chat layer for the Atende dashboard.
//!
//! This crate keeps one WebSocket connection to the messaging backend and
//! reconciles what the backend pushes (pairing codes, session status
//! snapshots, inbound messages, typing indicators) into a [`ChatStore`] that a
//! front-end renders from.
//!
//! It has no UI and no database knowledge. The pieces are:
//! - [`EventChannel`]: the single authenticated connection, with reconnect
//!   and outbound subscribe / typing operations
//! - [`EventRouter`]: the handler registry events are dispatched through
//! - [`Reconciler`]: the handlers that turn events into store mutations
//! - [`ChatStore`]: the injected state (messages, session, pairing code)
//! - [`RealtimeClient`]: mount/unmount of all of the above in the right order
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use atende_realtime::{ChannelConfig, ChatStore, RealtimeClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(ChatStore::new());
//!     let config = ChannelConfig::new("ws://localhost:3001").with_namespace("whatsapp");
//!     let client = RealtimeClient::new(config, store.clone());
//!
//!     client.start(Some("secret-token".to_string()))?;
//!     client.channel().subscribe_to_chat("conversation-1")?;
//!
//!     let mut changes = store.subscribe();
//!     while let Ok(change) = changes.recv().await {
//!         println!("{change:?}");
//!     }
//!
//!     client.stop().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod protocol;
pub mod reconciler;
pub mod router;
pub mod store;

pub use backoff::ReconnectPolicy;
pub use channel::EventChannel;
pub use client::{RealtimeClient, StartError};
pub use config::ChannelConfig;
pub use error::{ChannelError, ReconcileError};
pub use models::{
    Conversation, ConversationStatus, MediaRef, Message, MessageKind, SenderRole, Session,
    SessionStatus, TypingEvent,
};
pub use protocol::{ChannelEvent, EventKind, OutboundEvent};
pub use reconciler::{Mount, Reconciler};
pub use router::{EventRouter, HandlerError, HandlerId};
pub use store::{ChatStore, DuplicatePolicy, StoreChange};
