//! `atende watch`: connect, mirror the backend into a store, print changes.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{info, warn};

use atende_realtime::{ChatStore, Message, RealtimeClient, StoreChange};

use crate::config::{AtendeConfig, FileConfig};

/// Command-line overrides for the `[channel]` section.
#[derive(Debug, Default)]
pub struct WatchOptions {
    pub host: Option<String>,
    pub namespace: Option<String>,
    pub token: Option<String>,
    pub conversations: Vec<String>,
    pub json: bool,
}

impl WatchOptions {
    fn apply(&self, fc: &mut FileConfig) {
        if let Some(host) = &self.host {
            fc.channel.host = host.clone();
        }
        if let Some(namespace) = &self.namespace {
            fc.channel.namespace = namespace.clone();
        }
        if let Some(token) = &self.token {
            fc.channel.token = Some(token.clone());
        }
    }
}

pub async fn watch_command(config: &AtendeConfig, options: WatchOptions) -> Result<()> {
    let mut fc = config.load()?;
    options.apply(&mut fc);

    let channel_config = fc.channel_config();
    let endpoint = channel_config
        .endpoint_url()
        .context("Invalid channel endpoint")?;

    let store = Arc::new(ChatStore::with_duplicate_policy(fc.duplicate_policy()));
    let client = RealtimeClient::new(channel_config, store.clone());
    let changes = store.subscribe();
    let connected = client.channel().watch_connected();

    client
        .start(fc.channel.token.clone())
        .with_context(|| format!("Failed to start channel to {endpoint}"))?;
    for conversation_id in &options.conversations {
        client
            .channel()
            .subscribe_to_chat(conversation_id)
            .with_context(|| format!("Failed to subscribe to {conversation_id}"))?;
    }
    if !options.json {
        eprintln!("Watching {endpoint} (Ctrl-C to stop)");
    }

    print_changes(
        &store,
        changes,
        connected,
        options.json,
        tokio::signal::ctrl_c(),
    )
    .await;

    client.stop().await;
    Ok(())
}

/// Print store and connectivity changes until `shutdown` resolves or the
/// store goes away.
async fn print_changes<F: Future>(
    store: &ChatStore,
    mut changes: broadcast::Receiver<StoreChange>,
    mut connected: watch::Receiver<bool>,
    as_json: bool,
    shutdown: F,
) {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted, shutting down");
                break;
            }
            result = connected.changed() => {
                if result.is_err() {
                    break;
                }
                let up = *connected.borrow_and_update();
                if as_json {
                    println!("{}", json!({ "change": "channel", "connected": up }));
                } else {
                    eprintln!("channel {}", if up { "connected" } else { "disconnected" });
                }
            }
            change = changes.recv() => match change {
                Ok(change) => render(store, &change, as_json),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "display fell behind store changes");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

fn render(store: &ChatStore, change: &StoreChange, as_json: bool) {
    if as_json {
        println!("{}", change_json(store, change));
        return;
    }
    match change {
        StoreChange::QrCode(Some(code)) => {
            eprintln!("Pairing code received, scan it with WhatsApp:");
            print_qr(code);
        }
        StoreChange::QrCode(None) => eprintln!("pairing code cleared"),
        StoreChange::SessionStatus(session) => {
            println!("session {}: {}", session.id, session.status);
        }
        StoreChange::MessageAdded {
            conversation_id,
            message_id,
        } => match find_message(store, conversation_id, message_id) {
            Some(message) => println!(
                "[{conversation_id}] {:?}: {}",
                message.sender,
                message.preview()
            ),
            None => println!("[{conversation_id}] message {message_id}"),
        },
        StoreChange::Typing {
            conversation_id,
            is_typing,
        } => {
            if *is_typing {
                println!("[{conversation_id}] typing…");
            }
        }
        StoreChange::ConversationUpdated(conversation_id) => {
            println!("[{conversation_id}] conversation updated");
        }
    }
}

fn change_json(store: &ChatStore, change: &StoreChange) -> serde_json::Value {
    match change {
        StoreChange::QrCode(code) => json!({ "change": "qr_code", "qrCode": code }),
        StoreChange::SessionStatus(session) => json!({ "change": "session", "session": session }),
        StoreChange::MessageAdded {
            conversation_id,
            message_id,
        } => json!({
            "change": "message",
            "conversationId": conversation_id,
            "messageId": message_id,
            "message": find_message(store, conversation_id, message_id),
        }),
        StoreChange::Typing {
            conversation_id,
            is_typing,
        } => json!({
            "change": "typing",
            "conversationId": conversation_id,
            "isTyping": is_typing,
        }),
        StoreChange::ConversationUpdated(conversation_id) => json!({
            "change": "conversation",
            "conversation": store.conversation(conversation_id),
        }),
    }
}

fn find_message(store: &ChatStore, conversation_id: &str, message_id: &str) -> Option<Message> {
    store
        .messages(conversation_id)
        .into_iter()
        .rev()
        .find(|m| m.id == message_id)
}

fn print_qr(data: &str) {
    use qrcode::QrCode;

    let code = match QrCode::new(data.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("(QR code generation failed: {})", e);
            eprintln!("{}", data);
            return;
        }
    };

    let image = code
        .render::<char>()
        .quiet_zone(true)
        .module_dimensions(2, 1)
        .build();
    eprintln!("{}", image);
}
