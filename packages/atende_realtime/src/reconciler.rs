//! Reconciler: the handlers that translate channel events into store
//! mutations.
//!
//! | event                 | effect                                           |
//! |-----------------------|--------------------------------------------------|
//! | `chat:qr`             | pending pairing code set                         |
//! | `chat:session_status` | session mirrored; code cleared once connected    |
//! | `chat:message_in`     | message appended to its conversation             |
//! | `chat:typing`         | typing indicator updated                         |
//! | connection lost       | session shown as disconnected until re-emitted   |
//!
//! Handlers are registered by [`Reconciler::mount`] and removed when the
//! returned [`Mount`] is unmounted or dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::protocol::{ChannelEvent, EventKind};
use crate::router::{EventRouter, HandlerError, HandlerId};
use crate::store::ChatStore;

pub struct Reconciler {
    store: Arc<ChatStore>,
    mounted: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(store: Arc<ChatStore>) -> Self {
        Self {
            store,
            mounted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    /// Register one handler per event kind on `router`.
    ///
    /// Fails with `AlreadyMounted` while a previous mount is still alive, so a
    /// handler is never registered twice.
    pub fn mount(&self, router: &Arc<EventRouter>) -> Result<Mount, ReconcileError> {
        if self
            .mounted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ReconcileError::AlreadyMounted);
        }

        let mut ids = Vec::with_capacity(EventKind::ALL.len());
        for kind in EventKind::ALL {
            let store = self.store.clone();
            ids.push(router.register(kind, move |event| apply(&store, event)));
        }
        info!(handlers = ids.len(), "reconciler mounted");

        Ok(Mount {
            router: router.clone(),
            ids,
            mounted: self.mounted.clone(),
        })
    }
}

/// Apply one event to the store.
pub fn apply(store: &ChatStore, event: &ChannelEvent) -> Result<(), HandlerError> {
    match event {
        ChannelEvent::PairingCode(code) => {
            debug!("pairing code received");
            store.set_qr_code(Some(code.clone()));
        }
        ChannelEvent::SessionStatus(session) => {
            store.set_whatsapp_status(session.clone());
        }
        ChannelEvent::MessageIn(message) => {
            if message.conversation_id.trim().is_empty() {
                return Err(ReconcileError::MissingConversation {
                    message_id: message.id.clone(),
                }
                .into());
            }
            store.add_message(&message.conversation_id, message.clone());
        }
        ChannelEvent::Typing(typing) => {
            store.set_typing(&typing.conversation_id, typing.is_typing);
        }
        ChannelEvent::ConnectionLost { reason } => {
            if store.mark_disconnected() {
                info!(%reason, "session marked disconnected after transport loss");
            }
        }
    }
    Ok(())
}

/// Live registration of the reconciler's handlers. Unmounting (or dropping)
/// removes every handler it registered.
pub struct Mount {
    router: Arc<EventRouter>,
    ids: Vec<HandlerId>,
    mounted: Arc<AtomicBool>,
}

impl Mount {
    pub fn handler_ids(&self) -> &[HandlerId] {
        &self.ids
    }

    pub fn unmount(self) {
        drop(self);
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        let removed = self
            .ids
            .drain(..)
            .filter(|id| self.router.unregister(*id))
            .count();
        self.mounted.store(false, Ordering::Release);
        info!(handlers = removed, "reconciler unmounted");
    }
}
