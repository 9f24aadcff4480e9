//! Handler registry that channel events are dispatched through.
//!
//! Handlers are synchronous and must stay short: they run on the connection
//! task, one event at a time, in arrival order. A handler that fails or
//! panics is logged and skipped; the remaining handlers and later events are
//! unaffected.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::protocol::{ChannelEvent, EventKind};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Arc<dyn Fn(&ChannelEvent) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct HandlerId(u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

struct Registered {
    id: HandlerId,
    handler: Handler,
}

pub struct EventRouter {
    handlers: RwLock<HashMap<EventKind, Vec<Registered>>>,
    next_id: AtomicU64,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for one event kind. Handlers of the same kind run in
    /// registration order.
    ///
    /// Handlers must not register or unregister handlers themselves: dispatch
    /// holds the registry lock while they run.
    pub fn register<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&ChannelEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Registered {
                id,
                handler: Arc::new(handler),
            });
        debug!(%id, ?kind, "handler registered");
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    ///
    /// Once this returns, the handler is neither running nor will it run again.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|r| r.id == id) {
                list.remove(pos);
                debug!(%id, "handler unregistered");
                return true;
            }
        }
        false
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    pub fn handler_count_for(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Run every handler registered for the event's kind. Returns how many
    /// handlers completed without error.
    pub fn dispatch(&self, event: &ChannelEvent) -> usize {
        let kind = event.kind();
        let handlers = self.handlers.read();
        let Some(list) = handlers.get(&kind) else {
            debug!(?kind, "no handlers for event");
            return 0;
        };

        let mut ok = 0;
        for registered in list {
            match catch_unwind(AssertUnwindSafe(|| (registered.handler)(event))) {
                Ok(Ok(())) => ok += 1,
                Ok(Err(e)) => {
                    warn!(handler = %registered.id, ?kind, error = %e, "event handler failed");
                }
                Err(panic) => {
                    error!(
                        handler = %registered.id,
                        ?kind,
                        panic = %panic_message(&panic),
                        "event handler panicked"
                    );
                }
            }
        }
        ok
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn qr(code: &str) -> ChannelEvent {
        ChannelEvent::PairingCode(code.to_string())
    }

    #[test]
    fn dispatches_to_matching_kind_in_order() {
        let router = EventRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        router.register(EventKind::PairingCode, move |_| {
            s1.lock().unwrap().push("first");
            Ok(())
        });
        let s2 = seen.clone();
        router.register(EventKind::PairingCode, move |_| {
            s2.lock().unwrap().push("second");
            Ok(())
        });
        let s3 = seen.clone();
        router.register(EventKind::Typing, move |_| {
            s3.lock().unwrap().push("typing");
            Ok(())
        });

        assert_eq!(router.dispatch(&qr("A")), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn unregister_leaves_no_handlers() {
        let router = EventRouter::new();
        let a = router.register(EventKind::PairingCode, |_| Ok(()));
        let b = router.register(EventKind::MessageIn, |_| Ok(()));
        assert_eq!(router.handler_count(), 2);

        assert!(router.unregister(a));
        assert!(router.unregister(b));
        assert!(!router.unregister(a));
        assert_eq!(router.handler_count(), 0);
        assert_eq!(router.dispatch(&qr("A")), 0);
    }

    #[test]
    fn failing_handler_does_not_stop_others() {
        let router = EventRouter::new();
        let hits = Arc::new(Mutex::new(0));

        router.register(EventKind::PairingCode, |_| Err("boom".into()));
        let h = hits.clone();
        router.register(EventKind::PairingCode, move |_| {
            *h.lock().unwrap() += 1;
            Ok(())
        });

        assert_eq!(router.dispatch(&qr("A")), 1);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn panicking_handler_is_contained() {
        let router = EventRouter::new();
        let hits = Arc::new(Mutex::new(0));

        router.register(EventKind::PairingCode, |_| panic!("handler bug"));
        let h = hits.clone();
        router.register(EventKind::PairingCode, move |_| {
            *h.lock().unwrap() += 1;
            Ok(())
        });

        assert_eq!(router.dispatch(&qr("A")), 1);
        assert_eq!(router.dispatch(&qr("B")), 1);
        assert_eq!(*hits.lock().unwrap(), 2);
    }

    #[test]
    fn counts_per_kind() {
        let router = EventRouter::new();
        router.register(EventKind::Typing, |_| Ok(()));
        router.register(EventKind::Typing, |_| Ok(()));
        router.register(EventKind::SessionStatus, |_| Ok(()));
        assert_eq!(router.handler_count_for(EventKind::Typing), 2);
        assert_eq!(router.handler_count_for(EventKind::SessionStatus), 1);
        assert_eq!(router.handler_count_for(EventKind::MessageIn), 0);
    }

    #[test]
    fn panic_message_extracts_payload() {
        let p: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(&p), "static");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&p), "owned");
        let p: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&p), "unknown panic");
    }
}
