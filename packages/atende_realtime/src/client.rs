//! RealtimeClient: an [`EventChannel`] with a [`Reconciler`] mounted on its
//! router, started and stopped together.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::channel::EventChannel;
use crate::config::ChannelConfig;
use crate::error::{ChannelError, ReconcileError};
use crate::reconciler::{Mount, Reconciler};
use crate::store::ChatStore;

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

pub struct RealtimeClient {
    channel: EventChannel,
    reconciler: Reconciler,
    mount: Mutex<Option<Mount>>,
}

impl RealtimeClient {
    pub fn new(config: ChannelConfig, store: Arc<ChatStore>) -> Self {
        Self {
            channel: EventChannel::new(config),
            reconciler: Reconciler::new(store),
            mount: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        self.reconciler.store()
    }

    /// Mount the reconciler (once) and connect. Calling it again while
    /// started only reconnects a channel that gave up.
    pub fn start(&self, token: Option<String>) -> Result<(), StartError> {
        {
            let mut mount = self.mount.lock();
            if mount.is_none() {
                *mount = Some(self.reconciler.mount(self.channel.router())?);
            }
        }
        if let Err(e) = self.channel.connect(token) {
            self.mount.lock().take();
            return Err(e.into());
        }
        Ok(())
    }

    /// Unmount the reconciler, then tear down the connection. Events that
    /// arrive during teardown no longer reach the store.
    pub async fn stop(&self) {
        let mount = self.mount.lock().take();
        if let Some(mount) = mount {
            mount.unmount();
        } else {
            debug!("stop called while not started");
        }
        self.channel.disconnect().await;
    }
}
