//! EventChannel: the single WebSocket connection to the messaging backend.
//!
//! One supervisor task per live connection owns the socket. It connects,
//! re-sends recorded subscriptions, then multiplexes inbound frames (decoded
//! and dispatched through the [`EventRouter`] in arrival order), outbound
//! frames from a bounded queue, and keepalive pings. When the transport
//! drops it reports connectivity false, optionally dispatches a local
//! `ConnectionLost` event, and reconnects with backoff.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::protocol::{ChannelEvent, OutboundEvent};
use crate::router::EventRouter;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handles for the connection currently owned by a supervisor task.
struct LiveConnection {
    cancel: CancellationToken,
    outbound: mpsc::Sender<OutboundEvent>,
    task: JoinHandle<()>,
}

pub struct EventChannel {
    config: ChannelConfig,
    router: Arc<EventRouter>,
    connected: Arc<watch::Sender<bool>>,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
    live: Mutex<Option<LiveConnection>>,
}

impl EventChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_router(config, Arc::new(EventRouter::new()))
    }

    pub fn with_router(config: ChannelConfig, router: Arc<EventRouter>) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            config,
            router,
            connected: Arc::new(connected),
            subscriptions: Arc::new(Mutex::new(BTreeSet::new())),
            live: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// The handler registry inbound events are dispatched through.
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Observe connectivity changes.
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Conversations that will be (re)subscribed on every connect.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    /// Start connecting. `token` is sent as `Authorization: Bearer <token>`.
    ///
    /// A no-op while a connection (or its reconnect loop) is already live.
    /// Only configuration problems are returned; transport failures are logged
    /// and retried according to the reconnect policy. Must be called from
    /// within a Tokio runtime.
    pub fn connect(&self, token: Option<String>) -> Result<(), ChannelError> {
        let mut live = self.live.lock();
        if let Some(conn) = live.as_ref() {
            if !conn.task.is_finished() {
                debug!("connect called while a connection is live");
                return Ok(());
            }
        }

        let url = self.config.endpoint_url()?;
        let token = token.filter(|t| !t.trim().is_empty());
        build_request(&url, token.as_deref())?;

        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let supervisor = Supervisor {
            url: url.clone(),
            token,
            config: self.config.clone(),
            router: self.router.clone(),
            connected: self.connected.clone(),
            subscriptions: self.subscriptions.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(supervisor.run(outbound_rx));

        *live = Some(LiveConnection {
            cancel,
            outbound,
            task,
        });
        info!(endpoint = %url, "channel connecting");
        Ok(())
    }

    /// Tear down the live connection and wait for its task to finish.
    /// Safe to call when not connected.
    pub async fn disconnect(&self) {
        let conn = self.live.lock().take();
        let Some(conn) = conn else {
            debug!("disconnect called while not connected");
            return;
        };

        conn.cancel.cancel();
        if let Err(e) = conn.task.await {
            if e.is_panic() {
                error!("channel task panicked during shutdown");
            }
        }
        self.connected.send_replace(false);
        info!("channel disconnected");
    }

    /// Drop the current connection (if any) and connect again, e.g. with a
    /// refreshed token.
    pub async fn reconnect(&self, token: Option<String>) -> Result<(), ChannelError> {
        self.disconnect().await;
        self.connect(token)
    }

    /// Ask the backend to scope message events to a conversation.
    ///
    /// The subscription is remembered and re-sent after every reconnect; when
    /// not connected it is only recorded.
    pub fn subscribe_to_chat(&self, conversation_id: &str) -> Result<(), ChannelError> {
        if !self.subscriptions.lock().insert(conversation_id.to_string()) {
            debug!(conversation = %conversation_id, "already subscribed");
        }
        match self.enqueue(OutboundEvent::subscribe(conversation_id)) {
            Err(ChannelError::NotConnected) => {
                debug!(conversation = %conversation_id, "subscription recorded, sent on connect");
                Ok(())
            }
            other => other,
        }
    }

    pub fn unsubscribe_from_chat(&self, conversation_id: &str) -> Result<(), ChannelError> {
        if !self.subscriptions.lock().remove(conversation_id) {
            return Ok(());
        }
        match self.enqueue(OutboundEvent::unsubscribe(conversation_id)) {
            Err(ChannelError::NotConnected) => Ok(()),
            other => other,
        }
    }

    /// Fire-and-forget typing notification. Never waits: a saturated queue
    /// returns `QueueFull` and a missing connection `NotConnected`.
    pub fn send_typing_status(
        &self,
        conversation_id: &str,
        is_typing: bool,
    ) -> Result<(), ChannelError> {
        self.enqueue(OutboundEvent::typing(conversation_id, is_typing))
    }

    fn enqueue(&self, event: OutboundEvent) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let live = self.live.lock();
        let conn = live.as_ref().ok_or(ChannelError::NotConnected)?;
        conn.outbound.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ChannelError::NotConnected,
        })
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        if let Some(conn) = self.live.get_mut().take() {
            conn.cancel.cancel();
        }
    }
}

/// Build the upgrade request, attaching the bearer token when present.
fn build_request(url: &str, token: Option<&str>) -> Result<Request, ChannelError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ChannelError::InvalidEndpoint {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ChannelError::InvalidToken(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

enum SessionEnd {
    Cancelled,
    Dropped(String),
}

struct Supervisor {
    url: String,
    token: Option<String>,
    config: ChannelConfig,
    router: Arc<EventRouter>,
    connected: Arc<watch::Sender<bool>>,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self, mut outbound: mpsc::Receiver<OutboundEvent>) {
        let policy = self.config.reconnect.clone();
        let mut failures: u32 = 0;

        loop {
            let request = match build_request(&self.url, self.token.as_deref()) {
                Ok(request) => request,
                Err(e) => {
                    error!(endpoint = %self.url, error = %e, "cannot build channel request");
                    break;
                }
            };

            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = tokio_tungstenite::connect_async(request) => result,
            };

            match attempt {
                Ok((socket, _response)) => {
                    let started = Instant::now();
                    self.connected.send_replace(true);
                    info!(endpoint = %self.url, "channel connected");

                    let end = self.pump(socket, &mut outbound).await;
                    self.connected.send_replace(false);
                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Dropped(reason) => {
                            let uptime = started.elapsed();
                            failures = policy.failures_after_drop(failures, uptime);
                            warn!(
                                endpoint = %self.url,
                                %reason,
                                uptime_ms = uptime.as_millis() as u64,
                                failures,
                                "channel connection lost"
                            );
                            if self.config.synthesize_disconnect {
                                self.router.dispatch(&ChannelEvent::ConnectionLost { reason });
                            }
                        }
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let err = ChannelError::from_tungstenite(e);
                    warn!(
                        endpoint = %self.url,
                        attempt = failures,
                        error = %err,
                        "channel connect failed"
                    );
                }
            }

            if !policy.should_retry(failures) {
                if policy.enabled {
                    error!(
                        endpoint = %self.url,
                        attempts = failures,
                        "giving up on channel connection"
                    );
                } else {
                    info!(endpoint = %self.url, "reconnect disabled, channel stays down");
                }
                break;
            }

            let delay = policy.delay_for(failures.saturating_sub(1));
            debug!(
                endpoint = %self.url,
                delay_ms = delay.as_millis() as u64,
                "waiting before reconnect"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.connected.send_replace(false);
        debug!(endpoint = %self.url, "channel supervisor finished");
    }

    async fn pump(
        &self,
        socket: Socket,
        outbound: &mut mpsc::Receiver<OutboundEvent>,
    ) -> SessionEnd {
        let (mut write, mut read) = socket.split();

        let subscriptions: Vec<String> = self.subscriptions.lock().iter().cloned().collect();
        for conversation_id in subscriptions {
            let event = OutboundEvent::subscribe(conversation_id);
            if let Err(e) = send_event(&mut write, &event).await {
                return SessionEnd::Dropped(e.to_string());
            }
        }

        let ping_enabled = self.config.ping_interval.is_some();
        let period = self
            .config
            .ping_interval
            .unwrap_or(Duration::from_secs(3600))
            .max(Duration::from_millis(100));
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    return SessionEnd::Cancelled;
                }
                frame = read.next() => match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => self.handle_text(text.as_str()),
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        return SessionEnd::Dropped(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                    None => return SessionEnd::Dropped("stream ended".to_string()),
                },
                event = outbound.recv() => match event {
                    Some(event) => {
                        if let Err(e) = send_event(&mut write, &event).await {
                            return SessionEnd::Dropped(e.to_string());
                        }
                    }
                    None => return SessionEnd::Cancelled,
                },
                _ = ping.tick(), if ping_enabled => {
                    if let Err(e) = write.send(tungstenite::Message::Ping(Default::default())).await {
                        return SessionEnd::Dropped(e.to_string());
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match ChannelEvent::decode(text) {
            Ok(Some(event)) => {
                self.router.dispatch(&event);
            }
            Ok(None) => debug!(frame = %text, "ignoring unhandled event"),
            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }
}

async fn send_event<S>(write: &mut S, event: &OutboundEvent) -> Result<(), tungstenite::Error>
where
    S: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let json = match event.encode() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to encode outbound event");
            return Ok(());
        }
    };
    write.send(tungstenite::Message::Text(json.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_bearer_token() {
        let request = build_request("ws://localhost:3001/whatsapp", Some("abc")).unwrap();
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer abc"
        );
        assert_eq!(request.uri().path(), "/whatsapp");
    }

    #[test]
    fn request_without_token_has_no_auth_header() {
        let request = build_request("ws://localhost:3001", None).unwrap();
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn token_with_newline_is_rejected() {
        let err = build_request("ws://localhost:3001", Some("bad\ntoken")).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn connect_rejects_bad_endpoint() {
        let channel = EventChannel::new(ChannelConfig::new("http://localhost"));
        assert!(matches!(
            channel.connect(None),
            Err(ChannelError::InvalidEndpoint { .. })
        ));
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn disconnect_when_never_connected_is_noop() {
        let channel = EventChannel::new(ChannelConfig::new("ws://127.0.0.1:9"));
        channel.disconnect().await;
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn typing_requires_connection() {
        let channel = EventChannel::new(ChannelConfig::new("ws://127.0.0.1:9"));
        assert!(matches!(
            channel.send_typing_status("c1", true),
            Err(ChannelError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn subscriptions_are_recorded_while_offline() {
        let channel = EventChannel::new(ChannelConfig::new("ws://127.0.0.1:9"));
        channel.subscribe_to_chat("c2").unwrap();
        channel.subscribe_to_chat("c1").unwrap();
        channel.subscribe_to_chat("c1").unwrap();
        assert_eq!(channel.subscriptions(), vec!["c1", "c2"]);

        channel.unsubscribe_from_chat("c2").unwrap();
        assert_eq!(channel.subscriptions(), vec!["c1"]);
    }
}
