//! Runtime configuration for the event channel.

use std::time::Duration;

use crate::backoff::ReconnectPolicy;
use crate::error::ChannelError;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Base URL of the messaging backend, e.g. `wss://chat.example.com`.
    pub host: String,
    /// Optional namespace path appended to the host.
    pub namespace: Option<String>,
    pub reconnect: ReconnectPolicy,
    /// WebSocket ping interval (None = rely on server pings only).
    pub ping_interval: Option<Duration>,
    /// Bounded queue for subscribe / typing frames.
    pub outbound_capacity: usize,
    /// Dispatch a local `ConnectionLost` event when the transport drops.
    pub synthesize_disconnect: bool,
}

impl ChannelConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            namespace: None,
            reconnect: ReconnectPolicy::default(),
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            synthesize_disconnect: true,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = if namespace.trim_matches('/').is_empty() {
            None
        } else {
            Some(namespace)
        };
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Full endpoint URL: `<host>/<namespace>`.
    pub fn endpoint_url(&self) -> Result<String, ChannelError> {
        let host = self.host.trim().trim_end_matches('/');
        if !(host.starts_with("ws://") || host.starts_with("wss://")) {
            return Err(ChannelError::InvalidEndpoint {
                url: self.host.clone(),
                reason: "scheme must be ws:// or wss://".to_string(),
            });
        }
        let authority = host.split_once("://").map(|(_, rest)| rest).unwrap_or("");
        if authority.is_empty() || authority.starts_with('/') {
            return Err(ChannelError::InvalidEndpoint {
                url: self.host.clone(),
                reason: "missing host".to_string(),
            });
        }
        match self.namespace.as_deref().map(|ns| ns.trim_matches('/')) {
            Some(ns) if !ns.is_empty() => Ok(format!("{host}/{ns}")),
            _ => Ok(host.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_host_and_namespace() {
        let config = ChannelConfig::new("ws://localhost:3001/").with_namespace("/whatsapp");
        assert_eq!(config.endpoint_url().unwrap(), "ws://localhost:3001/whatsapp");
    }

    #[test]
    fn endpoint_without_namespace() {
        let config = ChannelConfig::new("wss://chat.example.com");
        assert_eq!(config.endpoint_url().unwrap(), "wss://chat.example.com");

        let config = ChannelConfig::new("wss://chat.example.com").with_namespace("/");
        assert!(config.namespace.is_none());
    }

    #[test]
    fn endpoint_rejects_http_scheme() {
        let config = ChannelConfig::new("http://localhost:3001");
        assert!(matches!(
            config.endpoint_url(),
            Err(ChannelError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn endpoint_rejects_missing_host() {
        let config = ChannelConfig::new("ws://");
        assert!(config.endpoint_url().is_err());
    }

    #[test]
    fn defaults() {
        let config = ChannelConfig::new("ws://localhost");
        assert_eq!(config.ping_interval, Some(DEFAULT_PING_INTERVAL));
        assert_eq!(config.outbound_capacity, 64);
        assert!(config.synthesize_disconnect);
        assert!(config.reconnect.enabled);
    }
}
