//! Error types for the channel and the reconciler.

use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid endpoint `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("auth token cannot be sent as a header: {0}")]
    InvalidToken(String),

    #[error("messaging backend is unavailable")]
    Unavailable,

    #[error("channel is not connected")]
    NotConnected,

    #[error("outbound queue is full")]
    QueueFull,

    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[source] Box<tungstenite::Error>),
}

impl ChannelError {
    /// Classify a tungstenite error. Refused, reset and aborted connections
    /// mean the backend is not reachable right now.
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Transport(Box::new(err))
        }
    }

    /// Whether retrying the connection may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Transport(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("reconciler is already mounted")]
    AlreadyMounted,

    #[error("message {message_id} has no conversation id")]
    MissingConversation { message_id: String },
}
