use std::time::Duration;

use nexwire_frame::{DisconnectReason, ExceptionKind};

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] nexwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] nexwire_frame::FrameError),

    /// Pipe error, including backpressure overruns.
    #[error("pipe error: {0}")]
    Pipe(#[from] nexwire_pipe::PipeError),

    /// The peer broke the protocol (bad greeting, undecodable frame).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The handshake was rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Handshake or idle timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The operation was cancelled locally or by the peer.
    #[error("operation cancelled")]
    Cancelled,

    /// The connection is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// The remote handler failed.
    #[error("remote {kind}: {message}")]
    Remote { kind: ExceptionKind, message: String },

    /// Every invocation id is in use.
    #[error("too many outstanding invocations")]
    TooManyInvocations,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    /// The reason sent to the peer when this error ends a session.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Self::Authentication(_) => DisconnectReason::Authentication,
            Self::Timeout(_) => DisconnectReason::Timeout,
            Self::Protocol(_) | Self::Json(_) => DisconnectReason::Protocol,
            Self::Frame(err) if err.is_structural() => DisconnectReason::Protocol,
            Self::Frame(_) | Self::Transport(_) => DisconnectReason::Transport,
            _ => DisconnectReason::Graceful,
        }
    }

    /// Map a `Disconnect` frame from the peer onto the error it represents.
    pub(crate) fn from_disconnect(reason: DisconnectReason) -> Self {
        match reason {
            DisconnectReason::Authentication => {
                Self::Authentication("rejected by peer".to_string())
            }
            DisconnectReason::Protocol => Self::Protocol("peer reported a protocol error".into()),
            _ => Self::ConnectionClosed,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
