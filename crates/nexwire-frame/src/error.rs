/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header carries a type tag this protocol does not define.
    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    /// The frame body cannot be decoded for its message type.
    #[error("malformed {message_type} frame: {reason}")]
    Malformed {
        message_type: &'static str,
        reason: String,
    },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A transport-level failure surfaced through the frame layer.
    #[error(transparent)]
    Transport(#[from] nexwire_transport::TransportError),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    pub(crate) fn malformed(message_type: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            message_type,
            reason: reason.into(),
        }
    }

    /// Whether the error means the byte stream can no longer be trusted.
    ///
    /// Every decoding failure is structural: once a frame cannot be parsed the
    /// reader has lost its position in the stream.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::UnknownMessageType(_) | Self::Malformed { .. } | Self::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
