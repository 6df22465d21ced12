//! Message type tags.
//!
//! Tags 0x01-0x0F belong to the handshake, 0x10-0x1F to connection control,
//! 0x20-0x2F to invocations and 0x30-0x3F to duplex pipes.

/// The one-byte type tag that opens every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ClientGreeting = 0x01,
    ServerGreeting = 0x02,
    Ping = 0x10,
    Pong = 0x11,
    Disconnect = 0x1F,
    Invocation = 0x20,
    InvocationResult = 0x21,
    InvocationException = 0x22,
    InvocationCancellation = 0x23,
    PipeState = 0x30,
    PipeWrite = 0x31,
    PipeAck = 0x32,
}

impl MessageType {
    /// Parse a wire tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => Self::ClientGreeting,
            0x02 => Self::ServerGreeting,
            0x10 => Self::Ping,
            0x11 => Self::Pong,
            0x1F => Self::Disconnect,
            0x20 => Self::Invocation,
            0x21 => Self::InvocationResult,
            0x22 => Self::InvocationException,
            0x23 => Self::InvocationCancellation,
            0x30 => Self::PipeState,
            0x31 => Self::PipeWrite,
            0x32 => Self::PipeAck,
            _ => return None,
        })
    }

    /// The wire tag.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns a human-readable name for the type.
    pub fn name(self) -> &'static str {
        match self {
            Self::ClientGreeting => "client-greeting",
            Self::ServerGreeting => "server-greeting",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Disconnect => "disconnect",
            Self::Invocation => "invocation",
            Self::InvocationResult => "invocation-result",
            Self::InvocationException => "invocation-exception",
            Self::InvocationCancellation => "invocation-cancellation",
            Self::PipeState => "pipe-state",
            Self::PipeWrite => "pipe-write",
            Self::PipeAck => "pipe-ack",
        }
    }

    /// Body length for types whose body has a fixed size.
    pub fn fixed_body_len(self) -> Option<usize> {
        match self {
            Self::Ping | Self::Pong => Some(8),
            Self::Disconnect => Some(1),
            Self::InvocationCancellation | Self::PipeState => Some(3),
            Self::PipeAck => Some(6),
            _ => None,
        }
    }

    /// Returns true for the greeting types exchanged before a session is ready.
    pub fn is_handshake(self) -> bool {
        matches!(self, Self::ClientGreeting | Self::ServerGreeting)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
