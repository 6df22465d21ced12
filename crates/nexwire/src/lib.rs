//! Bidirectional RPC with multiplexed duplex pipes.
//!
//! Two endpoints call methods on each other over one byte stream and open
//! flow-controlled virtual streams ("pipes") alongside their calls.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte streams (Unix sockets, in-memory pairs)
//! - [`frame`]: the `[type][len][body]` wire envelope and message codec
//! - [`pipe`]: duplex pipes, flow control and typed channels
//! - [`session`]: handshake, invocations, keepalive and pipe routing

/// Re-export transport types.
pub mod transport {
    pub use nexwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use nexwire_frame::*;
}

/// Re-export pipe types.
pub mod pipe {
    pub use nexwire_pipe::*;
}

/// Re-export session types.
pub mod session {
    pub use nexwire_session::*;
}

pub use nexwire_session::{connect, MethodTable, Session, SessionConfig, SessionListener};
