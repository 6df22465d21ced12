//! Duplex byte-stream transport abstraction for nexwire.
//!
//! The session layer treats its connection as an opaque, reliable, ordered
//! byte stream. This crate provides that stream type, [`IpcStream`], over:
//! - Unix domain sockets (Linux/macOS)
//! - in-memory pairs (tests, same-process peers)
//! - any boxed `AsyncRead + AsyncWrite` (TCP, TLS, WebSocket adapters, ...)
//!
//! This is the lowest layer of nexwire. Everything else builds on top of
//! [`IpcStream`].

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::{IpcStream, PeerCredentials, RawStream};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
