//! Session protocol engine for nexwire.
//!
//! This is the "just works" layer: connect, authenticate, call methods on
//! the peer, serve its calls, and stream bulk data through duplex pipes, all
//! over one connection.

pub mod config;
pub mod connector;
mod control;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod invocation;
pub mod listener;
pub mod session;

pub use config::SessionConfig;
pub use connector::{connect, connect_with_config};
pub use dispatch::{DispatchError, DispatchResult, InvocationContext, MethodTable, Nexus};
pub use error::{Result, SessionError};
pub use handshake::{
    handshake_client, handshake_server, AllowAll, Authenticator, ClientGreeting, HandshakeConfig,
    HandshakeResult, ServerGreeting, TokenAuthenticator,
};
pub use invocation::InvocationStateManager;
pub use listener::SessionListener;
pub use session::{Role, Session, SessionState};
