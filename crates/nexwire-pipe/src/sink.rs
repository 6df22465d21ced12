use futures_core::future::BoxFuture;
use nexwire_frame::Message;

use crate::error::Result;

/// Outbound path for pipe traffic.
///
/// A session implements this over its single serialized frame writer. Pipe
/// readers send acknowledgements and state changes through it; pipe writers
/// send their chunks through it.
pub trait PipeSink: Send + Sync {
    /// Send one message. Resolves once the frame has been handed to the
    /// transport.
    fn send(&self, message: Message) -> BoxFuture<'_, Result<()>>;
}
