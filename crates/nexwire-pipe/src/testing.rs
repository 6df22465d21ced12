use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use futures_core::future::BoxFuture;
use nexwire_frame::Message;
use parking_lot::Mutex;

use crate::error::{PipeError, Result};
use crate::options::PipeOptions;
use crate::registry::{PipeIdParity, PipeRegistry};
use crate::sink::PipeSink;

/// Records every message instead of sending it.
#[derive(Default)]
pub(crate) struct RecordingSink {
    sent: Mutex<Vec<Message>>,
    closed: AtomicBool,
}

impl RecordingSink {
    pub(crate) fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl PipeSink for RecordingSink {
    fn send(&self, message: Message) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(PipeError::ConnectionClosed);
            }
            self.sent.lock().push(message);
            Ok(())
        })
    }
}

/// Delivers pipe traffic straight into the peer registry.
#[derive(Default)]
pub(crate) struct Loopback {
    peer: OnceLock<PipeRegistry>,
}

impl PipeSink for Loopback {
    fn send(&self, message: Message) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let peer = self.peer.get().ok_or(PipeError::ConnectionClosed)?;
            match message {
                Message::PipeWrite { pipe_id, data } => peer.on_data(pipe_id, data),
                Message::PipeState { pipe_id, flags } => peer.on_state(pipe_id, flags),
                Message::PipeAck { pipe_id, consumed } => peer.on_ack(pipe_id, consumed),
                _ => {}
            }
            Ok(())
        })
    }
}

/// Two registries wired back to back, client (odd ids) and server (even ids).
pub(crate) fn registry_pair(options: PipeOptions) -> (PipeRegistry, PipeRegistry) {
    let to_server = Arc::new(Loopback::default());
    let to_client = Arc::new(Loopback::default());
    let client = PipeRegistry::new(PipeIdParity::Odd, options.clone(), to_server.clone(), usize::MAX)
        .expect("valid options");
    let server = PipeRegistry::new(PipeIdParity::Even, options, to_client.clone(), usize::MAX)
        .expect("valid options");
    let _ = to_server.peer.set(server.clone());
    let _ = to_client.peer.set(client.clone());
    (client, server)
}
