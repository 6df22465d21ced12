use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{PipeError, Result};
use crate::options::PipeOptions;
use crate::pipe::DuplexPipe;
use crate::sink::PipeSink;
use crate::state::{PipeState, PipeStateManager};

/// Which half of the id space this side allocates from.
///
/// Each side allocates from its own half so both can open pipes at the same
/// time without coordinating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeIdParity {
    /// 1, 3, 5, ... (the connecting side).
    Odd,
    /// 2, 4, 6, ... (the accepting side).
    Even,
}

impl PipeIdParity {
    fn first(self) -> u16 {
        match self {
            Self::Odd => 1,
            Self::Even => 2,
        }
    }

    fn capacity(self) -> usize {
        match self {
            Self::Odd => 32768,
            Self::Even => 32767,
        }
    }
}

struct Pipes {
    open: HashMap<u16, DuplexPipe>,
    next_id: u16,
    closed: bool,
}

struct RegistryShared {
    parity: PipeIdParity,
    options: PipeOptions,
    chunk_size: usize,
    sink: Arc<dyn PipeSink>,
    pipes: Mutex<Pipes>,
}

/// Open pipes of one connection, keyed by pipe id.
///
/// Pipes remove themselves when torn down, which frees their id for reuse.
#[derive(Clone)]
pub struct PipeRegistry {
    shared: Arc<RegistryShared>,
}

impl PipeRegistry {
    /// Create a registry.
    ///
    /// `max_payload` is the frame body limit; chunks are capped two bytes
    /// below it to leave room for the pipe id.
    pub fn new(
        parity: PipeIdParity,
        options: PipeOptions,
        sink: Arc<dyn PipeSink>,
        max_payload: usize,
    ) -> Result<Self> {
        options.validate()?;
        let chunk_size = options
            .flush_chunk_size
            .min(max_payload.saturating_sub(2))
            .max(1);
        Ok(Self {
            shared: Arc::new(RegistryShared {
                parity,
                chunk_size,
                options,
                sink,
                pipes: Mutex::new(Pipes {
                    open: HashMap::new(),
                    next_id: parity.first(),
                    closed: false,
                }),
            }),
        })
    }

    pub fn options(&self) -> &PipeOptions {
        &self.shared.options
    }

    /// Open a pipe this side will advertise to the peer.
    ///
    /// Its writer stays paused until the peer reports `READY`.
    pub fn create_local(&self) -> Result<DuplexPipe> {
        let mut pipes = self.shared.pipes.lock();
        if pipes.closed {
            return Err(PipeError::ConnectionClosed);
        }

        let capacity = self.shared.parity.capacity();
        let mut chosen = None;
        for _ in 0..capacity {
            let candidate = pipes.next_id;
            pipes.next_id = match candidate.wrapping_add(2) {
                0 => 2,
                next => next,
            };
            if candidate != 0 && !pipes.open.contains_key(&candidate) {
                chosen = Some(candidate);
                break;
            }
        }
        let id = chosen.ok_or(PipeError::TooManyPipes(pipes.open.len()))?;

        let pipe = self.build(id, false);
        pipes.open.insert(id, pipe.clone());
        debug!(pipe_id = id, open = pipes.open.len(), "created local pipe");
        Ok(pipe)
    }

    /// Register the receiving end of a pipe the peer advertised.
    pub fn attach_remote(&self, id: u16) -> Result<DuplexPipe> {
        if id == 0 {
            return Err(PipeError::InvalidPipeId(id));
        }
        let mut pipes = self.shared.pipes.lock();
        if pipes.closed {
            return Err(PipeError::ConnectionClosed);
        }
        if pipes.open.contains_key(&id) {
            return Err(PipeError::DuplicatePipe(id));
        }
        let pipe = self.build(id, true);
        pipes.open.insert(id, pipe.clone());
        debug!(pipe_id = id, open = pipes.open.len(), "attached remote pipe");
        Ok(pipe)
    }

    pub fn get(&self, id: u16) -> Option<DuplexPipe> {
        self.shared.pipes.lock().open.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.pipes.lock().open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route a `PipeWrite` body.
    pub fn on_data(&self, id: u16, data: Bytes) {
        match self.get(id) {
            Some(pipe) => pipe.reader().buffer_data(data),
            None => debug!(pipe_id = id, len = data.len(), "data for unknown pipe ignored"),
        }
    }

    /// Route a `PipeState` body.
    pub fn on_state(&self, id: u16, flags: u8) {
        let flags = PipeState::from_bits_truncate(flags);
        match self.get(id) {
            Some(pipe) => pipe.apply_remote_state(flags),
            None => debug!(pipe_id = id, ?flags, "state for unknown pipe ignored"),
        }
    }

    /// Route a `PipeAck` body.
    pub fn on_ack(&self, id: u16, consumed: u32) {
        match self.get(id) {
            Some(pipe) => pipe.writer().on_ack(consumed),
            None => debug!(pipe_id = id, consumed, "ack for unknown pipe ignored"),
        }
    }

    /// Close every pipe and refuse new ones. Idempotent.
    pub fn complete_all(&self) {
        let drained: Vec<DuplexPipe> = {
            let mut pipes = self.shared.pipes.lock();
            pipes.closed = true;
            pipes.open.drain().map(|(_, pipe)| pipe).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "completing all pipes");
        }
        for pipe in drained {
            pipe.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.pipes.lock().closed
    }

    fn build(&self, id: u16, ready: bool) -> DuplexPipe {
        let pipe = DuplexPipe::new(
            id,
            self.shared.sink.clone(),
            self.shared.options.clone(),
            self.shared.chunk_size,
            ready,
        );
        let registry: Weak<RegistryShared> = Arc::downgrade(&self.shared);
        let state: Weak<PipeStateManager> = Arc::downgrade(pipe.state());
        pipe.state().set_teardown_hook(move |id| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let mut pipes = registry.pipes.lock();
            let same = pipes
                .open
                .get(&id)
                .is_some_and(|open| std::ptr::eq(Arc::as_ptr(open.state()), state.as_ptr()));
            if same {
                pipes.open.remove(&id);
                debug!(pipe_id = id, open = pipes.open.len(), "released pipe id");
            }
        });
        pipe
    }
}

impl std::fmt::Debug for PipeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeRegistry")
            .field("parity", &self.shared.parity)
            .field("open", &self.len())
            .finish_non_exhaustive()
    }
}
