use std::sync::Arc;

use bitflags::bitflags;
use nexwire_frame::Message;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::error::Result;
use crate::sink::PipeSink;

bitflags! {
    /// Lifecycle flags of one pipe, as seen by one side.
    ///
    /// The same bits travel in `PipeState` frames to tell the peer about a
    /// local transition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipeState: u8 {
        /// Both ends are attached; data may flow.
        const READY           = 0x01;
        /// No more data will be delivered to this side's reader.
        const READER_COMPLETE = 0x02;
        /// No more data will be sent by this side's writer.
        const WRITER_COMPLETE = 0x04;
        /// The pipe is finished in both directions.
        const COMPLETE        = 0x08;
    }
}

impl PipeState {
    /// No flags set.
    pub const UNSET: Self = Self::empty();

    /// Whether a side holding these flags has released the pipe.
    pub fn is_torn_down(self) -> bool {
        self.contains(Self::COMPLETE)
            || self.contains(Self::READER_COMPLETE | Self::WRITER_COMPLETE)
    }
}

type TeardownHook = Box<dyn FnOnce(u16) + Send>;

/// Shared flag cell for the reader and writer halves of one pipe.
///
/// Both halves hold the same `Arc`, so a transition made by either is visible
/// to the other immediately. Once the flags reach a torn-down combination the
/// cell freezes and every later update is rejected.
pub struct PipeStateManager {
    pipe_id: u16,
    sink: Arc<dyn PipeSink>,
    state: watch::Sender<PipeState>,
    on_teardown: Mutex<Option<TeardownHook>>,
}

impl PipeStateManager {
    pub fn new(pipe_id: u16, sink: Arc<dyn PipeSink>) -> Self {
        let (state, _) = watch::channel(PipeState::UNSET);
        Self {
            pipe_id,
            sink,
            state,
            on_teardown: Mutex::new(None),
        }
    }

    /// Run `hook` once, with the pipe id, when the pipe is torn down.
    pub fn set_teardown_hook(&self, hook: impl FnOnce(u16) + Send + 'static) {
        *self.on_teardown.lock() = Some(Box::new(hook));
    }

    pub fn pipe_id(&self) -> u16 {
        self.pipe_id
    }

    pub fn current_state(&self) -> PipeState {
        *self.state.borrow()
    }

    pub fn is_torn_down(&self) -> bool {
        self.current_state().is_torn_down()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<PipeState> {
        self.state.subscribe()
    }

    /// Set (or with `remove`, clear) `flag`.
    ///
    /// Returns false if the pipe was already torn down, in which case nothing
    /// changes.
    pub fn update_state(&self, flag: PipeState, remove: bool) -> bool {
        let mut applied = false;
        let mut tore_down = false;
        self.state.send_if_modified(|state| {
            if state.is_torn_down() {
                return false;
            }
            applied = true;
            let before = *state;
            if remove {
                state.remove(flag);
            } else {
                state.insert(flag);
            }
            tore_down = state.is_torn_down();
            *state != before
        });

        if !applied {
            trace!(pipe_id = self.pipe_id, ?flag, "ignoring update on torn-down pipe");
            return false;
        }
        if tore_down {
            debug!(pipe_id = self.pipe_id, state = ?self.current_state(), "pipe torn down");
            let hook = self.on_teardown.lock().take();
            if let Some(hook) = hook {
                hook(self.pipe_id);
            }
        }
        true
    }

    /// Tell the peer about a local transition.
    pub async fn notify_state(&self, state: PipeState) -> Result<()> {
        trace!(pipe_id = self.pipe_id, ?state, "notifying peer of pipe state");
        self.sink
            .send(Message::PipeState {
                pipe_id: self.pipe_id,
                flags: state.bits(),
            })
            .await
    }
}

impl std::fmt::Debug for PipeStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeStateManager")
            .field("pipe_id", &self.pipe_id)
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}
