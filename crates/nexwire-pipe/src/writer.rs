use std::sync::Arc;

use bytes::BytesMut;
use nexwire_frame::Message;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{PipeError, Result};
use crate::options::PipeOptions;
use crate::sink::PipeSink;
use crate::state::{PipeState, PipeStateManager};

/// Outcome of a write or flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushResult {
    /// The pipe was closed by the peer, the owning invocation, or a disconnect.
    /// Unsent data was discarded.
    pub is_completed: bool,
    /// The caller's cancellation fired first. Unsent data stays buffered.
    pub is_canceled: bool,
}

impl FlushResult {
    fn completed() -> Self {
        Self {
            is_completed: true,
            is_canceled: false,
        }
    }

    fn canceled() -> Self {
        Self {
            is_completed: false,
            is_canceled: true,
        }
    }
}

struct Flow {
    buffer: BytesMut,
    in_flight: usize,
    ready: bool,
    over_high_water: bool,
    forced_pause: bool,
    completed_locally: bool,
}

impl Flow {
    fn paused(&self) -> bool {
        !self.ready || self.over_high_water || self.forced_pause
    }
}

enum Resume {
    Go,
    Canceled,
    Closed,
}

/// Sending half of a duplex pipe.
///
/// Bytes are buffered locally and flushed as `PipeWrite` frames of at most
/// `chunk_size` bytes. The writer keeps an estimate of bytes the peer has not
/// acknowledged yet: above the high water mark it pauses, at or below the low
/// water mark it resumes, and a write that would exceed the cutoff fails.
#[derive(Clone)]
pub struct PipeWriter {
    shared: Arc<WriterShared>,
}

struct WriterShared {
    pipe_id: u16,
    state: Arc<PipeStateManager>,
    sink: Arc<dyn PipeSink>,
    options: PipeOptions,
    chunk_size: usize,
    flow: Mutex<Flow>,
    paused: watch::Sender<bool>,
    closed: CancellationToken,
    flush_lock: tokio::sync::Mutex<()>,
}

impl PipeWriter {
    /// Create a writer.
    ///
    /// `chunk_size` is the effective frame chunk (already capped by the frame
    /// payload limit). A writer created before the peer attached starts
    /// paused until [`set_ready`](Self::set_ready).
    pub fn new(
        pipe_id: u16,
        state: Arc<PipeStateManager>,
        sink: Arc<dyn PipeSink>,
        options: PipeOptions,
        chunk_size: usize,
        ready: bool,
    ) -> Self {
        let (paused, _) = watch::channel(!ready);
        Self {
            shared: Arc::new(WriterShared {
                pipe_id,
                state,
                sink,
                options,
                chunk_size: chunk_size.max(1),
                flow: Mutex::new(Flow {
                    buffer: BytesMut::new(),
                    in_flight: 0,
                    ready,
                    over_high_water: false,
                    forced_pause: false,
                    completed_locally: false,
                }),
                paused,
                closed: CancellationToken::new(),
                flush_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn pipe_id(&self) -> u16 {
        self.shared.pipe_id
    }

    /// Buffer `data` without sending it.
    ///
    /// Fails with `BackpressureExceeded` if buffered plus unacknowledged bytes
    /// would pass the cutoff; nothing is buffered in that case.
    pub fn write(&self, data: &[u8]) -> Result<FlushResult> {
        if self.shared.closed.is_cancelled() {
            return Ok(FlushResult::completed());
        }
        let mut flow = self.shared.flow.lock();
        if flow.completed_locally {
            return Err(PipeError::WriterCompleted(self.shared.pipe_id));
        }
        let pending = flow.buffer.len() + flow.in_flight + data.len();
        if pending > self.shared.options.high_water_cutoff {
            debug!(
                pipe_id = self.shared.pipe_id,
                pending,
                cutoff = self.shared.options.high_water_cutoff,
                "pipe write rejected past cutoff"
            );
            return Err(PipeError::BackpressureExceeded {
                pipe_id: self.shared.pipe_id,
                pending,
                cutoff: self.shared.options.high_water_cutoff,
            });
        }
        flow.buffer.extend_from_slice(data);
        Ok(FlushResult::default())
    }

    /// Buffer `data` and flush it.
    ///
    /// A cancellation that has already fired returns `is_canceled` before
    /// anything is buffered.
    pub async fn write_async(&self, data: &[u8], cancel: &CancellationToken) -> Result<FlushResult> {
        if cancel.is_cancelled() {
            return Ok(FlushResult::canceled());
        }
        let result = self.write(data)?;
        if result.is_completed {
            return Ok(result);
        }
        self.flush_async(cancel).await
    }

    /// Send everything buffered, waiting out pauses.
    pub async fn flush_async(&self, cancel: &CancellationToken) -> Result<FlushResult> {
        if cancel.is_cancelled() {
            return Ok(FlushResult::canceled());
        }
        let _flushing = tokio::select! {
            guard = self.shared.flush_lock.lock() => guard,
            _ = cancel.cancelled() => return Ok(FlushResult::canceled()),
            _ = self.shared.closed.cancelled() => return Ok(FlushResult::completed()),
        };

        loop {
            if self.shared.closed.is_cancelled() {
                return Ok(FlushResult::completed());
            }
            if self.shared.flow.lock().buffer.is_empty() {
                return Ok(FlushResult::default());
            }

            match self.wait_until_resumed(cancel).await {
                Resume::Go => {}
                Resume::Canceled => return Ok(FlushResult::canceled()),
                Resume::Closed => return Ok(FlushResult::completed()),
            }

            let chunk = {
                let mut flow = self.shared.flow.lock();
                let len = flow.buffer.len().min(self.shared.chunk_size);
                let chunk = flow.buffer.split_to(len).freeze();
                flow.in_flight += chunk.len();
                if flow.in_flight > self.shared.options.high_water_mark {
                    flow.over_high_water = true;
                }
                self.publish_pause(&flow);
                chunk
            };
            if chunk.is_empty() {
                continue;
            }

            trace!(pipe_id = self.shared.pipe_id, len = chunk.len(), "flushing pipe chunk");
            let sent = self
                .shared
                .sink
                .send(Message::PipeWrite {
                    pipe_id: self.shared.pipe_id,
                    data: chunk,
                })
                .await;
            match sent {
                Ok(()) => {}
                Err(PipeError::ConnectionClosed) => {
                    self.complete_remote();
                    return Ok(FlushResult::completed());
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Stop accepting writes, flush the remainder, then tell the peer.
    ///
    /// Writes from the moment this is called fail with `WriterCompleted`;
    /// anything buffered before that is still sent.
    pub async fn complete_async(&self) -> Result<FlushResult> {
        {
            let mut flow = self.shared.flow.lock();
            if flow.completed_locally {
                return Ok(FlushResult::default());
            }
            flow.completed_locally = true;
        }
        let flushed = self.flush_async(&CancellationToken::new()).await?;
        if flushed.is_completed {
            return Ok(flushed);
        }
        if self
            .shared
            .state
            .update_state(PipeState::WRITER_COMPLETE, false)
        {
            self.shared
                .state
                .notify_state(PipeState::WRITER_COMPLETE)
                .await?;
        }
        Ok(FlushResult::default())
    }

    /// The pipe is closed from outside this writer.
    ///
    /// Buffered data is discarded and every pending or later write resolves
    /// with `is_completed`.
    pub fn complete_remote(&self) {
        if self.shared.closed.is_cancelled() {
            return;
        }
        self.shared.closed.cancel();
        {
            let mut flow = self.shared.flow.lock();
            flow.buffer.clear();
        }
        self.shared
            .state
            .update_state(PipeState::WRITER_COMPLETE, false);
    }

    /// The peer attached and can receive data.
    pub fn set_ready(&self) {
        let mut flow = self.shared.flow.lock();
        flow.ready = true;
        self.publish_pause(&flow);
    }

    /// Force writes to pause (or lift a forced pause).
    pub fn set_pause_writing(&self, paused: bool) {
        let mut flow = self.shared.flow.lock();
        flow.forced_pause = paused;
        self.publish_pause(&flow);
    }

    /// The peer consumed `consumed` bytes.
    pub fn on_ack(&self, consumed: u32) {
        let mut flow = self.shared.flow.lock();
        flow.in_flight = flow.in_flight.saturating_sub(consumed as usize);
        if flow.over_high_water && flow.in_flight <= self.shared.options.low_water_mark {
            flow.over_high_water = false;
        }
        trace!(
            pipe_id = self.shared.pipe_id,
            consumed,
            in_flight = flow.in_flight,
            "pipe ack"
        );
        self.publish_pause(&flow);
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.paused.borrow()
    }

    pub fn is_completed(&self) -> bool {
        self.shared.closed.is_cancelled() || self.shared.flow.lock().completed_locally
    }

    /// Unacknowledged bytes sent to the peer.
    pub fn in_flight(&self) -> usize {
        self.shared.flow.lock().in_flight
    }

    /// Bytes written but not flushed.
    pub fn buffered_len(&self) -> usize {
        self.shared.flow.lock().buffer.len()
    }

    fn publish_pause(&self, flow: &Flow) {
        let paused = flow.paused();
        self.shared.paused.send_if_modified(|current| {
            if *current == paused {
                return false;
            }
            *current = paused;
            true
        });
    }

    async fn wait_until_resumed(&self, cancel: &CancellationToken) -> Resume {
        let mut paused = self.shared.paused.subscribe();
        tokio::select! {
            resumed = async { paused.wait_for(|paused| !*paused).await.is_ok() } => {
                if resumed { Resume::Go } else { Resume::Closed }
            }
            _ = cancel.cancelled() => Resume::Canceled,
            _ = self.shared.closed.cancelled() => Resume::Closed,
        }
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flow = self.shared.flow.lock();
        f.debug_struct("PipeWriter")
            .field("pipe_id", &self.shared.pipe_id)
            .field("buffered", &flow.buffer.len())
            .field("in_flight", &flow.in_flight)
            .field("paused", &flow.paused())
            .finish()
    }
}
