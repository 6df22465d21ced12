use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use nexwire_frame::Message;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::Result;
use crate::sink::PipeSink;
use crate::state::{PipeState, PipeStateManager};

/// Outcome of one [`PipeReader::read_async`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadResult {
    /// Every unconsumed byte, starting at the read cursor.
    pub buffer: Bytes,
    /// No more data will arrive and everything in `buffer` was already examined.
    pub is_completed: bool,
    /// The read was cancelled; `buffer` is empty and nothing was consumed.
    pub is_canceled: bool,
}

impl ReadResult {
    fn canceled() -> Self {
        Self {
            is_canceled: true,
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct Backlog {
    segments: VecDeque<Bytes>,
    len: usize,
    /// Bytes at the front already examined by the consumer.
    examined: usize,
    /// Consumed bytes not yet acknowledged to the writer.
    pending_ack: u64,
    cancel_armed: bool,
    /// A fired token already produced one cancelled read.
    token_cancel_consumed: bool,
    completed: bool,
    completed_locally: bool,
}

impl Backlog {
    /// Collapse the backlog into one contiguous segment.
    fn contiguous(&mut self) -> Bytes {
        match self.segments.len() {
            0 => Bytes::new(),
            1 => self.segments[0].clone(),
            _ => {
                let mut joined = BytesMut::with_capacity(self.len);
                for segment in self.segments.drain(..) {
                    joined.extend_from_slice(&segment);
                }
                let joined = joined.freeze();
                self.segments.push_back(joined.clone());
                joined
            }
        }
    }

    fn consume(&mut self, mut count: usize) {
        self.len -= count;
        while count > 0 {
            let Some(front) = self.segments.front_mut() else {
                break;
            };
            if front.len() <= count {
                count -= front.len();
                self.segments.pop_front();
            } else {
                front.advance(count);
                count = 0;
            }
        }
    }
}

/// Receiving half of a duplex pipe.
///
/// The session's read loop feeds inbound chunks with
/// [`buffer_data`](Self::buffer_data); one consumer reads them with
/// [`read_async`](Self::read_async) and commits progress with
/// [`advance_to`](Self::advance_to). Consumed bytes are acknowledged to the
/// writing side on the next read.
#[derive(Clone)]
pub struct PipeReader {
    shared: Arc<ReaderShared>,
}

struct ReaderShared {
    pipe_id: u16,
    state: Arc<PipeStateManager>,
    sink: Arc<dyn PipeSink>,
    backlog: Mutex<Backlog>,
    data_available: Notify,
}

impl PipeReader {
    pub fn new(pipe_id: u16, state: Arc<PipeStateManager>, sink: Arc<dyn PipeSink>) -> Self {
        Self {
            shared: Arc::new(ReaderShared {
                pipe_id,
                state,
                sink,
                backlog: Mutex::new(Backlog::default()),
                data_available: Notify::new(),
            }),
        }
    }

    pub fn pipe_id(&self) -> u16 {
        self.shared.pipe_id
    }

    /// Append an inbound chunk and wake the pending read, if any.
    pub fn buffer_data(&self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        {
            let mut backlog = self.shared.backlog.lock();
            if backlog.completed {
                debug!(
                    pipe_id = self.shared.pipe_id,
                    len = data.len(),
                    "dropping data for completed pipe reader"
                );
                return;
            }
            backlog.len += data.len();
            backlog.segments.push_back(data);
        }
        self.shared.data_available.notify_one();
    }

    /// Bytes buffered and not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.shared.backlog.lock().len
    }

    /// Wait for unexamined data, completion, or cancellation.
    ///
    /// A token that has already fired cancels exactly one read; later reads
    /// with the same token proceed normally until a fresh token is used.
    pub async fn read_async(&self, cancel: &CancellationToken) -> ReadResult {
        self.flush_acknowledgements().await;

        loop {
            let notified = self.shared.data_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let watch_token = {
                let mut backlog = self.shared.backlog.lock();
                if backlog.cancel_armed {
                    backlog.cancel_armed = false;
                    return ReadResult::canceled();
                }
                let watch_token = if cancel.is_cancelled() {
                    if !backlog.token_cancel_consumed {
                        backlog.token_cancel_consumed = true;
                        return ReadResult::canceled();
                    }
                    false
                } else {
                    backlog.token_cancel_consumed = false;
                    true
                };

                if backlog.len > backlog.examined {
                    return ReadResult {
                        buffer: backlog.contiguous(),
                        ..ReadResult::default()
                    };
                }
                if backlog.completed {
                    return ReadResult {
                        buffer: backlog.contiguous(),
                        is_completed: true,
                        is_canceled: false,
                    };
                }
                watch_token
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled(), if watch_token => {}
            }
        }
    }

    /// Commit progress on the buffer returned by the last read.
    ///
    /// The first `consumed` bytes are released; bytes up to `examined` were
    /// inspected, so the next read waits until more than that is available.
    /// Both offsets are relative to the start of that buffer and are clamped
    /// to what is buffered.
    pub fn advance_to(&self, consumed: usize, examined: usize) {
        let mut backlog = self.shared.backlog.lock();
        let consumed = consumed.min(backlog.len);
        let examined = examined.clamp(consumed, backlog.len);
        backlog.consume(consumed);
        backlog.examined = examined - consumed;
        if !backlog.completed_locally {
            backlog.pending_ack += consumed as u64;
        }
        trace!(
            pipe_id = self.shared.pipe_id,
            consumed,
            examined,
            remaining = backlog.len,
            "advanced pipe reader"
        );
    }

    /// Cancel the pending read, or the next one if none is pending.
    ///
    /// Repeated calls before a read observes the cancellation collapse into one.
    pub fn cancel_pending_read(&self) {
        self.shared.backlog.lock().cancel_armed = true;
        self.shared.data_available.notify_one();
    }

    /// Stop reading: drop buffered data and tell the writing side.
    pub async fn complete(&self) -> Result<()> {
        {
            let mut backlog = self.shared.backlog.lock();
            if backlog.completed_locally {
                return Ok(());
            }
            backlog.completed = true;
            backlog.completed_locally = true;
            backlog.segments.clear();
            backlog.len = 0;
            backlog.examined = 0;
            backlog.pending_ack = 0;
        }
        self.shared.data_available.notify_one();

        if self
            .shared
            .state
            .update_state(PipeState::READER_COMPLETE, false)
        {
            self.shared
                .state
                .notify_state(PipeState::READER_COMPLETE)
                .await?;
        }
        Ok(())
    }

    /// The writing side is done; reads drain what is buffered, then complete.
    pub fn complete_remote(&self) {
        {
            let mut backlog = self.shared.backlog.lock();
            if backlog.completed {
                return;
            }
            backlog.completed = true;
        }
        self.shared.data_available.notify_one();
        self.shared
            .state
            .update_state(PipeState::READER_COMPLETE, false);
    }

    pub fn is_completed(&self) -> bool {
        self.shared.backlog.lock().completed
    }

    async fn flush_acknowledgements(&self) {
        let pending = {
            let mut backlog = self.shared.backlog.lock();
            if backlog.completed {
                backlog.pending_ack = 0;
            }
            std::mem::take(&mut backlog.pending_ack)
        };

        let mut remaining = pending;
        while remaining > 0 {
            let consumed = remaining.min(u64::from(u32::MAX)) as u32;
            remaining -= u64::from(consumed);
            let ack = Message::PipeAck {
                pipe_id: self.shared.pipe_id,
                consumed,
            };
            if let Err(err) = self.shared.sink.send(ack).await {
                debug!(pipe_id = self.shared.pipe_id, error = %err, "failed to acknowledge pipe data");
                return;
            }
        }
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backlog = self.shared.backlog.lock();
        f.debug_struct("PipeReader")
            .field("pipe_id", &self.shared.pipe_id)
            .field("buffered", &backlog.len)
            .field("completed", &backlog.completed)
            .finish()
    }
}
