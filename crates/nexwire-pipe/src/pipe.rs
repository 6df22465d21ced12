use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::options::PipeOptions;
use crate::reader::PipeReader;
use crate::sink::PipeSink;
use crate::state::{PipeState, PipeStateManager};
use crate::writer::PipeWriter;

/// Both halves of one virtual stream, sharing one state cell.
///
/// Cloning is cheap; every clone refers to the same pipe.
#[derive(Clone)]
pub struct DuplexPipe {
    id: u16,
    state: Arc<PipeStateManager>,
    reader: PipeReader,
    writer: PipeWriter,
}

impl DuplexPipe {
    pub(crate) fn new(
        id: u16,
        sink: Arc<dyn PipeSink>,
        options: PipeOptions,
        chunk_size: usize,
        ready: bool,
    ) -> Self {
        let state = Arc::new(PipeStateManager::new(id, sink.clone()));
        if ready {
            state.update_state(PipeState::READY, false);
        }
        let reader = PipeReader::new(id, state.clone(), sink.clone());
        let writer = PipeWriter::new(id, state.clone(), sink, options, chunk_size, ready);
        Self {
            id,
            state,
            reader,
            writer,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn reader(&self) -> &PipeReader {
        &self.reader
    }

    pub fn writer(&self) -> &PipeWriter {
        &self.writer
    }

    pub fn state(&self) -> &Arc<PipeStateManager> {
        &self.state
    }

    /// Take the halves apart, e.g. to hand them to separate tasks.
    pub fn split(self) -> (PipeReader, PipeWriter) {
        (self.reader, self.writer)
    }

    /// Tell the creating side this end is attached.
    pub async fn announce_ready(&self) -> Result<()> {
        self.state.notify_state(PipeState::READY).await
    }

    /// Wait until both ends are attached.
    ///
    /// Returns false if the pipe was torn down first.
    pub async fn ready(&self) -> bool {
        let mut rx = self.state.subscribe();
        let ready = match rx
            .wait_for(|state| state.contains(PipeState::READY) || state.is_torn_down())
            .await
        {
            Ok(state) => state.contains(PipeState::READY),
            Err(_) => false,
        };
        ready
    }

    /// Finish the pipe in both directions and tell the peer.
    ///
    /// Buffered writes are flushed first if the peer is attached. Pending and
    /// later operations on either half resolve as completed.
    pub async fn complete(&self) -> Result<()> {
        if self.state.current_state().contains(PipeState::READY) && !self.writer.is_completed() {
            self.writer.flush_async(&CancellationToken::new()).await?;
        }
        let applied = self.state.update_state(PipeState::COMPLETE, false);
        self.reader.complete_remote();
        self.writer.complete_remote();
        if applied {
            self.state.notify_state(PipeState::COMPLETE).await?;
        }
        Ok(())
    }

    /// Finish the pipe locally without telling the peer (the connection is gone).
    pub fn close(&self) {
        self.state.update_state(PipeState::COMPLETE, false);
        self.reader.complete_remote();
        self.writer.complete_remote();
    }

    /// Apply a `PipeState` frame received from the peer.
    pub fn apply_remote_state(&self, flags: PipeState) {
        if flags.contains(PipeState::READY) {
            self.state.update_state(PipeState::READY, false);
            self.writer.set_ready();
        }
        if flags.contains(PipeState::COMPLETE) {
            self.state.update_state(PipeState::COMPLETE, false);
        }
        if flags.intersects(PipeState::READER_COMPLETE | PipeState::COMPLETE) {
            self.writer.complete_remote();
        }
        if flags.intersects(PipeState::WRITER_COMPLETE | PipeState::COMPLETE) {
            self.reader.complete_remote();
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_torn_down()
    }
}

impl std::fmt::Debug for DuplexPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexPipe")
            .field("id", &self.id)
            .field("state", &self.state.current_state())
            .finish_non_exhaustive()
    }
}
