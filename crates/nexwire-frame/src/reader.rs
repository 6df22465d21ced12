use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::codec::{Frame, FrameCodec, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::Message;

/// Reads complete frames from any `AsyncRead` stream.
///
/// Handles partial reads internally. Callers always get complete frames.
pub struct FrameReader<T> {
    inner: FramedRead<T, FrameCodec>,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner: FramedRead::new(inner, FrameCodec::new(config)),
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        match self.inner.next().await {
            Some(result) => result,
            None => Err(FrameError::ConnectionClosed),
        }
    }

    /// Read the next frame and decode its body.
    pub async fn read_message(&mut self) -> Result<Message> {
        let frame = self.read_frame().await?;
        Message::from_frame(&frame)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Consume the reader and return the inner stream.
    ///
    /// Bytes already buffered but not yet decoded are discarded.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.inner.decoder_mut().set_max_payload_size(max_payload_size);
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        self.inner.decoder().config()
    }
}
