use std::io::ErrorKind;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::{encode_frame, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::message::Message;
use crate::message_type::MessageType;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `AsyncWrite` stream.
///
/// Each call encodes one frame into a scratch buffer and writes it out whole,
/// so a frame's bytes are contiguous on the wire as long as a single task
/// owns the writer at a time.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.message_type, frame.body.as_ref()).await
    }

    /// Encode and send a raw body under a type tag.
    pub async fn send(&mut self, message_type: MessageType, body: &[u8]) -> Result<()> {
        if body.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: body.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(message_type, body, &mut self.buf)?;
        self.write_buffered().await
    }

    /// Encode and send a typed message.
    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        self.buf.clear();
        message.encode(&mut self.buf);

        let body_len = self.buf.len() - HEADER_SIZE;
        if body_len > self.config.max_payload_size {
            self.buf.clear();
            return Err(FrameError::PayloadTooLarge {
                size: body_len,
                max: self.config.max_payload_size,
            });
        }
        self.write_buffered().await
    }

    async fn write_buffered(&mut self) -> Result<()> {
        self.inner
            .write_all(&self.buf)
            .await
            .map_err(map_write_error)?;
        self.flush().await
    }

    /// Flush the underlying stream.
    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await.map_err(map_write_error)
    }

    /// Flush and shut down the write direction of the underlying stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(map_write_error)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame encoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn map_write_error(err: std::io::Error) -> FrameError {
    match err.kind() {
        ErrorKind::WriteZero | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
            FrameError::ConnectionClosed
        }
        _ => FrameError::Io(err),
    }
}
