use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};
use crate::message::Message;
use crate::message_type::MessageType;

/// Frame header: type (1) + body length (4) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Default maximum body size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One wire-level unit: a type tag and its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// What the body holds.
    pub message_type: MessageType,
    /// The undecoded body.
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(message_type: MessageType, body: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            body: body.into(),
        }
    }

    /// The total wire size of this frame (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────┬────────────┬──────────────────┐
/// │ Type (1B) │ Length     │ Body             │
/// │           │ (4B LE)    │ (Length bytes)   │
/// └───────────┴────────────┴──────────────────┘
/// ```
pub fn encode_frame(message_type: MessageType, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    if body.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: body.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + body.len());
    dst.put_u8(message_type.as_u8());
    dst.put_u32_le(body.len() as u32);
    dst.put_slice(body);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. Unknown type tags and
/// oversized bodies are rejected as soon as the header is available.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let message_type =
        MessageType::from_u8(src[0]).ok_or(FrameError::UnknownMessageType(src[0]))?;
    let body_len = u32::from_le_bytes([src[1], src[2], src[3], src[4]]) as usize;

    if body_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: max_payload,
        });
    }
    if let Some(fixed) = message_type.fixed_body_len() {
        if body_len != fixed {
            return Err(FrameError::malformed(
                message_type.name(),
                format!("expected {fixed}-byte body, header says {body_len}"),
            ));
        }
    }

    let total = HEADER_SIZE + body_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len).freeze();

    Ok(Some(Frame { message_type, body }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// `tokio-util` codec over the frame wire format.
///
/// Decodes [`Frame`]s and encodes both raw frames and typed [`Message`]s.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    config: FrameConfig,
}

impl FrameCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Update maximum body size for subsequent frames.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    fn check_len(&self, body_len: usize) -> Result<()> {
        if body_len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: body_len,
                max: self.config.max_payload_size,
            });
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, self.config.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        self.check_len(frame.body.len())?;
        encode_frame(frame.message_type, &frame.body, dst)
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        message.encode(dst);
        if let Err(err) = self.check_len(dst.len() - start - HEADER_SIZE) {
            dst.truncate(start);
            return Err(err);
        }
        Ok(())
    }
}
