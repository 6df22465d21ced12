//! Typed message bodies.
//!
//! Every [`Message`] maps onto exactly one [`Frame`]; [`Message::encode`] writes
//! the complete frame (header included) and [`Message::from_frame`] parses a
//! body according to its type tag.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{Frame, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::message_type::MessageType;

/// Invocation id reserved for invocations whose result nobody awaits.
pub const UNTRACKED_INVOCATION_ID: u16 = 0;

bitflags! {
    /// Flags carried by an [`Invocation`].
    ///
    /// Receivers ignore bits they do not know.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InvocationFlags: u8 {
        /// The caller does not want a result frame.
        const IGNORE_RETURN = 0b0000_0001;
        /// The caller may send a cancellation for this invocation.
        const CANCELLABLE   = 0b0000_0010;
        /// A pipe id follows the method id.
        const HAS_PIPE      = 0b0000_0100;
    }
}

/// Why a connection is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DisconnectReason {
    /// Orderly shutdown requested by either side.
    Graceful = 0,
    /// The peer sent something this side could not decode.
    Protocol = 1,
    /// The handshake was rejected.
    Authentication = 2,
    /// Handshake or idle timeout elapsed.
    Timeout = 3,
    /// The underlying byte stream failed.
    Transport = 4,
}

impl DisconnectReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Graceful,
            1 => Self::Protocol,
            2 => Self::Authentication,
            3 => Self::Timeout,
            4 => Self::Transport,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Graceful => "graceful",
            Self::Protocol => "protocol",
            Self::Authentication => "authentication",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Category of a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionKind {
    /// The handler ran and returned an error.
    Failed = 0,
    /// No handler is registered for the method id.
    UnknownMethod = 1,
    /// The arguments could not be decoded by the handler.
    InvalidArguments = 2,
    /// The handler limit was reached; the method never ran.
    Overloaded = 3,
}

impl ExceptionKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Failed,
            1 => Self::UnknownMethod,
            2 => Self::InvalidArguments,
            3 => Self::Overloaded,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::UnknownMethod => "unknown-method",
            Self::InvalidArguments => "invalid-arguments",
            Self::Overloaded => "overloaded",
        }
    }
}

impl std::fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which side produced an `InvocationCancellation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CancellationOrigin {
    /// The caller asks the handler to stop.
    Caller = 0,
    /// The handler reports that it stopped because it was cancelled.
    Handler = 1,
}

impl CancellationOrigin {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Caller),
            1 => Some(Self::Handler),
            _ => None,
        }
    }
}

/// A remote method call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub id: u16,
    pub flags: InvocationFlags,
    pub method_id: u16,
    /// Pipe advertised to the handler, if any. Encoding sets `HAS_PIPE` from this.
    pub pipe_id: Option<u16>,
    pub args: Bytes,
}

/// A decoded frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// JSON greeting sent by the connecting side.
    ClientGreeting(Bytes),
    /// JSON greeting answered by the accepting side.
    ServerGreeting(Bytes),
    Ping(u64),
    Pong(u64),
    Disconnect(DisconnectReason),
    Invocation(Invocation),
    InvocationResult {
        id: u16,
        payload: Bytes,
    },
    InvocationException {
        id: u16,
        kind: ExceptionKind,
        message: String,
    },
    InvocationCancellation {
        id: u16,
        origin: CancellationOrigin,
    },
    PipeState {
        pipe_id: u16,
        flags: u8,
    },
    PipeWrite {
        pipe_id: u16,
        data: Bytes,
    },
    PipeAck {
        pipe_id: u16,
        consumed: u32,
    },
}

impl Message {
    /// The frame type this message is carried in.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ClientGreeting(_) => MessageType::ClientGreeting,
            Self::ServerGreeting(_) => MessageType::ServerGreeting,
            Self::Ping(_) => MessageType::Ping,
            Self::Pong(_) => MessageType::Pong,
            Self::Disconnect(_) => MessageType::Disconnect,
            Self::Invocation(_) => MessageType::Invocation,
            Self::InvocationResult { .. } => MessageType::InvocationResult,
            Self::InvocationException { .. } => MessageType::InvocationException,
            Self::InvocationCancellation { .. } => MessageType::InvocationCancellation,
            Self::PipeState { .. } => MessageType::PipeState,
            Self::PipeWrite { .. } => MessageType::PipeWrite,
            Self::PipeAck { .. } => MessageType::PipeAck,
        }
    }

    /// Append the complete frame (header and body) to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let start = dst.len();
        dst.put_u8(self.message_type().as_u8());
        dst.put_u32_le(0);
        let body_start = dst.len();

        match self {
            Self::ClientGreeting(json) | Self::ServerGreeting(json) => dst.put_slice(json),
            Self::Ping(nonce) | Self::Pong(nonce) => dst.put_u64_le(*nonce),
            Self::Disconnect(reason) => dst.put_u8(*reason as u8),
            Self::Invocation(invocation) => {
                let mut flags = invocation.flags;
                flags.set(InvocationFlags::HAS_PIPE, invocation.pipe_id.is_some());
                dst.reserve(7 + invocation.args.len());
                dst.put_u16_le(invocation.id);
                dst.put_u8(flags.bits());
                dst.put_u16_le(invocation.method_id);
                if let Some(pipe_id) = invocation.pipe_id {
                    dst.put_u16_le(pipe_id);
                }
                dst.put_slice(&invocation.args);
            }
            Self::InvocationResult { id, payload } => {
                dst.put_u16_le(*id);
                dst.put_slice(payload);
            }
            Self::InvocationException { id, kind, message } => {
                dst.put_u16_le(*id);
                dst.put_u8(*kind as u8);
                dst.put_slice(message.as_bytes());
            }
            Self::InvocationCancellation { id, origin } => {
                dst.put_u16_le(*id);
                dst.put_u8(*origin as u8);
            }
            Self::PipeState { pipe_id, flags } => {
                dst.put_u16_le(*pipe_id);
                dst.put_u8(*flags);
            }
            Self::PipeWrite { pipe_id, data } => {
                dst.put_u16_le(*pipe_id);
                dst.put_slice(data);
            }
            Self::PipeAck { pipe_id, consumed } => {
                dst.put_u16_le(*pipe_id);
                dst.put_u32_le(*consumed);
            }
        }

        let body_len = (dst.len() - body_start) as u32;
        dst[start + 1..start + HEADER_SIZE].copy_from_slice(&body_len.to_le_bytes());
    }

    /// Encode into a standalone [`Frame`].
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        let mut bytes = buf.freeze();
        bytes.advance(HEADER_SIZE);
        Frame::new(self.message_type(), bytes)
    }

    /// Parse a frame body according to its type.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let kind = frame.message_type;
        let mut body = frame.body.clone();

        if let Some(fixed) = kind.fixed_body_len() {
            if body.len() != fixed {
                return Err(FrameError::malformed(
                    kind.name(),
                    format!("expected {fixed}-byte body, got {}", body.len()),
                ));
            }
        }

        let message = match kind {
            MessageType::ClientGreeting => Self::ClientGreeting(body),
            MessageType::ServerGreeting => Self::ServerGreeting(body),
            MessageType::Ping => Self::Ping(body.get_u64_le()),
            MessageType::Pong => Self::Pong(body.get_u64_le()),
            MessageType::Disconnect => {
                let raw = body.get_u8();
                let reason = DisconnectReason::from_u8(raw).ok_or_else(|| {
                    FrameError::malformed(kind.name(), format!("unknown reason {raw}"))
                })?;
                Self::Disconnect(reason)
            }
            MessageType::Invocation => {
                require(kind, &body, 5)?;
                let id = body.get_u16_le();
                let flags = InvocationFlags::from_bits_truncate(body.get_u8());
                let method_id = body.get_u16_le();
                let pipe_id = if flags.contains(InvocationFlags::HAS_PIPE) {
                    require(kind, &body, 2)?;
                    Some(body.get_u16_le())
                } else {
                    None
                };
                Self::Invocation(Invocation {
                    id,
                    flags,
                    method_id,
                    pipe_id,
                    args: body,
                })
            }
            MessageType::InvocationResult => {
                require(kind, &body, 2)?;
                let id = body.get_u16_le();
                Self::InvocationResult { id, payload: body }
            }
            MessageType::InvocationException => {
                require(kind, &body, 3)?;
                let id = body.get_u16_le();
                let raw = body.get_u8();
                let exception = ExceptionKind::from_u8(raw).ok_or_else(|| {
                    FrameError::malformed(kind.name(), format!("unknown exception kind {raw}"))
                })?;
                let message = String::from_utf8(body.to_vec())
                    .map_err(|_| FrameError::malformed(kind.name(), "message is not UTF-8"))?;
                Self::InvocationException {
                    id,
                    kind: exception,
                    message,
                }
            }
            MessageType::InvocationCancellation => {
                let id = body.get_u16_le();
                let raw = body.get_u8();
                let origin = CancellationOrigin::from_u8(raw).ok_or_else(|| {
                    FrameError::malformed(kind.name(), format!("unknown origin {raw}"))
                })?;
                Self::InvocationCancellation { id, origin }
            }
            MessageType::PipeState => Self::PipeState {
                pipe_id: body.get_u16_le(),
                flags: body.get_u8(),
            },
            MessageType::PipeWrite => {
                require(kind, &body, 2)?;
                let pipe_id = body.get_u16_le();
                Self::PipeWrite {
                    pipe_id,
                    data: body,
                }
            }
            MessageType::PipeAck => Self::PipeAck {
                pipe_id: body.get_u16_le(),
                consumed: body.get_u32_le(),
            },
        };
        Ok(message)
    }
}

fn require(kind: MessageType, body: &Bytes, len: usize) -> Result<()> {
    if body.len() < len {
        return Err(FrameError::malformed(
            kind.name(),
            format!("body truncated ({} bytes, need {len})", body.len()),
        ));
    }
    Ok(())
}
