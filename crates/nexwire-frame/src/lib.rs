//! Type-tagged, length-prefixed message framing.
//!
//! Every message on a nexwire connection is framed with:
//! - A 1-byte message type tag
//! - A 4-byte little-endian body length
//!
//! followed by the body. No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod message;
pub mod message_type;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameCodec, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use message::{
    CancellationOrigin, DisconnectReason, ExceptionKind, Invocation, InvocationFlags, Message,
    UNTRACKED_INVOCATION_ID,
};
pub use message_type::MessageType;
pub use reader::FrameReader;
pub use writer::FrameWriter;
