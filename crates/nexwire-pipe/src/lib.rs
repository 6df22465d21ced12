//! Duplex pipes: flow-controlled virtual byte streams multiplexed over one
//! session, plus typed channels layered on top.
//!
//! Each pipe has a [`PipeReader`] fed by the session's read loop and a
//! [`PipeWriter`] that flushes chunks through a [`PipeSink`]. The two halves
//! share a [`PipeStateManager`]. A [`PipeRegistry`] owns every open pipe of
//! one connection and routes inbound pipe frames by id.

pub mod channel;
pub mod codec;
pub mod error;
pub mod options;
pub mod pipe;
pub mod pool;
pub mod reader;
pub mod registry;
pub mod sink;
pub mod state;
pub mod writer;

#[cfg(test)]
mod testing;

pub use channel::{ChannelRead, ChannelReader, ChannelWriter};
pub use codec::{ItemCodec, JsonCodec};
pub use error::{PipeError, Result};
pub use options::PipeOptions;
pub use pipe::DuplexPipe;
pub use pool::{BufferPool, PooledBuf};
pub use reader::{PipeReader, ReadResult};
pub use registry::{PipeIdParity, PipeRegistry};
pub use sink::PipeSink;
pub use state::{PipeState, PipeStateManager};
pub use writer::{FlushResult, PipeWriter};
