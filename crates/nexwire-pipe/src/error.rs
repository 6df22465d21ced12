/// Errors that can occur on a duplex pipe or typed channel.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// Frame-level failure while sending pipe traffic.
    #[error(transparent)]
    Frame(#[from] nexwire_frame::FrameError),

    /// A write would push buffered plus unacknowledged bytes past the hard cutoff.
    #[error("pipe {pipe_id} backpressure exceeded ({pending} bytes pending, cutoff {cutoff})")]
    BackpressureExceeded {
        pipe_id: u16,
        pending: usize,
        cutoff: usize,
    },

    /// The local writer was already completed.
    #[error("pipe {0} writer already completed")]
    WriterCompleted(u16),

    /// The session carrying the pipe has closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Every pipe id available to this side is in use.
    #[error("no free pipe ids ({0} pipes open)")]
    TooManyPipes(usize),

    /// The peer advertised a pipe id that is already open.
    #[error("pipe {0} is already open")]
    DuplicatePipe(u16),

    /// Pipe id 0 is never allocated.
    #[error("invalid pipe id {0}")]
    InvalidPipeId(u16),

    /// Pipe options failed validation.
    #[error("invalid pipe options: {0}")]
    InvalidOptions(String),

    /// A typed item could not be encoded.
    #[error("failed to encode channel item: {0}")]
    Encode(String),

    /// Buffered bytes do not form a valid typed item.
    #[error("malformed channel item: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, PipeError>;
