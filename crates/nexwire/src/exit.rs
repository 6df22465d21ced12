use std::fmt;
use std::io;

use nexwire_frame::FrameError;
use nexwire_pipe::PipeError;
use nexwire_session::SessionError;
use nexwire_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        err if err.is_structural() => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn pipe_error(context: &str, err: PipeError) -> CliError {
    match err {
        PipeError::Frame(err) => frame_error(context, err),
        PipeError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        PipeError::Encode(_) | PipeError::Decode(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        PipeError::InvalidOptions(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Transport(err) => transport_error(context, err),
        SessionError::Frame(err) => frame_error(context, err),
        SessionError::Pipe(err) => pipe_error(context, err),
        SessionError::Authentication(_) => {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        SessionError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        SessionError::Config(_) => CliError::new(USAGE, format!("{context}: {err}")),
        SessionError::Json(_) | SessionError::Protocol(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        SessionError::Remote { .. }
        | SessionError::Cancelled
        | SessionError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nexwire_frame::ExceptionKind;

    use super::*;

    #[test]
    fn session_errors_map_to_exit_codes() {
        let cases = [
            (SessionError::Authentication("bad token".into()), PERMISSION_DENIED),
            (SessionError::Timeout(Duration::from_secs(1)), TIMEOUT),
            (SessionError::Config("ping".into()), USAGE),
            (SessionError::Protocol("garbage".into()), DATA_INVALID),
            (SessionError::ConnectionClosed, FAILURE),
            (
                SessionError::Remote {
                    kind: ExceptionKind::Failed,
                    message: "boom".into(),
                },
                FAILURE,
            ),
            (SessionError::TooManyInvocations, INTERNAL),
        ];
        for (err, code) in cases {
            assert_eq!(session_error("call", err).code, code);
        }
    }

    #[test]
    fn missing_socket_is_a_transport_error() {
        let err = SessionError::Transport(TransportError::Connect {
            path: "/tmp/none.sock".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
        let cli = session_error("connect failed", err);
        assert_eq!(cli.code, TRANSPORT_ERROR);
        assert!(cli.message.starts_with("connect failed: "));
    }
}
