use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Subcommand};
use nexwire_session::{
    connect_with_config, HandshakeConfig, MethodTable, Session, SessionConfig, SessionError,
};
use nexwire_transport::TransportError;

use crate::exit::{session_error, CliError, CliResult, TIMEOUT, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod info;
pub mod serve;
pub mod stream;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the demo methods on a Unix socket.
    Serve(ServeArgs),
    /// Invoke one method and print its result.
    Call(CallArgs),
    /// Stream a file through a duplex pipe and check the echo.
    Stream(StreamArgs),
    /// Connect, ping, and print session metadata.
    Info(InfoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format).await,
        Command::Call(args) => call::run(args, format).await,
        Command::Stream(args) => stream::run(args, format).await,
        Command::Info(args) => info::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Require clients to present this token.
    #[arg(long, env = "NEXWIRE_AUTH_TOKEN")]
    pub auth_token: Option<String>,
    /// Exit after N sessions have ended.
    #[arg(long)]
    pub max_sessions: Option<usize>,
    /// Close sessions that stay silent this long (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub idle_timeout: String,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Method id to invoke.
    #[arg(long, short = 'm')]
    pub method: u16,
    /// JSON arguments.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string arguments.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read arguments from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Send without waiting for a result.
    #[arg(long)]
    pub no_return: bool,
    #[arg(long, env = "NEXWIRE_AUTH_TOKEN")]
    pub auth_token: Option<String>,
    /// Give up on the call after this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// File to stream.
    #[arg(long)]
    pub file: PathBuf,
    /// Method id serving the pipe.
    #[arg(long, short = 'm', default_value = "3")]
    pub method: u16,
    #[arg(long, env = "NEXWIRE_AUTH_TOKEN")]
    pub auth_token: Option<String>,
    /// Give up on the transfer after this long.
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    #[arg(long, env = "NEXWIRE_AUTH_TOKEN")]
    pub auth_token: Option<String>,
    /// Connection timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Client configuration shared by the connecting commands.
pub fn client_config(auth_token: Option<String>, timeout: Duration) -> SessionConfig {
    SessionConfig {
        handshake: HandshakeConfig {
            timeout: timeout.min(Duration::from_secs(5 * 60)),
            auth_token,
            ..HandshakeConfig::default()
        },
        ..SessionConfig::default()
    }
}

/// Connect, retrying while the server socket is not there yet.
pub async fn connect_session(
    path: &Path,
    config: SessionConfig,
    timeout: Duration,
) -> CliResult<Session> {
    let start = Instant::now();
    loop {
        match connect_with_config(path, config.clone(), Arc::new(MethodTable::new())).await {
            Ok(session) => return Ok(session),
            Err(err) => {
                if !is_retryable_connect_error(&err) {
                    return Err(session_error("connect failed", err));
                }
                if start.elapsed() >= timeout {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("connect timed out after {timeout:?}"),
                    ));
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

fn is_retryable_connect_error(err: &SessionError) -> bool {
    match err {
        SessionError::Transport(TransportError::Connect { source, .. }) => {
            source.kind() == std::io::ErrorKind::NotFound
                || source.kind() == std::io::ErrorKind::ConnectionRefused
        }
        _ => false,
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
