#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nexwire_pipe::DuplexPipe;
use nexwire_session::{
    AllowAll, DispatchError, InvocationContext, MethodTable, Nexus, Session, SessionConfig,
};
use nexwire_transport::IpcStream;
use tokio_util::sync::CancellationToken;

pub const ECHO: u16 = 1;
pub const SUM: u16 = 2;
pub const PIPE_ECHO: u16 = 3;
pub const WAIT_FOR_CANCEL: u16 = 4;
pub const FAIL: u16 = 5;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Pair {
    pub a: i64,
    pub b: i64,
}

/// Methods shared by most tests.
pub fn methods() -> MethodTable {
    MethodTable::new()
        .with_method(ECHO, "echo", |args, _ctx| async move { Ok(args) })
        .with_json_method(SUM, "sum", |pair: Pair, _ctx| async move {
            Ok::<_, DispatchError>(pair.a + pair.b)
        })
        .with_method(PIPE_ECHO, "pipe-echo", |_args, ctx| pipe_echo(ctx))
        .with_method(WAIT_FOR_CANCEL, "wait-for-cancel", |_args, ctx| async move {
            ctx.cancellation().cancelled().await;
            Err(DispatchError::Cancelled)
        })
        .with_method(FAIL, "fail", |args, _ctx| async move {
            Err(DispatchError::failed(String::from_utf8_lossy(&args).into_owned()))
        })
}

/// Copy everything read from the attached pipe back onto it.
pub async fn pipe_echo(ctx: InvocationContext) -> Result<Bytes, DispatchError> {
    let pipe = ctx
        .pipe()
        .cloned()
        .ok_or_else(|| DispatchError::InvalidArguments("pipe required".into()))?;
    let cancel = CancellationToken::new();
    let mut total = 0usize;
    loop {
        let read = pipe.reader().read_async(&cancel).await;
        let len = read.buffer.len();
        if len > 0 {
            let flushed = pipe
                .writer()
                .write_async(&read.buffer, &cancel)
                .await
                .map_err(|err| DispatchError::failed(err.to_string()))?;
            pipe.reader().advance_to(len, len);
            total += len;
            if flushed.is_completed {
                break;
            }
        }
        if read.is_completed {
            break;
        }
    }
    Ok(Bytes::from(total.to_string()))
}

/// Connected client/server sessions over an in-memory stream.
pub async fn session_pair(
    config: SessionConfig,
    client_nexus: Arc<dyn Nexus>,
    server_nexus: Arc<dyn Nexus>,
) -> (Session, Session) {
    let (client_stream, server_stream) = IpcStream::memory_pair(256 * 1024);
    let server_config = config.clone();
    let server = tokio::spawn(async move {
        Session::server(
            server_stream,
            server_config,
            server_nexus,
            &AllowAll,
            "session-test",
        )
        .await
    });
    let client = Session::client(client_stream, config, client_nexus)
        .await
        .expect("client handshake should succeed");
    let server = server
        .await
        .expect("server task should not panic")
        .expect("server handshake should succeed");
    (client, server)
}

/// Client with no methods talking to a server exposing [`methods`].
pub async fn default_pair() -> (Session, Session) {
    session_pair(
        SessionConfig::default(),
        Arc::new(MethodTable::new()),
        Arc::new(methods()),
    )
    .await
}

/// Drain a pipe's reader until the writing side completes.
pub async fn read_to_end(pipe: &DuplexPipe) -> Vec<u8> {
    let cancel = CancellationToken::new();
    let mut out = Vec::new();
    loop {
        let read = pipe.reader().read_async(&cancel).await;
        out.extend_from_slice(&read.buffer);
        let len = read.buffer.len();
        pipe.reader().advance_to(len, len);
        if read.is_completed {
            return out;
        }
    }
}
