//! Methods served by `nexwire serve`.

use std::time::Duration;

use bytes::Bytes;
use nexwire_session::{DispatchError, DispatchResult, InvocationContext, MethodTable};
use tokio_util::sync::CancellationToken;

pub const ECHO: u16 = 1;
pub const SUM: u16 = 2;
pub const PIPE_ECHO: u16 = 3;
pub const SLEEP: u16 = 4;

pub fn methods() -> MethodTable {
    MethodTable::new()
        .with_method(ECHO, "echo", |args, _ctx| async move { Ok(args) })
        .with_json_method(SUM, "sum", |values: Vec<i64>, _ctx| async move {
            values
                .iter()
                .try_fold(0i64, |acc, v| acc.checked_add(*v))
                .ok_or_else(|| DispatchError::InvalidArguments("sum overflows i64".into()))
        })
        .with_method(PIPE_ECHO, "pipe-echo", |_args, ctx| pipe_echo(ctx))
        .with_json_method(SLEEP, "sleep", |millis: u64, ctx| sleep(millis, ctx))
}

/// Write back everything read from the invocation's pipe; returns the byte count.
async fn pipe_echo(ctx: InvocationContext) -> DispatchResult {
    let pipe = ctx
        .pipe()
        .cloned()
        .ok_or_else(|| DispatchError::InvalidArguments("pipe-echo needs a pipe".into()))?;
    let cancel: &CancellationToken = ctx.cancellation();
    let mut echoed: u64 = 0;

    loop {
        let read = pipe.reader().read_async(cancel).await;
        if read.is_canceled {
            return Err(DispatchError::Cancelled);
        }
        let len = read.buffer.len();
        if len > 0 {
            let flushed = pipe
                .writer()
                .write_async(&read.buffer, cancel)
                .await
                .map_err(|err| DispatchError::failed(err.to_string()))?;
            if flushed.is_canceled {
                return Err(DispatchError::Cancelled);
            }
            pipe.reader().advance_to(len, len);
            echoed += len as u64;
            if flushed.is_completed {
                break;
            }
        }
        if read.is_completed {
            break;
        }
    }

    tracing::debug!(pipe_id = pipe.id(), echoed, "pipe echo finished");
    Ok(Bytes::from(echoed.to_string()))
}

async fn sleep(millis: u64, ctx: InvocationContext) -> Result<String, DispatchError> {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(millis)) => Ok(format!("slept {millis}ms")),
        _ = ctx.cancellation().cancelled() => Err(DispatchError::Cancelled),
    }
}
