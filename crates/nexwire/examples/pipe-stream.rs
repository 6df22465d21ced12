//! Both ends in one process: the client streams numbers to the server over a
//! typed channel and the server replies with their sum.
//!
//! Run with:
//!   cargo run --example pipe-stream

use std::sync::Arc;

use bytes::Bytes;
use nexwire::pipe::{ChannelReader, ChannelWriter};
use nexwire::session::{AllowAll, DispatchError, MethodTable, Session, SessionConfig};
use nexwire::transport::IpcStream;
use tokio_util::sync::CancellationToken;

const SUM_STREAM: u16 = 1;

fn server_methods() -> MethodTable {
    MethodTable::new().with_method(SUM_STREAM, "sum-stream", |_args, ctx| async move {
        let pipe = ctx
            .pipe()
            .cloned()
            .ok_or_else(|| DispatchError::InvalidArguments("pipe required".into()))?;
        let numbers = ChannelReader::<u64>::json(pipe.reader().clone());
        let mut total = 0u64;
        loop {
            let read = numbers
                .read(ctx.cancellation())
                .await
                .map_err(|err| DispatchError::failed(err.to_string()))?;
            if read.is_canceled {
                return Err(DispatchError::Cancelled);
            }
            total += read.items.iter().sum::<u64>();
            if read.is_completed {
                break;
            }
        }
        Ok(Bytes::from(total.to_string()))
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (client_stream, server_stream) = IpcStream::memory_pair(256 * 1024);

    let server = tokio::spawn(async move {
        Session::server(
            server_stream,
            SessionConfig::default(),
            Arc::new(server_methods()),
            &AllowAll,
            "example",
        )
        .await
    });
    let client = Session::client(
        client_stream,
        SessionConfig::default(),
        Arc::new(MethodTable::new()),
    )
    .await?;
    let server = server.await??;

    let pipe = client.create_pipe()?;
    let numbers = ChannelWriter::<u64>::json(pipe.writer().clone());
    let values: Vec<u64> = (1..=10_000).collect();
    let cancel = CancellationToken::new();

    let send = async {
        numbers.write_all(&values, &cancel).await?;
        numbers.complete().await?;
        Ok::<_, nexwire::pipe::PipeError>(())
    };
    let call = client.invoke_with_pipe(SUM_STREAM, Bytes::new(), &pipe, &cancel);
    let (sent, total) = tokio::join!(send, call);
    sent?;
    println!(
        "server summed {} numbers to {}",
        values.len(),
        String::from_utf8_lossy(&total?)
    );

    client.disconnect().await;
    let reason = server.disconnected().await;
    println!("server saw disconnect: {reason}");
    Ok(())
}
