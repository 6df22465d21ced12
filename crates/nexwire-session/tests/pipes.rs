mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::*;
use nexwire_frame::ExceptionKind;
use nexwire_pipe::{ChannelReader, ChannelWriter, PipeOptions};
use nexwire_session::{DispatchError, MethodTable, SessionConfig, SessionError};
use tokio_util::sync::CancellationToken;

const SUM_STREAM: u16 = 20;
const PRODUCE: u16 = 21;

fn stream_methods() -> MethodTable {
    methods()
        .with_method(SUM_STREAM, "sum-stream", |_args, ctx| async move {
            let pipe = ctx
                .pipe()
                .cloned()
                .ok_or_else(|| DispatchError::InvalidArguments("pipe required".into()))?;
            let items = ChannelReader::<i64>::json(pipe.reader().clone());
            let cancel = CancellationToken::new();
            let mut total = 0i64;
            loop {
                let read = items
                    .read(&cancel)
                    .await
                    .map_err(|err| DispatchError::failed(err.to_string()))?;
                total += read.items.iter().sum::<i64>();
                if read.is_completed {
                    break;
                }
            }
            Ok(Bytes::from(total.to_string()))
        })
        .with_method(PRODUCE, "produce", |args, ctx| async move {
            let count: usize = std::str::from_utf8(&args)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| DispatchError::InvalidArguments("count".into()))?;
            let pipe = ctx
                .pipe()
                .cloned()
                .ok_or_else(|| DispatchError::InvalidArguments("pipe required".into()))?;
            let items = ChannelWriter::<String>::json(pipe.writer().clone());
            let batch: Vec<String> = (0..count).map(|n| format!("item-{n}")).collect();
            items
                .write_all(&batch, &CancellationToken::new())
                .await
                .map_err(|err| DispatchError::failed(err.to_string()))?;
            Ok(Bytes::new())
        })
}

async fn stream_pair(config: SessionConfig) -> (nexwire_session::Session, nexwire_session::Session) {
    session_pair(config, Arc::new(MethodTable::new()), Arc::new(stream_methods())).await
}

#[tokio::test]
async fn pipe_echo_round_trips_a_megabyte() {
    let (client, server) = stream_pair(SessionConfig::default()).await;
    let pipe = client.create_pipe().expect("pipe should open");
    assert_eq!(pipe.id() % 2, 1, "client pipes use odd ids");

    let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    let writer = pipe.writer().clone();
    let to_send = payload.clone();
    let sending = tokio::spawn(async move {
        let cancel = CancellationToken::new();
        for chunk in to_send.chunks(64 * 1024) {
            let flushed = writer.write_async(chunk, &cancel).await.expect("write");
            assert!(!flushed.is_completed);
        }
        writer.complete_async().await.expect("complete writer");
    });
    let receiving = {
        let pipe = pipe.clone();
        tokio::spawn(async move { read_to_end(&pipe).await })
    };

    let result = tokio::time::timeout(
        WAIT,
        client.invoke_with_pipe(PIPE_ECHO, Bytes::new(), &pipe, &CancellationToken::new()),
    )
    .await
    .expect("echo should finish")
    .expect("echo should succeed");
    assert_eq!(result, Bytes::from((1024 * 1024).to_string()));

    sending.await.expect("sender should not panic");
    let echoed = receiving.await.expect("receiver should not panic");
    assert_eq!(echoed.len(), payload.len());
    assert!(echoed == payload);

    assert!(pipe.is_completed());
    assert!(server.is_healthy());
}

#[tokio::test]
async fn small_watermarks_still_deliver_everything() {
    let config = SessionConfig {
        pipe: PipeOptions {
            flush_chunk_size: 512,
            high_water_mark: 2048,
            low_water_mark: 512,
            high_water_cutoff: 64 * 1024,
        },
        ..SessionConfig::default()
    };
    let (client, _server) = stream_pair(config).await;
    let pipe = client.create_pipe().expect("pipe should open");

    let payload = vec![7u8; 48 * 1024];
    let writer = pipe.writer().clone();
    let to_send = payload.clone();
    let sending = tokio::spawn(async move {
        let cancel = CancellationToken::new();
        for chunk in to_send.chunks(4096) {
            writer.write_async(chunk, &cancel).await.expect("write");
        }
        writer.complete_async().await.expect("complete writer");
    });
    let receiving = {
        let pipe = pipe.clone();
        tokio::spawn(async move { read_to_end(&pipe).await })
    };

    tokio::time::timeout(
        WAIT,
        client.invoke_with_pipe(PIPE_ECHO, Bytes::new(), &pipe, &CancellationToken::new()),
    )
    .await
    .expect("echo should finish")
    .expect("echo should succeed");
    sending.await.expect("sender should not panic");
    assert_eq!(receiving.await.expect("receiver").len(), payload.len());
}

#[tokio::test]
async fn typed_channel_into_handler() {
    let (client, _server) = stream_pair(SessionConfig::default()).await;
    let pipe = client.create_pipe().expect("pipe should open");

    let items = ChannelWriter::<i64>::json(pipe.writer().clone());
    let values: Vec<i64> = (1..=100).collect();
    let send = async {
        items
            .write_all(&values, &CancellationToken::new())
            .await
            .expect("write items");
        items.complete().await.expect("complete channel");
    };
    let cancel = CancellationToken::new();
    let call = client.invoke_with_pipe(SUM_STREAM, Bytes::new(), &pipe, &cancel);

    let ((), result) = tokio::time::timeout(WAIT, async { tokio::join!(send, call) })
        .await
        .expect("stream should finish");
    assert_eq!(result.expect("sum-stream should succeed"), Bytes::from_static(b"5050"));
}

#[tokio::test]
async fn typed_channel_out_of_handler() {
    let (client, _server) = stream_pair(SessionConfig::default()).await;
    let pipe = client.create_pipe().expect("pipe should open");

    let reading = {
        let reader = ChannelReader::<String>::json(pipe.reader().clone());
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let mut all = Vec::new();
            loop {
                let read = reader.read(&cancel).await.expect("read items");
                all.extend(read.items);
                if read.is_completed {
                    return all;
                }
            }
        })
    };

    tokio::time::timeout(
        WAIT,
        client.invoke_with_pipe(PRODUCE, "25", &pipe, &CancellationToken::new()),
    )
    .await
    .expect("produce should finish")
    .expect("produce should succeed");

    let items = reading.await.expect("reader should not panic");
    assert_eq!(items.len(), 25);
    assert_eq!(items[0], "item-0");
    assert_eq!(items[24], "item-24");
}

#[tokio::test]
async fn failed_invocation_completes_the_pipe() {
    let (client, _server) = stream_pair(SessionConfig::default()).await;
    let pipe = client.create_pipe().expect("pipe should open");

    let err = client
        .invoke_with_pipe(PRODUCE, "not a number", &pipe, &CancellationToken::new())
        .await
        .expect_err("bad count should fail");
    assert!(matches!(
        err,
        SessionError::Remote {
            kind: ExceptionKind::InvalidArguments,
            ..
        }
    ));
    assert!(pipe.is_completed());
    let flushed = pipe
        .writer()
        .write_async(b"late", &CancellationToken::new())
        .await
        .expect("write to a completed pipe is not an error");
    assert!(flushed.is_completed);
}

#[tokio::test]
async fn pipes_are_released_after_completion() {
    let (client, server) = stream_pair(SessionConfig::default()).await;
    for _ in 0..3 {
        let pipe = client.create_pipe().expect("pipe should open");
        let writer = pipe.writer().clone();
        let sending = tokio::spawn(async move {
            writer
                .write_async(b"abc", &CancellationToken::new())
                .await
                .expect("write");
            writer.complete_async().await.expect("complete");
        });
        let receiving = {
            let pipe = pipe.clone();
            tokio::spawn(async move { read_to_end(&pipe).await })
        };
        client
            .invoke_with_pipe(PIPE_ECHO, Bytes::new(), &pipe, &CancellationToken::new())
            .await
            .expect("echo");
        sending.await.expect("sender");
        assert_eq!(receiving.await.expect("receiver"), b"abc");
    }

    // Both registries drop torn-down pipes.
    tokio::time::timeout(WAIT, async {
        while client.open_pipes() != 0 || server.open_pipes() != 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pipes should be released");
}
