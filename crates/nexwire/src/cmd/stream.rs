use std::time::{Duration, Instant};

use bytes::Bytes;
use nexwire_pipe::DuplexPipe;
use nexwire_session::SessionError;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cmd::{client_config, connect_session, parse_duration, StreamArgs};
use crate::exit::{io_error, pipe_error, session_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{millis, print_json, print_table, OutputFormat};

const WRITE_CHUNK: usize = 64 * 1024;

#[derive(Serialize)]
struct StreamOutput {
    session_id: String,
    pipe_id: u16,
    bytes_sent: usize,
    bytes_echoed: usize,
    matched: bool,
    elapsed_ms: f64,
    mib_per_sec: f64,
}

pub async fn run(args: StreamArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let data = Bytes::from(std::fs::read(&args.file).map_err(|err| io_error("read failed", err))?);
    let session = connect_session(
        &args.path,
        client_config(args.auth_token.clone(), timeout),
        timeout,
    )
    .await?;

    let pipe = session
        .create_pipe()
        .map_err(|err| session_error("pipe open failed", err))?;
    let cancel = CancellationToken::new();
    let timer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        })
    };

    let started = Instant::now();
    let sending = tokio::spawn(send_all(pipe.clone(), data.clone(), cancel.clone()));
    let receiving = tokio::spawn(receive_all(pipe.clone(), cancel.clone()));
    let outcome = session
        .invoke_with_pipe(args.method, Bytes::new(), &pipe, &cancel)
        .await;
    timer.abort();

    if let Err(err) = outcome {
        session.disconnect().await;
        return Err(match err {
            SessionError::Cancelled if cancel.is_cancelled() => {
                CliError::new(TIMEOUT, format!("stream did not finish within {timeout:?}"))
            }
            other => session_error("stream failed", other),
        });
    }

    let sent = join(sending).await?;
    let echoed = join(receiving).await?;
    let elapsed = started.elapsed();
    session.disconnect().await;

    let out = StreamOutput {
        session_id: session.session_id().to_string(),
        pipe_id: pipe.id(),
        bytes_sent: sent,
        bytes_echoed: echoed.len(),
        matched: echoed == data,
        elapsed_ms: millis(elapsed),
        mib_per_sec: throughput(sent + echoed.len(), elapsed),
    };
    print_stream(&out, format);

    if out.matched {
        Ok(SUCCESS)
    } else {
        Err(CliError::new(
            FAILURE,
            format!(
                "echo mismatch: sent {} bytes, received {}",
                out.bytes_sent, out.bytes_echoed
            ),
        ))
    }
}

async fn send_all(
    pipe: DuplexPipe,
    data: Bytes,
    cancel: CancellationToken,
) -> CliResult<usize> {
    let writer = pipe.writer();
    let mut sent = 0;
    for chunk in data.chunks(WRITE_CHUNK) {
        let flushed = writer
            .write_async(chunk, &cancel)
            .await
            .map_err(|err| pipe_error("pipe write failed", err))?;
        if flushed.is_completed || flushed.is_canceled {
            return Ok(sent);
        }
        sent += chunk.len();
    }
    writer
        .complete_async()
        .await
        .map_err(|err| pipe_error("pipe complete failed", err))?;
    Ok(sent)
}

async fn receive_all(pipe: DuplexPipe, cancel: CancellationToken) -> CliResult<Vec<u8>> {
    let reader = pipe.reader();
    let mut received = Vec::new();
    loop {
        let read = reader.read_async(&cancel).await;
        if read.is_canceled {
            return Ok(received);
        }
        received.extend_from_slice(&read.buffer);
        let len = read.buffer.len();
        reader.advance_to(len, len);
        if read.is_completed {
            return Ok(received);
        }
    }
}

async fn join<T>(task: tokio::task::JoinHandle<CliResult<T>>) -> CliResult<T> {
    task.await
        .map_err(|err| CliError::new(crate::exit::INTERNAL, format!("pipe task failed: {err}")))?
}

fn throughput(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    let rate = bytes as f64 / (1024.0 * 1024.0) / secs;
    (rate * 100.0).round() / 100.0
}

fn print_stream(out: &StreamOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => print_table(
            &["PIPE", "SENT", "ECHOED", "MATCH", "ELAPSED", "MiB/s"],
            vec![vec![
                out.pipe_id.to_string(),
                out.bytes_sent.to_string(),
                out.bytes_echoed.to_string(),
                out.matched.to_string(),
                format!("{:.2}ms", out.elapsed_ms),
                format!("{:.2}", out.mib_per_sec),
            ]],
        ),
        OutputFormat::Pretty => println!(
            "pipe={} sent={} echoed={} match={} elapsed={:.2}ms rate={:.2}MiB/s",
            out.pipe_id,
            out.bytes_sent,
            out.bytes_echoed,
            out.matched,
            out.elapsed_ms,
            out.mib_per_sec
        ),
        OutputFormat::Raw => println!("{}", out.bytes_echoed),
    }
}
