use std::time::Instant;

use bytes::Bytes;
use nexwire_session::SessionError;
use tokio_util::sync::CancellationToken;

use crate::cmd::{client_config, connect_session, parse_duration, CallArgs};
use crate::exit::{io_error, session_error, CliError, CliResult, DATA_INVALID, SUCCESS, TIMEOUT};
use crate::output::{print_result, OutputFormat};

pub async fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = load_payload(&args)?;
    let session = connect_session(
        &args.path,
        client_config(args.auth_token.clone(), timeout),
        timeout,
    )
    .await?;

    if args.no_return {
        session
            .invoke_no_return(args.method, payload)
            .await
            .map_err(|err| session_error("send failed", err))?;
        session.disconnect().await;
        return Ok(SUCCESS);
    }

    // Timing out cancels the call, which also cancels the remote handler.
    let cancel = CancellationToken::new();
    let timer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        })
    };
    let started = Instant::now();
    let outcome = session.invoke(args.method, payload, &cancel).await;
    timer.abort();
    let result = match outcome {
        Err(SessionError::Cancelled) if cancel.is_cancelled() => {
            session.disconnect().await;
            return Err(CliError::new(
                TIMEOUT,
                format!("no result within {timeout:?}"),
            ));
        }
        other => other.map_err(|err| session_error("call failed", err))?,
    };

    print_result(
        &result,
        session.session_id(),
        args.method,
        started.elapsed(),
        format,
    );
    session.disconnect().await;
    Ok(SUCCESS)
}

fn load_payload(args: &CallArgs) -> CliResult<Bytes> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(DATA_INVALID, format!("invalid JSON: {err}")))?;
        return Ok(Bytes::from(json.clone()));
    }
    if let Some(data) = &args.data {
        return Ok(Bytes::from(data.clone()));
    }
    if let Some(path) = &args.file {
        let data = std::fs::read(path).map_err(|err| io_error("read failed", err))?;
        return Ok(Bytes::from(data));
    }
    Ok(Bytes::new())
}
