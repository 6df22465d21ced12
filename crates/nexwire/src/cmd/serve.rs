use std::sync::Arc;
use std::time::Duration;

use nexwire_session::{Session, SessionConfig, SessionListener, TokenAuthenticator};
use nexwire_transport::IpcStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cmd::{parse_duration, ServeArgs};
use crate::demo;
use crate::exit::{io_error, session_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub async fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let config = server_config(parse_duration(&args.idle_timeout)?);
    let mut listener =
        SessionListener::bind_with_config(&args.path, config, Arc::new(demo::methods()))
            .map_err(|err| session_error("bind failed", err))?;
    if let Some(token) = args.auth_token {
        listener = listener.with_authenticator(Arc::new(TokenAuthenticator::new(token)));
    }
    let listener = Arc::new(listener);
    info!(path = %listener.path().display(), "serving");

    let stop = CancellationToken::new();
    let mut sessions = JoinSet::new();
    let mut ended = 0usize;
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        if args.max_sessions.is_some_and(|max| ended >= max) {
            break;
        }
        tokio::select! {
            signal = &mut interrupted => {
                signal.map_err(|err| io_error("signal handler failed", err))?;
                info!("interrupt received, shutting down");
                break;
            }
            accepted = listener.accept_stream() => {
                let stream = accepted.map_err(|err| session_error("accept failed", err))?;
                sessions.spawn(serve_one(listener.clone(), stream, stop.clone()));
            }
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {
                ended += 1;
            }
        }
    }

    stop.cancel();
    while sessions.join_next().await.is_some() {}
    Ok(SUCCESS)
}

fn server_config(idle_timeout: Duration) -> SessionConfig {
    let ping_interval = (idle_timeout / 3).clamp(Duration::from_millis(50), Duration::from_secs(10));
    SessionConfig {
        ping_interval,
        idle_timeout,
        ..SessionConfig::default()
    }
}

async fn serve_one(listener: Arc<SessionListener>, stream: IpcStream, stop: CancellationToken) {
    let session: Session = match listener.establish(stream).await {
        Ok(session) => session,
        Err(err) => {
            warn!(error = %err, "handshake failed");
            return;
        }
    };
    info!(
        session_id = session.session_id(),
        peer = ?session.peer_credentials(),
        "session started"
    );

    let reason = tokio::select! {
        reason = session.disconnected() => reason,
        _ = stop.cancelled() => {
            session.disconnect().await;
            session.disconnected().await
        }
    };
    info!(session_id = session.session_id(), %reason, "session ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_interval_follows_idle_timeout() {
        let config = server_config(Duration::from_secs(30));
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        config.validate().unwrap();

        let config = server_config(Duration::from_millis(100));
        assert_eq!(config.ping_interval, Duration::from_millis(50));
        config.validate().unwrap();
    }
}
