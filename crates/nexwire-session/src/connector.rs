use std::path::Path;
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::dispatch::Nexus;
use crate::error::Result;
use crate::session::Session;

/// Connect to a listening session server with default configuration.
pub async fn connect(path: impl AsRef<Path>, nexus: Arc<dyn Nexus>) -> Result<Session> {
    connect_with_config(path, SessionConfig::default(), nexus).await
}

/// Connect with explicit configuration.
///
/// The configuration is validated before any connection attempt.
pub async fn connect_with_config(
    path: impl AsRef<Path>,
    config: SessionConfig,
    nexus: Arc<dyn Nexus>,
) -> Result<Session> {
    config.validate()?;

    #[cfg(not(unix))]
    {
        let _ = nexus;
        let path = path.as_ref().to_path_buf();
        return Err(nexwire_transport::TransportError::Connect {
            path,
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "nexwire-session requires Unix domain sockets; use Session::client with another stream",
            ),
        }
        .into());
    }

    #[cfg(unix)]
    {
        let stream = nexwire_transport::UnixDomainSocket::connect(path).await?;
        Session::client(stream, config, nexus).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::dispatch::MethodTable;
    use crate::error::SessionError;
    use crate::listener::SessionListener;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "nwc-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("listener.sock")
    }

    fn echo() -> Arc<dyn Nexus> {
        Arc::new(MethodTable::new().with_method(1, "echo", |args, _ctx| async move { Ok(args) }))
    }

    #[tokio::test]
    async fn connect_convenience() {
        let sock_path = make_sock_path("basic");
        let listener = SessionListener::bind(&sock_path, echo()).expect("listener should bind");

        let server = tokio::spawn(async move {
            let session = listener.accept().await.expect("listener should accept");
            session.disconnected().await
        });

        let client = connect(&sock_path, Arc::new(MethodTable::new()))
            .await
            .expect("client should connect");
        let response = client
            .invoke(1, Bytes::from_static(b"hello"), &CancellationToken::new())
            .await
            .expect("invoke should succeed");
        assert_eq!(response.as_ref(), b"hello");

        client.disconnect().await;
        server.await.expect("server task should complete");
        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[tokio::test]
    async fn runtime_payload_not_limited_by_handshake_cap() {
        let sock_path = make_sock_path("large");
        let config = SessionConfig {
            handshake: crate::handshake::HandshakeConfig {
                max_handshake_payload: 1024,
                ..Default::default()
            },
            ..SessionConfig::default()
        };
        let listener = SessionListener::bind_with_config(&sock_path, config.clone(), echo())
            .expect("listener should bind");

        let server = tokio::spawn(async move {
            let session = listener.accept().await.expect("listener should accept");
            session.disconnected().await
        });

        let client = connect_with_config(&sock_path, config, Arc::new(MethodTable::new()))
            .await
            .expect("client should connect");
        let payload = Bytes::from(vec![0xAB; 64 * 1024]);
        let response = client
            .invoke(1, payload.clone(), &CancellationToken::new())
            .await
            .expect("invoke should succeed");
        assert_eq!(response, payload);

        client.disconnect().await;
        server.await.expect("server task should complete");
        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[tokio::test]
    async fn invalid_config_fails_before_connecting() {
        let config = SessionConfig {
            ping_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(30),
            ..SessionConfig::default()
        };
        let result =
            connect_with_config("/nonexistent/nexwire.sock", config, Arc::new(MethodTable::new()))
                .await;
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[tokio::test]
    async fn missing_socket_is_a_transport_error() {
        let result = connect("/nonexistent/nexwire.sock", Arc::new(MethodTable::new())).await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
    }
}
