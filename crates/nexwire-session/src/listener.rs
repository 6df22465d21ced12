use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nexwire_transport::{IpcStream, UnixDomainSocket};
use tracing::debug;

use crate::config::SessionConfig;
use crate::dispatch::Nexus;
use crate::error::Result;
use crate::handshake::{AllowAll, Authenticator};
use crate::session::Session;

/// Listens for and accepts session connections.
pub struct SessionListener {
    socket: UnixDomainSocket,
    config: SessionConfig,
    nexus: Arc<dyn Nexus>,
    authenticator: Arc<dyn Authenticator>,
    next_session_id: AtomicU64,
}

impl SessionListener {
    /// Bind to a Unix domain socket path with default configuration.
    pub fn bind(path: impl AsRef<Path>, nexus: Arc<dyn Nexus>) -> Result<Self> {
        Self::bind_with_config(path, SessionConfig::default(), nexus)
    }

    /// Bind with explicit configuration, validated before binding.
    pub fn bind_with_config(
        path: impl AsRef<Path>,
        config: SessionConfig,
        nexus: Arc<dyn Nexus>,
    ) -> Result<Self> {
        config.validate()?;
        let socket = UnixDomainSocket::bind(path)?;
        Ok(Self {
            socket,
            config,
            nexus,
            authenticator: Arc::new(AllowAll),
            next_session_id: AtomicU64::new(1),
        })
    }

    /// Override who may connect.
    ///
    /// This is the authentication boundary for every accepted session.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Accept the next connection and run the handshake, assigning an
    /// auto-generated session id.
    pub async fn accept(&self) -> Result<Session> {
        let stream = self.accept_stream().await?;
        self.establish(stream).await
    }

    /// Accept the next connection and use an explicit session id.
    pub async fn accept_with_id(&self, session_id: &str) -> Result<Session> {
        let stream = self.accept_stream().await?;
        self.establish_with_id(stream, session_id).await
    }

    /// Accept the next raw connection without running the handshake.
    ///
    /// Pair with [`establish`](Self::establish) to run handshakes off the
    /// accept loop.
    pub async fn accept_stream(&self) -> Result<IpcStream> {
        let stream = self.socket.accept().await?;
        debug!(path = %self.path().display(), "accepted connection");
        Ok(stream)
    }

    /// Run the server side of the handshake on an accepted stream.
    pub async fn establish(&self, stream: IpcStream) -> Result<Session> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.establish_with_id(stream, &format!("session-{id}"))
            .await
    }

    async fn establish_with_id(&self, stream: IpcStream, session_id: &str) -> Result<Session> {
        Session::server(
            stream,
            self.config.clone(),
            self.nexus.clone(),
            self.authenticator.as_ref(),
            session_id,
        )
        .await
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        self.socket.path()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::connector::{connect, connect_with_config};
    use crate::dispatch::MethodTable;
    use crate::error::SessionError;
    use crate::handshake::TokenAuthenticator;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = std::path::PathBuf::from(format!(
            "/tmp/nwl-{}-{}-{}",
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

    fn nexus() -> Arc<dyn Nexus> {
        Arc::new(MethodTable::new())
    }

    #[tokio::test]
    async fn accepts_multiple_sequential_connections() {
        let sock_path = make_sock_path("multi");
        let listener = SessionListener::bind(&sock_path, nexus()).expect("listener should bind");

        let server = tokio::spawn(async move {
            let first = listener.accept().await.expect("first accept should succeed");
            let second = listener.accept().await.expect("second accept should succeed");
            (first.session_id().to_string(), second.session_id().to_string())
        });

        let c1 = connect(&sock_path, nexus()).await.expect("first client should connect");
        let c2 = connect(&sock_path, nexus()).await.expect("second client should connect");
        let (first, second) = server.await.expect("server task should finish");

        assert_eq!(first, "session-1");
        assert_eq!(second, "session-2");
        assert_eq!(c1.session_id(), "session-1");
        assert_eq!(c2.session_id(), "session-2");

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[tokio::test]
    async fn explicit_session_id() {
        let sock_path = make_sock_path("explicit");
        let listener = SessionListener::bind(&sock_path, nexus()).expect("listener should bind");

        let server = tokio::spawn(async move {
            let session = listener
                .accept_with_id("orders-7")
                .await
                .expect("accept should succeed");
            assert!(session.peer_credentials().is_some());
            session.disconnected().await
        });

        let client = connect(&sock_path, nexus()).await.expect("client should connect");
        assert_eq!(client.session_id(), "orders-7");
        assert_eq!(client.transport_name(), "unix-domain-socket");
        client.disconnect().await;
        server.await.expect("server task should finish");

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[tokio::test]
    async fn token_authenticator_rejects_wrong_token() {
        let sock_path = make_sock_path("auth");
        let listener = SessionListener::bind(&sock_path, nexus())
            .expect("listener should bind")
            .with_authenticator(Arc::new(TokenAuthenticator::new("open-sesame")));

        let server = tokio::spawn(async move {
            let rejected = listener.accept().await;
            assert!(matches!(rejected, Err(SessionError::Authentication(_))));
            let accepted = listener.accept().await.expect("second accept should succeed");
            accepted.client_auth_token().map(str::to_string)
        });

        let mut config = SessionConfig::default();
        config.handshake.auth_token = Some("guess".to_string());
        let denied = connect_with_config(&sock_path, config.clone(), nexus()).await;
        assert!(matches!(denied, Err(SessionError::Authentication(_))));

        config.handshake.auth_token = Some("open-sesame".to_string());
        let client = connect_with_config(&sock_path, config, nexus())
            .await
            .expect("client with the right token should connect");
        let seen = server.await.expect("server task should finish");
        assert_eq!(seen.as_deref(), Some("open-sesame"));

        assert_eq!(client.session_id(), "session-2");

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
