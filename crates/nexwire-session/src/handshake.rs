use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use nexwire_frame::{FrameError, FrameReader, FrameWriter, Message};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::error::{Result, SessionError};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
const MAX_SESSION_ID_LEN: usize = 128;
const MAX_AUTH_TOKEN_LEN: usize = 4096;

const MIN_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Greeting sent by the connecting side.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientGreeting {
    /// Protocol name. Must be `nexwire` by default.
    pub protocol: String,
    /// Protocol version string, `<major>.<minor>`.
    pub version: String,
    /// Optional authentication token.
    /// Treated as opaque credential material and redacted in debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Greeting answered by the accepting side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerGreeting {
    /// Protocol name. Must match the client's.
    pub protocol: String,
    /// The server's protocol version.
    pub version: String,
    /// Server-assigned session identifier.
    pub session_id: String,
}

/// Result of a successful handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Server-assigned session identifier.
    pub session_id: String,
    /// The server's protocol version.
    pub protocol_version: String,
    /// Client auth token observed by the server side.
    pub client_auth_token: Option<String>,
}

/// Configuration for the greeting exchange.
#[derive(Clone)]
pub struct HandshakeConfig {
    /// Bound on the whole exchange.
    pub timeout: Duration,
    /// Expected protocol name.
    pub protocol_name: String,
    /// Local protocol version.
    pub protocol_version: String,
    /// Maximum frame body accepted before authentication completes.
    pub max_handshake_payload: usize,
    /// Optional auth token sent by the client.
    /// This is transported as plaintext and should not be logged.
    pub auth_token: Option<String>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: "nexwire".to_string(),
            protocol_version: "1.0".to_string(),
            max_handshake_payload: 16 * 1024,
            auth_token: None,
        }
    }
}

impl HandshakeConfig {
    /// Check every field against its documented range.
    pub fn validate(&self) -> Result<()> {
        if self.timeout < MIN_HANDSHAKE_TIMEOUT || self.timeout > MAX_HANDSHAKE_TIMEOUT {
            return Err(SessionError::Config(format!(
                "handshake timeout {:?} outside {:?}..={:?}",
                self.timeout, MIN_HANDSHAKE_TIMEOUT, MAX_HANDSHAKE_TIMEOUT
            )));
        }
        if self.max_handshake_payload == 0 {
            return Err(SessionError::Config(
                "max_handshake_payload must be non-zero".to_string(),
            ));
        }
        validate_protocol_name(&self.protocol_name).map_err(into_config)?;
        validate_version(&self.protocol_version).map_err(into_config)?;
        validate_auth_token(self.auth_token.as_deref()).map_err(into_config)?;
        Ok(())
    }
}

fn into_config(err: SessionError) -> SessionError {
    match err {
        SessionError::Protocol(reason) => SessionError::Config(reason),
        other => other,
    }
}

/// Decides whether a client may open a session.
///
/// Return `Err(reason)` to reject; the client sees an authentication failure.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, greeting: &ClientGreeting) -> std::result::Result<(), String>;
}

impl<F> Authenticator for F
where
    F: Fn(&ClientGreeting) -> std::result::Result<(), String> + Send + Sync,
{
    fn authenticate(&self, greeting: &ClientGreeting) -> std::result::Result<(), String> {
        self(greeting)
    }
}

/// Accepts every client.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _greeting: &ClientGreeting) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Accepts clients presenting one shared token.
#[derive(Clone)]
pub struct TokenAuthenticator {
    token: String,
}

impl TokenAuthenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, greeting: &ClientGreeting) -> std::result::Result<(), String> {
        match greeting.auth_token.as_deref() {
            Some(token) if token == self.token => Ok(()),
            Some(_) => Err("invalid auth token".to_string()),
            None => Err("auth token required".to_string()),
        }
    }
}

impl fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("token", &format_args!("<redacted:{} bytes>", self.token.len()))
            .finish()
    }
}

impl fmt::Debug for ClientGreeting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("ClientGreeting");
        dbg.field("protocol", &self.protocol)
            .field("version", &self.version);
        redacted_field(&mut dbg, "auth_token", self.auth_token.as_deref());
        dbg.finish()
    }
}

impl fmt::Debug for HandshakeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("HandshakeResult");
        dbg.field("session_id", &self.session_id)
            .field("protocol_version", &self.protocol_version);
        redacted_field(&mut dbg, "client_auth_token", self.client_auth_token.as_deref());
        dbg.finish()
    }
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("HandshakeConfig");
        dbg.field("timeout", &self.timeout)
            .field("protocol_name", &self.protocol_name)
            .field("protocol_version", &self.protocol_version)
            .field("max_handshake_payload", &self.max_handshake_payload);
        redacted_field(&mut dbg, "auth_token", self.auth_token.as_deref());
        dbg.finish()
    }
}

fn redacted_field(dbg: &mut fmt::DebugStruct<'_, '_>, name: &str, token: Option<&str>) {
    match token {
        Some(token) => dbg.field(name, &format_args!("<redacted:{} bytes>", token.len())),
        None => dbg.field(name, &Option::<String>::None),
    };
}

/// Run the connecting side of the greeting exchange.
///
/// A `Disconnect` answer is reported as the typed failure it carries.
pub async fn handshake_client<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    config: &HandshakeConfig,
) -> Result<HandshakeResult>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    config.validate()?;

    let exchange = async {
        let greeting = ClientGreeting {
            protocol: config.protocol_name.clone(),
            version: config.protocol_version.clone(),
            auth_token: config.auth_token.clone(),
        };
        let body = serde_json::to_vec(&greeting)?;
        writer
            .send_message(&Message::ClientGreeting(Bytes::from(body)))
            .await?;

        let response = match read_handshake_message(reader).await? {
            Message::ServerGreeting(body) => serde_json::from_slice::<ServerGreeting>(&body)?,
            Message::Disconnect(reason) => return Err(SessionError::from_disconnect(reason)),
            other => {
                return Err(SessionError::Protocol(format!(
                    "expected server-greeting, got {}",
                    other.message_type()
                )))
            }
        };
        Ok::<_, SessionError>(response)
    };

    let response = tokio::time::timeout(config.timeout, exchange)
        .await
        .map_err(|_| SessionError::Timeout(config.timeout))??;

    validate_protocol_name(&response.protocol)?;
    validate_version(&response.version)?;
    validate_session_id(&response.session_id)?;

    if response.protocol != config.protocol_name {
        return Err(SessionError::Protocol(format!(
            "unknown protocol '{}' (expected '{}')",
            response.protocol, config.protocol_name
        )));
    }
    if !is_version_compatible(&config.protocol_version, &response.version)? {
        return Err(SessionError::Protocol(format!(
            "incompatible version '{}' (local '{}')",
            response.version, config.protocol_version
        )));
    }

    debug!(
        session_id = %response.session_id,
        version = %response.version,
        "client handshake complete"
    );
    Ok(HandshakeResult {
        session_id: response.session_id,
        protocol_version: response.version,
        client_auth_token: None,
    })
}

/// Run the accepting side of the greeting exchange.
///
/// A rejected client is sent `Disconnect` with the failure's reason before
/// the error is returned.
pub async fn handshake_server<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    session_id: &str,
    config: &HandshakeConfig,
    authenticator: &dyn Authenticator,
) -> Result<HandshakeResult>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    config.validate()?;
    validate_session_id(session_id).map_err(into_config)?;

    let received = tokio::time::timeout(config.timeout, read_handshake_message(reader))
        .await
        .map_err(|_| SessionError::Timeout(config.timeout))
        .and_then(|message| message)
        .and_then(|message| check_client_greeting(message, config, authenticator));

    let greeting = match received {
        Ok(greeting) => greeting,
        Err(err) => {
            warn!(session_id, error = %err, "rejecting client handshake");
            if !matches!(err, SessionError::ConnectionClosed) {
                let reject = Message::Disconnect(err.disconnect_reason());
                let _ = tokio::time::timeout(config.timeout, writer.send_message(&reject)).await;
            }
            return Err(err);
        }
    };

    let response = ServerGreeting {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        session_id: session_id.to_string(),
    };
    let body = serde_json::to_vec(&response)?;
    tokio::time::timeout(
        config.timeout,
        writer.send_message(&Message::ServerGreeting(Bytes::from(body))),
    )
    .await
    .map_err(|_| SessionError::Timeout(config.timeout))??;

    debug!(session_id, version = %greeting.version, "server handshake complete");
    Ok(HandshakeResult {
        session_id: session_id.to_string(),
        protocol_version: config.protocol_version.clone(),
        client_auth_token: greeting.auth_token,
    })
}

fn check_client_greeting(
    message: Message,
    config: &HandshakeConfig,
    authenticator: &dyn Authenticator,
) -> Result<ClientGreeting> {
    let body = match message {
        Message::ClientGreeting(body) => body,
        other => {
            return Err(SessionError::Protocol(format!(
                "expected client-greeting, got {}",
                other.message_type()
            )))
        }
    };
    let greeting: ClientGreeting = serde_json::from_slice(&body)?;

    validate_protocol_name(&greeting.protocol)?;
    validate_version(&greeting.version)?;
    validate_auth_token(greeting.auth_token.as_deref())?;

    if greeting.protocol != config.protocol_name {
        return Err(SessionError::Protocol(format!(
            "unknown protocol '{}' (expected '{}')",
            greeting.protocol, config.protocol_name
        )));
    }
    if !is_version_compatible(&greeting.version, &config.protocol_version)? {
        return Err(SessionError::Protocol(format!(
            "incompatible version '{}' (server '{}')",
            greeting.version, config.protocol_version
        )));
    }

    authenticator
        .authenticate(&greeting)
        .map_err(SessionError::Authentication)?;
    Ok(greeting)
}

async fn read_handshake_message<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
) -> Result<Message> {
    match reader.read_message().await {
        Ok(message) => Ok(message),
        Err(FrameError::ConnectionClosed) => Err(SessionError::ConnectionClosed),
        Err(err) if err.is_structural() => Err(SessionError::Protocol(err.to_string())),
        Err(err) => Err(err.into()),
    }
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(SessionError::Protocol(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(SessionError::Protocol(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    let _ = parse_version(version)?;
    Ok(())
}

fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
        return Err(SessionError::Protocol(format!(
            "invalid session_id length: {}",
            session_id.len()
        )));
    }
    Ok(())
}

fn validate_auth_token(auth_token: Option<&str>) -> Result<()> {
    if let Some(token) = auth_token {
        if token.is_empty() || token.len() > MAX_AUTH_TOKEN_LEN {
            return Err(SessionError::Protocol(format!(
                "invalid auth_token length: {}",
                token.len()
            )));
        }
    }
    Ok(())
}

fn is_version_compatible(client_version: &str, server_version: &str) -> Result<bool> {
    let (client_major, client_minor) = parse_version(client_version)?;
    let (server_major, server_minor) = parse_version(server_version)?;

    Ok(client_major == server_major && client_minor >= server_minor)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid = |why: &str| SessionError::Protocol(format!("invalid version '{version}': {why}"));

    let mut parts = version.split('.');
    let major = parts.next().ok_or_else(|| invalid("missing major"))?;
    let minor = parts.next().ok_or_else(|| invalid("missing minor"))?;
    if parts.next().is_some() {
        return Err(invalid("expected '<major>.<minor>'"));
    }

    let major = major
        .parse::<u16>()
        .map_err(|_| invalid("non-numeric major"))?;
    let minor = minor
        .parse::<u16>()
        .map_err(|_| invalid("non-numeric minor"))?;
    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use nexwire_frame::FrameConfig;
    use nexwire_transport::IpcStream;
    use tokio::io::{ReadHalf, WriteHalf};

    use super::*;

    type Reader = FrameReader<ReadHalf<IpcStream>>;
    type Writer = FrameWriter<WriteHalf<IpcStream>>;

    fn ends() -> ((Reader, Writer), (Reader, Writer)) {
        let (left, right) = IpcStream::memory_pair(64 * 1024);
        let wrap = |stream: IpcStream| {
            let (r, w) = tokio::io::split(stream);
            let config = FrameConfig {
                max_payload_size: 16 * 1024,
            };
            (
                FrameReader::with_config(r, config.clone()),
                FrameWriter::with_config(w, config),
            )
        };
        (wrap(left), wrap(right))
    }

    async fn run(
        client: HandshakeConfig,
        server: HandshakeConfig,
        authenticator: impl Authenticator + 'static,
    ) -> (Result<HandshakeResult>, Result<HandshakeResult>) {
        let ((mut cr, mut cw), (mut sr, mut sw)) = ends();
        let server = tokio::spawn(async move {
            handshake_server(&mut sr, &mut sw, "session-1", &server, &authenticator).await
        });
        let client = handshake_client(&mut cr, &mut cw, &client).await;
        (client, server.await.unwrap())
    }

    #[tokio::test]
    async fn successful_handshake() {
        let (client, server) =
            run(HandshakeConfig::default(), HandshakeConfig::default(), AllowAll).await;
        let client = client.unwrap();
        let server = server.unwrap();

        assert_eq!(client.session_id, "session-1");
        assert_eq!(client.protocol_version, "1.0");
        assert!(client.client_auth_token.is_none());
        assert_eq!(server.session_id, "session-1");
        assert!(server.client_auth_token.is_none());
    }

    #[tokio::test]
    async fn wrong_protocol_name_rejected() {
        let cfg = HandshakeConfig {
            protocol_name: "foobar".to_string(),
            ..HandshakeConfig::default()
        };
        let (client, server) = run(cfg, HandshakeConfig::default(), AllowAll).await;

        assert!(matches!(client, Err(SessionError::Protocol(_))));
        assert!(matches!(server, Err(SessionError::Protocol(_))));
    }

    #[tokio::test]
    async fn version_mismatch() {
        let server_cfg = HandshakeConfig {
            protocol_version: "2.0".to_string(),
            ..HandshakeConfig::default()
        };
        let (client, server) = run(HandshakeConfig::default(), server_cfg, AllowAll).await;

        assert!(matches!(client, Err(SessionError::Protocol(_))));
        assert!(matches!(server, Err(SessionError::Protocol(_))));
    }

    #[tokio::test]
    async fn newer_client_minor_is_accepted() {
        let client_cfg = HandshakeConfig {
            protocol_version: "1.3".to_string(),
            ..HandshakeConfig::default()
        };
        let (client, server) = run(client_cfg, HandshakeConfig::default(), AllowAll).await;
        assert_eq!(client.unwrap().protocol_version, "1.0");
        assert!(server.is_ok());
    }

    #[tokio::test]
    async fn auth_token_passthrough() {
        let cfg = HandshakeConfig {
            auth_token: Some("token-123".to_string()),
            ..HandshakeConfig::default()
        };
        let (client, server) = run(
            cfg,
            HandshakeConfig::default(),
            TokenAuthenticator::new("token-123"),
        )
        .await;

        assert!(client.unwrap().client_auth_token.is_none());
        assert_eq!(
            server.unwrap().client_auth_token.as_deref(),
            Some("token-123")
        );
    }

    #[tokio::test]
    async fn bad_token_is_an_authentication_failure_on_both_sides() {
        let cfg = HandshakeConfig {
            auth_token: Some("wrong".to_string()),
            ..HandshakeConfig::default()
        };
        let (client, server) = run(
            cfg,
            HandshakeConfig::default(),
            TokenAuthenticator::new("right"),
        )
        .await;

        assert!(matches!(client, Err(SessionError::Authentication(_))));
        assert!(matches!(server, Err(SessionError::Authentication(_))));
    }

    #[tokio::test]
    async fn closure_authenticator_sees_greeting() {
        let (client, server) = run(
            HandshakeConfig::default(),
            HandshakeConfig::default(),
            |greeting: &ClientGreeting| {
                if greeting.auth_token.is_none() {
                    Err("anonymous clients not allowed".to_string())
                } else {
                    Ok(())
                }
            },
        )
        .await;
        assert!(matches!(client, Err(SessionError::Authentication(_))));
        assert!(server.is_err());
    }

    #[tokio::test]
    async fn invalid_json_rejected() {
        let ((_cr, mut cw), (mut sr, mut sw)) = ends();
        cw.send_message(&Message::ClientGreeting(Bytes::from_static(b"{not-json")))
            .await
            .unwrap();

        let result = handshake_server(
            &mut sr,
            &mut sw,
            "session-5",
            &HandshakeConfig::default(),
            &AllowAll,
        )
        .await;
        assert!(matches!(result, Err(SessionError::Json(_))));
    }

    #[tokio::test]
    async fn handshake_timeout() {
        let ((mut cr, mut cw), _server_ends) = ends();
        let cfg = HandshakeConfig {
            timeout: Duration::from_millis(100),
            ..HandshakeConfig::default()
        };

        let result = handshake_client(&mut cr, &mut cw, &cfg).await;
        assert!(matches!(result, Err(SessionError::Timeout(_))));
    }

    #[tokio::test]
    async fn rejects_oversized_auth_token() {
        let ((mut cr, mut cw), _server_ends) = ends();
        let cfg = HandshakeConfig {
            auth_token: Some("x".repeat(MAX_AUTH_TOKEN_LEN + 1)),
            ..HandshakeConfig::default()
        };
        let result = handshake_client(&mut cr, &mut cw, &cfg).await;
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[tokio::test]
    async fn rejects_oversized_handshake_payload() {
        let server_cfg = HandshakeConfig {
            max_handshake_payload: 64,
            ..HandshakeConfig::default()
        };
        let ((mut cr, mut cw), (sr, mut sw)) = ends();
        let mut sr = FrameReader::with_config(
            sr.into_inner(),
            FrameConfig {
                max_payload_size: server_cfg.max_handshake_payload,
            },
        );
        let server = tokio::spawn(async move {
            handshake_server(&mut sr, &mut sw, "session-limit", &server_cfg, &AllowAll).await
        });

        let cfg = HandshakeConfig {
            auth_token: Some("a".repeat(256)),
            ..HandshakeConfig::default()
        };
        let result = handshake_client(&mut cr, &mut cw, &cfg).await;
        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert!(matches!(
            server.await.unwrap(),
            Err(SessionError::Protocol(_))
        ));
    }

    #[test]
    fn version_rules() {
        assert!(is_version_compatible("1.2", "1.0").unwrap());
        assert!(!is_version_compatible("1.0", "1.2").unwrap());
        assert!(!is_version_compatible("2.0", "1.0").unwrap());
        assert!(parse_version("1").is_err());
        assert!(parse_version("1.2.3").is_err());
        assert!(parse_version("a.b").is_err());
    }

    #[test]
    fn config_validation() {
        assert!(HandshakeConfig::default().validate().is_ok());
        let too_fast = HandshakeConfig {
            timeout: Duration::from_millis(1),
            ..HandshakeConfig::default()
        };
        assert!(matches!(too_fast.validate(), Err(SessionError::Config(_))));
        let bad_version = HandshakeConfig {
            protocol_version: "one".to_string(),
            ..HandshakeConfig::default()
        };
        assert!(matches!(bad_version.validate(), Err(SessionError::Config(_))));
    }

    #[test]
    fn debug_output_redacts_auth_token() {
        let greeting = ClientGreeting {
            protocol: "nexwire".to_string(),
            version: "1.0".to_string(),
            auth_token: Some("super-secret".to_string()),
        };
        let greeting_debug = format!("{greeting:?}");
        assert!(greeting_debug.contains("<redacted:12 bytes>"));
        assert!(!greeting_debug.contains("super-secret"));

        let config = HandshakeConfig {
            auth_token: Some("another-secret".to_string()),
            ..HandshakeConfig::default()
        };
        let config_debug = format!("{config:?}");
        assert!(config_debug.contains("<redacted:14 bytes>"));
        assert!(!config_debug.contains("another-secret"));

        let result = HandshakeResult {
            session_id: "session-1".to_string(),
            protocol_version: "1.0".to_string(),
            client_auth_token: Some("token-123".to_string()),
        };
        let result_debug = format!("{result:?}");
        assert!(result_debug.contains("<redacted:9 bytes>"));
        assert!(!result_debug.contains("token-123"));

        let auth = TokenAuthenticator::new("hunter2");
        assert!(!format!("{auth:?}").contains("hunter2"));
    }
}
