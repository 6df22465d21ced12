//! The per-connection protocol engine.
//!
//! One read loop decodes frames in arrival order and routes them; it never
//! waits on the writer. Every outbound frame (invocations, results, pipe
//! chunks, pings) goes through [`Outbound`], whose mutex is the only
//! connection-wide lock and is held for encode+send only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_core::future::BoxFuture;
use nexwire_frame::{
    CancellationOrigin, DisconnectReason, ExceptionKind, FrameConfig, FrameError, FrameReader,
    FrameWriter, Invocation, InvocationFlags, Message, UNTRACKED_INVOCATION_ID,
};
use nexwire_pipe::{DuplexPipe, PipeError, PipeIdParity, PipeRegistry, PipeSink};
use nexwire_transport::{IpcStream, PeerCredentials};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{oneshot, watch, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::control;
use crate::dispatch::{DispatchError, DispatchResult, InvocationContext, Nexus};
use crate::error::{Result, SessionError};
use crate::handshake::{handshake_client, handshake_server, Authenticator, HandshakeResult};
use crate::invocation::InvocationStateManager;

/// Upper bound on the goodbye exchange when a session closes.
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

type StreamReader = FrameReader<ReadHalf<IpcStream>>;
type StreamWriter = FrameWriter<WriteHalf<IpcStream>>;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Ready,
    Disconnecting,
    Disconnected,
}

/// Which end of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    fn pipe_parity(self) -> PipeIdParity {
        match self {
            Self::Client => PipeIdParity::Odd,
            Self::Server => PipeIdParity::Even,
        }
    }
}

/// The serialized outbound half of the connection.
pub(crate) struct Outbound {
    writer: tokio::sync::Mutex<StreamWriter>,
    /// No more frames may be sent.
    closed: CancellationToken,
    /// A write failed; the transport is unusable.
    broken: CancellationToken,
}

impl Outbound {
    fn new(writer: StreamWriter) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            closed: CancellationToken::new(),
            broken: CancellationToken::new(),
        }
    }

    /// Send one frame. A send still waiting for the lock, or still writing,
    /// when the connection closes fails with `ConnectionClosed`.
    pub(crate) async fn send_message(&self, message: &Message) -> Result<()> {
        self.send_inner(message, None).await
    }

    /// [`send_message`](Self::send_message), giving up with `Cancelled` if
    /// `cancel` fires while waiting for the writer. Once writing has begun
    /// the frame is finished regardless.
    pub(crate) async fn send_message_or_cancel(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.send_inner(message, Some(cancel)).await
    }

    async fn send_inner(&self, message: &Message, cancel: Option<&CancellationToken>) -> Result<()> {
        let send = async {
            let mut writer = match cancel {
                Some(cancel) => tokio::select! {
                    _ = cancel.cancelled() => return None,
                    writer = self.writer.lock() => writer,
                },
                None => self.writer.lock().await,
            };
            Some(writer.send_message(message).await)
        };
        let sent = tokio::select! {
            _ = self.closed.cancelled() => return Err(SessionError::ConnectionClosed),
            sent = send => sent,
        };
        let Some(sent) = sent else {
            return Err(SessionError::Cancelled);
        };
        match sent {
            Ok(()) => Ok(()),
            Err(FrameError::ConnectionClosed) => {
                self.broken.cancel();
                Err(SessionError::ConnectionClosed)
            }
            Err(err) => {
                if !err.is_structural() {
                    self.broken.cancel();
                }
                Err(err.into())
            }
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }

    async fn shutdown_transport(&self) {
        if let Ok(mut writer) = tokio::time::timeout(DISCONNECT_GRACE, self.writer.lock()).await {
            let _ = tokio::time::timeout(DISCONNECT_GRACE, writer.shutdown()).await;
        }
    }
}

impl PipeSink for Outbound {
    fn send(&self, message: Message) -> BoxFuture<'_, nexwire_pipe::Result<()>> {
        Box::pin(async move {
            self.send_message(&message).await.map_err(|err| match err {
                SessionError::Frame(err) if err.is_structural() => PipeError::Frame(err),
                _ => PipeError::ConnectionClosed,
            })
        })
    }
}

/// Facts about the link fixed at handshake time.
struct Link {
    role: Role,
    handshake: HandshakeResult,
    peer_credentials: Option<PeerCredentials>,
    transport: &'static str,
}

pub(crate) struct SessionInner {
    link: Link,
    pub(crate) config: SessionConfig,
    pub(crate) outbound: Arc<Outbound>,
    invocations: InvocationStateManager,
    pipes: PipeRegistry,
    nexus: Arc<dyn Nexus>,
    state: watch::Sender<SessionState>,
    pub(crate) shutdown: CancellationToken,
    handler_permits: Arc<Semaphore>,
    pings: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    next_nonce: AtomicU64,
    last_activity: Mutex<Instant>,
    close_reason: Mutex<Option<DisconnectReason>>,
}

/// One live connection.
///
/// Cloning is cheap and every clone drives the same connection. When the
/// last clone is dropped the session disconnects gracefully.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
    _guard: Arc<DropGuard>,
}

impl Session {
    /// Run the connecting side of a session over `stream`.
    pub async fn client(
        stream: IpcStream,
        config: SessionConfig,
        nexus: Arc<dyn Nexus>,
    ) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(SessionState::Connecting);
        let peer_credentials = stream.peer_credentials();
        let transport = stream.transport_name();
        let (mut reader, mut writer) = frame_halves(stream, &config);

        set_state(&state, SessionState::Handshaking);
        let handshake = handshake_client(&mut reader, &mut writer, &config.handshake).await?;

        let link = Link {
            role: Role::Client,
            handshake,
            peer_credentials,
            transport,
        };
        Self::start(link, reader, writer, config, nexus, state)
    }

    /// Run the accepting side of a session over `stream`.
    pub async fn server(
        stream: IpcStream,
        config: SessionConfig,
        nexus: Arc<dyn Nexus>,
        authenticator: &dyn Authenticator,
        session_id: &str,
    ) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(SessionState::Connecting);
        let peer_credentials = stream.peer_credentials();
        let transport = stream.transport_name();
        let (mut reader, mut writer) = frame_halves(stream, &config);

        set_state(&state, SessionState::Handshaking);
        let handshake = handshake_server(
            &mut reader,
            &mut writer,
            session_id,
            &config.handshake,
            authenticator,
        )
        .await?;

        let link = Link {
            role: Role::Server,
            handshake,
            peer_credentials,
            transport,
        };
        Self::start(link, reader, writer, config, nexus, state)
    }

    fn start(
        link: Link,
        mut reader: StreamReader,
        mut writer: StreamWriter,
        config: SessionConfig,
        nexus: Arc<dyn Nexus>,
        state: watch::Sender<SessionState>,
    ) -> Result<Self> {
        // The handshake budget only applies before authentication.
        reader.set_max_payload_size(config.max_payload_size);
        writer.set_max_payload_size(config.max_payload_size);

        let outbound = Arc::new(Outbound::new(writer));
        let pipes = PipeRegistry::new(
            link.role.pipe_parity(),
            config.pipe.clone(),
            outbound.clone(),
            config.max_payload_size,
        )?;

        let shutdown = CancellationToken::new();
        let inner = Arc::new(SessionInner {
            handler_permits: Arc::new(Semaphore::new(config.max_concurrent_invocations)),
            link,
            config,
            outbound,
            invocations: InvocationStateManager::new(),
            pipes,
            nexus,
            state,
            shutdown: shutdown.clone(),
            pings: Mutex::new(HashMap::new()),
            next_nonce: AtomicU64::new(1),
            last_activity: Mutex::new(Instant::now()),
            close_reason: Mutex::new(None),
        });

        set_state(&inner.state, SessionState::Ready);
        info!(
            session_id = %inner.link.handshake.session_id,
            role = ?inner.link.role,
            transport = inner.link.transport,
            "session ready"
        );

        tokio::spawn(read_loop(inner.clone(), reader));
        tokio::spawn(control::run_keepalive(inner.clone()));

        Ok(Self {
            inner,
            _guard: Arc::new(shutdown.drop_guard()),
        })
    }

    /// Call a method on the peer and wait for its result.
    ///
    /// `cancel` abandons the wait at once and asks the peer, best effort, to
    /// cancel its handler. A cancelled call reports `Cancelled`; a call cut
    /// short by the connection dropping reports `ConnectionClosed`.
    pub async fn invoke(
        &self,
        method_id: u16,
        args: impl Into<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        self.call(method_id, args.into(), None, cancel).await
    }

    /// [`invoke`](Self::invoke) with JSON arguments and result.
    pub async fn invoke_json<A, R>(
        &self,
        method_id: u16,
        args: &A,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = serde_json::to_vec(args)?;
        let result = self.call(method_id, Bytes::from(args), None, cancel).await?;
        Ok(serde_json::from_slice(&result)?)
    }

    /// Call a method without waiting for, or receiving, a result.
    pub async fn invoke_no_return(&self, method_id: u16, args: impl Into<Bytes>) -> Result<()> {
        self.ensure_ready()?;
        let id = self.inner.invocations.next_id(false)?;
        let message = Message::Invocation(Invocation {
            id,
            flags: InvocationFlags::IGNORE_RETURN,
            method_id,
            pipe_id: None,
            args: args.into(),
        });
        self.inner.outbound.send_message(&message).await
    }

    /// Open a pipe to hand to [`invoke_with_pipe`](Self::invoke_with_pipe).
    ///
    /// Writes stay paused until the peer's handler attaches.
    pub fn create_pipe(&self) -> Result<DuplexPipe> {
        self.ensure_ready()?;
        Ok(self.inner.pipes.create_local()?)
    }

    /// Call a method with a pipe attached.
    ///
    /// The handler completes the pipe before its result is sent, so every
    /// byte it wrote is buffered here by the time this returns. On any
    /// failure the pipe is completed locally.
    pub async fn invoke_with_pipe(
        &self,
        method_id: u16,
        args: impl Into<Bytes>,
        pipe: &DuplexPipe,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let outcome = self
            .call(method_id, args.into(), Some(pipe.id()), cancel)
            .await;
        if !pipe.is_completed() {
            if let Err(err) = pipe.complete().await {
                debug!(pipe_id = pipe.id(), error = %err, "completing pipe after invocation failed");
            }
        }
        outcome
    }

    async fn call(
        &self,
        method_id: u16,
        args: Bytes,
        pipe_id: Option<u16>,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        self.ensure_ready()?;
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let invocations = &self.inner.invocations;
        let id = invocations.next_id(true)?;
        let _registration = Registration { invocations, id };
        let (tx, mut rx) = oneshot::channel();
        invocations.register(id, tx);

        let message = Message::Invocation(Invocation {
            id,
            flags: InvocationFlags::CANCELLABLE,
            method_id,
            pipe_id,
            args,
        });
        trace!(invocation_id = id, method_id, ?pipe_id, "sending invocation");
        self.inner
            .outbound
            .send_message_or_cancel(&message, cancel)
            .await?;

        let received = tokio::select! {
            outcome = &mut rx => Some(outcome),
            _ = cancel.cancelled() => None,
        };
        let outcome = match received {
            Some(outcome) => outcome,
            None if invocations.cancel(id) => {
                debug!(invocation_id = id, method_id, "invocation cancelled by caller");
                self.inner.spawn_send(Message::InvocationCancellation {
                    id,
                    origin: CancellationOrigin::Caller,
                });
                return Err(SessionError::Cancelled);
            }
            // The outcome won the race and is already in the slot.
            None => rx.await,
        };
        outcome.unwrap_or(Err(SessionError::ConnectionClosed))
    }

    /// Round-trip a ping and report the latency.
    pub async fn ping(&self) -> Result<Duration> {
        self.ensure_ready()?;
        let nonce = self.inner.next_nonce.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pings.lock().insert(nonce, tx);

        let started = Instant::now();
        if let Err(err) = self.inner.outbound.send_message(&Message::Ping(nonce)).await {
            self.inner.pings.lock().remove(&nonce);
            return Err(err);
        }

        let timeout = self.inner.config.idle_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => Ok(started.elapsed()),
            Ok(Err(_)) => Err(SessionError::ConnectionClosed),
            Err(_) => {
                self.inner.pings.lock().remove(&nonce);
                Err(SessionError::Timeout(timeout))
            }
        }
    }

    /// Close the connection gracefully.
    ///
    /// Outstanding invocations fail with `ConnectionClosed` and every open
    /// pipe completes. Idempotent.
    pub async fn disconnect(&self) {
        self.inner
            .teardown(DisconnectReason::Graceful, true)
            .await;
    }

    /// Resolves once the session is fully disconnected.
    pub async fn disconnected(&self) -> DisconnectReason {
        let mut rx = self.inner.state.subscribe();
        let _ = rx
            .wait_for(|state| *state == SessionState::Disconnected)
            .await;
        self.close_reason().unwrap_or(DisconnectReason::Transport)
    }

    /// Ready and not closing.
    pub fn is_healthy(&self) -> bool {
        self.state() == SessionState::Ready && !self.inner.shutdown.is_cancelled()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Why the session closed, once it has.
    pub fn close_reason(&self) -> Option<DisconnectReason> {
        *self.inner.close_reason.lock()
    }

    pub fn session_id(&self) -> &str {
        &self.inner.link.handshake.session_id
    }

    pub fn role(&self) -> Role {
        self.inner.link.role
    }

    /// The server's protocol version.
    pub fn protocol_version(&self) -> &str {
        &self.inner.link.handshake.protocol_version
    }

    /// The token the client presented (server side only).
    pub fn client_auth_token(&self) -> Option<&str> {
        self.inner.link.handshake.client_auth_token.as_deref()
    }

    pub fn peer_credentials(&self) -> Option<PeerCredentials> {
        self.inner.link.peer_credentials
    }

    pub fn transport_name(&self) -> &'static str {
        self.inner.link.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Pipes currently open on this connection.
    pub fn open_pipes(&self) -> usize {
        self.inner.pipes.len()
    }

    /// Invocations this side is still waiting on.
    pub fn outstanding_invocations(&self) -> usize {
        self.inner.invocations.outstanding()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_healthy() {
            Ok(())
        } else {
            Err(SessionError::ConnectionClosed)
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id())
            .field("role", &self.role())
            .field("state", &self.state())
            .field("transport", &self.transport_name())
            .finish()
    }
}

/// Releases a tracked id if the calling future is dropped mid-call.
struct Registration<'a> {
    invocations: &'a InvocationStateManager,
    id: u16,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.invocations.remove(self.id);
    }
}

impl SessionInner {
    fn session_id(&self) -> &str {
        &self.link.handshake.session_id
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last inbound frame.
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub(crate) fn next_nonce(&self) -> u64 {
        self.next_nonce.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a frame from a task of its own so the caller never waits on the
    /// writer.
    pub(crate) fn spawn_send(&self, message: Message) {
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            if let Err(err) = outbound.send_message(&message).await {
                trace!(message_type = %message.message_type(), error = %err, "background send failed");
            }
        });
    }

    /// Route one inbound frame. `Err` carries the reason the session must end
    /// and whether the peer should be told.
    fn route(self: &Arc<Self>, message: Message) -> std::result::Result<(), (DisconnectReason, bool)> {
        match message {
            Message::Ping(nonce) => self.spawn_send(Message::Pong(nonce)),
            Message::Pong(nonce) => {
                if let Some(waiter) = self.pings.lock().remove(&nonce) {
                    let _ = waiter.send(());
                }
            }
            Message::Disconnect(reason) => {
                debug!(session_id = self.session_id(), %reason, "peer disconnected");
                return Err((reason, false));
            }
            Message::Invocation(invocation) => self.dispatch(invocation),
            Message::InvocationResult { id, payload } => {
                self.invocations.complete(id, Ok(payload));
            }
            Message::InvocationException { id, kind, message } => {
                self.invocations
                    .complete(id, Err(SessionError::Remote { kind, message }));
            }
            Message::InvocationCancellation { id, origin } => match origin {
                CancellationOrigin::Caller => {
                    self.invocations.cancel_handler(id);
                }
                CancellationOrigin::Handler => {
                    self.invocations.cancel(id);
                }
            },
            Message::PipeState { pipe_id, flags } => self.pipes.on_state(pipe_id, flags),
            Message::PipeWrite { pipe_id, data } => self.pipes.on_data(pipe_id, data),
            Message::PipeAck { pipe_id, consumed } => self.pipes.on_ack(pipe_id, consumed),
            Message::ClientGreeting(_) | Message::ServerGreeting(_) => {
                warn!(session_id = self.session_id(), "greeting received after handshake");
                return Err((DisconnectReason::Protocol, true));
            }
        }
        Ok(())
    }

    fn dispatch(self: &Arc<Self>, invocation: Invocation) {
        let Invocation {
            id,
            flags,
            method_id,
            pipe_id,
            args,
        } = invocation;
        let wants_reply =
            id != UNTRACKED_INVOCATION_ID && !flags.contains(InvocationFlags::IGNORE_RETURN);

        let Ok(permit) = self.handler_permits.clone().try_acquire_owned() else {
            warn!(
                invocation_id = id,
                method_id,
                limit = self.config.max_concurrent_invocations,
                "handler limit reached, invocation refused"
            );
            if wants_reply {
                self.spawn_send(Message::InvocationException {
                    id,
                    kind: ExceptionKind::Overloaded,
                    message: format!(
                        "too many concurrent invocations (limit {})",
                        self.config.max_concurrent_invocations
                    ),
                });
            }
            return;
        };

        let pipe = match pipe_id {
            None => None,
            Some(pipe_id) => match self.pipes.attach_remote(pipe_id) {
                Ok(pipe) => Some(pipe),
                Err(err) => {
                    warn!(invocation_id = id, pipe_id, error = %err, "cannot attach invocation pipe");
                    if wants_reply {
                        self.spawn_send(Message::InvocationException {
                            id,
                            kind: ExceptionKind::InvalidArguments,
                            message: err.to_string(),
                        });
                    }
                    return;
                }
            },
        };

        let cancel = self.shutdown.child_token();
        let generation = (id != UNTRACKED_INVOCATION_ID
            && flags.contains(InvocationFlags::CANCELLABLE))
        .then(|| self.invocations.register_handler(id, cancel.clone()));

        trace!(invocation_id = id, method_id, ?pipe_id, "dispatching invocation");
        let inner = self.clone();
        tokio::spawn(async move {
            let outcome = inner
                .run_handler(id, method_id, args, &cancel, pipe.clone())
                .await;
            if let Some(pipe) = pipe {
                if let Err(err) = pipe.complete().await {
                    debug!(pipe_id = pipe.id(), error = %err, "completing handler pipe failed");
                }
            }
            if let Some(generation) = generation {
                inner.invocations.remove_handler(id, generation);
            }
            drop(permit);
            if !wants_reply || inner.shutdown.is_cancelled() {
                return;
            }

            let reply = match outcome {
                Ok(payload) => Message::InvocationResult { id, payload },
                Err(err) => match err.exception_kind() {
                    Some(kind) => Message::InvocationException {
                        id,
                        kind,
                        message: err.to_string(),
                    },
                    None => Message::InvocationCancellation {
                        id,
                        origin: CancellationOrigin::Handler,
                    },
                },
            };
            let sent = match inner.outbound.send_message(&reply).await {
                Err(SessionError::Frame(FrameError::PayloadTooLarge { size, max })) => {
                    warn!(invocation_id = id, method_id, size, max, "reply exceeds max payload size");
                    let fallback = Message::InvocationException {
                        id,
                        kind: ExceptionKind::Failed,
                        message: format!("reply of {size} bytes exceeds max payload size {max}"),
                    };
                    inner.outbound.send_message(&fallback).await
                }
                other => other,
            };
            if let Err(err) = sent {
                debug!(invocation_id = id, error = %err, "reply not sent");
            }
        });
    }

    async fn run_handler(
        &self,
        id: u16,
        method_id: u16,
        args: Bytes,
        cancel: &CancellationToken,
        pipe: Option<DuplexPipe>,
    ) -> DispatchResult {
        if let Some(pipe) = &pipe {
            if let Err(err) = pipe.announce_ready().await {
                debug!(pipe_id = pipe.id(), error = %err, "pipe ready notification failed");
            }
        }

        let ctx = InvocationContext::new(id, method_id, cancel.clone(), pipe);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            outcome = self.nexus.dispatch(method_id, args, ctx) => outcome,
        }
    }

    /// Close the session. Only the first call does anything.
    ///
    /// New invocations are refused first, then every outstanding one fails,
    /// every pipe completes, and finally the transport is shut down.
    pub(crate) async fn teardown(&self, reason: DisconnectReason, notify_peer: bool) {
        let began = self.state.send_if_modified(|state| match state {
            SessionState::Disconnecting | SessionState::Disconnected => false,
            _ => {
                *state = SessionState::Disconnecting;
                true
            }
        });
        if !began {
            return;
        }
        *self.close_reason.lock() = Some(reason);
        info!(session_id = self.session_id(), %reason, "session closing");

        if notify_peer {
            let goodbye = Message::Disconnect(reason);
            let _ = tokio::time::timeout(DISCONNECT_GRACE, self.outbound.send_message(&goodbye)).await;
        }

        self.shutdown.cancel();
        self.outbound.close();
        self.invocations.cancel_all();
        self.pipes.complete_all();
        self.pings.lock().clear();
        self.outbound.shutdown_transport().await;

        set_state(&self.state, SessionState::Disconnected);
        debug!(session_id = self.session_id(), "session disconnected");
    }
}

async fn read_loop(inner: Arc<SessionInner>, mut reader: StreamReader) {
    let (reason, notify_peer) = loop {
        let next = tokio::select! {
            _ = inner.shutdown.cancelled() => break (DisconnectReason::Graceful, true),
            _ = inner.outbound.broken.cancelled() => break (DisconnectReason::Transport, false),
            next = reader.read_message() => next,
        };
        match next {
            Ok(message) => {
                inner.touch();
                if let Err(end) = inner.route(message) {
                    break end;
                }
            }
            Err(FrameError::ConnectionClosed) => {
                debug!(session_id = inner.session_id(), "transport closed by peer");
                break (DisconnectReason::Transport, false);
            }
            Err(err) if err.is_structural() => {
                warn!(session_id = inner.session_id(), error = %err, "undecodable frame");
                break (DisconnectReason::Protocol, true);
            }
            Err(err) => {
                warn!(session_id = inner.session_id(), error = %err, "transport read failed");
                break (DisconnectReason::Transport, false);
            }
        }
    };
    drop(reader);
    inner.teardown(reason, notify_peer).await;
}

fn frame_halves(stream: IpcStream, config: &SessionConfig) -> (StreamReader, StreamWriter) {
    let (read_half, write_half) = tokio::io::split(stream);
    let frame_config = FrameConfig {
        max_payload_size: config.handshake.max_handshake_payload,
    };
    (
        FrameReader::with_config(read_half, frame_config.clone()),
        FrameWriter::with_config(write_half, frame_config),
    )
}

fn set_state(state: &watch::Sender<SessionState>, next: SessionState) {
    let previous = state.send_replace(next);
    if previous != next {
        trace!(from = ?previous, to = ?next, "session state");
    }
}
