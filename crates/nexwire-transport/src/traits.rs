use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

/// Any byte stream a session can run over.
///
/// Blanket-implemented for every `AsyncRead + AsyncWrite + Send + Unpin` type,
/// so external transports (TCP, TLS, QUIC streams, WebSocket adapters) plug in
/// through [`IpcStream::from_stream`].
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized> RawStream for T {}

/// A connected duplex stream.
///
/// This is the fundamental I/O type handed to the session layer. It is an
/// opaque reliable ordered stream; the session never looks at what backs it.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    Memory(DuplexStream),
    Boxed(Box<dyn RawStream>),
}

/// Credentials of the process on the other end of a Unix socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: Option<i32>,
}

impl IpcStream {
    /// Create an IpcStream from a Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: tokio::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    /// Wrap any external byte stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: IpcStreamInner::Boxed(Box::new(stream)),
        }
    }

    /// Create a connected in-memory pair.
    ///
    /// `max_buf_size` bounds how many bytes may sit unread in each direction
    /// before the writer is suspended.
    pub fn memory_pair(max_buf_size: usize) -> (Self, Self) {
        let (left, right) = tokio::io::duplex(max_buf_size);
        (
            Self {
                inner: IpcStreamInner::Memory(left),
            },
            Self {
                inner: IpcStreamInner::Memory(right),
            },
        )
    }

    /// Connected Unix socket pair (no filesystem path).
    #[cfg(unix)]
    pub fn unix_pair() -> crate::Result<(Self, Self)> {
        let (left, right) = tokio::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => "unix-domain-socket",
            IpcStreamInner::Memory(_) => "memory",
            IpcStreamInner::Boxed(_) => "external",
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Only Unix socket streams expose credentials; everything else returns
    /// `None`.
    pub fn peer_credentials(&self) -> Option<PeerCredentials> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                let cred = stream.peer_cred().ok()?;
                Some(PeerCredentials {
                    uid: cred.uid(),
                    gid: cred.gid(),
                    pid: cred.pid(),
                })
            }
            _ => None,
        }
    }
}

impl AsyncRead for IpcStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            IpcStreamInner::Memory(stream) => Pin::new(stream).poll_read(cx, buf),
            IpcStreamInner::Boxed(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IpcStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            IpcStreamInner::Memory(stream) => Pin::new(stream).poll_write(cx, buf),
            IpcStreamInner::Boxed(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => Pin::new(stream).poll_flush(cx),
            IpcStreamInner::Memory(stream) => Pin::new(stream).poll_flush(cx),
            IpcStreamInner::Boxed(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            IpcStreamInner::Memory(stream) => Pin::new(stream).poll_shutdown(cx),
            IpcStreamInner::Boxed(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("type", &self.transport_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn memory_pair_roundtrip() {
        let (mut left, mut right) = IpcStream::memory_pair(64);
        left.write_all(b"hello").await.unwrap();

        let mut buf = [0u8; 5];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(left.transport_name(), "memory");
        assert!(left.peer_credentials().is_none());
    }

    #[tokio::test]
    async fn boxed_stream_delegates() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = IpcStream::from_stream(a);
        let mut right = IpcStream::from_stream(b);

        right.write_all(b"xyz").await.unwrap();
        let mut buf = [0u8; 3];
        left.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"xyz");
        assert_eq!(format!("{left:?}"), "IpcStream { type: \"external\" }");
    }

    #[tokio::test]
    async fn shutdown_signals_eof() {
        let (mut left, mut right) = IpcStream::memory_pair(64);
        left.shutdown().await.unwrap();

        let mut buf = Vec::new();
        let read = right.read_to_end(&mut buf).await.unwrap();
        assert_eq!(read, 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn unix_pair_reports_own_credentials() {
        let (left, _right) = IpcStream::unix_pair().unwrap();
        let creds = left.peer_credentials().expect("linux exposes SO_PEERCRED");
        assert_eq!(creds.pid, Some(std::process::id() as i32));
    }
}
