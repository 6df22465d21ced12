use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// `sockaddr_un.sun_path` capacity, including the trailing NUL.
#[cfg(target_os = "linux")]
const SUN_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const SUN_PATH_LEN: usize = 104;

/// The socket file a listener created, identified by device and inode so a
/// path that was replaced after bind is left alone.
#[derive(Debug)]
struct SocketFile {
    path: PathBuf,
    dev: u64,
    ino: u64,
}

impl SocketFile {
    fn record(path: PathBuf) -> Result<Self> {
        let metadata = std::fs::symlink_metadata(&path).map_err(|e| bind_error(&path, e))?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
            path,
        })
    }

    fn is_ours(&self) -> bool {
        std::fs::symlink_metadata(&self.path).is_ok_and(|metadata| {
            metadata.file_type().is_socket()
                && metadata.dev() == self.dev
                && metadata.ino() == self.ino
        })
    }
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        if self.is_ours() {
            debug!(path = ?self.path, "removing socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path replaced since bind; left in place");
        }
    }
}

/// Listening Unix domain socket for nexwire sessions.
///
/// The socket file is created with owner-only permissions by default and
/// removed again when the listener is dropped.
pub struct UnixDomainSocket {
    listener: UnixListener,
    file: SocketFile,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind with [`DEFAULT_SOCKET_MODE`](Self::DEFAULT_SOCKET_MODE).
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen, then restrict the socket file to `mode`.
    ///
    /// A leftover socket file nobody is listening on is replaced. A socket
    /// another server still answers on fails with `AddrInUse`, and a
    /// non-socket file is never touched. Must be called within a tokio
    /// runtime.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= SUN_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: SUN_PATH_LEN,
            });
        }

        clear_stale_socket(&path)?;

        let listener = UnixListener::bind(&path).map_err(|e| bind_error(&path, e))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| bind_error(&path, e))?;
        let file = SocketFile::record(path)?;

        info!(path = ?file.path, mode = format_args!("{mode:o}"), "listening for nexwire sessions");
        Ok(Self { listener, file })
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        debug!(path = ?self.file.path, "accepted connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// Connect to a listening socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to unix domain socket");
        Ok(IpcStream::from_unix(stream))
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

impl std::fmt::Debug for UnixDomainSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixDomainSocket")
            .field("path", &self.file.path)
            .finish()
    }
}

fn bind_error(path: &Path, source: std::io::Error) -> TransportError {
    TransportError::Bind {
        path: path.to_path_buf(),
        source,
    }
}

/// Remove a socket file left behind by a server that is gone.
fn clear_stale_socket(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(bind_error(path, e)),
    };
    if !metadata.file_type().is_socket() {
        return Err(bind_error(
            path,
            std::io::Error::new(ErrorKind::AlreadyExists, "existing path is not a unix socket"),
        ));
    }
    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        warn!(?path, "socket path is served by another process");
        return Err(bind_error(
            path,
            std::io::Error::new(ErrorKind::AddrInUse, "another server is listening"),
        ));
    }
    debug!(?path, "removing stale socket");
    std::fs::remove_file(path).map_err(|e| bind_error(path, e))
}
