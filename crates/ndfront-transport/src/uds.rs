use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// Filesystem Unix domain socket listener used for the control socket.
///
/// The listener is non-blocking so it can sit in a poll set; accepted
/// streams are switched back to whatever mode the caller asks for.
/// The socket file is removed on drop, unless something else replaced it
/// in the meantime.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
}

impl UnixDomainSocket {
    /// Default permission mode for the control socket: owner and group.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o660;
    /// Unix `sockaddr_un.sun_path` is 108 bytes on Linux, 104 elsewhere.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on `path` with the default mode.
    ///
    /// A stale socket at `path` is removed first; any other kind of file
    /// is left alone and reported as a bind error.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen on `path` with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bind_err = |source: io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_socket() => {
                debug!(?path, "removing stale control socket");
                std::fs::remove_file(&path).map_err(bind_err)?;
            }
            Ok(_) => {
                return Err(bind_err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(bind_err(err)),
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "control socket listening");

        Ok(Self {
            listener,
            path,
            created_inode: (created.dev(), created.ino()),
        })
    }

    /// Accept one pending connection, or `None` when nobody is waiting.
    pub fn try_accept(&self) -> Result<Option<IpcStream>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                debug!(path = ?self.path, "accepted control connection");
                Ok(Some(IpcStream::from_unix(stream)))
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::Interrupted
                    || err.kind() == io::ErrorKind::ConnectionAborted =>
            {
                Ok(None)
            }
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// Connect to a listening Unix domain socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream =
            std::os::unix::net::UnixStream::connect(path).map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to control socket");
        Ok(IpcStream::from_unix(stream))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsFd for UnixDomainSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.listener.as_fd()
    }
}

impl AsRawFd for UnixDomainSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

impl std::fmt::Debug for UnixDomainSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixDomainSocket")
            .field("path", &self.path)
            .field("fd", &self.listener.as_raw_fd())
            .finish()
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let (expected_dev, expected_ino) = self.created_inode;
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "removing control socket");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "control socket path replaced; leaving it");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ndfront-uds-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn try_accept_is_empty_until_a_client_connects() {
        let dir = temp_dir("accept");
        let sock_path = dir.join("ctl.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        assert!(listener.try_accept().unwrap().is_none());
        assert!(listener.try_accept().unwrap().is_none());

        let mut client = UnixDomainSocket::connect(&sock_path).unwrap();
        client.write_all(b"hello").unwrap();

        let mut server = listener.try_accept().unwrap().expect("pending connection");
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert!(listener.try_accept().unwrap().is_none());

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn backlog_is_drained_one_client_at_a_time() {
        let dir = temp_dir("backlog");
        let sock_path = dir.join("ctl.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        let _first = UnixDomainSocket::connect(&sock_path).unwrap();
        let _second = UnixDomainSocket::connect(&sock_path).unwrap();

        let mut accepted = 0;
        while listener.try_accept().unwrap().is_some() {
            accepted += 1;
        }
        assert_eq!(accepted, 2);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn accepted_stream_carries_client_pid() {
        let dir = temp_dir("cred");
        let sock_path = dir.join("ctl.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        let _client = UnixDomainSocket::connect(&sock_path).unwrap();
        let server = listener.try_accept().unwrap().expect("pending connection");

        let creds = server.peer_credentials().expect("SO_PEERCRED");
        assert_eq!(creds.pid, std::process::id() as i32);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn control_socket_is_group_accessible() {
        let dir = temp_dir("perms");
        let sock_path = dir.join("ctl.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o660);

        drop(listener);
        assert!(!sock_path.exists(), "socket file should be removed on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn restart_rebinds_over_leftover_socket() {
        let dir = temp_dir("restart");
        let sock_path = dir.join("ctl.sock");

        // A crashed daemon leaves its socket file behind.
        std::mem::forget(UnixDomainSocket::bind(&sock_path).unwrap());

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        let _client = UnixDomainSocket::connect(&sock_path).unwrap();
        assert!(listener.try_accept().unwrap().is_some());

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unrelated_file_at_socket_path_is_kept() {
        let dir = temp_dir("file");
        let sock_path = dir.join("ctl.sock");
        std::fs::write(&sock_path, b"config").unwrap();

        let result = UnixDomainSocket::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        assert_eq!(std::fs::read(&sock_path).unwrap(), b"config");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
