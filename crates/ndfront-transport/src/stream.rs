use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use tracing::warn;

use crate::error::{Result, TransportError};

/// Control buffer size in machine words; fits several `SCM_RIGHTS` descriptors.
const CMSG_WORDS: usize = 16;

/// A connected IPC stream that can carry file descriptors next to its bytes.
///
/// Both process links (parent and engine) and every control-socket client
/// are an `IpcStream`. Descriptors are passed with `SCM_RIGHTS`; received
/// descriptors are returned as [`OwnedFd`] so they are closed if nobody
/// claims them.
pub struct IpcStream {
    inner: UnixStream,
}

/// Credentials of the process on the other end of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: i32,
}

impl IpcStream {
    /// Wrap an already connected Unix stream.
    pub fn from_unix(stream: UnixStream) -> Self {
        Self { inner: stream }
    }

    /// Adopt an inherited or received descriptor as an IPC stream.
    ///
    /// Fails if the descriptor is not a stream socket.
    pub fn from_owned_fd(fd: OwnedFd) -> Result<Self> {
        let raw = fd.as_raw_fd();
        let mut sock_type: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;

        // SAFETY: `sock_type` and `len` are valid writable pointers sized for
        // SO_TYPE, and `raw` stays open for the duration of the call.
        let rc = unsafe {
            libc::getsockopt(
                raw,
                libc::SOL_SOCKET,
                libc::SO_TYPE,
                (&mut sock_type as *mut libc::c_int).cast::<libc::c_void>(),
                &mut len,
            )
        };
        if rc != 0 {
            return Err(TransportError::BadDescriptor {
                fd: raw,
                source: io::Error::last_os_error(),
            });
        }
        if sock_type != libc::SOCK_STREAM {
            return Err(TransportError::BadDescriptor {
                fd: raw,
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a stream socket"),
            });
        }

        Ok(Self::from_unix(UnixStream::from(fd)))
    }

    /// Create a connected pair, as used between a parent and its children.
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Switch the stream between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.inner.set_nonblocking(nonblocking).map_err(Into::into)
    }

    /// Write bytes, attaching `fd` to the first byte when present.
    ///
    /// Returns the number of bytes written. The kernel duplicates `fd` into
    /// the message, so the caller keeps ownership of its copy.
    pub fn send_with_fd(&self, buf: &[u8], fd: Option<BorrowedFd<'_>>) -> io::Result<usize> {
        let mut iov = libc::iovec {
            iov_base: buf.as_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };
        let mut cmsg_buf = [0usize; CMSG_WORDS];

        // SAFETY: a zeroed msghdr is a valid "no name, no control" header.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;

        if let Some(fd) = fd {
            // SAFETY: CMSG_SPACE/CMSG_LEN are pure size computations.
            let space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as libc::c_uint) };
            msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
            msg.msg_controllen = space as _;

            // SAFETY: `msg_control` points at `cmsg_buf`, which is word aligned
            // and larger than CMSG_SPACE(sizeof(int)), so CMSG_FIRSTHDR is
            // non-null and its data area can hold one descriptor.
            unsafe {
                let cmsg = libc::CMSG_FIRSTHDR(&msg);
                (*cmsg).cmsg_level = libc::SOL_SOCKET;
                (*cmsg).cmsg_type = libc::SCM_RIGHTS;
                (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as libc::c_uint) as _;
                std::ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<RawFd>(), fd.as_raw_fd());
            }
        }

        loop {
            // SAFETY: `msg` references `iov` and `cmsg_buf`, both alive for the call.
            let n = unsafe { libc::sendmsg(self.inner.as_raw_fd(), &msg, libc::MSG_NOSIGNAL) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Read bytes, collecting any descriptors that arrived with them.
    ///
    /// Received descriptors are appended to `fds` in arrival order. A return
    /// value of `0` means the peer closed the stream.
    pub fn recv_with_fds(&self, buf: &mut [u8], fds: &mut VecDeque<OwnedFd>) -> io::Result<usize> {
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast::<libc::c_void>(),
            iov_len: buf.len(),
        };
        let mut cmsg_buf = [0usize; CMSG_WORDS];

        // SAFETY: a zeroed msghdr is a valid starting point; we fill in the
        // iovec and control pointers below.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
        msg.msg_controllen = mem::size_of_val(&cmsg_buf) as _;

        let n = loop {
            // SAFETY: `msg` references `iov` (backed by `buf`) and `cmsg_buf`,
            // both valid and writable for the duration of the call.
            let n = unsafe {
                libc::recvmsg(self.inner.as_raw_fd(), &mut msg, libc::MSG_CMSG_CLOEXEC)
            };
            if n >= 0 {
                break n as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };

        // SAFETY: the kernel filled `cmsg_buf` and updated `msg_controllen`;
        // CMSG_FIRSTHDR/CMSG_NXTHDR stay within that region and return null
        // at the end. Each SCM_RIGHTS payload is an array of ints whose
        // length is derived from `cmsg_len`.
        unsafe {
            let header_len = libc::CMSG_LEN(0) as usize;
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                    let data_len = ((*cmsg).cmsg_len as usize).saturating_sub(header_len);
                    let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                    for i in 0..data_len / mem::size_of::<RawFd>() {
                        let raw = std::ptr::read_unaligned(data.add(i));
                        fds.push_back(OwnedFd::from_raw_fd(raw));
                    }
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }

        if msg.msg_flags & libc::MSG_CTRUNC != 0 {
            warn!("control data truncated; passed descriptors were lost");
        }

        Ok(n)
    }

    /// Get the credentials of the connected peer (Linux only).
    ///
    /// Returns `None` if `SO_PEERCRED` is unavailable.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<PeerCredentials> {
        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and the descriptor is an open Unix socket owned by this stream.
        let rc = unsafe {
            libc::getsockopt(
                self.inner.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == mem::size_of::<libc::ucred>() {
            Some(PeerCredentials {
                uid: cred.uid,
                gid: cred.gid,
                pid: cred.pid,
            })
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<PeerCredentials> {
        None
    }
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl AsFd for IpcStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl AsRawFd for IpcStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl From<IpcStream> for OwnedFd {
    fn from(stream: IpcStream) -> Self {
        OwnedFd::from(stream.inner)
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("fd", &self.inner.as_raw_fd())
            .finish()
    }
}
