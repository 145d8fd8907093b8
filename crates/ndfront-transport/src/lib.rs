//! Local IPC transport for the ndfront privilege-separated daemon.
//!
//! Provides the byte-stream layer that both process links (parent and
//! engine) and control-socket clients ride on:
//! - [`IpcStream`]: a Unix stream that can carry file descriptors
//!   alongside its bytes (`SCM_RIGHTS`)
//! - [`UnixDomainSocket`]: the filesystem listener behind the control socket
//!
//! Framing lives one layer up, in `ndfront-frame`.

pub mod error;

#[cfg(unix)]
pub mod stream;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use stream::{IpcStream, PeerCredentials};
#[cfg(unix)]
pub use uds::UnixDomainSocket;
