use std::io;
use std::path::PathBuf;

/// Errors raised while setting up or querying the host network stack.
///
/// Per-datagram problems are not errors: they are logged and the datagram
/// is dropped. Everything here means a required kernel facility failed.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Creating or binding a socket failed.
    #[error("failed to open {what} socket: {source}")]
    Socket {
        what: &'static str,
        source: io::Error,
    },

    /// A required socket option could not be set.
    #[error("failed to set {option} on {what} socket: {source}")]
    SocketOption {
        what: &'static str,
        option: &'static str,
        source: io::Error,
    },

    /// An interface query failed for a reason other than the interface
    /// having disappeared.
    #[error("{op} failed for {name}: {source}")]
    InterfaceQuery {
        op: &'static str,
        name: String,
        source: io::Error,
    },

    /// The interface name cannot be passed to the kernel.
    #[error("invalid interface name {0:?}")]
    InvalidName(String),

    /// The per-interface sysctl tree is not available.
    #[error("cannot open {path}: {source}")]
    Sysctl { path: PathBuf, source: io::Error },

    /// Listing interface addresses failed.
    #[error("getifaddrs failed: {0}")]
    AddressList(io::Error),
}

pub type Result<T> = std::result::Result<T, NetError>;
