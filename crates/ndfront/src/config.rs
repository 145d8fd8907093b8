use std::os::fd::RawFd;
use std::path::PathBuf;

use ndfront_net::DEFAULT_SYSCTL_ROOT;

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/ndfront.sock";

/// Descriptor the parent leaves open for its end of the link.
pub const DEFAULT_PARENT_FD: RawFd = 3;

/// Settings for one frontend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendConfig {
    /// Control socket path, bound before privileges are dropped.
    pub socket_path: PathBuf,
    pub parent_fd: RawFd,
    /// Unprivileged account to switch to. `None` keeps current credentials.
    pub user: Option<String>,
    /// Chroot into the user's home directory before switching.
    pub chroot: bool,
    pub sysctl_root: PathBuf,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            parent_fd: DEFAULT_PARENT_FD,
            user: None,
            chroot: true,
            sysctl_root: PathBuf::from(DEFAULT_SYSCTL_ROOT),
        }
    }
}
