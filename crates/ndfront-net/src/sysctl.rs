use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::error::{NetError, Result};

/// Default location of the per-interface IPv6 sysctl tree.
pub const DEFAULT_SYSCTL_ROOT: &str = "/proc/sys/net/ipv6/conf";

/// Handle on the per-interface sysctl directory.
///
/// Opened once at startup; entries are then resolved relative to the
/// directory descriptor, so lookups keep working after a chroot.
#[derive(Debug)]
pub struct SysctlDir {
    dir: OwnedFd,
}

impl SysctlDir {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY | libc::O_CLOEXEC)
            .open(&path)
            .map_err(|source| NetError::Sysctl {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            dir: OwnedFd::from(dir),
        })
    }

    /// Read `<if_name>/<key>` as an integer.
    ///
    /// Returns `Ok(None)` when the entry does not exist, which is how a
    /// vanished interface shows up.
    pub fn read_int(&self, if_name: &str, key: &str) -> Result<Option<i64>> {
        validate_name(if_name)?;
        let relative = CString::new(format!("{if_name}/{key}"))
            .map_err(|_| NetError::InvalidName(if_name.to_string()))?;

        // SAFETY: `relative` is NUL terminated and `dir` is an open directory.
        let fd = unsafe {
            libc::openat(
                self.dir.as_raw_fd(),
                relative.as_ptr(),
                libc::O_RDONLY | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::ENOENT) | Some(libc::ENOTDIR) => Ok(None),
                _ => Err(query_error(if_name, err)),
            };
        }
        // SAFETY: `fd` was just returned by openat and is owned by nobody else.
        let mut file = File::from(unsafe { OwnedFd::from_raw_fd(fd) });

        let mut text = String::new();
        file.read_to_string(&mut text)
            .map_err(|err| query_error(if_name, err))?;
        text.trim().parse::<i64>().map(Some).map_err(|_| {
            query_error(
                if_name,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{key}: not an integer: {:?}", text.trim()),
                ),
            )
        })
    }
}

fn query_error(name: &str, source: io::Error) -> NetError {
    NetError::InterfaceQuery {
        op: "sysctl read",
        name: name.to_string(),
        source,
    }
}

/// Reject names the kernel could never have handed out.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.len() >= libc::IFNAMSIZ
        || name == "."
        || name == ".."
        || name.contains(['/', '\0'])
    {
        return Err(NetError::InvalidName(name.to_string()));
    }
    Ok(())
}
