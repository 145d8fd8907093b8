//! Dropping root: user lookup, chroot and credential switch.

use std::ffi::{CStr, CString, OsStr};
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;

use tracing::info;

use crate::error::{FrontendError, Result};

const PASSWD_BUFFER: usize = 16 * 1024;

/// An unprivileged account to run as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub home: PathBuf,
}

/// Look up `name` in the password database.
pub fn lookup_user(name: &str) -> Result<Identity> {
    let cname = CString::new(name).map_err(|_| FrontendError::UnknownUser(name.to_string()))?;
    // SAFETY: passwd is plain data; all zeroes is a valid value.
    let mut pwd: libc::passwd = unsafe { mem::zeroed() };
    let mut buf = vec![0 as libc::c_char; PASSWD_BUFFER];
    let mut result: *mut libc::passwd = ptr::null_mut();

    // SAFETY: every pointer refers to a live local of the stated size; on
    // success the strings in `pwd` point into `buf`.
    let rc = unsafe {
        libc::getpwnam_r(
            cname.as_ptr(),
            &mut pwd,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 {
        return Err(FrontendError::Privilege {
            op: "getpwnam",
            source: io::Error::from_raw_os_error(rc),
        });
    }
    if result.is_null() {
        return Err(FrontendError::UnknownUser(name.to_string()));
    }

    // SAFETY: pw_dir is a NUL terminated string inside `buf`.
    let home = unsafe { CStr::from_ptr(pwd.pw_dir) };
    Ok(Identity {
        name: name.to_string(),
        uid: pwd.pw_uid,
        gid: pwd.pw_gid,
        home: PathBuf::from(OsStr::from_bytes(home.to_bytes())),
    })
}

/// Confine the process to `dir`.
pub fn enter_chroot(dir: &Path) -> Result<()> {
    let cdir = CString::new(dir.as_os_str().as_bytes()).map_err(|_| FrontendError::Privilege {
        op: "chroot",
        source: io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"),
    })?;
    // SAFETY: `cdir` is NUL terminated.
    if unsafe { libc::chroot(cdir.as_ptr()) } != 0 {
        return Err(FrontendError::Privilege {
            op: "chroot",
            source: io::Error::last_os_error(),
        });
    }
    std::env::set_current_dir("/").map_err(|source| FrontendError::Privilege {
        op: "chdir(\"/\")",
        source,
    })?;
    info!(dir = %dir.display(), "entered chroot");
    Ok(())
}

/// Switch groups, gid and uid to `identity`, in that order.
pub fn drop_privileges(identity: &Identity) -> Result<()> {
    let gid = identity.gid;
    // SAFETY: a single gid is passed by reference with count 1.
    if unsafe { libc::setgroups(1, &gid) } != 0 {
        return Err(last_error("setgroups"));
    }
    // SAFETY: plain syscall on integer arguments.
    if unsafe { libc::setresgid(gid, gid, gid) } != 0 {
        return Err(last_error("setresgid"));
    }
    let uid = identity.uid;
    // SAFETY: plain syscall on integer arguments.
    if unsafe { libc::setresuid(uid, uid, uid) } != 0 {
        return Err(last_error("setresuid"));
    }
    info!(user = %identity.name, uid, gid, "dropped privileges");
    Ok(())
}

fn last_error(op: &'static str) -> FrontendError {
    FrontendError::Privilege {
        op,
        source: io::Error::last_os_error(),
    }
}
