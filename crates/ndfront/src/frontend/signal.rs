use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;

use tracing::debug;

use crate::error::{FrontendError, Result};

/// Read end of the termination self-pipe, polled by the event loop.
#[derive(Debug)]
pub struct SignalPipe {
    reader: UnixStream,
}

/// Write end of the self-pipe. Safe to use from the signal thread.
#[derive(Debug)]
pub struct SignalNotifier {
    writer: UnixStream,
}

impl SignalNotifier {
    pub fn notify(&self) {
        // A full pipe already holds a pending wakeup.
        let _ = (&self.writer).write(&[1]);
    }
}

impl SignalPipe {
    pub fn new() -> Result<(Self, SignalNotifier)> {
        let (reader, writer) = UnixStream::pair().map_err(|e| FrontendError::Signal(e.to_string()))?;
        reader
            .set_nonblocking(true)
            .map_err(|e| FrontendError::Signal(e.to_string()))?;
        writer
            .set_nonblocking(true)
            .map_err(|e| FrontendError::Signal(e.to_string()))?;
        Ok((Self { reader }, SignalNotifier { writer }))
    }

    /// Route SIGINT and SIGTERM into the pipe; ignore SIGPIPE and SIGHUP.
    ///
    /// Can only be called once per process.
    pub fn install() -> Result<Self> {
        let (pipe, notifier) = Self::new()?;
        ctrlc::set_handler(move || notifier.notify())
            .map_err(|err| FrontendError::Signal(err.to_string()))?;

        // The termination handler also claims SIGHUP; put it back.
        // SAFETY: installing SIG_IGN is async-signal-safe and has no
        // Rust-side invariants.
        unsafe {
            libc::signal(libc::SIGHUP, libc::SIG_IGN);
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }
        Ok(pipe)
    }

    /// Consume pending notifications. Returns true if any arrived.
    pub fn drain(&self) -> bool {
        let mut buf = [0u8; 16];
        let mut seen = false;
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => return seen,
                Ok(_) => seen = true,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return seen,
                Err(err) => {
                    debug!(error = %err, "signal pipe read failed");
                    return seen;
                }
            }
        }
    }
}

impl AsFd for SignalPipe {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }
}

impl AsRawFd for SignalPipe {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_on_full_pipe_keeps_the_wakeup() {
        let (pipe, notifier) = SignalPipe::new().unwrap();
        for _ in 0..100_000 {
            notifier.notify();
        }
        assert!(pipe.drain());
        assert!(!pipe.drain());
    }

    #[test]
    fn notification_is_drained_once() {
        let (pipe, notifier) = SignalPipe::new().unwrap();
        assert!(!pipe.drain());

        notifier.notify();
        notifier.notify();
        assert!(pipe.drain());
        assert!(!pipe.drain());
    }
}
