//! Control socket: local clients asking for interface state.

use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use ndfront_frame::{IpcEndpoint, IpcMessage, LinkStatus};
use ndfront_transport::UnixDomainSocket;
use tracing::{debug, info, warn};

use crate::error::Result;

/// One connected control client.
#[derive(Debug)]
pub struct ControlClient {
    pub(crate) id: u64,
    /// Process id used to route replies back to this client.
    pub pid: i32,
    pub(crate) endpoint: IpcEndpoint,
}

/// Listening control socket and its clients.
#[derive(Debug)]
pub struct ControlServer {
    socket: UnixDomainSocket,
    listening: bool,
    clients: Vec<ControlClient>,
    next_id: u64,
}

impl ControlServer {
    /// Bind the control socket. Done while still privileged.
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            socket: UnixDomainSocket::bind(path)?,
            listening: false,
            clients: Vec::new(),
            next_id: 1,
        })
    }

    /// Start accepting clients.
    pub fn listen(&mut self) {
        self.listening = true;
        debug!(path = %self.socket.path().display(), "control socket accepting");
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub(crate) fn listener_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Accept everyone waiting on the listener.
    ///
    /// Before [`listen`](Self::listen) connections stay in the kernel backlog.
    pub fn accept_pending(&mut self) -> Result<()> {
        if !self.listening {
            return Ok(());
        }
        while let Some(stream) = self.socket.try_accept()? {
            let id = self.next_id;
            self.next_id += 1;
            let pid = match stream.peer_credentials() {
                Some(creds) => creds.pid,
                None => -(id as i32),
            };
            let endpoint = IpcEndpoint::new("control", stream)?;
            info!(pid, "control client connected");
            self.clients.push(ControlClient { id, pid, endpoint });
        }
        Ok(())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub(crate) fn clients(&self) -> impl Iterator<Item = &ControlClient> {
        self.clients.iter()
    }

    pub(crate) fn client_mut(&mut self, id: u64) -> Option<&mut ControlClient> {
        self.clients.iter_mut().find(|c| c.id == id)
    }

    pub(crate) fn close(&mut self, id: u64) {
        if let Some(pos) = self.clients.iter().position(|c| c.id == id) {
            let client = self.clients.remove(pos);
            info!(pid = client.pid, "control client disconnected");
        }
    }

    /// Flush a client's queued replies, dropping it if the link died.
    pub(crate) fn write_ready(&mut self, id: u64) {
        let closed = self
            .client_mut(id)
            .is_some_and(|c| c.endpoint.write_ready() == LinkStatus::Closed);
        if closed {
            self.close(id);
        }
    }

    /// Deliver `message` to the client whose pid matches `message.pid`.
    pub fn relay(&mut self, message: IpcMessage) -> Result<()> {
        let Some(client) = self.clients.iter_mut().find(|c| c.pid == message.pid) else {
            debug!(pid = message.pid, kind = %message.kind(), "no control client for reply");
            return Ok(());
        };
        if let Err(err) = client.endpoint.send(message) {
            warn!(pid = client.pid, error = %err, "cannot queue control reply");
        }
        Ok(())
    }
}
