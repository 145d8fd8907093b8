use std::collections::VecDeque;
use std::io::ErrorKind;
use std::os::fd::{AsFd, OwnedFd};

use bytes::{Buf, Bytes, BytesMut};
use ndfront_transport::IpcStream;
use tracing::{debug, trace, warn};

use crate::codec::{decode_frame, encode_frame};
use crate::error::{FrameError, Result};
use crate::kind::MessageType;
use crate::message::{IpcMessage, Message};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Whether a link can still be used after an I/O pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Open,
    /// The peer hung up or the link failed; the endpoint should be dropped.
    Closed,
}

/// Outcome of draining a readable endpoint.
#[derive(Debug)]
pub struct Readable {
    /// Complete messages, in arrival order.
    pub messages: Vec<IpcMessage>,
    pub status: LinkStatus,
}

struct Pending {
    bytes: Bytes,
    fd: Option<OwnedFd>,
}

/// One end of a framed, non-blocking IPC link.
///
/// Reads are reassembled into whole messages; writes are queued and
/// flushed when the reactor reports the socket writable. A descriptor
/// belongs to the frame that contains the first byte it arrived with; a
/// `SOCKET_IPC` frame takes one and every other descriptor is closed as
/// soon as its frame is decoded.
pub struct IpcEndpoint {
    name: &'static str,
    stream: IpcStream,
    rbuf: BytesMut,
    /// Received descriptors, tagged with the stream offset they arrived at.
    fds: VecDeque<(u64, OwnedFd)>,
    /// Stream offset of the end of `rbuf`.
    received: u64,
    /// Stream offset of the start of `rbuf`.
    consumed: u64,
    queue: VecDeque<Pending>,
}

impl IpcEndpoint {
    /// Take over `stream`, switching it to non-blocking mode.
    pub fn new(name: &'static str, stream: IpcStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            name,
            stream,
            rbuf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            fds: VecDeque::new(),
            received: 0,
            consumed: 0,
            queue: VecDeque::new(),
        })
    }

    /// Label used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stream(&self) -> &IpcStream {
        &self.stream
    }

    /// Queue a message for delivery.
    pub fn send(&mut self, message: IpcMessage) -> Result<()> {
        self.compose(&message.body, message.peer_id, message.pid, message.fd)
    }

    /// Frame `body` and queue it, optionally passing `fd` alongside.
    pub fn compose(
        &mut self,
        body: &Message,
        peer_id: u32,
        pid: i32,
        fd: Option<OwnedFd>,
    ) -> Result<()> {
        let mut payload = BytesMut::new();
        body.encode_payload(&mut payload);

        let mut wire = BytesMut::new();
        encode_frame(body.kind(), peer_id, pid, &payload, &mut wire)?;

        trace!(link = self.name, kind = %body.kind(), len = payload.len(), "queued message");
        self.queue.push_back(Pending {
            bytes: wire.freeze(),
            fd,
        });
        Ok(())
    }

    /// Whether queued output is waiting for the socket to become writable.
    pub fn wants_write(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Number of messages not yet fully written.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Read everything currently available and decode whole messages.
    ///
    /// A malformed frame is returned as an error; the caller decides
    /// whether that is fatal for the process or only for this link.
    pub fn poll_readable(&mut self) -> Result<Readable> {
        let mut status = LinkStatus::Open;
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut arrived = VecDeque::new();

        loop {
            let result = self.stream.recv_with_fds(&mut chunk, &mut arrived);
            let offset = self.received;
            self.fds.extend(arrived.drain(..).map(|fd| (offset, fd)));
            match result {
                Ok(0) => {
                    status = LinkStatus::Closed;
                    break;
                }
                Ok(n) => {
                    self.rbuf.extend_from_slice(&chunk[..n]);
                    self.received += n as u64;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::ConnectionReset => {
                    debug!(link = self.name, "connection reset by peer");
                    status = LinkStatus::Closed;
                    break;
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        let mut messages = Vec::new();
        while let Some(frame) = decode_frame(&mut self.rbuf)? {
            self.consumed += frame.wire_size() as u64;
            let mut message = IpcMessage::from_frame(frame)?;
            let mut claimed = self.claim_fds().into_iter();
            if message.kind() == MessageType::SocketIpc {
                message.fd = claimed.next();
            }
            let stray = claimed.count();
            if stray > 0 {
                debug!(
                    link = self.name,
                    kind = %message.kind(),
                    stray,
                    "closing unexpected descriptors"
                );
            }
            trace!(link = self.name, kind = %message.kind(), "received message");
            messages.push(message);
        }

        if status == LinkStatus::Closed && !self.rbuf.is_empty() {
            debug!(
                link = self.name,
                leftover = self.rbuf.len(),
                "peer closed mid-message"
            );
        }

        Ok(Readable { messages, status })
    }

    /// Descriptors that arrived inside the frame just decoded.
    fn claim_fds(&mut self) -> Vec<OwnedFd> {
        let within = self
            .fds
            .iter()
            .take_while(|(offset, _)| *offset < self.consumed)
            .count();
        self.fds.drain(..within).map(|(_, fd)| fd).collect()
    }

    /// Flush queued output until the socket would block.
    pub fn write_ready(&mut self) -> LinkStatus {
        while let Some(pending) = self.queue.front_mut() {
            let fd = pending.fd.as_ref().map(|fd| fd.as_fd());
            match self.stream.send_with_fd(&pending.bytes, fd) {
                Ok(0) => {
                    warn!(link = self.name, "write returned zero; closing link");
                    return LinkStatus::Closed;
                }
                Ok(n) => {
                    // The kernel holds its own reference once any byte went out.
                    pending.fd = None;
                    pending.bytes.advance(n);
                    if pending.bytes.is_empty() {
                        self.queue.pop_front();
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return LinkStatus::Open,
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset
                    ) =>
                {
                    debug!(link = self.name, error = %err, "peer went away");
                    return LinkStatus::Closed;
                }
                Err(err) => {
                    warn!(link = self.name, error = %err, "write failed; closing link");
                    return LinkStatus::Closed;
                }
            }
        }
        LinkStatus::Open
    }

    /// Try once more to flush, then close the link.
    pub fn shutdown(mut self) {
        if self.wants_write() && self.write_ready() == LinkStatus::Open && self.wants_write() {
            debug!(
                link = self.name,
                dropped = self.queue.len(),
                "closing with unsent messages"
            );
        }
    }
}

impl std::fmt::Debug for IpcEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcEndpoint")
            .field("name", &self.name)
            .field("buffered", &self.rbuf.len())
            .field("fds", &self.fds.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}
