//! Kernel route notifications.
//!
//! A `NETLINK_ROUTE` socket subscribed to link and IPv6 address groups.
//! Link changes and new addresses trigger interface re-evaluation; the
//! engine is told to forget interfaces that vanished or lost autoconf.

use std::io::{self, Read};
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use ndfront_frame::InterfaceInfo;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::error::{NetError, Result};
use crate::iface::{evaluate, InterfaceSource};

// linux/rtnetlink.h
pub const RTMGRP_LINK: u32 = 0x1;
pub const RTMGRP_IPV6_IFADDR: u32 = 0x100;

const RTM_NEWLINK: u16 = 16;
const RTM_DELLINK: u16 = 17;
const RTM_NEWADDR: u16 = 20;

const NLMSG_HDR_LEN: usize = 16;
const NLMSG_ALIGN: usize = 4;
const IFINFOMSG_LEN: usize = 16;
const IFADDRMSG_LEN: usize = 8;
/// Both `ifinfomsg` and `ifaddrmsg` carry the interface index here.
const INDEX_OFFSET: usize = 4;

const RECV_BUFFER: usize = 16 * 1024;

/// One netlink message, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMessage {
    /// `RTM_NEWLINK` or `RTM_DELLINK`.
    InterfaceChanged { index: u32 },
    /// `RTM_NEWADDR`.
    AddressAdded { index: u32 },
    Ignored(Skip),
}

/// Why a netlink message was not acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Header length is below the minimum or past the datagram end.
    Truncated { len: usize, remaining: usize },
    /// Body too short for its message kind.
    ShortBody { kind: u16, len: usize },
    Unexpected(u16),
}

fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGN - 1) & !(NLMSG_ALIGN - 1)
}

fn ne_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_ne_bytes(raw)
}

/// Split a datagram into classified messages.
///
/// A malformed header ends parsing of that datagram; earlier messages are
/// still returned.
pub fn parse_route_datagram(buf: &[u8]) -> Vec<RouteMessage> {
    let mut out = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let remaining = buf.len() - offset;
        if remaining < NLMSG_HDR_LEN {
            out.push(RouteMessage::Ignored(Skip::Truncated { len: remaining, remaining }));
            break;
        }
        let header = &buf[offset..];
        let len = ne_u32(header) as usize;
        if len < NLMSG_HDR_LEN || len > remaining {
            out.push(RouteMessage::Ignored(Skip::Truncated { len, remaining }));
            break;
        }
        let kind = u16::from_ne_bytes([header[4], header[5]]);
        let body = &header[NLMSG_HDR_LEN..len];

        let message = match kind {
            RTM_NEWLINK | RTM_DELLINK if body.len() >= IFINFOMSG_LEN => {
                RouteMessage::InterfaceChanged {
                    index: ne_u32(&body[INDEX_OFFSET..]),
                }
            }
            RTM_NEWADDR if body.len() >= IFADDRMSG_LEN => RouteMessage::AddressAdded {
                index: ne_u32(&body[INDEX_OFFSET..]),
            },
            RTM_NEWLINK | RTM_DELLINK | RTM_NEWADDR => RouteMessage::Ignored(Skip::ShortBody {
                kind,
                len: body.len(),
            }),
            other => RouteMessage::Ignored(Skip::Unexpected(other)),
        };
        out.push(message);
        offset += nlmsg_align(len).min(remaining);
    }
    out
}

/// What the engine should hear about an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceEvent {
    Update(InterfaceInfo),
    Remove(u32),
}

/// React to one route message.
///
/// New addresses always re-evaluate the interface, even when nothing
/// relevant changed; the engine tolerates duplicate updates.
pub fn handle_route_message<S: InterfaceSource + ?Sized>(
    source: &S,
    message: RouteMessage,
) -> Result<Option<InterfaceEvent>> {
    match message {
        RouteMessage::InterfaceChanged { index } => {
            let Some(name) = source.index_to_name(index) else {
                debug!(if_index = index, "interface info: lost interface");
                return Ok(Some(InterfaceEvent::Remove(index)));
            };
            match source.autoconf_flags(&name)? {
                Some(flags) if flags.autoconf6 => {
                    Ok(evaluate(source, index, &name)?.map(InterfaceEvent::Update))
                }
                _ => {
                    debug!(if_index = index, if_name = %name, "interface info: no (longer) autoconf6");
                    Ok(Some(InterfaceEvent::Remove(index)))
                }
            }
        }
        RouteMessage::AddressAdded { index } => {
            let Some(name) = source.index_to_name(index) else {
                debug!(if_index = index, "new address on unknown interface");
                return Ok(None);
            };
            debug!(if_index = index, if_name = %name, "new address");
            Ok(evaluate(source, index, &name)?.map(InterfaceEvent::Update))
        }
        RouteMessage::Ignored(skip) => {
            debug!(?skip, "ignoring route message");
            Ok(None)
        }
    }
}

/// Non-blocking netlink socket for link and address notifications.
#[derive(Debug)]
pub struct RouteSocket {
    inner: Socket,
    buf: Box<[u8]>,
}

impl RouteSocket {
    /// Open and subscribe to `RTMGRP_LINK | RTMGRP_IPV6_IFADDR`.
    pub fn open() -> Result<Self> {
        let socket = Socket::new(
            Domain::from(libc::AF_NETLINK),
            Type::RAW,
            Some(Protocol::from(libc::NETLINK_ROUTE)),
        )
        .map_err(|source| NetError::Socket {
            what: "route",
            source,
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| NetError::Socket {
                what: "route",
                source,
            })?;

        // SAFETY: sockaddr_nl is plain data; all zeroes is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_groups = RTMGRP_LINK | RTMGRP_IPV6_IFADDR;

        // SAFETY: `addr` is a valid sockaddr_nl and the length matches it.
        let rc = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                (&addr as *const libc::sockaddr_nl).cast::<libc::sockaddr>(),
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(NetError::Socket {
                what: "route",
                source: io::Error::last_os_error(),
            });
        }

        debug!(fd = socket.as_raw_fd(), "route socket open");
        Ok(Self {
            inner: socket,
            buf: vec![0u8; RECV_BUFFER].into_boxed_slice(),
        })
    }

    /// Read every pending datagram and classify its messages.
    pub fn read_messages(&mut self) -> Vec<RouteMessage> {
        let mut out = Vec::new();
        loop {
            match (&self.inner).read(&mut self.buf) {
                Ok(0) => break,
                Ok(n) => out.extend(parse_route_datagram(&self.buf[..n])),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.raw_os_error() == Some(libc::ENOBUFS) => {
                    warn!("route notifications overran the socket buffer; some were lost");
                }
                Err(err) => {
                    debug!(error = %err, "read on route socket failed");
                    break;
                }
            }
        }
        out
    }
}

impl AsFd for RouteSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl AsRawFd for RouteSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
