//! Raw ICMPv6 socket used for both solicitations and advertisements.

use std::io;
use std::mem;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::ancillary::{Ancillary, ControlBuffer};
use crate::error::{NetError, Result};

/// ICMPv6 type of a router solicitation.
pub const ND_ROUTER_SOLICIT: u8 = 133;
/// ICMPv6 type of a router advertisement.
pub const ND_ROUTER_ADVERT: u8 = 134;

// linux/icmpv6.h
const ICMPV6_FILTER: libc::c_int = 1;

/// Kernel ICMPv6 type filter. A set bit blocks the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Icmp6Filter {
    data: [u32; 8],
}

impl Icmp6Filter {
    pub fn block_all() -> Self {
        Self { data: [u32::MAX; 8] }
    }

    pub fn pass(&mut self, icmp_type: u8) {
        self.data[usize::from(icmp_type >> 5)] &= !(1u32 << (icmp_type & 31));
    }

    pub fn passes(&self, icmp_type: u8) -> bool {
        self.data[usize::from(icmp_type >> 5)] & (1u32 << (icmp_type & 31)) == 0
    }
}

/// One datagram read from the socket.
#[derive(Debug, Clone, Copy)]
pub struct Received {
    /// Length of the datagram on the wire, which may exceed the buffer.
    pub len: usize,
    /// The datagram did not fit the buffer.
    pub truncated: bool,
    pub source: SocketAddrV6,
    pub ancillary: Ancillary,
}

/// Something that can transmit a prepared ICMPv6 datagram.
pub trait Transmit {
    fn transmit(
        &self,
        packet: &[u8],
        destination: &SocketAddrV6,
        control: &ControlBuffer,
    ) -> io::Result<usize>;
}

/// Non-blocking raw ICMPv6 socket that only lets router advertisements in.
#[derive(Debug)]
pub struct Icmp6Socket {
    inner: Socket,
}

impl Icmp6Socket {
    /// Open the socket and install options and filter. Needs `CAP_NET_RAW`.
    pub fn open() -> Result<Self> {
        let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))
            .map_err(|source| NetError::Socket {
                what: "ICMPv6",
                source,
            })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| NetError::Socket {
                what: "ICMPv6",
                source,
            })?;

        set_int_option(&socket, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO, 1).map_err(
            |source| NetError::SocketOption {
                what: "ICMPv6",
                option: "IPV6_RECVPKTINFO",
                source,
            },
        )?;
        set_int_option(&socket, libc::IPPROTO_IPV6, libc::IPV6_RECVHOPLIMIT, 1).map_err(
            |source| NetError::SocketOption {
                what: "ICMPv6",
                option: "IPV6_RECVHOPLIMIT",
                source,
            },
        )?;

        let mut filter = Icmp6Filter::block_all();
        filter.pass(ND_ROUTER_ADVERT);
        set_option(&socket, libc::IPPROTO_ICMPV6, ICMPV6_FILTER, &filter).map_err(|source| {
            NetError::SocketOption {
                what: "ICMPv6",
                option: "ICMP6_FILTER",
                source,
            }
        })?;

        debug!(fd = socket.as_raw_fd(), "ICMPv6 socket open");
        Ok(Self { inner: socket })
    }

    /// Receive one datagram into `buf` and its ancillary data into `control`.
    pub fn recv(&self, buf: &mut [u8], control: &mut ControlBuffer) -> io::Result<Received> {
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast::<libc::c_void>(),
            iov_len: buf.len(),
        };
        // SAFETY: sockaddr_in6 is plain data; all zeroes is a valid value.
        let mut from: libc::sockaddr_in6 = unsafe { mem::zeroed() };

        // SAFETY: a zeroed msghdr is a valid empty header; it is filled below.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = (&mut from as *mut libc::sockaddr_in6).cast::<libc::c_void>();
        msg.msg_namelen = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
        msg.msg_controllen = control.capacity() as _;

        let n = loop {
            // SAFETY: every pointer in `msg` refers to a live local or to
            // `buf`/`control`, all writable for their stated lengths.
            let n = unsafe { libc::recvmsg(self.inner.as_raw_fd(), &mut msg, libc::MSG_TRUNC) };
            if n >= 0 {
                break n as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };

        Ok(Received {
            len: n,
            truncated: n > buf.len() || msg.msg_flags & libc::MSG_TRUNC != 0,
            source: sockaddr_to_v6(&from),
            ancillary: control.decode_received(msg.msg_controllen as usize),
        })
    }
}

impl Transmit for Icmp6Socket {
    fn transmit(
        &self,
        packet: &[u8],
        destination: &SocketAddrV6,
        control: &ControlBuffer,
    ) -> io::Result<usize> {
        let mut to = v6_to_sockaddr(destination);
        let mut iov = libc::iovec {
            iov_base: packet.as_ptr() as *mut libc::c_void,
            iov_len: packet.len(),
        };

        // SAFETY: a zeroed msghdr is a valid empty header; it is filled below.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = (&mut to as *mut libc::sockaddr_in6).cast::<libc::c_void>();
        msg.msg_namelen = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        if !control.is_empty() {
            msg.msg_control = control.as_bytes().as_ptr() as *mut libc::c_void;
            msg.msg_controllen = control.as_bytes().len() as _;
        }

        loop {
            // SAFETY: `msg` references locals that outlive the call.
            let n = unsafe { libc::sendmsg(self.inner.as_raw_fd(), &msg, 0) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl AsFd for Icmp6Socket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl AsRawFd for Icmp6Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

fn set_int_option(
    socket: &Socket,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    set_option(socket, level, name, &value)
}

fn set_option<T>(socket: &Socket, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
    // SAFETY: `value` points at a live `T` and the length passed is its size.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            (value as *const T).cast::<libc::c_void>(),
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

pub(crate) fn sockaddr_to_v6(sa: &libc::sockaddr_in6) -> SocketAddrV6 {
    SocketAddrV6::new(
        Ipv6Addr::from(sa.sin6_addr.s6_addr),
        u16::from_be(sa.sin6_port),
        u32::from_be(sa.sin6_flowinfo),
        sa.sin6_scope_id,
    )
}

fn v6_to_sockaddr(addr: &SocketAddrV6) -> libc::sockaddr_in6 {
    // SAFETY: sockaddr_in6 is plain data; all zeroes is a valid value.
    let mut sa: libc::sockaddr_in6 = unsafe { mem::zeroed() };
    sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
    sa.sin6_port = addr.port().to_be();
    sa.sin6_flowinfo = addr.flowinfo().to_be();
    sa.sin6_addr.s6_addr = addr.ip().octets();
    sa.sin6_scope_id = addr.scope_id();
    sa
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_passes_only_advertisements() {
        let mut filter = Icmp6Filter::block_all();
        filter.pass(ND_ROUTER_ADVERT);

        assert!(filter.passes(ND_ROUTER_ADVERT));
        assert!(!filter.passes(ND_ROUTER_SOLICIT));
        assert!(!filter.passes(128));
        assert_eq!(filter.data[4], !(1u32 << 6));
        assert!(filter.data.iter().enumerate().all(|(i, w)| i == 4 || *w == u32::MAX));
    }

    #[test]
    fn sockaddr_conversion_keeps_scope() {
        let addr = SocketAddrV6::new("fe80::1".parse().unwrap(), 0, 0, 9);
        assert_eq!(sockaddr_to_v6(&v6_to_sockaddr(&addr)), addr);
    }
}
