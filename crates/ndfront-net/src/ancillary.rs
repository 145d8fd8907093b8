//! Typed encode/decode of IPv6 ancillary data.
//!
//! Control messages are walked over a plain byte span with explicit bounds
//! checks. Only the two entries this daemon cares about are understood:
//! `IPV6_PKTINFO` (interface and address) and `IPV6_HOPLIMIT`.

use std::mem;
use std::net::Ipv6Addr;
use std::ptr;

use tracing::trace;

/// Hop limit carried by every outgoing router solicitation and required on
/// every accepted router advertisement.
pub const NEIGHBOR_DISCOVERY_HOP_LIMIT: i32 = 255;

/// Size of `struct in6_pktinfo`: 16-byte address + `int` interface index.
const PKTINFO_LEN: usize = 16 + mem::size_of::<libc::c_int>();
const HOPLIMIT_LEN: usize = mem::size_of::<libc::c_int>();

/// Room for one pktinfo and one hop limit entry, with slack for anything
/// else the kernel attaches.
pub const CONTROL_CAPACITY: usize = 128;

const fn align(len: usize) -> usize {
    let a = mem::size_of::<usize>();
    (len + a - 1) & !(a - 1)
}

const HEADER_LEN: usize = align(mem::size_of::<libc::cmsghdr>());

/// `CMSG_SPACE` for a payload of `len` bytes.
pub const fn space(len: usize) -> usize {
    HEADER_LEN + align(len)
}

/// Destination or arrival information from `IPV6_PKTINFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    pub addr: Ipv6Addr,
    pub if_index: u32,
}

/// The ancillary entries attached to one datagram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ancillary {
    pub packet_info: Option<PacketInfo>,
    pub hop_limit: Option<i32>,
}

/// Word-aligned control message storage.
#[derive(Clone)]
#[repr(C, align(8))]
struct Aligned([u8; CONTROL_CAPACITY]);

/// A control buffer suitable for `msg_control`.
///
/// Built once from an [`Ancillary`]; the pktinfo interface can then be
/// patched in place for each send without re-encoding.
#[derive(Clone)]
pub struct ControlBuffer {
    storage: Aligned,
    len: usize,
    pktinfo_data: Option<usize>,
}

impl ControlBuffer {
    /// An empty buffer with full capacity, for receiving.
    pub fn for_receive() -> Self {
        Self {
            storage: Aligned([0; CONTROL_CAPACITY]),
            len: CONTROL_CAPACITY,
            pktinfo_data: None,
        }
    }

    /// Encode `ancillary` into a fresh buffer.
    pub fn encode(ancillary: &Ancillary) -> Self {
        let mut buf = Self {
            storage: Aligned([0; CONTROL_CAPACITY]),
            len: 0,
            pktinfo_data: None,
        };

        if let Some(info) = ancillary.packet_info {
            let mut data = [0u8; PKTINFO_LEN];
            data[..16].copy_from_slice(&info.addr.octets());
            data[16..].copy_from_slice(&(info.if_index as libc::c_int).to_ne_bytes());
            buf.pktinfo_data = Some(buf.push(libc::IPPROTO_IPV6, libc::IPV6_PKTINFO, &data));
        }
        if let Some(hops) = ancillary.hop_limit {
            buf.push(libc::IPPROTO_IPV6, libc::IPV6_HOPLIMIT, &hops.to_ne_bytes());
        }
        buf
    }

    fn push(&mut self, level: libc::c_int, kind: libc::c_int, data: &[u8]) -> usize {
        let start = self.len;
        // SAFETY: cmsghdr is plain data; the zero pattern is valid on every libc.
        let mut header: libc::cmsghdr = unsafe { mem::zeroed() };
        header.cmsg_len = (HEADER_LEN + data.len()) as _;
        header.cmsg_level = level;
        header.cmsg_type = kind;

        let bytes = &mut self.storage.0[start..start + space(data.len())];
        // SAFETY: `bytes` is at least HEADER_LEN long and the write is unaligned.
        unsafe { ptr::write_unaligned(bytes.as_mut_ptr().cast::<libc::cmsghdr>(), header) };
        bytes[HEADER_LEN..HEADER_LEN + data.len()].copy_from_slice(data);

        self.len += space(data.len());
        start + HEADER_LEN
    }

    /// Rewrite the interface index of the encoded pktinfo entry.
    ///
    /// Returns false if the buffer carries no pktinfo.
    pub fn set_packet_info_interface(&mut self, if_index: u32) -> bool {
        let Some(offset) = self.pktinfo_data else {
            return false;
        };
        self.storage.0[offset + 16..offset + PKTINFO_LEN]
            .copy_from_slice(&(if_index as libc::c_int).to_ne_bytes());
        true
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.storage.0[..self.len]
    }

    /// Raw storage for `recvmsg`; pair with [`ControlBuffer::capacity`].
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.storage.0.as_mut_ptr()
    }

    pub fn capacity(&self) -> usize {
        CONTROL_CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Decode the first `len` bytes, as reported back in `msg_controllen`.
    pub fn decode_received(&self, len: usize) -> Ancillary {
        decode(&self.storage.0[..len.min(CONTROL_CAPACITY)])
    }
}

impl std::fmt::Debug for ControlBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlBuffer")
            .field("len", &self.len)
            .field("ancillary", &decode(self.as_bytes()))
            .finish()
    }
}

/// Walk a control message span and pick out pktinfo and hop limit.
///
/// Entries of an unexpected size are ignored. A header whose length runs
/// past the span ends the walk.
pub fn decode(control: &[u8]) -> Ancillary {
    let mut out = Ancillary::default();
    let mut offset = 0;

    while control.len() - offset >= HEADER_LEN {
        // SAFETY: at least HEADER_LEN bytes remain and the read is unaligned.
        let header: libc::cmsghdr =
            unsafe { ptr::read_unaligned(control[offset..].as_ptr().cast::<libc::cmsghdr>()) };
        let len = header.cmsg_len as usize;
        if len < HEADER_LEN || len > control.len() - offset {
            trace!(offset, len, "malformed control message header");
            break;
        }

        let data = &control[offset + HEADER_LEN..offset + len];
        match (header.cmsg_level, header.cmsg_type) {
            (libc::IPPROTO_IPV6, libc::IPV6_PKTINFO) if data.len() == PKTINFO_LEN => {
                let mut addr = [0u8; 16];
                addr.copy_from_slice(&data[..16]);
                let mut index = [0u8; 4];
                index.copy_from_slice(&data[16..20]);
                out.packet_info = Some(PacketInfo {
                    addr: Ipv6Addr::from(addr),
                    if_index: libc::c_int::from_ne_bytes(index) as u32,
                });
            }
            (libc::IPPROTO_IPV6, libc::IPV6_HOPLIMIT) if data.len() == HOPLIMIT_LEN => {
                let mut hops = [0u8; 4];
                hops.copy_from_slice(data);
                out.hop_limit = Some(libc::c_int::from_ne_bytes(hops));
            }
            (level, kind) => trace!(level, kind, "skipping control message"),
        }

        offset += align(len).min(control.len() - offset);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pktinfo_and_hop_limit_decode_back() {
        let sent = Ancillary {
            packet_info: Some(PacketInfo {
                addr: Ipv6Addr::UNSPECIFIED,
                if_index: 7,
            }),
            hop_limit: Some(NEIGHBOR_DISCOVERY_HOP_LIMIT),
        };
        let buf = ControlBuffer::encode(&sent);
        assert_eq!(buf.as_bytes().len(), space(PKTINFO_LEN) + space(HOPLIMIT_LEN));
        assert_eq!(decode(buf.as_bytes()), sent);
    }

    #[test]
    fn interface_is_patched_in_place() {
        let mut buf = ControlBuffer::encode(&Ancillary {
            packet_info: Some(PacketInfo {
                addr: Ipv6Addr::UNSPECIFIED,
                if_index: 0,
            }),
            hop_limit: Some(255),
        });
        let before = buf.as_bytes().len();

        assert!(buf.set_packet_info_interface(5));
        assert_eq!(buf.as_bytes().len(), before);

        let decoded = decode(buf.as_bytes());
        assert_eq!(decoded.packet_info.unwrap().if_index, 5);
        assert_eq!(decoded.hop_limit, Some(255));
    }

    #[test]
    fn patch_without_pktinfo_reports_false() {
        let mut buf = ControlBuffer::encode(&Ancillary {
            packet_info: None,
            hop_limit: Some(64),
        });
        assert!(!buf.set_packet_info_interface(3));
    }

    #[test]
    fn missing_entries_decode_as_none() {
        assert_eq!(decode(&[]), Ancillary::default());

        let only_hops = ControlBuffer::encode(&Ancillary {
            packet_info: None,
            hop_limit: Some(1),
        });
        let decoded = decode(only_hops.as_bytes());
        assert!(decoded.packet_info.is_none());
        assert_eq!(decoded.hop_limit, Some(1));
    }

    #[test]
    fn header_running_past_span_stops_walk() {
        let buf = ControlBuffer::encode(&Ancillary {
            packet_info: None,
            hop_limit: Some(255),
        });
        let cut = &buf.as_bytes()[..HEADER_LEN + 2];
        assert_eq!(decode(cut), Ancillary::default());
    }

    #[test]
    fn short_span_is_empty() {
        assert_eq!(decode(&[0u8; 3]), Ancillary::default());
    }

    #[test]
    fn wrong_sized_hop_limit_is_ignored() {
        let mut buf = ControlBuffer::encode(&Ancillary::default());
        buf.push(libc::IPPROTO_IPV6, libc::IPV6_HOPLIMIT, &[255, 0]);
        assert_eq!(decode(buf.as_bytes()).hop_limit, None);
    }
}
