//! Interface state: flags, autoconf eligibility and link addresses.

use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::io;
use std::mem;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr;

use ndfront_frame::InterfaceInfo;
use socket2::{Domain, Socket, Type};
use tracing::{debug, trace};

use crate::error::{NetError, Result};
use crate::icmp6::sockaddr_to_v6;
use crate::sysctl::{validate_name, SysctlDir};

/// Administrative and operational state from `SIOCGIFFLAGS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceFlags {
    pub up: bool,
    pub running: bool,
}

impl InterfaceFlags {
    pub fn from_bits(bits: libc::c_int) -> Self {
        Self {
            up: bits & libc::IFF_UP != 0,
            running: bits & libc::IFF_RUNNING != 0,
        }
    }

    /// Up and running both.
    pub fn is_running(&self) -> bool {
        self.up && self.running
    }
}

/// Extended IPv6 autoconfiguration flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoconfFlags {
    /// Stateless address autoconfiguration is enabled.
    pub autoconf6: bool,
    /// Temporary addresses should be generated.
    pub privacy: bool,
}

/// Hardware and link-local addresses of one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    pub hw_address: [u8; 6],
    pub link_local: SocketAddrV6,
}

impl Default for LinkInfo {
    fn default() -> Self {
        Self {
            hw_address: [0; 6],
            link_local: SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0),
        }
    }
}

/// Host facilities the interface tracker reads from.
///
/// A vanished interface is `Ok(None)`, never an error; errors mean the
/// query mechanism itself failed.
pub trait InterfaceSource {
    fn flags(&self, name: &str) -> Result<Option<InterfaceFlags>>;
    fn autoconf_flags(&self, name: &str) -> Result<Option<AutoconfFlags>>;
    fn link_info(&self, name: &str) -> Result<LinkInfo>;
    fn index_to_name(&self, index: u32) -> Option<String>;
    /// Every interface on the host as `(index, name)`, ordered by index.
    fn interfaces(&self) -> Result<Vec<(u32, String)>>;
}

/// Build the report for one interface.
///
/// Interfaces without autoconf enabled, or that disappear mid-query,
/// produce nothing.
pub fn evaluate<S: InterfaceSource + ?Sized>(
    source: &S,
    if_index: u32,
    name: &str,
) -> Result<Option<InterfaceInfo>> {
    let Some(autoconf) = source.autoconf_flags(name)? else {
        debug!(if_index, if_name = name, "interface vanished");
        return Ok(None);
    };
    if !autoconf.autoconf6 {
        trace!(if_index, if_name = name, "autoconf6 not enabled");
        return Ok(None);
    }
    let Some(flags) = source.flags(name)? else {
        debug!(if_index, if_name = name, "interface vanished");
        return Ok(None);
    };
    let link = source.link_info(name)?;

    Ok(Some(InterfaceInfo {
        if_index,
        running: flags.is_running(),
        autoconf_privacy: autoconf.privacy,
        hw_address: link.hw_address,
        link_local: link.link_local,
    }))
}

/// One entry of the host address list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfAddr {
    Link {
        name: String,
        hatype: u16,
        addr: Vec<u8>,
    },
    Inet6 {
        name: String,
        addr: SocketAddrV6,
    },
}

impl IfAddr {
    fn name(&self) -> &str {
        match self {
            IfAddr::Link { name, .. } | IfAddr::Inet6 { name, .. } => name,
        }
    }
}

fn is_link_local(addr: &Ipv6Addr) -> bool {
    let octets = addr.octets();
    octets[0] == 0xfe && octets[1] & 0xc0 == 0x80
}

/// Move a scope embedded in bytes 2..4 of a link-local address into
/// `scope_id`, clearing it from the address.
pub fn normalize_link_local(addr: SocketAddrV6) -> SocketAddrV6 {
    let mut octets = addr.ip().octets();
    let embedded = u16::from_be_bytes([octets[2], octets[3]]);
    if embedded == 0 {
        return addr;
    }
    octets[2] = 0;
    octets[3] = 0;
    SocketAddrV6::new(
        Ipv6Addr::from(octets),
        addr.port(),
        addr.flowinfo(),
        u32::from(embedded),
    )
}

/// Pick the Ethernet address and first link-local address for `name`.
pub fn select_link_info(name: &str, entries: &[IfAddr]) -> LinkInfo {
    let mut info = LinkInfo::default();
    let mut have_mac = false;
    let mut have_ll = false;

    for entry in entries.iter().filter(|e| e.name() == name) {
        match entry {
            IfAddr::Link { hatype, addr, .. }
                if !have_mac && *hatype == libc::ARPHRD_ETHER && addr.len() == 6 =>
            {
                info.hw_address.copy_from_slice(addr);
                have_mac = true;
            }
            IfAddr::Inet6 { addr, .. } if !have_ll && is_link_local(addr.ip()) => {
                info.link_local = normalize_link_local(*addr);
                have_ll = true;
            }
            _ => {}
        }
    }
    info
}

/// The real host, queried through ioctl, sysctl and `getifaddrs`.
#[derive(Debug)]
pub struct HostInterfaces {
    ioctl: Socket,
    sysctl: SysctlDir,
}

#[repr(C)]
struct IfReqFlags {
    name: [libc::c_char; libc::IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

impl HostInterfaces {
    /// Open the ioctl socket and the sysctl tree at `sysctl_root`.
    ///
    /// Both stay usable after the process drops privileges and chroots.
    pub fn open(sysctl_root: impl AsRef<Path>) -> Result<Self> {
        let ioctl = Socket::new(Domain::IPV6, Type::DGRAM, None).map_err(|source| {
            NetError::Socket {
                what: "interface ioctl",
                source,
            }
        })?;
        Ok(Self {
            ioctl,
            sysctl: SysctlDir::open(sysctl_root)?,
        })
    }

    fn addresses(&self) -> Result<Vec<IfAddr>> {
        let mut head: *mut libc::ifaddrs = ptr::null_mut();
        // SAFETY: `head` is a valid out pointer; the list is freed below.
        if unsafe { libc::getifaddrs(&mut head) } != 0 {
            return Err(NetError::AddressList(io::Error::last_os_error()));
        }

        let mut out = Vec::new();
        let mut cur = head;
        while !cur.is_null() {
            // SAFETY: `cur` is a node of the list returned by getifaddrs,
            // which stays alive until freeifaddrs.
            let ifa = unsafe { &*cur };
            cur = ifa.ifa_next;
            if ifa.ifa_addr.is_null() || ifa.ifa_name.is_null() {
                continue;
            }
            // SAFETY: ifa_name is a NUL terminated string owned by the list.
            let name = unsafe { CStr::from_ptr(ifa.ifa_name) }
                .to_string_lossy()
                .into_owned();
            // SAFETY: ifa_addr is non-null and points at a sockaddr whose
            // concrete type is given by sa_family.
            match i32::from(unsafe { (*ifa.ifa_addr).sa_family }) {
                libc::AF_PACKET => {
                    let sll: libc::sockaddr_ll =
                        unsafe { ptr::read_unaligned(ifa.ifa_addr.cast()) };
                    let len = usize::from(sll.sll_halen).min(sll.sll_addr.len());
                    out.push(IfAddr::Link {
                        name,
                        hatype: sll.sll_hatype,
                        addr: sll.sll_addr[..len].to_vec(),
                    });
                }
                libc::AF_INET6 => {
                    let sin6: libc::sockaddr_in6 =
                        unsafe { ptr::read_unaligned(ifa.ifa_addr.cast()) };
                    out.push(IfAddr::Inet6 {
                        name,
                        addr: sockaddr_to_v6(&sin6),
                    });
                }
                _ => {}
            }
        }

        // SAFETY: `head` came from getifaddrs and is freed exactly once.
        unsafe { libc::freeifaddrs(head) };
        Ok(out)
    }
}

impl InterfaceSource for HostInterfaces {
    fn flags(&self, name: &str) -> Result<Option<InterfaceFlags>> {
        validate_name(name)?;
        let mut req = IfReqFlags {
            name: [0; libc::IFNAMSIZ],
            flags: 0,
            _pad: [0; 22],
        };
        for (dst, src) in req.name.iter_mut().zip(name.bytes()) {
            *dst = src as libc::c_char;
        }

        // SAFETY: `req` is laid out like `struct ifreq` for SIOCGIFFLAGS and
        // outlives the call.
        let rc = unsafe {
            libc::ioctl(
                self.ioctl.as_raw_fd(),
                libc::SIOCGIFFLAGS as _,
                &mut req as *mut IfReqFlags,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::ENXIO) | Some(libc::ENODEV) => Ok(None),
                _ => Err(NetError::InterfaceQuery {
                    op: "SIOCGIFFLAGS",
                    name: name.to_string(),
                    source: err,
                }),
            };
        }
        Ok(Some(InterfaceFlags::from_bits(libc::c_int::from(req.flags))))
    }

    fn autoconf_flags(&self, name: &str) -> Result<Option<AutoconfFlags>> {
        let Some(autoconf) = self.sysctl.read_int(name, "autoconf")? else {
            return Ok(None);
        };
        let Some(accept_ra) = self.sysctl.read_int(name, "accept_ra")? else {
            return Ok(None);
        };
        let tempaddr = self.sysctl.read_int(name, "use_tempaddr")?.unwrap_or(0);
        Ok(Some(AutoconfFlags {
            autoconf6: autoconf != 0 && accept_ra != 0,
            privacy: tempaddr > 0,
        }))
    }

    fn link_info(&self, name: &str) -> Result<LinkInfo> {
        Ok(select_link_info(name, &self.addresses()?))
    }

    fn index_to_name(&self, index: u32) -> Option<String> {
        let mut buf = [0 as libc::c_char; libc::IFNAMSIZ];
        // SAFETY: `buf` has IFNAMSIZ bytes as if_indextoname requires.
        let name = unsafe { libc::if_indextoname(index, buf.as_mut_ptr()) };
        if name.is_null() {
            return None;
        }
        // SAFETY: on success the buffer holds a NUL terminated name.
        Some(unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().into_owned())
    }

    fn interfaces(&self) -> Result<Vec<(u32, String)>> {
        let mut by_index = BTreeMap::new();
        for entry in self.addresses()? {
            let name = entry.name().to_string();
            if by_index.values().any(|n: &String| *n == name) {
                continue;
            }
            let Ok(cname) = CString::new(name.as_str()) else {
                continue;
            };
            // SAFETY: `cname` is NUL terminated.
            let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
            if index != 0 {
                by_index.insert(index, name);
            }
        }
        Ok(by_index.into_iter().collect())
    }
}

// Same size as `struct ifreq`.
const _: () = assert!(mem::size_of::<IfReqFlags>() == 40);

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct Fake {
        autoconf: Option<AutoconfFlags>,
        flags: Option<InterfaceFlags>,
        link_queries: Cell<usize>,
    }

    impl InterfaceSource for Fake {
        fn flags(&self, _: &str) -> Result<Option<InterfaceFlags>> {
            Ok(self.flags)
        }
        fn autoconf_flags(&self, _: &str) -> Result<Option<AutoconfFlags>> {
            Ok(self.autoconf)
        }
        fn link_info(&self, _: &str) -> Result<LinkInfo> {
            self.link_queries.set(self.link_queries.get() + 1);
            Ok(LinkInfo {
                hw_address: [2, 0, 0, 0, 0, 1],
                link_local: SocketAddrV6::new("fe80::1".parse().unwrap(), 0, 0, 4),
            })
        }
        fn index_to_name(&self, _: u32) -> Option<String> {
            Some("eth0".into())
        }
        fn interfaces(&self) -> Result<Vec<(u32, String)>> {
            Ok(vec![(4, "eth0".into())])
        }
    }

    fn fake(autoconf6: bool, up: bool) -> Fake {
        Fake {
            autoconf: Some(AutoconfFlags {
                autoconf6,
                privacy: true,
            }),
            flags: Some(InterfaceFlags { up, running: true }),
            link_queries: Cell::new(0),
        }
    }

    #[test]
    fn eligible_interface_is_reported() {
        let info = evaluate(&fake(true, true), 4, "eth0").unwrap().unwrap();
        assert_eq!(info.if_index, 4);
        assert!(info.running);
        assert!(info.autoconf_privacy);
        assert_eq!(info.hw_address, [2, 0, 0, 0, 0, 1]);
        assert_eq!(info.link_local.scope_id(), 4);
    }

    #[test]
    fn down_interface_reports_not_running() {
        let info = evaluate(&fake(true, false), 4, "eth0").unwrap().unwrap();
        assert!(!info.running);
    }

    #[test]
    fn no_autoconf_means_no_report() {
        for up in [true, false] {
            let source = fake(false, up);
            assert_eq!(evaluate(&source, 4, "eth0").unwrap(), None);
            assert_eq!(source.link_queries.get(), 0);
        }
    }

    #[test]
    fn vanished_interface_means_no_report() {
        let mut source = fake(true, true);
        source.autoconf = None;
        assert_eq!(evaluate(&source, 4, "eth0").unwrap(), None);

        let mut source = fake(true, true);
        source.flags = None;
        assert_eq!(evaluate(&source, 4, "eth0").unwrap(), None);
    }

    #[test]
    fn embedded_scope_moves_to_scope_id() {
        let kame = SocketAddrV6::new("fe80:3::1".parse().unwrap(), 0, 0, 0);
        let fixed = normalize_link_local(kame);
        assert_eq!(*fixed.ip(), "fe80::1".parse::<Ipv6Addr>().unwrap());
        assert_eq!(fixed.scope_id(), 3);

        let plain = SocketAddrV6::new("fe80::1".parse().unwrap(), 0, 0, 7);
        assert_eq!(normalize_link_local(plain), plain);
    }

    #[test]
    fn selects_ethernet_mac_and_first_link_local() {
        let entries = vec![
            IfAddr::Inet6 {
                name: "eth0".into(),
                addr: SocketAddrV6::new("2001:db8::5".parse().unwrap(), 0, 0, 0),
            },
            IfAddr::Link {
                name: "lo".into(),
                hatype: libc::ARPHRD_ETHER,
                addr: vec![9; 6],
            },
            IfAddr::Link {
                name: "eth0".into(),
                hatype: libc::ARPHRD_ETHER,
                addr: vec![0x52, 0x54, 0, 0x12, 0x34, 0x56],
            },
            IfAddr::Inet6 {
                name: "eth0".into(),
                addr: SocketAddrV6::new("fe80::5054:ff:fe12:3456".parse().unwrap(), 0, 0, 2),
            },
            IfAddr::Inet6 {
                name: "eth0".into(),
                addr: SocketAddrV6::new("fe80::2".parse().unwrap(), 0, 0, 2),
            },
        ];

        let info = select_link_info("eth0", &entries);
        assert_eq!(info.hw_address, [0x52, 0x54, 0, 0x12, 0x34, 0x56]);
        assert_eq!(
            *info.link_local.ip(),
            "fe80::5054:ff:fe12:3456".parse::<Ipv6Addr>().unwrap()
        );
        assert_eq!(info.link_local.scope_id(), 2);
    }

    #[test]
    fn non_ethernet_link_has_zero_mac() {
        let entries = vec![IfAddr::Link {
            name: "wg0".into(),
            hatype: 65534,
            addr: vec![],
        }];
        assert_eq!(select_link_info("wg0", &entries), LinkInfo::default());
    }

    #[test]
    fn flag_bits_decode() {
        let flags = InterfaceFlags::from_bits(libc::IFF_UP | libc::IFF_RUNNING);
        assert!(flags.is_running());
        assert!(!InterfaceFlags::from_bits(libc::IFF_UP).is_running());
    }
}
