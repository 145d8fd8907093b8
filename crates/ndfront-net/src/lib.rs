//! Raw IPv6 network I/O for the ndfront frontend (Linux).
//!
//! - [`ancillary`]: typed `IPV6_PKTINFO` / `IPV6_HOPLIMIT` control messages
//! - [`icmp6`]: the raw ICMPv6 socket
//! - [`solicit`]: router solicitations
//! - [`advert`]: receiving and validating router advertisements
//! - [`iface`]: interface flags, autoconf eligibility and link addresses
//! - [`route`]: netlink link/address notifications

pub mod advert;
pub mod ancillary;
pub mod error;
pub mod icmp6;
pub mod iface;
pub mod route;
pub mod solicit;
pub mod sysctl;

pub use advert::{validate_datagram, AdvertReceiver, Discard};
pub use ancillary::{Ancillary, ControlBuffer, PacketInfo};
pub use error::{NetError, Result};
pub use icmp6::{Icmp6Socket, Received, Transmit};
pub use iface::{
    evaluate, AutoconfFlags, HostInterfaces, InterfaceFlags, InterfaceSource, LinkInfo,
};
pub use route::{handle_route_message, parse_route_datagram, InterfaceEvent, RouteMessage, RouteSocket};
pub use solicit::{Solicitation, ALL_ROUTERS};
pub use sysctl::{SysctlDir, DEFAULT_SYSCTL_ROOT};
