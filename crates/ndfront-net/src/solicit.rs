use std::net::{Ipv6Addr, SocketAddrV6};

use tracing::{debug, warn};

use crate::ancillary::{Ancillary, ControlBuffer, PacketInfo, NEIGHBOR_DISCOVERY_HOP_LIMIT};
use crate::icmp6::{Transmit, ND_ROUTER_SOLICIT};

/// All-routers link-local multicast group.
pub const ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

/// Size of a router solicitation without options.
pub const SOLICITATION_LEN: usize = 8;

/// Pre-built router solicitation.
///
/// Type 133, code 0, reserved zero; the checksum field is left for the
/// kernel to fill. Only the destination scope and the pktinfo interface
/// change between sends.
#[derive(Debug)]
pub struct Solicitation {
    packet: [u8; SOLICITATION_LEN],
    destination: SocketAddrV6,
    control: ControlBuffer,
}

impl Solicitation {
    pub fn new() -> Self {
        let mut packet = [0u8; SOLICITATION_LEN];
        packet[0] = ND_ROUTER_SOLICIT;

        Self {
            packet,
            destination: SocketAddrV6::new(ALL_ROUTERS, 0, 0, 0),
            control: ControlBuffer::encode(&Ancillary {
                packet_info: Some(PacketInfo {
                    addr: Ipv6Addr::UNSPECIFIED,
                    if_index: 0,
                }),
                hop_limit: Some(NEIGHBOR_DISCOVERY_HOP_LIMIT),
            }),
        }
    }

    /// Retarget the template at `if_index`.
    pub fn prepare(&mut self, if_index: u32) -> (&[u8], &SocketAddrV6, &ControlBuffer) {
        self.destination.set_scope_id(if_index);
        self.control.set_packet_info_interface(if_index);
        (&self.packet, &self.destination, &self.control)
    }

    /// Send a solicitation out of `if_index`.
    ///
    /// Failures and short writes are logged and not retried; the engine
    /// asks again on its own schedule.
    pub fn send<T: Transmit + ?Sized>(&mut self, socket: &T, if_index: u32) {
        debug!(if_index, "sending router solicitation");
        let (packet, destination, control) = self.prepare(if_index);
        match socket.transmit(packet, destination, control) {
            Ok(SOLICITATION_LEN) => {}
            Ok(sent) => warn!(if_index, sent, "short write sending router solicitation"),
            Err(err) => warn!(if_index, error = %err, "failed to send router solicitation"),
        }
    }
}

impl Default for Solicitation {
    fn default() -> Self {
        Self::new()
    }
}
