use std::fmt;
use std::io;
use std::net::SocketAddrV6;

use bytes::Bytes;
use ndfront_frame::{RaPacket, RouterAdvertisement, RA_PACKET_CAPACITY};
use tracing::{trace, warn};

use crate::ancillary::{ControlBuffer, NEIGHBOR_DISCOVERY_HOP_LIMIT};
use crate::icmp6::{Icmp6Socket, Received};

/// Why a received datagram was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// No pktinfo entry, or it named interface 0.
    MissingInterface,
    MissingHopLimit,
    /// The datagram was routed to us; it cannot be from an on-link router.
    HopLimit(i32),
    /// The datagram does not fit the packet buffer.
    Oversized(usize),
}

impl fmt::Display for Discard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discard::MissingInterface => f.write_str("failed to get receiving interface"),
            Discard::MissingHopLimit => f.write_str("failed to get receiving hop limit"),
            Discard::HopLimit(hops) => write!(f, "invalid hop limit {hops}"),
            Discard::Oversized(len) => write!(f, "invalid size {len}"),
        }
    }
}

/// Decide whether a datagram may be forwarded to the engine.
///
/// `payload` holds the bytes that fit the receive buffer.
pub fn validate_datagram(received: &Received, payload: &[u8]) -> Result<RouterAdvertisement, Discard> {
    let if_index = match received.ancillary.packet_info {
        Some(info) if info.if_index != 0 => info.if_index,
        _ => return Err(Discard::MissingInterface),
    };
    let hops = received.ancillary.hop_limit.ok_or(Discard::MissingHopLimit)?;
    if hops != NEIGHBOR_DISCOVERY_HOP_LIMIT {
        return Err(Discard::HopLimit(hops));
    }
    if received.truncated || received.len > RA_PACKET_CAPACITY || payload.len() < received.len {
        return Err(Discard::Oversized(received.len));
    }

    let packet = RaPacket::new(Bytes::copy_from_slice(&payload[..received.len]))
        .map_err(|_| Discard::Oversized(received.len))?;
    Ok(RouterAdvertisement {
        if_index,
        source: received.source,
        packet,
    })
}

/// Reads router advertisements off the ICMPv6 socket.
#[derive(Debug)]
pub struct AdvertReceiver {
    buf: Box<[u8; RA_PACKET_CAPACITY]>,
    control: ControlBuffer,
}

impl AdvertReceiver {
    pub fn new() -> Self {
        Self {
            buf: Box::new([0u8; RA_PACKET_CAPACITY]),
            control: ControlBuffer::for_receive(),
        }
    }

    /// Drain the socket, returning every advertisement that passed
    /// validation. Rejected datagrams are logged and dropped.
    pub fn receive(&mut self, socket: &Icmp6Socket) -> Vec<RouterAdvertisement> {
        let mut accepted = Vec::new();
        loop {
            let received = match socket.recv(&mut self.buf[..], &mut self.control) {
                Ok(received) => received,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(error = %err, "recvmsg on ICMPv6 socket failed");
                    break;
                }
            };
            let payload = &self.buf[..received.len.min(RA_PACKET_CAPACITY)];
            if let Some(ra) = self.accept(&received, payload) {
                accepted.push(ra);
            }
        }
        accepted
    }

    fn accept(&self, received: &Received, payload: &[u8]) -> Option<RouterAdvertisement> {
        match validate_datagram(received, payload) {
            Ok(ra) => {
                trace!(if_index = ra.if_index, from = %ra.source.ip(), len = ra.packet.len(), "router advertisement");
                Some(ra)
            }
            Err(reason) => {
                log_discard(received, reason);
                None
            }
        }
    }
}

impl Default for AdvertReceiver {
    fn default() -> Self {
        Self::new()
    }
}

fn log_discard(received: &Received, reason: Discard) {
    let from: SocketAddrV6 = received.source;
    let if_index = received.ancillary.packet_info.map(|p| p.if_index);
    match reason {
        Discard::HopLimit(_) => {
            warn!(from = %from.ip(), ?if_index, "{reason}: possibly spoofed router advertisement")
        }
        _ => warn!(from = %from.ip(), ?if_index, "dropping router advertisement: {reason}"),
    }
}
