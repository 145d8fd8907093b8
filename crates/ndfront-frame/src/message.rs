//! Typed IPC messages.
//!
//! A [`Frame`] is decoded into a [`Message`] exactly once, at the frame
//! boundary; dispatchers match on the variants and never see raw tags.

use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::fd::OwnedFd;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::Frame;
use crate::error::{FrameError, Result};
use crate::kind::MessageType;

/// Capacity of the router advertisement packet buffer.
pub const RA_PACKET_CAPACITY: usize = 1500;

/// Wire size of an IPv6 socket address: addr + port + flowinfo + scope.
const SOCKADDR_V6_LEN: usize = 16 + 2 + 4 + 4;

/// Wire size of an encoded [`InterfaceInfo`].
pub const INTERFACE_INFO_LEN: usize = 4 + 1 + 1 + 6 + SOCKADDR_V6_LEN;

/// Wire size of the fixed part of an encoded [`RouterAdvertisement`].
const RA_HEADER_LEN: usize = 4 + SOCKADDR_V6_LEN + 4;

/// Interface state reported to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub if_index: u32,
    /// Both administratively up and operationally running.
    pub running: bool,
    /// Temporary (privacy) addresses should be generated.
    pub autoconf_privacy: bool,
    /// Ethernet address; all zero when the interface has none.
    pub hw_address: [u8; 6],
    /// First link-local address with its scope in `scope_id`;
    /// unspecified when the interface has none.
    pub link_local: SocketAddrV6,
}

impl InterfaceInfo {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.if_index);
        dst.put_u8(self.running as u8);
        dst.put_u8(self.autoconf_privacy as u8);
        dst.put_slice(&self.hw_address);
        put_sockaddr_v6(dst, &self.link_local);
    }

    fn decode(mut src: Bytes) -> Result<Self> {
        expect_len("UPDATE_IF", &src, INTERFACE_INFO_LEN)?;
        let if_index = src.get_u32_le();
        let running = src.get_u8() != 0;
        let autoconf_privacy = src.get_u8() != 0;
        let mut hw_address = [0u8; 6];
        src.copy_to_slice(&mut hw_address);
        let link_local = get_sockaddr_v6(&mut src);
        Ok(Self {
            if_index,
            running,
            autoconf_privacy,
            hw_address,
            link_local,
        })
    }
}

/// Raw router advertisement bytes, never longer than [`RA_PACKET_CAPACITY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaPacket(Bytes);

impl RaPacket {
    /// Wrap packet bytes, rejecting anything over capacity.
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() > RA_PACKET_CAPACITY {
            return Err(FrameError::PacketTooLarge {
                size: bytes.len(),
                capacity: RA_PACKET_CAPACITY,
            });
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A received router advertisement, forwarded to the engine unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterAdvertisement {
    /// Interface the datagram arrived on.
    pub if_index: u32,
    pub source: SocketAddrV6,
    pub packet: RaPacket,
}

impl RouterAdvertisement {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.if_index);
        put_sockaddr_v6(dst, &self.source);
        dst.put_u32_le(self.packet.len() as u32);
        dst.put_slice(self.packet.as_bytes());
    }

    fn decode(mut src: Bytes) -> Result<Self> {
        if src.len() < RA_HEADER_LEN {
            return Err(FrameError::PayloadLength {
                kind: "RA",
                expected: RA_HEADER_LEN,
                actual: src.len(),
            });
        }
        let if_index = src.get_u32_le();
        let source = get_sockaddr_v6(&mut src);
        let len = src.get_u32_le() as usize;
        if len > RA_PACKET_CAPACITY {
            return Err(FrameError::PacketTooLarge {
                size: len,
                capacity: RA_PACKET_CAPACITY,
            });
        }
        expect_len("RA", &src, len)?;
        Ok(Self {
            if_index,
            source,
            packet: RaPacket::new(src)?,
        })
    }
}

/// Control replies the frontend relays without looking inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayKind {
    ShowInterfaceInfo,
    ShowInterfaceInfoRa,
    ShowInterfaceInfoRaPrefix,
    ShowInterfaceInfoRaRdns,
    ShowInterfaceInfoRaDnssl,
    End,
}

impl RelayKind {
    pub fn message_type(self) -> MessageType {
        match self {
            RelayKind::ShowInterfaceInfo => MessageType::CtlShowInterfaceInfo,
            RelayKind::ShowInterfaceInfoRa => MessageType::CtlShowInterfaceInfoRa,
            RelayKind::ShowInterfaceInfoRaPrefix => MessageType::CtlShowInterfaceInfoRaPrefix,
            RelayKind::ShowInterfaceInfoRaRdns => MessageType::CtlShowInterfaceInfoRaRdns,
            RelayKind::ShowInterfaceInfoRaDnssl => MessageType::CtlShowInterfaceInfoRaDnssl,
            RelayKind::End => MessageType::CtlEnd,
        }
    }

    fn from_message_type(kind: MessageType) -> Option<Self> {
        match kind {
            MessageType::CtlShowInterfaceInfo => Some(RelayKind::ShowInterfaceInfo),
            MessageType::CtlShowInterfaceInfoRa => Some(RelayKind::ShowInterfaceInfoRa),
            MessageType::CtlShowInterfaceInfoRaPrefix => Some(RelayKind::ShowInterfaceInfoRaPrefix),
            MessageType::CtlShowInterfaceInfoRaRdns => Some(RelayKind::ShowInterfaceInfoRaRdns),
            MessageType::CtlShowInterfaceInfoRaDnssl => Some(RelayKind::ShowInterfaceInfoRaDnssl),
            MessageType::CtlEnd => Some(RelayKind::End),
            _ => None,
        }
    }
}

/// Message bodies, one variant per catalog entry (relay kinds share one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Engine-link handoff; the descriptor travels in [`IpcMessage::fd`].
    SocketIpc,
    Startup,
    CtlLogVerbose(i32),
    /// Opaque control payload passed between engine and control clients.
    Relay(RelayKind, Bytes),
    CtlSendSolicitation {
        if_index: u32,
    },
    UpdateInterface(InterfaceInfo),
    RemoveInterface {
        if_index: u32,
    },
    RouterAdvertisement(RouterAdvertisement),
}

impl Message {
    pub fn kind(&self) -> MessageType {
        match self {
            Message::SocketIpc => MessageType::SocketIpc,
            Message::Startup => MessageType::Startup,
            Message::CtlLogVerbose(_) => MessageType::CtlLogVerbose,
            Message::Relay(kind, _) => kind.message_type(),
            Message::CtlSendSolicitation { .. } => MessageType::CtlSendSolicitation,
            Message::UpdateInterface(_) => MessageType::UpdateInterface,
            Message::RemoveInterface { .. } => MessageType::RemoveInterface,
            Message::RouterAdvertisement(_) => MessageType::RouterAdvertisement,
        }
    }

    /// Append this message's payload (no header) to `dst`.
    pub fn encode_payload(&self, dst: &mut BytesMut) {
        match self {
            Message::SocketIpc | Message::Startup => {}
            Message::CtlLogVerbose(level) => dst.put_i32_le(*level),
            Message::Relay(_, payload) => dst.put_slice(payload),
            Message::CtlSendSolicitation { if_index } | Message::RemoveInterface { if_index } => {
                dst.put_u32_le(*if_index)
            }
            Message::UpdateInterface(info) => info.encode(dst),
            Message::RouterAdvertisement(ra) => ra.encode(dst),
        }
    }

    /// Interpret a payload of the given type.
    pub fn decode(kind: MessageType, mut payload: Bytes) -> Result<Self> {
        match kind {
            MessageType::SocketIpc => {
                expect_len(kind.name(), &payload, 0)?;
                Ok(Message::SocketIpc)
            }
            MessageType::Startup => {
                expect_len(kind.name(), &payload, 0)?;
                Ok(Message::Startup)
            }
            MessageType::CtlLogVerbose => {
                expect_len(kind.name(), &payload, 4)?;
                Ok(Message::CtlLogVerbose(payload.get_i32_le()))
            }
            MessageType::CtlSendSolicitation => {
                expect_len(kind.name(), &payload, 4)?;
                Ok(Message::CtlSendSolicitation {
                    if_index: payload.get_u32_le(),
                })
            }
            MessageType::RemoveInterface => {
                expect_len(kind.name(), &payload, 4)?;
                Ok(Message::RemoveInterface {
                    if_index: payload.get_u32_le(),
                })
            }
            MessageType::UpdateInterface => {
                Ok(Message::UpdateInterface(InterfaceInfo::decode(payload)?))
            }
            MessageType::RouterAdvertisement => Ok(Message::RouterAdvertisement(
                RouterAdvertisement::decode(payload)?,
            )),
            relay => RelayKind::from_message_type(relay)
                .map(|kind| Message::Relay(kind, payload))
                .ok_or(FrameError::UnknownType(relay as u32)),
        }
    }
}

/// One framed unit of the IPC protocol.
#[derive(Debug)]
pub struct IpcMessage {
    pub peer_id: u32,
    pub pid: i32,
    pub body: Message,
    /// Descriptor passed alongside the message, if any.
    pub fd: Option<OwnedFd>,
}

impl IpcMessage {
    pub fn new(body: Message) -> Self {
        Self {
            peer_id: 0,
            pid: 0,
            body,
            fd: None,
        }
    }

    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_peer_id(mut self, peer_id: u32) -> Self {
        self.peer_id = peer_id;
        self
    }

    pub fn with_fd(mut self, fd: OwnedFd) -> Self {
        self.fd = Some(fd);
        self
    }

    pub fn kind(&self) -> MessageType {
        self.body.kind()
    }

    /// Decode a frame's payload. Descriptors are attached by the endpoint.
    pub fn from_frame(frame: Frame) -> Result<Self> {
        Ok(Self {
            peer_id: frame.peer_id,
            pid: frame.pid,
            body: Message::decode(frame.kind, frame.payload)?,
            fd: None,
        })
    }
}

fn expect_len(kind: &'static str, payload: &Bytes, expected: usize) -> Result<()> {
    if payload.len() != expected {
        return Err(FrameError::PayloadLength {
            kind,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn put_sockaddr_v6(dst: &mut BytesMut, addr: &SocketAddrV6) {
    dst.put_slice(&addr.ip().octets());
    dst.put_u16_le(addr.port());
    dst.put_u32_le(addr.flowinfo());
    dst.put_u32_le(addr.scope_id());
}

fn get_sockaddr_v6(src: &mut Bytes) -> SocketAddrV6 {
    let mut octets = [0u8; 16];
    src.copy_to_slice(&mut octets);
    let port = src.get_u16_le();
    let flowinfo = src.get_u32_le();
    let scope_id = src.get_u32_le();
    SocketAddrV6::new(Ipv6Addr::from(octets), port, flowinfo, scope_id)
}
