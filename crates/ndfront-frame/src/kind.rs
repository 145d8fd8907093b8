//! Message type catalog.
//!
//! Every frame header starts with one of these tags. Tags outside the
//! catalog are rejected at the frame boundary.

use crate::error::FrameError;

/// Wire tag of an IPC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Parent hands the frontend its end of the engine link.
    SocketIpc = 1,
    /// Parent tells the frontend to arm its sockets and enumerate interfaces.
    Startup = 2,
    /// Control client changes log verbosity.
    CtlLogVerbose = 3,
    CtlShowInterfaceInfo = 4,
    CtlShowInterfaceInfoRa = 5,
    CtlShowInterfaceInfoRaPrefix = 6,
    CtlShowInterfaceInfoRaRdns = 7,
    CtlShowInterfaceInfoRaDnssl = 8,
    /// Terminates a control reply sequence.
    CtlEnd = 9,
    /// Transmit a router solicitation on one interface.
    CtlSendSolicitation = 10,
    UpdateInterface = 11,
    RemoveInterface = 12,
    RouterAdvertisement = 13,
}

impl MessageType {
    /// Every tag in the catalog, in wire order.
    pub const ALL: [MessageType; 13] = [
        MessageType::SocketIpc,
        MessageType::Startup,
        MessageType::CtlLogVerbose,
        MessageType::CtlShowInterfaceInfo,
        MessageType::CtlShowInterfaceInfoRa,
        MessageType::CtlShowInterfaceInfoRaPrefix,
        MessageType::CtlShowInterfaceInfoRaRdns,
        MessageType::CtlShowInterfaceInfoRaDnssl,
        MessageType::CtlEnd,
        MessageType::CtlSendSolicitation,
        MessageType::UpdateInterface,
        MessageType::RemoveInterface,
        MessageType::RouterAdvertisement,
    ];

    /// Human-readable name for logs.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::SocketIpc => "SOCKET_IPC",
            MessageType::Startup => "STARTUP",
            MessageType::CtlLogVerbose => "CTL_LOG_VERBOSE",
            MessageType::CtlShowInterfaceInfo => "CTL_SHOW_INTERFACE_INFO",
            MessageType::CtlShowInterfaceInfoRa => "CTL_SHOW_INTERFACE_INFO_RA",
            MessageType::CtlShowInterfaceInfoRaPrefix => "CTL_SHOW_INTERFACE_INFO_RA_PREFIX",
            MessageType::CtlShowInterfaceInfoRaRdns => "CTL_SHOW_INTERFACE_INFO_RA_RDNS",
            MessageType::CtlShowInterfaceInfoRaDnssl => "CTL_SHOW_INTERFACE_INFO_RA_DNSSL",
            MessageType::CtlEnd => "CTL_END",
            MessageType::CtlSendSolicitation => "CTL_SEND_SOLICITATION",
            MessageType::UpdateInterface => "UPDATE_IF",
            MessageType::RemoveInterface => "REMOVE_IF",
            MessageType::RouterAdvertisement => "RA",
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = FrameError;

    fn try_from(tag: u32) -> Result<Self, Self::Error> {
        MessageType::ALL
            .iter()
            .copied()
            .find(|kind| *kind as u32 == tag)
            .ok_or(FrameError::UnknownType(tag))
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
