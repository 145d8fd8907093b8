//! Message framing for the ndfront IPC links.
//!
//! Every link (parent, engine, control clients) carries the same frame:
//! a 16-byte little-endian header `{type, length, peer_id, pid}` followed
//! by `length` payload bytes. This crate provides:
//! - [`codec`]: header encode/decode with validation at the frame boundary
//! - [`message`]: typed message bodies decoded once from a [`Frame`]
//! - [`endpoint`]: a non-blocking endpoint with read reassembly, a write
//!   queue and descriptor passing

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod kind;
pub mod message;

pub use codec::{decode_frame, encode_frame, Frame, HEADER_SIZE, MAX_MESSAGE_SIZE, MAX_PAYLOAD};
pub use endpoint::{IpcEndpoint, LinkStatus, Readable};
pub use error::{FrameError, Result};
pub use kind::MessageType;
pub use message::{
    InterfaceInfo, IpcMessage, Message, RaPacket, RelayKind, RouterAdvertisement,
    INTERFACE_INFO_LEN, RA_PACKET_CAPACITY,
};
