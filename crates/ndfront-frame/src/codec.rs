use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::kind::MessageType;

/// Frame header: type (4) + length (4) + peer id (4) + pid (4) = 16 bytes.
pub const HEADER_SIZE: usize = 16;

/// Largest message accepted on any link, header included.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Largest payload accepted on any link.
pub const MAX_PAYLOAD: usize = MAX_MESSAGE_SIZE - HEADER_SIZE;

/// A decoded frame whose payload has not been interpreted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageType,
    pub peer_id: u32,
    pub pid: i32,
    pub payload: Bytes,
}

impl Frame {
    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format (all fields little-endian):
/// ```text
/// ┌────────────┬────────────┬────────────┬────────────┬──────────────────┐
/// │ Type (4B)  │ Length(4B) │ PeerId(4B) │ Pid (4B)   │ Payload          │
/// │            │ of payload │            │ signed     │ (Length bytes)   │
/// └────────────┴────────────┴────────────┴────────────┴──────────────────┘
/// ```
pub fn encode_frame(
    kind: MessageType,
    peer_id: u32,
    pid: i32,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32_le(kind as u32);
    dst.put_u32_le(payload.len() as u32);
    dst.put_u32_le(peer_id);
    dst.put_i32_le(pid);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame from a reassembly buffer.
///
/// Returns `Ok(None)` if the buffer doesn't hold a complete frame yet.
/// The header is validated as soon as it is complete, so a bad type or
/// length is reported without waiting for the payload.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = &src[..HEADER_SIZE];
    let tag = header.get_u32_le();
    let payload_len = header.get_u32_le() as usize;
    let peer_id = header.get_u32_le();
    let pid = header.get_i32_le();

    let kind = MessageType::try_from(tag)?;
    if payload_len > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame {
        kind,
        peer_id,
        pid,
        payload,
    }))
}
