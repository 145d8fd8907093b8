/// Errors that can occur during message encoding/decoding.
///
/// Everything except [`FrameError::Io`] is a protocol violation: the peer
/// sent bytes that cannot have come from a well-behaved process.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header names a message type outside the catalog.
    #[error("unknown message type {0}")]
    UnknownType(u32),

    /// The payload exceeds the maximum message size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A fixed-layout payload has the wrong length.
    #[error("{kind} payload has {actual} bytes, expected {expected}")]
    PayloadLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A router advertisement payload is larger than the packet buffer.
    #[error("router advertisement of {size} bytes exceeds {capacity} byte buffer")]
    PacketTooLarge { size: usize, capacity: usize },

    /// An I/O error occurred while reading or writing messages.
    #[error("message I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ndfront_transport::TransportError),
}

impl FrameError {
    /// Whether this error means the peer broke the wire protocol.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, FrameError::Io(_) | FrameError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
