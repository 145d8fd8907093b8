use std::io;

use ndfront_frame::FrameError;
use ndfront_net::NetError;
use ndfront_transport::TransportError;

/// Fatal frontend errors. Any of these ends the process.
#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    /// The parent or engine broke the wire protocol, or its link failed.
    #[error("{link} link: {source}")]
    Link {
        link: &'static str,
        source: FrameError,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error("poll failed: {0}")]
    Poll(io::Error),

    #[error("{op} failed: {source}")]
    Privilege {
        op: &'static str,
        source: io::Error,
    },

    #[error("parent link descriptor {0} is not valid")]
    InvalidParentFd(i32),

    #[error("unknown user {0:?}")]
    UnknownUser(String),

    #[error("signal handler setup failed: {0}")]
    Signal(String),
}

impl FrontendError {
    /// Whether a peer sent bytes no well-behaved process would send.
    pub fn is_protocol_violation(&self) -> bool {
        match self {
            FrontendError::Link { source, .. } | FrontendError::Frame(source) => {
                source.is_protocol_violation()
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrontendError>;
