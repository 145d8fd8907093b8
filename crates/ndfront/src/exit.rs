use std::fmt;
use std::io;

use ndfront::FrontendError;
use ndfront_frame::FrameError;
use ndfront_net::NetError;
use ndfront_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Transport(err) => transport_error(context, err),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn net_error(context: &str, err: NetError) -> CliError {
    match err {
        NetError::Socket { source, .. }
        | NetError::SocketOption { source, .. }
        | NetError::Sysctl { source, .. }
        | NetError::AddressList(source) => io_error(context, source),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn frontend_error(context: &str, err: FrontendError) -> CliError {
    match err {
        FrontendError::Link { link, source } if !source.is_protocol_violation() => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {link} link: {source}"))
        }
        FrontendError::Link { link, source } => {
            CliError::new(DATA_INVALID, format!("{context}: {link} link: {source}"))
        }
        FrontendError::Frame(err) => frame_error(context, err),
        FrontendError::Transport(err) => transport_error(context, err),
        FrontendError::Net(err) => net_error(context, err),
        FrontendError::Privilege { op, source } => io_error(&format!("{context}: {op}"), source),
        err @ (FrontendError::UnknownUser(_) | FrontendError::InvalidParentFd(_)) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
