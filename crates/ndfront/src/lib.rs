//! Unprivileged IPv6 router-discovery frontend.
//!
//! The frontend owns all raw network I/O for the daemon: it watches
//! interfaces, sends router solicitations, receives router advertisements
//! and relays everything to the engine process over framed IPC links.

pub mod config;
pub mod error;
pub mod frontend;
pub mod privsep;

pub use config::{FrontendConfig, DEFAULT_PARENT_FD, DEFAULT_SOCKET_PATH};
pub use error::{FrontendError, Result};
pub use frontend::{ControlServer, Frontend, LoopState, Shutdown, SignalNotifier, SignalPipe};
