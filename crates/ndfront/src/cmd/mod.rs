use clap::{Args, Subcommand};
use std::os::fd::RawFd;
use std::path::PathBuf;

use ndfront::{FrontendConfig, DEFAULT_PARENT_FD, DEFAULT_SOCKET_PATH};
use ndfront_net::DEFAULT_SYSCTL_ROOT;

use crate::exit::CliResult;
use crate::logging::LogHandle;
use crate::output::OutputFormat;

pub mod interfaces;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the frontend process (normally started by the parent daemon).
    Run(RunArgs),
    /// Show which interfaces would be reported to the engine.
    Interfaces(InterfacesArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, log: Option<LogHandle>) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, log),
        Command::Interfaces(args) => interfaces::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Control socket path.
    #[arg(long, env = "NDFRONT_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,
    /// Descriptor inherited from the parent for its IPC link.
    #[arg(long, value_name = "FD", default_value_t = DEFAULT_PARENT_FD)]
    pub parent_fd: RawFd,
    /// Unprivileged user to switch to after opening sockets.
    #[arg(long, env = "NDFRONT_USER")]
    pub user: Option<String>,
    /// Do not chroot into the user's home directory.
    #[arg(long)]
    pub no_chroot: bool,
    /// Per-interface IPv6 sysctl directory.
    #[arg(long, value_name = "DIR", default_value = DEFAULT_SYSCTL_ROOT)]
    pub sysctl_root: PathBuf,
}

impl RunArgs {
    pub fn to_config(&self) -> FrontendConfig {
        FrontendConfig {
            socket_path: self.socket.clone(),
            parent_fd: self.parent_fd,
            user: self.user.clone(),
            chroot: !self.no_chroot,
            sysctl_root: self.sysctl_root.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct InterfacesArgs {
    /// Per-interface IPv6 sysctl directory.
    #[arg(long, value_name = "DIR", default_value = DEFAULT_SYSCTL_ROOT)]
    pub sysctl_root: PathBuf,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
