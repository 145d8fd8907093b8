//! The frontend context and its message handlers.
//!
//! A [`Frontend`] owns every descriptor the process uses: the parent and
//! engine links, the control socket, and the raw ICMPv6 and netlink
//! sockets. Handlers run to completion on one thread; the reactor in
//! `reactor.rs` decides which handler runs next.

pub mod control;
mod reactor;
pub mod signal;

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use ndfront_frame::{IpcEndpoint, IpcMessage, Message, RelayKind};
use ndfront_net::{
    evaluate, handle_route_message, AdvertReceiver, HostInterfaces, Icmp6Socket, InterfaceEvent,
    InterfaceSource, RouteMessage, RouteSocket, Solicitation,
};
use ndfront_transport::IpcStream;
use tracing::{debug, info, warn};

use crate::config::FrontendConfig;
use crate::error::{FrontendError, Result};
use crate::privsep;

pub use control::ControlServer;
pub use signal::{SignalNotifier, SignalPipe};

/// Lifecycle of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    Running,
    /// A link hung up; remaining endpoints are being flushed.
    Draining,
    Terminated,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// SIGINT or SIGTERM.
    Signal,
    /// The named link reached EOF or failed.
    LinkClosed(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    Parent,
    Engine,
}

impl Link {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Link::Parent => "parent",
            Link::Engine => "engine",
        }
    }
}

type VerbosityHook = Box<dyn FnMut(bool)>;

/// Frontend state, constructed once at startup and torn down at shutdown.
pub struct Frontend<I: InterfaceSource = HostInterfaces> {
    state: LoopState,
    interfaces: I,
    parent: Option<IpcEndpoint>,
    engine: Option<IpcEndpoint>,
    control: Option<ControlServer>,
    icmp6: Option<Icmp6Socket>,
    route: Option<RouteSocket>,
    /// Set by `Startup`; until then the raw sockets are not polled.
    armed: bool,
    solicitation: Solicitation,
    adverts: AdvertReceiver,
    signals: Option<SignalPipe>,
    verbosity: Option<VerbosityHook>,
}

impl Frontend<HostInterfaces> {
    /// Build the production frontend: bind the control socket, open the
    /// raw sockets, then give up root.
    pub fn bootstrap(config: &FrontendConfig) -> Result<Self> {
        let mut control = ControlServer::init(&config.socket_path)?;

        let identity = config
            .user
            .as_deref()
            .map(privsep::lookup_user)
            .transpose()?;

        // Opened before chroot; sysctl reads go through this directory fd.
        let interfaces = HostInterfaces::open(&config.sysctl_root)?;

        if let Some(identity) = identity.as_ref().filter(|_| config.chroot) {
            privsep::enter_chroot(&identity.home)?;
        }

        let icmp6 = Icmp6Socket::open()?;
        let route = RouteSocket::open()?;

        match identity.as_ref() {
            Some(identity) => privsep::drop_privileges(identity)?,
            None => warn!("no unprivileged user configured, keeping current credentials"),
        }

        let signals = SignalPipe::install()?;
        let parent = adopt_parent(config.parent_fd)?;
        control.listen();

        Ok(Frontend::new(interfaces, parent)
            .with_control(control)
            .with_raw_sockets(icmp6, route)
            .with_signals(signals))
    }
}

fn adopt_parent(fd: RawFd) -> Result<IpcEndpoint> {
    if fd < 0 {
        return Err(FrontendError::InvalidParentFd(fd));
    }
    // SAFETY: the parent leaves this descriptor open for us and nothing
    // else in the process claims it.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    let stream = IpcStream::from_owned_fd(owned)?;
    Ok(IpcEndpoint::new(Link::Parent.name(), stream)?)
}

impl<I: InterfaceSource> Frontend<I> {
    pub fn new(interfaces: I, parent: IpcEndpoint) -> Self {
        Self {
            state: LoopState::Init,
            interfaces,
            parent: Some(parent),
            engine: None,
            control: None,
            icmp6: None,
            route: None,
            armed: false,
            solicitation: Solicitation::new(),
            adverts: AdvertReceiver::new(),
            signals: None,
            verbosity: None,
        }
    }

    pub fn with_control(mut self, control: ControlServer) -> Self {
        self.control = Some(control);
        self
    }

    pub fn with_raw_sockets(mut self, icmp6: Icmp6Socket, route: RouteSocket) -> Self {
        self.icmp6 = Some(icmp6);
        self.route = Some(route);
        self
    }

    pub fn with_signals(mut self, signals: SignalPipe) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Called with `true`/`false` when a control client toggles verbose logging.
    pub fn with_verbosity(mut self, hook: impl FnMut(bool) + 'static) -> Self {
        self.verbosity = Some(Box::new(hook));
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn has_engine_link(&self) -> bool {
        self.engine.is_some()
    }

    /// Whether `Startup` has armed the raw sockets.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn control(&self) -> Option<&ControlServer> {
        self.control.as_ref()
    }

    /// Dispatch one message from the parent.
    pub fn handle_parent_message(&mut self, message: IpcMessage) -> Result<()> {
        match message.body {
            Message::SocketIpc => self.adopt_engine(message.fd),
            Message::Startup => self.startup(),
            Message::Relay(RelayKind::End, _) => self.relay_to_control(message),
            other => {
                debug!(kind = %other.kind(), "unexpected message from parent");
                Ok(())
            }
        }
    }

    /// Dispatch one message from the engine.
    pub fn handle_engine_message(&mut self, message: IpcMessage) -> Result<()> {
        match message.body {
            Message::Relay(..) => self.relay_to_control(message),
            Message::CtlSendSolicitation { if_index } => {
                self.solicit(if_index);
                Ok(())
            }
            other => {
                debug!(kind = %other.kind(), "unexpected message from engine");
                Ok(())
            }
        }
    }

    /// Dispatch one request from the control client identified by `pid`.
    pub fn handle_control_message(&mut self, pid: i32, message: IpcMessage) -> Result<()> {
        match message.body {
            body @ (Message::Relay(RelayKind::ShowInterfaceInfo, _)
            | Message::CtlSendSolicitation { .. }) => self.compose_engine(&body, pid),
            Message::CtlLogVerbose(level) => {
                let body = Message::CtlLogVerbose(level);
                if let Some(parent) = self.parent.as_mut() {
                    parent.compose(&body, 0, pid, None)?;
                }
                self.compose_engine(&body, pid)?;
                if let Some(hook) = self.verbosity.as_mut() {
                    hook(level != 0);
                }
                Ok(())
            }
            other => {
                debug!(pid, kind = %other.kind(), "unexpected control request");
                Ok(())
            }
        }
    }

    /// Arm the raw sockets and report every eligible interface.
    pub fn startup(&mut self) -> Result<()> {
        self.armed = true;
        let interfaces = self.interfaces.interfaces()?;
        debug!(count = interfaces.len(), "startup: enumerating interfaces");
        for (index, name) in interfaces {
            if let Some(info) = evaluate(&self.interfaces, index, &name)? {
                self.compose_engine(&Message::UpdateInterface(info), 0)?;
            }
        }
        Ok(())
    }

    /// React to one routing-socket notification.
    pub fn handle_route(&mut self, message: RouteMessage) -> Result<()> {
        match handle_route_message(&self.interfaces, message)? {
            Some(InterfaceEvent::Update(info)) => {
                self.compose_engine(&Message::UpdateInterface(info), 0)
            }
            Some(InterfaceEvent::Remove(if_index)) => {
                self.compose_engine(&Message::RemoveInterface { if_index }, 0)
            }
            None => Ok(()),
        }
    }

    fn adopt_engine(&mut self, fd: Option<OwnedFd>) -> Result<()> {
        if self.engine.is_some() {
            warn!("engine link already established, refusing another");
            return Ok(());
        }
        let Some(fd) = fd else {
            warn!("SOCKET_IPC arrived without a descriptor");
            return Ok(());
        };
        let stream = IpcStream::from_owned_fd(fd)?;
        self.engine = Some(IpcEndpoint::new(Link::Engine.name(), stream)?);
        info!("engine link established");
        Ok(())
    }

    fn relay_to_control(&mut self, message: IpcMessage) -> Result<()> {
        match self.control.as_mut() {
            Some(control) => control.relay(message),
            None => {
                debug!(kind = %message.kind(), "no control socket, dropping reply");
                Ok(())
            }
        }
    }

    fn solicit(&mut self, if_index: u32) {
        match self.icmp6.as_ref() {
            Some(socket) => self.solicitation.send(socket, if_index),
            None => debug!(if_index, "no ICMPv6 socket, solicitation skipped"),
        }
    }

    fn compose_engine(&mut self, body: &Message, pid: i32) -> Result<()> {
        match self.engine.as_mut() {
            Some(engine) => Ok(engine.compose(body, 0, pid, None)?),
            None => {
                debug!(kind = %body.kind(), "no engine link, dropping message");
                Ok(())
            }
        }
    }

    /// Flush and close both links, then mark the loop terminated.
    pub fn shutdown(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.shutdown();
        }
        if let Some(parent) = self.parent.take() {
            parent.shutdown();
        }
        self.state = LoopState::Terminated;
        info!("frontend exiting");
    }

    /// Drop a link that hung up. Its queued output is discarded.
    fn close_link(&mut self, link: Link) -> Shutdown {
        let endpoint = match link {
            Link::Parent => self.parent.take(),
            Link::Engine => self.engine.take(),
        };
        if let Some(endpoint) = endpoint {
            debug!(link = link.name(), discarded = endpoint.queued(), "link closed");
        }
        self.state = LoopState::Draining;
        Shutdown::LinkClosed(link.name())
    }

    fn link_mut(&mut self, link: Link) -> Option<&mut IpcEndpoint> {
        match link {
            Link::Parent => self.parent.as_mut(),
            Link::Engine => self.engine.as_mut(),
        }
    }
}
