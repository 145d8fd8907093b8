use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use ndfront_frame::{LinkStatus, Message};
use ndfront_net::InterfaceSource;
use tracing::{debug, info, warn};

use super::{Frontend, Link, LoopState, Shutdown};
use crate::error::{FrontendError, Result};

const READ_EVENTS: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR;

/// What a `pollfd` slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Signal,
    Link(Link),
    ControlListener,
    ControlClient(u64),
    Route,
    Icmp6,
}

struct Interest {
    fds: Vec<libc::pollfd>,
    sources: Vec<Source>,
}

impl Interest {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            fds: Vec::with_capacity(capacity),
            sources: Vec::with_capacity(capacity),
        }
    }

    fn add(&mut self, source: Source, fd: RawFd, writable: bool) {
        let mut events = libc::POLLIN;
        if writable {
            events |= libc::POLLOUT;
        }
        self.fds.push(libc::pollfd {
            fd,
            events,
            revents: 0,
        });
        self.sources.push(source);
    }
}

impl<I: InterfaceSource> Frontend<I> {
    /// Run until a termination signal or a link hangs up, then shut down.
    pub fn run(&mut self) -> Result<Shutdown> {
        self.state = LoopState::Running;
        info!("frontend running");
        let reason = loop {
            if let Some(reason) = self.poll_once(None)? {
                break reason;
            }
        };
        match reason {
            Shutdown::Signal => info!("termination signal received"),
            Shutdown::LinkClosed(link) => info!(link, "link closed, stopping"),
        }
        self.shutdown();
        Ok(reason)
    }

    /// Wait up to `timeout` (forever if `None`) and service whatever is ready.
    ///
    /// Returns `Some` once the loop should stop.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<Option<Shutdown>> {
        let mut interest = self.interest();
        let timeout_ms = timeout.map_or(-1, |t| t.as_millis().min(i32::MAX as u128) as i32);

        // SAFETY: `fds` is a live, correctly sized array of pollfd.
        let rc = unsafe {
            libc::poll(
                interest.fds.as_mut_ptr(),
                interest.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(FrontendError::Poll(err));
        }

        for (pfd, source) in interest.fds.iter().zip(interest.sources) {
            if pfd.revents == 0 {
                continue;
            }
            if let Some(reason) = self.service(source, pfd.revents)? {
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }

    fn interest(&self) -> Interest {
        let clients = self.control.as_ref().map_or(0, |c| c.client_count());
        let mut interest = Interest::with_capacity(6 + clients);

        if let Some(signals) = self.signals.as_ref() {
            interest.add(Source::Signal, signals.as_raw_fd(), false);
        }
        for (link, endpoint) in [
            (Link::Parent, self.parent.as_ref()),
            (Link::Engine, self.engine.as_ref()),
        ] {
            if let Some(endpoint) = endpoint {
                interest.add(
                    Source::Link(link),
                    endpoint.stream().as_raw_fd(),
                    endpoint.wants_write(),
                );
            }
        }
        if let Some(control) = self.control.as_ref().filter(|c| c.is_listening()) {
            interest.add(Source::ControlListener, control.listener_fd(), false);
            for client in control.clients() {
                interest.add(
                    Source::ControlClient(client.id),
                    client.endpoint.stream().as_raw_fd(),
                    client.endpoint.wants_write(),
                );
            }
        }
        if self.armed {
            if let Some(route) = self.route.as_ref() {
                interest.add(Source::Route, route.as_raw_fd(), false);
            }
            if let Some(icmp6) = self.icmp6.as_ref() {
                interest.add(Source::Icmp6, icmp6.as_raw_fd(), false);
            }
        }
        interest
    }

    fn service(&mut self, source: Source, revents: libc::c_short) -> Result<Option<Shutdown>> {
        match source {
            Source::Signal => {
                let fired = self.signals.as_ref().is_some_and(|s| s.drain());
                Ok(fired.then_some(Shutdown::Signal))
            }
            Source::Link(link) => self.service_link(link, revents),
            Source::ControlListener => {
                if let Some(control) = self.control.as_mut() {
                    if let Err(err) = control.accept_pending() {
                        warn!(error = %err, "control accept failed");
                    }
                }
                Ok(None)
            }
            Source::ControlClient(id) => {
                self.service_client(id, revents)?;
                Ok(None)
            }
            Source::Route => {
                let messages = match self.route.as_mut() {
                    Some(route) => route.read_messages(),
                    None => return Ok(None),
                };
                for message in messages {
                    self.handle_route(message)?;
                }
                Ok(None)
            }
            Source::Icmp6 => {
                let adverts = match self.icmp6.as_ref() {
                    Some(socket) => self.adverts.receive(socket),
                    None => return Ok(None),
                };
                for advert in adverts {
                    debug!(if_index = advert.if_index, from = %advert.source, "router advertisement");
                    self.compose_engine(&Message::RouterAdvertisement(advert), 0)?;
                }
                Ok(None)
            }
        }
    }

    fn service_link(&mut self, link: Link, revents: libc::c_short) -> Result<Option<Shutdown>> {
        if revents & libc::POLLOUT != 0 {
            let Some(endpoint) = self.link_mut(link) else {
                return Ok(None);
            };
            if endpoint.write_ready() == LinkStatus::Closed {
                return Ok(Some(self.close_link(link)));
            }
        }
        if revents & READ_EVENTS == 0 {
            return Ok(None);
        }

        let Some(endpoint) = self.link_mut(link) else {
            return Ok(None);
        };
        let readable = endpoint
            .poll_readable()
            .map_err(|source| FrontendError::Link {
                link: link.name(),
                source,
            })?;
        for message in readable.messages {
            match link {
                Link::Parent => self.handle_parent_message(message)?,
                Link::Engine => self.handle_engine_message(message)?,
            }
        }
        if readable.status == LinkStatus::Closed {
            return Ok(Some(self.close_link(link)));
        }
        Ok(None)
    }

    /// Control clients only ever lose their own connection.
    fn service_client(&mut self, id: u64, revents: libc::c_short) -> Result<()> {
        let Some(control) = self.control.as_mut() else {
            return Ok(());
        };
        if revents & libc::POLLOUT != 0 {
            control.write_ready(id);
        }
        if revents & READ_EVENTS == 0 {
            return Ok(());
        }

        let Some(client) = control.client_mut(id) else {
            return Ok(());
        };
        let pid = client.pid;
        let readable = match client.endpoint.poll_readable() {
            Ok(readable) => readable,
            Err(err) => {
                warn!(pid, error = %err, "control client sent garbage, closing");
                control.close(id);
                return Ok(());
            }
        };

        for message in readable.messages {
            self.handle_control_message(pid, message)?;
        }
        if readable.status == LinkStatus::Closed {
            if let Some(control) = self.control.as_mut() {
                control.close(id);
            }
        }
        Ok(())
    }
}
