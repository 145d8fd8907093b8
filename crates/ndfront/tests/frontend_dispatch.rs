#![cfg(target_os = "linux")]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Read;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use ndfront::{ControlServer, Frontend, LoopState, Shutdown, SignalPipe};
use ndfront_frame::{encode_frame, IpcEndpoint, IpcMessage, Message, MessageType, RelayKind};
use ndfront_net::{AutoconfFlags, InterfaceFlags, InterfaceSource, LinkInfo, RouteMessage};
use ndfront_transport::{IpcStream, UnixDomainSocket};

#[derive(Clone)]
struct FakeIf {
    name: &'static str,
    autoconf6: bool,
    up: bool,
}

#[derive(Default)]
struct FakeHost {
    ifs: BTreeMap<u32, FakeIf>,
}

impl FakeHost {
    fn with(mut self, index: u32, name: &'static str, autoconf6: bool) -> Self {
        self.ifs.insert(
            index,
            FakeIf {
                name,
                autoconf6,
                up: true,
            },
        );
        self
    }

    fn find(&self, name: &str) -> Option<(u32, &FakeIf)> {
        self.ifs
            .iter()
            .find(|(_, i)| i.name == name)
            .map(|(idx, i)| (*idx, i))
    }
}

impl InterfaceSource for FakeHost {
    fn flags(&self, name: &str) -> ndfront_net::Result<Option<InterfaceFlags>> {
        Ok(self.find(name).map(|(_, i)| InterfaceFlags {
            up: i.up,
            running: i.up,
        }))
    }

    fn autoconf_flags(&self, name: &str) -> ndfront_net::Result<Option<AutoconfFlags>> {
        Ok(self.find(name).map(|(_, i)| AutoconfFlags {
            autoconf6: i.autoconf6,
            privacy: false,
        }))
    }

    fn link_info(&self, name: &str) -> ndfront_net::Result<LinkInfo> {
        let index = self.find(name).map_or(0, |(idx, _)| idx);
        Ok(LinkInfo {
            hw_address: [0x02, 0, 0, 0, 0, index as u8],
            link_local: SocketAddrV6::new(
                Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, index as u16),
                0,
                0,
                index,
            ),
        })
    }

    fn index_to_name(&self, index: u32) -> Option<String> {
        self.ifs.get(&index).map(|i| i.name.to_string())
    }

    fn interfaces(&self) -> ndfront_net::Result<Vec<(u32, String)>> {
        Ok(self
            .ifs
            .iter()
            .map(|(idx, i)| (*idx, i.name.to_string()))
            .collect())
    }
}

fn host() -> FakeHost {
    FakeHost::default()
        .with(2, "eth0", true)
        .with(3, "wlan0", false)
        .with(5, "eth1", true)
}

fn frontend(host: FakeHost) -> (Frontend<FakeHost>, IpcEndpoint) {
    let (ours, theirs) = IpcStream::pair().unwrap();
    let frontend = Frontend::new(host, IpcEndpoint::new("parent", ours).unwrap());
    (frontend, IpcEndpoint::new("test-parent", theirs).unwrap())
}

fn attach_engine(frontend: &mut Frontend<FakeHost>) -> IpcEndpoint {
    let (ours, theirs) = IpcStream::pair().unwrap();
    frontend
        .handle_parent_message(IpcMessage::new(Message::SocketIpc).with_fd(OwnedFd::from(ours)))
        .unwrap();
    assert!(frontend.has_engine_link());
    IpcEndpoint::new("test-engine", theirs).unwrap()
}

fn poll(frontend: &mut Frontend<FakeHost>) -> Option<Shutdown> {
    frontend
        .poll_once(Some(Duration::from_millis(10)))
        .expect("frontend poll")
}

/// Run the frontend until `peer` has received `want` messages.
fn collect(frontend: &mut Frontend<FakeHost>, peer: &mut IpcEndpoint, want: usize) -> Vec<Message> {
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut got = Vec::new();
    while got.len() < want && Instant::now() < deadline {
        assert_eq!(poll(frontend), None);
        peer.write_ready();
        got.extend(peer.poll_readable().unwrap().messages.into_iter().map(|m| m.body));
    }
    got
}

/// A few idle rounds; returns anything `peer` received meanwhile.
fn settle(frontend: &mut Frontend<FakeHost>, peer: &mut IpcEndpoint) -> Vec<Message> {
    let mut got = Vec::new();
    for _ in 0..5 {
        poll(frontend);
        got.extend(peer.poll_readable().unwrap().messages.into_iter().map(|m| m.body));
    }
    got
}

fn update_indexes(messages: &[Message]) -> Vec<u32> {
    messages
        .iter()
        .map(|m| match m {
            Message::UpdateInterface(info) => info.if_index,
            other => panic!("expected UpdateInterface, got {other:?}"),
        })
        .collect()
}

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ndfront-it-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn startup_reports_autoconf_interfaces_in_index_order() {
    let (mut frontend, mut parent) = frontend(host());
    let mut engine = attach_engine(&mut frontend);

    parent.send(IpcMessage::new(Message::Startup)).unwrap();
    parent.write_ready();

    let got = collect(&mut frontend, &mut engine, 2);
    assert_eq!(update_indexes(&got), vec![2, 5]);
    assert!(frontend.is_armed());

    let Message::UpdateInterface(info) = &got[0] else {
        unreachable!()
    };
    assert!(info.running);
    assert_eq!(info.hw_address, [0x02, 0, 0, 0, 0, 2]);
    assert_eq!(info.link_local.scope_id(), 2);

    assert!(settle(&mut frontend, &mut engine).is_empty());
}

#[test]
fn parent_input_split_into_single_bytes_is_reassembled() {
    let (ours, theirs) = IpcStream::pair().unwrap();
    let mut frontend = Frontend::new(host(), IpcEndpoint::new("parent", ours).unwrap());

    let (engine_ours, engine_theirs) = IpcStream::pair().unwrap();
    let mut engine = IpcEndpoint::new("test-engine", engine_theirs).unwrap();

    let mut wire = BytesMut::new();
    encode_frame(MessageType::SocketIpc, 0, 0, &[], &mut wire).unwrap();
    encode_frame(MessageType::Startup, 0, 0, &[], &mut wire).unwrap();

    theirs
        .send_with_fd(&wire[..1], Some(engine_ours.as_fd()))
        .unwrap();
    drop(engine_ours);
    for i in 1..wire.len() {
        theirs.send_with_fd(&wire[i..i + 1], None).unwrap();
        assert_eq!(poll(&mut frontend), None);
    }

    let got = collect(&mut frontend, &mut engine, 2);
    assert_eq!(update_indexes(&got), vec![2, 5]);
}

#[test]
fn second_engine_handoff_is_refused() {
    let (mut frontend, mut parent) = frontend(host());

    let (first_ours, first_theirs) = IpcStream::pair().unwrap();
    let mut engine = IpcEndpoint::new("test-engine", first_theirs).unwrap();
    let (second_ours, mut second_theirs) = UnixStream::pair().unwrap();
    second_theirs
        .set_read_timeout(Some(Duration::from_secs(3)))
        .unwrap();

    parent
        .send(IpcMessage::new(Message::SocketIpc).with_fd(OwnedFd::from(first_ours)))
        .unwrap();
    parent
        .send(IpcMessage::new(Message::SocketIpc).with_fd(OwnedFd::from(second_ours)))
        .unwrap();
    parent.send(IpcMessage::new(Message::Startup)).unwrap();
    parent.write_ready();

    // Updates flow over the first link only.
    let got = collect(&mut frontend, &mut engine, 2);
    assert_eq!(update_indexes(&got), vec![2, 5]);

    // The refused descriptor was closed, so its far end sees EOF.
    let mut buf = [0u8; 1];
    assert_eq!(second_theirs.read(&mut buf).unwrap(), 0);
}

#[test]
fn handoff_without_descriptor_is_ignored() {
    let (mut frontend, _parent) = frontend(host());
    frontend
        .handle_parent_message(IpcMessage::new(Message::SocketIpc))
        .unwrap();
    assert!(!frontend.has_engine_link());
}

#[test]
fn vanished_interface_is_removed_exactly_once() {
    let (mut frontend, _parent) = frontend(host());
    let mut engine = attach_engine(&mut frontend);

    frontend
        .handle_route(RouteMessage::InterfaceChanged { index: 9 })
        .unwrap();

    let got = collect(&mut frontend, &mut engine, 1);
    assert_eq!(got, vec![Message::RemoveInterface { if_index: 9 }]);
    assert!(settle(&mut frontend, &mut engine).is_empty());
}

#[test]
fn route_events_follow_autoconf_state() {
    let (mut frontend, _parent) = frontend(host());
    let mut engine = attach_engine(&mut frontend);

    // Known but not autoconf-eligible: removed.
    frontend
        .handle_route(RouteMessage::InterfaceChanged { index: 3 })
        .unwrap();
    // New address on an eligible interface: always re-evaluated.
    frontend
        .handle_route(RouteMessage::AddressAdded { index: 5 })
        .unwrap();
    frontend
        .handle_route(RouteMessage::AddressAdded { index: 5 })
        .unwrap();

    let got = collect(&mut frontend, &mut engine, 3);
    assert_eq!(got[0], Message::RemoveInterface { if_index: 3 });
    assert_eq!(update_indexes(&got[1..]), vec![5, 5]);
}

#[test]
fn updates_without_engine_link_are_dropped() {
    let (mut frontend, _parent) = frontend(host());
    frontend.startup().unwrap();
    frontend
        .handle_route(RouteMessage::InterfaceChanged { index: 9 })
        .unwrap();

    let mut engine = attach_engine(&mut frontend);
    assert!(settle(&mut frontend, &mut engine).is_empty());
}

#[test]
fn solicitation_without_icmp_socket_is_not_fatal() {
    let (mut frontend, _parent) = frontend(host());
    let mut engine = attach_engine(&mut frontend);

    engine
        .send(IpcMessage::new(Message::CtlSendSolicitation { if_index: 5 }))
        .unwrap();
    engine.write_ready();
    assert!(settle(&mut frontend, &mut engine).is_empty());
    assert!(frontend.has_engine_link());
}

#[test]
fn unexpected_parent_message_is_ignored() {
    let (mut frontend, mut parent) = frontend(host());
    parent
        .send(IpcMessage::new(Message::RemoveInterface { if_index: 1 }))
        .unwrap();
    parent.write_ready();
    for _ in 0..3 {
        assert_eq!(poll(&mut frontend), None);
    }
    assert_eq!(frontend.state(), LoopState::Init);
}

#[test]
fn unknown_type_from_engine_is_fatal() {
    let (mut frontend, _parent) = frontend(host());
    let (ours, theirs) = IpcStream::pair().unwrap();
    frontend
        .handle_parent_message(IpcMessage::new(Message::SocketIpc).with_fd(OwnedFd::from(ours)))
        .unwrap();

    let mut header = Vec::new();
    header.extend_from_slice(&99u32.to_le_bytes());
    header.extend_from_slice(&[0u8; 12]);
    theirs.send_with_fd(&header, None).unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    let err = loop {
        match frontend.poll_once(Some(Duration::from_millis(10))) {
            Err(err) => break err,
            Ok(_) if Instant::now() < deadline => continue,
            Ok(_) => panic!("bad header was accepted"),
        }
    };
    assert!(err.is_protocol_violation());
}

#[test]
fn oversized_frame_from_parent_is_fatal() {
    let (ours, theirs) = IpcStream::pair().unwrap();
    let mut frontend = Frontend::new(host(), IpcEndpoint::new("parent", ours).unwrap());

    let mut header = Vec::new();
    header.extend_from_slice(&(MessageType::Startup as u32).to_le_bytes());
    header.extend_from_slice(&(64u32 * 1024).to_le_bytes());
    header.extend_from_slice(&[0u8; 8]);
    theirs.send_with_fd(&header, None).unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    let err = loop {
        match frontend.poll_once(Some(Duration::from_millis(10))) {
            Err(err) => break err,
            Ok(_) if Instant::now() < deadline => continue,
            Ok(_) => panic!("oversized frame was accepted"),
        }
    };
    assert!(err.is_protocol_violation());
}

#[test]
fn parent_hangup_stops_the_loop() {
    let (mut frontend, parent) = frontend(host());
    drop(parent);
    assert_eq!(frontend.run().unwrap(), Shutdown::LinkClosed("parent"));
    assert_eq!(frontend.state(), LoopState::Terminated);
}

#[test]
fn engine_hangup_stops_the_loop() {
    let (mut frontend, _parent) = frontend(host());
    let engine = attach_engine(&mut frontend);
    drop(engine);
    assert_eq!(frontend.run().unwrap(), Shutdown::LinkClosed("engine"));
    assert!(!frontend.has_engine_link());
}

#[test]
fn termination_signal_flushes_and_exits() {
    let (pipe, notifier) = SignalPipe::new().unwrap();
    let (frontend, _parent) = frontend(host());
    let mut frontend = frontend.with_signals(pipe);
    let mut engine = attach_engine(&mut frontend);

    // Queued but not yet written when the signal lands.
    frontend
        .handle_route(RouteMessage::InterfaceChanged { index: 9 })
        .unwrap();
    notifier.notify();

    assert_eq!(frontend.run().unwrap(), Shutdown::Signal);
    assert_eq!(frontend.state(), LoopState::Terminated);

    let readable = engine.poll_readable().unwrap();
    let bodies: Vec<Message> = readable.messages.into_iter().map(|m| m.body).collect();
    assert_eq!(bodies, vec![Message::RemoveInterface { if_index: 9 }]);
}

#[test]
fn control_requests_round_trip_through_engine() {
    let dir = temp_dir("control");
    let path = dir.join("ctl.sock");
    let mut control = ControlServer::init(&path).unwrap();
    control.listen();

    let (frontend, _parent) = frontend(host());
    let mut frontend = frontend.with_control(control);
    let mut engine = attach_engine(&mut frontend);

    let mut client = IpcEndpoint::new("client", UnixDomainSocket::connect(&path).unwrap()).unwrap();
    client
        .send(IpcMessage::new(Message::Relay(
            RelayKind::ShowInterfaceInfo,
            Bytes::from_static(&[0, 0, 0, 0]),
        )))
        .unwrap();
    client.write_ready();

    let forwarded = {
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut got = Vec::new();
        while got.is_empty() && Instant::now() < deadline {
            poll(&mut frontend);
            got.extend(engine.poll_readable().unwrap().messages);
        }
        got
    };
    assert_eq!(forwarded.len(), 1);
    let request = &forwarded[0];
    assert_eq!(request.kind(), MessageType::CtlShowInterfaceInfo);
    assert_eq!(request.pid, std::process::id() as i32);

    engine
        .send(
            IpcMessage::new(Message::Relay(
                RelayKind::ShowInterfaceInfoRa,
                Bytes::from_static(b"ra"),
            ))
            .with_pid(request.pid),
        )
        .unwrap();
    engine
        .send(IpcMessage::new(Message::Relay(RelayKind::End, Bytes::new())).with_pid(request.pid))
        .unwrap();
    engine.write_ready();

    let replies = collect(&mut frontend, &mut client, 2);
    assert_eq!(
        replies,
        vec![
            Message::Relay(RelayKind::ShowInterfaceInfoRa, Bytes::from_static(b"ra")),
            Message::Relay(RelayKind::End, Bytes::new()),
        ]
    );

    drop(frontend);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn log_verbose_reaches_both_links_and_local_logging() {
    let dir = temp_dir("verbose");
    let path = dir.join("ctl.sock");
    let mut control = ControlServer::init(&path).unwrap();
    control.listen();

    let toggles = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&toggles);
    let (frontend, mut parent) = frontend(host());
    let mut frontend = frontend
        .with_control(control)
        .with_verbosity(move |verbose| seen.borrow_mut().push(verbose));
    let mut engine = attach_engine(&mut frontend);

    let mut client = IpcEndpoint::new("client", UnixDomainSocket::connect(&path).unwrap()).unwrap();
    client
        .send(IpcMessage::new(Message::CtlLogVerbose(1)))
        .unwrap();
    client.write_ready();

    let to_engine = collect(&mut frontend, &mut engine, 1);
    assert_eq!(to_engine, vec![Message::CtlLogVerbose(1)]);
    let to_parent = collect(&mut frontend, &mut parent, 1);
    assert_eq!(to_parent, vec![Message::CtlLogVerbose(1)]);
    assert_eq!(*toggles.borrow(), vec![true]);

    drop(frontend);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn misbehaving_control_client_is_dropped_alone() {
    let dir = temp_dir("garbage");
    let path = dir.join("ctl.sock");
    let mut control = ControlServer::init(&path).unwrap();
    control.listen();

    let (frontend, _parent) = frontend(host());
    let mut frontend = frontend.with_control(control);

    let client = UnixDomainSocket::connect(&path).unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    while frontend.control().map_or(0, |c| c.client_count()) == 0 && Instant::now() < deadline {
        assert_eq!(poll(&mut frontend), None);
    }
    assert_eq!(frontend.control().map(|c| c.client_count()), Some(1));

    let mut header = Vec::new();
    header.extend_from_slice(&0xdeadu32.to_le_bytes());
    header.extend_from_slice(&[0u8; 12]);
    client.send_with_fd(&header, None).unwrap();

    while frontend.control().map_or(0, |c| c.client_count()) == 1 && Instant::now() < deadline {
        assert_eq!(poll(&mut frontend), None);
    }
    assert_eq!(frontend.control().map(|c| c.client_count()), Some(0));
    assert_eq!(frontend.state(), LoopState::Init);

    drop(frontend);
    let _ = std::fs::remove_dir_all(&dir);
}
