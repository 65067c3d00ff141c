//! End-to-end scenarios against the public `pmd_engine` API, driven with
//! `pmd-test-support`'s in-memory transport instead of a real socket.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::BoxFuture;
use pmd_engine::{
    ClientId, ClientRequest, Connector, Device, DeviceRegistry, EventLoop, Node, Plug, Transport,
};
use pmd_protocol::{Command, Protocol, Script, ScriptElement, SendTemplate};
use pmd_test_support::{
    ChannelClientSink, ClientEvent, FakeConnector, FakeTransport, RefusingConnector,
};
use regex::bytes::Regex;

/// Fails `connect` the first `fail_first` times, then hands out `transport`.
struct FlakyConnector {
    remaining_failures: AtomicU32,
    transport: StdMutex<Option<FakeTransport>>,
}

impl FlakyConnector {
    fn new(fail_first: u32, transport: FakeTransport) -> Self {
        FlakyConnector {
            remaining_failures: AtomicU32::new(fail_first),
            transport: StdMutex::new(Some(transport)),
        }
    }
}

impl Connector for FlakyConnector {
    fn connect(&self, _addr: SocketAddr) -> BoxFuture<'static, io::Result<Box<dyn Transport>>> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Box::pin(async { Err(io::Error::from(io::ErrorKind::ConnectionRefused)) });
        }
        let taken = self.transport.lock().unwrap().take();
        Box::pin(async move {
            match taken {
                Some(t) => Ok(Box::new(t) as Box<dyn Transport>),
                None => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            }
        })
    }
}

fn two_plug_protocol() -> Arc<Protocol> {
    Arc::new(
        Protocol::new("test-model")
            .with_script(
                Command::LogIn,
                Script::new(vec![
                    ScriptElement::Send(SendTemplate::parse("login\n").unwrap()),
                    ScriptElement::Expect {
                        regex: Arc::new(Regex::new(r"^ok\r\n").unwrap()),
                        interpretation: None,
                    },
                ]),
            )
            .with_script(
                Command::PowerOn,
                Script::new(vec![
                    ScriptElement::Send(SendTemplate::parse("on %s\n").unwrap()),
                    ScriptElement::Expect {
                        regex: Arc::new(Regex::new(r"^done\r\n").unwrap()),
                        interpretation: None,
                    },
                ]),
            ),
    )
}

fn device_with_transport(transport: FakeTransport) -> Device {
    let connector = Arc::new(FakeConnector::new(transport));
    let on_regex = Arc::new(Regex::new("^ON").unwrap());
    let off_regex = Arc::new(Regex::new("^OFF").unwrap());
    let mut device = Device::new(
        "d0",
        "localhost",
        23,
        two_plug_protocol(),
        Vec::new(),
        "ALL",
        on_regex,
        off_regex,
        Duration::from_millis(200),
        4096,
        connector,
    );
    let n1 = device.nodes.insert(Node::new("n1"));
    let n2 = device.nodes.insert(Node::new("n2"));
    device.plugs.push(Plug::new("p1", Some(n1)));
    device.plugs.push(Plug::new("p2", Some(n2)));
    device
}

#[tokio::test(flavor = "current_thread")]
async fn partial_match_fan_out_targets_one_plug() {
    let transport = FakeTransport::new();
    transport.push_inbound(b"ok\r\ndone\r\n");
    let device = device_with_transport(transport);

    let (sink, mut events) = ChannelClientSink::new();
    let mut registry = DeviceRegistry::new();
    registry.insert(device);
    let mut event_loop = EventLoop::new(registry, Arc::new(sink));

    event_loop.run_once().await;
    event_loop.run_once().await;
    assert!(event_loop.registry().find("d0").unwrap().is_logged_in());

    let request =
        ClientRequest::new(Command::PowerOn, ClientId(1), 1).with_hosts(vec!["n1".into()]);
    assert_eq!(event_loop.submit(&request), 1);

    event_loop.run_once().await;

    assert_eq!(
        events.recv().await,
        Some(ClientEvent::Reply {
            client_id: 1,
            seq: 1
        })
    );
}

#[tokio::test(flavor = "current_thread")]
async fn expect_timeout_forces_reconnect_and_resets_backoff() {
    // The device never sends "ok\r\n": the LogIn expect will time out.
    let transport = FakeTransport::new();
    let device = device_with_transport(transport);

    let (sink, _events) = ChannelClientSink::new();
    let mut registry = DeviceRegistry::new();
    registry.insert(device);
    let mut event_loop = EventLoop::new(registry, Arc::new(sink));

    event_loop.run_once().await;
    assert_eq!(event_loop.registry().find("d0").unwrap().reconnect_count(), 1);

    // Second wakeup sends "login\n" and starts the Expect, stamping its
    // timeout deadline from the current clock.
    event_loop.run_once().await;

    tokio::time::pause();
    tokio::time::advance(Duration::from_millis(250)).await;
    event_loop.run_once().await;

    let device = event_loop.registry().find("d0").unwrap();
    assert_eq!(device.connect_status(), pmd_engine::ConnectStatus::NotConnected);
    assert_eq!(device.reconnect_count(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn update_plugs_classification_prefers_off_on_tie() {
    let transport = FakeTransport::new();
    transport.push_inbound(b"ok\r\noutlet1: OFF\r\n");
    let mut device = device_with_transport(transport);
    // Deliberately overlapping: "OFF" matches both, exercising the
    // off-wins tie-break rather than a simple non-match on `on_regex`.
    device.on_regex = Arc::new(Regex::new("^O").unwrap());
    device.protocol = Arc::new(
        Protocol::new("test-model")
            .with_script(
                Command::LogIn,
                Script::new(vec![
                    ScriptElement::Send(SendTemplate::parse("login\n").unwrap()),
                    ScriptElement::Expect {
                        regex: Arc::new(Regex::new(r"^ok\r\n").unwrap()),
                        interpretation: None,
                    },
                ]),
            )
            .with_script(
                Command::UpdatePlugs,
                Script::new(vec![
                    ScriptElement::Send(SendTemplate::parse("status %s\n").unwrap()),
                    ScriptElement::Expect {
                        regex: Arc::new(Regex::new(r"outlet1: (\S+)\r\n").unwrap()),
                        interpretation: Some(Arc::new(pmd_protocol::Interpretation::new(vec![
                            pmd_protocol::CaptureMapping {
                                capture_index: 1,
                                plug_index: 0,
                            },
                        ]))),
                    },
                ]),
            ),
    );

    let (sink, _events) = ChannelClientSink::new();
    let mut registry = DeviceRegistry::new();
    registry.insert(device);
    let mut event_loop = EventLoop::new(registry, Arc::new(sink));

    event_loop.run_once().await;
    event_loop.run_once().await;
    assert!(event_loop.registry().find("d0").unwrap().is_logged_in());

    let request =
        ClientRequest::new(Command::UpdatePlugs, ClientId(2), 5).with_hosts(vec!["n1".into()]);
    assert_eq!(event_loop.submit(&request), 1);
    event_loop.run_once().await;

    let device = event_loop.registry().find("d0").unwrap();
    let n1 = device.nodes.find_by_name("n1").unwrap();
    assert_eq!(device.nodes.get(n1).plug_state, pmd_engine::PowerState::Off);
}

#[tokio::test(flavor = "current_thread")]
async fn login_success_resets_reconnect_count() {
    let mut transport = FakeTransport::new();
    transport.push_inbound(b"ok\r\n");
    let connector = Arc::new(FlakyConnector::new(1, transport));
    let on_regex = Arc::new(Regex::new("^ON").unwrap());
    let off_regex = Arc::new(Regex::new("^OFF").unwrap());
    let device = Device::new(
        "d0",
        "localhost",
        23,
        two_plug_protocol(),
        Vec::new(),
        "ALL",
        on_regex,
        off_regex,
        Duration::from_millis(200),
        4096,
        connector,
    );

    let (sink, _events) = ChannelClientSink::new();
    let mut registry = DeviceRegistry::new();
    registry.insert(device);
    let mut event_loop = EventLoop::new(registry, Arc::new(sink));

    tokio::time::pause();
    event_loop.run_once().await;
    assert_eq!(event_loop.registry().find("d0").unwrap().reconnect_count(), 1);

    tokio::time::advance(Duration::from_secs(1)).await;
    event_loop.run_once().await;
    assert_eq!(event_loop.registry().find("d0").unwrap().reconnect_count(), 2);

    // Transport bytes were already queued, so the same wakeup that connects
    // also drains the greeting and completes LogIn end to end.
    event_loop.run_once().await;

    let device = event_loop.registry().find("d0").unwrap();
    assert!(device.is_logged_in());
    assert_eq!(device.reconnect_count(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn eof_on_first_read_disconnects_and_resets_backoff() {
    let transport = FakeTransport::new();
    transport.close();
    let device = device_with_transport(transport);

    let (sink, _events) = ChannelClientSink::new();
    let mut registry = DeviceRegistry::new();
    registry.insert(device);
    let mut event_loop = EventLoop::new(registry, Arc::new(sink));

    event_loop.run_once().await;
    assert_eq!(event_loop.registry().find("d0").unwrap().reconnect_count(), 1);

    event_loop.run_once().await;

    let device = event_loop.registry().find("d0").unwrap();
    assert_eq!(device.connect_status(), pmd_engine::ConnectStatus::NotConnected);
    assert_eq!(device.reconnect_count(), 0);
    assert_eq!(device.queue_len(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn permanently_refused_connect_keeps_backing_off() {
    let on_regex = Arc::new(Regex::new("^ON").unwrap());
    let off_regex = Arc::new(Regex::new("^OFF").unwrap());
    let device = Device::new(
        "d0",
        "localhost",
        23,
        two_plug_protocol(),
        Vec::new(),
        "ALL",
        on_regex,
        off_regex,
        Duration::from_millis(200),
        4096,
        Arc::new(RefusingConnector),
    );

    let (sink, _events) = ChannelClientSink::new();
    let mut registry = DeviceRegistry::new();
    registry.insert(device);
    let mut event_loop = EventLoop::new(registry, Arc::new(sink));

    tokio::time::pause();
    event_loop.run_once().await;
    assert_eq!(event_loop.registry().find("d0").unwrap().reconnect_count(), 1);
    assert_eq!(
        event_loop.registry().find("d0").unwrap().connect_status(),
        pmd_engine::ConnectStatus::NotConnected
    );

    tokio::time::advance(Duration::from_secs(1)).await;
    event_loop.run_once().await;
    assert_eq!(event_loop.registry().find("d0").unwrap().reconnect_count(), 2);

    tokio::time::advance(Duration::from_secs(2)).await;
    event_loop.run_once().await;
    assert_eq!(event_loop.registry().find("d0").unwrap().reconnect_count(), 3);
}

#[tokio::test(flavor = "current_thread")]
async fn write_failure_disconnects_and_resets_backoff() {
    let transport = FakeTransport::new();
    transport.fail_next_write();
    let device = device_with_transport(transport);

    let (sink, _events) = ChannelClientSink::new();
    let mut registry = DeviceRegistry::new();
    registry.insert(device);
    let mut event_loop = EventLoop::new(registry, Arc::new(sink));

    event_loop.run_once().await; // reconnect succeeds, queues LogIn
    event_loop.run_once().await; // renders "login\n" into the send buffer
    event_loop.run_once().await; // flushing the send buffer hits the forced failure

    let device = event_loop.registry().find("d0").unwrap();
    assert_eq!(device.connect_status(), pmd_engine::ConnectStatus::NotConnected);
    assert_eq!(device.reconnect_count(), 0);
}
