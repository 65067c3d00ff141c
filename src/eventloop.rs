//! Event-loop adapter.
//!
//! A classic `select()`-over-every-device-fd loop would multiplex readiness
//! one fd at a time; the async equivalent is one task racing every device's
//! `wait_ready()` future and, once any one of them resolves, ticking every
//! device unconditionally — non-blocking operations on a device that
//! wasn't actually ready just no-op, so there is no need to track which
//! fd(s) fired. The engine is cooperative and single-threaded: one pass
//! over all devices per wakeup is the correctness boundary for fan-out
//! ordering.

use std::sync::Arc;

use crate::client::ClientSink;
use crate::registry::{ClientRequest, DeviceRegistry};

/// Drives every device in `registry` forward by one readiness wakeup.
pub struct EventLoop {
    registry: DeviceRegistry,
    sink: Arc<dyn ClientSink>,
}

impl EventLoop {
    pub fn new(registry: DeviceRegistry, sink: Arc<dyn ClientSink>) -> Self {
        EventLoop { registry, sink }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    /// Route one client request through fan-out; returns the number of
    /// actions queued.
    pub fn submit(&mut self, request: &ClientRequest) -> usize {
        self.registry.apply_action(request)
    }

    /// Wait for the next device to become ready (I/O, backoff deadline, or
    /// expect/delay expiry), then tick every device once. Runs forever;
    /// callers drive this in a loop from a current-thread Tokio runtime.
    pub async fn run_once(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        let waits: Vec<_> = self
            .registry
            .iter()
            .map(|d| Box::pin(d.wait_ready()))
            .collect();
        futures::future::select_all(waits).await;

        for device in self.registry.iter_mut() {
            device.tick(self.sink.as_ref()).await;
        }
    }

    pub async fn run_forever(&mut self) -> ! {
        loop {
            self.run_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ClientId;
    use crate::device::Device;
    use crate::node::Node;
    use crate::plug::Plug;
    use crate::transport::tests::FakeTransport;
    use crate::transport::Connector;
    use futures::future::BoxFuture;
    use pmd_protocol::{Command, Protocol, Script, ScriptElement, SendTemplate};
    use pmd_test_support::{ChannelClientSink, ClientEvent};
    use regex::bytes::Regex;
    use std::io;
    use std::net::SocketAddr;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Hands out one pre-built fake transport for the device's single
    /// reconnect attempt in these tests.
    struct OneShotConnector {
        transport: StdMutex<Option<FakeTransport>>,
    }

    impl Connector for OneShotConnector {
        fn connect(
            &self,
            _addr: SocketAddr,
        ) -> BoxFuture<'static, io::Result<Box<dyn crate::transport::Transport>>> {
            let taken = self.transport.lock().unwrap().take();
            Box::pin(async move {
                match taken {
                    Some(t) => Ok(Box::new(t) as Box<dyn crate::transport::Transport>),
                    None => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
                }
            })
        }
    }

    fn build_device(transport: FakeTransport) -> Device {
        let protocol = Arc::new(
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
        );
        let on_regex = Arc::new(Regex::new("^ON").unwrap());
        let off_regex = Arc::new(Regex::new("^OFF").unwrap());
        let connector = Arc::new(OneShotConnector {
            transport: StdMutex::new(Some(transport)),
        });
        let mut device = Device::new(
            "d0",
            "localhost",
            23,
            protocol,
            Vec::new(),
            "ALL",
            on_regex,
            off_regex,
            Duration::from_secs(2),
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
    async fn straight_login_then_power_on_all_plugs_match() {
        let mut transport = FakeTransport::new();
        transport.push_inbound(b"ok\r\ndone\r\n");
        let device = build_device(transport);

        let (sink, mut events) = ChannelClientSink::new();
        let mut registry = DeviceRegistry::new();
        registry.insert(device);
        let mut event_loop = EventLoop::new(registry, Arc::new(sink));

        // First wakeup: not connected yet, so `run_once` only reconnects
        // and queues the synthesized LogIn — I/O for it starts on the next
        // wakeup. Second wakeup reads the device's greeting and completes
        // the LogIn script end to end.
        event_loop.run_once().await;
        event_loop.run_once().await;
        assert!(event_loop.registry().find("d0").unwrap().is_logged_in());

        let request = ClientRequest::new(Command::PowerOn, ClientId(7), 42)
            .with_hosts(vec!["n1".into(), "n2".into()]);
        assert_eq!(event_loop.submit(&request), 1);

        // One more wakeup drains the remaining "done\r\n" already sitting
        // in the recv buffer against the power-on script.
        event_loop.run_once().await;

        assert_eq!(
            events.recv().await,
            Some(ClientEvent::Reply {
                client_id: 7,
                seq: 42
            })
        );
    }
}
