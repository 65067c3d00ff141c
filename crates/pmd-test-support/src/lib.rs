//! Fakes shared by `pmd-engine`'s own tests and the daemon's integration
//! tests: an in-memory duplex transport and connector so script/fan-out
//! behaviour can be exercised without a real socket — this crate is the
//! seam that keeps the engine itself socket-agnostic.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;

use futures::future::BoxFuture;
use pmd_engine::{Action, ClientSink, Connector, ErrorCode, Transport};
use tokio::sync::mpsc;

/// A duplex in-memory stream. The "device" side is driven by whoever holds
/// the paired [`DeviceHandle`]; the "engine" side implements [`Transport`]
/// directly so it can be handed straight to `Device::new`.
pub struct FakeTransport {
    inbound: Mutex<VecDeque<u8>>,
    outbound: Mutex<Vec<u8>>,
    fail_next_write: Mutex<bool>,
    closed: Mutex<bool>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport {
            inbound: Mutex::new(VecDeque::new()),
            outbound: Mutex::new(Vec::new()),
            fail_next_write: Mutex::new(false),
            closed: Mutex::new(false),
        }
    }

    /// Queue bytes as if the simulated device had sent them.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.inbound.lock().unwrap().extend(bytes.iter().copied());
    }

    /// Snapshot of everything written by the engine so far.
    pub fn written(&self) -> Vec<u8> {
        self.outbound.lock().unwrap().clone()
    }

    /// Simulate EOF on the next read.
    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }

    pub fn fail_next_write(&self) {
        *self.fail_next_write.lock().unwrap() = true;
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        FakeTransport::new()
    }
}

impl Transport for FakeTransport {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if *self.closed.lock().unwrap() {
            return Ok(0);
        }
        let mut inbound = self.inbound.lock().unwrap();
        if inbound.is_empty() {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let mut n = 0;
        while n < buf.len() {
            match inbound.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut fail = self.fail_next_write.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(io::Error::from(io::ErrorKind::ConnectionReset));
        }
        self.outbound.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn readable(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn writable(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Hands out a pre-seeded [`FakeTransport`] on its first `connect` call,
/// then fails every subsequent attempt — enough to simulate exactly one
/// successful connect in a test without needing a real listener.
pub struct FakeConnector {
    transport: Mutex<Option<FakeTransport>>,
}

impl FakeConnector {
    pub fn new(transport: FakeTransport) -> Self {
        FakeConnector {
            transport: Mutex::new(Some(transport)),
        }
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _addr: SocketAddr) -> BoxFuture<'static, io::Result<Box<dyn Transport>>> {
        let taken = self.transport.lock().unwrap().take();
        Box::pin(async move {
            match taken {
                Some(t) => Ok(Box::new(t) as Box<dyn Transport>),
                None => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            }
        })
    }
}

/// Always fails to connect — for reconnect-backoff tests that never need
/// a live device.
pub struct RefusingConnector;

impl Connector for RefusingConnector {
    fn connect(&self, _addr: SocketAddr) -> BoxFuture<'static, io::Result<Box<dyn Transport>>> {
        Box::pin(async { Err(io::Error::from(io::ErrorKind::ConnectionRefused)) })
    }
}

/// One event delivered through a [`ChannelClientSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Reply { client_id: u64, seq: u64 },
    Error { client_id: u64, seq: u64, code: ErrorCode },
}

/// A [`ClientSink`] backed by an unbounded `tokio::sync::mpsc` channel —
/// the default sink for tests and for the daemon binary, standing in for
/// the real client-facing socket layer.
pub struct ChannelClientSink {
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelClientSink {
    /// Build a sink paired with the receiver that observes everything sent
    /// through it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelClientSink { events: tx }, rx)
    }
}

impl ClientSink for ChannelClientSink {
    fn reply(&self, action: &Action) {
        let _ = self.events.send(ClientEvent::Reply {
            client_id: action.client_id.0,
            seq: action.seq,
        });
    }

    fn errmsg(&self, action: &Action, code: ErrorCode) {
        let _ = self.events.send(ClientEvent::Error {
            client_id: action.client_id.0,
            seq: action.seq,
            code,
        });
    }
}
