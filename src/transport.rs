//! Socket abstraction.
//!
//! The engine only ever needs "give me a non-blocking byte stream and tell
//! me when it's readable/writable" — wrapping that behind a trait lets
//! `pmd-test-support` substitute an in-memory duplex for device simulation
//! without a real listener anywhere.

use std::io;
use std::net::SocketAddr;

use futures::future::BoxFuture;
use tokio::net::TcpStream;

/// A non-blocking duplex byte stream plus async readiness notifications.
///
/// `try_read`/`try_write` never block; `WouldBlock` means "nothing to do
/// right now", the same contract as `read()`/`write()` on an `O_NONBLOCK`
/// fd. `readable`/`writable` are the async equivalent of registering that
/// fd in a `select()` fd_set.
pub trait Transport: Send {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn readable(&self) -> BoxFuture<'_, io::Result<()>>;
    fn writable(&self) -> BoxFuture<'_, io::Result<()>>;
}

pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        TcpTransport { stream }
    }
}

impl Transport for TcpTransport {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }

    fn readable(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            self.stream.readable().await?;
            Ok(())
        })
    }

    fn writable(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            self.stream.writable().await?;
            Ok(())
        })
    }
}

/// Produces a [`Transport`] bound to one device's `host:port`. Abstracted
/// from `device.rs` so tests can substitute a connector that never touches
/// a real socket, and so the non-blocking-connect-completion dance (probe
/// `getsockopt(SO_ERROR)` after a writable wakeup, in a raw-socket
/// implementation) is implemented once, in one place.
pub trait Connector: Send + Sync {
    fn connect(&self, addr: SocketAddr) -> BoxFuture<'static, io::Result<Box<dyn Transport>>>;
}

pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, addr: SocketAddr) -> BoxFuture<'static, io::Result<Box<dyn Transport>>> {
        Box::pin(async move {
            let socket = if addr.is_ipv4() {
                tokio::net::TcpSocket::new_v4()?
            } else {
                tokio::net::TcpSocket::new_v6()?
            };
            socket.set_reuseaddr(true)?;
            // `TcpSocket::connect` performs the non-blocking connect and
            // resolves once it either succeeds or fails, folding the
            // separate pre-connect/post-connect SO_ERROR check a raw
            // nonblocking socket would need into one `io::Result`.
            let stream = socket.connect(addr).await?;
            Ok(Box::new(TcpTransport::new(stream)) as Box<dyn Transport>)
        })
    }
}
