//! Bounded byte FIFO over a non-blocking transport.
//!
//! A capacity-bounded queue of raw bytes, fed by non-blocking reads/writes,
//! with a telemetry hook fired on every append and drain, plus the
//! `peek_regex` primitive the script interpreter uses to recognize an
//! `Expect` without consuming tail bytes meant for the next one.

use std::io;
use std::sync::Arc;

use regex::bytes::Regex;

use crate::transport::Transport;

/// Direction tag passed to the telemetry hook, rendered as an `S(name)`
/// (sent)/`D(name)` (received) log prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToDevice,
    FromDevice,
}

pub type TelemetryHook = Arc<dyn Fn(Direction, &[u8]) + Send + Sync>;

/// A bounded byte queue. Capacity is enforced on the receive side by simply
/// declining to read further bytes once full (there is no flow-control
/// scheme to the device beyond this) — callers see that as a would-block,
/// exactly like a real socket with no buffer space.
pub struct ByteBuffer {
    capacity: usize,
    data: Vec<u8>,
    hook: Option<TelemetryHook>,
}

impl ByteBuffer {
    pub fn new(capacity: usize) -> Self {
        ByteBuffer {
            capacity,
            data: Vec::new(),
            hook: None,
        }
    }

    pub fn with_hook(capacity: usize, hook: TelemetryHook) -> Self {
        ByteBuffer {
            capacity,
            data: Vec::new(),
            hook: Some(hook),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn log(&self, dir: Direction, bytes: &[u8]) {
        if let Some(hook) = &self.hook {
            hook(dir, bytes);
        }
    }

    /// Best-effort non-blocking read from `transport` into remaining
    /// capacity. `Ok(0)` is EOF; `Err(WouldBlock)` means no data was
    /// available right now; any other `Err` is a connection loss.
    pub fn read_from(&mut self, transport: &mut dyn Transport) -> io::Result<usize> {
        let remaining = self.capacity.saturating_sub(self.data.len());
        if remaining == 0 {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let mut chunk = vec![0u8; remaining];
        let n = transport.try_read(&mut chunk)?;
        if n > 0 {
            chunk.truncate(n);
            self.log(Direction::FromDevice, &chunk);
            self.data.extend_from_slice(&chunk);
        }
        Ok(n)
    }

    /// Best-effort non-blocking drain of the buffer's front into `transport`.
    pub fn write_to(&mut self, transport: &mut dyn Transport) -> io::Result<usize> {
        if self.data.is_empty() {
            return Ok(0);
        }
        let n = transport.try_write(&self.data)?;
        if n > 0 {
            self.log(Direction::ToDevice, &self.data[..n]);
            self.data.drain(0..n);
        }
        Ok(n)
    }

    /// Append formatted bytes directly (used for sends — always succeeds,
    /// draining is the event loop's job).
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Longest match anchored at the buffer head, without consuming.
    /// Returns the end offset of the match (byte length to consume) if one
    /// exists; `None` otherwise. A match that exists later in the buffer
    /// but not at offset 0 does not count — the caller must wait for more
    /// bytes, or for preceding noise to be otherwise disposed of.
    pub fn peek_regex_end(&self, re: &Regex) -> Option<usize> {
        re.find(&self.data)
            .filter(|m| m.start() == 0)
            .map(|m| m.end())
    }

    /// Drop `len` bytes from the front of the buffer (the matched prefix).
    pub fn consume(&mut self, len: usize) {
        self.data.drain(0..len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::FakeTransport;

    #[test]
    fn peek_regex_requires_match_at_head() {
        let mut buf = ByteBuffer::new(64);
        buf.append(b"noise ok\r\n");
        let re = Regex::new(r"^ok\r\n").unwrap();
        assert_eq!(buf.peek_regex_end(&re), None);
    }

    #[test]
    fn peek_regex_matches_and_consume_leaves_tail() {
        let mut buf = ByteBuffer::new(64);
        buf.append(b"ok\r\nextra");
        let re = Regex::new(r"ok\r\n").unwrap();
        let end = buf.peek_regex_end(&re).expect("should match at head");
        buf.consume(end);
        assert_eq!(buf.as_bytes(), b"extra");
    }

    #[test]
    fn read_from_reports_would_block_when_full() {
        let mut buf = ByteBuffer::new(2);
        buf.append(b"ab");
        let mut t = FakeTransport::with_inbound(b"xy".to_vec());
        let err = buf.read_from(&mut t).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn write_to_drains_and_fires_telemetry() {
        use std::sync::Mutex;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let hook: TelemetryHook = Arc::new(move |dir, bytes| {
            seen2.lock().unwrap().push((dir, bytes.to_vec()));
        });
        let mut buf = ByteBuffer::with_hook(64, hook);
        buf.append(b"hello");
        let mut t = FakeTransport::new();
        let n = buf.write_to(&mut t).unwrap();
        assert_eq!(n, 5);
        assert!(buf.is_empty());
        let log = seen.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, Direction::ToDevice);
        assert_eq!(log[0].1, b"hello");
    }
}
