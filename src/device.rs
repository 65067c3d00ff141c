//! The per-device state machine: connection lifecycle, script interpreter,
//! and response classification. One `Device` owns everything needed to
//! drive one appliance; the event loop (`eventloop.rs`) is the only code
//! that calls into it, once per device per wakeup.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use pmd_protocol::{Command, Interpretation, Protocol, ScriptElement, SendTemplate};
use regex::bytes::Regex;

use crate::action::{Action, ClientId, ErrorCode};
use crate::buffer::{ByteBuffer, Direction};
use crate::client::ClientSink;
use crate::node::{NodeTable, PowerState};
use crate::plug::Plug;
use crate::transport::{Connector, Transport};

/// Seconds to wait before the k-th reconnect attempt (k >= 1), saturating
/// at the last entry. Index 0 is used only to mean "no wait" for the very
/// first attempt.
const BACKOFF: [u64; 7] = [1, 2, 4, 8, 15, 30, 60];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    NotConnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepFlag {
    Idle,
    Expecting,
    Sending,
    Delaying,
}

enum StepOutcome {
    /// No further progress possible this tick; wait for more I/O or a
    /// deadline.
    Stalled,
    /// The element finished; the driver may advance to the next one.
    Progressed,
    /// The action was terminated out-of-band (timeout) and the device may
    /// have disconnected; the driver loop must stop immediately.
    Aborted,
}

enum ReadOutcome {
    WouldBlock,
    Data,
    Eof,
    Error,
}

/// One managed appliance.
pub struct Device {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub protocol: Arc<Protocol>,
    pub plugs: Vec<Plug>,
    pub nodes: NodeTable,
    pub all_shorthand: String,
    pub on_regex: Arc<Regex>,
    pub off_regex: Arc<Regex>,
    pub per_command_timeout: Duration,
    /// Whether resetting `reconnect_count` after an expect timeout is
    /// fast-recovery or thrash is a per-device judgment call; defaults to
    /// fast-recovery (`true`).
    pub reset_reconnect_on_timeout: bool,

    connector: Arc<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    connect_status: ConnectStatus,
    step: StepFlag,
    logged_in: bool,
    recv_buffer: ByteBuffer,
    send_buffer: ByteBuffer,
    action_queue: VecDeque<Action>,
    last_event_time: Instant,
    reconnect_count: u32,
    /// Earliest deadline (expect timeout or delay expiry) the event loop
    /// must not sleep past; recomputed every tick.
    pending_deadline: Option<Instant>,
}

impl Device {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        protocol: Arc<Protocol>,
        plugs: Vec<Plug>,
        all_shorthand: impl Into<String>,
        on_regex: Arc<Regex>,
        off_regex: Arc<Regex>,
        per_command_timeout: Duration,
        buffer_capacity: usize,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let name = name.into();
        let recv_buffer = ByteBuffer::with_hook(buffer_capacity, telemetry_hook(name.clone()));
        let send_buffer = ByteBuffer::with_hook(buffer_capacity, telemetry_hook(name.clone()));
        Device {
            name,
            host: host.into(),
            port,
            protocol,
            plugs,
            nodes: NodeTable::new(),
            all_shorthand: all_shorthand.into(),
            on_regex,
            off_regex,
            per_command_timeout,
            reset_reconnect_on_timeout: true,
            connector,
            transport: None,
            connect_status: ConnectStatus::NotConnected,
            step: StepFlag::Idle,
            logged_in: false,
            recv_buffer,
            send_buffer,
            action_queue: VecDeque::new(),
            last_event_time: Instant::now(),
            reconnect_count: 0,
            pending_deadline: None,
        }
    }

    pub fn connect_status(&self) -> ConnectStatus {
        self.connect_status
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn supports(&self, command: Command) -> bool {
        self.protocol.supports(command)
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    pub fn queue_len(&self) -> usize {
        self.action_queue.len()
    }

    /// Append a new action to the tail of this device's queue.
    pub fn push_action(&mut self, action: Action) {
        self.action_queue.push_back(action);
    }

    /// Rewind the head action (if any) and prepend a fresh `LogIn`, exactly
    /// what both `apply_action`'s `PM_LOG_IN` branch and a freshly completed
    /// connect do.
    pub fn queue_login(&mut self) {
        if let Some(head) = self.action_queue.front_mut() {
            head.cursor = None;
            head.time_stamp = None;
        }
        self.action_queue
            .push_front(Action::new(Command::LogIn, ClientId(0), 0));
    }

    fn backoff_interval(count: u32) -> u64 {
        if count == 0 {
            0
        } else {
            BACKOFF[(count as usize - 1).min(BACKOFF.len() - 1)]
        }
    }

    fn due_at(&self) -> Instant {
        self.last_event_time + Duration::from_secs(Self::backoff_interval(self.reconnect_count))
    }

    pub fn is_due_for_reconnect(&self, now: Instant) -> bool {
        self.connect_status == ConnectStatus::NotConnected && now >= self.due_at()
    }

    async fn resolve(&self) -> io::Result<std::net::SocketAddr> {
        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port)).await?;
        addrs
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"))
    }

    /// Open a fresh connection. Must only be called while `NotConnected`.
    /// Always stamps `last_event_time` and increments `reconnect_count`,
    /// win or lose.
    pub async fn reconnect(&mut self) -> io::Result<()> {
        debug_assert_eq!(self.connect_status, ConnectStatus::NotConnected);
        self.reconnect_count += 1;
        self.last_event_time = Instant::now();
        self.connect_status = ConnectStatus::Connecting;
        tracing::info!(device = %self.name, attempt = self.reconnect_count, "connecting");

        let addr = match self.resolve().await {
            Ok(addr) => addr,
            Err(e) => {
                self.connect_status = ConnectStatus::NotConnected;
                tracing::warn!(device = %self.name, error = %e, "address resolution failed");
                return Err(e);
            }
        };

        match self.connector.connect(addr).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.connect_status = ConnectStatus::Connected;
                self.recv_buffer.clear();
                self.send_buffer.clear();
                self.step = StepFlag::Idle;
                self.queue_login();
                tracing::info!(device = %self.name, "connected");
                Ok(())
            }
            Err(e) => {
                self.connect_status = ConnectStatus::NotConnected;
                tracing::warn!(device = %self.name, error = %e, "connect failed");
                Err(e)
            }
        }
    }

    /// Idempotent (L3): a second call with nothing open is a no-op.
    pub fn disconnect(&mut self) {
        if self.transport.is_none() && self.connect_status == ConnectStatus::NotConnected {
            return;
        }
        tracing::info!(device = %self.name, "disconnected");
        self.transport = None;
        self.connect_status = ConnectStatus::NotConnected;
        self.step = StepFlag::Idle;
        self.logged_in = false;
        self.recv_buffer.clear();
        self.send_buffer.clear();
        self.pending_deadline = None;
        if matches!(self.action_queue.front(), Some(a) if a.command == Command::LogIn) {
            self.action_queue.pop_front();
        }
    }

    fn disconnect_with_io_error(&mut self) {
        self.disconnect();
        self.reconnect_count = 0;
    }

    fn handle_read(&mut self) -> ReadOutcome {
        let Some(transport) = self.transport.as_mut() else {
            return ReadOutcome::WouldBlock;
        };
        match self.recv_buffer.read_from(transport.as_mut()) {
            Ok(0) => {
                self.disconnect_with_io_error();
                ReadOutcome::Eof
            }
            Ok(_) => ReadOutcome::Data,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(_) => {
                self.disconnect_with_io_error();
                ReadOutcome::Error
            }
        }
    }

    fn handle_write(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match self.send_buffer.write_to(transport.as_mut()) {
            Ok(_) => {
                if self.send_buffer.is_empty() && self.step == StepFlag::Sending {
                    self.step = StepFlag::Idle;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(_) => self.disconnect_with_io_error(),
        }
    }

    /// Drive this device one tick: reconnect if due, pump I/O, advance the
    /// head action's script as far as it will go. Safe to call every event
    /// loop wakeup regardless of which readiness fired — non-blocking
    /// operations that aren't actually ready just no-op.
    pub async fn tick(&mut self, sink: &dyn ClientSink) {
        if self.transport.is_none() {
            if self.is_due_for_reconnect(Instant::now()) {
                let _ = self.reconnect().await;
            }
            return;
        }

        if matches!(self.handle_read(), ReadOutcome::Eof | ReadOutcome::Error) {
            return;
        }
        if self.transport.is_none() {
            return;
        }

        self.handle_write();
        if self.transport.is_none() {
            return;
        }

        self.pending_deadline = None;
        self.process_script(sink);
    }

    /// Wait until this device has something worth ticking over: socket
    /// readiness, or a reconnect/expect/delay deadline.
    pub async fn wait_ready(&self) {
        let Some(transport) = self.transport.as_deref() else {
            tokio::time::sleep_until(self.due_at()).await;
            return;
        };
        let want_write = !self.send_buffer.is_empty();
        let deadline = self.pending_deadline;
        tokio::select! {
            _ = transport.readable() => {}
            _ = transport.writable(), if want_write => {}
            _ = sleep_until_opt(deadline) => {}
        }
    }

    fn merge_deadline(&mut self, deadline: Instant) {
        self.pending_deadline = Some(match self.pending_deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
    }

    fn process_script(&mut self, sink: &dyn ClientSink) {
        loop {
            let Some(action) = self.action_queue.front() else {
                return;
            };
            let command = action.command;
            let cursor = action.cursor;

            let protocol = Arc::clone(&self.protocol);
            let Some(script) = protocol.script(command) else {
                // Fan-out already checked support; defensive drop only.
                self.action_queue.pop_front();
                continue;
            };
            let index = cursor.unwrap_or(0);
            let element = match script.get(index) {
                Some(e) => e.clone(),
                None => {
                    self.finish_action(sink);
                    continue;
                }
            };
            let script_len = script.len();

            let outcome = match &element {
                ScriptElement::Send(template) => self.process_send(template),
                ScriptElement::Expect {
                    regex,
                    interpretation,
                } => self.process_expect(regex, interpretation.as_deref(), sink),
                ScriptElement::Delay(duration) => self.process_delay(*duration),
            };

            match outcome {
                StepOutcome::Stalled | StepOutcome::Aborted => return,
                StepOutcome::Progressed => {
                    let next = index + 1;
                    let front = match self.action_queue.front_mut() {
                        Some(a) => a,
                        None => return,
                    };
                    if front.error || next >= script_len {
                        self.finish_action(sink);
                    } else {
                        front.cursor = Some(next);
                    }
                }
            }
        }
    }

    fn finish_action(&mut self, sink: &dyn ClientSink) {
        let Some(action) = self.action_queue.pop_front() else {
            return;
        };
        if action.command == Command::LogIn {
            if !action.error {
                self.logged_in = true;
                self.reconnect_count = 0;
                tracing::debug!(device = %self.name, "login complete");
            }
        } else if action.error {
            sink.errmsg(&action, ErrorCode::Timeout);
        } else {
            sink.reply(&action);
        }
    }

    fn process_send(&mut self, template: &SendTemplate) -> StepOutcome {
        let target = self
            .action_queue
            .front()
            .expect("head present")
            .target
            .clone();
        let rendered = template
            .render(target.as_deref())
            .expect("target requirement validated at fan-out time");
        self.send_buffer.append(rendered.as_bytes());
        self.step = StepFlag::Sending;
        StepOutcome::Progressed
    }

    fn process_expect(
        &mut self,
        regex: &Regex,
        interpretation: Option<&Interpretation>,
        sink: &dyn ClientSink,
    ) -> StepOutcome {
        let now = Instant::now();
        {
            let action = self.action_queue.front_mut().expect("head present");
            if action.time_stamp.is_none() {
                action.time_stamp = Some(now);
            }
        }
        self.step = StepFlag::Expecting;

        if let Some(end) = self.recv_buffer.peek_regex_end(regex) {
            let matched = self.recv_buffer.as_bytes()[..end].to_vec();
            let command = self.action_queue.front().expect("head present").command;
            if command.is_query() {
                if let Some(interp) = interpretation {
                    self.apply_interpretation(regex, interp, &matched);
                }
            }
            self.recv_buffer.consume(end);
            self.step = StepFlag::Idle;
            return StepOutcome::Progressed;
        }

        let time_stamp = self
            .action_queue
            .front()
            .expect("head present")
            .time_stamp
            .expect("stamped above");
        let deadline = time_stamp + self.per_command_timeout;
        if now < deadline {
            self.merge_deadline(deadline);
            return StepOutcome::Stalled;
        }

        let mut action = self.action_queue.pop_front().expect("head present");
        action.error = true;
        tracing::debug!(device = %self.name, command = %action.command, "expect timed out");
        sink.errmsg(&action, ErrorCode::Timeout);
        self.step = StepFlag::Idle;
        self.pending_deadline = None;
        self.disconnect();
        if self.reset_reconnect_on_timeout {
            self.reconnect_count = 0;
        }
        StepOutcome::Aborted
    }

    fn process_delay(&mut self, duration: Duration) -> StepOutcome {
        let now = Instant::now();
        let action = self.action_queue.front_mut().expect("head present");
        let deadline = match action.time_stamp {
            Some(ts) => ts + duration,
            None => {
                action.time_stamp = Some(now);
                now + duration
            }
        };
        self.step = StepFlag::Delaying;
        if now >= deadline {
            self.step = StepFlag::Idle;
            StepOutcome::Progressed
        } else {
            self.merge_deadline(deadline);
            StepOutcome::Stalled
        }
    }

    /// Classify each interpreted capture against `on_regex`/`off_regex` and
    /// write the result into the bound node. Off wins when both match —
    /// an explicit rule here, not an accident of evaluation order.
    fn apply_interpretation(&mut self, regex: &Regex, interp: &Interpretation, matched: &[u8]) {
        let command = self.action_queue.front().expect("head present").command;
        let Some(caps) = regex.captures(matched) else {
            return;
        };
        for mapping in &interp.mappings {
            let Some(plug) = self.plugs.get(mapping.plug_index) else {
                continue;
            };
            let Some(node_id) = plug.node else {
                continue;
            };
            let Some(group) = caps.get(mapping.capture_index) else {
                continue;
            };
            let token = first_token(group.as_bytes());
            let state = self.classify(token);
            let node = self.nodes.get_mut(node_id);
            match command {
                Command::UpdatePlugs => node.plug_state = state,
                Command::UpdateNodes => node.node_state = state,
                _ => {}
            }
        }
    }

    fn classify(&self, token: &[u8]) -> PowerState {
        let mut state = PowerState::Unknown;
        if self.on_regex.is_match(token) {
            state = PowerState::On;
        }
        if self.off_regex.is_match(token) {
            state = PowerState::Off;
        }
        state
    }

    /// Force `logged_in` without driving an actual script, for tests that
    /// only exercise fan-out or I/O logic downstream of login state.
    #[cfg(test)]
    pub(crate) fn mark_logged_in_for_test(&mut self) {
        self.logged_in = true;
    }
}

/// Builds the default telemetry hook: one `tracing::trace!` event per
/// append/drain, tagged with the device name and direction — analogous to
/// a classic `S(name)`/`D(name)` line-protocol log.
fn telemetry_hook(device_name: String) -> crate::buffer::TelemetryHook {
    Arc::new(move |dir: Direction, bytes: &[u8]| {
        tracing::trace!(
            device = %device_name,
            direction = ?dir,
            bytes = bytes.len(),
            "buffer io"
        );
    })
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => futures::future::pending::<()>().await,
    }
}

fn first_token(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| b.is_ascii_whitespace()) {
        Some(idx) => &bytes[..idx],
        None => bytes,
    }
}
