use tokio::time::Instant;

use pmd_protocol::Command;

/// Opaque identity of the client that originated an action, paired with a
/// sequence number so multiple in-flight requests from the same client can
/// be told apart. Both fields are just carried through — this crate never
/// inspects them beyond identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// Failure code delivered to a client via [`crate::client::ClientSink::errmsg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// An `Expect` step exceeded the device's `per_command_timeout`.
    Timeout,
}

/// A unit of work queued on exactly one device.
///
/// An `Action` lives on exactly one device's queue; `cursor` stays `None`
/// until the first script step on it begins, then is set for the remainder
/// of its life.
#[derive(Debug, Clone)]
pub struct Action {
    pub command: Command,
    pub client_id: ClientId,
    pub seq: u64,
    pub target: Option<String>,
    pub cursor: Option<usize>,
    pub time_stamp: Option<Instant>,
    pub error: bool,
}

impl Action {
    pub fn new(command: Command, client_id: ClientId, seq: u64) -> Self {
        Action {
            command,
            client_id,
            seq,
            target: None,
            cursor: None,
            time_stamp: None,
            error: false,
        }
    }

    /// Derive a fresh action for the same device, copying client identity
    /// but not cursor/timing state — used by fan-out when one client action
    /// expands into several per-device or per-plug actions.
    pub fn derive(&self, target: Option<String>) -> Self {
        Action {
            command: self.command,
            client_id: self.client_id,
            seq: self.seq,
            target,
            cursor: None,
            time_stamp: None,
            error: false,
        }
    }
}
