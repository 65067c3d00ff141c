//! Upward interface to the client-facing layer. The client socket protocol
//! itself lives outside this crate; the engine only needs to deliver
//! completions and timeouts keyed by the action that produced them.

use crate::action::{Action, ErrorCode};

/// Implemented by whatever owns the client connections. `pmd-test-support`'s
/// `ChannelClientSink` (backed by `tokio::sync::mpsc`) is the implementation
/// used by this crate's own tests and the daemon's integration tests; the
/// daemon binary instead logs every completion/timeout via `tracing`
/// (`LoggingClientSink`), since the real client-facing socket layer is out
/// of scope here.
pub trait ClientSink: Send + Sync {
    /// Deliver a successful completion for `action` to `(action.client_id,
    /// action.seq)`. Never called for a `LogIn` action.
    fn reply(&self, action: &Action);

    /// Deliver a failure for `action` with `code`.
    fn errmsg(&self, action: &Action, code: ErrorCode);
}

/// A sink that discards everything — useful where no client observation is
/// needed, e.g. driving a device purely for its side effects in a test.
pub struct NullClientSink;

impl ClientSink for NullClientSink {
    fn reply(&self, _action: &Action) {}
    fn errmsg(&self, _action: &Action, _code: ErrorCode) {}
}
