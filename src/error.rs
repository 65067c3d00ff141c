use thiserror::Error;

/// Programmer-facing errors from the engine's public entry points.
///
/// Protocol-level failures (expect timeout, connection loss) are *not*
/// represented here — they are handled internally and surfaced to the
/// client only via [`crate::client::ClientSink`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no device named '{0}' in the registry")]
    UnknownDevice(String),
}
