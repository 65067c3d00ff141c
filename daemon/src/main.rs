//! Entry point wiring config, logging, and the cooperative event loop
//! together. The client-facing socket protocol and admin CLI live outside
//! this engine — `LoggingClientSink` below stands in for them, recording
//! completions as structured log events instead of routing them to a real
//! connection.

mod config;

use std::sync::Arc;

use pmd_engine::{Action, ClientSink, ErrorCode, EventLoop};
use tracing_subscriber::EnvFilter;

struct LoggingClientSink;

impl ClientSink for LoggingClientSink {
    fn reply(&self, action: &Action) {
        tracing::info!(
            client = action.client_id.0,
            seq = action.seq,
            command = %action.command,
            "action completed"
        );
    }

    fn errmsg(&self, action: &Action, code: ErrorCode) {
        tracing::warn!(
            client = action.client_id.0,
            seq = action.seq,
            command = %action.command,
            ?code,
            "action failed"
        );
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "pmd.toml".to_owned());

    let registry = config::load(&config_path)?;
    tracing::info!(devices = registry.len(), path = %config_path, "configuration loaded");

    let mut event_loop = EventLoop::new(registry, Arc::new(LoggingClientSink));
    event_loop.run_forever().await
}
