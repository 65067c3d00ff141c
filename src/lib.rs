//! Device-driver engine for a remote power-management daemon: the
//! per-device connection/script state machine, action fan-out, and the
//! event-loop adapter that drives every device from one cooperative,
//! single-threaded task.
//!
//! Configuration parsing, the client-facing socket protocol, and
//! daemonization live in the `daemon` binary crate; this crate only knows
//! about devices, protocols, and actions once they already exist.

pub mod action;
pub mod buffer;
pub mod client;
pub mod device;
pub mod error;
pub mod eventloop;
pub mod node;
pub mod plug;
pub mod registry;
pub mod transport;

pub use action::{Action, ClientId, ErrorCode};
pub use client::ClientSink;
pub use device::{ConnectStatus, Device};
pub use error::EngineError;
pub use eventloop::EventLoop;
pub use node::{Node, NodeId, NodeTable, PowerState};
pub use plug::Plug;
pub use registry::{ClientRequest, DeviceRegistry};
pub use transport::{Connector, TcpConnector, Transport};
