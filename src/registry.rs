//! Targeting and fan-out (`apply_action`).
//!
//! Owns every configured [`Device`] and is the single place that mutates
//! any of them — the event loop borrows it exclusively, so no locking is
//! needed.

use pmd_protocol::Command;

use crate::action::{Action, ClientId};
use crate::device::Device;
use crate::error::EngineError;

/// A client-submitted request before fan-out: a command, an optional
/// host-list of node names to target, and the identity needed to route the
/// eventual reply.
pub struct ClientRequest {
    pub command: Command,
    pub client_id: ClientId,
    pub seq: u64,
    /// Node names the client wants addressed; `None`/empty for commands
    /// that take no target (`LogIn`, `LogOut`).
    pub hosts: Vec<String>,
}

impl ClientRequest {
    pub fn new(command: Command, client_id: ClientId, seq: u64) -> Self {
        ClientRequest {
            command,
            client_id,
            seq,
            hosts: Vec::new(),
        }
    }

    pub fn with_hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = hosts;
        self
    }
}

#[derive(Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    pub fn insert(&mut self, device: Device) {
        self.devices.push(device);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.iter_mut()
    }

    pub fn find(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.name == name)
    }

    /// Like [`Self::find`], but for the programmer-facing misuse case:
    /// looking a device up by a name that isn't in the registry at all is a
    /// caller bug, not a device-health event, so it gets a real `Result`
    /// instead of being swallowed.
    pub fn get(&self, name: &str) -> Result<&Device, EngineError> {
        self.find(name)
            .ok_or_else(|| EngineError::UnknownDevice(name.to_owned()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Device, EngineError> {
        self.find_mut(name)
            .ok_or_else(|| EngineError::UnknownDevice(name.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Expands `request` across every device and returns the number of
    /// actions queued (possibly across multiple devices); a `LogIn`
    /// preemption at the head of a queue counts as one action queued too.
    pub fn apply_action(&mut self, request: &ClientRequest) -> usize {
        let mut queued = 0;
        for device in &mut self.devices {
            if !device.is_logged_in() && request.command != Command::LogIn {
                // Rejected at fan-out: a command issued before login
                // completes is dropped silently, no client reply.
                continue;
            }
            if !device.supports(request.command) {
                continue;
            }

            match request.command {
                Command::LogIn => {
                    device.queue_login();
                    queued += 1;
                }
                Command::LogOut => {
                    device.push_action(Action::new(
                        Command::LogOut,
                        request.client_id,
                        request.seq,
                    ));
                    queued += 1;
                }
                _ => {
                    queued += selective_fanout(device, request);
                }
            }
        }
        queued
    }
}

/// The selective fan-out algorithm: collapse to the device's "all"
/// shorthand only when every plug, including unbound ones, is covered by
/// the host-list; otherwise enqueue one action per matched plug, in
/// plug-declaration order.
fn selective_fanout(device: &mut Device, request: &ClientRequest) -> usize {
    let mut all_match = true;
    let mut any_match = false;
    let mut pending = Vec::new();

    for plug in &device.plugs {
        match plug.node {
            None => {
                all_match = false;
            }
            Some(node_id) => {
                let node_name = &device.nodes.get(node_id).name;
                if request.hosts.iter().any(|h| h == node_name) {
                    any_match = true;
                    pending.push(plug.name.clone());
                } else {
                    all_match = false;
                }
            }
        }
    }

    let template = Action::new(request.command, request.client_id, request.seq);
    if all_match {
        device.push_action(template.derive(Some(device.all_shorthand.clone())));
        1
    } else if any_match {
        let n = pending.len();
        for plug_name in pending {
            device.push_action(template.derive(Some(plug_name)));
        }
        n
    } else {
        0
    }
}
