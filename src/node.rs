//! Managed nodes and their reported power/query state.
//!
//! A node may be bound to at most one plug across the fleet; the binding
//! itself lives on [`crate::plug::Plug`] as a non-owning handle into a
//! `NodeTable` so there is no ownership cycle between plugs and nodes.

use std::fmt;

/// Opaque handle into a [`NodeTable`]. Plain index newtype — no reference
/// counting, no lifetime, so it can be copied freely onto every `Plug` that
/// is bound to the node it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Classification produced by running a device's `on_regex`/`off_regex`
/// against a captured response fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    #[default]
    Unknown,
    On,
    Off,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Unknown => write!(f, "unknown"),
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
        }
    }
}

/// A managed host. `plug_state` and `node_state` are refreshed by
/// `UPDATE_PLUGS`/`UPDATE_NODES` respectively; they are two independent
/// readings of the same physical outlet, not one value viewed two ways —
/// the upstream protocol can (and does) ask for either.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub plug_state: PowerState,
    pub node_state: PowerState,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            plug_state: PowerState::Unknown,
            node_state: PowerState::Unknown,
        }
    }
}

/// Owns every [`Node`] known to one device. Plugs reference nodes only by
/// [`NodeId`].
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    nodes: Vec<Node>,
}

impl NodeTable {
    pub fn new() -> Self {
        NodeTable::default()
    }

    pub fn insert(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }
}
