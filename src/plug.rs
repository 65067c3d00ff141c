use crate::node::NodeId;

/// A controllable outlet on a device. `node` is `None` when the plug exists
/// physically but is not wired to anything this daemon manages — such a
/// plug forbids the device's "all" shorthand, because broadcasting to it
/// would silently perturb equipment outside the daemon's view.
#[derive(Debug, Clone)]
pub struct Plug {
    pub name: String,
    pub node: Option<NodeId>,
}

impl Plug {
    pub fn new(name: impl Into<String>, node: Option<NodeId>) -> Self {
        Plug {
            name: name.into(),
            node,
        }
    }
}
