use crate::node_graph::{BlockId, NodeId};

/// Change notifications for whoever drives the graph (GUI, persistence).
/// Delivered synchronously, in the order the changes happen.
#[derive(Clone, Debug, PartialEq)]
pub enum GraphEvent {
    /// The focused block changed; carries the newly focused block, if any.
    FocusChanged { focused: Option<BlockId> },
    BlockInstanceCountChanged { count: usize },
    DisplayedGroupChanged { group: String },
    /// The focused node changed; carries the newly focused node, if any.
    NodeFocusChanged { focused: Option<NodeId> },
    ConnectionChanged {
        output: NodeId,
        input: NodeId,
        connected: bool,
    },
}

pub type Listener = Box<dyn FnMut(&GraphEvent)>;

#[derive(Default)]
pub struct EventListeners {
    listeners: Vec<Listener>,
}

impl EventListeners {
    pub fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    pub fn emit(&mut self, event: GraphEvent) {
        for listener in self.listeners.iter_mut() {
            listener(&event);
        }
    }
}

impl std::fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventListeners({})", self.listeners.len())
    }
}
