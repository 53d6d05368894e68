use super::matrix::ColorMatrix;
use crate::models::schema::{MergeMode, Size};
use crate::node_graph::BlockId;

/// Stable handle of a node: the owning block plus the node's index in it.
/// Resolving a handle whose block was deleted yields `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub block: BlockId,
    pub index: usize,
}

impl NodeId {
    pub fn new(block: BlockId, index: usize) -> Self {
        Self { block, index }
    }
}

/// Notifications a node delivers to its owning block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeEvent {
    /// Input: merged data from the connected outputs changed.
    DataChanged,
    /// Output: the negotiated requested size changed.
    RequestedSizeChanged,
    /// Active state changed (output: any consumer active; input: set by block).
    ActiveChanged,
    /// A peer connection was added or removed.
    ConnectionChanged,
    /// Input with impulse detection: value rose above the trigger threshold.
    ImpulseBegin,
    /// Input with impulse detection: value fell below the trigger threshold.
    ImpulseEnd,
}

/// An input or output terminal of a block.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) is_output: bool,
    pub(crate) connected: Vec<NodeId>,
    pub(crate) sharing_requested_size: Vec<NodeId>,
    pub(crate) sharing_active_state: Vec<NodeId>,
    pub(crate) active: bool,
    pub(crate) merge_mode: MergeMode,
    pub(crate) requested_size: Size,
    pub(crate) data: ColorMatrix,
    pub(crate) impulse_detection: bool,
    pub(crate) impulse_active: bool,
    pub(crate) impulse_remaining: Option<f64>,
}

impl Node {
    pub(crate) fn new(index: usize, name: impl Into<String>, is_output: bool) -> Self {
        Self {
            index,
            name: name.into(),
            is_output,
            connected: Vec::new(),
            sharing_requested_size: Vec::new(),
            sharing_active_state: Vec::new(),
            // an output only becomes active once a consumer asks for it
            active: !is_output,
            merge_mode: MergeMode::Htp,
            requested_size: Size::default(),
            data: ColorMatrix::new(),
            impulse_detection: false,
            impulse_active: false,
            impulse_remaining: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_output(&self) -> bool {
        self.is_output
    }

    pub fn is_input(&self) -> bool {
        !self.is_output
    }

    pub fn is_connected(&self) -> bool {
        !self.connected.is_empty()
    }

    /// Peers in connection order.
    pub fn connected_nodes(&self) -> &[NodeId] {
        &self.connected
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn merge_mode(&self) -> MergeMode {
        self.merge_mode
    }

    pub fn htp_mode(&self) -> bool {
        self.merge_mode == MergeMode::Htp
    }

    pub fn requested_size(&self) -> Size {
        self.requested_size
    }

    pub fn data(&self) -> &ColorMatrix {
        &self.data
    }

    pub fn value(&self) -> f64 {
        self.data.value()
    }

    /// Absolute value with a default maximum of 1.
    pub fn absolute_value(&self) -> f64 {
        self.data.absolute_value(1.0)
    }

    pub fn impulse_detection_enabled(&self) -> bool {
        self.impulse_detection
    }
}
