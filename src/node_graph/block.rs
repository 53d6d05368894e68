//! Block behavior seam.
//!
//! A block type is a factory that declares its nodes on a [`BlockBuilder`]
//! and returns the behavior object. The graph owns the nodes; the behavior
//! only ever sees them through a [`BlockContext`] while one of its hooks
//! runs, so handlers can write outputs and the resulting propagation
//! happens before the hook returns.

use serde_json::Value;

use super::graph::Graph;
use super::matrix::ColorMatrix;
use super::node::{Node, NodeEvent, NodeId};
use super::BlockId;
use crate::models::schema::{empty_object, MergeMode, Size};

pub trait Block {
    /// Called for every notification of one of this block's nodes.
    fn on_node_event(&mut self, _ctx: &mut BlockContext<'_>, _node: usize, _event: NodeEvent) {}

    /// Called once per engine tick with the elapsed time in seconds.
    fn tick(&mut self, _ctx: &mut BlockContext<'_>, _elapsed: f64) {}

    /// Blocks that must always exist (e.g. a project's master output)
    /// return false.
    fn may_be_removed(&self) -> bool {
        true
    }

    /// Block-specific state for persistence, a JSON object.
    fn state(&self) -> Value {
        empty_object()
    }

    fn set_state(&mut self, _ctx: &mut BlockContext<'_>, _state: &Value) {}

    fn on_focus(&mut self) {}

    fn on_defocus(&mut self) {}

    /// Last call before the block's nodes are disconnected and dropped.
    fn on_remove(&mut self, _ctx: &mut BlockContext<'_>) {}
}

pub type BlockFactory = fn(&mut BlockBuilder) -> Box<dyn Block>;

/// Collects the nodes a block declares while it is being constructed.
#[derive(Default)]
pub struct BlockBuilder {
    pub(crate) nodes: Vec<Node>,
    pub(crate) requested_size_shares: Vec<(usize, usize)>,
    pub(crate) active_state_shares: Vec<(usize, usize)>,
}

impl BlockBuilder {
    /// Declares an input node and returns its index.
    pub fn create_input(&mut self, name: &str) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Node::new(index, name, false));
        index
    }

    /// Declares an output node and returns its index.
    pub fn create_output(&mut self, name: &str) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Node::new(index, name, true));
        index
    }

    /// The input's requested size follows whatever the output negotiates.
    pub fn share_requested_size(&mut self, output: usize, input: usize) {
        self.requested_size_shares.push((output, input));
    }

    /// The input is active exactly when the output is.
    pub fn share_active_state(&mut self, output: usize, input: usize) {
        self.active_state_shares.push((output, input));
    }

    pub fn enable_impulse_detection(&mut self, input: usize) {
        if let Some(node) = self.nodes.get_mut(input) {
            node.impulse_detection = true;
        }
    }

    pub fn set_merge_mode(&mut self, input: usize, mode: MergeMode) {
        if let Some(node) = self.nodes.get_mut(input) {
            node.merge_mode = mode;
        }
    }
}

/// A block's view of the graph while one of its hooks runs.
pub struct BlockContext<'a> {
    graph: &'a mut Graph,
    block: BlockId,
}

impl<'a> BlockContext<'a> {
    pub(crate) fn new(graph: &'a mut Graph, block: BlockId) -> Self {
        Self { graph, block }
    }

    pub fn block_id(&self) -> BlockId {
        self.block
    }

    pub fn uid(&self) -> &str {
        self.graph.block_uid(self.block).unwrap_or_default()
    }

    pub fn node_id(&self, index: usize) -> NodeId {
        NodeId::new(self.block, index)
    }

    pub fn node(&self, index: usize) -> Option<&Node> {
        self.graph.node(self.node_id(index))
    }

    pub fn node_count(&self) -> usize {
        self.graph.nodes_of(self.block).len()
    }

    pub fn graph(&self) -> &Graph {
        &*self.graph
    }

    // -------------------- Reading ---------------------

    pub fn data(&self, index: usize) -> Option<&ColorMatrix> {
        self.node(index).map(Node::data)
    }

    pub fn value(&self, index: usize) -> f64 {
        self.node(index).map_or(0.0, Node::value)
    }

    pub fn absolute_value(&self, index: usize) -> f64 {
        self.node(index).map_or(0.0, Node::absolute_value)
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.node(index).map_or(false, Node::is_active)
    }

    pub fn requested_size(&self, index: usize) -> Size {
        self.node(index).map_or_else(Size::default, Node::requested_size)
    }

    // -------------------- Writing outputs ---------------------

    pub fn set_value(&mut self, output: usize, value: f64) {
        self.graph.set_value(self.node_id(output), value);
    }

    pub fn set_absolute_value(&mut self, output: usize, value: f64) {
        self.graph.set_absolute_value(self.node_id(output), value);
    }

    pub fn set_hsv(&mut self, output: usize, h: f64, s: f64, v: f64) {
        let id = self.node_id(output);
        self.graph.modify_data(id, |data| data.set_hsv(h, s, v));
    }

    pub fn set_hsv_at(&mut self, output: usize, x: usize, y: usize, h: f64, s: f64, v: f64) {
        let id = self.node_id(output);
        self.graph.modify_data(id, |data| data.set_hsv_at(x, y, h, s, v));
    }

    pub fn set_rgb(&mut self, output: usize, r: f64, g: f64, b: f64) {
        let id = self.node_id(output);
        self.graph.modify_data(id, |data| data.set_rgb(r, g, b));
    }

    pub fn set_rgb_at(&mut self, output: usize, x: usize, y: usize, r: f64, g: f64, b: f64) {
        let id = self.node_id(output);
        self.graph.modify_data(id, |data| data.set_rgb_at(x, y, r, g, b));
    }

    /// Arbitrary in-place edit of an output's data, followed by propagation.
    pub fn modify_data(&mut self, output: usize, edit: impl FnOnce(&mut ColorMatrix)) -> bool {
        self.graph.modify_data(self.node_id(output), edit)
    }

    pub fn data_was_modified(&mut self, output: usize) {
        self.graph.data_was_modified(self.node_id(output));
    }

    pub fn send_impulse(&mut self, output: usize) {
        self.graph.send_impulse(self.node_id(output));
    }

    // -------------------- Negotiation ---------------------

    pub fn set_requested_size(&mut self, input: usize, size: Size) -> bool {
        self.graph.set_requested_size(self.node_id(input), size)
    }

    pub fn set_active(&mut self, input: usize, active: bool) -> bool {
        self.graph.set_active(self.node_id(input), active)
    }

    pub fn share_requested_size(&mut self, output: usize, input: usize) -> bool {
        let (output, input) = (self.node_id(output), self.node_id(input));
        self.graph.share_requested_size(output, input)
    }

    pub fn share_active_state(&mut self, output: usize, input: usize) -> bool {
        let (output, input) = (self.node_id(output), self.node_id(input));
        self.graph.share_active_state(output, input)
    }
}
