//! Arena of block instances and the connection logic between their nodes.
//!
//! Everything here is synchronous: a write to an output reaches every
//! connected input, and every block handler that reacts to it, before the
//! writing call returns.

use std::collections::{HashMap, VecDeque};

use petgraph::algo::{has_path_connecting, is_cyclic_directed};
use petgraph::graphmap::DiGraphMap;
use slotmap::SlotMap;

use super::block::{Block, BlockBuilder, BlockContext, BlockFactory};
use super::matrix::ColorMatrix;
use super::node::{Node, NodeEvent, NodeId};
use super::BlockId;
use crate::events::{EventListeners, GraphEvent, Listener};
use crate::models::schema::{ConnectionRef, MergeMode, NodeUid, Size};
use crate::settings::GraphSettings;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BlockGeometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

pub(crate) struct BlockSlot {
    pub(crate) uid: String,
    pub(crate) type_name: String,
    pub(crate) nodes: Vec<Node>,
    /// `None` while one of the block's hooks is running.
    behavior: Option<Box<dyn Block>>,
    pending: VecDeque<(usize, NodeEvent)>,
    pub(crate) group: String,
    pub(crate) geometry: BlockGeometry,
}

impl BlockSlot {
    fn new(
        id: BlockId,
        uid: String,
        type_name: String,
        builder: BlockBuilder,
        behavior: Box<dyn Block>,
    ) -> Self {
        let BlockBuilder {
            mut nodes,
            requested_size_shares,
            active_state_shares,
        } = builder;
        for (output, input) in requested_size_shares {
            if valid_share(&nodes, output, input) {
                nodes[output]
                    .sharing_requested_size
                    .push(NodeId::new(id, input));
            }
        }
        for (output, input) in active_state_shares {
            if valid_share(&nodes, output, input) {
                nodes[output].sharing_active_state.push(NodeId::new(id, input));
                nodes[input].active = nodes[output].active;
            }
        }
        Self {
            uid,
            type_name,
            nodes,
            behavior: Some(behavior),
            pending: VecDeque::new(),
            group: String::new(),
            geometry: BlockGeometry::default(),
        }
    }
}

fn valid_share(nodes: &[Node], output: usize, input: usize) -> bool {
    let ok = matches!(
        (nodes.get(output), nodes.get(input)),
        (Some(o), Some(i)) if o.is_output && !i.is_output
    );
    if !ok {
        log::warn!(
            "[NodeGraph] Ignoring share between nodes {} and {}: needs an output and an input",
            output,
            input
        );
    }
    ok
}

pub struct Graph {
    blocks: SlotMap<BlockId, BlockSlot>,
    /// uid -> block, kept in step with `blocks`
    uids: HashMap<String, BlockId>,
    focused_node: Option<NodeId>,
    listeners: EventListeners,
    settings: GraphSettings,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(GraphSettings::default())
    }
}

impl Graph {
    pub fn new(settings: GraphSettings) -> Self {
        Self {
            blocks: SlotMap::with_key(),
            uids: HashMap::new(),
            focused_node: None,
            listeners: EventListeners::default(),
            settings,
        }
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    pub fn subscribe(&mut self, listener: Listener) {
        self.listeners.subscribe(listener);
    }

    pub(crate) fn emit(&mut self, event: GraphEvent) {
        self.listeners.emit(event);
    }

    // -------------------- Blocks ---------------------

    pub(crate) fn insert_block(&mut self, uid: String, type_name: &str, factory: BlockFactory) -> BlockId {
        let mut builder = BlockBuilder::default();
        let behavior = factory(&mut builder);
        let type_name = type_name.to_string();
        let key = uid.clone();
        let id = self
            .blocks
            .insert_with_key(|id| BlockSlot::new(id, uid, type_name, builder, behavior));
        if let Some(previous) = self.uids.insert(key, id) {
            log::warn!("[NodeGraph] Block uid reused, shadowing {:?}", previous);
        }
        id
    }

    /// Disconnects every node of the block and drops it. Handles to it
    /// resolve to `None` afterwards.
    pub(crate) fn remove_block(&mut self, id: BlockId) -> bool {
        if !self.blocks.contains_key(id) {
            return false;
        }
        self.with_behavior(id, |block, ctx| block.on_remove(ctx));
        if self.focused_node.map_or(false, |n| n.block == id) {
            self.focused_node = None;
            self.emit(GraphEvent::NodeFocusChanged { focused: None });
        }
        for index in 0..self.nodes_of(id).len() {
            self.disconnect_all(NodeId::new(id, index));
        }
        match self.blocks.remove(id) {
            Some(slot) => {
                if self.uids.get(&slot.uid) == Some(&id) {
                    self.uids.remove(&slot.uid);
                }
                true
            }
            None => false,
        }
    }

    pub fn contains_block(&self, id: BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.keys()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_uid(&self, id: BlockId) -> Option<&str> {
        self.blocks.get(id).map(|slot| slot.uid.as_str())
    }

    pub fn block_type(&self, id: BlockId) -> Option<&str> {
        self.blocks.get(id).map(|slot| slot.type_name.as_str())
    }

    pub fn find_block(&self, uid: &str) -> Option<BlockId> {
        self.uids.get(uid).copied()
    }

    pub fn group(&self, id: BlockId) -> Option<&str> {
        self.blocks.get(id).map(|slot| slot.group.as_str())
    }

    pub(crate) fn set_group(&mut self, id: BlockId, group: &str) {
        if let Some(slot) = self.blocks.get_mut(id) {
            slot.group = group.to_string();
        }
    }

    pub fn geometry(&self, id: BlockId) -> Option<BlockGeometry> {
        self.blocks.get(id).map(|slot| slot.geometry)
    }

    pub fn set_geometry(&mut self, id: BlockId, geometry: BlockGeometry) {
        if let Some(slot) = self.blocks.get_mut(id) {
            slot.geometry = geometry;
        }
    }

    /// Whether the block's behavior allows deleting it. Unknown blocks
    /// and blocks busy in a handler report false.
    pub fn may_be_removed(&self, id: BlockId) -> bool {
        self.blocks
            .get(id)
            .and_then(|slot| slot.behavior.as_ref())
            .map_or(false, |block| block.may_be_removed())
    }

    pub(crate) fn block_state(&self, id: BlockId) -> Option<serde_json::Value> {
        self.blocks
            .get(id)
            .and_then(|slot| slot.behavior.as_ref())
            .map(|block| block.state())
    }

    // -------------------- Nodes ---------------------

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.blocks.get(id.block)?.nodes.get(id.index)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.blocks.get_mut(id.block)?.nodes.get_mut(id.index)
    }

    pub fn nodes_of(&self, block: BlockId) -> &[Node] {
        self.blocks
            .get(block)
            .map_or(&[][..], |slot| slot.nodes.as_slice())
    }

    /// First input of the block, used when connecting on add.
    pub fn default_input(&self, block: BlockId) -> Option<NodeId> {
        self.nodes_of(block)
            .iter()
            .find(|n| n.is_input())
            .map(|n| NodeId::new(block, n.index))
    }

    pub fn default_output(&self, block: BlockId) -> Option<NodeId> {
        self.nodes_of(block)
            .iter()
            .find(|n| n.is_output())
            .map(|n| NodeId::new(block, n.index))
    }

    pub fn node_uid(&self, id: NodeId) -> Option<NodeUid> {
        let slot = self.blocks.get(id.block)?;
        slot.nodes.get(id.index)?;
        Some(NodeUid::new(slot.uid.clone(), id.index))
    }

    pub fn resolve_node_uid(&self, uid: &NodeUid) -> Option<NodeId> {
        let block = self.find_block(&uid.block_uid)?;
        let id = NodeId::new(block, uid.index);
        self.node(id).map(|_| id)
    }

    /// `<output uid>-><input uid>` for every connection of an output.
    /// Inputs report nothing; each edge is listed once, from its output.
    pub fn connections_of(&self, id: NodeId) -> Vec<ConnectionRef> {
        let (Some(node), Some(output)) = (self.node(id), self.node_uid(id)) else {
            return Vec::new();
        };
        if !node.is_output {
            return Vec::new();
        }
        node.connected
            .iter()
            .filter_map(|peer| self.node_uid(*peer))
            .map(|input| ConnectionRef {
                output: output.clone(),
                input,
            })
            .collect()
    }

    pub fn block_connections(&self, block: BlockId) -> Vec<ConnectionRef> {
        (0..self.nodes_of(block).len())
            .flat_map(|index| self.connections_of(NodeId::new(block, index)))
            .collect()
    }

    pub fn all_connections(&self) -> Vec<ConnectionRef> {
        self.blocks
            .keys()
            .flat_map(|id| self.block_connections(id))
            .collect()
    }

    // -------------------- Connections ---------------------

    /// Connects an output with an input, in either argument order.
    /// Connecting an already connected pair is a no-op that still reports
    /// success.
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> bool {
        let (Some(na), Some(nb)) = (self.node(a), self.node(b)) else {
            log::warn!("[NodeGraph] Cannot connect {:?} and {:?}: node does not exist", a, b);
            return false;
        };
        if a.block == b.block {
            log::warn!("[NodeGraph] Cannot connect two nodes of the same block");
            return false;
        }
        if na.is_output == nb.is_output {
            log::warn!("[NodeGraph] Cannot connect two nodes of the same direction");
            return false;
        }
        let (output, input) = if na.is_output { (a, b) } else { (b, a) };
        if na.connected.contains(&b) {
            return true;
        }

        if self.settings.warn_on_feedback_loops && self.path_exists(input.block, output.block) {
            log::warn!(
                "[NodeGraph] Connection {} closes a feedback loop; re-entrant updates will be bounded",
                self.describe(output, input)
            );
        }

        if let Some(node) = self.node_mut(output) {
            node.connected.push(input);
        }
        if let Some(node) = self.node_mut(input) {
            node.connected.push(output);
        }

        self.update_requested_size(output);
        self.update_data(input, Some(output));
        self.update_active_state(output);
        self.notify(output, NodeEvent::ConnectionChanged);
        self.notify(input, NodeEvent::ConnectionChanged);
        self.emit(GraphEvent::ConnectionChanged {
            output,
            input,
            connected: true,
        });
        true
    }

    pub fn disconnect(&mut self, a: NodeId, b: NodeId) -> bool {
        let (Some(na), Some(nb)) = (self.node(a), self.node(b)) else {
            log::warn!("[NodeGraph] Cannot disconnect {:?} and {:?}: node does not exist", a, b);
            return false;
        };
        if !na.connected.contains(&b) || !nb.connected.contains(&a) {
            log::warn!("[NodeGraph] Cannot disconnect nodes that are not connected");
            return false;
        }
        let (output, input) = if na.is_output { (a, b) } else { (b, a) };

        if let Some(node) = self.node_mut(output) {
            node.connected.retain(|peer| *peer != input);
        }
        if let Some(node) = self.node_mut(input) {
            node.connected.retain(|peer| *peer != output);
        }

        self.update_requested_size(output);
        self.update_active_state(output);
        self.update_data(input, None);
        self.notify(output, NodeEvent::ConnectionChanged);
        self.notify(input, NodeEvent::ConnectionChanged);
        self.emit(GraphEvent::ConnectionChanged {
            output,
            input,
            connected: false,
        });
        true
    }

    pub fn disconnect_all(&mut self, id: NodeId) {
        let peers = match self.node(id) {
            Some(node) => node.connected.clone(),
            None => return,
        };
        for peer in peers {
            self.disconnect(id, peer);
        }
    }

    /// Moves all connections of `other` onto `this`. Both nodes must have
    /// the same direction. Peers `this` cannot connect to stay with `other`.
    pub fn steal_connections(&mut self, this: NodeId, other: NodeId) -> bool {
        let (Some(target), Some(source)) = (self.node(this), self.node(other)) else {
            log::warn!("[NodeGraph] Cannot steal connections: node does not exist");
            return false;
        };
        if this == other || target.is_output != source.is_output {
            log::warn!("[NodeGraph] Can only steal connections between distinct nodes of the same direction");
            return false;
        }
        let peers = source.connected.clone();
        for peer in peers {
            if self.connect(this, peer) {
                self.disconnect(other, peer);
            }
        }
        true
    }

    fn path_exists(&self, from: BlockId, to: BlockId) -> bool {
        let graph = self.block_graph();
        graph.contains_node(from)
            && graph.contains_node(to)
            && has_path_connecting(&graph, from, to, None)
    }

    /// Block-level view: an edge from every block to each block its
    /// outputs feed.
    pub fn block_graph(&self) -> DiGraphMap<BlockId, ()> {
        let mut graph = DiGraphMap::new();
        for (id, slot) in self.blocks.iter() {
            graph.add_node(id);
            for node in slot.nodes.iter().filter(|n| n.is_output) {
                for input in &node.connected {
                    graph.add_edge(id, input.block, ());
                }
            }
        }
        graph
    }

    pub fn has_feedback_loop(&self) -> bool {
        is_cyclic_directed(&self.block_graph())
    }

    fn describe(&self, output: NodeId, input: NodeId) -> String {
        match (self.node_uid(output), self.node_uid(input)) {
            (Some(output), Some(input)) => ConnectionRef { output, input }.to_string(),
            _ => format!("{:?}->{:?}", output, input),
        }
    }

    // -------------------- Data flow ---------------------

    /// Pushes an output's current data to every connected input, making it
    /// the latest writer for LTP inputs.
    pub fn data_was_modified(&mut self, output: NodeId) {
        let inputs = match self.node(output) {
            Some(node) if node.is_output => node.connected.clone(),
            Some(_) => {
                log::error!("[NodeGraph] data_was_modified called on an input node");
                return;
            }
            None => return,
        };
        for input in inputs {
            self.update_data(input, Some(output));
        }
    }

    /// Edits an output's data in place and propagates it.
    pub fn modify_data(&mut self, output: NodeId, edit: impl FnOnce(&mut ColorMatrix)) -> bool {
        match self.node_mut(output) {
            Some(node) if node.is_output => edit(&mut node.data),
            Some(_) => {
                log::error!("[NodeGraph] Only output nodes can be written to");
                return false;
            }
            None => return false,
        }
        self.data_was_modified(output);
        true
    }

    /// Unchanged values are not propagated again.
    pub fn set_value(&mut self, output: NodeId, value: f64) -> bool {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        let unchanged = self.node(output).map_or(false, |node| {
            node.is_output && node.data.is_scalar() && node.value() == value
        });
        if unchanged {
            return true;
        }
        self.modify_data(output, |data| data.set_value(value))
    }

    pub fn set_absolute_value(&mut self, output: NodeId, value: f64) -> bool {
        self.modify_data(output, |data| data.set_absolute_value(value))
    }

    /// Recomputes an input's data from its peers.
    ///
    /// HTP inputs take the channel-wise maximum of all connected outputs,
    /// starting from a zero matrix of the input's requested size. LTP inputs
    /// copy `source` if it is a peer, otherwise the most recently connected
    /// output.
    fn update_data(&mut self, input: NodeId, source: Option<NodeId>) {
        let Some(node) = self.node(input) else {
            return;
        };
        if node.is_output {
            log::error!("[NodeGraph] update_data called on an output node");
            return;
        }

        let data = match node.merge_mode {
            MergeMode::Htp => {
                let mut merged = ColorMatrix::with_size(node.requested_size);
                for peer in &node.connected {
                    if let Some(output) = self.node(*peer) {
                        merged.mix_htp(&output.data);
                    }
                }
                merged
            }
            MergeMode::Ltp => source
                .filter(|s| node.connected.contains(s))
                .or_else(|| node.connected.last().copied())
                .and_then(|s| self.node(s))
                .map(|output| output.data.clone())
                .unwrap_or_else(|| ColorMatrix::with_size(node.requested_size)),
        };

        if let Some(node) = self.node_mut(input) {
            node.data = data;
        }
        self.notify(input, NodeEvent::DataChanged);
        self.check_for_impulse(input);
    }

    fn check_for_impulse(&mut self, input: NodeId) {
        let threshold = self.settings.trigger_threshold;
        let Some(node) = self.node_mut(input) else {
            return;
        };
        if !node.impulse_detection {
            return;
        }
        let on = node.data.value() >= threshold;
        if on == node.impulse_active {
            return;
        }
        node.impulse_active = on;
        let event = if on {
            NodeEvent::ImpulseBegin
        } else {
            NodeEvent::ImpulseEnd
        };
        self.notify(input, event);
    }

    /// Sets an output to 1 and back to 0 after the configured impulse
    /// duration, as measured by `advance_impulses`.
    pub fn send_impulse(&mut self, output: NodeId) {
        let duration = self.settings.impulse_duration_secs;
        if !self.set_value(output, 1.0) {
            return;
        }
        if let Some(node) = self.node_mut(output) {
            node.impulse_remaining = Some(duration);
        }
    }

    pub(crate) fn advance_impulses(&mut self, elapsed: f64) {
        let mut expired = Vec::new();
        for (id, slot) in self.blocks.iter_mut() {
            for node in slot.nodes.iter_mut() {
                if let Some(remaining) = node.impulse_remaining.as_mut() {
                    *remaining -= elapsed;
                    if *remaining <= 0.0 {
                        node.impulse_remaining = None;
                        expired.push(NodeId::new(id, node.index));
                    }
                }
            }
        }
        for output in expired {
            self.set_value(output, 0.0);
        }
    }

    // -------------------- Negotiation ---------------------

    /// An output requests the component-wise maximum of what its inputs
    /// request, 1x1 when unconnected. Its data is resized to match.
    fn update_requested_size(&mut self, output: NodeId) {
        let Some(node) = self.node(output) else {
            return;
        };
        let size = node
            .connected
            .iter()
            .filter_map(|peer| self.node(*peer))
            .fold(Size::default(), |size, peer| size.max(peer.requested_size));
        let shares = node.sharing_requested_size.clone();

        let mut changed = false;
        if let Some(node) = self.node_mut(output) {
            changed = node.requested_size != size;
            node.requested_size = size;
            node.data.rescale_to(size.width, size.height);
        }
        if changed {
            self.notify(output, NodeEvent::RequestedSizeChanged);
        }
        for input in shares {
            self.set_requested_size(input, size);
        }
    }

    pub fn set_requested_size(&mut self, input: NodeId, size: Size) -> bool {
        if size.width < 1 || size.height < 1 {
            log::warn!(
                "[NodeGraph] Requested size {}x{} is invalid",
                size.width,
                size.height
            );
            return false;
        }
        let outputs = match self.node_mut(input) {
            Some(node) if !node.is_output => {
                if node.requested_size == size {
                    return true;
                }
                node.requested_size = size;
                node.data.rescale_to(size.width, size.height);
                node.connected.clone()
            }
            Some(_) => {
                log::error!("[NodeGraph] Only input nodes can request a size");
                return false;
            }
            None => return false,
        };
        self.notify(input, NodeEvent::DataChanged);
        for output in outputs {
            self.update_requested_size(output);
        }
        true
    }

    /// An output is active while any connected input is.
    fn update_active_state(&mut self, output: NodeId) {
        let Some(node) = self.node(output) else {
            return;
        };
        let active = node
            .connected
            .iter()
            .filter_map(|peer| self.node(*peer))
            .any(|peer| peer.active);
        let shares = node.sharing_active_state.clone();

        let mut changed = false;
        if let Some(node) = self.node_mut(output) {
            changed = node.active != active;
            node.active = active;
        }
        if changed {
            self.notify(output, NodeEvent::ActiveChanged);
        }
        for input in shares {
            self.set_active(input, active);
        }
    }

    pub fn set_active(&mut self, input: NodeId, active: bool) -> bool {
        let outputs = match self.node_mut(input) {
            Some(node) if !node.is_output => {
                if node.active == active {
                    return true;
                }
                node.active = active;
                node.connected.clone()
            }
            Some(_) => {
                log::error!("[NodeGraph] Only input nodes can be set active");
                return false;
            }
            None => return false,
        };
        self.notify(input, NodeEvent::ActiveChanged);
        for output in outputs {
            self.update_active_state(output);
        }
        true
    }

    pub fn set_merge_mode(&mut self, input: NodeId, mode: MergeMode) -> bool {
        let remerge = match self.node_mut(input) {
            Some(node) if !node.is_output => {
                let changed = node.merge_mode != mode;
                node.merge_mode = mode;
                changed && node.connected.len() > 1
            }
            Some(_) => {
                log::warn!("[NodeGraph] Merge mode only applies to input nodes");
                return false;
            }
            None => return false,
        };
        if remerge {
            self.update_data(input, None);
        }
        true
    }

    pub fn set_htp_mode(&mut self, input: NodeId, htp: bool) -> bool {
        let mode = if htp { MergeMode::Htp } else { MergeMode::Ltp };
        self.set_merge_mode(input, mode)
    }

    pub fn toggle_htp_mode(&mut self, input: NodeId) -> bool {
        match self.node(input) {
            Some(node) => {
                let htp = !node.htp_mode();
                self.set_htp_mode(input, htp)
            }
            None => false,
        }
    }

    pub fn share_requested_size(&mut self, output: NodeId, input: NodeId) -> bool {
        if !self.check_share(output, input) {
            return false;
        }
        let size = match self.node_mut(output) {
            Some(node) => {
                if !node.sharing_requested_size.contains(&input) {
                    node.sharing_requested_size.push(input);
                }
                node.requested_size
            }
            None => return false,
        };
        self.set_requested_size(input, size)
    }

    pub fn share_active_state(&mut self, output: NodeId, input: NodeId) -> bool {
        if !self.check_share(output, input) {
            return false;
        }
        let active = match self.node_mut(output) {
            Some(node) => {
                if !node.sharing_active_state.contains(&input) {
                    node.sharing_active_state.push(input);
                }
                node.active
            }
            None => return false,
        };
        self.set_active(input, active)
    }

    fn check_share(&self, output: NodeId, input: NodeId) -> bool {
        let ok = output.block == input.block
            && matches!(
                (self.node(output), self.node(input)),
                (Some(o), Some(i)) if o.is_output && !i.is_output
            );
        if !ok {
            log::warn!("[NodeGraph] Sharing needs an output and an input of the same block");
        }
        ok
    }

    // -------------------- Focus ---------------------

    pub fn focused_node(&self) -> Option<NodeId> {
        self.focused_node.filter(|id| self.node(*id).is_some())
    }

    pub fn focus_node(&mut self, id: NodeId) -> bool {
        if self.node(id).is_none() {
            return false;
        }
        if self.focused_node == Some(id) {
            return true;
        }
        self.focused_node = Some(id);
        self.emit(GraphEvent::NodeFocusChanged { focused: Some(id) });
        true
    }

    pub fn defocus_node(&mut self, id: NodeId) {
        if self.focused_node == Some(id) {
            self.focused_node = None;
            self.emit(GraphEvent::NodeFocusChanged { focused: None });
        }
    }

    /// Tap on a node. With nothing focused the node gets focus. Tapping the
    /// focused node again clears its connections and the focus. Tapping
    /// another node connects the two, or disconnects them if they already
    /// are; two nodes of the same direction swap ownership of the focused
    /// node's connections instead.
    pub fn touch_node(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        let is_output = node.is_output;
        match self.focused_node() {
            None => {
                self.focus_node(id);
            }
            Some(focused) if focused == id => {
                self.disconnect_all(id);
                self.defocus_node(id);
            }
            Some(focused) => {
                self.defocus_node(focused);
                let (same_direction, already) = self.node(focused).map_or((false, false), |n| {
                    (n.is_output == is_output, n.connected.contains(&id))
                });
                if same_direction {
                    self.steal_connections(id, focused);
                } else if already {
                    self.disconnect(focused, id);
                } else {
                    self.connect(focused, id);
                }
            }
        }
    }

    // -------------------- Dispatch ---------------------

    /// Runs `f` with the block's behavior and a context over this graph.
    /// Returns `None` if the block does not exist or is already running a
    /// hook further up the stack.
    pub(crate) fn with_behavior<R>(
        &mut self,
        id: BlockId,
        f: impl FnOnce(&mut dyn Block, &mut BlockContext<'_>) -> R,
    ) -> Option<R> {
        let mut behavior = self.blocks.get_mut(id)?.behavior.take()?;
        let result = {
            let mut ctx = BlockContext::new(self, id);
            f(behavior.as_mut(), &mut ctx)
        };
        if let Some(slot) = self.blocks.get_mut(id) {
            slot.behavior = Some(behavior);
        }
        self.drain_pending(id);
        Some(result)
    }

    pub(crate) fn tick_block(&mut self, id: BlockId, elapsed: f64) {
        self.with_behavior(id, |block, ctx| block.tick(ctx, elapsed));
    }

    pub(crate) fn set_block_state(&mut self, id: BlockId, state: &serde_json::Value) {
        self.with_behavior(id, |block, ctx| block.set_state(ctx, state));
    }

    pub(crate) fn focus_block_behavior(&mut self, id: BlockId, focused: bool) {
        self.with_behavior(id, |block, _| {
            if focused {
                block.on_focus();
            } else {
                block.on_defocus();
            }
        });
    }

    fn notify(&mut self, node: NodeId, event: NodeEvent) {
        let max_deferred = self.settings.max_deferred_events;
        let Some(slot) = self.blocks.get_mut(node.block) else {
            return;
        };
        if slot.behavior.is_none() {
            // the block is busy further up the stack; deliver when it returns
            if slot.pending.len() >= max_deferred {
                log::warn!(
                    "[NodeGraph] Dropping {:?} for block {}: too many deferred events",
                    event,
                    slot.uid
                );
                return;
            }
            slot.pending.push_back((node.index, event));
            return;
        }
        self.with_behavior(node.block, |block, ctx| {
            block.on_node_event(ctx, node.index, event)
        });
    }

    fn drain_pending(&mut self, id: BlockId) {
        let max_deferred = self.settings.max_deferred_events;
        let mut delivered = 0;
        loop {
            let Some(slot) = self.blocks.get_mut(id) else {
                return;
            };
            if slot.pending.is_empty() {
                return;
            }
            if delivered >= max_deferred {
                log::warn!(
                    "[NodeGraph] Block {} keeps re-triggering itself; dropping {} deferred events",
                    slot.uid,
                    slot.pending.len()
                );
                slot.pending.clear();
                return;
            }
            let Some(mut behavior) = slot.behavior.take() else {
                return;
            };
            let Some((index, event)) = slot.pending.pop_front() else {
                slot.behavior = Some(behavior);
                return;
            };
            delivered += 1;
            {
                let mut ctx = BlockContext::new(self, id);
                behavior.on_node_event(&mut ctx, index, event);
            }
            if let Some(slot) = self.blocks.get_mut(id) {
                slot.behavior = Some(behavior);
            }
        }
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("blocks", &self.blocks.len())
            .field("focused_node", &self.focused_node)
            .field("listeners", &self.listeners)
            .finish()
    }
}
