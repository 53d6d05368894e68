//! Block Manager
//!
//! Owns the graph and every block instance in it. Creates blocks from the
//! registry, deletes them (keeping a short undo history), tracks the one
//! focused block and the displayed group, and resolves persisted node uids.

use std::collections::VecDeque;

use chrono::Utc;
use rand::Rng;
use serde_json::Value;

use crate::error::GraphError;
use crate::events::{GraphEvent, Listener};
use crate::models::schema::{BlockState, NodeUid, Size};
use crate::node_graph::{BlockGeometry, BlockId, BlockRegistry, Graph, NodeId};
use crate::settings::GraphSettings;

pub(crate) const GROUP_KEY: &str = "group";

pub struct BlockManager {
    pub(crate) graph: Graph,
    registry: BlockRegistry,
    /// Creation order; ticks and random picks walk this list.
    current_blocks: Vec<BlockId>,
    focused_block: Option<BlockId>,
    deleted_block_states: VecDeque<BlockState>,
    copied_block_state: Option<BlockState>,
    displayed_group: String,
}

impl BlockManager {
    pub fn new(registry: BlockRegistry, settings: GraphSettings) -> Self {
        let capacity = settings.undo_history_length;
        Self {
            graph: Graph::new(settings),
            registry,
            current_blocks: Vec::new(),
            focused_block: None,
            deleted_block_states: VecDeque::with_capacity(capacity),
            copied_block_state: None,
            displayed_group: String::new(),
        }
    }

    pub fn with_builtin_blocks() -> Self {
        Self::new(BlockRegistry::with_builtin_blocks(), GraphSettings::default())
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BlockRegistry {
        &mut self.registry
    }

    pub fn settings(&self) -> &GraphSettings {
        self.graph.settings()
    }

    pub fn subscribe(&mut self, listener: Listener) {
        self.graph.subscribe(listener);
    }

    // -------------------- Creation ---------------------

    /// Instantiates a registered block type. Without a uid a fresh one is
    /// generated; an explicit uid that is already taken rejects the block.
    pub fn create_block_instance(&mut self, type_name: &str, uid: Option<&str>) -> Option<BlockId> {
        let Some(info) = self.registry.info(type_name) else {
            log::warn!("[BlockManager] Block type does not exist: {}", type_name);
            return None;
        };
        let factory = info.factory;

        let uid = match uid.filter(|uid| !uid.is_empty()) {
            Some(uid) => {
                if self.graph.find_block(uid).is_some() {
                    log::warn!("[BlockManager] Tried to add block with UID already in use: {}", uid);
                    return None;
                }
                uid.to_string()
            }
            None => self.generate_uid(),
        };

        let id = self.graph.insert_block(uid, type_name, factory);
        self.current_blocks.push(id);
        self.emit_instance_count();
        Some(id)
    }

    /// Creates a block the way the UI does: placed in the displayed group,
    /// connected to the focused node if there is one, and focused if no
    /// other block is.
    pub fn add_new_block(&mut self, type_name: &str) -> Option<BlockId> {
        let id = self.create_block_instance(type_name, None)?;
        let group = self.displayed_group.clone();
        self.graph.set_group(id, &group);
        self.connect_on_add(id);
        if self.focused_block.is_none() {
            self.focus_block(id);
        }
        Some(id)
    }

    /// Recreates a block from its persisted state, keeping its uid unless it
    /// is empty.
    pub fn restore_block(&mut self, state: &BlockState, connect_on_add: bool) -> Option<BlockId> {
        let uid = Some(state.uid.as_str()).filter(|uid| !uid.is_empty());
        let Some(id) = self.create_block_instance(&state.name, uid) else {
            log::warn!("[BlockManager] Could not create block instance of type: {}", state.name);
            return None;
        };

        let group = state
            .internal_state
            .get(GROUP_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.graph.set_group(id, &group);
        self.graph.set_block_state(id, &state.internal_state);

        for (index, mode) in state.merge_modes_by_index() {
            let node = NodeId::new(id, index);
            if self.graph.node(node).map_or(false, |n| n.is_input()) {
                self.graph.set_merge_mode(node, mode);
            }
        }

        self.graph.set_geometry(
            id,
            BlockGeometry {
                x: state.pos_x,
                y: state.pos_y,
                width: state.width,
                height: state.height,
            },
        );

        if connect_on_add {
            self.connect_on_add(id);
        }
        if state.focused {
            self.focus_block(id);
        }
        Some(id)
    }

    /// Snapshot of a block in the persisted shape.
    pub fn get_block_state(&self, id: BlockId) -> Option<BlockState> {
        let uid = self.graph.block_uid(id)?;
        let type_name = self.graph.block_type(id)?;
        let geometry = self.graph.geometry(id).unwrap_or_default();

        let mut internal_state = self.graph.block_state(id).unwrap_or_else(|| Value::Object(Default::default()));
        let group = self.graph.group(id).unwrap_or_default();
        if let Value::Object(map) = &mut internal_state {
            if !group.is_empty() {
                map.insert(GROUP_KEY.to_string(), Value::String(group.to_string()));
            }
        }

        let mut state = BlockState::new(type_name);
        state.uid = uid.to_string();
        state.pos_x = geometry.x;
        state.pos_y = geometry.y;
        state.width = geometry.width;
        state.height = geometry.height;
        state.focused = self.focused_block == Some(id);
        state.internal_state = internal_state;
        for node in self.graph.nodes_of(id).iter().filter(|n| n.is_input()) {
            let key = NodeUid::new(uid, node.index()).to_string();
            state.node_merge_modes.insert(key, node.merge_mode());
        }
        Some(state)
    }

    /// Passes block-specific state to a live block, as if it was restored.
    pub fn set_block_state(&mut self, id: BlockId, state: &Value) {
        self.graph.set_block_state(id, state);
    }

    fn connect_on_add(&mut self, id: BlockId) {
        let Some(focused) = self.graph.focused_node() else {
            return;
        };
        let focused_is_output = self.graph.node(focused).map_or(false, |n| n.is_output());
        let node = if focused_is_output {
            self.graph.default_input(id)
        } else {
            self.graph.default_output(id)
        };
        if let Some(node) = node {
            self.graph.touch_node(node);
        }
    }

    fn generate_uid(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let uid = format!(
                "{}{}",
                Utc::now().timestamp_millis(),
                rng.gen_range(1000..10000)
            );
            if self.graph.find_block(&uid).is_none() {
                return uid;
            }
        }
    }

    // -------------------- Deletion ---------------------

    /// Deletes a block unless it refuses removal (overridden by `forced`).
    /// Its state goes to the undo history unless `no_restore` is set.
    pub fn delete_block(&mut self, id: BlockId, forced: bool, no_restore: bool) -> bool {
        if !self.graph.contains_block(id) {
            log::warn!("[BlockManager] Tried to delete a block that does not exist");
            return false;
        }
        if !forced && !self.graph.may_be_removed(id) {
            log::info!(
                "[BlockManager] Block {} may not be removed",
                self.graph.block_uid(id).unwrap_or_default()
            );
            return false;
        }

        if !no_restore {
            if let Some(state) = self.get_block_state(id) {
                self.push_deleted_state(state);
            }
        }

        self.defocus_block(id);
        self.graph.remove_block(id);
        self.current_blocks.retain(|block| *block != id);
        self.emit_instance_count();
        true
    }

    pub fn delete_block_by_uid(&mut self, uid: &str, forced: bool, no_restore: bool) -> bool {
        match self.graph.find_block(uid) {
            Some(id) => self.delete_block(id, forced, no_restore),
            None => {
                log::warn!("[BlockManager] No block with uid {}", uid);
                false
            }
        }
    }

    /// Removes every block, bypassing removability and undo.
    pub fn delete_all_blocks(&mut self) {
        for id in self.current_blocks.clone() {
            self.delete_block(id, true, true);
        }
    }

    pub fn delete_focused_block(&mut self) -> bool {
        match self.focused_block {
            Some(id) => self.delete_block(id, false, false),
            None => false,
        }
    }

    fn push_deleted_state(&mut self, state: BlockState) {
        let capacity = self.graph.settings().undo_history_length;
        if capacity == 0 {
            return;
        }
        while self.deleted_block_states.len() >= capacity {
            self.deleted_block_states.pop_front();
        }
        self.deleted_block_states.push_back(state);
    }

    /// Recreates the most recently deleted block.
    pub fn restore_deleted_block(&mut self) -> Option<BlockId> {
        let state = self.deleted_block_states.pop_back()?;
        self.restore_block(&state, false)
    }

    pub fn deleted_block_count(&self) -> usize {
        self.deleted_block_states.len()
    }

    // -------------------- Clipboard ---------------------

    pub fn copy_focused_block(&mut self) -> bool {
        let Some(state) = self.focused_block.and_then(|id| self.get_block_state(id)) else {
            return false;
        };
        self.copied_block_state = Some(state);
        true
    }

    /// Restores the copied block with a fresh uid into the displayed group.
    pub fn paste_block(&mut self) -> Option<BlockId> {
        let mut state = self.copied_block_state.clone()?;
        state.uid.clear();
        state.focused = false;
        let id = self.restore_block(&state, true)?;
        let group = self.displayed_group.clone();
        self.set_group_of_block(id, &group);
        Some(id)
    }

    pub fn duplicate_focused_block(&mut self) -> Option<BlockId> {
        let mut state = self.get_block_state(self.focused_block?)?;
        state.uid.clear();
        state.focused = false;
        let mut rng = rand::thread_rng();
        state.pos_x += rng.gen_range(0.0..50.0);
        state.pos_y += rng.gen_range(0.0..50.0);
        self.restore_block(&state, true)
    }

    // -------------------- Focus ---------------------

    pub fn focused_block(&self) -> Option<BlockId> {
        self.focused_block
    }

    /// Focuses `id`, defocusing the previous block first. Emits one
    /// `FocusChanged` per actual change.
    pub fn focus_block(&mut self, id: BlockId) -> bool {
        if !self.graph.contains_block(id) {
            return false;
        }
        if self.focused_block == Some(id) {
            return true;
        }
        if let Some(previous) = self.focused_block.take() {
            self.graph.focus_block_behavior(previous, false);
        }
        self.graph.focus_block_behavior(id, true);
        self.focused_block = Some(id);
        self.graph.emit(GraphEvent::FocusChanged { focused: Some(id) });
        true
    }

    pub fn defocus_block(&mut self, id: BlockId) {
        if self.focused_block != Some(id) {
            return;
        }
        self.graph.focus_block_behavior(id, false);
        self.focused_block = None;
        self.graph.emit(GraphEvent::FocusChanged { focused: None });
    }

    // -------------------- Lookup ---------------------

    pub fn get_block_by_uid(&self, uid: &str) -> Option<BlockId> {
        self.graph.find_block(uid)
    }

    /// Resolves `"<blockUid>|<nodeIndex>"`, logging why it failed.
    pub fn get_node_by_uid(&self, uid: &str) -> Option<NodeId> {
        match self.find_node(uid) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("[BlockManager] {}", e);
                None
            }
        }
    }

    pub fn find_node(&self, uid: &str) -> Result<NodeId, GraphError> {
        let parsed = NodeUid::parse(uid)?;
        let block = self
            .graph
            .find_block(&parsed.block_uid)
            .ok_or_else(|| GraphError::NotFound {
                kind: "Block",
                uid: parsed.block_uid.clone(),
            })?;
        let id = NodeId::new(block, parsed.index);
        match self.graph.node(id) {
            Some(_) => Ok(id),
            None => Err(GraphError::NotFound {
                kind: "Node",
                uid: uid.to_string(),
            }),
        }
    }

    /// Connects two nodes given by their persisted uids.
    pub fn connect_by_uid(&mut self, a: &str, b: &str) -> bool {
        match (self.get_node_by_uid(a), self.get_node_by_uid(b)) {
            (Some(a), Some(b)) => self.graph.connect(a, b),
            _ => {
                log::warn!("[BlockManager] Cannot connect {} and {}: unknown node", a, b);
                false
            }
        }
    }

    pub fn block_instance_count(&self) -> usize {
        self.current_blocks.len()
    }

    pub fn current_blocks(&self) -> &[BlockId] {
        &self.current_blocks
    }

    pub fn has_feedback_loop(&self) -> bool {
        self.graph.has_feedback_loop()
    }

    fn emit_instance_count(&mut self) {
        let count = self.current_blocks.len();
        self.graph.emit(GraphEvent::BlockInstanceCountChanged { count });
    }

    // -------------------- Groups ---------------------

    pub fn displayed_group(&self) -> &str {
        &self.displayed_group
    }

    pub fn set_displayed_group(&mut self, group: &str) {
        self.displayed_group = group.to_string();
        self.graph.emit(GraphEvent::DisplayedGroupChanged {
            group: group.to_string(),
        });
    }

    pub fn set_group_of_block(&mut self, id: BlockId, group: &str) {
        self.graph.set_group(id, group);
    }

    pub fn blocks_in_displayed_group(&self) -> Vec<BlockId> {
        self.current_blocks
            .iter()
            .copied()
            .filter(|id| self.graph.group(*id) == Some(self.displayed_group.as_str()))
            .collect()
    }

    // -------------------- Driving ---------------------

    /// Forwards one engine tick to every block in creation order, then
    /// runs impulse timers.
    pub fn tick(&mut self, elapsed: f64) {
        for id in self.current_blocks.clone() {
            self.graph.tick_block(id, elapsed);
        }
        self.graph.advance_impulses(elapsed);
    }

    /// Stress helper: connects a random output to a random input and pushes
    /// edge-case values through the connection. Nodes that already have two
    /// or more peers are cleared first.
    pub fn make_random_connection<R: Rng>(&mut self, rng: &mut R) -> bool {
        let Some(output) = self.random_node(rng, true) else {
            log::debug!("[BlockManager] Random connection: there is no output node");
            return false;
        };
        let Some(input) = self.random_node(rng, false) else {
            log::debug!("[BlockManager] Random connection: there is no input node");
            return false;
        };

        for node in [output, input] {
            if self.graph.node(node).map_or(0, |n| n.connected_nodes().len()) >= 2 {
                self.graph.disconnect_all(node);
            }
        }
        let connected = self.graph.connect(output, input);

        self.graph.set_value(output, 0.0);
        self.graph.set_value(output, 0.712354);
        self.graph.set_value(output, 1.0);
        self.graph.set_absolute_value(output, -234.56);
        self.graph.set_requested_size(input, Size::new(3, 2));
        self.graph.modify_data(output, |data| data.set_hsv(1.0, 1.0, 1.0));
        self.graph.modify_data(output, |data| data.set_rgb(0.73, 0.26, 0.63));
        connected
    }

    fn random_node<R: Rng>(&self, rng: &mut R, output: bool) -> Option<NodeId> {
        if self.current_blocks.is_empty() {
            return None;
        }
        let offset = rng.gen_range(0..self.current_blocks.len());
        for i in 0..self.current_blocks.len() {
            let id = self.current_blocks[(offset + i) % self.current_blocks.len()];
            let nodes = self.graph.nodes_of(id);
            if nodes.is_empty() {
                continue;
            }
            let start = rng.gen_range(0..nodes.len());
            for k in 0..nodes.len() {
                let node = &nodes[(start + k) % nodes.len()];
                if node.is_output() == output {
                    return Some(NodeId::new(id, node.index()));
                }
            }
        }
        None
    }
}

impl Default for BlockManager {
    fn default() -> Self {
        Self::with_builtin_blocks()
    }
}

impl std::fmt::Debug for BlockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockManager")
            .field("blocks", &self.current_blocks.len())
            .field("focused_block", &self.focused_block)
            .field("undo", &self.deleted_block_states.len())
            .field("displayed_group", &self.displayed_group)
            .finish()
    }
}
