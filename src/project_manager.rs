//! Whole-project and combination (block group) persistence on top of the
//! Block Manager. Only JSON shapes are produced and consumed here; reading
//! and writing files is up to the host.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::block_manager::{BlockManager, GROUP_KEY};
use crate::error::GraphError;
use crate::models::schema::{ConnectionRef, ProjectState, PROJECT_FORMAT_VERSION};
use crate::node_graph::BlockId;

impl BlockManager {
    /// Every block plus every connection, listed once from its output side.
    pub fn project_state(&self) -> ProjectState {
        let blocks = self
            .current_blocks()
            .iter()
            .filter_map(|id| self.get_block_state(*id))
            .collect();
        let connections = self
            .graph()
            .all_connections()
            .iter()
            .map(ToString::to_string)
            .collect();
        ProjectState {
            version: PROJECT_FORMAT_VERSION,
            blocks,
            connections,
        }
    }

    pub fn project_json(&self) -> Result<String, GraphError> {
        self.project_state().to_json()
    }

    /// Replaces the current graph with the given project. Blocks that
    /// cannot be created and connections that do not resolve are skipped.
    /// Returns the number of restored blocks.
    pub fn load_project(&mut self, project: &ProjectState) -> usize {
        if project.version > PROJECT_FORMAT_VERSION {
            log::warn!(
                "[Project] Project format {} is newer than supported {}",
                project.version,
                PROJECT_FORMAT_VERSION
            );
        }
        self.delete_all_blocks();

        let mut restored = 0;
        for state in &project.blocks {
            if self.restore_block(state, false).is_some() {
                restored += 1;
            }
        }
        for connection in &project.connections {
            self.restore_connection(connection, None);
        }
        log::info!(
            "[Project] Loaded {} of {} blocks",
            restored,
            project.blocks.len()
        );
        restored
    }

    pub fn load_project_json(&mut self, json: &str) -> Result<usize, GraphError> {
        let project = ProjectState::from_json(json)?;
        Ok(self.load_project(&project))
    }

    /// Blocks of the displayed group and the connections among them.
    pub fn save_combination(&self) -> ProjectState {
        let ids = self.blocks_in_displayed_group();
        let members: HashSet<BlockId> = ids.iter().copied().collect();
        let blocks = ids
            .iter()
            .filter_map(|id| self.get_block_state(*id))
            .map(|mut state| {
                state.focused = false;
                state
            })
            .collect();
        let connections = ids
            .iter()
            .flat_map(|id| self.graph().block_connections(*id))
            .filter(|connection| {
                self.get_block_by_uid(&connection.input.block_uid)
                    .map_or(false, |input| members.contains(&input))
            })
            .map(|connection| connection.to_string())
            .collect();
        ProjectState {
            version: PROJECT_FORMAT_VERSION,
            blocks,
            connections,
        }
    }

    /// Adds a saved combination to the displayed group. Every block gets a
    /// fresh uid and the saved connections are remapped onto the new blocks.
    pub fn add_combination(&mut self, combination: &ProjectState) -> Vec<BlockId> {
        let group = self.displayed_group().to_string();
        let mut uid_map = HashMap::new();
        let mut added = Vec::new();

        for state in &combination.blocks {
            let mut state = state.clone();
            state.focused = false;
            let old_uid = std::mem::take(&mut state.uid);
            if let Value::Object(map) = &mut state.internal_state {
                map.insert(GROUP_KEY.to_string(), Value::String(group.clone()));
            }
            let Some(id) = self.restore_block(&state, false) else {
                continue;
            };
            if let Some(new_uid) = self.graph().block_uid(id) {
                uid_map.insert(old_uid, new_uid.to_string());
            }
            added.push(id);
        }

        for connection in &combination.connections {
            self.restore_connection(connection, Some(&uid_map));
        }
        added
    }

    /// With a `uid_map` both ends must be blocks of the combination that
    /// were restored; anything else would wire the copy into live blocks.
    fn restore_connection(
        &mut self,
        connection: &str,
        uid_map: Option<&HashMap<String, String>>,
    ) -> bool {
        let mut parsed = match ConnectionRef::parse(connection) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("[Project] Skipping connection: {}", e);
                return false;
            }
        };
        if let Some(uid_map) = uid_map {
            for node in [&mut parsed.output, &mut parsed.input] {
                let Some(uid) = uid_map.get(&node.block_uid) else {
                    log::warn!(
                        "[Project] Skipping connection {}: block {} was not restored",
                        connection,
                        node.block_uid
                    );
                    return false;
                };
                node.block_uid = uid.clone();
            }
        }
        let resolved = (
            self.graph().resolve_node_uid(&parsed.output),
            self.graph().resolve_node_uid(&parsed.input),
        );
        match resolved {
            (Some(output), Some(input)) => self.graph_mut().connect(output, input),
            _ => {
                log::warn!("[Project] Skipping connection {}: node not found", parsed);
                false
            }
        }
    }
}
