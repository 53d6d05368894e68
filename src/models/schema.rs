use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::GraphError;

pub const PROJECT_FORMAT_VERSION: f64 = 0.1;

/// Matrix dimensions in cells. Both sides are always at least 1.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: usize,
    pub height: usize,
}

impl Size {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Component-wise maximum.
    pub fn max(self, other: Size) -> Size {
        Size {
            width: self.width.max(other.width),
            height: self.height.max(other.height),
        }
    }
}

impl Default for Size {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// How an input combines data from more than one connected output.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase", try_from = "RawMergeMode")]
pub enum MergeMode {
    /// Highest takes precedence
    #[default]
    Htp,
    /// Latest takes precedence
    Ltp,
}

// Older project files store the mode as a bool (`true` = HTP).
#[derive(Deserialize)]
#[serde(untagged)]
enum RawMergeMode {
    Named(String),
    Legacy(bool),
}

impl TryFrom<RawMergeMode> for MergeMode {
    type Error = String;

    fn try_from(raw: RawMergeMode) -> Result<Self, Self::Error> {
        match raw {
            RawMergeMode::Legacy(true) => Ok(MergeMode::Htp),
            RawMergeMode::Legacy(false) => Ok(MergeMode::Ltp),
            RawMergeMode::Named(name) => match name.to_ascii_lowercase().as_str() {
                "htp" => Ok(MergeMode::Htp),
                "ltp" => Ok(MergeMode::Ltp),
                other => Err(format!("unknown merge mode '{}'", other)),
            },
        }
    }
}

/// Composite node reference as stored in project files: `<blockUid>|<index>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeUid {
    pub block_uid: String,
    pub index: usize,
}

impl NodeUid {
    pub fn new(block_uid: impl Into<String>, index: usize) -> Self {
        Self {
            block_uid: block_uid.into(),
            index,
        }
    }

    pub fn parse(uid: &str) -> Result<Self, GraphError> {
        let (block_uid, index) = uid
            .rsplit_once('|')
            .ok_or_else(|| GraphError::InvalidNodeUid(uid.to_string()))?;
        if block_uid.is_empty() {
            return Err(GraphError::InvalidNodeUid(uid.to_string()));
        }
        let index = index
            .trim()
            .parse::<usize>()
            .map_err(|_| GraphError::InvalidNodeUid(uid.to_string()))?;
        Ok(Self::new(block_uid, index))
    }
}

impl fmt::Display for NodeUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.block_uid, self.index)
    }
}

/// A persisted edge: `<outputNodeUid>-><inputNodeUid>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionRef {
    pub output: NodeUid,
    pub input: NodeUid,
}

impl ConnectionRef {
    pub fn parse(connection: &str) -> Result<Self, GraphError> {
        let (output, input) = connection
            .split_once("->")
            .ok_or_else(|| GraphError::InvalidConnection(connection.to_string()))?;
        Ok(Self {
            output: NodeUid::parse(output.trim())?,
            input: NodeUid::parse(input.trim())?,
        })
    }
}

impl fmt::Display for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.output, self.input)
    }
}

/// Persisted form of one block instance. Also used for undo entries and
/// the copy/paste clipboard.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockState {
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub pos_x: f64,
    #[serde(default)]
    pub pos_y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub focused: bool,
    #[serde(default)]
    pub node_merge_modes: BTreeMap<String, MergeMode>,
    #[serde(default = "empty_object")]
    pub internal_state: Value,
}

impl BlockState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: String::new(),
            pos_x: 0.0,
            pos_y: 0.0,
            width: 0.0,
            height: 0.0,
            focused: false,
            node_merge_modes: BTreeMap::new(),
            internal_state: empty_object(),
        }
    }

    /// Merge modes keyed by node index. Keys may be full node uids or bare
    /// indices; unparsable keys are skipped.
    pub fn merge_modes_by_index(&self) -> BTreeMap<usize, MergeMode> {
        self.node_merge_modes
            .iter()
            .filter_map(|(key, mode)| {
                let index = key.rsplit('|').next()?.trim().parse::<usize>().ok()?;
                Some((index, *mode))
            })
            .collect()
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A whole project, or a saved combination of blocks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    #[serde(default = "default_version")]
    pub version: f64,
    #[serde(default)]
    pub blocks: Vec<BlockState>,
    #[serde(default)]
    pub connections: Vec<String>,
}

fn default_version() -> f64 {
    PROJECT_FORMAT_VERSION
}

impl Default for ProjectState {
    fn default() -> Self {
        Self {
            version: PROJECT_FORMAT_VERSION,
            blocks: Vec::new(),
            connections: Vec::new(),
        }
    }
}

impl ProjectState {
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_uid_roundtrips_through_display() {
        let uid = NodeUid::parse("16801234561234|2").expect("valid uid");
        assert_eq!(uid.block_uid, "16801234561234");
        assert_eq!(uid.index, 2);
        assert_eq!(uid.to_string(), "16801234561234|2");
    }

    #[test]
    fn malformed_node_uids_are_rejected() {
        assert!(NodeUid::parse("no-separator").is_err());
        assert!(NodeUid::parse("|3").is_err());
        assert!(NodeUid::parse("abc|x").is_err());
    }

    #[test]
    fn connection_string_splits_on_arrow() {
        let conn = ConnectionRef::parse("a|0->b|1").expect("valid connection");
        assert_eq!(conn.output, NodeUid::new("a", 0));
        assert_eq!(conn.input, NodeUid::new("b", 1));
        assert_eq!(conn.to_string(), "a|0->b|1");
        assert!(ConnectionRef::parse("a|0=>b|1").is_err());
    }

    #[test]
    fn block_state_reads_persisted_shape_and_legacy_modes() {
        let state: BlockState = serde_json::from_value(json!({
            "name": "Slider",
            "uid": "42",
            "posX": 10.0,
            "posY": 20.0,
            "width": 100.0,
            "height": 50.0,
            "focused": true,
            "nodeMergeModes": { "42|0": "ltp", "1": true, "broken": "htp" },
            "internalState": { "value": 0.5 }
        }))
        .expect("block state parses");

        assert_eq!(state.uid, "42");
        assert!(state.focused);
        let modes = state.merge_modes_by_index();
        assert_eq!(modes.get(&0), Some(&MergeMode::Ltp));
        assert_eq!(modes.get(&1), Some(&MergeMode::Htp));
        assert_eq!(modes.len(), 2);

        let written = serde_json::to_value(&state).expect("serializes");
        assert_eq!(written["nodeMergeModes"]["42|0"], json!("ltp"));
        assert_eq!(written["posX"], json!(10.0));
    }

    #[test]
    fn unknown_merge_mode_fails_to_parse() {
        let result: Result<MergeMode, _> = serde_json::from_value(json!("loudest"));
        assert!(result.is_err());
    }

    #[test]
    fn project_state_defaults_missing_fields() {
        let project = ProjectState::from_json(r#"{"blocks": []}"#).expect("parses");
        assert_eq!(project.version, PROJECT_FORMAT_VERSION);
        assert!(project.connections.is_empty());
    }
}
