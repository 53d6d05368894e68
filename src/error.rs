use std::fmt;

/// Error type for parsing data that comes from outside the graph
/// (project files, node uids, settings).
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Node uid is not of the form `<blockUid>|<index>`
    InvalidNodeUid(String),
    /// Connection string is not of the form `<outputUid>-><inputUid>`
    InvalidConnection(String),
    /// A uid did not resolve to a live block or node
    NotFound { kind: &'static str, uid: String },
    /// JSON could not be parsed into the expected shape
    ParseError(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::InvalidNodeUid(uid) => write!(f, "Invalid node uid: '{}'", uid),
            GraphError::InvalidConnection(conn) => write!(f, "Invalid connection: '{}'", conn),
            GraphError::NotFound { kind, uid } => write!(f, "{} with uid '{}' not found", kind, uid),
            GraphError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for GraphError {}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        GraphError::ParseError(e.to_string())
    }
}
