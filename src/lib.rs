mod block_manager;
mod engine;
mod error;
mod events;
mod models;
pub mod node_graph;
mod project_manager;
mod settings;

pub use block_manager::BlockManager;
pub use engine::Engine;
pub use error::GraphError;
pub use events::{EventListeners, GraphEvent, Listener};
pub use models::schema::{
    BlockState, ConnectionRef, MergeMode, NodeUid, ProjectState, Size, PROJECT_FORMAT_VERSION,
};
pub use node_graph::{
    Block, BlockBuilder, BlockContext, BlockFactory, BlockGeometry, BlockId, BlockInfo,
    BlockRegistry, ColorMatrix, Graph, Hsv, Node, NodeEvent, NodeId, Rgb,
};
pub use settings::GraphSettings;
