mod block;
pub mod blocks;
pub mod color;
mod graph;
mod matrix;
mod node;
mod registry;

slotmap::new_key_type! {
    /// Handle of a block instance in the graph arena.
    pub struct BlockId;
}

pub use block::{Block, BlockBuilder, BlockContext, BlockFactory};
pub use color::{Hsv, HsvMatrix, Rgb, RgbMatrix};
pub use graph::{BlockGeometry, Graph};
pub use matrix::ColorMatrix;
pub use node::{Node, NodeEvent, NodeId};
pub use registry::{BlockInfo, BlockRegistry};

#[cfg(test)]
mod tests;
