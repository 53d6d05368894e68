//! Block types shipped with the crate. Hosts register their own on top.

use serde_json::{json, Value};

use super::block::{Block, BlockBuilder, BlockContext};
use super::node::NodeEvent;
use super::registry::BlockInfo;
use crate::models::schema::Size;

mod color;
mod monitor;
mod signals;

pub use color::{ColorBlock, DimmerBlock};
pub use monitor::MonitorBlock;
pub use signals::{ThresholdBlock, TriggerBlock, ValueBlock};

pub fn get_block_types() -> Vec<BlockInfo> {
    let mut types = Vec::new();
    types.extend(signals::get_block_types());
    types.extend(color::get_block_types());
    types.extend(monitor::get_block_types());
    types
}

fn read_f64(state: &Value, key: &str) -> Option<f64> {
    state.get(key).and_then(Value::as_f64)
}
