use std::collections::HashMap;

use super::block::BlockFactory;

/// Describes one block type that can be instantiated by name.
#[derive(Clone)]
pub struct BlockInfo {
    pub type_name: String,
    pub name_in_ui: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub factory: BlockFactory,
}

impl std::fmt::Debug for BlockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockInfo")
            .field("type_name", &self.type_name)
            .field("name_in_ui", &self.name_in_ui)
            .field("category", &self.category)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct BlockRegistry {
    blocks: HashMap<String, BlockInfo>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the block types shipped with the crate.
    pub fn with_builtin_blocks() -> Self {
        let mut registry = Self::new();
        for info in super::blocks::get_block_types() {
            registry.register(info);
        }
        registry
    }

    /// Registers a type; a later registration under the same name
    /// replaces the earlier one.
    pub fn register(&mut self, info: BlockInfo) {
        if self.blocks.contains_key(&info.type_name) {
            log::warn!(
                "[BlockManager] Block type '{}' registered twice, replacing",
                info.type_name
            );
        }
        self.blocks.insert(info.type_name.clone(), info);
    }

    pub fn block_exists(&self, type_name: &str) -> bool {
        self.blocks.contains_key(type_name)
    }

    pub fn info(&self, type_name: &str) -> Option<&BlockInfo> {
        self.blocks.get(type_name)
    }

    pub fn all_block_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.blocks.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Case-insensitive match on type name, UI name and category.
    pub fn search(&self, query: &str) -> Vec<&BlockInfo> {
        let query = query.to_lowercase();
        let mut hits: Vec<&BlockInfo> = self
            .blocks
            .values()
            .filter(|info| {
                info.type_name.to_lowercase().contains(&query)
                    || info.name_in_ui.to_lowercase().contains(&query)
                    || info
                        .category
                        .as_deref()
                        .map_or(false, |c| c.to_lowercase().contains(&query))
            })
            .collect();
        hits.sort_by(|a, b| a.type_name.cmp(&b.type_name));
        hits
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
