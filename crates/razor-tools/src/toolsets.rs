//! Fixed capability sets handed to generation calls.
//!
//! Each pipeline sub-call gets exactly one [`ToolSet`]; the registry it
//! builds is the only place tool names are resolved.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::builtin::{ReadFileTool, WriteFileTool};
use crate::tool::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSet {
    /// `read_file` over a source tree.
    Reader,
    /// `write_file` into a target tree.
    Writer,
}

impl ToolSet {
    pub fn tool_names(&self) -> &'static [&'static str] {
        match self {
            ToolSet::Reader => &["read_file"],
            ToolSet::Writer => &["write_file"],
        }
    }

    /// Build a [`ToolRegistry`] whose tools are confined to `root`.
    pub fn build_registry(&self, root: &Path) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        match self {
            ToolSet::Reader => registry.register(ReadFileTool::rooted(root)),
            ToolSet::Writer => registry.register(WriteFileTool::rooted(root)),
        }
        registry
    }

    /// A writer registry that accepts `file` under `root` and nothing else.
    pub fn single_file_writer(root: &Path, file: &str) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(WriteFileTool::rooted(root).only(file));
        registry
    }
}
