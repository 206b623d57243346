//! Built-in file tools offered to the generation service.

mod read_file;
mod write_file;

pub use read_file::ReadFileTool;
pub use write_file::WriteFileTool;

use std::path::{Path, PathBuf};

use razor_types::RazorError;
use serde::de::DeserializeOwned;

use crate::tool::confine_path;

/// Decodes a tool's JSON arguments, reporting bad input as a tool error the
/// model can read and correct.
fn parse_args<T: DeserializeOwned>(tool: &str, arguments: serde_json::Value) -> razor_types::Result<T> {
    serde_json::from_value(arguments).map_err(|e| RazorError::ToolError {
        tool: tool.into(),
        message: format!("invalid arguments: {e}"),
    })
}

/// Unrooted tools take paths as given; rooted ones confine them.
fn locate(tool: &str, root: Option<&Path>, requested: &str) -> razor_types::Result<PathBuf> {
    match root {
        Some(root) => confine_path(tool, root, requested),
        None => Ok(PathBuf::from(requested)),
    }
}
