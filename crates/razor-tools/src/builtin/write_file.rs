use std::path::PathBuf;

use async_trait::async_trait;
use razor_types::RazorError;
use serde::Deserialize;
use serde_json::json;

use super::{locate, parse_args};
use crate::environment::ExecutionEnvironment;
use crate::tool::{Tool, ToolDefinition};

const NAME: &str = "write_file";

#[derive(Deserialize)]
struct WriteArgs {
    file_path: String,
    content: String,
}

/// Creates or overwrites a file, making parent directories as needed.
#[derive(Default)]
pub struct WriteFileTool {
    root: Option<PathBuf>,
    only: Option<PathBuf>,
}

impl WriteFileTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Confines every write to `root`.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            only: None,
        }
    }

    /// Refuses every path except `file` (resolved like a requested path).
    pub fn only(mut self, file: &str) -> Self {
        self.only = Some(match &self.root {
            Some(root) => root.join(file),
            None => PathBuf::from(file),
        });
        self
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: NAME.to_string(),
            description: "Write content to a file, creating parent directories if needed."
                .to_string(),
            parameters: json!({
                "type": "object",
                "required": ["file_path", "content"],
                "properties": {
                    "file_path": { "type": "string", "description": "Path of the file to write" },
                    "content": { "type": "string", "description": "Full new content of the file" },
                },
            }),
        }
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        env: &dyn ExecutionEnvironment,
    ) -> razor_types::Result<String> {
        let WriteArgs { file_path, content } = parse_args(NAME, arguments)?;
        let path = locate(NAME, self.root.as_deref(), &file_path)?;
        if let Some(only) = &self.only {
            if path != *only {
                return Err(RazorError::ToolError {
                    tool: NAME.into(),
                    message: format!(
                        "'{}' is not writable here; only {} may be written",
                        file_path,
                        only.display()
                    ),
                });
            }
        }
        env.write_file(&path, &content).await?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "File written by tool");
        Ok(format!("Wrote {} bytes to {}", content.len(), file_path))
    }
}
