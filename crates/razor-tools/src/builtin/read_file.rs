use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{locate, parse_args};
use crate::environment::ExecutionEnvironment;
use crate::tool::{Tool, ToolDefinition};
use crate::truncation::{truncate_output, TruncationMode};

const NAME: &str = "read_file";
const MAX_OUTPUT_CHARS: usize = 50_000;
const DEFAULT_LINES: usize = 2000;

fn default_lines() -> usize {
    DEFAULT_LINES
}

#[derive(Deserialize)]
struct ReadArgs {
    file_path: String,
    /// 1-based first line.
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default = "default_lines")]
    limit: usize,
}

/// Returns a file's lines prefixed with right-aligned line numbers.
#[derive(Default)]
pub struct ReadFileTool {
    root: Option<PathBuf>,
}

impl ReadFileTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative paths under `root` and refuses paths outside it.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        let path_help = if self.root.is_some() {
            "Path of the file to read, relative to the project root"
        } else {
            "Path to the file to read"
        };
        ToolDefinition {
            name: NAME.to_string(),
            description: "Read a file. Returns content with line numbers.".to_string(),
            parameters: json!({
                "type": "object",
                "required": ["file_path"],
                "properties": {
                    "file_path": { "type": "string", "description": path_help },
                    "offset": { "type": "integer", "description": "First line to return (1-based)" },
                    "limit": { "type": "integer", "description": "How many lines to return", "default": DEFAULT_LINES },
                },
            }),
        }
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        env: &dyn ExecutionEnvironment,
    ) -> razor_types::Result<String> {
        let args: ReadArgs = parse_args(NAME, arguments)?;
        let path = locate(NAME, self.root.as_deref(), &args.file_path)?;
        let content = env.read_file(&path).await?;

        let skip = args.offset.unwrap_or(1).saturating_sub(1);
        let window: Vec<(usize, &str)> = content
            .lines()
            .enumerate()
            .skip(skip)
            .take(args.limit)
            .collect();
        let width = window
            .last()
            .map_or(1, |(idx, _)| (idx + 1).to_string().len());

        let numbered = window
            .iter()
            .map(|(idx, line)| format!("{:>width$} | {}", idx + 1, line))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(truncate_output(&numbered, MAX_OUTPUT_CHARS, TruncationMode::HeadTail))
    }
}
