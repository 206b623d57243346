use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use razor_types::RazorError;
use serde::{Deserialize, Serialize};

use crate::environment::ExecutionEnvironment;

/// Definition of a tool that can be presented to the generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Trait for tools the generation service may request by name.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(
        &self,
        arguments: serde_json::Value,
        env: &dyn ExecutionEnvironment,
    ) -> razor_types::Result<String>;
}

/// Named tools offered to one conversation. Lookup is by exact name, and
/// iteration is in name order so requests are stable across runs.
#[derive(Default)]
pub struct ToolRegistry {
    by_name: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `tool`, replacing any tool already registered under its name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.by_name.insert(tool.definition().name, Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.by_name.get(name).map(|t| t.as_ref())
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.by_name.values().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Resolves a path supplied by the model against `base`. Relative paths
/// are joined; absolute ones must already sit under `base`; any `..`
/// component is refused before either check.
pub fn confine_path(tool: &str, base: &Path, requested: &str) -> razor_types::Result<PathBuf> {
    let refuse = |why: String| RazorError::ToolError {
        tool: tool.into(),
        message: format!("path '{requested}' {why}"),
    };
    let candidate = Path::new(requested);

    if candidate.components().any(|c| c == Component::ParentDir) {
        Err(refuse("must not contain '..'".into()))
    } else if !candidate.is_absolute() {
        Ok(base.join(candidate))
    } else if candidate.starts_with(base) {
        Ok(candidate.to_path_buf())
    } else {
        Err(refuse(format!("is outside {}", base.display())))
    }
}
