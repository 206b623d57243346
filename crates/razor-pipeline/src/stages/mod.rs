//! The four pipeline stages and what they share.

mod document;
mod layout;
mod migrate;
mod planning;

pub use document::{DocumentOutput, DocumentStage, DocumentState, FileSummary};
pub use layout::{LayoutOutput, LayoutPhase, LayoutStage, LayoutState};
pub use migrate::{MigrationReport, MigrationState, MigrationStepRunner, StepPhase, StepProgress};
pub use planning::{PlanningOutput, PlanningStage, PlanningState};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use razor_agent::{SessionConfig, ToolSession};
use razor_llm::Generate;
use razor_tools::{DependencyToolRegistry, ExecutionEnvironment, ToolRegistry, ToolSet};
use razor_types::{RazorError, StageId};

use crate::checkpoint::{Checkpointer, StageState};
use crate::context::RunContext;
use crate::prompts::Prompt;

// ---------------------------------------------------------------------------
// Stage trait
// ---------------------------------------------------------------------------

/// How a stored stage state should be treated at stage start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    /// Unusable; rebuild from the previous stage's output.
    Fresh,
    /// Unfinished; continue from it.
    Resume,
    /// Finished; take its output without running.
    Complete,
}

#[async_trait]
pub trait Stage: Send + Sync {
    type State: StageState;
    type Output: Send;

    fn id(&self) -> StageId;

    fn assess(&self, state: &Self::State) -> Assessment;

    /// Run to completion, checkpointing after every transition.
    async fn run(
        &self,
        state: Self::State,
        ctx: &RunContext,
        checkpointer: &Checkpointer,
    ) -> razor_types::Result<Self::State>;

    fn output(&self, state: &Self::State) -> razor_types::Result<Self::Output>;
}

// ---------------------------------------------------------------------------
// Settings and services
// ---------------------------------------------------------------------------

/// Model used by each stage.
#[derive(Debug, Clone)]
pub struct StageModels {
    pub document: String,
    pub layout: String,
    pub planner: String,
    pub migrate: String,
}

#[derive(Debug, Clone)]
pub struct StageSettings {
    pub entry_path: PathBuf,
    pub output_path: PathBuf,
    pub legacy_language: String,
    pub legacy_framework: String,
    pub new_language: String,
    pub new_framework: String,
    pub models: StageModels,
    pub generate_readme: bool,
    pub max_tool_rounds: usize,
    pub max_layout_revisions: usize,
    /// Extra extraction attempts when a structured plan is rejected.
    pub max_plan_repairs: usize,
}

impl StageSettings {
    /// Where documented legacy sources are written.
    pub fn docs_root(&self) -> PathBuf {
        self.output_path.join(&self.legacy_language)
    }

    /// Where migrated files are written.
    pub fn target_root(&self) -> PathBuf {
        self.output_path.join(&self.new_language)
    }

    /// Template variables every prompt can use.
    pub fn prompt_vars(&self) -> HashMap<&'static str, String> {
        HashMap::from([
            ("legacy_language", self.legacy_language.clone()),
            ("legacy_framework", self.legacy_framework.clone()),
            ("new_language", self.new_language.clone()),
            ("new_framework", self.new_framework.clone()),
        ])
    }
}

/// External collaborators the stages call.
#[derive(Clone)]
pub struct Services {
    pub generator: Arc<dyn Generate>,
    pub env: Arc<dyn ExecutionEnvironment>,
    pub dependency_tools: DependencyToolRegistry,
}

impl Services {
    /// One tool-less generation call.
    pub async fn ask(
        &self,
        model: &str,
        prompt: &Prompt,
        vars: &HashMap<&'static str, String>,
    ) -> razor_types::Result<String> {
        let (system, user) = prompt.render(vars);
        razor_agent::ask(self.generator.as_ref(), model, &system, &user).await
    }

    /// A tool session limited to `tools` confined to `root`.
    pub fn tool_session(
        &self,
        model: &str,
        system_prompt: String,
        tools: ToolSet,
        root: &Path,
        max_tool_rounds: usize,
    ) -> ToolSession {
        self.session_with(model, system_prompt, tools.build_registry(root), max_tool_rounds)
    }

    /// A tool session over a registry the caller built.
    pub fn session_with(
        &self,
        model: &str,
        system_prompt: String,
        registry: ToolRegistry,
        max_tool_rounds: usize,
    ) -> ToolSession {
        let config = SessionConfig {
            model: model.to_string(),
            system_prompt,
            max_tool_rounds,
            ..SessionConfig::default()
        };
        ToolSession::new(self.generator.clone(), registry, self.env.clone(), config)
    }

    /// Whether `path` exists with non-zero size.
    pub async fn has_content(&self, path: &Path) -> razor_types::Result<bool> {
        Ok(matches!(self.env.file_size(path).await?, Some(size) if size > 0))
    }
}

/// Per-item failures that are logged and skipped instead of ending the
/// stage. Exhausted transient errors and credential or configuration
/// problems still end it, so a rerun can pick up from the checkpoint.
pub(crate) fn is_contained(err: &RazorError) -> bool {
    !(err.is_retryable()
        || matches!(
            err,
            RazorError::AuthError { .. } | RazorError::Config(_) | RazorError::Checkpoint { .. }
        ))
}

/// Parent directory key of a `/`-joined relative path; `""` is the root.
pub(crate) fn parent_key(relative: &str) -> &str {
    relative.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}
