//! Layout stage: propose a directory layout for the new project, refine it
//! through a critique loop, then extract the list of files to produce.

use std::path::PathBuf;

use async_trait::async_trait;
use razor_agent::Turn;
use razor_llm::extract_json;
use razor_tools::ToolSet;
use razor_types::StageId;
use serde::{Deserialize, Serialize};

use super::{Assessment, Services, Stage, StageSettings};
use crate::checkpoint::Checkpointer;
use crate::context::RunContext;
use crate::dependency::DependencyGraph;
use crate::events::PipelineEvent;
use crate::prompts::{LAYOUT_CRITIQUE, LAYOUT_EXTRACT, LAYOUT_PROPOSE, LAYOUT_REVISE};

/// Marker a reviewer uses to accept a proposal.
const ACCEPT_MARKER: &str = "END";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutPhase {
    Propose,
    Critique,
    Extract,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutState {
    pub docs_root: PathBuf,
    pub legacy_structure: String,
    pub dependencies: DependencyGraph,
    pub phase: LayoutPhase,
    /// Proposer conversation, kept so revisions see earlier rounds.
    pub history: Vec<Turn>,
    /// Critique waiting to be answered by the next proposal.
    pub pending_feedback: Option<String>,
    pub proposal: Option<String>,
    pub revisions: usize,
    pub files_to_migrate: Option<Vec<String>>,
}

impl LayoutState {
    pub fn new(
        docs_root: impl Into<PathBuf>,
        legacy_structure: impl Into<String>,
        dependencies: DependencyGraph,
    ) -> Self {
        Self {
            docs_root: docs_root.into(),
            legacy_structure: legacy_structure.into(),
            dependencies,
            phase: LayoutPhase::Propose,
            history: Vec::new(),
            pending_feedback: None,
            proposal: None,
            revisions: 0,
            files_to_migrate: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LayoutOutput {
    pub new_directory_structure: String,
    pub files_to_migrate: Vec<String>,
}

/// Whether a critique accepts the proposal: the marker must appear as a
/// word of its own, not inside words like `BACKEND`.
fn accepts(critique: &str) -> bool {
    critique
        .split_whitespace()
        .any(|word| word.trim_matches(|c: char| !c.is_alphanumeric()) == ACCEPT_MARKER)
}

#[derive(Deserialize)]
struct FileList {
    files: Vec<String>,
}

pub struct LayoutStage<'a> {
    settings: &'a StageSettings,
    services: &'a Services,
}

impl<'a> LayoutStage<'a> {
    pub fn new(settings: &'a StageSettings, services: &'a Services) -> Self {
        Self { settings, services }
    }

    async fn propose(&self, state: &mut LayoutState) -> razor_types::Result<()> {
        let mut vars = self.settings.prompt_vars();
        vars.insert("legacy_structure", state.legacy_structure.clone());
        vars.insert("dependencies", state.dependencies.to_json());
        let (system, first_input) = LAYOUT_PROPOSE.render(&vars);

        let input = match &state.pending_feedback {
            Some(critique) => {
                vars.insert("critique", critique.clone());
                LAYOUT_REVISE.render(&vars).1
            }
            None => first_input,
        };

        let mut session = self
            .services
            .tool_session(
                &self.settings.models.layout,
                system,
                ToolSet::Reader,
                &state.docs_root,
                self.settings.max_tool_rounds,
            )
            .with_history(state.history.clone());
        let proposal = session.process_input(&input).await?;

        state.history = session.into_history();
        state.pending_feedback = None;
        state.proposal = Some(proposal);
        state.phase = LayoutPhase::Critique;
        Ok(())
    }

    async fn critique(&self, state: &mut LayoutState, ctx: &RunContext) -> razor_types::Result<()> {
        let mut vars = self.settings.prompt_vars();
        vars.insert("legacy_structure", state.legacy_structure.clone());
        vars.insert("proposal", state.proposal.clone().unwrap_or_default());
        let critique = self
            .services
            .ask(&self.settings.models.layout, &LAYOUT_CRITIQUE, &vars)
            .await?;

        if accepts(&critique) {
            tracing::info!(revisions = state.revisions, "Layout accepted");
            state.phase = LayoutPhase::Extract;
        } else if state.revisions >= self.settings.max_layout_revisions {
            tracing::warn!(
                revisions = state.revisions,
                "Layout revision limit reached, keeping last proposal"
            );
            state.phase = LayoutPhase::Extract;
        } else {
            state.revisions += 1;
            tracing::info!(revision = state.revisions, "Layout revision requested");
            ctx.emit(PipelineEvent::LayoutRevised {
                revision: state.revisions,
            });
            state.pending_feedback = Some(critique);
            state.phase = LayoutPhase::Propose;
        }
        Ok(())
    }

    async fn extract(&self, state: &mut LayoutState) -> razor_types::Result<()> {
        let mut vars = self.settings.prompt_vars();
        vars.insert("proposal", state.proposal.clone().unwrap_or_default());
        let reply = self
            .services
            .ask(&self.settings.models.layout, &LAYOUT_EXTRACT, &vars)
            .await?;
        let list: FileList = extract_json(StageId::PlanLayout.as_str(), &reply)?;

        let mut files: Vec<String> = Vec::with_capacity(list.files.len());
        for file in list.files {
            let file = file.trim().trim_start_matches("./").to_string();
            if !file.is_empty() && !files.contains(&file) {
                files.push(file);
            }
        }
        tracing::info!(files = files.len(), "Layout files extracted");
        state.files_to_migrate = Some(files);
        state.phase = LayoutPhase::Done;
        Ok(())
    }
}

#[async_trait]
impl<'a> Stage for LayoutStage<'a> {
    type State = LayoutState;
    type Output = LayoutOutput;

    fn id(&self) -> StageId {
        StageId::PlanLayout
    }

    fn assess(&self, state: &LayoutState) -> Assessment {
        if state.files_to_migrate.is_some() {
            Assessment::Complete
        } else if state.history.is_empty() {
            Assessment::Fresh
        } else {
            Assessment::Resume
        }
    }

    async fn run(
        &self,
        mut state: LayoutState,
        ctx: &RunContext,
        checkpointer: &Checkpointer,
    ) -> razor_types::Result<LayoutState> {
        loop {
            match state.phase {
                LayoutPhase::Propose => self.propose(&mut state).await?,
                LayoutPhase::Critique => self.critique(&mut state, ctx).await?,
                LayoutPhase::Extract => self.extract(&mut state).await?,
                LayoutPhase::Done => return Ok(state),
            }
            checkpointer.save(&state).await?;
        }
    }

    fn output(&self, state: &LayoutState) -> razor_types::Result<LayoutOutput> {
        match (&state.proposal, &state.files_to_migrate) {
            (Some(proposal), Some(files)) => Ok(LayoutOutput {
                new_directory_structure: proposal.clone(),
                files_to_migrate: files.clone(),
            }),
            _ => Err(razor_types::RazorError::Other(
                "layout stage has not produced a file list".into(),
            )),
        }
    }
}
