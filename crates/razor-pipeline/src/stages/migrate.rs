//! Migration stage: execute the plan one target file at a time.
//!
//! Each step moves through Plan → Generate → Write → Done. A step whose
//! target already exists with content is skipped before Plan, which makes
//! the stage safe to re-enter after an interruption. A step that fails for
//! reasons specific to its file is recorded and the plan moves on; steps
//! that depend on it see its context as unavailable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use razor_llm::extract_code_block;
use razor_tools::ToolSet;
use razor_types::StageId;
use serde::{Deserialize, Serialize};

use super::{is_contained, Assessment, Services, Stage, StageSettings};
use crate::checkpoint::Checkpointer;
use crate::context::RunContext;
use crate::events::PipelineEvent;
use crate::plan::{MigrationPlan, MigrationStep};
use crate::prompts::{STEP_GENERATE, STEP_PLAN, STEP_WRITE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Plan,
    Generate,
    Write,
}

/// Sub-call results of the step currently being executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub index: usize,
    pub phase: StepPhase,
    pub file_plan: Option<String>,
    pub generated: Option<String>,
}

impl StepProgress {
    fn new(index: usize) -> Self {
        Self {
            index,
            phase: StepPhase::Plan,
            file_plan: None,
            generated: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationState {
    pub plan: MigrationPlan,
    /// Target layout from the layout stage, shown to every step.
    #[serde(default)]
    pub new_structure: String,
    pub docs_root: PathBuf,
    pub target_root: PathBuf,
    pub next_step: usize,
    pub in_flight: Option<StepProgress>,
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
}

impl MigrationState {
    pub fn new(
        plan: MigrationPlan,
        new_structure: impl Into<String>,
        docs_root: PathBuf,
        target_root: PathBuf,
    ) -> Self {
        Self {
            plan,
            new_structure: new_structure.into(),
            docs_root,
            target_root,
            next_step: 0,
            in_flight: None,
            completed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub target_root: PathBuf,
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

pub struct MigrationStepRunner<'a> {
    settings: &'a StageSettings,
    services: &'a Services,
}

impl<'a> MigrationStepRunner<'a> {
    pub fn new(settings: &'a StageSettings, services: &'a Services) -> Self {
        Self { settings, services }
    }

    fn step_vars(
        &self,
        state: &MigrationState,
        step: &MigrationStep,
    ) -> HashMap<&'static str, String> {
        let mut vars = self.settings.prompt_vars();
        vars.insert("new_structure", state.new_structure.clone());
        vars.insert("file", step.file_name.clone());
        vars.insert("description", step.description.clone());
        vars.insert("legacy_dir", self.settings.legacy_language.clone());
        vars.insert("new_dir", self.settings.new_language.clone());
        vars
    }

    async fn plan_file(
        &self,
        state: &MigrationState,
        step: &MigrationStep,
    ) -> razor_types::Result<String> {
        let mut vars = self.step_vars(state, step);
        vars.insert(
            "legacy_context",
            self.load_context(&state.docs_root, &step.legacy_context).await,
        );
        vars.insert(
            "new_context",
            self.load_context(&state.target_root, &step.new_context).await,
        );
        self.services
            .ask(&self.settings.models.migrate, &STEP_PLAN, &vars)
            .await
    }

    async fn generate(
        &self,
        state: &MigrationState,
        step: &MigrationStep,
        file_plan: &str,
    ) -> razor_types::Result<String> {
        let mut vars = self.step_vars(state, step);
        vars.insert("file_plan", file_plan.to_string());
        let (system, input) = STEP_GENERATE.render(&vars);
        let mut session = self.services.tool_session(
            &self.settings.models.migrate,
            system,
            ToolSet::Reader,
            &self.settings.output_path,
            self.settings.max_tool_rounds,
        );
        session.process_input(&input).await
    }

    async fn write(
        &self,
        state: &MigrationState,
        step: &MigrationStep,
        target: &Path,
        generated: &str,
    ) -> razor_types::Result<()> {
        let content = extract_code_block(generated);
        let mut vars = self.step_vars(state, step);
        vars.insert("generated", content.clone());
        let (system, input) = STEP_WRITE.render(&vars);
        // The writer may only touch this step's target, so no other step's
        // file can appear migrated before its own turn.
        let mut session = self.services.session_with(
            &self.settings.models.migrate,
            system,
            ToolSet::single_file_writer(&state.target_root, &step.file_name),
            self.settings.max_tool_rounds,
        );
        session.process_input(&input).await?;

        if !self.services.has_content(target).await? {
            tracing::warn!(file = %step.file_name, "Writer did not create the file, writing it directly");
            self.services.env.write_file(target, &content).await?;
        }
        Ok(())
    }

    /// Plan, Generate and Write for one step, checkpointing after each
    /// sub-phase so a resume continues where `progress` left off.
    async fn execute_step(
        &self,
        state: &mut MigrationState,
        step: &MigrationStep,
        target: &Path,
        mut progress: StepProgress,
        checkpointer: &Checkpointer,
    ) -> razor_types::Result<()> {
        loop {
            match progress.phase {
                StepPhase::Plan => {
                    progress.file_plan = Some(self.plan_file(state, step).await?);
                    progress.phase = StepPhase::Generate;
                }
                StepPhase::Generate => {
                    let file_plan = progress.file_plan.clone().unwrap_or_default();
                    progress.generated = Some(self.generate(state, step, &file_plan).await?);
                    progress.phase = StepPhase::Write;
                }
                StepPhase::Write => {
                    if self.services.has_content(target).await? {
                        tracing::debug!(step = progress.index, "Target written before interruption");
                    } else {
                        let generated = progress.generated.clone().unwrap_or_default();
                        self.write(state, step, target, &generated).await?;
                    }
                    return Ok(());
                }
            }
            state.in_flight = Some(progress.clone());
            checkpointer.save(&*state).await?;
        }
    }

    /// Concatenate the named files under `root` for a prompt. Files that
    /// cannot be read, including targets of failed steps, are marked
    /// `(unavailable)`.
    async fn load_context(&self, root: &Path, files: &[String]) -> String {
        if files.is_empty() {
            return "(none)".to_string();
        }
        let mut out = String::new();
        for file in files {
            let body = match self.services.env.read_file(&root.join(file)).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::debug!(file = %file, error = %e, "Context file unavailable");
                    "(unavailable)".to_string()
                }
            };
            out.push_str(&format!("### {}\n```\n{}\n```\n\n", file, body));
        }
        out
    }
}

#[async_trait]
impl<'a> Stage for MigrationStepRunner<'a> {
    type State = MigrationState;
    type Output = MigrationReport;

    fn id(&self) -> StageId {
        StageId::Migrate
    }

    /// Always re-entered; finished steps are recognised by their output.
    fn assess(&self, _state: &MigrationState) -> Assessment {
        Assessment::Resume
    }

    async fn run(
        &self,
        mut state: MigrationState,
        ctx: &RunContext,
        checkpointer: &Checkpointer,
    ) -> razor_types::Result<MigrationState> {
        state.plan.validate()?;

        if state.next_step >= state.plan.len() && !state.plan.is_empty() {
            // A finished run is re-checked from the top.
            state.next_step = 0;
            state.in_flight = None;
            state.completed.clear();
            state.skipped.clear();
            state.failed.clear();
        }

        while let Some(step) = state.plan.get(state.next_step).cloned() {
            let index = state.next_step;
            let target = state.target_root.join(&step.file_name);

            let progress = match state.in_flight.take() {
                Some(progress) if progress.index == index => progress,
                _ => {
                    if self.services.has_content(&target).await? {
                        tracing::info!(step = index, file = %step.file_name, "Target exists, skipping");
                        ctx.emit(PipelineEvent::StepSkipped {
                            index,
                            file: step.file_name.clone(),
                        });
                        state.skipped.push(step.file_name.clone());
                        state.next_step += 1;
                        checkpointer.save(&state).await?;
                        continue;
                    }
                    let missing: Vec<&String> = step
                        .new_context
                        .iter()
                        .filter(|f| state.failed.contains(f))
                        .collect();
                    if !missing.is_empty() {
                        tracing::warn!(step = index, file = %step.file_name, ?missing, "Context files failed to migrate");
                    }
                    tracing::info!(step = index, file = %step.file_name, "Migrating");
                    ctx.emit(PipelineEvent::StepStarted {
                        index,
                        file: step.file_name.clone(),
                    });
                    StepProgress::new(index)
                }
            };

            if let Err(e) = self
                .execute_step(&mut state, &step, &target, progress, checkpointer)
                .await
            {
                if !is_contained(&e) {
                    return Err(e);
                }
                tracing::warn!(step = index, file = %step.file_name, error = %e, "Step failed, continuing");
                state.in_flight = None;
                state.failed.push(step.file_name.clone());
                state.next_step += 1;
                checkpointer.save(&state).await?;
                ctx.emit(PipelineEvent::StepFailed {
                    index,
                    file: step.file_name,
                    error: e.to_string(),
                });
                continue;
            }

            state.in_flight = None;
            state.completed.push(step.file_name.clone());
            state.next_step += 1;
            checkpointer.save(&state).await?;
            tracing::info!(step = index, file = %step.file_name, "Step completed");
            ctx.emit(PipelineEvent::StepCompleted {
                index,
                file: step.file_name,
            });
        }
        Ok(state)
    }

    fn output(&self, state: &MigrationState) -> razor_types::Result<MigrationReport> {
        Ok(MigrationReport {
            target_root: state.target_root.clone(),
            completed: state.completed.clone(),
            skipped: state.skipped.clone(),
            failed: state.failed.clone(),
        })
    }
}
