//! Planning stage: order the target files into a validated migration plan.

use async_trait::async_trait;
use razor_llm::extract_json;
use razor_types::{RazorError, StageId};
use serde::{Deserialize, Serialize};

use super::{Assessment, Services, Stage, StageSettings};
use crate::checkpoint::Checkpointer;
use crate::context::RunContext;
use crate::dependency::DependencyGraph;
use crate::plan::MigrationPlan;
use crate::prompts::{PLAN_DRAFT, PLAN_STRUCTURE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningState {
    pub legacy_structure: String,
    pub new_structure: String,
    pub files_to_migrate: Vec<String>,
    pub dependencies: DependencyGraph,
    /// Free-form plan from the planner call.
    pub draft: Option<String>,
    /// Validated, structured plan. Immutable once set.
    pub plan: Option<MigrationPlan>,
}

impl PlanningState {
    pub fn new(
        legacy_structure: impl Into<String>,
        new_structure: impl Into<String>,
        files_to_migrate: Vec<String>,
        dependencies: DependencyGraph,
    ) -> Self {
        Self {
            legacy_structure: legacy_structure.into(),
            new_structure: new_structure.into(),
            files_to_migrate,
            dependencies,
            draft: None,
            plan: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanningOutput {
    pub plan: MigrationPlan,
}

pub struct PlanningStage<'a> {
    settings: &'a StageSettings,
    services: &'a Services,
}

impl<'a> PlanningStage<'a> {
    pub fn new(settings: &'a StageSettings, services: &'a Services) -> Self {
        Self { settings, services }
    }

    async fn draft(&self, state: &PlanningState) -> razor_types::Result<String> {
        let mut vars = self.settings.prompt_vars();
        vars.insert("legacy_structure", state.legacy_structure.clone());
        vars.insert("new_structure", state.new_structure.clone());
        vars.insert("files", state.files_to_migrate.join("\n"));
        vars.insert("dependencies", state.dependencies.to_json());
        self.services
            .ask(&self.settings.models.planner, &PLAN_DRAFT, &vars)
            .await
    }

    /// Extract and validate the structured plan. A rejected plan is sent
    /// back with the rejection reason up to `max_plan_repairs` times.
    async fn structure(&self, draft: &str) -> razor_types::Result<MigrationPlan> {
        let mut feedback = String::new();
        let mut attempt = 0;
        loop {
            let mut vars = self.settings.prompt_vars();
            vars.insert("draft", draft.to_string());
            vars.insert("feedback", feedback.clone());
            let reply = self
                .services
                .ask(&self.settings.models.planner, &PLAN_STRUCTURE, &vars)
                .await?;

            let result = extract_json::<MigrationPlan>(StageId::PlanOrder.as_str(), &reply)
                .and_then(|plan| plan.validate().map(|_| plan));
            match result {
                Ok(plan) => return Ok(plan),
                Err(e @ (RazorError::PlanValidation { .. } | RazorError::MalformedOutput { .. }))
                    if attempt < self.settings.max_plan_repairs =>
                {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "Plan rejected, asking for a corrected plan");
                    feedback = format!(
                        "\n\nYour previous answer was rejected: {}\nReturn a corrected plan.",
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<'a> Stage for PlanningStage<'a> {
    type State = PlanningState;
    type Output = PlanningOutput;

    fn id(&self) -> StageId {
        StageId::PlanOrder
    }

    fn assess(&self, state: &PlanningState) -> Assessment {
        match (&state.plan, &state.draft) {
            (Some(_), _) => Assessment::Complete,
            (None, Some(_)) => Assessment::Resume,
            (None, None) => Assessment::Fresh,
        }
    }

    async fn run(
        &self,
        mut state: PlanningState,
        _ctx: &RunContext,
        checkpointer: &Checkpointer,
    ) -> razor_types::Result<PlanningState> {
        let draft = match &state.draft {
            Some(draft) => draft.clone(),
            None => {
                let draft = self.draft(&state).await?;
                state.draft = Some(draft.clone());
                checkpointer.save(&state).await?;
                draft
            }
        };

        if state.plan.is_none() {
            let plan = self.structure(&draft).await?;
            tracing::info!(steps = plan.len(), "Migration plan accepted");
            state.plan = Some(plan);
            checkpointer.save(&state).await?;
        }
        Ok(state)
    }

    fn output(&self, state: &PlanningState) -> razor_types::Result<PlanningOutput> {
        let plan = state
            .plan
            .clone()
            .ok_or_else(|| RazorError::Other("planning stage has no plan".into()))?;
        plan.validate()?;
        Ok(PlanningOutput { plan })
    }
}
