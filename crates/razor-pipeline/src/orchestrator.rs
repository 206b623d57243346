//! Runs the stages in order, resuming each from its checkpoint.

use std::future::Future;
use std::sync::Arc;

use razor_types::{RazorError, SessionId};
use tracing::Instrument;

use crate::checkpoint::{CheckpointStore, Checkpointer};
use crate::context::RunContext;
use crate::events::{PipelineEvent, StartMode};
use crate::ignore::load_ignore_file;
use crate::stages::{
    Assessment, DocumentStage, DocumentState, LayoutStage, LayoutState, MigrationReport,
    MigrationState, MigrationStepRunner, PlanningStage, PlanningState, Services, Stage,
    StageSettings,
};
use crate::traversal::TraversalState;

/// Summary of a finished pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub session_id: SessionId,
    pub directory_structure: String,
    pub documented_files: usize,
    pub failed_files: Vec<String>,
    pub files_to_migrate: usize,
    pub plan_steps: usize,
    pub migration: MigrationReport,
}

pub struct StageOrchestrator {
    settings: StageSettings,
    services: Services,
    store: Arc<dyn CheckpointStore>,
}

impl StageOrchestrator {
    pub fn new(settings: StageSettings, services: Services, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            settings,
            services,
            store,
        }
    }

    pub fn settings(&self) -> &StageSettings {
        &self.settings
    }

    /// Document → layout → planning → migration. Each stage's output is the
    /// next stage's input.
    pub async fn run(&self, ctx: &RunContext) -> razor_types::Result<PipelineReport> {
        let span = tracing::info_span!("pipeline", session = %ctx.session_id);
        self.run_stages(ctx).instrument(span).await
    }

    async fn run_stages(&self, ctx: &RunContext) -> razor_types::Result<PipelineReport> {
        let settings = &self.settings;
        let services = &self.services;

        let document = self
            .run_stage(
                &DocumentStage::new(settings, services),
                ctx,
                self.fresh_document(),
            )
            .await?;

        let dependencies = document
            .dependencies
            .restrict(document.documented_files.iter().map(String::as_str));

        let layout = self
            .run_stage(
                &LayoutStage::new(settings, services),
                ctx,
                async {
                    Ok(LayoutState::new(
                        document.docs_root.clone(),
                        document.directory_structure.clone(),
                        dependencies.clone(),
                    ))
                },
            )
            .await?;

        let planning = self
            .run_stage(
                &PlanningStage::new(settings, services),
                ctx,
                async {
                    Ok(PlanningState::new(
                        document.directory_structure.clone(),
                        layout.new_directory_structure.clone(),
                        layout.files_to_migrate.clone(),
                        dependencies.clone(),
                    ))
                },
            )
            .await?;

        let plan_steps = planning.plan.len();
        let migration = self
            .run_stage(
                &MigrationStepRunner::new(settings, services),
                ctx,
                async {
                    Ok(MigrationState::new(
                        planning.plan.clone(),
                        layout.new_directory_structure.clone(),
                        settings.docs_root(),
                        settings.target_root(),
                    ))
                },
            )
            .await?;

        tracing::info!(
            migrated = migration.completed.len(),
            skipped = migration.skipped.len(),
            failed = migration.failed.len(),
            "Pipeline finished"
        );
        Ok(PipelineReport {
            session_id: ctx.session_id.clone(),
            directory_structure: document.directory_structure,
            documented_files: document.documented_files.len(),
            failed_files: document.failed_files,
            files_to_migrate: layout.files_to_migrate.len(),
            plan_steps,
            migration,
        })
    }

    /// Run one stage: skip it when its checkpoint is complete, resume it
    /// when unfinished, otherwise start from `fresh`.
    pub async fn run_stage<S, F>(
        &self,
        stage: &S,
        ctx: &RunContext,
        fresh: F,
    ) -> razor_types::Result<S::Output>
    where
        S: Stage,
        F: Future<Output = razor_types::Result<S::State>>,
    {
        let id = stage.id();
        let checkpointer = Checkpointer::new(self.store.clone(), ctx, id);

        let mut resumed = None;
        if let Some(stored) = checkpointer.load::<S::State>().await? {
            match stage.assess(&stored) {
                Assessment::Complete => {
                    tracing::info!(stage = %id, "Stage already complete, skipping");
                    ctx.emit(PipelineEvent::StageSkipped { stage: id });
                    return stage.output(&stored);
                }
                Assessment::Resume => resumed = Some(stored),
                Assessment::Fresh => {
                    tracing::debug!(stage = %id, "Stored state not resumable, starting fresh")
                }
            }
        }

        let state = match resumed {
            Some(state) => {
                tracing::info!(stage = %id, "Resuming stage");
                ctx.emit(PipelineEvent::StageStarted {
                    stage: id,
                    mode: StartMode::Resumed,
                });
                state
            }
            None => {
                let state = fresh.await?;
                checkpointer.save(&state).await?;
                tracing::info!(stage = %id, "Starting stage");
                ctx.emit(PipelineEvent::StageStarted {
                    stage: id,
                    mode: StartMode::Fresh,
                });
                state
            }
        };

        let state = stage.run(state, ctx, &checkpointer).await?;
        checkpointer.save(&state).await?;
        ctx.emit(PipelineEvent::StageCompleted { stage: id });
        tracing::info!(stage = %id, "Stage completed");
        stage.output(&state)
    }

    async fn fresh_document(&self) -> razor_types::Result<DocumentState> {
        let entry = &self.settings.entry_path;
        let resolved = tokio::fs::canonicalize(entry).await.map_err(|e| {
            RazorError::Config(format!("entry_path {}: {}", entry.display(), e))
        })?;
        let patterns = load_ignore_file(self.services.env.as_ref(), entry).await?;
        let traversal = TraversalState::new(
            entry.clone(),
            resolved,
            patterns,
            self.settings.generate_readme,
        );
        Ok(DocumentState::new(traversal, self.settings.docs_root()))
    }
}
