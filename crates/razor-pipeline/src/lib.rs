//! Resumable migration pipeline.
//!
//! This crate implements the debtrazor pipeline: the frame-stack
//! directory traversal, dependency aggregation, checkpoint/resume, the
//! document, layout, planning and migration stages, and the orchestrator
//! that runs them in order.

pub mod checkpoint;
pub mod context;
pub mod dependency;
pub mod events;
pub mod ignore;
pub mod orchestrator;
pub mod plan;
pub mod prompts;
pub mod retry;
pub mod stages;
pub mod traversal;

pub use checkpoint::{
    Checkpoint, CheckpointStore, Checkpointer, FileCheckpointStore, MemoryCheckpointStore,
    PipelineState, StageState, DEFAULT_CHECKPOINT_DIR,
};
pub use context::RunContext;
pub use dependency::DependencyGraph;
pub use events::{EventEmitter, PipelineEvent, StartMode};
pub use ignore::{load_ignore_file, parse_ignore_file, IgnoreRules, IGNORE_FILE_NAME};
pub use orchestrator::{PipelineReport, StageOrchestrator};
pub use plan::{MigrationPlan, MigrationStep};
pub use prompts::{expand_variables, Prompt};
pub use retry::{execute_with_retry, BackoffPolicy, Retrying};
pub use stages::{
    Assessment, DocumentOutput, DocumentStage, DocumentState, LayoutOutput, LayoutStage,
    LayoutState, MigrationReport, MigrationState, MigrationStepRunner, PlanningOutput,
    PlanningStage, PlanningState, Services, Stage, StageModels, StageSettings,
};
pub use traversal::{
    Demand, DirectoryFrame, DirectoryTask, EntryKind, Event, FileTask, FrameCount, Phase,
    PendingEntry, TraversalEngine, TraversalState,
};
