//! Checkpoint persistence and resume.
//!
//! Every stage state is persisted after each transition as a [`Checkpoint`]
//! keyed by `(session, stage)`. Writes overwrite the previous checkpoint for
//! the same key; a new session id starts clean.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use razor_types::{RazorError, SessionId, StageId};
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::events::PipelineEvent;
use crate::stages::{DocumentState, LayoutState, MigrationState, PlanningState};

/// Directory under the output root that holds file checkpoints by default.
pub const DEFAULT_CHECKPOINT_DIR: &str = ".checkpoints";

/// The state of whichever stage a checkpoint belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Document(DocumentState),
    Layout(LayoutState),
    Planning(PlanningState),
    Migration(MigrationState),
}

/// Conversion between a concrete stage state and [`PipelineState`].
pub trait StageState: Clone + Send + Sync + Sized {
    fn into_pipeline(self) -> PipelineState;
    fn from_pipeline(state: PipelineState) -> Option<Self>;
}

macro_rules! stage_state {
    ($variant:ident, $ty:ty) => {
        impl StageState for $ty {
            fn into_pipeline(self) -> PipelineState {
                PipelineState::$variant(self)
            }

            fn from_pipeline(state: PipelineState) -> Option<Self> {
                match state {
                    PipelineState::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

stage_state!(Document, DocumentState);
stage_state!(Layout, LayoutState);
stage_state!(Planning, PlanningState);
stage_state!(Migration, MigrationState);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: SessionId,
    pub stage: StageId,
    pub state: PipelineState,
    /// RFC 3339 timestamp of when the checkpoint was written.
    pub timestamp: String,
}

impl Checkpoint {
    pub fn new(session_id: SessionId, stage: StageId, state: PipelineState) -> Self {
        Self {
            session_id,
            stage,
            state,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(
        &self,
        session: &SessionId,
        stage: StageId,
    ) -> razor_types::Result<Option<Checkpoint>>;

    async fn put(&self, checkpoint: &Checkpoint) -> razor_types::Result<()>;
}

// ---------------------------------------------------------------------------
// FileCheckpointStore
// ---------------------------------------------------------------------------

/// Stores checkpoints as pretty JSON at `<root>/<session>/<stage>.json`.
///
/// Each write goes to a temporary file that is then renamed over the
/// previous checkpoint, so a crash mid-write leaves the old one intact.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The default location under a pipeline output directory.
    pub fn under_output(output: &Path) -> Self {
        Self::new(output.join(DEFAULT_CHECKPOINT_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, session: &SessionId, stage: StageId) -> razor_types::Result<PathBuf> {
        let id = session.as_str();
        if id.is_empty() || id == "." || id.contains("..") || id.contains(&['/', '\\'][..]) {
            return Err(RazorError::Checkpoint {
                session: id.to_string(),
                message: "session id cannot be used as a directory name".into(),
            });
        }
        Ok(self.root.join(id).join(format!("{}.json", stage.as_str())))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(
        &self,
        session: &SessionId,
        stage: StageId,
    ) -> razor_types::Result<Option<Checkpoint>> {
        let path = self.path_for(session, stage)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let json = tokio::fs::read_to_string(&path).await?;
        let checkpoint: Checkpoint =
            serde_json::from_str(&json).map_err(|e| RazorError::Checkpoint {
                session: session.to_string(),
                message: format!("{} is unreadable: {}", path.display(), e),
            })?;
        Ok(Some(checkpoint))
    }

    async fn put(&self, checkpoint: &Checkpoint) -> razor_types::Result<()> {
        let path = self.path_for(&checkpoint.session_id, checkpoint.stage)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_string_pretty(checkpoint)?;
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(path = %path.display(), "Checkpoint saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryCheckpointStore
// ---------------------------------------------------------------------------

/// In-process store. Checkpoints are kept serialized so a read always goes
/// through the same decoding a restart would.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<(String, StageId), String>>,
    writes: AtomicUsize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `put` calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned(session: &SessionId) -> RazorError {
        RazorError::Checkpoint {
            session: session.to_string(),
            message: "checkpoint store lock poisoned".into(),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(
        &self,
        session: &SessionId,
        stage: StageId,
    ) -> razor_types::Result<Option<Checkpoint>> {
        let json = {
            let entries = self.entries.lock().map_err(|_| Self::poisoned(session))?;
            entries.get(&(session.to_string(), stage)).cloned()
        };
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, checkpoint: &Checkpoint) -> razor_types::Result<()> {
        let json = serde_json::to_string(checkpoint)?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Self::poisoned(&checkpoint.session_id))?;
        entries.insert((checkpoint.session_id.to_string(), checkpoint.stage), json);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Checkpointer
// ---------------------------------------------------------------------------

/// A store bound to one session and stage.
#[derive(Clone)]
pub struct Checkpointer {
    store: Arc<dyn CheckpointStore>,
    ctx: RunContext,
    stage: StageId,
}

impl Checkpointer {
    pub fn new(store: Arc<dyn CheckpointStore>, ctx: &RunContext, stage: StageId) -> Self {
        Self {
            store,
            ctx: ctx.clone(),
            stage,
        }
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Load this stage's stored state, if any.
    pub async fn load<S: StageState>(&self) -> razor_types::Result<Option<S>> {
        let Some(checkpoint) = self.store.get(&self.ctx.session_id, self.stage).await? else {
            return Ok(None);
        };
        if checkpoint.stage != self.stage {
            return Err(self.mismatch(checkpoint.stage.as_str()));
        }
        S::from_pipeline(checkpoint.state)
            .map(Some)
            .ok_or_else(|| self.mismatch("another stage's state"))
    }

    pub async fn save<S: StageState>(&self, state: &S) -> razor_types::Result<()> {
        let checkpoint = Checkpoint::new(
            self.ctx.session_id.clone(),
            self.stage,
            state.clone().into_pipeline(),
        );
        self.store.put(&checkpoint).await?;
        self.ctx
            .emit(PipelineEvent::CheckpointSaved { stage: self.stage });
        Ok(())
    }

    fn mismatch(&self, found: &str) -> RazorError {
        RazorError::Checkpoint {
            session: self.ctx.session_id.to_string(),
            message: format!("checkpoint for {} holds {}", self.stage, found),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::MigrationPlan;
    use crate::stages::MigrationState;

    fn migration_state() -> MigrationState {
        MigrationState::new(
            MigrationPlan::default(),
            "src/\n└── main.rs",
            PathBuf::from("/out/python"),
            PathBuf::from("/out/rust"),
        )
    }

    #[tokio::test]
    async fn file_store_round_trip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::under_output(dir.path());
        let session = SessionId::new("thread-1");

        assert!(store.get(&session, StageId::Migrate).await.unwrap().is_none());

        let mut state = migration_state();
        let cp = Checkpoint::new(
            session.clone(),
            StageId::Migrate,
            state.clone().into_pipeline(),
        );
        store.put(&cp).await.unwrap();
        let path = dir
            .path()
            .join(".checkpoints")
            .join("thread-1")
            .join("migrate.json");
        assert!(path.exists());

        state.next_step = 3;
        store
            .put(&Checkpoint::new(
                session.clone(),
                StageId::Migrate,
                state.clone().into_pipeline(),
            ))
            .await
            .unwrap();
        let loaded = store.get(&session, StageId::Migrate).await.unwrap().unwrap();
        assert_eq!(loaded.state, PipelineState::Migration(state));

        // No temp files left behind.
        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["migrate.json"]);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = MemoryCheckpointStore::new();
        let a = SessionId::new("a");
        let b = SessionId::new("b");
        store
            .put(&Checkpoint::new(
                a.clone(),
                StageId::Migrate,
                migration_state().into_pipeline(),
            ))
            .await
            .unwrap();
        assert!(store.get(&a, StageId::Migrate).await.unwrap().is_some());
        assert!(store.get(&b, StageId::Migrate).await.unwrap().is_none());
        assert!(store.get(&a, StageId::Document).await.unwrap().is_none());
        assert_eq!(store.writes(), 1);
    }

    #[test]
    fn unsafe_session_ids_rejected() {
        let store = FileCheckpointStore::new("/tmp/cp");
        for bad in ["", "..", "a/b", "x..y", "c\\d"] {
            assert!(
                store.path_for(&SessionId::new(bad), StageId::Document).is_err(),
                "{bad} accepted"
            );
        }
        assert!(store
            .path_for(&SessionId::generate(), StageId::Document)
            .is_ok());
    }

    #[tokio::test]
    async fn checkpointer_rejects_state_of_wrong_stage() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let ctx = RunContext::new(SessionId::new("s"));
        // A migration state written under the document key.
        store
            .put(&Checkpoint::new(
                ctx.session_id.clone(),
                StageId::Document,
                migration_state().into_pipeline(),
            ))
            .await
            .unwrap();
        let checkpointer = Checkpointer::new(store, &ctx, StageId::Document);
        let err = checkpointer.load::<DocumentState>().await.unwrap_err();
        assert!(matches!(err, RazorError::Checkpoint { .. }));
    }

    #[tokio::test]
    async fn checkpointer_save_emits_event() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let ctx = RunContext::new(SessionId::new("s"));
        let mut rx = ctx.events.subscribe();
        let checkpointer = Checkpointer::new(store, &ctx, StageId::Migrate);
        checkpointer.save(&migration_state()).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            PipelineEvent::CheckpointSaved {
                stage: StageId::Migrate
            }
        );
        let loaded: MigrationState = checkpointer.load().await.unwrap().unwrap();
        assert_eq!(loaded, migration_state());
    }
}
