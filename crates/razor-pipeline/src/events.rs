//! Pipeline progress events.
//!
//! Emitted on a [`tokio::sync::broadcast`] channel so the CLI (or a test)
//! can follow a run without reaching into stage internals.

use razor_types::StageId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    Fresh,
    Resumed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    StageStarted {
        stage: StageId,
        mode: StartMode,
    },
    /// A stored checkpoint already holds the finished stage.
    StageSkipped {
        stage: StageId,
    },
    StageCompleted {
        stage: StageId,
    },
    FileDocumented {
        file: String,
        reused: bool,
    },
    FileFailed {
        file: String,
        error: String,
    },
    ReadmeWritten {
        directory: String,
    },
    ListingFailed {
        path: String,
    },
    LayoutRevised {
        revision: usize,
    },
    StepStarted {
        index: usize,
        file: String,
    },
    StepSkipped {
        index: usize,
        file: String,
    },
    StepCompleted {
        index: usize,
        file: String,
    },
    /// The step could not be produced; later steps still run.
    StepFailed {
        index: usize,
        file: String,
        error: String,
    },
    CheckpointSaved {
        stage: StageId,
    },
}

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of [`PipelineEvent`]s. Clones feed the same channel; a slow
/// subscriber sees `Lagged` rather than blocking the run.
#[derive(Clone)]
pub struct EventEmitter(broadcast::Sender<PipelineEvent>);

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        Self(broadcast::channel(capacity).0)
    }

    /// Events emitted while nobody is subscribed are discarded.
    pub fn emit(&self, event: PipelineEvent) {
        if self.0.send(event).is_err() {
            tracing::trace!("Pipeline event had no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.0.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
