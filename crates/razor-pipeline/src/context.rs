//! Per-run context threaded through every stage call.

use razor_types::SessionId;

use crate::events::{EventEmitter, PipelineEvent};

/// Session identity plus the event sink for one pipeline run.
#[derive(Clone)]
pub struct RunContext {
    pub session_id: SessionId,
    pub events: EventEmitter,
}

impl RunContext {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            events: EventEmitter::default(),
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn emit(&self, event: PipelineEvent) {
        self.events.emit(event);
    }
}
