use crate::types::{RunMode, RunState};
use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// StatusEvent
// ---------------------------------------------------------------------------

/// Snapshot emitted to the external monitor on every state transition:
/// which sequence, what mode it was started under, where the cursor is, and
/// the error code if the sequence faulted.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub sequence: String,
    pub mode: RunMode,
    pub state: RunState,
    pub cursor: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(
        sequence: impl Into<String>,
        mode: RunMode,
        state: RunState,
        cursor: u32,
        error: Option<String>,
    ) -> Self {
        StatusEvent {
            sequence: sequence.into(),
            mode,
            state,
            cursor,
            error,
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
