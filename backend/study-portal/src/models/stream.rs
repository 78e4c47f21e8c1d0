use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::operation::{OperationKind, OperationPhase};

/// Events pushed to widgets over SSE while an operation is tracked.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OperationEvent {
    StateChanged(StateChanged),
    Settled(Settled),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StateChanged {
    pub kind: OperationKind,
    pub state: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settled {
    pub kind: OperationKind,
    pub phase: OperationPhase,
    pub generation: u64,
    pub timestamp: DateTime<Utc>,
}

impl OperationEvent {
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            OperationEvent::StateChanged(_) => "state-changed",
            OperationEvent::Settled(_) => "settled",
        }
    }
}
