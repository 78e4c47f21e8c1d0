use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Hint,
    Chat,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Hint => "hint",
            OperationKind::Chat => "chat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPhase {
    Idle,
    Loading,
    Retrying,
    Polling,
    Resolved,
    Failed,
}

impl OperationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationPhase::Idle => "idle",
            OperationPhase::Loading => "loading",
            OperationPhase::Retrying => "retrying",
            OperationPhase::Polling => "polling",
            OperationPhase::Resolved => "resolved",
            OperationPhase::Failed => "failed",
        }
    }

    /// Phases in which a direct attempt may still be pending.
    pub fn is_direct(&self) -> bool {
        matches!(self, OperationPhase::Loading | OperationPhase::Retrying)
    }

    /// No further transitions happen without a new submit.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            OperationPhase::Idle | OperationPhase::Resolved | OperationPhase::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Success,
    Failure,
}

/// One direct try at resolving the submitted request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationAttempt {
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OperationAttempt {
    pub fn pending(attempt: u32) -> Self {
        Self {
            attempt,
            outcome: AttemptOutcome::Pending,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(&mut self, outcome: AttemptOutcome, error: Option<String>) {
        self.outcome = outcome;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}

/// Snapshot of a controller, published on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationState<Req, Out> {
    pub phase: OperationPhase,
    pub generation: u64,
    pub request: Option<Req>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub result: Option<Out>,
    pub attempt_log: Vec<OperationAttempt>,
    pub polling_since: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl<Req, Out> Default for OperationState<Req, Out> {
    fn default() -> Self {
        Self {
            phase: OperationPhase::Idle,
            generation: 0,
            request: None,
            attempts: 0,
            last_error: None,
            result: None,
            attempt_log: Vec::new(),
            polling_since: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub max_poll_duration: Option<Duration>,
}

impl RetryPolicy {
    /// Linear backoff: the n-th retry (1-based) waits `(n - 1) * base_delay`.
    pub fn retry_delay(&self, retry_number: u32) -> Duration {
        self.base_delay * retry_number.saturating_sub(1)
    }

    pub fn hint() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(5000),
            timeout: Duration::from_secs(45),
            max_poll_duration: None,
        }
    }

    pub fn chat() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            ..Self::hint()
        }
    }
}
