//! Resilient request lifecycle shared by the hint and chat widgets.
//!
//! [`OperationMachine`] is the pure transition function: it consumes events
//! (attempt finished, retry due, timeout, poll tick, probe finished) and
//! returns the effects to run next. [`ResilientController`] executes those
//! effects on tokio, owns the timers, and publishes every transition on a
//! `watch` channel.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};

use crate::metrics::{
    OPERATIONS_SUBMITTED_TOTAL, OPERATION_ATTEMPTS_TOTAL, OPERATION_TRANSITIONS_TOTAL,
    POLL_PROBES_TOTAL, STALE_RESULTS_TOTAL,
};
use crate::models::operation::{
    AttemptOutcome, OperationAttempt, OperationKind, OperationPhase, OperationState, RetryPolicy,
};
use crate::middlewares::trace::{current_trace_id, with_trace_id};
use crate::services::backend_client::BackendError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Please sign in")]
    MissingSession,

    #[error("Controller has been torn down")]
    TornDown,
}

impl From<validator::ValidationErrors> for ControllerError {
    fn from(err: validator::ValidationErrors) -> Self {
        ControllerError::InvalidRequest(err.to_string())
    }
}

/// One unit of remote work plus the cheap probe used once direct attempts
/// are exhausted.
#[async_trait]
pub trait RemoteOperation: Send + Sync + 'static {
    type Request: Clone + Serialize + Send + Sync + 'static;
    type Output: Clone + Serialize + Send + Sync + 'static;

    fn kind(&self) -> OperationKind;

    fn request(&self) -> &Self::Request;

    fn validate(&self) -> Result<(), ControllerError>;

    async fn attempt(&self) -> Result<Self::Output, BackendError>;

    /// `Ok(Some(_))` once the result exists server-side.
    async fn probe(&self) -> Result<Option<Self::Output>, BackendError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event<Out> {
    AttemptFinished {
        generation: u64,
        attempt: u32,
        result: Result<Out, String>,
    },
    RetryDue {
        generation: u64,
        attempt: u32,
    },
    TimeoutElapsed {
        generation: u64,
    },
    PollDue {
        generation: u64,
    },
    ProbeFinished {
        generation: u64,
        result: Result<Option<Out>, String>,
    },
}

impl<Out> Event<Out> {
    pub fn generation(&self) -> u64 {
        match self {
            Event::AttemptFinished { generation, .. }
            | Event::RetryDue { generation, .. }
            | Event::TimeoutElapsed { generation }
            | Event::PollDue { generation }
            | Event::ProbeFinished { generation, .. } => *generation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartAttempt { generation: u64, attempt: u32 },
    ScheduleRetry { generation: u64, attempt: u32, delay: Duration },
    ScheduleTimeout { generation: u64, after: Duration },
    SchedulePoll { generation: u64, after: Duration },
    StartProbe { generation: u64 },
}

/// Why an event did not change the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discarded {
    /// Belongs to a superseded submission.
    Stale,
    /// The controller was cancelled.
    TornDown,
    /// Current phase does not react to this event.
    NotApplicable,
}

const TIMEOUT_MESSAGE: &str = "This is taking longer than expected. Checking for updates...";
const POLLING_MESSAGE: &str = "Still working on it. Checking for updates...";
const GAVE_UP_MESSAGE: &str = "No answer arrived in time. Please try again.";

pub struct OperationMachine<Req, Out> {
    policy: RetryPolicy,
    state: OperationState<Req, Out>,
    retries_used: u32,
    probes_issued: u32,
    torn_down: bool,
}

impl<Req: Clone, Out: Clone> OperationMachine<Req, Out> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: OperationState::default(),
            retries_used: 0,
            probes_issued: 0,
            torn_down: false,
        }
    }

    pub fn state(&self) -> &OperationState<Req, Out> {
        &self.state
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Starts a new generation; anything still in flight for older ones is
    /// discarded when it reports back.
    pub fn submit(&mut self, request: Req) -> Result<Vec<Effect>, ControllerError> {
        if self.torn_down {
            return Err(ControllerError::TornDown);
        }

        let generation = self.state.generation + 1;
        self.state = OperationState {
            phase: OperationPhase::Loading,
            generation,
            request: Some(request),
            attempt_log: vec![OperationAttempt::pending(1)],
            ..OperationState::default()
        };
        self.retries_used = 0;
        self.probes_issued = 0;

        Ok(vec![
            Effect::StartAttempt {
                generation,
                attempt: 1,
            },
            Effect::ScheduleTimeout {
                generation,
                after: self.policy.timeout,
            },
        ])
    }

    pub fn tear_down(&mut self) {
        self.torn_down = true;
    }

    pub fn handle(&mut self, event: Event<Out>) -> Result<Vec<Effect>, Discarded> {
        if self.torn_down {
            return Err(Discarded::TornDown);
        }
        if event.generation() != self.state.generation {
            return Err(Discarded::Stale);
        }

        match event {
            Event::AttemptFinished {
                attempt, result, ..
            } => self.on_attempt_result(attempt, result),
            Event::RetryDue { attempt, .. } => self.on_retry_due(attempt),
            Event::TimeoutElapsed { .. } => self.on_timeout(),
            Event::PollDue { .. } => self.on_poll_due(),
            Event::ProbeFinished { result, .. } => self.on_probe_result(result),
        }
    }

    fn on_attempt_result(
        &mut self,
        attempt: u32,
        result: Result<Out, String>,
    ) -> Result<Vec<Effect>, Discarded> {
        if self.state.phase.is_settled() {
            return Err(Discarded::NotApplicable);
        }

        match result {
            Ok(output) => {
                self.finish_attempt(attempt, AttemptOutcome::Success, None);
                self.resolve(output);
                Ok(Vec::new())
            }
            Err(error) => {
                self.finish_attempt(attempt, AttemptOutcome::Failure, Some(error.clone()));
                self.state.attempts += 1;
                self.state.last_error = Some(error);

                // Timeout guard already switched strategy; keep polling.
                if self.state.phase == OperationPhase::Polling {
                    return Ok(Vec::new());
                }

                if self.retries_used < self.policy.max_retries {
                    self.retries_used += 1;
                    let next_attempt = attempt + 1;
                    self.state.phase = OperationPhase::Retrying;
                    self.state.message = Some(format!(
                        "Retrying... (attempt {} of {})",
                        next_attempt,
                        self.policy.max_retries + 1
                    ));
                    Ok(vec![Effect::ScheduleRetry {
                        generation: self.state.generation,
                        attempt: next_attempt,
                        delay: self.policy.retry_delay(self.retries_used),
                    }])
                } else {
                    Ok(self.enter_polling(POLLING_MESSAGE))
                }
            }
        }
    }

    fn on_retry_due(&mut self, attempt: u32) -> Result<Vec<Effect>, Discarded> {
        if self.state.phase != OperationPhase::Retrying {
            return Err(Discarded::NotApplicable);
        }

        self.state.attempt_log.push(OperationAttempt::pending(attempt));
        Ok(vec![Effect::StartAttempt {
            generation: self.state.generation,
            attempt,
        }])
    }

    fn on_timeout(&mut self) -> Result<Vec<Effect>, Discarded> {
        if !self.state.phase.is_direct() {
            return Err(Discarded::NotApplicable);
        }
        Ok(self.enter_polling(TIMEOUT_MESSAGE))
    }

    fn on_poll_due(&mut self) -> Result<Vec<Effect>, Discarded> {
        if self.state.phase != OperationPhase::Polling {
            return Err(Discarded::NotApplicable);
        }

        self.probes_issued += 1;
        Ok(vec![Effect::StartProbe {
            generation: self.state.generation,
        }])
    }

    fn on_probe_result(
        &mut self,
        result: Result<Option<Out>, String>,
    ) -> Result<Vec<Effect>, Discarded> {
        if self.state.phase != OperationPhase::Polling {
            return Err(Discarded::NotApplicable);
        }

        match result {
            Ok(Some(output)) => {
                self.resolve(output);
                return Ok(Vec::new());
            }
            Ok(None) => {}
            Err(error) => self.state.last_error = Some(error),
        }

        if self.poll_budget_spent() {
            self.state.phase = OperationPhase::Failed;
            self.state.message = Some(GAVE_UP_MESSAGE.to_string());
            return Ok(Vec::new());
        }

        Ok(vec![Effect::SchedulePoll {
            generation: self.state.generation,
            after: self.policy.poll_interval,
        }])
    }

    fn poll_budget_spent(&self) -> bool {
        match self.policy.max_poll_duration {
            Some(max) => self.policy.poll_interval * self.probes_issued >= max,
            None => false,
        }
    }

    fn enter_polling(&mut self, message: &str) -> Vec<Effect> {
        self.state.phase = OperationPhase::Polling;
        self.state.polling_since = Some(chrono::Utc::now());
        self.state.message = Some(message.to_string());
        vec![Effect::SchedulePoll {
            generation: self.state.generation,
            after: self.policy.poll_interval,
        }]
    }

    fn resolve(&mut self, output: Out) {
        self.state.phase = OperationPhase::Resolved;
        self.state.result = Some(output);
        self.state.last_error = None;
        self.state.message = None;
    }

    fn finish_attempt(&mut self, attempt: u32, outcome: AttemptOutcome, error: Option<String>) {
        if let Some(entry) = self
            .state
            .attempt_log
            .iter_mut()
            .rev()
            .find(|entry| entry.attempt == attempt)
        {
            entry.finish(outcome, error);
        }
    }
}

pub type Snapshot<O> =
    OperationState<<O as RemoteOperation>::Request, <O as RemoteOperation>::Output>;

struct Core<O: RemoteOperation> {
    machine: OperationMachine<O::Request, O::Output>,
    operation: Option<Arc<O>>,
    timers: JoinSet<()>,
    /// Last time a widget submitted or read this slot.
    last_viewed: Instant,
    /// Trace id of the submitting request, carried into attempts and probes.
    trace_id: Option<String>,
}

struct Shared<O: RemoteOperation> {
    kind: OperationKind,
    core: Mutex<Core<O>>,
    state_tx: watch::Sender<Snapshot<O>>,
}

impl<O: RemoteOperation> Shared<O> {
    fn lock(&self) -> MutexGuard<'_, Core<O>> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Drives one widget slot. Cheap to clone; clones share state.
pub struct ResilientController<O: RemoteOperation> {
    shared: Arc<Shared<O>>,
}

impl<O: RemoteOperation> Clone for ResilientController<O> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<O: RemoteOperation> ResilientController<O> {
    pub fn new(kind: OperationKind, policy: RetryPolicy) -> Self {
        let (state_tx, _) = watch::channel(OperationState::default());
        Self {
            shared: Arc::new(Shared {
                kind,
                core: Mutex::new(Core {
                    machine: OperationMachine::new(policy),
                    operation: None,
                    timers: JoinSet::new(),
                    last_viewed: Instant::now(),
                    trace_id: None,
                }),
                state_tx,
            }),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.shared.kind
    }

    /// Validates and starts `operation`, superseding whatever was in flight.
    /// Must be called inside a tokio runtime.
    pub fn submit(&self, operation: O) -> Result<u64, ControllerError> {
        operation.validate()?;

        let mut core = self.shared.lock();
        core.last_viewed = Instant::now();
        core.trace_id = current_trace_id();
        let effects = core.machine.submit(operation.request().clone())?;
        let generation = core.machine.state().generation;
        core.operation = Some(Arc::new(operation));

        OPERATIONS_SUBMITTED_TOTAL
            .with_label_values(&[self.shared.kind.as_str()])
            .inc();
        tracing::info!(
            kind = self.shared.kind.as_str(),
            generation,
            "Operation submitted"
        );

        Self::publish(&self.shared, &mut core);
        Self::run_effects(&self.shared, &mut core, effects);
        Ok(generation)
    }

    pub fn state(&self) -> Snapshot<O> {
        self.shared.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<O>> {
        self.shared.state_tx.subscribe()
    }

    /// Stops all timers. In-flight network calls run to completion and are ignored.
    pub fn cancel(&self) {
        let mut core = self.shared.lock();
        if core.machine.is_torn_down() {
            return;
        }
        core.machine.tear_down();
        core.timers.abort_all();
        tracing::debug!(kind = self.shared.kind.as_str(), "Controller cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().machine.is_torn_down()
    }

    /// Records that a widget is still looking at this slot.
    pub fn touch(&self) {
        self.shared.lock().last_viewed = Instant::now();
    }

    /// Time since a widget last showed interest. Zero while a stream is
    /// subscribed. Transitions and probes do not count.
    pub fn unviewed_for(&self) -> Duration {
        if self.shared.state_tx.receiver_count() > 0 {
            return Duration::ZERO;
        }
        self.shared.lock().last_viewed.elapsed()
    }

    fn dispatch(shared: &Arc<Shared<O>>, event: Event<O::Output>) {
        let mut core = shared.lock();
        match core.machine.handle(event) {
            Ok(effects) => {
                Self::publish(shared, &mut core);
                Self::run_effects(shared, &mut core, effects);
            }
            Err(Discarded::Stale) => {
                STALE_RESULTS_TOTAL
                    .with_label_values(&[shared.kind.as_str()])
                    .inc();
                tracing::debug!(kind = shared.kind.as_str(), "Discarded superseded result");
            }
            Err(Discarded::TornDown) | Err(Discarded::NotApplicable) => {}
        }
    }

    fn publish(shared: &Arc<Shared<O>>, core: &mut Core<O>) {
        let state = core.machine.state().clone();
        OPERATION_TRANSITIONS_TOTAL
            .with_label_values(&[shared.kind.as_str(), state.phase.as_str()])
            .inc();
        shared.state_tx.send_replace(state);
    }

    fn run_effects(shared: &Arc<Shared<O>>, core: &mut Core<O>, effects: Vec<Effect>) {
        // reap finished timers so the set does not grow with every retry
        while core.timers.try_join_next().is_some() {}

        let Some(operation) = core.operation.clone() else {
            return;
        };

        for effect in effects {
            match effect {
                Effect::StartAttempt {
                    generation,
                    attempt,
                } => {
                    let shared = shared.clone();
                    let operation = operation.clone();
                    tokio::spawn(with_trace_id(core.trace_id.clone(), async move {
                        let result = operation.attempt().await;
                        let outcome = if result.is_ok() { "success" } else { "failure" };
                        OPERATION_ATTEMPTS_TOTAL
                            .with_label_values(&[shared.kind.as_str(), outcome])
                            .inc();
                        if let Err(e) = &result {
                            tracing::warn!(
                                kind = shared.kind.as_str(),
                                generation,
                                attempt,
                                error = %e,
                                "Attempt failed"
                            );
                        }
                        Self::dispatch(
                            &shared,
                            Event::AttemptFinished {
                                generation,
                                attempt,
                                result: result.map_err(|e| e.to_string()),
                            },
                        );
                    }));
                }
                Effect::ScheduleRetry {
                    generation,
                    attempt,
                    delay,
                } => {
                    let shared = shared.clone();
                    core.timers.spawn(async move {
                        sleep(delay).await;
                        Self::dispatch(
                            &shared,
                            Event::RetryDue {
                                generation,
                                attempt,
                            },
                        );
                    });
                }
                Effect::ScheduleTimeout { generation, after } => {
                    let shared = shared.clone();
                    core.timers.spawn(async move {
                        sleep(after).await;
                        Self::dispatch(&shared, Event::TimeoutElapsed { generation });
                    });
                }
                Effect::SchedulePoll { generation, after } => {
                    let shared = shared.clone();
                    core.timers.spawn(async move {
                        sleep(after).await;
                        Self::dispatch(&shared, Event::PollDue { generation });
                    });
                }
                Effect::StartProbe { generation } => {
                    let shared = shared.clone();
                    let operation = operation.clone();
                    tokio::spawn(with_trace_id(core.trace_id.clone(), async move {
                        let result = operation.probe().await;
                        let label = match &result {
                            Ok(Some(_)) => "found",
                            Ok(None) => "empty",
                            Err(_) => "error",
                        };
                        POLL_PROBES_TOTAL
                            .with_label_values(&[shared.kind.as_str(), label])
                            .inc();
                        Self::dispatch(
                            &shared,
                            Event::ProbeFinished {
                                generation,
                                result: result.map_err(|e| e.to_string()),
                            },
                        );
                    }));
                }
            }
        }
    }
}
