use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension,
};
use chrono::Utc;
use futures::stream::{self, Stream};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

use crate::{
    metrics::SSE_CONNECTIONS_ACTIVE,
    middlewares::auth::AuthSession,
    models::{
        operation::{OperationKind, OperationPhase, OperationState},
        stream::{OperationEvent, Settled, StateChanged},
    },
    services::{registry::SlotKey, AppState},
};

/// GET /api/v1/hints/{test_id}/{question_id}/stream
pub async fn hint_stream(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Path((test_id, question_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let key = SlotKey::new(session.user_id(), test_id, question_id);
    let rx = state.hints.subscribe(&key).await.ok_or((
        StatusCode::NOT_FOUND,
        "No hint requested for this question".to_string(),
    ))?;

    tracing::info!("Client connected to hint stream: question={}", key.question_id);
    Ok(Sse::new(operation_stream(OperationKind::Hint, rx)).keep_alive(KeepAlive::default()))
}

/// GET /api/v1/chat/{test_id}/{question_id}/stream
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Path((test_id, question_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let key = SlotKey::new(session.user_id(), test_id, question_id);
    let rx = state.chat.subscribe(&key).await.ok_or((
        StatusCode::NOT_FOUND,
        "No chat message sent for this question".to_string(),
    ))?;

    tracing::info!("Client connected to chat stream: question={}", key.question_id);
    Ok(Sse::new(operation_stream(OperationKind::Chat, rx)).keep_alive(KeepAlive::default()))
}

fn max_stream_duration() -> Duration {
    let secs = std::env::var("SSE_MAX_STREAM_SECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(3600);
    Duration::from_secs(secs)
}

struct ConnectionGuard;

impl ConnectionGuard {
    fn open() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

enum Step {
    Initial,
    Watching,
    Settle(OperationPhase, u64),
    Done,
}

/// Current snapshot, then one event per transition, then a final `settled`
/// event. Ends early when the controller goes away or the stream hits its
/// maximum lifetime.
pub fn operation_stream<Req, Out>(
    kind: OperationKind,
    rx: watch::Receiver<OperationState<Req, Out>>,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    Req: Serialize + Clone + Send + Sync + 'static,
    Out: Serialize + Clone + Send + Sync + 'static,
{
    let deadline = Instant::now() + max_stream_duration();

    stream::unfold(
        (rx, Step::Initial, ConnectionGuard::open()),
        move |(mut rx, step, guard)| async move {
            let snapshot = match step {
                Step::Done => return None,
                Step::Settle(phase, generation) => {
                    let settled = OperationEvent::Settled(Settled {
                        kind,
                        phase,
                        generation,
                        timestamp: Utc::now(),
                    });
                    tracing::debug!(kind = kind.as_str(), generation, "Stream settled");
                    return Some((Ok(to_event(&settled)), (rx, Step::Done, guard)));
                }
                Step::Initial => latest(&mut rx),
                Step::Watching => match timeout_at(deadline, rx.changed()).await {
                    Ok(Ok(())) => latest(&mut rx),
                    // controller dropped, or the stream outlived its budget
                    Ok(Err(_)) | Err(_) => return None,
                },
            };

            let next = if snapshot.phase.is_settled() {
                Step::Settle(snapshot.phase, snapshot.generation)
            } else {
                Step::Watching
            };

            let changed = OperationEvent::StateChanged(StateChanged {
                kind,
                state: serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null),
                timestamp: Utc::now(),
            });
            Some((Ok(to_event(&changed)), (rx, next, guard)))
        },
    )
}

fn latest<T: Clone>(rx: &mut watch::Receiver<T>) -> T {
    rx.borrow_and_update().clone()
}

fn to_event(event: &OperationEvent) -> Event {
    Event::default()
        .event(event.event_name())
        .data(event.to_sse_data())
}
