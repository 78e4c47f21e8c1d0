#![allow(dead_code)]

use async_trait::async_trait;
use axum::{body::to_bytes, body::Body, http::Request, response::Response, Router};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use study_portal::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    models::{
        chat::{AnswerChatRequest, ChatHistoryRequest, ChatTurn},
        hint::{FetchHintRequest, GenerateHintRequest, HintLookup},
        mastery::MasteryStudyGuide,
        EnsureUserRequest,
    },
    services::{
        backend_client::{BackendError, StudyBackend},
        AppState,
    },
};

pub const TEST_SECRET: &str = "test-secret";

/// One upstream call as observed by the fake, with its offset from the
/// moment the fake was created.
#[derive(Debug, Clone)]
pub struct Call {
    pub endpoint: &'static str,
    pub at: Duration,
}

/// Scriptable in-memory study backend.
pub struct FakeBackend {
    started: Instant,
    calls: Mutex<Vec<Call>>,
    generate_script: Mutex<VecDeque<Result<String, BackendError>>>,
    generate_default: Mutex<Result<String, BackendError>>,
    generate_delay: Mutex<Duration>,
    stored_hint: Mutex<Option<String>>,
    answer_script: Mutex<VecDeque<Result<String, BackendError>>>,
    answer_default: Mutex<Result<String, BackendError>>,
    answer_delay: Mutex<Duration>,
    history: Mutex<Vec<ChatTurn>>,
    history_fails: AtomicBool,
    guides: Mutex<Result<Vec<MasteryStudyGuide>, BackendError>>,
    pub ensure_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            calls: Mutex::new(Vec::new()),
            generate_script: Mutex::new(VecDeque::new()),
            generate_default: Mutex::new(Ok("Consider the discount factor.".to_string())),
            generate_delay: Mutex::new(Duration::ZERO),
            stored_hint: Mutex::new(None),
            answer_script: Mutex::new(VecDeque::new()),
            answer_default: Mutex::new(Ok("Great question!".to_string())),
            answer_delay: Mutex::new(Duration::ZERO),
            history: Mutex::new(Vec::new()),
            history_fails: AtomicBool::new(false),
            guides: Mutex::new(Ok(Vec::new())),
            ensure_calls: AtomicUsize::new(0),
        })
    }

    pub fn unavailable() -> BackendError {
        BackendError::Status {
            status: 503,
            body: "upstream unavailable".to_string(),
        }
    }

    /// Results for the next generate-hint calls, in order.
    pub fn script_generate(&self, results: Vec<Result<String, BackendError>>) {
        self.generate_script.lock().unwrap().extend(results);
    }

    pub fn fail_generate_by_default(&self) {
        *self.generate_default.lock().unwrap() = Err(Self::unavailable());
    }

    pub fn set_generate_delay(&self, delay: Duration) {
        *self.generate_delay.lock().unwrap() = delay;
    }

    /// What fetch-hint reports from now on.
    pub fn store_hint(&self, hint: Option<&str>) {
        *self.stored_hint.lock().unwrap() = hint.map(str::to_string);
    }

    pub fn script_answers(&self, results: Vec<Result<String, BackendError>>) {
        self.answer_script.lock().unwrap().extend(results);
    }

    pub fn fail_answers_by_default(&self) {
        *self.answer_default.lock().unwrap() = Err(Self::unavailable());
    }

    pub fn set_answer_delay(&self, delay: Duration) {
        *self.answer_delay.lock().unwrap() = delay;
    }

    pub fn set_history(&self, turns: Vec<ChatTurn>) {
        *self.history.lock().unwrap() = turns;
    }

    pub fn push_history(&self, turn: ChatTurn) {
        self.history.lock().unwrap().push(turn);
    }

    pub fn fail_history(&self, fail: bool) {
        self.history_fails.store(fail, Ordering::SeqCst);
    }

    pub fn set_guides(&self, guides: Result<Vec<MasteryStudyGuide>, BackendError>) {
        *self.guides.lock().unwrap() = guides;
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<Duration> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .map(|c| c.at)
            .collect()
    }

    fn record(&self, endpoint: &'static str) {
        self.calls.lock().unwrap().push(Call {
            endpoint,
            at: self.started.elapsed(),
        });
    }
}

#[async_trait]
impl StudyBackend for FakeBackend {
    async fn generate_hint(
        &self,
        _token: &str,
        _req: &GenerateHintRequest,
    ) -> Result<String, BackendError> {
        self.record("generate-hint");
        let delay = *self.generate_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.generate_script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.generate_default.lock().unwrap().clone())
    }

    async fn fetch_hint(
        &self,
        _token: &str,
        _req: &FetchHintRequest,
    ) -> Result<HintLookup, BackendError> {
        self.record("fetch-hint");
        Ok(match self.stored_hint.lock().unwrap().clone() {
            Some(hint) => HintLookup::Found(hint),
            None => HintLookup::Missing {
                message: Some("Hint not generated yet".to_string()),
            },
        })
    }

    async fn answer_chat(
        &self,
        _token: &str,
        _req: &AnswerChatRequest,
    ) -> Result<String, BackendError> {
        self.record("answer-chat");
        let delay = *self.answer_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.answer_script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.answer_default.lock().unwrap().clone())
    }

    async fn chat_history(
        &self,
        _token: &str,
        _req: &ChatHistoryRequest,
    ) -> Result<Vec<ChatTurn>, BackendError> {
        self.record("chat-history");
        if self.history_fails.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(self.history.lock().unwrap().clone())
    }

    async fn topic_mastery(
        &self,
        _token: &str,
        _user_id: &str,
        _study_guide_id: Option<&str>,
    ) -> Result<Vec<MasteryStudyGuide>, BackendError> {
        self.record("topic-mastery");
        self.guides.lock().unwrap().clone()
    }

    async fn ensure_user(&self, _token: &str, _req: &EnsureUserRequest) -> Result<(), BackendError> {
        self.record("users-ensure");
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config::for_tests("http://study-backend.invalid")
}

pub fn create_test_state(backend: Arc<FakeBackend>) -> Arc<AppState> {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    Arc::new(AppState::with_backend(test_config(), backend))
}

pub fn create_test_app(backend: Arc<FakeBackend>) -> (Router, Arc<AppState>) {
    let state = create_test_state(backend);
    (create_router(state.clone()), state)
}

pub fn token_for(user_id: &str) -> String {
    token_with(user_id, Some(&format!("sid-{}", user_id)), 3600)
}

pub fn token_with(user_id: &str, sid: Option<&str>, ttl_secs: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = JwtClaims {
        sub: user_id.to_string(),
        email: Some(format!("{}@example.com", user_id)),
        name: None,
        sid: sid.map(str::to_string),
        exp: (now + ttl_secs) as usize,
        iat: now as usize,
    };
    JwtService::new(TEST_SECRET)
        .generate_token(&claims)
        .expect("sign test token")
}

pub fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub fn delete(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Lets spawned attempt/probe tasks run without moving the paused clock.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
