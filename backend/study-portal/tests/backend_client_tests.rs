use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_test::assert_ok;

use study_portal::{
    middlewares::trace::with_trace_id,
    models::{
        chat::{AnswerChatRequest, ChatRole},
        hint::{GenerateHintRequest, HintLookup},
        EnsureUserRequest,
    },
    services::backend_client::{BackendError, HttpStudyBackend, StudyBackend},
};

async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}/api", addr)
}

fn bearer(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn upstream() -> Router {
    Router::new()
        .route(
            "/api/rag/generate-hint",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                if bearer(&headers) != "Bearer tok" {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "nope"})));
                }
                (
                    StatusCode::OK,
                    Json(json!({"hint": format!("hint for {}", body["question_id"].as_str().unwrap_or(""))})),
                )
            }),
        )
        .route(
            "/api/rag/fetch-hint",
            post(|Json(body): Json<Value>| async move {
                if body["question_id"] == "q-ready" {
                    Json(json!({"found": true, "hint": "stored hint"}))
                } else {
                    Json(json!({"found": false, "message": "Hint not found"}))
                }
            }),
        )
        .route(
            "/api/rag/answer-chat",
            post(|| async { (StatusCode::BAD_GATEWAY, "model overloaded") }),
        )
        .route(
            "/api/rag/chat-history",
            post(|| async {
                Json(json!({"chat_history": [
                    {"role": "user", "content": "hi"},
                    {"role": "ai", "content": "hello"}
                ]}))
            }),
        )
        .route(
            "/api/topic-mastery/{user_id}",
            get(
                |Path(user_id): Path<String>, Query(query): Query<HashMap<String, String>>| async move {
                    Json(json!({"mastery_data": {"study_guides": [{
                        "study_guide_id": query.get("study_guide_id").cloned().unwrap_or_default(),
                        "study_guide_title": user_id,
                        "chapters": []
                    }]}}))
                },
            ),
        )
        .route("/api/users/ensure", post(|| async { StatusCode::NO_CONTENT }))
        .route("/api/health", get(|| async { Json(json!({"status": "ok"})) }))
}

fn hint_request(question_id: &str) -> GenerateHintRequest {
    GenerateHintRequest {
        user_id: "u1".into(),
        test_id: "t1".into(),
        question_id: question_id.into(),
        question_text: "Why?".into(),
    }
}

#[tokio::test]
async fn test_hint_endpoints_round_trip() {
    let base = spawn_upstream(upstream()).await;
    let client = HttpStudyBackend::new(&base, Duration::from_secs(5)).unwrap();

    let hint = client.generate_hint("tok", &hint_request("q-1")).await.unwrap();
    assert_eq!(hint, "hint for q-1");

    let err = client
        .generate_hint("wrong", &hint_request("q-1"))
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());

    let ready = client
        .fetch_hint("tok", &hint_request("q-ready").lookup())
        .await
        .unwrap();
    assert_eq!(ready, HintLookup::Found("stored hint".into()));

    let missing = client
        .fetch_hint("tok", &hint_request("q-2").lookup())
        .await
        .unwrap();
    assert_eq!(
        missing,
        HintLookup::Missing {
            message: Some("Hint not found".into())
        }
    );
}

#[tokio::test]
async fn test_chat_endpoints() {
    let base = spawn_upstream(upstream()).await;
    let client = HttpStudyBackend::new(&base, Duration::from_secs(5)).unwrap();
    let req = AnswerChatRequest {
        user_id: "u1".into(),
        test_id: "t1".into(),
        question_id: "q1".into(),
        user_message: "hi".into(),
    };

    match client.answer_chat("tok", &req).await {
        Err(BackendError::Status { status, body }) => {
            assert_eq!(status, 502);
            assert_eq!(body, "model overloaded");
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let history = client.chat_history("tok", &req.history()).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, ChatRole::Assistant);
}

#[tokio::test]
async fn test_topic_mastery_ensure_and_ping() {
    let base = spawn_upstream(upstream()).await;
    let client = HttpStudyBackend::new(&base, Duration::from_secs(5)).unwrap();

    let guides = client.topic_mastery("tok", "u 1", Some("g7")).await.unwrap();
    assert_eq!(guides.len(), 1);
    assert_eq!(guides[0].study_guide_id, "g7");
    assert_eq!(guides[0].study_guide_title, "u 1");

    let user = EnsureUserRequest {
        user_id: "u1".into(),
        email: None,
        name: None,
    };
    assert_ok!(client.ensure_user("tok", &user).await);
    assert_ok!(client.ping().await);
}

#[tokio::test]
async fn test_trace_id_is_forwarded_upstream() {
    let echo = Router::new().route(
        "/api/rag/fetch-hint",
        post(|headers: HeaderMap| async move {
            let trace_id = headers
                .get("x-trace-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string();
            Json(json!({"found": true, "hint": trace_id}))
        }),
    );
    let base = spawn_upstream(echo).await;
    let client = HttpStudyBackend::new(&base, Duration::from_secs(5)).unwrap();
    let lookup = hint_request("q-1").lookup();

    let traced = with_trace_id(Some("trace-42".to_string()), client.fetch_hint("tok", &lookup))
        .await
        .unwrap();
    assert_eq!(traced, HintLookup::Found("trace-42".into()));

    let untraced = client.fetch_hint("tok", &lookup).await.unwrap();
    assert_eq!(untraced, HintLookup::Found("none".into()));
}

#[tokio::test]
async fn test_unreachable_backend_is_a_network_error() {
    // bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client =
        HttpStudyBackend::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, BackendError::Network(_)));
}
