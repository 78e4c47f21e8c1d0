mod common;

use axum::http::StatusCode;
use serde_json::json;
use std::time::Duration;
use tower::ServiceExt;

use common::{get, json_body, post_json, settle, token_for, FakeBackend};
use study_portal::models::chat::{ChatRole, ChatTurn};

const SLOT: &str = "/api/v1/chat/test-1/q-7";

fn chat_body(message: &str) -> serde_json::Value {
    json!({"test_id": "test-1", "question_id": "q-7", "message": message})
}

fn earlier_conversation() -> Vec<ChatTurn> {
    vec![
        ChatTurn::user("What does beta measure?"),
        ChatTurn::assistant("Sensitivity to market moves."),
    ]
}

#[tokio::test]
async fn test_send_message_resolves_with_answer() {
    let backend = FakeBackend::new();
    backend.set_history(earlier_conversation());
    let (app, _) = common::create_test_app(backend.clone());
    let token = token_for("chat-user");

    let response = app
        .clone()
        .oneshot(post_json("/api/v1/chat", &token, chat_body("What is VaR?")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let submitted = json_body(response).await;
    assert_eq!(submitted["request"]["user_message"], "What is VaR?");

    settle().await;

    let state = json_body(app.oneshot(get(SLOT, &token)).await.unwrap()).await;
    assert_eq!(state["phase"], "resolved");
    assert_eq!(state["result"], "Great question!");

    // baseline lookup happens before the message goes out
    let history_at = backend.calls_to("chat-history");
    let answer_at = backend.calls_to("answer-chat");
    assert_eq!(history_at.len(), 1);
    assert_eq!(answer_at.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_sends_poll_history_for_reply() {
    let backend = FakeBackend::new();
    backend.set_history(earlier_conversation());
    backend.fail_answers_by_default();
    let (app, _) = common::create_test_app(backend.clone());
    let token = token_for("chat-user");

    app.clone()
        .oneshot(post_json("/api/v1/chat", &token, chat_body("What is VaR?")))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(backend.calls_to("answer-chat").len(), 4);
    let state = json_body(app.clone().oneshot(get(SLOT, &token)).await.unwrap()).await;
    assert_eq!(state["phase"], "polling");

    // the backend processed the message after all and stored a reply
    backend.push_history(ChatTurn::user("What is VaR?"));
    backend.push_history(ChatTurn::assistant("Value at Risk is a loss quantile."));

    tokio::time::sleep(Duration::from_millis(5000)).await;

    let state = json_body(app.oneshot(get(SLOT, &token)).await.unwrap()).await;
    assert_eq!(state["phase"], "resolved");
    assert_eq!(state["result"], "Value at Risk is a loss quantile.");
    assert_eq!(backend.calls_to("answer-chat").len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_old_replies_do_not_resolve_a_new_question() {
    let backend = FakeBackend::new();
    // same question asked and answered earlier in the conversation
    backend.set_history(vec![
        ChatTurn::user("What is VaR?"),
        ChatTurn::assistant("An earlier answer."),
    ]);
    backend.fail_answers_by_default();
    let (app, _) = common::create_test_app(backend.clone());
    let token = token_for("chat-user");

    app.clone()
        .oneshot(post_json("/api/v1/chat", &token, chat_body("What is VaR?")))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(20)).await;
    let state = json_body(app.oneshot(get(SLOT, &token)).await.unwrap()).await;
    assert_eq!(state["phase"], "polling");
    assert!(state["result"].is_null());
}

#[tokio::test(start_paused = true)]
async fn test_chat_timeout_polls_and_probe_wins_over_slow_attempt() {
    let backend = FakeBackend::new();
    backend.set_answer_delay(Duration::from_secs(40));
    let (app, _) = common::create_test_app(backend.clone());
    let token = token_for("chat-user");

    app.clone()
        .oneshot(post_json("/api/v1/chat", &token, chat_body("Explain convexity")))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;
    let state = json_body(app.clone().oneshot(get(SLOT, &token)).await.unwrap()).await;
    assert_eq!(state["phase"], "polling");

    backend.push_history(ChatTurn::user("Explain convexity"));
    backend.push_history(ChatTurn::assistant("Curvature of price vs yield."));

    tokio::time::sleep(Duration::from_secs(5)).await;
    let state = json_body(app.clone().oneshot(get(SLOT, &token)).await.unwrap()).await;
    assert_eq!(state["phase"], "resolved");
    assert_eq!(state["result"], "Curvature of price vs yield.");

    // the slow direct answer arriving afterwards changes nothing
    tokio::time::sleep(Duration::from_secs(10)).await;
    let state = json_body(app.oneshot(get(SLOT, &token)).await.unwrap()).await;
    assert_eq!(state["result"], "Curvature of price vs yield.");
}

#[tokio::test(start_paused = true)]
async fn test_polling_resolves_despite_unknown_roles_and_reworded_message() {
    let backend = FakeBackend::new();
    backend.set_history(vec![ChatTurn {
        role: ChatRole::Other,
        content: "Welcome to the review session.".to_string(),
    }]);
    backend.fail_answers_by_default();
    let (app, _) = common::create_test_app(backend.clone());
    let token = token_for("chat-user");

    app.clone()
        .oneshot(post_json("/api/v1/chat", &token, chat_body("What is VaR?")))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;

    // stored without the question mark
    backend.push_history(ChatTurn::user("What is VaR"));
    backend.push_history(ChatTurn::assistant("A loss quantile."));

    tokio::time::sleep(Duration::from_secs(5)).await;
    let state = json_body(app.oneshot(get(SLOT, &token)).await.unwrap()).await;
    assert_eq!(state["phase"], "resolved");
    assert_eq!(state["result"], "A loss quantile.");
}

#[tokio::test(start_paused = true)]
async fn test_unknown_baseline_never_resolves_with_an_earlier_reply() {
    let backend = FakeBackend::new();
    backend.set_history(vec![
        ChatTurn::user("What is VaR?"),
        ChatTurn::assistant("An earlier answer."),
    ]);
    backend.fail_history(true);
    backend.fail_answers_by_default();
    let (app, _) = common::create_test_app(backend.clone());
    let token = token_for("chat-user");

    app.clone()
        .oneshot(post_json("/api/v1/chat", &token, chat_body("What is VaR?")))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    backend.fail_history(false);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let state = json_body(app.clone().oneshot(get(SLOT, &token)).await.unwrap()).await;
    assert_eq!(state["phase"], "polling");
    assert!(state["result"].is_null());

    backend.push_history(ChatTurn::user("What is VaR?"));
    backend.push_history(ChatTurn::assistant("Value at Risk, measured fresh."));

    tokio::time::sleep(Duration::from_secs(5)).await;
    let state = json_body(app.oneshot(get(SLOT, &token)).await.unwrap()).await;
    assert_eq!(state["phase"], "resolved");
    assert_eq!(state["result"], "Value at Risk, measured fresh.");
}

#[tokio::test]
async fn test_history_failure_before_send_still_submits() {
    let backend = FakeBackend::new();
    backend.fail_history(true);
    let (app, _) = common::create_test_app(backend.clone());
    let token = token_for("chat-user");

    let response = app
        .clone()
        .oneshot(post_json("/api/v1/chat", &token, chat_body("Hello?")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    settle().await;
    let state = json_body(app.oneshot(get(SLOT, &token)).await.unwrap()).await;
    assert_eq!(state["phase"], "resolved");
}

#[tokio::test]
async fn test_history_is_proxied() {
    let backend = FakeBackend::new();
    backend.set_history(earlier_conversation());
    let (app, _) = common::create_test_app(backend.clone());
    let token = token_for("chat-user");

    let response = app
        .clone()
        .oneshot(get(&format!("{}/history", SLOT), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["chat_history"].as_array().unwrap().len(), 2);
    assert_eq!(body["chat_history"][1]["role"], "assistant");

    backend.fail_history(true);
    let response = app
        .oneshot(get(&format!("{}/history", SLOT), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let backend = FakeBackend::new();
    let (app, _) = common::create_test_app(backend.clone());

    let response = app
        .oneshot(post_json("/api/v1/chat", &token_for("chat-user"), chat_body("")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(backend.calls_to("answer-chat").is_empty());
}
