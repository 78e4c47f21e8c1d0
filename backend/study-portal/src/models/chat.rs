use serde::{Deserialize, Serialize};
use validator::Validate;

/// Body of `POST /api/v1/chat` as sent by the chat widget.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChatWidgetRequest {
    #[validate(length(min = 1, message = "test_id is required"))]
    pub test_id: String,
    #[validate(length(min = 1, message = "question_id is required"))]
    pub question_id: String,
    #[validate(length(min = 1, max = 4000, message = "message must be 1-4000 characters"))]
    pub message: String,
}

/// Upstream `POST /rag/answer-chat` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AnswerChatRequest {
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "test_id is required"))]
    pub test_id: String,
    #[validate(length(min = 1, message = "question_id is required"))]
    pub question_id: String,
    #[validate(length(min = 1, max = 4000, message = "user_message must be 1-4000 characters"))]
    pub user_message: String,
}

impl AnswerChatRequest {
    pub fn history(&self) -> ChatHistoryRequest {
        ChatHistoryRequest {
            user_id: self.user_id.clone(),
            test_id: self.test_id.clone(),
            question_id: self.question_id.clone(),
        }
    }
}

/// Upstream `POST /rag/chat-history` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistoryRequest {
    pub user_id: String,
    pub test_id: String,
    pub question_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerChatResponse {
    pub answer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    #[serde(alias = "ai", alias = "bot")]
    Assistant,
    System,
    /// Any role this portal does not know about yet.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatHistoryResponse {
    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,
}

/// Finds the assistant reply to `message` among turns appended after `baseline`.
///
/// Any assistant turn past the baseline counts. When the fresh turns contain
/// the user's message itself, the first assistant turn after it wins.
pub fn reply_after(history: &[ChatTurn], baseline: usize, message: &str) -> Option<String> {
    let fresh = history.get(baseline..).filter(|turns| !turns.is_empty())?;
    let is_reply = |turn: &&ChatTurn| turn.role == ChatRole::Assistant;

    let asked_at = fresh
        .iter()
        .position(|turn| turn.role == ChatRole::User && turn.content.trim() == message.trim());
    let matched = asked_at.and_then(|at| fresh[at + 1..].iter().find(is_reply));

    matched
        .or_else(|| fresh.iter().rev().find(is_reply))
        .map(|turn| turn.content.clone())
}
