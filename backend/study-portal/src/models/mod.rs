use serde::{Deserialize, Serialize};

pub mod chat;
pub mod hint;
pub mod mastery;
pub mod operation;
pub mod stream;

/// JSON error body shared by handlers and middlewares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub message: String,
    pub status: u16,
}

impl ApiMessage {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }
}

/// Upstream `POST /users/ensure` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureUserRequest {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
