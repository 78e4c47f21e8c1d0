use serde::{Deserialize, Serialize};
use validator::Validate;

/// Body of `POST /api/v1/hints` as sent by the hint widget.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HintWidgetRequest {
    #[validate(length(min = 1, message = "test_id is required"))]
    pub test_id: String,
    #[validate(length(min = 1, message = "question_id is required"))]
    pub question_id: String,
    #[validate(length(min = 1, message = "question_text is required"))]
    pub question_text: String,
}

/// Upstream `POST /rag/generate-hint` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GenerateHintRequest {
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "test_id is required"))]
    pub test_id: String,
    #[validate(length(min = 1, message = "question_id is required"))]
    pub question_id: String,
    #[validate(length(min = 1, max = 8000, message = "question_text is required"))]
    pub question_text: String,
}

impl GenerateHintRequest {
    pub fn lookup(&self) -> FetchHintRequest {
        FetchHintRequest {
            user_id: self.user_id.clone(),
            test_id: self.test_id.clone(),
            question_id: self.question_id.clone(),
        }
    }
}

/// Upstream `POST /rag/fetch-hint` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchHintRequest {
    pub user_id: String,
    pub test_id: String,
    pub question_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateHintResponse {
    pub hint: String,
}

/// Raw `fetch-hint` body; `found` drives which of the optional fields matter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchHintResponse {
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HintLookup {
    Found(String),
    Missing { message: Option<String> },
}

impl From<FetchHintResponse> for HintLookup {
    fn from(raw: FetchHintResponse) -> Self {
        match raw.hint {
            // found=true with an empty hint is treated as not ready yet
            Some(hint) if raw.found && !hint.trim().is_empty() => HintLookup::Found(hint),
            _ => HintLookup::Missing {
                message: raw.message,
            },
        }
    }
}
