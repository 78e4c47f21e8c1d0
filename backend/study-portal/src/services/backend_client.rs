use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::metrics::{BACKEND_REQUESTS_TOTAL, BACKEND_REQUEST_DURATION_SECONDS};
use crate::middlewares::trace::{current_trace_id, TRACE_ID_HEADER};
use crate::models::{
    chat::{
        AnswerChatRequest, AnswerChatResponse, ChatHistoryRequest, ChatHistoryResponse, ChatTurn,
    },
    hint::{
        FetchHintRequest, FetchHintResponse, GenerateHintRequest, GenerateHintResponse, HintLookup,
    },
    mastery::{MasteryStudyGuide, TopicMasteryEnvelope},
    EnsureUserRequest,
};

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode backend response: {0}")]
    Decode(String),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

impl BackendError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BackendError::Status { status, .. } if *status == 401 || *status == 403)
    }
}

/// The study backend as seen by the portal. Every call forwards the
/// learner's bearer token.
#[async_trait]
pub trait StudyBackend: Send + Sync {
    async fn generate_hint(
        &self,
        token: &str,
        req: &GenerateHintRequest,
    ) -> Result<String, BackendError>;

    async fn fetch_hint(
        &self,
        token: &str,
        req: &FetchHintRequest,
    ) -> Result<HintLookup, BackendError>;

    async fn answer_chat(&self, token: &str, req: &AnswerChatRequest)
        -> Result<String, BackendError>;

    async fn chat_history(
        &self,
        token: &str,
        req: &ChatHistoryRequest,
    ) -> Result<Vec<ChatTurn>, BackendError>;

    async fn topic_mastery(
        &self,
        token: &str,
        user_id: &str,
        study_guide_id: Option<&str>,
    ) -> Result<Vec<MasteryStudyGuide>, BackendError>;

    async fn ensure_user(&self, token: &str, req: &EnsureUserRequest) -> Result<(), BackendError>;

    async fn ping(&self) -> Result<(), BackendError>;
}

pub struct HttpStudyBackend {
    client: Client,
    base_url: Url,
}

impl HttpStudyBackend {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        // join() drops the last path segment unless the base ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| anyhow::anyhow!("Invalid study backend URL {}: {}", base_url, e))?;

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {}", path, e)))
    }

    async fn post_json<B, R>(&self, token: &str, path: &str, body: &B) -> Result<R, BackendError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let request = self.client.post(url).bearer_auth(token).json(body);
        self.execute(path, request).await
    }

    async fn execute<R>(&self, label: &str, request: reqwest::RequestBuilder) -> Result<R, BackendError>
    where
        R: DeserializeOwned,
    {
        let request = match current_trace_id() {
            Some(trace_id) => request.header(TRACE_ID_HEADER, trace_id),
            None => request,
        };

        let start = Instant::now();
        let result = request.send().await;
        BACKEND_REQUEST_DURATION_SECONDS
            .with_label_values(&[label])
            .observe(start.elapsed().as_secs_f64());

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                BACKEND_REQUESTS_TOTAL
                    .with_label_values(&[label, "network_error"])
                    .inc();
                tracing::warn!(endpoint = label, error = %e, "Study backend unreachable");
                return Err(BackendError::Network(e.to_string()));
            }
        };

        let status = response.status();
        BACKEND_REQUESTS_TOTAL
            .with_label_values(&[label, status.as_str()])
            .inc();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(endpoint = label, status = %status, "Study backend returned an error");
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        // 204 and empty bodies decode as JSON null
        let payload: &[u8] = if status == StatusCode::NO_CONTENT || bytes.is_empty() {
            b"null"
        } else {
            &bytes
        };

        serde_json::from_slice(payload).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl StudyBackend for HttpStudyBackend {
    async fn generate_hint(
        &self,
        token: &str,
        req: &GenerateHintRequest,
    ) -> Result<String, BackendError> {
        let response: GenerateHintResponse =
            self.post_json(token, "rag/generate-hint", req).await?;
        Ok(response.hint)
    }

    async fn fetch_hint(
        &self,
        token: &str,
        req: &FetchHintRequest,
    ) -> Result<HintLookup, BackendError> {
        let response: FetchHintResponse = self.post_json(token, "rag/fetch-hint", req).await?;
        Ok(response.into())
    }

    async fn answer_chat(
        &self,
        token: &str,
        req: &AnswerChatRequest,
    ) -> Result<String, BackendError> {
        let response: AnswerChatResponse = self.post_json(token, "rag/answer-chat", req).await?;
        Ok(response.answer)
    }

    async fn chat_history(
        &self,
        token: &str,
        req: &ChatHistoryRequest,
    ) -> Result<Vec<ChatTurn>, BackendError> {
        let response: ChatHistoryResponse =
            self.post_json(token, "rag/chat-history", req).await?;
        Ok(response.chat_history)
    }

    async fn topic_mastery(
        &self,
        token: &str,
        user_id: &str,
        study_guide_id: Option<&str>,
    ) -> Result<Vec<MasteryStudyGuide>, BackendError> {
        let mut url = self.endpoint("topic-mastery/")?;
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl("topic-mastery".to_string()))?
            .pop_if_empty()
            .push(user_id);
        if let Some(guide) = study_guide_id {
            url.query_pairs_mut().append_pair("study_guide_id", guide);
        }

        let request = self.client.get(url).bearer_auth(token);
        let envelope: Option<TopicMasteryEnvelope> =
            self.execute("topic-mastery", request).await?;
        Ok(envelope.map(|e| e.into_guides()).unwrap_or_default())
    }

    async fn ensure_user(&self, token: &str, req: &EnsureUserRequest) -> Result<(), BackendError> {
        let _: Option<serde_json::Value> = self.post_json(token, "users/ensure", req).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let url = self.endpoint("health")?;
        let _: Option<serde_json::Value> = self.execute("health", self.client.get(url)).await?;
        Ok(())
    }
}
