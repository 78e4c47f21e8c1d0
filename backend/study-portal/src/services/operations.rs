use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use validator::Validate;

use crate::models::{
    chat::{reply_after, AnswerChatRequest},
    hint::{GenerateHintRequest, HintLookup},
    operation::OperationKind,
};
use crate::services::{
    backend_client::{BackendError, StudyBackend},
    controller::{ControllerError, RemoteOperation},
};

/// Generates (or picks up an already generated) hint for one question.
pub struct HintOperation {
    backend: Arc<dyn StudyBackend>,
    token: String,
    request: GenerateHintRequest,
}

impl HintOperation {
    pub fn new(backend: Arc<dyn StudyBackend>, token: String, request: GenerateHintRequest) -> Self {
        Self {
            backend,
            token,
            request,
        }
    }

    async fn lookup(&self) -> Result<Option<String>, BackendError> {
        match self
            .backend
            .fetch_hint(&self.token, &self.request.lookup())
            .await?
        {
            HintLookup::Found(hint) => Ok(Some(hint)),
            HintLookup::Missing { message } => {
                if let Some(message) = message {
                    tracing::debug!(question_id = %self.request.question_id, "{}", message);
                }
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl RemoteOperation for HintOperation {
    type Request = GenerateHintRequest;
    type Output = String;

    fn kind(&self) -> OperationKind {
        OperationKind::Hint
    }

    fn request(&self) -> &GenerateHintRequest {
        &self.request
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.token.trim().is_empty() {
            return Err(ControllerError::MissingSession);
        }
        self.request.validate()?;
        Ok(())
    }

    async fn attempt(&self) -> Result<String, BackendError> {
        // A previous attempt may have finished generating server-side after
        // the client gave up on it.
        match self.lookup().await {
            Ok(Some(hint)) => return Ok(hint),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Hint lookup failed, generating anyway");
            }
        }

        self.backend
            .generate_hint(&self.token, &self.request)
            .await
    }

    async fn probe(&self) -> Result<Option<String>, BackendError> {
        self.lookup().await
    }
}

/// Sends one chat message and waits for the tutor's reply.
pub struct ChatTurnOperation {
    backend: Arc<dyn StudyBackend>,
    token: String,
    request: AnswerChatRequest,
    /// History length before the message went out. Unknown until a history
    /// read succeeds.
    baseline: OnceLock<usize>,
}

impl ChatTurnOperation {
    /// `baseline` is the history length observed before the message was sent.
    pub fn new(
        backend: Arc<dyn StudyBackend>,
        token: String,
        request: AnswerChatRequest,
        baseline: Option<usize>,
    ) -> Self {
        let cell = OnceLock::new();
        if let Some(len) = baseline {
            let _ = cell.set(len);
        }
        Self {
            backend,
            token,
            request,
            baseline: cell,
        }
    }

    pub fn baseline(&self) -> Option<usize> {
        self.baseline.get().copied()
    }

    async fn history_len(&self) -> Result<usize, BackendError> {
        let history = self
            .backend
            .chat_history(&self.token, &self.request.history())
            .await?;
        Ok(history.len())
    }
}

#[async_trait]
impl RemoteOperation for ChatTurnOperation {
    type Request = AnswerChatRequest;
    type Output = String;

    fn kind(&self) -> OperationKind {
        OperationKind::Chat
    }

    fn request(&self) -> &AnswerChatRequest {
        &self.request
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.token.trim().is_empty() {
            return Err(ControllerError::MissingSession);
        }
        self.request.validate()?;
        Ok(())
    }

    async fn attempt(&self) -> Result<String, BackendError> {
        if self.baseline.get().is_none() {
            match self.history_len().await {
                Ok(len) => {
                    let _ = self.baseline.set(len);
                }
                Err(e) => tracing::debug!(error = %e, "Chat baseline still unknown"),
            }
        }
        self.backend.answer_chat(&self.token, &self.request).await
    }

    async fn probe(&self) -> Result<Option<String>, BackendError> {
        let history = self
            .backend
            .chat_history(&self.token, &self.request.history())
            .await?;
        let Some(&baseline) = self.baseline.get() else {
            // no pre-send length to compare against; older turns must not count
            let _ = self.baseline.set(history.len());
            return Ok(None);
        };
        Ok(reply_after(&history, baseline, &self.request.user_message))
    }
}
