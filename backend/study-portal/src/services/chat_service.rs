use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::chat::{AnswerChatRequest, ChatHistoryRequest, ChatTurn, ChatWidgetRequest};
use crate::models::operation::{OperationKind, RetryPolicy};
use crate::services::backend_client::StudyBackend;
use crate::services::controller::{ControllerError, Snapshot};
use crate::services::operations::ChatTurnOperation;
use crate::services::registry::{OperationRegistry, SlotKey};

pub type ChatSnapshot = Snapshot<ChatTurnOperation>;

pub struct ChatService {
    backend: Arc<dyn StudyBackend>,
    registry: OperationRegistry<ChatTurnOperation>,
}

impl ChatService {
    pub fn new(backend: Arc<dyn StudyBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            registry: OperationRegistry::new(OperationKind::Chat, policy),
        }
    }

    pub fn registry(&self) -> &OperationRegistry<ChatTurnOperation> {
        &self.registry
    }

    /// Sends one chat message. The history length seen right before sending
    /// lets the poller recognise the tutor's reply to this message.
    pub async fn send_message(
        &self,
        token: &str,
        user_id: &str,
        req: ChatWidgetRequest,
    ) -> Result<ChatSnapshot, ControllerError> {
        let key = SlotKey::new(user_id, &req.test_id, &req.question_id);
        let request = AnswerChatRequest {
            user_id: user_id.to_string(),
            test_id: req.test_id,
            question_id: req.question_id,
            user_message: req.message,
        };

        let baseline = if token.trim().is_empty() {
            None
        } else {
            match self.backend.chat_history(token, &request.history()).await {
                Ok(history) => Some(history.len()),
                Err(e) => {
                    tracing::warn!(
                        "Chat history unavailable before send, measuring it later: {}",
                        e
                    );
                    None
                }
            }
        };

        tracing::info!(
            "Processing chat message: user={}, question={}, baseline={:?}",
            user_id,
            request.question_id,
            baseline
        );

        let operation =
            ChatTurnOperation::new(self.backend.clone(), token.to_string(), request, baseline);
        let controller = self.registry.submit(key, operation).await?;
        Ok(controller.state())
    }

    pub async fn history(&self, token: &str, key: &SlotKey) -> Result<Vec<ChatTurn>> {
        let req = ChatHistoryRequest {
            user_id: key.user_id.clone(),
            test_id: key.test_id.clone(),
            question_id: key.question_id.clone(),
        };
        self.backend
            .chat_history(token, &req)
            .await
            .context("Failed to load chat history")
    }

    pub async fn state(&self, key: &SlotKey) -> Option<ChatSnapshot> {
        self.registry.get(key).await.map(|c| c.state())
    }

    pub async fn subscribe(&self, key: &SlotKey) -> Option<watch::Receiver<ChatSnapshot>> {
        self.registry.get(key).await.map(|c| c.subscribe())
    }

    pub async fn cancel(&self, key: &SlotKey) -> bool {
        self.registry.cancel(key).await
    }
}
