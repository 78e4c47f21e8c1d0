use std::sync::Arc;
use tokio::sync::watch;

use crate::models::hint::{GenerateHintRequest, HintWidgetRequest};
use crate::models::operation::{OperationKind, RetryPolicy};
use crate::services::backend_client::StudyBackend;
use crate::services::controller::{ControllerError, Snapshot};
use crate::services::operations::HintOperation;
use crate::services::registry::{OperationRegistry, SlotKey};

pub type HintSnapshot = Snapshot<HintOperation>;

pub struct HintService {
    backend: Arc<dyn StudyBackend>,
    registry: OperationRegistry<HintOperation>,
}

impl HintService {
    pub fn new(backend: Arc<dyn StudyBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            registry: OperationRegistry::new(OperationKind::Hint, policy),
        }
    }

    pub fn registry(&self) -> &OperationRegistry<HintOperation> {
        &self.registry
    }

    /// Starts (or restarts) hint generation for the widget's question and
    /// returns the snapshot right after submission.
    pub async fn request_hint(
        &self,
        token: &str,
        user_id: &str,
        req: HintWidgetRequest,
    ) -> Result<HintSnapshot, ControllerError> {
        tracing::info!(
            "Processing hint request: user={}, test={}, question={}",
            user_id,
            req.test_id,
            req.question_id
        );

        let key = SlotKey::new(user_id, &req.test_id, &req.question_id);
        let request = GenerateHintRequest {
            user_id: user_id.to_string(),
            test_id: req.test_id,
            question_id: req.question_id,
            question_text: req.question_text,
        };
        let operation = HintOperation::new(self.backend.clone(), token.to_string(), request);

        let controller = self.registry.submit(key, operation).await?;
        Ok(controller.state())
    }

    pub async fn state(&self, key: &SlotKey) -> Option<HintSnapshot> {
        self.registry.get(key).await.map(|c| c.state())
    }

    pub async fn subscribe(&self, key: &SlotKey) -> Option<watch::Receiver<HintSnapshot>> {
        self.registry.get(key).await.map(|c| c.subscribe())
    }

    pub async fn cancel(&self, key: &SlotKey) -> bool {
        let cancelled = self.registry.cancel(key).await;
        if cancelled {
            tracing::info!(
                "Hint widget closed: user={}, question={}",
                key.user_id,
                key.question_id
            );
        }
        cancelled
    }
}
