use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::metrics::ACTIVE_CONTROLLERS;
use crate::models::operation::{OperationKind, RetryPolicy};
use crate::services::controller::{ControllerError, RemoteOperation, ResilientController};

/// Identifies one widget instance: a learner looking at one question.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub user_id: String,
    pub test_id: String,
    pub question_id: String,
}

impl SlotKey {
    pub fn new(
        user_id: impl Into<String>,
        test_id: impl Into<String>,
        question_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            test_id: test_id.into(),
            question_id: question_id.into(),
        }
    }
}

/// One controller per slot. Controllers never leak across users because
/// the user id is part of the key.
pub struct OperationRegistry<O: RemoteOperation> {
    kind: OperationKind,
    policy: RetryPolicy,
    slots: RwLock<HashMap<SlotKey, ResilientController<O>>>,
}

impl<O: RemoteOperation> OperationRegistry<O> {
    pub fn new(kind: OperationKind, policy: RetryPolicy) -> Self {
        Self {
            kind,
            policy,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Looks up the slot and marks it as still viewed.
    pub async fn get(&self, key: &SlotKey) -> Option<ResilientController<O>> {
        let controller = self.slots.read().await.get(key).cloned()?;
        controller.touch();
        Some(controller)
    }

    /// Submits on the slot's controller, creating it on first use.
    pub async fn submit(
        &self,
        key: SlotKey,
        operation: O,
    ) -> Result<ResilientController<O>, ControllerError> {
        // rejected requests never claim a slot
        operation.validate()?;

        let controller = {
            let mut slots = self.slots.write().await;
            slots
                .entry(key)
                .or_insert_with(|| {
                    ACTIVE_CONTROLLERS
                        .with_label_values(&[self.kind.as_str()])
                        .inc();
                    ResilientController::new(self.kind, self.policy.clone())
                })
                .clone()
        };

        controller.submit(operation)?;
        Ok(controller)
    }

    /// Widget unmounted: stop timers and forget the slot.
    pub async fn cancel(&self, key: &SlotKey) -> bool {
        let removed = self.slots.write().await.remove(key);
        match removed {
            Some(controller) => {
                controller.cancel();
                ACTIVE_CONTROLLERS
                    .with_label_values(&[self.kind.as_str()])
                    .dec();
                true
            }
            None => false,
        }
    }

    /// Cancels and drops controllers no widget has read or streamed for
    /// `idle_ttl`, whatever their phase. Closed tabs never send DELETE.
    pub async fn evict_idle(&self, idle_ttl: Duration) -> usize {
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, controller| {
            let keep = controller.unviewed_for() < idle_ttl;
            if !keep {
                controller.cancel();
            }
            keep
        });
        let evicted = before - slots.len();
        if evicted > 0 {
            ACTIVE_CONTROLLERS
                .with_label_values(&[self.kind.as_str()])
                .sub(evicted as i64);
            tracing::debug!(kind = self.kind.as_str(), evicted, "Evicted idle controllers");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}
