use serde::Serialize;
use std::sync::Arc;

use crate::metrics::MASTERY_AGGREGATIONS_TOTAL;
use crate::models::mastery::{GroupedMasteryData, MasteryWeights, MASTERY_WEIGHTS};
use crate::services::backend_client::StudyBackend;
use crate::services::mastery_aggregator::aggregate;

pub const NO_DATA_MESSAGE: &str = "No mastery data yet. Take a practice test to get started.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryView {
    #[serde(flatten)]
    pub data: GroupedMasteryData,
    pub weights: MasteryWeights,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct MasteryService {
    backend: Arc<dyn StudyBackend>,
}

impl MasteryService {
    pub fn new(backend: Arc<dyn StudyBackend>) -> Self {
        Self { backend }
    }

    /// Loads and aggregates the learner's mastery. Never fails: an upstream
    /// error shows up as an empty view with a message.
    pub async fn overview(
        &self,
        token: &str,
        user_id: &str,
        study_guide_id: Option<&str>,
    ) -> MasteryView {
        match self
            .backend
            .topic_mastery(token, user_id, study_guide_id)
            .await
        {
            Ok(guides) => {
                let data = aggregate(&guides, user_id);
                let result = if data.is_empty() { "empty" } else { "ok" };
                MASTERY_AGGREGATIONS_TOTAL.with_label_values(&[result]).inc();

                let message = data.is_empty().then(|| NO_DATA_MESSAGE.to_string());
                MasteryView {
                    data,
                    weights: MASTERY_WEIGHTS,
                    message,
                }
            }
            Err(e) => {
                MASTERY_AGGREGATIONS_TOTAL
                    .with_label_values(&["upstream_error"])
                    .inc();
                tracing::warn!("Topic mastery unavailable for user {}: {}", user_id, e);
                MasteryView {
                    data: GroupedMasteryData::default(),
                    weights: MASTERY_WEIGHTS,
                    message: Some(NO_DATA_MESSAGE.to_string()),
                }
            }
        }
    }
}
