use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::time::deserialize_lenient;

/// Upstream topic-mastery body. Older deployments answer with the bare
/// `{study_guides: [...]}` shape, newer ones wrap it in `mastery_data`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicMasteryEnvelope {
    #[serde(default)]
    pub mastery_data: Option<MasteryPayload>,
    #[serde(default)]
    pub study_guides: Option<Vec<MasteryStudyGuide>>,
}

impl TopicMasteryEnvelope {
    pub fn into_guides(self) -> Vec<MasteryStudyGuide> {
        self.mastery_data
            .map(|data| data.study_guides)
            .or(self.study_guides)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasteryPayload {
    #[serde(default)]
    pub study_guides: Vec<MasteryStudyGuide>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasteryStudyGuide {
    #[serde(default)]
    pub study_guide_id: String,
    #[serde(default)]
    pub study_guide_title: String,
    #[serde(default)]
    pub chapters: Vec<MasteryChapter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasteryChapter {
    #[serde(default)]
    pub chapter_title: String,
    #[serde(default)]
    pub sections: Vec<MasterySection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterySection {
    #[serde(default)]
    pub section_title: String,
    #[serde(default)]
    pub submissions: Vec<MasterySubmission>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterySubmission {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub accuracy_rate: f64,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub recency_weight: f64,
    #[serde(default)]
    pub mastery_score: f64,
    #[serde(default)]
    pub exposure_count: u32,
    #[serde(default, deserialize_with = "deserialize_lenient")]
    pub last_interaction: Option<DateTime<Utc>>,
    #[serde(default)]
    pub question_results: Vec<QuestionResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionResult {
    #[serde(default)]
    pub question_id: String,
    #[serde(default)]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Weights the backend uses for `mastery_score`. Display only; the score is
/// never recomputed here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MasteryWeights {
    pub accuracy: f64,
    pub recency: f64,
    pub confidence: f64,
}

pub const MASTERY_WEIGHTS: MasteryWeights = MasteryWeights {
    accuracy: 0.5,
    recency: 0.3,
    confidence: 0.2,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedTopicMastery {
    pub study_guide_id: String,
    pub chapter_title: String,
    pub section_title: String,
    pub mastery_score: f64,
    pub accuracy_rate: f64,
    pub confidence_score: f64,
    pub recency_weight: f64,
    pub question_count: usize,
    pub last_interaction: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub accuracy: f64,
    pub recency: f64,
    pub confidence: f64,
}

impl DerivedTopicMastery {
    /// Weighted contribution of each component, for the score tooltip.
    pub fn score_breakdown(&self) -> ScoreBreakdown {
        ScoreBreakdown {
            accuracy: self.accuracy_rate * MASTERY_WEIGHTS.accuracy,
            recency: self.recency_weight * MASTERY_WEIGHTS.recency,
            confidence: self.confidence_score * MASTERY_WEIGHTS.confidence,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterMastery {
    pub chapter_title: String,
    pub sections: Vec<DerivedTopicMastery>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideMastery {
    pub study_guide_id: String,
    pub study_guide_title: String,
    pub chapters: Vec<ChapterMastery>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedMasteryData {
    pub study_guides: Vec<GuideMastery>,
}

impl GroupedMasteryData {
    /// True when there is no section with data to show.
    pub fn is_empty(&self) -> bool {
        self.topics().next().is_none()
    }

    pub fn topics(&self) -> impl Iterator<Item = &DerivedTopicMastery> {
        self.study_guides
            .iter()
            .flat_map(|guide| guide.chapters.iter())
            .flat_map(|chapter| chapter.sections.iter())
    }

    /// Most recently practised sections first; undated ones last.
    pub fn most_recent(&self, limit: usize) -> Vec<&DerivedTopicMastery> {
        let mut topics: Vec<_> = self.topics().collect();
        topics.sort_by(|a, b| b.last_interaction.cmp(&a.last_interaction));
        topics.truncate(limit);
        topics
    }
}
