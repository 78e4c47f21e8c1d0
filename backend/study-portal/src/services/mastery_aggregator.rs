use std::cmp::Ordering;

use crate::models::mastery::{
    ChapterMastery, DerivedTopicMastery, GroupedMasteryData, GuideMastery, MasterySection,
    MasteryStudyGuide, MasterySubmission,
};

/// Flattens the guide -> chapter -> section -> submissions payload into one
/// record per section, taken from the learner's latest submission.
///
/// Total: any payload, including an empty one, yields a grouping.
pub fn aggregate(guides: &[MasteryStudyGuide], user_id: &str) -> GroupedMasteryData {
    let study_guides = guides
        .iter()
        .map(|guide| GuideMastery {
            study_guide_id: guide.study_guide_id.clone(),
            study_guide_title: guide.study_guide_title.clone(),
            chapters: guide
                .chapters
                .iter()
                .map(|chapter| {
                    let mut sections: Vec<DerivedTopicMastery> = chapter
                        .sections
                        .iter()
                        .filter_map(|section| {
                            derive_section(
                                &guide.study_guide_id,
                                &chapter.chapter_title,
                                section,
                                user_id,
                            )
                        })
                        .collect();

                    sections.sort_by(|a, b| {
                        b.mastery_score
                            .partial_cmp(&a.mastery_score)
                            .unwrap_or(Ordering::Equal)
                    });

                    ChapterMastery {
                        chapter_title: chapter.chapter_title.clone(),
                        sections,
                    }
                })
                .collect(),
        })
        .collect();

    GroupedMasteryData { study_guides }
}

/// Same as [`aggregate`] for an optional payload.
pub fn aggregate_optional(
    guides: Option<&[MasteryStudyGuide]>,
    user_id: &str,
) -> GroupedMasteryData {
    guides
        .map(|guides| aggregate(guides, user_id))
        .unwrap_or_default()
}

fn derive_section(
    study_guide_id: &str,
    chapter_title: &str,
    section: &MasterySection,
    user_id: &str,
) -> Option<DerivedTopicMastery> {
    let latest = latest_submission(&section.submissions, user_id)?;

    let question_count = if latest.question_results.is_empty() {
        latest.exposure_count as usize
    } else {
        latest.question_results.len()
    };

    Some(DerivedTopicMastery {
        study_guide_id: study_guide_id.to_string(),
        chapter_title: chapter_title.to_string(),
        section_title: section.section_title.clone(),
        mastery_score: latest.mastery_score,
        accuracy_rate: latest.accuracy_rate,
        confidence_score: latest.confidence_score,
        recency_weight: latest.recency_weight,
        question_count,
        last_interaction: latest.last_interaction,
    })
}

/// Latest submission by `last_interaction` belonging to `user_id`. Undated
/// submissions lose to dated ones; among equals the earliest listed wins.
fn latest_submission<'a>(
    submissions: &'a [MasterySubmission],
    user_id: &str,
) -> Option<&'a MasterySubmission> {
    submissions
        .iter()
        .filter(|submission| submission.user_id == user_id)
        .fold(None, |best: Option<&MasterySubmission>, candidate| match best {
            Some(current) if current.last_interaction >= candidate.last_interaction => {
                Some(current)
            }
            _ => Some(candidate),
        })
}
