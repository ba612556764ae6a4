//! crates/ecos_core/src/evaluation.rs
//!
//! Rubric validation and score aggregation. The scores themselves come from the
//! evaluation model; this module only reconciles them with the rubric and sums
//! them up.

use crate::domain::{
    CriterionScore, EcosEvaluation, EcosReport, EvaluationDraft, Rubric, SessionEvaluation,
};
use crate::ports::{PortError, PortResult};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Weighted total for one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreSummary {
    pub total: f64,
    pub max: u32,
    pub percentage: f64,
}

/// Largest weight a single criterion may carry.
pub const MAX_CRITERION_WEIGHT: u32 = 1000;
/// Largest total a rubric may add up to.
pub const MAX_RUBRIC_TOTAL: u32 = 100_000;

/// A rubric needs at least one named criterion, and every weight must lie in
/// `1..=MAX_CRITERION_WEIGHT` with a total of at most `MAX_RUBRIC_TOTAL`.
pub fn validate_rubric(rubric: &Rubric) -> PortResult<()> {
    if rubric.is_empty() {
        return Err(PortError::Invalid(
            "evaluation criteria must contain at least one criterion".to_string(),
        ));
    }
    for (criterion, weight) in rubric {
        if criterion.trim().is_empty() {
            return Err(PortError::Invalid("criterion names cannot be blank".to_string()));
        }
        if *weight == 0 {
            return Err(PortError::Invalid(format!(
                "criterion '{}' must have a positive weight",
                criterion
            )));
        }
        if *weight > MAX_CRITERION_WEIGHT {
            return Err(PortError::Invalid(format!(
                "criterion '{}' weighs more than {}",
                criterion, MAX_CRITERION_WEIGHT
            )));
        }
    }
    if rubric.values().map(|w| u64::from(*w)).sum::<u64>() > u64::from(MAX_RUBRIC_TOTAL) {
        return Err(PortError::Invalid(format!(
            "evaluation criteria add up to more than {}",
            MAX_RUBRIC_TOTAL
        )));
    }
    Ok(())
}

/// Sum of the rubric weights, saturating at `u32::MAX` for rubrics stored
/// before the weight bounds existed.
pub fn rubric_max(rubric: &Rubric) -> u32 {
    let total: u64 = rubric.values().map(|w| u64::from(*w)).sum();
    u32::try_from(total).unwrap_or(u32::MAX)
}

/// Lines the model's scores up with the rubric.
///
/// The result has exactly one entry per rubric criterion, in rubric order.
/// Scores are clamped into `[0, weight]`, criteria the rubric does not know are
/// dropped and criteria the model skipped score zero.
pub fn reconcile_scores(rubric: &Rubric, proposed: &[CriterionScore]) -> Vec<CriterionScore> {
    rubric
        .iter()
        .map(|(criterion, weight)| {
            match proposed.iter().find(|s| s.criterion_id == *criterion) {
                Some(s) => CriterionScore {
                    criterion_id: criterion.clone(),
                    score: clamp_score(s.score, *weight),
                    feedback: s.feedback.trim().to_string(),
                },
                None => CriterionScore {
                    criterion_id: criterion.clone(),
                    score: 0.0,
                    feedback: String::new(),
                },
            }
        })
        .collect()
}

fn clamp_score(score: f64, weight: u32) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, f64::from(weight))
}

/// Weighted sum of reconciled scores against the rubric maximum.
pub fn aggregate(rubric: &Rubric, scores: &[CriterionScore]) -> ScoreSummary {
    let max = rubric_max(rubric);
    let total: f64 = scores
        .iter()
        .filter(|s| rubric.contains_key(&s.criterion_id))
        .map(|s| s.score)
        .sum();
    let percentage = if max == 0 {
        0.0
    } else {
        (total / f64::from(max) * 1000.0).round() / 10.0
    };
    ScoreSummary {
        total,
        max,
        percentage,
    }
}

/// Turns a model draft into the rows that get persisted for `session_id`.
pub fn build_session_evaluation(
    session_id: Uuid,
    rubric: &Rubric,
    draft: EvaluationDraft,
    now: DateTime<Utc>,
) -> SessionEvaluation {
    let scores = reconcile_scores(rubric, &draft.scores);
    let summary = aggregate(rubric, &scores);

    let criteria = scores
        .into_iter()
        .map(|s| EcosEvaluation {
            session_id,
            criterion_id: s.criterion_id,
            score: s.score,
            feedback: s.feedback,
        })
        .collect();

    SessionEvaluation {
        criteria,
        report: EcosReport {
            session_id,
            summary: draft.summary.trim().to_string(),
            strengths: clean_list(draft.strengths),
            weaknesses: clean_list(draft.weaknesses),
            recommendations: clean_list(draft.recommendations),
            total_score: summary.total,
            max_score: summary.max,
            percentage: summary.percentage,
            created_at: now,
        },
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
