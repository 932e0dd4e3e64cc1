//! Rubric scoring
//!
//! Criteria, reviewer answers, submission validation and aggregation. The
//! pass/fail decision is left to an injected [`RubricPolicy`](crate::RubricPolicy).

use crate::error::{EntityKind, WorkflowError, WorkflowResult};
use crate::ids::{CriterionId, EvaluationId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Numeric bounds a criterion's scores must lie within
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    /// Lowest allowed score
    pub min: f64,
    /// Highest allowed score
    pub max: f64,
}

impl ScoreRange {
    /// Create a range
    ///
    /// # Errors
    /// `InvalidInput` unless both bounds are finite and `min <= max`
    pub fn new(min: f64, max: f64) -> WorkflowResult<Self> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(WorkflowError::InvalidInput(format!(
                "invalid score range [{min}, {max}]"
            )));
        }
        Ok(Self { min, max })
    }

    /// Check if score lies within the bounds
    #[inline]
    #[must_use]
    pub fn contains(&self, score: f64) -> bool {
        score.is_finite() && score >= self.min && score <= self.max
    }
}

impl Default for ScoreRange {
    fn default() -> Self {
        Self { min: 1.0, max: 5.0 }
    }
}

/// One scored criterion of a rubric step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricCriterion {
    /// Criterion identifier
    pub id: CriterionId,
    /// Owning rubric step
    pub evaluation_id: EvaluationId,
    /// Display title
    pub title: String,
    /// Guidance for reviewers
    pub description: Option<String>,
    /// Score bounds
    pub parameters: ScoreRange,
}

impl RubricCriterion {
    /// Create new criterion
    #[must_use]
    pub fn new(evaluation_id: EvaluationId, title: impl Into<String>, parameters: ScoreRange) -> Self {
        Self {
            id: CriterionId::new(),
            evaluation_id,
            title: title.into(),
            description: None,
            parameters,
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Copy for another step with a fresh id
    #[must_use]
    pub fn blueprint_for(&self, evaluation_id: EvaluationId) -> Self {
        Self {
            id: CriterionId::new(),
            evaluation_id,
            ..self.clone()
        }
    }
}

/// A finalized reviewer answer for one criterion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricAnswer {
    /// Rubric step
    pub evaluation_id: EvaluationId,
    /// Answered criterion
    pub criterion_id: CriterionId,
    /// Reviewer
    pub user_id: UserId,
    /// Score within the criterion bounds
    pub score: f64,
    /// Optional comment
    pub comment: Option<String>,
}

/// A saved-for-later answer, excluded from aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRubricAnswer {
    /// Rubric step
    pub evaluation_id: EvaluationId,
    /// Answered criterion
    pub criterion_id: CriterionId,
    /// Reviewer
    pub user_id: UserId,
    /// Score within the criterion bounds
    pub score: f64,
    /// Optional comment
    pub comment: Option<String>,
}

/// Answer as submitted by a reviewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerInput {
    /// Answered criterion
    pub criterion_id: CriterionId,
    /// Score
    pub score: f64,
    /// Optional comment
    #[serde(default)]
    pub comment: Option<String>,
}

impl AnswerInput {
    /// Create answer input
    #[inline]
    #[must_use]
    pub fn new(criterion_id: CriterionId, score: f64) -> Self {
        Self {
            criterion_id,
            score,
            comment: None,
        }
    }

    /// With comment
    #[inline]
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Finalized answer for a reviewer
    #[must_use]
    pub fn finalize(&self, evaluation_id: EvaluationId, user_id: UserId) -> RubricAnswer {
        RubricAnswer {
            evaluation_id,
            criterion_id: self.criterion_id,
            user_id,
            score: self.score,
            comment: self.comment.clone(),
        }
    }

    /// Draft answer for a reviewer
    #[must_use]
    pub fn draft(&self, evaluation_id: EvaluationId, user_id: UserId) -> DraftRubricAnswer {
        DraftRubricAnswer {
            evaluation_id,
            criterion_id: self.criterion_id,
            user_id,
            score: self.score,
            comment: self.comment.clone(),
        }
    }
}

/// Submission lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionMode {
    /// Counts towards aggregation; must answer every criterion
    Final,
    /// Saved for later; may be partial
    Draft,
}

/// Validate a reviewer's submission against the step's criteria
///
/// # Errors
/// - `DataNotFound` if an answer names a criterion not on this step
/// - `InvalidInput` for duplicate criteria, out-of-range or non-finite scores,
///   an empty submission, or (final mode) an unanswered criterion
pub fn validate_submission(
    criteria: &[RubricCriterion],
    answers: &[AnswerInput],
    mode: SubmissionMode,
) -> WorkflowResult<()> {
    if answers.is_empty() {
        return Err(WorkflowError::InvalidInput(
            "submission contains no answers".to_string(),
        ));
    }

    let by_id: HashMap<CriterionId, &RubricCriterion> =
        criteria.iter().map(|c| (c.id, c)).collect();
    let mut seen = BTreeSet::new();

    for answer in answers {
        let criterion = by_id
            .get(&answer.criterion_id)
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Criterion, answer.criterion_id))?;

        if !seen.insert(answer.criterion_id) {
            return Err(WorkflowError::InvalidInput(format!(
                "criterion '{}' answered more than once",
                criterion.title
            )));
        }

        if !criterion.parameters.contains(answer.score) {
            return Err(WorkflowError::InvalidInput(format!(
                "score {} for '{}' is outside [{}, {}]",
                answer.score, criterion.title, criterion.parameters.min, criterion.parameters.max
            )));
        }
    }

    if mode == SubmissionMode::Final {
        if let Some(missing) = criteria.iter().find(|c| !seen.contains(&c.id)) {
            return Err(WorkflowError::InvalidInput(format!(
                "criterion '{}' is unanswered",
                missing.title
            )));
        }
    }

    Ok(())
}

/// Rollup of one criterion's finalized scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriterionSummary {
    /// Arithmetic mean
    pub average: f64,
    /// Number of answers
    pub count: usize,
    /// Lowest score
    pub min: f64,
    /// Highest score
    pub max: f64,
}

/// Rollup of one reviewer's finalized scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReviewerSummary {
    /// Sum of scores
    pub total: f64,
    /// Mean score across answered criteria
    pub average: f64,
    /// Number of answers
    pub count: usize,
}

/// Aggregated rubric scores
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RubricAggregation {
    /// Per-criterion rollup
    pub criteria: BTreeMap<CriterionId, CriterionSummary>,
    /// Per-reviewer rollup
    pub reviewers: BTreeMap<UserId, ReviewerSummary>,
    /// Mean of every finalized score
    pub overall_average: Option<f64>,
    /// Number of finalized answers counted
    pub answer_count: usize,
}

impl RubricAggregation {
    /// Check if no answers were counted
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.answer_count == 0
    }

    /// Mean score for a criterion
    #[inline]
    #[must_use]
    pub fn average_for(&self, criterion: CriterionId) -> Option<f64> {
        self.criteria.get(&criterion).map(|s| s.average)
    }
}

/// Aggregate finalized answers
///
/// Answers for criteria not listed are ignored. Zero answers yield an empty
/// aggregation.
#[must_use]
pub fn aggregate(criteria: &[RubricCriterion], answers: &[RubricAnswer]) -> RubricAggregation {
    let known: BTreeSet<CriterionId> = criteria.iter().map(|c| c.id).collect();
    let mut per_criterion: BTreeMap<CriterionId, Vec<f64>> = BTreeMap::new();
    let mut per_reviewer: BTreeMap<UserId, Vec<f64>> = BTreeMap::new();
    let mut total = 0.0;
    let mut count = 0usize;

    for answer in answers.iter().filter(|a| known.contains(&a.criterion_id)) {
        per_criterion.entry(answer.criterion_id).or_default().push(answer.score);
        per_reviewer.entry(answer.user_id).or_default().push(answer.score);
        total += answer.score;
        count += 1;
    }

    let criteria = per_criterion
        .into_iter()
        .map(|(id, scores)| {
            let sum: f64 = scores.iter().sum();
            let summary = CriterionSummary {
                average: sum / scores.len() as f64,
                count: scores.len(),
                min: scores.iter().copied().fold(f64::INFINITY, f64::min),
                max: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            };
            (id, summary)
        })
        .collect();

    let reviewers = per_reviewer
        .into_iter()
        .map(|(id, scores)| {
            let sum: f64 = scores.iter().sum();
            let summary = ReviewerSummary {
                total: sum,
                average: sum / scores.len() as f64,
                count: scores.len(),
            };
            (id, summary)
        })
        .collect();

    RubricAggregation {
        criteria,
        reviewers,
        overall_average: (count > 0).then(|| total / count as f64),
        answer_count: count,
    }
}
