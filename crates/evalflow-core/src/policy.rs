//! Rubric pass/fail policies
//!
//! Turning an aggregation into a verdict is deployment-specific, so the
//! engine takes a [`RubricPolicy`] instead of hard-coding a threshold.

use crate::model::EvaluationResult;
use crate::rubric::RubricAggregation;
use serde::{Deserialize, Serialize};

/// Decides a rubric step's outcome from its aggregated scores
pub trait RubricPolicy: Send + Sync {
    /// Decide the outcome
    ///
    /// `None` means undecided; the step stays without an outcome. Empty
    /// aggregations must decide `None`.
    fn decide(&self, aggregation: &RubricAggregation) -> Option<EvaluationResult>;

    /// Policy name (for logging)
    fn name(&self) -> &'static str {
        "custom"
    }
}

impl<F> RubricPolicy for F
where
    F: Fn(&RubricAggregation) -> Option<EvaluationResult> + Send + Sync,
{
    fn decide(&self, aggregation: &RubricAggregation) -> Option<EvaluationResult> {
        if aggregation.is_empty() {
            return None;
        }
        self(aggregation)
    }
}

fn verdict(pass: bool) -> EvaluationResult {
    if pass {
        EvaluationResult::Pass
    } else {
        EvaluationResult::Fail
    }
}

/// Pass when the overall mean is strictly above the threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanAbove {
    /// Exclusive lower bound
    pub threshold: f64,
}

impl RubricPolicy for MeanAbove {
    fn decide(&self, aggregation: &RubricAggregation) -> Option<EvaluationResult> {
        aggregation
            .overall_average
            .map(|mean| verdict(mean > self.threshold))
    }

    fn name(&self) -> &'static str {
        "mean_above"
    }
}

/// Pass when the overall mean reaches the threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanAtLeast {
    /// Inclusive lower bound
    pub threshold: f64,
}

impl RubricPolicy for MeanAtLeast {
    fn decide(&self, aggregation: &RubricAggregation) -> Option<EvaluationResult> {
        aggregation
            .overall_average
            .map(|mean| verdict(mean >= self.threshold))
    }

    fn name(&self) -> &'static str {
        "mean_at_least"
    }
}

/// Fail when any single reviewer's mean falls below the floor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReviewerFloor {
    /// Lowest acceptable per-reviewer mean
    pub floor: f64,
}

impl RubricPolicy for ReviewerFloor {
    fn decide(&self, aggregation: &RubricAggregation) -> Option<EvaluationResult> {
        if aggregation.is_empty() {
            return None;
        }
        let all_above = aggregation
            .reviewers
            .values()
            .all(|r| r.average >= self.floor);
        Some(verdict(all_above))
    }

    fn name(&self) -> &'static str {
        "reviewer_floor"
    }
}
