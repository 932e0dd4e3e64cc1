//! Evaluation sequencer
//!
//! Pure functions over a proposal's evaluation list. Ordering always comes
//! from the explicit `index` field, never from the order the store returned
//! rows in. Nothing here mutates; the engine applies the returned plans
//! inside a transaction.

use crate::error::{EntityKind, WorkflowError, WorkflowResult};
use crate::ids::EvaluationId;
use crate::model::{Evaluation, EvaluationResult, EvaluationType};

/// Where a proposal's step pointer sits
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepPosition<'a> {
    /// The proposal has no evaluations
    Empty,
    /// First unresolved step
    Active(&'a Evaluation),
    /// Every step is resolved; the pointer rests on the last one
    Resolved(&'a Evaluation),
}

impl<'a> StepPosition<'a> {
    /// Evaluation the pointer rests on
    #[inline]
    #[must_use]
    pub fn pointer(&self) -> Option<&'a Evaluation> {
        match self {
            Self::Empty => None,
            Self::Active(e) | Self::Resolved(e) => Some(e),
        }
    }

    /// Check if every step is resolved
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

/// Transition computed by [`plan_advance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvancePlan {
    /// Commit `result` on `evaluation`; `next` becomes current (or none remain)
    Commit {
        /// Step being resolved
        evaluation: EvaluationId,
        /// Result to commit
        result: EvaluationResult,
        /// Successor, if any
        next: Option<EvaluationId>,
    },
    /// The expected step was already committed; re-signal its successor
    AlreadyAdvanced {
        /// Successor of the expected step
        next: Option<EvaluationId>,
    },
}

impl AdvancePlan {
    /// Step that is current once the plan is applied
    #[inline]
    #[must_use]
    pub fn next(&self) -> Option<EvaluationId> {
        match self {
            Self::Commit { next, .. } | Self::AlreadyAdvanced { next } => *next,
        }
    }
}

/// Transition computed by [`plan_go_back`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoBackPlan {
    /// Step that becomes current
    pub target: EvaluationId,
    /// Steps to reopen: the target and every later step
    pub reopen: Vec<EvaluationId>,
}

/// Evaluations sorted by `index`
#[must_use]
pub fn sorted(evaluations: &[Evaluation]) -> Vec<&Evaluation> {
    let mut ordered: Vec<&Evaluation> = evaluations.iter().collect();
    ordered.sort_by_key(|e| e.index);
    ordered
}

/// First evaluation, by index, without a result
///
/// `None` when the list is empty, fully resolved, or ended early by a
/// priority step or an appeal decision; use [`position`] to tell these apart.
#[must_use]
pub fn current_evaluation(evaluations: &[Evaluation]) -> Option<&Evaluation> {
    match position(evaluations) {
        StepPosition::Active(current) => Some(current),
        StepPosition::Empty | StepPosition::Resolved(_) => None,
    }
}

/// Pointer position of the step sequence
///
/// The pointer stops on a resolved step whose result ends the workflow; later
/// steps are never reached.
#[must_use]
pub fn position(evaluations: &[Evaluation]) -> StepPosition<'_> {
    let ordered = sorted(evaluations);
    for step in ordered.iter().copied() {
        if !step.is_resolved() {
            return StepPosition::Active(step);
        }
        if step.ends_workflow() {
            return StepPosition::Resolved(step);
        }
    }
    ordered.last().copied().map_or(StepPosition::Empty, StepPosition::Resolved)
}

/// Whether `go_back` would succeed
#[must_use]
pub fn can_go_back(evaluations: &[Evaluation]) -> bool {
    let Some(pointer) = position(evaluations).pointer() else {
        return false;
    };
    evaluations.iter().any(|e| e.index < pointer.index)
}

/// Check indices are contiguous, unique and zero-based within one proposal
///
/// # Errors
/// `InvalidInput` describing the first violation found
pub fn validate_sequence(evaluations: &[Evaluation]) -> WorkflowResult<()> {
    let ordered = sorted(evaluations);
    let Some(first) = ordered.first() else {
        return Ok(());
    };

    for (expected, evaluation) in ordered.iter().enumerate() {
        if evaluation.proposal_id != first.proposal_id {
            return Err(WorkflowError::InvalidInput(format!(
                "evaluation {} belongs to another proposal",
                evaluation.id
            )));
        }
        if u32::try_from(expected).ok() != Some(evaluation.index) {
            return Err(WorkflowError::InvalidInput(format!(
                "evaluation indices must be contiguous from 0: expected {expected}, found {}",
                evaluation.index
            )));
        }
    }
    Ok(())
}

/// Result the current step commits when advanced
///
/// # Errors
/// `InvalidState` when no determinable result exists yet or the step failed
pub fn committable_result(evaluation: &Evaluation) -> WorkflowResult<EvaluationResult> {
    match (evaluation.evaluation_type, evaluation.outcome) {
        // Moving past feedback is the acknowledgement
        (EvaluationType::Feedback, _) => Ok(EvaluationResult::Pass),
        (EvaluationType::Vote, Some(result)) => Ok(result),
        (EvaluationType::Vote, None) => Err(WorkflowError::InvalidState(format!(
            "vote '{}' has not concluded",
            evaluation.title
        ))),
        (EvaluationType::PassFail | EvaluationType::Rubric, Some(EvaluationResult::Pass)) => {
            Ok(EvaluationResult::Pass)
        }
        // Priority steps fall through on fail; appeal decisions are final
        (EvaluationType::PassFail | EvaluationType::Rubric, Some(EvaluationResult::Fail))
            if evaluation.final_step || evaluation.is_appealed() =>
        {
            Ok(EvaluationResult::Fail)
        }
        (EvaluationType::PassFail | EvaluationType::Rubric, Some(EvaluationResult::Fail)) => {
            Err(WorkflowError::InvalidState(format!(
                "evaluation '{}' failed and cannot advance",
                evaluation.title
            )))
        }
        (EvaluationType::PassFail | EvaluationType::Rubric, None) => {
            Err(WorkflowError::InvalidState(format!(
                "evaluation '{}' has no result yet",
                evaluation.title
            )))
        }
    }
}

/// Plan moving the pointer past `expected`
///
/// `expected` is the step the caller believes is current. Replaying a request
/// after it was applied yields [`AdvancePlan::AlreadyAdvanced`] with the same
/// successor, so duplicates never skip a step. A result that ends the
/// workflow has no successor.
///
/// # Errors
/// - `DataNotFound` if `expected` is not in the list
/// - `InvalidState` if `expected` is a later, unreached step or the current
///   step has no committable result
pub fn plan_advance(evaluations: &[Evaluation], expected: EvaluationId) -> WorkflowResult<AdvancePlan> {
    let ordered = sorted(evaluations);
    let at = ordered
        .iter()
        .position(|e| e.id == expected)
        .ok_or_else(|| WorkflowError::not_found(EntityKind::Evaluation, expected))?;
    let target = ordered[at];
    let successor = ordered.get(at + 1).map(|e| e.id);

    match position(evaluations) {
        StepPosition::Active(current) if current.id == target.id => {
            let result = committable_result(current)?;
            let next = if current.ends_workflow_with(result) { None } else { successor };
            tracing::debug!(
                evaluation = %current.id,
                index = current.index,
                ?result,
                ends = next.is_none(),
                "planned advance"
            );
            Ok(AdvancePlan::Commit {
                evaluation: current.id,
                result,
                next,
            })
        }
        _ if target.is_resolved() => Ok(AdvancePlan::AlreadyAdvanced {
            next: if target.ends_workflow() { None } else { successor },
        }),
        _ => Err(WorkflowError::InvalidState(format!(
            "evaluation '{}' is not the current step",
            target.title
        ))),
    }
}

/// Plan reopening the step before the pointer
///
/// # Errors
/// `InvalidState` when there are no evaluations or the pointer is on the first
pub fn plan_go_back(evaluations: &[Evaluation]) -> WorkflowResult<GoBackPlan> {
    let ordered = sorted(evaluations);
    let pointer = position(evaluations)
        .pointer()
        .ok_or_else(|| WorkflowError::InvalidState("proposal has no evaluations".to_string()))?;
    let at = ordered
        .iter()
        .position(|e| e.id == pointer.id)
        .unwrap_or_default();

    if at == 0 {
        return Err(WorkflowError::InvalidState(
            "already at the first evaluation".to_string(),
        ));
    }

    let target = ordered[at - 1].id;
    let reopen = ordered[at - 1..].iter().map(|e| e.id).collect();
    Ok(GoBackPlan { target, reopen })
}
