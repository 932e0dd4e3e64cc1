//! evalflow core - proposal evaluation model
//!
//! Pure building blocks of the evaluation workflow:
//! - Identifier newtypes and the shared error taxonomy
//! - Proposals, evaluation steps, reviewers and grants
//! - The step sequencer (current step, advance and go-back planning)
//! - Rubric validation, aggregation and pass/fail policies
//! - Default step permission computation
//!
//! Nothing in this crate performs I/O. The engine crate loads rows, calls
//! into here, and applies the returned plans inside a transaction.
//!
//! # Example
//!
//! ```rust
//! use evalflow_core::prelude::*;
//!
//! let proposal = Proposal::new(SpaceId::new(), PageId::new(), UserId::new());
//! let steps = vec![
//!     Evaluation::new(proposal.id, 0, EvaluationType::Feedback, "Feedback"),
//!     Evaluation::new(proposal.id, 1, EvaluationType::PassFail, "Review"),
//! ];
//!
//! let current = sequencer::current_evaluation(&steps).unwrap();
//! assert_eq!(current.index, 0);
//! assert!(!sequencer::can_go_back(&steps));
//! ```

pub mod access;
pub mod error;
pub mod ids;
pub mod model;
pub mod policy;
pub mod rubric;
pub mod sequencer;

pub use access::{compute_step_permissions, Actor, ProposalPermissionFlags};
pub use error::{EntityKind, WorkflowError, WorkflowResult};
pub use ids::{CriterionId, EvaluationId, PageId, PermissionId, ProposalId, RoleId, SpaceId, UserId};
pub use model::{
    tally_reviews, Assignee, Evaluation, EvaluationResult, EvaluationType, PassFailReview,
    Proposal, ProposalOperation, ProposalStatus, StepGrant, SystemRole,
};
pub use policy::{MeanAbove, MeanAtLeast, ReviewerFloor, RubricPolicy};
pub use rubric::{
    aggregate, validate_submission, AnswerInput, CriterionSummary, DraftRubricAnswer,
    ReviewerSummary, RubricAggregation, RubricAnswer, RubricCriterion, ScoreRange,
    SubmissionMode,
};
pub use sequencer::{AdvancePlan, GoBackPlan, StepPosition};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with evalflow core
    pub use crate::sequencer;
    pub use crate::{
        Actor, AnswerInput, Assignee, Evaluation, EvaluationId, EvaluationResult, EvaluationType,
        PageId, Proposal, ProposalId, ProposalOperation, ProposalPermissionFlags, RubricCriterion,
        RubricPolicy, ScoreRange, SpaceId, UserId, WorkflowError, WorkflowResult,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn rubric_step_advances_once_policy_passes() {
        let proposal = Proposal::new(SpaceId::new(), PageId::new(), UserId::new());
        let mut steps = vec![Evaluation::new(proposal.id, 0, EvaluationType::Rubric, "Score")];
        let criterion = RubricCriterion::new(steps[0].id, "Impact", ScoreRange::new(0.0, 10.0).unwrap());

        let input = [AnswerInput::new(criterion.id, 8.0)];
        validate_submission(std::slice::from_ref(&criterion), &input, SubmissionMode::Final).unwrap();
        let answers: Vec<_> = input.iter().map(|a| a.finalize(steps[0].id, UserId::new())).collect();

        let agg = aggregate(&[criterion], &answers);
        steps[0].outcome = MeanAbove { threshold: 5.0 }.decide(&agg);

        let plan = sequencer::plan_advance(&steps, steps[0].id).unwrap();
        assert_eq!(
            plan,
            AdvancePlan::Commit {
                evaluation: steps[0].id,
                result: EvaluationResult::Pass,
                next: None,
            }
        );
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
