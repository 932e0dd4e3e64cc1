//! Core types for proposals and their evaluation steps
//!
//! Defines:
//! - Proposals and their status
//! - Evaluation steps, their type, result and outcome
//! - Reviewer assignees and per-step operation grants
//! - Pass/fail reviews, including appeal reviews

use crate::ids::{EvaluationId, PageId, ProposalId, RoleId, SpaceId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Proposal publication status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Being authored; evaluation settings are editable
    #[default]
    Draft,
    /// Under evaluation
    Published,
}

/// A document under evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Proposal identifier
    pub id: ProposalId,
    /// Owning space
    pub space_id: SpaceId,
    /// Underlying content page
    pub page_id: PageId,
    /// Publication status
    pub status: ProposalStatus,
    /// Archived proposals cannot move
    pub archived: bool,
    /// Creator
    pub created_by: UserId,
    /// Authors (always includes the creator)
    pub authors: BTreeSet<UserId>,
    /// Templates are immutable evaluation blueprints
    pub is_template: bool,
    /// Template this proposal was instantiated from
    pub source_template: Option<ProposalId>,
}

impl Proposal {
    /// Create a new draft proposal
    #[must_use]
    pub fn new(space_id: SpaceId, page_id: PageId, created_by: UserId) -> Self {
        Self {
            id: ProposalId::new(),
            space_id,
            page_id,
            status: ProposalStatus::Draft,
            archived: false,
            created_by,
            authors: BTreeSet::from([created_by]),
            is_template: false,
            source_template: None,
        }
    }

    /// Mark as template
    #[inline]
    #[must_use]
    pub fn as_template(mut self) -> Self {
        self.is_template = true;
        self
    }

    /// With an additional author
    #[inline]
    #[must_use]
    pub fn with_author(mut self, author: UserId) -> Self {
        self.authors.insert(author);
        self
    }

    /// Check if user is an author
    #[inline]
    #[must_use]
    pub fn is_author(&self, user: UserId) -> bool {
        self.authors.contains(&user)
    }

    /// Check if proposal is still being authored
    #[inline]
    #[must_use]
    pub fn is_draft(&self) -> bool {
        self.status == ProposalStatus::Draft
    }
}

/// Evaluation step kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationType {
    /// Open feedback, resolved by moving on
    Feedback,
    /// Reviewers approve or decline
    PassFail,
    /// Reviewers score criteria
    Rubric,
    /// Resolved by an external vote
    Vote,
}

impl EvaluationType {
    /// Whether the step needs reviewers before publication
    #[inline]
    #[must_use]
    pub fn requires_reviewers(&self) -> bool {
        !matches!(self, Self::Feedback)
    }
}

impl std::fmt::Display for EvaluationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Feedback => "feedback",
            Self::PassFail => "pass_fail",
            Self::Rubric => "rubric",
            Self::Vote => "vote",
        };
        f.write_str(name)
    }
}

/// Pass or fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationResult {
    /// Step passed
    Pass,
    /// Step failed
    Fail,
}

/// System roles that can be assigned as reviewers or grantees
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemRole {
    /// Proposal authors
    Author,
    /// Every member of the space
    SpaceMember,
    /// Reviewers of any step
    AllReviewers,
    /// Reviewers of the current step
    CurrentReviewer,
}

/// Who a reviewer slot or grant targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "group", content = "id", rename_all = "snake_case")]
pub enum Assignee {
    /// A single user
    User(UserId),
    /// Holders of a role
    Role(RoleId),
    /// A system role
    System(SystemRole),
}

/// Operations gated by proposal permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalOperation {
    /// Read the proposal
    View,
    /// Read reviewer-only fields
    ViewPrivateFields,
    /// Edit content and draft settings
    Edit,
    /// Comment
    Comment,
    /// Move the proposal between steps
    Move,
    /// Submit reviews and rubric answers
    Evaluate,
    /// Archive or unarchive
    Archive,
    /// Delete
    Delete,
    /// Create a vote
    CreateVote,
}

impl ProposalOperation {
    /// All operations
    pub const ALL: [ProposalOperation; 9] = [
        Self::View,
        Self::ViewPrivateFields,
        Self::Edit,
        Self::Comment,
        Self::Move,
        Self::Evaluate,
        Self::Archive,
        Self::Delete,
        Self::CreateVote,
    ];
}

impl std::fmt::Display for ProposalOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::View => "view",
            Self::ViewPrivateFields => "view_private_fields",
            Self::Edit => "edit",
            Self::Comment => "comment",
            Self::Move => "move",
            Self::Evaluate => "evaluate",
            Self::Archive => "archive",
            Self::Delete => "delete",
            Self::CreateVote => "create_vote",
        };
        f.write_str(name)
    }
}

/// Operation granted to an assignee while a step is current
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepGrant {
    /// Grantee
    pub assignee: Assignee,
    /// Granted operation
    pub operation: ProposalOperation,
}

impl StepGrant {
    /// Create new grant
    #[inline]
    #[must_use]
    pub fn new(assignee: Assignee, operation: ProposalOperation) -> Self {
        Self {
            assignee,
            operation,
        }
    }
}

/// One step in a proposal's evaluation workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Step identifier
    pub id: EvaluationId,
    /// Owning proposal
    pub proposal_id: ProposalId,
    /// Zero-based ordering key, unique within the proposal
    pub index: u32,
    /// Step kind
    pub evaluation_type: EvaluationType,
    /// Display title
    pub title: String,
    /// Committed resolution; the sequencer reads only this field
    pub result: Option<EvaluationResult>,
    /// Determination recorded for the step, committed by `advance`
    pub outcome: Option<EvaluationResult>,
    /// Reviewer assignees
    pub reviewers: BTreeSet<Assignee>,
    /// Operation grants scoped to this step
    pub permissions: BTreeSet<StepGrant>,
    /// Pass reviews needed for a pass/fail step
    pub required_reviews: u32,
    /// Allowed decline reasons (empty means free-form)
    pub decline_reasons: Vec<String>,
    /// When the result was committed
    pub completed_at: Option<DateTime<Utc>>,
    /// Priority step: a pass ends the workflow, a fail falls through
    #[serde(default)]
    pub final_step: bool,
    /// Authors may appeal a failed outcome once
    #[serde(default)]
    pub appealable: bool,
    /// Reviewers who decide an appeal
    #[serde(default)]
    pub appeal_reviewers: BTreeSet<Assignee>,
    /// Pass reviews needed to uphold an appeal
    #[serde(default = "one")]
    pub appeal_required_reviews: u32,
    /// When the step was appealed
    #[serde(default)]
    pub appealed_at: Option<DateTime<Utc>>,
    /// Author who appealed
    #[serde(default)]
    pub appealed_by: Option<UserId>,
    /// Reason given with the appeal
    #[serde(default)]
    pub appeal_reason: Option<String>,
}

fn one() -> u32 {
    1
}

impl Evaluation {
    /// Create new unresolved step
    #[must_use]
    pub fn new(
        proposal_id: ProposalId,
        index: u32,
        evaluation_type: EvaluationType,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: EvaluationId::new(),
            proposal_id,
            index,
            evaluation_type,
            title: title.into(),
            result: None,
            outcome: None,
            reviewers: BTreeSet::new(),
            permissions: BTreeSet::new(),
            required_reviews: 1,
            decline_reasons: Vec::new(),
            completed_at: None,
            final_step: false,
            appealable: false,
            appeal_reviewers: BTreeSet::new(),
            appeal_required_reviews: 1,
            appealed_at: None,
            appealed_by: None,
            appeal_reason: None,
        }
    }

    /// With reviewer
    #[inline]
    #[must_use]
    pub fn with_reviewer(mut self, reviewer: Assignee) -> Self {
        self.reviewers.insert(reviewer);
        self
    }

    /// With step grant
    #[inline]
    #[must_use]
    pub fn with_grant(mut self, assignee: Assignee, operation: ProposalOperation) -> Self {
        self.permissions.insert(StepGrant::new(assignee, operation));
        self
    }

    /// With required pass reviews
    #[inline]
    #[must_use]
    pub fn with_required_reviews(mut self, required: u32) -> Self {
        self.required_reviews = required.max(1);
        self
    }

    /// With allowed decline reasons
    #[inline]
    #[must_use]
    pub fn with_decline_reasons(mut self, reasons: Vec<String>) -> Self {
        self.decline_reasons = reasons;
        self
    }

    /// Mark as priority step
    #[inline]
    #[must_use]
    pub fn as_final_step(mut self) -> Self {
        self.final_step = true;
        self
    }

    /// Allow appeals decided by `reviewers`
    #[must_use]
    pub fn with_appeal(mut self, reviewers: impl IntoIterator<Item = Assignee>, required: u32) -> Self {
        self.appealable = true;
        self.appeal_reviewers.extend(reviewers);
        self.appeal_required_reviews = required.max(1);
        self
    }

    /// Check if an appeal is open or decided on this step
    #[inline]
    #[must_use]
    pub fn is_appealed(&self) -> bool {
        self.appealed_at.is_some()
    }

    /// Reviewers deciding the step right now
    #[inline]
    #[must_use]
    pub fn active_reviewers(&self) -> &BTreeSet<Assignee> {
        if self.is_appealed() {
            &self.appeal_reviewers
        } else {
            &self.reviewers
        }
    }

    /// Pass reviews needed in the current review round
    #[inline]
    #[must_use]
    pub fn active_required_reviews(&self) -> u32 {
        if self.is_appealed() {
            self.appeal_required_reviews
        } else {
            self.required_reviews
        }
    }

    /// Whether committing `result` here ends the workflow
    ///
    /// A passed priority step ends it, and so does any appeal decision.
    #[inline]
    #[must_use]
    pub fn ends_workflow_with(&self, result: EvaluationResult) -> bool {
        self.is_appealed() || (self.final_step && result == EvaluationResult::Pass)
    }

    /// Whether the committed result ended the workflow
    #[inline]
    #[must_use]
    pub fn ends_workflow(&self) -> bool {
        self.result.is_some_and(|r| self.ends_workflow_with(r))
    }

    /// Check if the step has a committed result
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }

    /// Clear result, outcome, completion time and any appeal
    #[inline]
    pub fn reopen(&mut self) {
        self.result = None;
        self.outcome = None;
        self.completed_at = None;
        self.appealed_at = None;
        self.appealed_by = None;
        self.appeal_reason = None;
    }

    /// Copy of this step for another proposal, with a fresh id and no result
    #[must_use]
    pub fn blueprint_for(&self, proposal_id: ProposalId) -> Self {
        let mut copy = self.clone();
        copy.id = EvaluationId::new();
        copy.proposal_id = proposal_id;
        copy.reopen();
        copy
    }
}

/// A reviewer's verdict on a pass/fail step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassFailReview {
    /// Reviewed step
    pub evaluation_id: EvaluationId,
    /// Reviewer
    pub reviewer_id: UserId,
    /// Verdict
    pub result: EvaluationResult,
    /// Reason given when declining
    pub decline_reason: Option<String>,
    /// Cast while the step was under appeal
    #[serde(default)]
    pub appeal: bool,
    /// Submission time
    pub completed_at: DateTime<Utc>,
}

/// Outcome of a pass/fail step given its reviews
///
/// Any fail review fails the step; `required` pass reviews pass it.
#[must_use]
pub fn tally_reviews<'a>(
    reviews: impl IntoIterator<Item = &'a PassFailReview>,
    required: u32,
) -> Option<EvaluationResult> {
    let mut passes = 0u32;
    for review in reviews {
        match review.result {
            EvaluationResult::Fail => return Some(EvaluationResult::Fail),
            EvaluationResult::Pass => passes += 1,
        }
    }
    (passes >= required.max(1)).then_some(EvaluationResult::Pass)
}
