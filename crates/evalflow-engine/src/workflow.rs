//! Proposal workflow service
//!
//! Every operation follows the same shape: resolve the owning proposal from a
//! snapshot, ask the permission collaborator for the capability it needs,
//! then run a single store transaction that re-reads the rows it depends on,
//! plans with the pure core functions, and writes the result.

use crate::access::PermissionService;
use crate::config::WorkflowConfig;
use crate::store::{WorkflowStore, WorkspaceState};
use chrono::Utc;
use evalflow_core::{
    aggregate, sequencer, tally_reviews, validate_submission, AdvancePlan, AnswerInput, Assignee,
    DraftRubricAnswer, Evaluation, EvaluationId, EvaluationResult, EvaluationType, PageId,
    PassFailReview, PermissionId, Proposal, ProposalId, ProposalOperation, ProposalPermissionFlags,
    ProposalStatus, RubricAggregation, RubricAnswer, RubricCriterion, RubricPolicy, ScoreRange, SpaceId, StepGrant, StepPosition,
    SubmissionMode, SystemRole, UserId, WorkflowError, WorkflowResult,
};
use evalflow_pages::{verify_subtree, PageAssignee, PageTree, PermissionLevel, RepositionReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Where the pointer landed after [`ProposalWorkflow::advance`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "evaluation", rename_all = "snake_case")]
pub enum Advanced {
    /// This step is now current
    Next(Evaluation),
    /// Every step is resolved
    Completed,
}

impl Advanced {
    /// The new current step, if any
    #[must_use]
    pub fn evaluation(&self) -> Option<&Evaluation> {
        match self {
            Self::Next(e) => Some(e),
            Self::Completed => None,
        }
    }
}

/// Owned form of the sequencer pointer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "evaluation", rename_all = "snake_case")]
pub enum ProposalPosition {
    /// No evaluations
    Empty,
    /// This step is current
    Active(Evaluation),
    /// Every step is resolved; the pointer rests on the last
    Resolved(Evaluation),
}

impl From<StepPosition<'_>> for ProposalPosition {
    fn from(position: StepPosition<'_>) -> Self {
        match position {
            StepPosition::Empty => Self::Empty,
            StepPosition::Active(e) => Self::Active(e.clone()),
            StepPosition::Resolved(e) => Self::Resolved(e.clone()),
        }
    }
}

/// Aggregated rubric scores with the policy's verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RubricResults {
    /// Rubric step
    pub evaluation_id: EvaluationId,
    /// Score rollup over finalized answers
    pub aggregation: RubricAggregation,
    /// Policy verdict; `None` when undecided
    pub overall_result: Option<EvaluationResult>,
    /// Policy that produced the verdict
    pub policy: &'static str,
}

/// A criterion to create on a rubric step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionDraft {
    /// Display title
    pub title: String,
    /// Guidance for reviewers
    #[serde(default)]
    pub description: Option<String>,
    /// Lowest allowed score
    pub min: f64,
    /// Highest allowed score
    pub max: f64,
}

/// A step to create on a new proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDraft {
    /// Step kind
    pub evaluation_type: EvaluationType,
    /// Display title
    pub title: String,
    /// Reviewer assignees
    #[serde(default)]
    pub reviewers: BTreeSet<Assignee>,
    /// Step-scoped grants
    #[serde(default)]
    pub permissions: BTreeSet<StepGrant>,
    /// Pass reviews required (pass/fail only)
    #[serde(default)]
    pub required_reviews: Option<u32>,
    /// Allowed decline reasons
    #[serde(default)]
    pub decline_reasons: Vec<String>,
    /// Criteria (rubric only)
    #[serde(default)]
    pub criteria: Vec<CriterionDraft>,
    /// Priority step (pass/fail only)
    #[serde(default)]
    pub final_step: bool,
    /// Appeal reviewers; a non-empty set makes the step appealable
    #[serde(default)]
    pub appeal_reviewers: BTreeSet<Assignee>,
    /// Pass reviews required to uphold an appeal
    #[serde(default)]
    pub appeal_required_reviews: Option<u32>,
}

impl StepDraft {
    /// Create a step draft
    #[must_use]
    pub fn new(evaluation_type: EvaluationType, title: impl Into<String>) -> Self {
        Self {
            evaluation_type,
            title: title.into(),
            reviewers: BTreeSet::new(),
            permissions: BTreeSet::new(),
            required_reviews: None,
            decline_reasons: Vec::new(),
            criteria: Vec::new(),
            final_step: false,
            appeal_reviewers: BTreeSet::new(),
            appeal_required_reviews: None,
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

    /// With criterion
    #[inline]
    #[must_use]
    pub fn with_criterion(mut self, title: impl Into<String>, min: f64, max: f64) -> Self {
        self.criteria.push(CriterionDraft {
            title: title.into(),
            description: None,
            min,
            max,
        });
        self
    }

    /// With required pass reviews
    #[inline]
    #[must_use]
    pub fn with_required_reviews(mut self, required: u32) -> Self {
        self.required_reviews = Some(required);
        self
    }

    /// With allowed decline reasons
    #[inline]
    #[must_use]
    pub fn with_decline_reasons(mut self, reasons: Vec<String>) -> Self {
        self.decline_reasons = reasons;
        self
    }

    /// As priority step
    #[inline]
    #[must_use]
    pub fn as_final_step(mut self) -> Self {
        self.final_step = true;
        self
    }

    /// Appealable, decided by `reviewer` with `required` pass reviews
    #[inline]
    #[must_use]
    pub fn with_appeal_reviewer(mut self, reviewer: Assignee, required: u32) -> Self {
        self.appeal_reviewers.insert(reviewer);
        self.appeal_required_reviews = Some(required);
        self
    }
}

/// A proposal to create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalDraft {
    /// Owning space
    pub space_id: SpaceId,
    /// Creator
    pub author: UserId,
    /// Page the proposal page is created under
    #[serde(default)]
    pub parent_page: Option<PageId>,
    /// Steps in order
    pub steps: Vec<StepDraft>,
    /// Create as a template
    #[serde(default)]
    pub is_template: bool,
}

impl ProposalDraft {
    /// Create a draft with no steps
    #[must_use]
    pub fn new(space_id: SpaceId, author: UserId) -> Self {
        Self {
            space_id,
            author,
            parent_page: None,
            steps: Vec::new(),
            is_template: false,
        }
    }

    /// With step appended
    #[inline]
    #[must_use]
    pub fn with_step(mut self, step: StepDraft) -> Self {
        self.steps.push(step);
        self
    }

    /// Under parent page
    #[inline]
    #[must_use]
    pub fn under(mut self, parent: PageId) -> Self {
        self.parent_page = Some(parent);
        self
    }

    /// As template
    #[inline]
    #[must_use]
    pub fn as_template(mut self) -> Self {
        self.is_template = true;
        self
    }
}

/// Pre-publication edits to a step; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    /// Replacement reviewer set
    pub reviewers: Option<BTreeSet<Assignee>>,
    /// Replacement step grants
    pub permissions: Option<BTreeSet<StepGrant>>,
    /// Pass reviews required
    pub required_reviews: Option<u32>,
    /// Allowed decline reasons
    pub decline_reasons: Option<Vec<String>>,
    /// Replacement appeal reviewer set; empty disables appeals
    pub appeal_reviewers: Option<BTreeSet<Assignee>>,
    /// Pass reviews required to uphold an appeal
    pub appeal_required_reviews: Option<u32>,
}

fn reject_template(proposal: &Proposal) -> WorkflowResult<()> {
    if proposal.is_template {
        return Err(WorkflowError::NotPermitted(
            "templates are evaluation blueprints and cannot be evaluated".to_string(),
        ));
    }
    Ok(())
}

fn ensure_live(proposal: &Proposal) -> WorkflowResult<()> {
    reject_template(proposal)?;
    if proposal.is_draft() {
        return Err(WorkflowError::InvalidState(format!(
            "proposal {} is still a draft",
            proposal.id
        )));
    }
    if proposal.archived {
        return Err(WorkflowError::InvalidState(format!(
            "proposal {} is archived",
            proposal.id
        )));
    }
    Ok(())
}

fn ensure_type(step: &Evaluation, expected: EvaluationType) -> WorkflowResult<()> {
    if step.evaluation_type == expected {
        Ok(())
    } else {
        Err(WorkflowError::InvalidInput(format!(
            "evaluation '{}' is a {} step, not {expected}",
            step.title, step.evaluation_type
        )))
    }
}

/// The step must be the proposal's current, unresolved step
fn ensure_current(state: &WorkspaceState, step: &Evaluation) -> WorkflowResult<()> {
    if step.is_resolved() {
        return Err(WorkflowError::InvalidState(format!(
            "evaluation '{}' is already resolved",
            step.title
        )));
    }
    match state.current_evaluation(step.proposal_id) {
        Some(current) if current.id == step.id => Ok(()),
        _ => Err(WorkflowError::InvalidState(format!(
            "evaluation '{}' is not the current step",
            step.title
        ))),
    }
}

/// Load a step that reviewers may act on right now
fn active_step(
    state: &WorkspaceState,
    evaluation_id: EvaluationId,
    expected: EvaluationType,
) -> WorkflowResult<Evaluation> {
    let step = state.evaluation(evaluation_id)?.clone();
    ensure_type(&step, expected)?;
    ensure_live(state.proposal(step.proposal_id)?)?;
    ensure_current(state, &step)?;
    Ok(step)
}

/// Check the inheritance invariant below the page a mutation targeted
fn check_pages(tree: &PageTree, root: PageId, enabled: bool) -> WorkflowResult<()> {
    if !enabled {
        return Ok(());
    }
    verify_subtree(tree, root).map_err(|violations| {
        tracing::error!(page = %root, count = violations.len(), first = %violations[0], "page inheritance invariant violated");
        WorkflowError::InvalidState(format!(
            "page inheritance invariant violated ({} issues): {}",
            violations.len(),
            violations[0]
        ))
    })
}

fn validate_reviewers(reviewers: &BTreeSet<Assignee>) -> WorkflowResult<()> {
    if reviewers.contains(&Assignee::System(SystemRole::CurrentReviewer)) {
        return Err(WorkflowError::InvalidInput(
            "current_reviewer cannot be assigned as a reviewer".to_string(),
        ));
    }
    Ok(())
}

/// Priority and appeal settings exist only on pass/fail steps
fn validate_review_rounds(step: &Evaluation) -> WorkflowResult<()> {
    if step.evaluation_type == EvaluationType::PassFail {
        return validate_reviewers(&step.appeal_reviewers);
    }
    if step.final_step || step.appealable {
        return Err(WorkflowError::InvalidInput(format!(
            "priority and appeal settings are only allowed on pass/fail steps, '{}' is {}",
            step.title, step.evaluation_type
        )));
    }
    Ok(())
}

/// Outcome of the step's current review round
fn tally_round(state: &WorkspaceState, step: &Evaluation) -> Option<EvaluationResult> {
    let reviews = state.reviews_of(step.id);
    let round = reviews.iter().filter(|r| r.appeal == step.is_appealed());
    tally_reviews(round, step.active_required_reviews())
}

fn denied(proposal_id: ProposalId, user_id: UserId, operation: ProposalOperation) -> WorkflowError {
    tracing::warn!(proposal = %proposal_id, user = %user_id, %operation, "capability denied");
    WorkflowError::missing_capability(operation, format!("proposal {proposal_id}"))
}

/// The proposal evaluation workflow
pub struct ProposalWorkflow<S, P> {
    store: Arc<S>,
    permissions: Arc<P>,
    policy: Arc<dyn RubricPolicy>,
    config: WorkflowConfig,
}

impl<S, P> ProposalWorkflow<S, P>
where
    S: WorkflowStore,
    P: PermissionService,
{
    /// Create a workflow using the policy named in `config`
    #[must_use]
    pub fn new(store: Arc<S>, permissions: Arc<P>, config: WorkflowConfig) -> Self {
        Self {
            store,
            permissions,
            policy: config.rubric_policy.build(),
            config,
        }
    }

    /// Replace the rubric policy
    #[must_use]
    pub fn with_policy(mut self, policy: impl RubricPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Backing store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn require(
        &self,
        proposal_id: ProposalId,
        user_id: UserId,
        operation: ProposalOperation,
    ) -> WorkflowResult<ProposalPermissionFlags> {
        let flags = self.permissions.flags(proposal_id, user_id).await?;
        if flags.has(operation) {
            return Ok(flags);
        }
        Err(denied(proposal_id, user_id, operation))
    }

    async fn proposal_of(&self, evaluation_id: EvaluationId) -> WorkflowResult<ProposalId> {
        let state = self.store.snapshot().await?;
        Ok(state.evaluation(evaluation_id)?.proposal_id)
    }

    // --- Sequencer -------------------------------------------------------

    /// The proposal's current step
    ///
    /// # Errors
    /// `DataNotFound`
    pub async fn current_evaluation(&self, proposal_id: ProposalId) -> WorkflowResult<Option<Evaluation>> {
        let state = self.store.snapshot().await?;
        state.proposal(proposal_id)?;
        Ok(state.current_evaluation(proposal_id))
    }

    /// Where the proposal's pointer rests
    ///
    /// # Errors
    /// `DataNotFound`
    pub async fn position(&self, proposal_id: ProposalId) -> WorkflowResult<ProposalPosition> {
        let state = self.store.snapshot().await?;
        state.proposal(proposal_id)?;
        let steps = state.evaluations_of(proposal_id);
        Ok(sequencer::position(&steps).into())
    }

    /// Whether [`go_back`](Self::go_back) is currently possible
    ///
    /// # Errors
    /// `DataNotFound`
    pub async fn can_go_back(&self, proposal_id: ProposalId) -> WorkflowResult<bool> {
        let state = self.store.snapshot().await?;
        let proposal = state.proposal(proposal_id)?;
        if ensure_live(proposal).is_err() {
            return Ok(false);
        }
        Ok(sequencer::can_go_back(&state.evaluations_of(proposal_id)))
    }

    /// Resolve `expected_evaluation_id` and move the pointer past it
    ///
    /// `expected_evaluation_id` is the step the caller saw as current. If it
    /// has already been resolved the call changes nothing and reports the
    /// same successor again.
    ///
    /// # Errors
    /// - `DataNotFound` for an unknown proposal or step
    /// - `NotPermitted` without `move`, or on a template. A replay needs only
    ///   `view`, but if the step was reopened in the meantime the commit
    ///   still requires `move`.
    /// - `InvalidState` for drafts, archived proposals, unreached steps and
    ///   steps without a committable result
    pub async fn advance(
        &self,
        proposal_id: ProposalId,
        user_id: UserId,
        expected_evaluation_id: EvaluationId,
    ) -> WorkflowResult<Advanced> {
        let state = self.store.snapshot().await?;
        reject_template(state.proposal(proposal_id)?)?;
        let preview = sequencer::plan_advance(&state.evaluations_of(proposal_id), expected_evaluation_id)?;
        let needed = match preview {
            AdvancePlan::Commit { .. } => ProposalOperation::Move,
            AdvancePlan::AlreadyAdvanced { .. } => ProposalOperation::View,
        };
        let may_move = self.require(proposal_id, user_id, needed).await?.has(ProposalOperation::Move);

        let (plan, next) = self
            .store
            .transaction(move |state| {
                ensure_live(state.proposal(proposal_id)?)?;
                let steps = state.evaluations_of(proposal_id);
                let plan = sequencer::plan_advance(&steps, expected_evaluation_id)?;
                if matches!(plan, AdvancePlan::Commit { .. }) && !may_move {
                    return Err(denied(proposal_id, user_id, ProposalOperation::Move));
                }

                if let AdvancePlan::Commit { evaluation, result, .. } = plan {
                    let now = Utc::now();
                    state.update_evaluation(evaluation, |e| {
                        e.outcome = Some(result);
                        e.result = Some(result);
                        e.completed_at = Some(now);
                    })?;
                }

                let next = match plan.next() {
                    Some(id) => Some(state.evaluation(id)?.clone()),
                    None => None,
                };
                Ok((plan, next))
            })
            .await?;

        match plan {
            AdvancePlan::Commit { evaluation, result, .. } => tracing::info!(
                proposal = %proposal_id,
                user = %user_id,
                %evaluation,
                ?result,
                next = ?next.as_ref().map(|e| e.id),
                "advanced proposal"
            ),
            AdvancePlan::AlreadyAdvanced { .. } => tracing::debug!(
                proposal = %proposal_id,
                evaluation = %expected_evaluation_id,
                "duplicate advance ignored"
            ),
        }

        Ok(next.map_or(Advanced::Completed, Advanced::Next))
    }

    /// Reopen the step before the pointer
    ///
    /// The target step and every later step lose their result and outcome.
    /// Pass/fail reviews on reopened steps are discarded; rubric answers are
    /// kept.
    ///
    /// # Errors
    /// - `DataNotFound` for an unknown proposal
    /// - `NotPermitted` without `move`, or on a template
    /// - `InvalidState` at the first step, or for drafts and archived
    ///   proposals
    pub async fn go_back(&self, proposal_id: ProposalId, user_id: UserId) -> WorkflowResult<Evaluation> {
        let state = self.store.snapshot().await?;
        reject_template(state.proposal(proposal_id)?)?;
        self.require(proposal_id, user_id, ProposalOperation::Move).await?;

        let target = self
            .store
            .transaction(move |state| {
                ensure_live(state.proposal(proposal_id)?)?;
                let plan = sequencer::plan_go_back(&state.evaluations_of(proposal_id))?;
                for id in &plan.reopen {
                    state.update_evaluation(*id, Evaluation::reopen)?;
                    state.reviews.remove(id);
                }
                Ok(state.evaluation(plan.target)?.clone())
            })
            .await?;

        tracing::info!(
            proposal = %proposal_id,
            user = %user_id,
            evaluation = %target.id,
            index = target.index,
            "moved proposal back"
        );
        Ok(target)
    }

    // --- Rubric ----------------------------------------------------------

    /// Submit a reviewer's final answers for a rubric step
    ///
    /// Replaces the reviewer's earlier answers and deletes their drafts. The
    /// step's outcome is cleared since the scores changed.
    ///
    /// # Errors
    /// - `NotPermitted` without `evaluate`
    /// - `DataNotFound` for unknown steps or criteria
    /// - `InvalidInput` for invalid or incomplete answers
    /// - `InvalidState` when the step is not current
    pub async fn submit_rubric_answers(
        &self,
        evaluation_id: EvaluationId,
        user_id: UserId,
        answers: Vec<AnswerInput>,
    ) -> WorkflowResult<Vec<RubricAnswer>> {
        let proposal_id = self.proposal_of(evaluation_id).await?;
        self.require(proposal_id, user_id, ProposalOperation::Evaluate).await?;

        let rows = self
            .store
            .transaction(move |state| {
                active_step(state, evaluation_id, EvaluationType::Rubric)?;
                validate_submission(&state.criteria_of(evaluation_id), &answers, SubmissionMode::Final)?;

                let rows: Vec<RubricAnswer> = answers
                    .iter()
                    .map(|a| a.finalize(evaluation_id, user_id))
                    .collect();
                state.replace_answers(evaluation_id, user_id, rows.clone());
                state.clear_drafts(evaluation_id, user_id);
                state.update_evaluation(evaluation_id, |e| e.outcome = None)?;
                Ok(rows)
            })
            .await?;

        tracing::info!(evaluation = %evaluation_id, user = %user_id, answers = rows.len(), "submitted rubric answers");
        Ok(rows)
    }

    /// Save partial answers for later
    ///
    /// # Errors
    /// As [`submit_rubric_answers`](Self::submit_rubric_answers), without the
    /// completeness check
    pub async fn save_draft_rubric_answers(
        &self,
        evaluation_id: EvaluationId,
        user_id: UserId,
        answers: Vec<AnswerInput>,
    ) -> WorkflowResult<Vec<DraftRubricAnswer>> {
        let proposal_id = self.proposal_of(evaluation_id).await?;
        self.require(proposal_id, user_id, ProposalOperation::Evaluate).await?;

        self.store
            .transaction(move |state| {
                active_step(state, evaluation_id, EvaluationType::Rubric)?;
                validate_submission(&state.criteria_of(evaluation_id), &answers, SubmissionMode::Draft)?;

                let drafts: Vec<DraftRubricAnswer> = answers
                    .iter()
                    .map(|a| a.draft(evaluation_id, user_id))
                    .collect();
                state.upsert_drafts(evaluation_id, user_id, drafts);
                Ok(state.drafts_of(evaluation_id, user_id))
            })
            .await
    }

    /// Delete a reviewer's drafts, returning how many were removed
    ///
    /// # Errors
    /// `DataNotFound`, `NotPermitted` without `evaluate`
    pub async fn delete_draft_rubric_answers(
        &self,
        evaluation_id: EvaluationId,
        user_id: UserId,
    ) -> WorkflowResult<usize> {
        let proposal_id = self.proposal_of(evaluation_id).await?;
        self.require(proposal_id, user_id, ProposalOperation::Evaluate).await?;

        self.store
            .transaction(move |state| {
                ensure_type(state.evaluation(evaluation_id)?, EvaluationType::Rubric)?;
                Ok(state.clear_drafts(evaluation_id, user_id))
            })
            .await
    }

    /// Aggregate finalized answers and apply the rubric policy
    ///
    /// # Errors
    /// `DataNotFound`, `InvalidInput` for non-rubric steps
    pub async fn aggregate_results(&self, evaluation_id: EvaluationId) -> WorkflowResult<RubricResults> {
        let state = self.store.snapshot().await?;
        ensure_type(state.evaluation(evaluation_id)?, EvaluationType::Rubric)?;

        let aggregation = aggregate(&state.criteria_of(evaluation_id), &state.answers_of(evaluation_id));
        let overall_result = self.policy.decide(&aggregation);
        Ok(RubricResults {
            evaluation_id,
            aggregation,
            overall_result,
            policy: self.policy.name(),
        })
    }

    /// Record the policy verdict as the rubric step's outcome
    ///
    /// An undecided verdict clears the outcome.
    ///
    /// # Errors
    /// `NotPermitted` without `evaluate`; `InvalidState` when not current
    pub async fn resolve_rubric(
        &self,
        evaluation_id: EvaluationId,
        user_id: UserId,
    ) -> WorkflowResult<Option<EvaluationResult>> {
        let proposal_id = self.proposal_of(evaluation_id).await?;
        self.require(proposal_id, user_id, ProposalOperation::Evaluate).await?;
        let policy = Arc::clone(&self.policy);

        let decision = self
            .store
            .transaction(move |state| {
                active_step(state, evaluation_id, EvaluationType::Rubric)?;
                let aggregation = aggregate(&state.criteria_of(evaluation_id), &state.answers_of(evaluation_id));
                let decision = policy.decide(&aggregation);
                state.update_evaluation(evaluation_id, |e| e.outcome = decision)?;
                Ok(decision)
            })
            .await?;

        tracing::info!(evaluation = %evaluation_id, policy = self.policy.name(), ?decision, "resolved rubric");
        Ok(decision)
    }

    /// Remove every answer and draft of a reviewer from a rubric step
    ///
    /// Used after a reviewer is taken off the step; answers are otherwise
    /// retained.
    ///
    /// # Errors
    /// `NotPermitted` without `edit`; `InvalidState` once the step is resolved
    pub async fn purge_reviewer_answers(
        &self,
        evaluation_id: EvaluationId,
        user_id: UserId,
        reviewer_id: UserId,
    ) -> WorkflowResult<usize> {
        let proposal_id = self.proposal_of(evaluation_id).await?;
        self.require(proposal_id, user_id, ProposalOperation::Edit).await?;

        let removed = self
            .store
            .transaction(move |state| {
                let step = state.evaluation(evaluation_id)?;
                ensure_type(step, EvaluationType::Rubric)?;
                if step.is_resolved() {
                    return Err(WorkflowError::InvalidState(format!(
                        "answers on resolved evaluation '{}' are immutable",
                        step.title
                    )));
                }
                let before = state.answers_of(evaluation_id).len();
                state.replace_answers(evaluation_id, reviewer_id, Vec::new());
                let removed = before - state.answers_of(evaluation_id).len();
                let drafts = state.clear_drafts(evaluation_id, reviewer_id);
                if removed > 0 {
                    state.update_evaluation(evaluation_id, |e| e.outcome = None)?;
                }
                Ok(removed + drafts)
            })
            .await?;

        tracing::info!(evaluation = %evaluation_id, reviewer = %reviewer_id, removed, "purged reviewer answers");
        Ok(removed)
    }

    // --- Pass/fail and votes ---------------------------------------------

    /// Record a reviewer's verdict on the current pass/fail step
    ///
    /// Once the step is appealed the verdict counts toward the appeal round,
    /// tallied against the appeal's required reviews. Returns the step's
    /// outcome after tallying.
    ///
    /// # Errors
    /// - `NotPermitted` without `evaluate`
    /// - `InvalidState` when not current or already reviewed by this user
    /// - `InvalidInput` for a decline reason outside the configured list
    pub async fn submit_pass_fail_review(
        &self,
        evaluation_id: EvaluationId,
        user_id: UserId,
        result: EvaluationResult,
        decline_reason: Option<String>,
    ) -> WorkflowResult<Option<EvaluationResult>> {
        let proposal_id = self.proposal_of(evaluation_id).await?;
        self.require(proposal_id, user_id, ProposalOperation::Evaluate).await?;

        let outcome = self
            .store
            .transaction(move |state| {
                let step = active_step(state, evaluation_id, EvaluationType::PassFail)?;
                let appeal = step.is_appealed();
                if state
                    .reviews_of(evaluation_id)
                    .iter()
                    .any(|r| r.reviewer_id == user_id && r.appeal == appeal)
                {
                    return Err(WorkflowError::InvalidState(format!(
                        "user {user_id} already reviewed '{}'",
                        step.title
                    )));
                }

                let decline_reason = match result {
                    EvaluationResult::Pass => None,
                    EvaluationResult::Fail => {
                        if !step.decline_reasons.is_empty()
                            && !decline_reason.as_ref().is_some_and(|r| step.decline_reasons.contains(r))
                        {
                            return Err(WorkflowError::InvalidInput(format!(
                                "decline reason must be one of: {}",
                                step.decline_reasons.join(", ")
                            )));
                        }
                        decline_reason
                    }
                };

                state.put_review(PassFailReview {
                    evaluation_id,
                    reviewer_id: user_id,
                    result,
                    decline_reason,
                    appeal,
                    completed_at: Utc::now(),
                });
                let outcome = tally_round(state, &step);
                state.update_evaluation(evaluation_id, |e| e.outcome = outcome)?;
                Ok(outcome)
            })
            .await?;

        tracing::info!(evaluation = %evaluation_id, user = %user_id, ?result, ?outcome, "recorded pass/fail review");
        Ok(outcome)
    }

    /// Withdraw the caller's own pass/fail review
    ///
    /// # Errors
    /// `InvalidState` when the user has no review; otherwise as
    /// [`submit_pass_fail_review`](Self::submit_pass_fail_review)
    pub async fn reset_pass_fail_review(
        &self,
        evaluation_id: EvaluationId,
        user_id: UserId,
    ) -> WorkflowResult<Option<EvaluationResult>> {
        let proposal_id = self.proposal_of(evaluation_id).await?;
        self.require(proposal_id, user_id, ProposalOperation::Evaluate).await?;

        self.store
            .transaction(move |state| {
                let step = active_step(state, evaluation_id, EvaluationType::PassFail)?;
                if !state.remove_review(evaluation_id, user_id, step.is_appealed()) {
                    return Err(WorkflowError::InvalidState(format!(
                        "user {user_id} has not reviewed '{}'",
                        step.title
                    )));
                }
                let outcome = tally_round(state, &step);
                state.update_evaluation(evaluation_id, |e| e.outcome = outcome)?;
                Ok(outcome)
            })
            .await
    }

    /// Appeal a failed pass/fail step
    ///
    /// Only an author may appeal, once per step. The outcome is cleared and
    /// the step is handed to its appeal reviewers; the original reviews are
    /// kept but no longer counted. Whatever the appeal round decides is final
    /// for the proposal.
    ///
    /// # Errors
    /// - `NotPermitted` for non-authors
    /// - `InvalidInput` for non pass/fail steps
    /// - `InvalidState` when the step is not current, not appealable, not
    ///   failed, or already appealed
    pub async fn appeal(
        &self,
        evaluation_id: EvaluationId,
        user_id: UserId,
        reason: impl Into<String>,
    ) -> WorkflowResult<Evaluation> {
        let reason = reason.into();

        let step = self
            .store
            .transaction(move |state| {
                let step = active_step(state, evaluation_id, EvaluationType::PassFail)?;
                if !state.proposal(step.proposal_id)?.is_author(user_id) {
                    return Err(WorkflowError::NotPermitted(format!(
                        "only authors can appeal '{}'",
                        step.title
                    )));
                }
                if !step.appealable {
                    return Err(WorkflowError::InvalidState(format!(
                        "evaluation '{}' is not appealable",
                        step.title
                    )));
                }
                if step.is_appealed() {
                    return Err(WorkflowError::InvalidState(format!(
                        "evaluation '{}' was already appealed",
                        step.title
                    )));
                }
                if step.outcome != Some(EvaluationResult::Fail) {
                    return Err(WorkflowError::InvalidState(format!(
                        "only a failed evaluation can be appealed, '{}' has {:?}",
                        step.title, step.outcome
                    )));
                }

                let now = Utc::now();
                state.update_evaluation(evaluation_id, |e| {
                    e.appealed_at = Some(now);
                    e.appealed_by = Some(user_id);
                    e.appeal_reason = Some(reason);
                    e.outcome = None;
                })?;
                Ok(state.evaluation(evaluation_id)?.clone())
            })
            .await?;

        tracing::info!(evaluation = %evaluation_id, user = %user_id, "appealed evaluation");
        Ok(step)
    }

    /// Record the result of an external vote on the current vote step
    ///
    /// # Errors
    /// `InvalidInput` for non-vote steps; `InvalidState` when not current
    pub async fn conclude_vote(
        &self,
        evaluation_id: EvaluationId,
        result: EvaluationResult,
    ) -> WorkflowResult<Evaluation> {
        let step = self
            .store
            .transaction(move |state| {
                active_step(state, evaluation_id, EvaluationType::Vote)?;
                state.update_evaluation(evaluation_id, |e| e.outcome = Some(result))?;
                Ok(state.evaluation(evaluation_id)?.clone())
            })
            .await?;

        tracing::info!(evaluation = %evaluation_id, ?result, "vote concluded");
        Ok(step)
    }

    // --- Authoring -------------------------------------------------------

    /// Create a proposal, its page and its steps
    ///
    /// # Errors
    /// `InvalidInput` for criteria on non-rubric steps, bad score ranges or a
    /// malformed reviewer set; page errors from the tree
    pub async fn create_proposal(&self, draft: ProposalDraft) -> WorkflowResult<Proposal> {
        let verify = self.config.verify_inheritance;

        let proposal = self
            .store
            .transaction(move |state| {
                let page_id = PageId::new();
                state.pages.create_page(page_id, draft.parent_page, draft.space_id)?;
                check_pages(&state.pages, page_id, verify)?;

                let mut proposal = Proposal::new(draft.space_id, page_id, draft.author);
                proposal.is_template = draft.is_template;

                for (index, step) in draft.steps.into_iter().enumerate() {
                    let index = u32::try_from(index)
                        .map_err(|_| WorkflowError::InvalidInput("too many steps".to_string()))?;
                    validate_reviewers(&step.reviewers)?;
                    if !step.criteria.is_empty() && step.evaluation_type != EvaluationType::Rubric {
                        return Err(WorkflowError::InvalidInput(format!(
                            "criteria are only allowed on rubric steps, '{}' is {}",
                            step.title, step.evaluation_type
                        )));
                    }

                    let mut evaluation =
                        Evaluation::new(proposal.id, index, step.evaluation_type, step.title)
                            .with_decline_reasons(step.decline_reasons);
                    evaluation.reviewers = step.reviewers;
                    evaluation.permissions = step.permissions;
                    if let Some(required) = step.required_reviews {
                        evaluation = evaluation.with_required_reviews(required);
                    }
                    evaluation.final_step = step.final_step;
                    if !step.appeal_reviewers.is_empty() {
                        evaluation = evaluation.with_appeal(
                            step.appeal_reviewers,
                            step.appeal_required_reviews.unwrap_or(1),
                        );
                    }
                    validate_review_rounds(&evaluation)?;

                    let criteria = step
                        .criteria
                        .into_iter()
                        .map(|c| {
                            let mut criterion = RubricCriterion::new(
                                evaluation.id,
                                c.title,
                                ScoreRange::new(c.min, c.max)?,
                            );
                            criterion.description = c.description;
                            Ok(criterion)
                        })
                        .collect::<WorkflowResult<Vec<_>>>()?;

                    if !criteria.is_empty() {
                        state.put_criteria(evaluation.id, criteria);
                    }
                    state.put_evaluation(evaluation);
                }

                state.put_proposal(proposal.clone());
                Ok(proposal)
            })
            .await?;

        tracing::info!(
            proposal = %proposal.id,
            page = %proposal.page_id,
            template = proposal.is_template,
            "created proposal"
        );
        Ok(proposal)
    }

    /// Create a draft proposal from a template's steps and criteria
    ///
    /// Everything is copied with fresh ids; nothing references the template
    /// afterwards except `source_template`.
    ///
    /// # Errors
    /// `DataNotFound`; `InvalidInput` when the source is not a template
    pub async fn instantiate_template(
        &self,
        template_id: ProposalId,
        author: UserId,
        parent_page: Option<PageId>,
    ) -> WorkflowResult<Proposal> {
        let verify = self.config.verify_inheritance;

        let proposal = self
            .store
            .transaction(move |state| {
                let template = state.proposal(template_id)?.clone();
                if !template.is_template {
                    return Err(WorkflowError::InvalidInput(format!(
                        "proposal {template_id} is not a template"
                    )));
                }

                let page_id = PageId::new();
                state.pages.create_page(page_id, parent_page, template.space_id)?;
                check_pages(&state.pages, page_id, verify)?;

                let mut proposal = Proposal::new(template.space_id, page_id, author);
                proposal.source_template = Some(template_id);

                for source in state.evaluations_of(template_id) {
                    let copy = source.blueprint_for(proposal.id);
                    let criteria: Vec<RubricCriterion> = state
                        .criteria_of(source.id)
                        .iter()
                        .map(|c| c.blueprint_for(copy.id))
                        .collect();
                    if !criteria.is_empty() {
                        state.put_criteria(copy.id, criteria);
                    }
                    state.put_evaluation(copy);
                }

                state.put_proposal(proposal.clone());
                Ok(proposal)
            })
            .await?;

        tracing::info!(proposal = %proposal.id, template = %template_id, "instantiated template");
        Ok(proposal)
    }

    /// Edit a step's reviewers, grants and review settings before publication
    ///
    /// # Errors
    /// `NotPermitted` without `edit`; `InvalidState` once published;
    /// `InvalidInput` for a malformed reviewer set
    pub async fn update_evaluation_settings(
        &self,
        evaluation_id: EvaluationId,
        user_id: UserId,
        settings: EvaluationSettings,
    ) -> WorkflowResult<Evaluation> {
        let proposal_id = self.proposal_of(evaluation_id).await?;
        self.require(proposal_id, user_id, ProposalOperation::Edit).await?;

        self.store
            .transaction(move |state| {
                let step = state.evaluation(evaluation_id)?;
                if !state.proposal(step.proposal_id)?.is_draft() {
                    return Err(WorkflowError::InvalidState(
                        "evaluation settings can only change while the proposal is a draft".to_string(),
                    ));
                }
                if let Some(reviewers) = &settings.reviewers {
                    validate_reviewers(reviewers)?;
                }
                if settings.required_reviews == Some(0) || settings.appeal_required_reviews == Some(0) {
                    return Err(WorkflowError::InvalidInput(
                        "required review counts must be at least 1".to_string(),
                    ));
                }

                state.update_evaluation(evaluation_id, |e| {
                    if let Some(reviewers) = settings.reviewers {
                        e.reviewers = reviewers;
                    }
                    if let Some(permissions) = settings.permissions {
                        e.permissions = permissions;
                    }
                    if let Some(required) = settings.required_reviews {
                        e.required_reviews = required;
                    }
                    if let Some(reasons) = settings.decline_reasons {
                        e.decline_reasons = reasons;
                    }
                    if let Some(reviewers) = settings.appeal_reviewers {
                        e.appealable = !reviewers.is_empty();
                        e.appeal_reviewers = reviewers;
                    }
                    if let Some(required) = settings.appeal_required_reviews {
                        e.appeal_required_reviews = required;
                    }
                })?;
                let step = state.evaluation(evaluation_id)?.clone();
                validate_review_rounds(&step)?;
                Ok(step)
            })
            .await
    }

    /// Move a draft proposal into evaluation
    ///
    /// # Errors
    /// - `NotPermitted` without `edit`, or for templates
    /// - `InvalidState` if already published
    /// - `InvalidInput` if the steps are incomplete
    pub async fn publish(&self, proposal_id: ProposalId, user_id: UserId) -> WorkflowResult<Proposal> {
        self.require(proposal_id, user_id, ProposalOperation::Edit).await?;

        let proposal = self
            .store
            .transaction(move |state| {
                let proposal = state.proposal(proposal_id)?;
                if proposal.is_template {
                    return Err(WorkflowError::NotPermitted("templates cannot be published".to_string()));
                }
                if !proposal.is_draft() {
                    return Err(WorkflowError::InvalidState(format!(
                        "proposal {proposal_id} is already published"
                    )));
                }

                let steps = state.evaluations_of(proposal_id);
                if steps.is_empty() {
                    return Err(WorkflowError::InvalidInput(
                        "proposal has no evaluation steps".to_string(),
                    ));
                }
                sequencer::validate_sequence(&steps)?;
                for step in &steps {
                    if step.evaluation_type.requires_reviewers() && step.reviewers.is_empty() {
                        return Err(WorkflowError::InvalidInput(format!(
                            "evaluation '{}' has no reviewers",
                            step.title
                        )));
                    }
                    if step.appealable && step.appeal_reviewers.is_empty() {
                        return Err(WorkflowError::InvalidInput(format!(
                            "appealable evaluation '{}' has no appeal reviewers",
                            step.title
                        )));
                    }
                    if step.evaluation_type == EvaluationType::Rubric && state.criteria_of(step.id).is_empty() {
                        return Err(WorkflowError::InvalidInput(format!(
                            "rubric '{}' has no criteria",
                            step.title
                        )));
                    }
                }

                let mut published = proposal.clone();
                published.status = ProposalStatus::Published;
                state.put_proposal(published.clone());
                Ok(published)
            })
            .await?;

        tracing::info!(proposal = %proposal_id, user = %user_id, "published proposal");
        Ok(proposal)
    }

    /// Archive or unarchive a proposal
    ///
    /// # Errors
    /// `NotPermitted` without `archive`
    pub async fn set_archived(
        &self,
        proposal_id: ProposalId,
        user_id: UserId,
        archived: bool,
    ) -> WorkflowResult<Proposal> {
        self.require(proposal_id, user_id, ProposalOperation::Archive).await?;

        let proposal = self
            .store
            .transaction(move |state| {
                let mut proposal = state.proposal(proposal_id)?.clone();
                proposal.archived = archived;
                state.put_proposal(proposal.clone());
                Ok(proposal)
            })
            .await?;

        tracing::info!(proposal = %proposal_id, archived, "updated archive flag");
        Ok(proposal)
    }

    // --- Pages -----------------------------------------------------------

    /// Create a page inheriting its parent's permissions
    ///
    /// # Errors
    /// Page tree errors; `InvalidState` if the invariant check fails
    pub async fn create_page(
        &self,
        page_id: PageId,
        parent_id: Option<PageId>,
        space_id: SpaceId,
    ) -> WorkflowResult<Vec<PermissionId>> {
        let verify = self.config.verify_inheritance;
        self.store
            .transaction(move |state| {
                let ids = state.pages.create_page(page_id, parent_id, space_id)?;
                check_pages(&state.pages, page_id, verify)?;
                Ok(ids)
            })
            .await
    }

    /// Move a page and rewire inherited permissions over its subtree
    ///
    /// The page rewrite and the whole descendant cascade commit together or
    /// not at all.
    ///
    /// # Errors
    /// `DataNotFound`, `InvalidInput` for cyclic or cross-space moves,
    /// `InvalidState` if the invariant check fails
    pub async fn reposition_page(
        &self,
        page_id: PageId,
        new_parent_id: Option<PageId>,
    ) -> WorkflowResult<RepositionReport> {
        let verify = self.config.verify_inheritance;
        self.store
            .transaction(move |state| {
                let report = state.pages.reposition_page(page_id, new_parent_id)?;
                check_pages(&state.pages, page_id, verify)?;
                Ok(report)
            })
            .await
    }

    /// Grant a local page permission and cascade it
    ///
    /// # Errors
    /// `DataNotFound`; `InvalidState` if the invariant check fails
    pub async fn grant_page_permission(
        &self,
        page_id: PageId,
        assignee: PageAssignee,
        level: PermissionLevel,
    ) -> WorkflowResult<PermissionId> {
        let verify = self.config.verify_inheritance;
        self.store
            .transaction(move |state| {
                let id = state.pages.grant_permission(page_id, assignee, level)?;
                check_pages(&state.pages, page_id, verify)?;
                Ok(id)
            })
            .await
    }

    /// Revoke a page permission and every copy derived from it
    ///
    /// # Errors
    /// `DataNotFound`; `InvalidState` if the invariant check fails
    pub async fn revoke_page_permission(
        &self,
        permission_id: PermissionId,
    ) -> WorkflowResult<Vec<PermissionId>> {
        let verify = self.config.verify_inheritance;
        self.store
            .transaction(move |state| {
                let page_id = state.pages.permission(permission_id).map(|p| p.page_id);
                let removed = state.pages.revoke_permission(permission_id)?;
                if let Some(page_id) = page_id {
                    check_pages(&state.pages, page_id, verify)?;
                }
                Ok(removed)
            })
            .await
    }
}
