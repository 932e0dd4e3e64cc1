//! Transactional workspace store
//!
//! [`WorkspaceState`] holds every row the engine reads or writes, in
//! persistent `im` maps so a clone is a cheap structural copy.
//! [`MemoryStore`] runs each transaction against such a copy and publishes
//! it only when the closure succeeds, so a failure at any point leaves the
//! committed state exactly as it was.

use async_trait::async_trait;
use evalflow_core::{
    sequencer, CriterionId, DraftRubricAnswer, EntityKind, Evaluation, EvaluationId,
    PassFailReview, Proposal, ProposalId, RubricAnswer, RubricCriterion, UserId, WorkflowError,
    WorkflowResult,
};
use evalflow_pages::PageTree;
use im::{HashMap, Vector};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Every persisted row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceState {
    /// Proposals by id
    pub proposals: HashMap<ProposalId, Proposal>,
    /// Evaluation steps by id
    pub evaluations: HashMap<EvaluationId, Evaluation>,
    /// Step ids per proposal
    pub steps: HashMap<ProposalId, Vector<EvaluationId>>,
    /// Rubric criteria per step
    pub criteria: HashMap<EvaluationId, Vector<RubricCriterion>>,
    /// Finalized rubric answers per step
    pub answers: HashMap<EvaluationId, Vector<RubricAnswer>>,
    /// Draft rubric answers per step
    pub drafts: HashMap<EvaluationId, Vector<DraftRubricAnswer>>,
    /// Pass/fail reviews per step
    pub reviews: HashMap<EvaluationId, Vector<PassFailReview>>,
    /// Page tree and page permissions
    pub pages: PageTree,
}

impl WorkspaceState {
    /// Look up a proposal
    ///
    /// # Errors
    /// `DataNotFound`
    pub fn proposal(&self, id: ProposalId) -> WorkflowResult<&Proposal> {
        self.proposals
            .get(&id)
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Proposal, id))
    }

    /// Look up an evaluation step
    ///
    /// # Errors
    /// `DataNotFound`
    pub fn evaluation(&self, id: EvaluationId) -> WorkflowResult<&Evaluation> {
        self.evaluations
            .get(&id)
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Evaluation, id))
    }

    /// A proposal's steps, ordered by index
    #[must_use]
    pub fn evaluations_of(&self, proposal: ProposalId) -> Vec<Evaluation> {
        let mut steps: Vec<Evaluation> = self
            .steps
            .get(&proposal)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.evaluations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        steps.sort_by_key(|e| e.index);
        steps
    }

    /// The step the proposal's pointer rests on
    #[must_use]
    pub fn current_evaluation(&self, proposal: ProposalId) -> Option<Evaluation> {
        sequencer::current_evaluation(&self.evaluations_of(proposal)).cloned()
    }

    /// Criteria of a rubric step
    #[must_use]
    pub fn criteria_of(&self, evaluation: EvaluationId) -> Vec<RubricCriterion> {
        self.criteria
            .get(&evaluation)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Look up one criterion of a step
    #[must_use]
    pub fn criterion(&self, evaluation: EvaluationId, id: CriterionId) -> Option<&RubricCriterion> {
        self.criteria
            .get(&evaluation)
            .and_then(|c| c.iter().find(|c| c.id == id))
    }

    /// Finalized answers of a step
    #[must_use]
    pub fn answers_of(&self, evaluation: EvaluationId) -> Vec<RubricAnswer> {
        self.answers
            .get(&evaluation)
            .map(|a| a.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Draft answers of one reviewer
    #[must_use]
    pub fn drafts_of(&self, evaluation: EvaluationId, user: UserId) -> Vec<DraftRubricAnswer> {
        self.drafts
            .get(&evaluation)
            .map(|d| d.iter().filter(|a| a.user_id == user).cloned().collect())
            .unwrap_or_default()
    }

    /// Pass/fail reviews of a step
    #[must_use]
    pub fn reviews_of(&self, evaluation: EvaluationId) -> Vec<PassFailReview> {
        self.reviews
            .get(&evaluation)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Insert or replace a proposal
    pub fn put_proposal(&mut self, proposal: Proposal) {
        self.steps.entry(proposal.id).or_default();
        self.proposals.insert(proposal.id, proposal);
    }

    /// Insert or replace a step, indexing it under its proposal
    pub fn put_evaluation(&mut self, evaluation: Evaluation) {
        let ids = self.steps.entry(evaluation.proposal_id).or_default();
        if !ids.contains(&evaluation.id) {
            ids.push_back(evaluation.id);
        }
        self.evaluations.insert(evaluation.id, evaluation);
    }

    /// Mutate a stored step in place
    ///
    /// # Errors
    /// `DataNotFound`
    pub fn update_evaluation<F>(&mut self, id: EvaluationId, f: F) -> WorkflowResult<()>
    where
        F: FnOnce(&mut Evaluation),
    {
        let evaluation = self
            .evaluations
            .get_mut(&id)
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Evaluation, id))?;
        f(evaluation);
        Ok(())
    }

    /// Replace a step's criteria
    pub fn put_criteria(&mut self, evaluation: EvaluationId, criteria: Vec<RubricCriterion>) {
        self.criteria.insert(evaluation, criteria.into_iter().collect());
    }

    /// Replace one reviewer's finalized answers
    pub fn replace_answers(&mut self, evaluation: EvaluationId, user: UserId, answers: Vec<RubricAnswer>) {
        let slot = self.answers.entry(evaluation).or_default();
        slot.retain(|a| a.user_id != user);
        slot.extend(answers);
    }

    /// Insert or replace drafts, keyed by criterion
    pub fn upsert_drafts(&mut self, evaluation: EvaluationId, user: UserId, drafts: Vec<DraftRubricAnswer>) {
        let slot = self.drafts.entry(evaluation).or_default();
        for draft in drafts {
            slot.retain(|d| !(d.user_id == user && d.criterion_id == draft.criterion_id));
            slot.push_back(draft);
        }
    }

    /// Delete one reviewer's drafts, returning how many were removed
    pub fn clear_drafts(&mut self, evaluation: EvaluationId, user: UserId) -> usize {
        let Some(slot) = self.drafts.get_mut(&evaluation) else {
            return 0;
        };
        let before = slot.len();
        slot.retain(|d| d.user_id != user);
        before - slot.len()
    }

    /// Insert or replace one reviewer's pass/fail review in its round
    pub fn put_review(&mut self, review: PassFailReview) {
        let slot = self.reviews.entry(review.evaluation_id).or_default();
        slot.retain(|r| r.reviewer_id != review.reviewer_id || r.appeal != review.appeal);
        slot.push_back(review);
    }

    /// Delete one reviewer's review from the original or appeal round,
    /// returning whether one existed
    pub fn remove_review(&mut self, evaluation: EvaluationId, reviewer: UserId, appeal: bool) -> bool {
        let Some(slot) = self.reviews.get_mut(&evaluation) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|r| r.reviewer_id != reviewer || r.appeal != appeal);
        before != slot.len()
    }

    /// Load a JSON snapshot
    ///
    /// # Errors
    /// `Store` when the file cannot be read or parsed
    pub fn from_json_file(path: impl AsRef<Path>) -> WorkflowResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| WorkflowError::Store(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| WorkflowError::Store(format!("parsing {}: {e}", path.display())))
    }

    /// Serialize as pretty JSON
    ///
    /// # Errors
    /// `Store` if serialization fails
    pub fn to_json(&self) -> WorkflowResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| WorkflowError::Store(e.to_string()))
    }
}

/// Transactional persistence collaborator
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Consistent read-only view of the committed state
    async fn snapshot(&self) -> WorkflowResult<WorkspaceState>;

    /// Run `f` atomically
    ///
    /// Writers are serialized. Changes made by `f` become visible only when it
    /// returns `Ok`; on `Err` nothing is published.
    async fn transaction<T, F>(&self, f: F) -> WorkflowResult<T>
    where
        T: Send,
        F: FnOnce(&mut WorkspaceState) -> WorkflowResult<T> + Send;
}

/// In-memory store with copy-on-write transactions
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: RwLock<WorkspaceState>,
    writer: tokio::sync::Mutex<()>,
    version: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `state`
    #[must_use]
    pub fn with_state(state: WorkspaceState) -> Self {
        Self {
            committed: RwLock::new(state),
            ..Self::default()
        }
    }

    /// Number of committed transactions
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn snapshot(&self) -> WorkflowResult<WorkspaceState> {
        Ok(self.committed.read().clone())
    }

    async fn transaction<T, F>(&self, f: F) -> WorkflowResult<T>
    where
        T: Send,
        F: FnOnce(&mut WorkspaceState) -> WorkflowResult<T> + Send,
    {
        let _writer = self.writer.lock().await;
        let mut draft = self.committed.read().clone();

        match f(&mut draft) {
            Ok(out) => {
                *self.committed.write() = draft;
                let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::trace!(version, "committed transaction");
                Ok(out)
            }
            Err(err) => {
                tracing::debug!(error = %err, "rolled back transaction");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalflow_core::{EvaluationResult, EvaluationType, PageId, SpaceId};

    fn proposal() -> Proposal {
        Proposal::new(SpaceId::new(), PageId::new(), UserId::new())
    }

    #[tokio::test]
    async fn failed_transaction_publishes_nothing() {
        let store = MemoryStore::new();
        let p = proposal();
        let id = p.id;

        let result: WorkflowResult<()> = store
            .transaction(move |state| {
                state.put_proposal(p);
                Err(WorkflowError::InvalidState("abort".into()))
            })
            .await;

        assert!(result.is_err());
        assert!(store.snapshot().await.unwrap().proposal(id).is_err());
        assert_eq!(store.version(), 0);
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = MemoryStore::new();
        let p = proposal();
        let id = p.id;
        store
            .transaction(move |state| {
                state.put_proposal(p);
                Ok(())
            })
            .await
            .unwrap();

        assert!(store.snapshot().await.unwrap().proposal(id).is_ok());
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn evaluations_of_orders_by_index() {
        let mut state = WorkspaceState::default();
        let p = proposal();
        let pid = p.id;
        state.put_proposal(p);
        state.put_evaluation(Evaluation::new(pid, 1, EvaluationType::Vote, "Vote"));
        state.put_evaluation(Evaluation::new(pid, 0, EvaluationType::Feedback, "Feedback"));

        let steps = state.evaluations_of(pid);
        assert_eq!(steps.iter().map(|e| e.index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(state.current_evaluation(pid).unwrap().index, 0);
    }

    #[test]
    fn replace_answers_only_touches_one_reviewer() {
        let mut state = WorkspaceState::default();
        let eval = EvaluationId::new();
        let criterion = CriterionId::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        let answer = |user, score| RubricAnswer {
            evaluation_id: eval,
            criterion_id: criterion,
            user_id: user,
            score,
            comment: None,
        };

        state.replace_answers(eval, alice, vec![answer(alice, 1.0)]);
        state.replace_answers(eval, bob, vec![answer(bob, 2.0)]);
        state.replace_answers(eval, alice, vec![answer(alice, 3.0)]);

        let scores: Vec<f64> = state.answers_of(eval).iter().map(|a| a.score).collect();
        assert_eq!(scores, vec![2.0, 3.0]);
    }

    #[test]
    fn appeal_review_does_not_replace_original() {
        let mut state = WorkspaceState::default();
        let eval = EvaluationId::new();
        let reviewer = UserId::new();
        let review = |appeal| PassFailReview {
            evaluation_id: eval,
            reviewer_id: reviewer,
            result: EvaluationResult::Fail,
            decline_reason: None,
            appeal,
            completed_at: chrono::Utc::now(),
        };

        state.put_review(review(false));
        state.put_review(review(true));
        assert_eq!(state.reviews_of(eval).len(), 2);

        assert!(state.remove_review(eval, reviewer, true));
        assert!(!state.remove_review(eval, reviewer, true));
        assert_eq!(state.reviews_of(eval).len(), 1);
        assert!(!state.reviews_of(eval)[0].appeal);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut state = WorkspaceState::default();
        let p = proposal();
        let pid = p.id;
        state.put_proposal(p);
        state.put_evaluation(Evaluation::new(pid, 0, EvaluationType::Feedback, "Feedback"));

        let json = state.to_json().unwrap();
        let back: WorkspaceState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
