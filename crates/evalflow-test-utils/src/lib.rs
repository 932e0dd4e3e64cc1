//! Testing utilities for evalflow workspace
//!
//! Shared fixtures: permission stubs, a seeded workflow harness, and page
//! tree builders.

#![allow(missing_docs)]

use async_trait::async_trait;
use evalflow_core::{
    Actor, Assignee, Evaluation, EvaluationType, PageId, Proposal, ProposalId, ProposalOperation,
    ProposalPermissionFlags, SpaceId, SystemRole, UserId, WorkflowResult,
};
use evalflow_engine::{
    MemoryDirectory, MemoryStore, PermissionService, ProposalDraft, ProposalWorkflow, StepDraft,
    StepPermissionService, WorkflowConfig, WorkflowStore,
};
use evalflow_pages::{PageAssignee, PageTree, PermissionLevel};
use std::collections::HashMap;
use std::sync::Arc;

/// Grants every capability to everyone
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl PermissionService for AllowAll {
    async fn flags(&self, _: ProposalId, _: UserId) -> WorkflowResult<ProposalPermissionFlags> {
        Ok(ProposalPermissionFlags::all())
    }
}

/// Fixed flags per user; unknown users get none
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    flags: HashMap<UserId, ProposalPermissionFlags>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, user: UserId, flags: ProposalPermissionFlags) -> Self {
        self.flags.insert(user, flags);
        self
    }
}

#[async_trait]
impl PermissionService for StaticPermissions {
    async fn flags(&self, _: ProposalId, user_id: UserId) -> WorkflowResult<ProposalPermissionFlags> {
        Ok(self.flags.get(&user_id).copied().unwrap_or_else(ProposalPermissionFlags::none))
    }
}

pub type StepWorkflow = ProposalWorkflow<MemoryStore, StepPermissionService<MemoryStore, MemoryDirectory>>;

/// A workflow backed by real step permissions, with an author and two
/// reviewers registered as space members
pub struct Harness {
    pub workflow: StepWorkflow,
    pub store: Arc<MemoryStore>,
    pub directory: Arc<MemoryDirectory>,
    pub space: SpaceId,
    pub author: UserId,
    pub reviewers: [UserId; 2],
    pub admin: UserId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(WorkflowConfig::default())
    }

    pub fn with_config(config: WorkflowConfig) -> Self {
        let space = SpaceId::new();
        let author = UserId::new();
        let reviewers = [UserId::new(), UserId::new()];
        let admin = UserId::new();

        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        directory.insert(space, Actor::member(author));
        for reviewer in reviewers {
            directory.insert(space, Actor::member(reviewer));
        }
        directory.insert(space, Actor::member(admin).as_admin());

        let permissions = Arc::new(StepPermissionService::new(Arc::clone(&store), Arc::clone(&directory)));
        let workflow = ProposalWorkflow::new(Arc::clone(&store), permissions, config);

        Self {
            workflow,
            store,
            directory,
            space,
            author,
            reviewers,
            admin,
        }
    }

    fn reviewer_set(&self, step: StepDraft) -> StepDraft {
        self.reviewers
            .iter()
            .fold(step, |step, r| step.with_reviewer(Assignee::User(*r)))
    }

    /// Feedback (authors may move it), pass/fail, rubric (two 1-5
    /// criteria), vote
    pub fn four_step_draft(&self) -> ProposalDraft {
        ProposalDraft::new(self.space, self.author)
            .with_step(
                StepDraft::new(EvaluationType::Feedback, "Feedback")
                    .with_grant(Assignee::System(SystemRole::Author), ProposalOperation::Move),
            )
            .with_step(self.reviewer_set(StepDraft::new(EvaluationType::PassFail, "Review")))
            .with_step(self.reviewer_set(
                StepDraft::new(EvaluationType::Rubric, "Score")
                    .with_criterion("Impact", 1.0, 5.0)
                    .with_criterion("Feasibility", 1.0, 5.0),
            ))
            .with_step(self.reviewer_set(StepDraft::new(EvaluationType::Vote, "Vote")))
    }

    /// Create and publish the four-step proposal
    pub async fn four_step_proposal(&self) -> (Proposal, Vec<Evaluation>) {
        let proposal = self.workflow.create_proposal(self.four_step_draft()).await.unwrap();
        let proposal = self.workflow.publish(proposal.id, self.author).await.unwrap();
        let steps = self.steps(proposal.id).await;
        (proposal, steps)
    }

    /// Current rows of a proposal's steps, in order
    pub async fn steps(&self, proposal: ProposalId) -> Vec<Evaluation> {
        self.store.snapshot().await.unwrap().evaluations_of(proposal)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Workflow where every caller may do everything
pub fn permissive_workflow() -> ProposalWorkflow<MemoryStore, AllowAll> {
    ProposalWorkflow::new(
        Arc::new(MemoryStore::new()),
        Arc::new(AllowAll),
        WorkflowConfig::default(),
    )
}

/// Build a chain of `depth` pages, each the child of the previous
pub fn page_chain(tree: &mut PageTree, space: SpaceId, depth: usize) -> Vec<PageId> {
    let mut ids: Vec<PageId> = Vec::with_capacity(depth);
    for _ in 0..depth {
        let id = PageId::new();
        tree.create_page(id, ids.last().copied(), space).unwrap();
        ids.push(id);
    }
    ids
}

/// Root page with a space-wide view grant and a user editor grant
pub fn granted_root(tree: &mut PageTree, space: SpaceId, editor: UserId) -> PageId {
    let root = PageId::new();
    tree.create_page(root, None, space).unwrap();
    tree.grant_permission(root, PageAssignee::Space(space), PermissionLevel::View)
        .unwrap();
    tree.grant_permission(root, PageAssignee::User(editor), PermissionLevel::Editor)
        .unwrap();
    root
}
