//! Permission collaborator
//!
//! The engine asks a [`PermissionService`] for capability flags before every
//! mutating operation and treats the answer as authoritative.

use crate::store::WorkflowStore;
use async_trait::async_trait;
use evalflow_core::{
    compute_step_permissions, Actor, ProposalId, ProposalPermissionFlags, SpaceId, UserId,
    WorkflowResult,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Computes a user's capabilities on a proposal
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionService: Send + Sync {
    /// Capability flags for `user_id` on `proposal_id`
    async fn flags(
        &self,
        proposal_id: ProposalId,
        user_id: UserId,
    ) -> WorkflowResult<ProposalPermissionFlags>;
}

/// Resolves space membership, roles and admin status
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    /// The actor for `user_id` within `space_id`
    async fn actor(&self, space_id: SpaceId, user_id: UserId) -> WorkflowResult<Actor>;
}

/// Directory backed by an in-memory membership table
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    members: RwLock<HashMap<(SpaceId, UserId), Actor>>,
}

impl MemoryDirectory {
    /// Create an empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a member of a space
    pub fn insert(&self, space_id: SpaceId, actor: Actor) {
        self.members.write().insert((space_id, actor.user_id), actor);
    }

    /// Remove a member, returning whether one existed
    pub fn remove(&self, space_id: SpaceId, user_id: UserId) -> bool {
        self.members.write().remove(&(space_id, user_id)).is_some()
    }
}

#[async_trait]
impl ActorDirectory for MemoryDirectory {
    async fn actor(&self, space_id: SpaceId, user_id: UserId) -> WorkflowResult<Actor> {
        let known = self.members.read().get(&(space_id, user_id)).cloned();
        Ok(known.unwrap_or_else(|| Actor {
            is_space_member: false,
            ..Actor::member(user_id)
        }))
    }
}

/// Default permission service: step-aware flags computed from stored rows
pub struct StepPermissionService<S, D> {
    store: Arc<S>,
    directory: Arc<D>,
}

impl<S, D> StepPermissionService<S, D> {
    /// Create a service reading from `store`
    #[must_use]
    pub fn new(store: Arc<S>, directory: Arc<D>) -> Self {
        Self { store, directory }
    }
}

#[async_trait]
impl<S, D> PermissionService for StepPermissionService<S, D>
where
    S: WorkflowStore,
    D: ActorDirectory,
{
    async fn flags(
        &self,
        proposal_id: ProposalId,
        user_id: UserId,
    ) -> WorkflowResult<ProposalPermissionFlags> {
        let state = self.store.snapshot().await?;
        let proposal = state.proposal(proposal_id)?;
        let actor = self.directory.actor(proposal.space_id, user_id).await?;
        let evaluations = state.evaluations_of(proposal_id);
        Ok(compute_step_permissions(proposal, &evaluations, &actor))
    }
}
