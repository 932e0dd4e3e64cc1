//! Step permission computation
//!
//! The default policy that maps an actor and a proposal's current step to the
//! capability flags the engine checks before every operation.

use crate::ids::{RoleId, UserId};
use crate::model::{Assignee, Evaluation, Proposal, ProposalOperation, SystemRole};
use crate::sequencer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Capability flags for one user on one proposal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ProposalPermissionFlags {
    /// Read the proposal
    pub view: bool,
    /// Read reviewer-only fields
    pub view_private_fields: bool,
    /// Edit content and draft settings
    pub edit: bool,
    /// Comment
    pub comment: bool,
    /// Move between steps
    #[serde(rename = "move")]
    pub move_: bool,
    /// Submit reviews and rubric answers
    pub evaluate: bool,
    /// Archive or unarchive
    pub archive: bool,
    /// Delete
    pub delete: bool,
    /// Create a vote
    pub create_vote: bool,
}

impl ProposalPermissionFlags {
    /// No capabilities
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Every capability
    #[must_use]
    pub fn all() -> Self {
        let mut flags = Self::default();
        for op in ProposalOperation::ALL {
            flags.grant(op);
        }
        flags
    }

    /// Flags with exactly the given operations
    #[must_use]
    pub fn from_operations(ops: impl IntoIterator<Item = ProposalOperation>) -> Self {
        let mut flags = Self::default();
        for op in ops {
            flags.grant(op);
        }
        flags
    }

    fn slot(&mut self, op: ProposalOperation) -> &mut bool {
        match op {
            ProposalOperation::View => &mut self.view,
            ProposalOperation::ViewPrivateFields => &mut self.view_private_fields,
            ProposalOperation::Edit => &mut self.edit,
            ProposalOperation::Comment => &mut self.comment,
            ProposalOperation::Move => &mut self.move_,
            ProposalOperation::Evaluate => &mut self.evaluate,
            ProposalOperation::Archive => &mut self.archive,
            ProposalOperation::Delete => &mut self.delete,
            ProposalOperation::CreateVote => &mut self.create_vote,
        }
    }

    /// Add a capability
    #[inline]
    pub fn grant(&mut self, op: ProposalOperation) {
        *self.slot(op) = true;
    }

    /// Remove a capability
    #[inline]
    pub fn revoke(&mut self, op: ProposalOperation) {
        *self.slot(op) = false;
    }

    /// Check a capability
    #[must_use]
    pub fn has(&self, op: ProposalOperation) -> bool {
        match op {
            ProposalOperation::View => self.view,
            ProposalOperation::ViewPrivateFields => self.view_private_fields,
            ProposalOperation::Edit => self.edit,
            ProposalOperation::Comment => self.comment,
            ProposalOperation::Move => self.move_,
            ProposalOperation::Evaluate => self.evaluate,
            ProposalOperation::Archive => self.archive,
            ProposalOperation::Delete => self.delete,
            ProposalOperation::CreateVote => self.create_vote,
        }
    }
}

/// The user an operation is evaluated for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// User
    pub user_id: UserId,
    /// Roles held in the proposal's space
    pub role_ids: BTreeSet<RoleId>,
    /// Space administrator
    pub is_admin: bool,
    /// Member of the proposal's space
    pub is_space_member: bool,
}

impl Actor {
    /// Space member without roles
    #[must_use]
    pub fn member(user_id: UserId) -> Self {
        Self {
            user_id,
            role_ids: BTreeSet::new(),
            is_admin: false,
            is_space_member: true,
        }
    }

    /// With role
    #[inline]
    #[must_use]
    pub fn with_role(mut self, role: RoleId) -> Self {
        self.role_ids.insert(role);
        self
    }

    /// As space administrator
    #[inline]
    #[must_use]
    pub fn as_admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    /// Check if actor matches an assignee
    ///
    /// `current_reviewer` and `all_reviewers` are resolved by the caller since
    /// they depend on the step list.
    #[must_use]
    pub fn matches(&self, assignee: &Assignee, proposal: &Proposal) -> bool {
        match assignee {
            Assignee::User(id) => *id == self.user_id,
            Assignee::Role(id) => self.role_ids.contains(id),
            Assignee::System(SystemRole::Author) => proposal.is_author(self.user_id),
            Assignee::System(SystemRole::SpaceMember) => self.is_space_member,
            Assignee::System(SystemRole::AllReviewers | SystemRole::CurrentReviewer) => false,
        }
    }
}

fn is_reviewer_of(actor: &Actor, proposal: &Proposal, step: &Evaluation) -> bool {
    step.active_reviewers().iter().any(|r| actor.matches(r, proposal))
}

/// Capability flags for `actor` on `proposal`
///
/// Computed against the step the pointer rests on.
#[must_use]
pub fn compute_step_permissions(
    proposal: &Proposal,
    evaluations: &[Evaluation],
    actor: &Actor,
) -> ProposalPermissionFlags {
    let mut flags = ProposalPermissionFlags::none();
    let step = sequencer::position(evaluations).pointer();
    let is_current_reviewer = step.is_some_and(|s| is_reviewer_of(actor, proposal, s));
    let is_any_reviewer = evaluations.iter().any(|e| is_reviewer_of(actor, proposal, e));

    if actor.is_admin {
        flags = ProposalPermissionFlags::all();
        if !is_current_reviewer {
            flags.revoke(ProposalOperation::Evaluate);
        }
    }

    if proposal.is_author(actor.user_id) {
        for op in [
            ProposalOperation::View,
            ProposalOperation::ViewPrivateFields,
            ProposalOperation::Delete,
            ProposalOperation::CreateVote,
        ] {
            flags.grant(op);
        }
        if proposal.is_draft() {
            for op in [
                ProposalOperation::Edit,
                ProposalOperation::Comment,
                ProposalOperation::Move,
                ProposalOperation::Archive,
            ] {
                flags.grant(op);
            }
        }
    }

    if is_current_reviewer && !proposal.is_draft() {
        for op in [
            ProposalOperation::View,
            ProposalOperation::Comment,
            ProposalOperation::Evaluate,
            ProposalOperation::Move,
        ] {
            flags.grant(op);
        }
    }

    if let Some(step) = step {
        for grant in &step.permissions {
            let matched = match grant.assignee {
                Assignee::System(SystemRole::CurrentReviewer) => is_current_reviewer,
                Assignee::System(SystemRole::AllReviewers) => is_any_reviewer,
                other => actor.matches(&other, proposal),
            };
            if matched {
                flags.grant(grant.operation);
            }
        }
    }

    flags
}
