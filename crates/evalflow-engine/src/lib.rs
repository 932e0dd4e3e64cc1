//! evalflow engine - transactional proposal evaluation service
//!
//! Wires the pure core and page tree into an async service:
//! - [`ProposalWorkflow`] runs every workflow operation as one transaction
//! - [`WorkflowStore`] is the persistence seam, [`MemoryStore`] the
//!   in-process implementation
//! - [`PermissionService`] supplies capability flags per proposal and user
//! - [`WorkflowConfig`] selects the rubric policy and logging setup
//!
//! # Example
//!
//! ```rust
//! use evalflow_engine::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(MemoryStore::new());
//! let directory = Arc::new(MemoryDirectory::new());
//! let permissions = Arc::new(StepPermissionService::new(Arc::clone(&store), directory));
//! let workflow = ProposalWorkflow::new(store, permissions, WorkflowConfig::default());
//!
//! let draft = ProposalDraft::new(SpaceId::new(), UserId::new())
//!     .with_step(StepDraft::new(EvaluationType::Feedback, "Feedback"));
//! let proposal = workflow.create_proposal(draft).await.unwrap();
//! let current = workflow.current_evaluation(proposal.id).await.unwrap();
//! assert_eq!(current.map(|e| e.index), Some(0));
//! # }
//! ```

pub mod access;
pub mod config;
pub mod store;
pub mod telemetry;
pub mod workflow;

pub use access::{ActorDirectory, MemoryDirectory, PermissionService, StepPermissionService};
pub use config::{ConfigError, LogFormat, RubricPolicyConfig, WorkflowConfig, LOG_ENV};
pub use store::{MemoryStore, WorkflowStore, WorkspaceState};
pub use telemetry::init_tracing;
pub use workflow::{
    Advanced, CriterionDraft, EvaluationSettings, ProposalDraft, ProposalPosition,
    ProposalWorkflow, RubricResults, StepDraft,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the workflow engine
    pub use crate::{
        Advanced, MemoryDirectory, MemoryStore, PermissionService, ProposalDraft,
        ProposalWorkflow, StepDraft, StepPermissionService, WorkflowConfig, WorkflowStore,
    };
    pub use evalflow_core::prelude::*;
    pub use evalflow_pages::{PageAssignee, PermissionLevel};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
