//! Error types for the evaluation workflow
//!
//! Four domain kinds are raised by the core and propagated unmodified to the
//! API boundary:
//! - `NotPermitted`: caller lacks a capability
//! - `InvalidState`: the entity is in a state that disallows the operation
//! - `InvalidInput`: malformed or out-of-bounds input
//! - `DataNotFound`: a referenced entity does not exist
//!
//! `Store` and `Config` cover collaborator failures.

use std::fmt;

/// Main workflow error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    /// Caller lacks the capability required for the operation
    #[error("not permitted: {0}")]
    NotPermitted(String),

    /// Operation attempted against an entity whose state disallows it
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Input failed validation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Referenced entity does not exist
    #[error("{kind} not found: {id}")]
    DataNotFound {
        /// Kind of the missing entity
        kind: EntityKind,
        /// Identifier that was looked up
        id: String,
    },

    /// Persistence collaborator failure
    #[error("store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl WorkflowError {
    /// Create not-found error for an entity
    #[inline]
    pub fn not_found(kind: EntityKind, id: impl fmt::Display) -> Self {
        Self::DataNotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Create not-permitted error naming the missing capability
    #[inline]
    pub fn missing_capability(operation: impl fmt::Display, resource: impl fmt::Display) -> Self {
        Self::NotPermitted(format!("missing '{operation}' capability on {resource}"))
    }

    /// HTTP status the API boundary maps this error to
    #[inline]
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotPermitted(_) => 403,
            Self::InvalidState(_) | Self::InvalidInput(_) => 400,
            Self::DataNotFound { .. } => 404,
            Self::Store(_) | Self::Config(_) => 500,
        }
    }

    /// Check if error is retryable
    ///
    /// Domain errors are never transient.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Check if error is one of the four domain kinds
    #[inline]
    #[must_use]
    pub fn is_domain_error(&self) -> bool {
        !matches!(self, Self::Store(_) | Self::Config(_))
    }
}

/// Entity kinds used in not-found errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Proposal
    Proposal,
    /// Evaluation step
    Evaluation,
    /// Rubric criterion
    Criterion,
    /// Page
    Page,
    /// Page permission
    Permission,
    /// Platform user
    User,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Proposal => "proposal",
            Self::Evaluation => "evaluation",
            Self::Criterion => "rubric criterion",
            Self::Page => "page",
            Self::Permission => "page permission",
            Self::User => "user",
        };
        f.write_str(name)
    }
}

/// Result alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = WorkflowError::not_found(EntityKind::Criterion, "abc");
        assert_eq!(err.to_string(), "rubric criterion not found: abc");
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(WorkflowError::NotPermitted("x".into()).http_status(), 403);
        assert_eq!(WorkflowError::InvalidState("x".into()).http_status(), 400);
        assert_eq!(WorkflowError::InvalidInput("x".into()).http_status(), 400);
        assert_eq!(
            WorkflowError::not_found(EntityKind::Page, "p").http_status(),
            404
        );
        assert_eq!(WorkflowError::Store("x".into()).http_status(), 500);
    }

    #[test]
    fn domain_errors_are_not_retryable() {
        assert!(!WorkflowError::InvalidState("x".into()).is_retryable());
        assert!(!WorkflowError::NotPermitted("x".into()).is_retryable());
        assert!(WorkflowError::Store("busy".into()).is_retryable());
    }

    #[test]
    fn missing_capability_names_operation() {
        let err = WorkflowError::missing_capability("move", "proposal p1");
        assert!(err.to_string().contains("'move'"));
        assert!(err.is_domain_error());
    }
}
