//! Page tree errors

use evalflow_core::{EntityKind, PageId, PermissionId, WorkflowError};

/// Errors raised by page tree operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageTreeError {
    /// Page does not exist
    #[error("page not found: {0}")]
    PageNotFound(PageId),

    /// Permission row does not exist
    #[error("page permission not found: {0}")]
    PermissionNotFound(PermissionId),

    /// A page with this id already exists
    #[error("page already exists: {0}")]
    PageExists(PageId),

    /// Move would make a page its own ancestor
    #[error("cannot move page {page} under {parent}: target is the page or one of its descendants")]
    CyclicMove {
        /// Page being moved
        page: PageId,
        /// Requested parent
        parent: PageId,
    },

    /// Parent lives in another space
    #[error("page {page} and parent {parent} belong to different spaces")]
    CrossSpace {
        /// Page being placed
        page: PageId,
        /// Requested parent
        parent: PageId,
    },

    /// Arena references are inconsistent
    #[error("page tree is corrupt: {0}")]
    Corrupt(String),
}

impl From<PageTreeError> for WorkflowError {
    fn from(err: PageTreeError) -> Self {
        match err {
            PageTreeError::PageNotFound(id) => WorkflowError::not_found(EntityKind::Page, id),
            PageTreeError::PermissionNotFound(id) => {
                WorkflowError::not_found(EntityKind::Permission, id)
            }
            PageTreeError::PageExists(_)
            | PageTreeError::CyclicMove { .. }
            | PageTreeError::CrossSpace { .. } => WorkflowError::InvalidInput(err.to_string()),
            PageTreeError::Corrupt(_) => WorkflowError::InvalidState(err.to_string()),
        }
    }
}

/// Result alias for page tree operations
pub type PageResult<T> = Result<T, PageTreeError>;
