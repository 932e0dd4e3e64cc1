//! Inheritance invariant checker
//!
//! A root page holds only local rows. Every inherited row references a row
//! that exists on a strict ancestor and grants the same assignee the same
//! level.

use crate::tree::PageTree;
use evalflow_core::{PageId, PermissionId};
use serde::Serialize;

/// One broken inheritance link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InheritanceViolation {
    /// Root page carries an inherited row
    #[error("root page {page} has inherited permission {permission}")]
    RootInherits {
        /// Offending page
        page: PageId,
        /// Offending row
        permission: PermissionId,
    },

    /// Referenced row does not exist
    #[error("permission {permission} on {page} references missing row {reference}")]
    DanglingReference {
        /// Offending page
        page: PageId,
        /// Offending row
        permission: PermissionId,
        /// Missing reference
        reference: PermissionId,
    },

    /// Referenced row is not on a strict ancestor
    #[error("permission {permission} on {page} references {reference} on non-ancestor {owner}")]
    NotAncestor {
        /// Offending page
        page: PageId,
        /// Offending row
        permission: PermissionId,
        /// Referenced row
        reference: PermissionId,
        /// Page holding the referenced row
        owner: PageId,
    },

    /// Referenced row grants something else
    #[error("permission {permission} on {page} differs from its source {reference}")]
    GrantMismatch {
        /// Offending page
        page: PageId,
        /// Offending row
        permission: PermissionId,
        /// Referenced row
        reference: PermissionId,
    },

    /// Page points at a parent that does not exist
    #[error("page {page} has missing parent {parent}")]
    MissingParent {
        /// Offending page
        page: PageId,
        /// Missing parent
        parent: PageId,
    },
}

/// Check the inheritance invariant over the whole tree
///
/// Violations are reported in page id order.
///
/// # Errors
/// Every violation found
pub fn verify_inheritance(tree: &PageTree) -> Result<(), Vec<InheritanceViolation>> {
    let mut pages: Vec<_> = tree.pages().map(|p| p.id).collect();
    pages.sort();
    check_pages(tree, pages)
}

/// Check the inheritance invariant on `root` and everything below it
///
/// A move, grant or revoke only touches rows in the subtree of the page it
/// targets, so this is enough after any single mutation. An unknown `root`
/// has nothing to check.
///
/// # Errors
/// Every violation found, in page id order
pub fn verify_subtree(tree: &PageTree, root: PageId) -> Result<(), Vec<InheritanceViolation>> {
    if !tree.contains(root) {
        return Ok(());
    }
    let mut pages = tree.descendants(root);
    pages.push(root);
    pages.sort();
    check_pages(tree, pages)
}

fn check_pages(tree: &PageTree, pages: Vec<PageId>) -> Result<(), Vec<InheritanceViolation>> {
    let mut violations = Vec::new();
    for id in pages {
        check_page(tree, id, &mut violations);
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn check_page(tree: &PageTree, id: PageId, violations: &mut Vec<InheritanceViolation>) {
    let Some(node) = tree.page(id) else {
        return;
    };
    if let Some(parent) = node.parent_id {
        if !tree.contains(parent) {
            violations.push(InheritanceViolation::MissingParent { page: id, parent });
        }
    }

    let ancestors = tree.ancestors(id);
    for row in tree.permissions_of(id) {
        let Some(reference) = row.inherited_from else {
            continue;
        };
        if node.parent_id.is_none() {
            violations.push(InheritanceViolation::RootInherits {
                page: id,
                permission: row.id,
            });
            continue;
        }
        let Some(source) = tree.permission(reference) else {
            violations.push(InheritanceViolation::DanglingReference {
                page: id,
                permission: row.id,
                reference,
            });
            continue;
        };
        if !ancestors.contains(&source.page_id) {
            violations.push(InheritanceViolation::NotAncestor {
                page: id,
                permission: row.id,
                reference,
                owner: source.page_id,
            });
        } else if !source.same_grant(row) {
            violations.push(InheritanceViolation::GrantMismatch {
                page: id,
                permission: row.id,
                reference,
            });
        }
    }
}
