//! evalflow pages - page tree and permission inheritance
//!
//! A page inherits every permission of its parent; each inherited row keeps a
//! back-reference to the ancestor row it derives from. When a page moves, the
//! rows on the page and on its whole subtree are rewired so that every
//! reference still points at a strict ancestor.
//!
//! # Example
//!
//! ```rust
//! use evalflow_core::{PageId, SpaceId};
//! use evalflow_pages::{verify_inheritance, PageAssignee, PageTree, PermissionLevel};
//!
//! let space = SpaceId::new();
//! let (root, child) = (PageId::new(), PageId::new());
//!
//! let mut tree = PageTree::new();
//! tree.create_page(root, None, space).unwrap();
//! tree.grant_permission(root, PageAssignee::Space(space), PermissionLevel::View).unwrap();
//! tree.create_page(child, Some(root), space).unwrap();
//!
//! tree.reposition_page(child, None).unwrap();
//! assert!(tree.permissions_of(child).iter().all(|p| p.is_local()));
//! assert!(verify_inheritance(&tree).is_ok());
//! ```

mod error;
mod permission;
mod tree;
mod verify;

pub use error::{PageResult, PageTreeError};
pub use permission::{PageAssignee, PagePermission, PermissionLevel};
pub use tree::{PageNode, PageTree, RepositionReport};
pub use verify::{verify_inheritance, verify_subtree, InheritanceViolation};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
