//! Page permission rows

use evalflow_core::{PageId, PermissionId, RoleId, SpaceId, UserId};
use serde::{Deserialize, Serialize};

/// Access level a page permission grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// Everything including sharing
    FullAccess,
    /// Edit content
    Editor,
    /// Read and comment
    ViewComment,
    /// Read only
    View,
    /// Operation-level custom grant
    Custom,
}

/// Who a page permission is granted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "group", content = "id", rename_all = "snake_case")]
pub enum PageAssignee {
    /// A single user
    User(UserId),
    /// Holders of a role
    Role(RoleId),
    /// Every member of a space
    Space(SpaceId),
    /// Anyone with the link
    Public,
}

/// One permission row on a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagePermission {
    /// Row identifier
    pub id: PermissionId,
    /// Page the row belongs to
    pub page_id: PageId,
    /// Grantee
    pub assignee: PageAssignee,
    /// Granted level
    pub level: PermissionLevel,
    /// Ancestor row this one was copied from; `None` for local rows
    pub inherited_from: Option<PermissionId>,
}

impl PagePermission {
    /// Create a local row
    #[must_use]
    pub fn local(page_id: PageId, assignee: PageAssignee, level: PermissionLevel) -> Self {
        Self {
            id: PermissionId::new(),
            page_id,
            assignee,
            level,
            inherited_from: None,
        }
    }

    /// Create a row on `page_id` copied from `source`
    #[must_use]
    pub fn inherited(page_id: PageId, source: &PagePermission, reference: PermissionId) -> Self {
        Self {
            id: PermissionId::new(),
            page_id,
            assignee: source.assignee,
            level: source.level,
            inherited_from: Some(reference),
        }
    }

    /// Check if row is locally defined
    #[inline]
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.inherited_from.is_none()
    }

    /// Id descendants should reference when copying this row
    #[inline]
    #[must_use]
    pub fn source_id(&self) -> PermissionId {
        self.inherited_from.unwrap_or(self.id)
    }

    /// Check if two rows grant the same assignee the same level
    #[inline]
    #[must_use]
    pub fn same_grant(&self, other: &PagePermission) -> bool {
        self.assignee == other.assignee && self.level == other.level
    }
}
