//! Page tree arena
//!
//! Pages and permission rows live in id-keyed persistent maps. Cloning a
//! [`PageTree`] is cheap, which is what lets the engine mutate a private copy
//! inside a transaction and publish it only on success.
//!
//! Walks over the tree are iterative and carry a visited set, so a corrupt
//! parent chain can never loop forever.

use crate::error::{PageResult, PageTreeError};
use crate::permission::{PageAssignee, PagePermission, PermissionLevel};
use evalflow_core::{PageId, PermissionId, SpaceId};
use im::{HashMap, OrdSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};

/// A page and its links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageNode {
    /// Page identifier
    pub id: PageId,
    /// Owning space
    pub space_id: SpaceId,
    /// Parent page; `None` for a root page
    pub parent_id: Option<PageId>,
    /// Direct children
    pub children: OrdSet<PageId>,
    /// Permission rows on this page
    pub permissions: OrdSet<PermissionId>,
}

/// What a reposition changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositionReport {
    /// Moved page
    pub page_id: PageId,
    /// False when the page already had the requested parent
    pub moved: bool,
    /// Inherited rows turned local on the moved page
    pub localized: usize,
    /// Rows copied from the new parent onto the moved page
    pub replaced: usize,
    /// Descendant rows re-pointed at the moved page
    pub rewired: usize,
    /// Descendant rows with no surviving source, turned local
    pub detached: usize,
    /// Number of descendants walked
    pub descendants: usize,
}

impl RepositionReport {
    fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            moved: true,
            localized: 0,
            replaced: 0,
            rewired: 0,
            detached: 0,
            descendants: 0,
        }
    }

    fn unchanged(page_id: PageId) -> Self {
        Self {
            moved: false,
            ..Self::new(page_id)
        }
    }
}

/// Arena of pages and their permission rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTree {
    pub(crate) pages: HashMap<PageId, PageNode>,
    pub(crate) permissions: HashMap<PermissionId, PagePermission>,
}

impl PageTree {
    /// Create an empty tree
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a page
    #[inline]
    #[must_use]
    pub fn page(&self, id: PageId) -> Option<&PageNode> {
        self.pages.get(&id)
    }

    fn node(&self, id: PageId) -> PageResult<&PageNode> {
        self.pages.get(&id).ok_or(PageTreeError::PageNotFound(id))
    }

    /// Check if a page exists
    #[inline]
    #[must_use]
    pub fn contains(&self, id: PageId) -> bool {
        self.pages.contains_key(&id)
    }

    /// Number of pages
    #[inline]
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Iterate pages in arbitrary order
    pub fn pages(&self) -> impl Iterator<Item = &PageNode> {
        self.pages.values()
    }

    /// Look up a permission row
    #[inline]
    #[must_use]
    pub fn permission(&self, id: PermissionId) -> Option<&PagePermission> {
        self.permissions.get(&id)
    }

    /// Iterate every permission row in arbitrary order
    pub fn all_permissions(&self) -> impl Iterator<Item = &PagePermission> {
        self.permissions.values()
    }

    fn permission_ids_of(&self, page: PageId) -> Vec<PermissionId> {
        self.pages
            .get(&page)
            .map(|n| n.permissions.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Permission rows on a page, ordered by id
    #[must_use]
    pub fn permissions_of(&self, page: PageId) -> Vec<&PagePermission> {
        self.pages
            .get(&page)
            .map(|n| {
                n.permissions
                    .iter()
                    .filter_map(|id| self.permissions.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The (assignee, level) pairs granted on a page
    #[must_use]
    pub fn grants_of(&self, page: PageId) -> BTreeSet<(PageAssignee, PermissionLevel)> {
        self.permissions_of(page)
            .into_iter()
            .map(|p| (p.assignee, p.level))
            .collect()
    }

    /// Strict ancestors, nearest first
    #[must_use]
    pub fn ancestors(&self, page: PageId) -> Vec<PageId> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([page]);
        let mut cursor = self.pages.get(&page).and_then(|n| n.parent_id);
        while let Some(id) = cursor {
            if !seen.insert(id) {
                tracing::warn!(page = %page, at = %id, "cycle in parent chain");
                break;
            }
            out.push(id);
            cursor = self.pages.get(&id).and_then(|n| n.parent_id);
        }
        out
    }

    /// Every descendant in breadth-first order, excluding the page itself
    #[must_use]
    pub fn descendants(&self, page: PageId) -> Vec<PageId> {
        let mut out = Vec::new();
        let mut visited = HashSet::from([page]);
        let mut queue: VecDeque<PageId> = self
            .pages
            .get(&page)
            .map(|n| n.children.iter().copied().collect())
            .unwrap_or_default();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            out.push(id);
            if let Some(node) = self.pages.get(&id) {
                queue.extend(node.children.iter().copied());
            }
        }
        out
    }

    /// Check if `ancestor` is a strict ancestor of `page`
    #[must_use]
    pub fn is_strict_ancestor(&self, ancestor: PageId, page: PageId) -> bool {
        self.ancestors(page).contains(&ancestor)
    }

    fn insert_permission(&mut self, permission: PagePermission) -> PageResult<()> {
        let node = self.pages.get_mut(&permission.page_id).ok_or_else(|| {
            PageTreeError::Corrupt(format!(
                "permission {} targets missing page {}",
                permission.id, permission.page_id
            ))
        })?;
        node.permissions.insert(permission.id);
        self.permissions.insert(permission.id, permission);
        Ok(())
    }

    fn remove_permission(&mut self, id: PermissionId) -> Option<PagePermission> {
        let removed = self.permissions.remove(&id)?;
        if let Some(node) = self.pages.get_mut(&removed.page_id) {
            node.permissions.remove(&id);
        }
        Some(removed)
    }

    /// Create a page, copying every permission of its parent
    ///
    /// Copies reference the parent row's own source, so a grandchild points at
    /// the row that was originally granted.
    ///
    /// # Errors
    /// `PageExists`, `PageNotFound` for a missing parent, `CrossSpace`
    pub fn create_page(
        &mut self,
        page_id: PageId,
        parent_id: Option<PageId>,
        space_id: SpaceId,
    ) -> PageResult<Vec<PermissionId>> {
        if self.contains(page_id) {
            return Err(PageTreeError::PageExists(page_id));
        }

        let inherited: Vec<PagePermission> = match parent_id {
            Some(parent) => {
                if self.node(parent)?.space_id != space_id {
                    return Err(PageTreeError::CrossSpace {
                        page: page_id,
                        parent,
                    });
                }
                self.permissions_of(parent)
                    .into_iter()
                    .map(|p| PagePermission::inherited(page_id, p, p.source_id()))
                    .collect()
            }
            None => Vec::new(),
        };

        self.pages.insert(
            page_id,
            PageNode {
                id: page_id,
                space_id,
                parent_id,
                children: OrdSet::new(),
                permissions: OrdSet::new(),
            },
        );
        if let Some(parent) = parent_id {
            self.attach(page_id, parent)?;
        }

        let ids: Vec<PermissionId> = inherited.iter().map(|p| p.id).collect();
        for permission in inherited {
            self.insert_permission(permission)?;
        }

        tracing::debug!(page = %page_id, parent = ?parent_id, inherited = ids.len(), "created page");
        Ok(ids)
    }

    fn attach(&mut self, child: PageId, parent: PageId) -> PageResult<()> {
        let node = self
            .pages
            .get_mut(&parent)
            .ok_or(PageTreeError::PageNotFound(parent))?;
        node.children.insert(child);
        Ok(())
    }

    /// Move a page to a new parent, or to the root with `None`
    ///
    /// Moving to the root keeps every row on the page and turns inherited
    /// rows local. Moving under a parent replaces the page's rows with copies
    /// of the parent's rows. Afterwards every descendant row whose source is
    /// no longer on one of its strict ancestors is re-pointed at the moved
    /// page's row with the same assignee and level, or made local when there
    /// is none.
    ///
    /// # Errors
    /// - `PageNotFound` for a missing page or parent
    /// - `CyclicMove` when the parent is the page or one of its descendants
    /// - `CrossSpace` when the parent lives in another space
    pub fn reposition_page(
        &mut self,
        page_id: PageId,
        new_parent: Option<PageId>,
    ) -> PageResult<RepositionReport> {
        let node = self.node(page_id)?;
        let old_parent = node.parent_id;
        let space_id = node.space_id;

        if let Some(parent) = new_parent {
            let parent_node = self.node(parent)?;
            if parent == page_id || self.is_strict_ancestor(page_id, parent) {
                return Err(PageTreeError::CyclicMove {
                    page: page_id,
                    parent,
                });
            }
            if parent_node.space_id != space_id {
                return Err(PageTreeError::CrossSpace {
                    page: page_id,
                    parent,
                });
            }
        }

        if old_parent == new_parent {
            tracing::debug!(page = %page_id, "reposition to current parent is a no-op");
            return Ok(RepositionReport::unchanged(page_id));
        }

        if let Some(old) = old_parent {
            if let Some(old_node) = self.pages.get_mut(&old) {
                old_node.children.remove(&page_id);
            }
        }
        if let Some(parent) = new_parent {
            self.attach(page_id, parent)?;
        }
        if let Some(node) = self.pages.get_mut(&page_id) {
            node.parent_id = new_parent;
        }

        let mut report = RepositionReport::new(page_id);
        match new_parent {
            None => {
                for id in self.permission_ids_of(page_id) {
                    if let Some(row) = self.permissions.get_mut(&id) {
                        if row.inherited_from.take().is_some() {
                            report.localized += 1;
                        }
                    }
                }
            }
            Some(parent) => {
                let copies: Vec<PagePermission> = self
                    .permissions_of(parent)
                    .into_iter()
                    .map(|p| PagePermission::inherited(page_id, p, p.id))
                    .collect();
                for id in self.permission_ids_of(page_id) {
                    self.remove_permission(id);
                }
                report.replaced = copies.len();
                for copy in copies {
                    self.insert_permission(copy)?;
                }
            }
        }

        self.rewire_descendants(page_id, &mut report);

        tracing::info!(
            page = %page_id,
            from = ?old_parent,
            to = ?new_parent,
            localized = report.localized,
            replaced = report.replaced,
            rewired = report.rewired,
            detached = report.detached,
            descendants = report.descendants,
            "repositioned page"
        );
        Ok(report)
    }

    fn rewire_descendants(&mut self, page_id: PageId, report: &mut RepositionReport) {
        let moved_rows: Vec<PagePermission> =
            self.permissions_of(page_id).into_iter().cloned().collect();
        let descendants = self.descendants(page_id);
        report.descendants = descendants.len();

        for descendant in descendants {
            let ancestor_rows: HashSet<PermissionId> = self
                .ancestors(descendant)
                .iter()
                .filter_map(|a| self.pages.get(a))
                .flat_map(|n| n.permissions.iter().copied())
                .collect();

            for id in self.permission_ids_of(descendant) {
                let Some(row) = self.permissions.get(&id) else {
                    continue;
                };
                let Some(reference) = row.inherited_from else {
                    continue;
                };
                let still_valid = ancestor_rows.contains(&reference)
                    && self
                        .permissions
                        .get(&reference)
                        .is_some_and(|source| source.same_grant(row));
                if still_valid {
                    continue;
                }

                let replacement = moved_rows.iter().find(|m| m.same_grant(row)).map(|m| m.id);
                if replacement.is_some() {
                    report.rewired += 1;
                } else {
                    report.detached += 1;
                }
                if let Some(row) = self.permissions.get_mut(&id) {
                    row.inherited_from = replacement;
                }
            }
        }
    }

    /// Grant a local permission and push it down the subtree
    ///
    /// An existing row for the assignee is updated in place and becomes
    /// local. Descendants get their inherited copy updated or created; a
    /// descendant with a local row for the assignee keeps it and shields its
    /// own subtree.
    ///
    /// # Errors
    /// `PageNotFound`
    pub fn grant_permission(
        &mut self,
        page_id: PageId,
        assignee: PageAssignee,
        level: PermissionLevel,
    ) -> PageResult<PermissionId> {
        self.node(page_id)?;
        let existing = self
            .permissions_of(page_id)
            .into_iter()
            .find(|p| p.assignee == assignee)
            .map(|p| p.id);

        let id = match existing {
            Some(id) => {
                if let Some(row) = self.permissions.get_mut(&id) {
                    row.level = level;
                    row.inherited_from = None;
                }
                id
            }
            None => {
                let row = PagePermission::local(page_id, assignee, level);
                let id = row.id;
                self.insert_permission(row)?;
                id
            }
        };

        let updated = self.propagate_grant(page_id, id)?;
        tracing::debug!(page = %page_id, ?assignee, ?level, updated, "granted page permission");
        Ok(id)
    }

    fn propagate_grant(&mut self, page_id: PageId, row_id: PermissionId) -> PageResult<usize> {
        let source = self
            .permissions
            .get(&row_id)
            .cloned()
            .ok_or(PageTreeError::PermissionNotFound(row_id))?;

        let mut updated = 0;
        let mut visited = HashSet::from([page_id]);
        let mut queue: VecDeque<(PageId, PagePermission)> = self
            .pages
            .get(&page_id)
            .map(|n| n.children.iter().map(|c| (*c, source.clone())).collect())
            .unwrap_or_default();

        while let Some((page, parent_row)) = queue.pop_front() {
            if !visited.insert(page) {
                continue;
            }
            let existing = self
                .permissions_of(page)
                .into_iter()
                .find(|p| p.assignee == parent_row.assignee)
                .cloned();

            let row = match existing {
                Some(row) if row.is_local() => continue,
                Some(mut row) => {
                    row.level = parent_row.level;
                    row.inherited_from = Some(parent_row.source_id());
                    self.permissions.insert(row.id, row.clone());
                    row
                }
                None => {
                    let row = PagePermission::inherited(page, &parent_row, parent_row.source_id());
                    self.insert_permission(row.clone())?;
                    row
                }
            };
            updated += 1;

            if let Some(node) = self.pages.get(&page) {
                queue.extend(node.children.iter().map(|c| (*c, row.clone())));
            }
        }
        Ok(updated)
    }

    /// Delete a permission row and every copy derived from it in the subtree
    ///
    /// Returns the removed row ids, the revoked row first.
    ///
    /// # Errors
    /// `PermissionNotFound`
    pub fn revoke_permission(&mut self, permission_id: PermissionId) -> PageResult<Vec<PermissionId>> {
        let row = self
            .permissions
            .get(&permission_id)
            .cloned()
            .ok_or(PageTreeError::PermissionNotFound(permission_id))?;

        let mut doomed = HashSet::from([permission_id, row.source_id()]);
        let mut removed = vec![permission_id];

        for descendant in self.descendants(row.page_id) {
            for id in self.permission_ids_of(descendant) {
                let derived = self
                    .permissions
                    .get(&id)
                    .and_then(|p| p.inherited_from)
                    .is_some_and(|reference| doomed.contains(&reference));
                if derived {
                    doomed.insert(id);
                    removed.push(id);
                }
            }
        }

        for id in &removed {
            self.remove_permission(*id);
        }

        tracing::debug!(
            permission = %permission_id,
            page = %row.page_id,
            removed = removed.len(),
            "revoked page permission"
        );
        Ok(removed)
    }
}
