use evalflow_core::{PageId, SpaceId, UserId, WorkflowError};
use evalflow_engine::{
    MemoryStore, ProposalDraft, ProposalWorkflow, WorkflowConfig, WorkflowStore, WorkspaceState,
};
use evalflow_pages::{verify_inheritance, PageAssignee, PermissionLevel};
use evalflow_test_utils::{granted_root, page_chain, permissive_workflow, AllowAll};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn seeded(state: WorkspaceState) -> ProposalWorkflow<MemoryStore, AllowAll> {
    ProposalWorkflow::new(
        Arc::new(MemoryStore::with_state(state)),
        Arc::new(AllowAll),
        WorkflowConfig::default(),
    )
}

#[tokio::test]
async fn test_reposition_rewires_subtree_in_one_commit() {
    let space = SpaceId::new();
    let editor = UserId::new();
    let mut state = WorkspaceState::default();
    let old_root = granted_root(&mut state.pages, space, editor);
    let new_root = PageId::new();
    state.pages.create_page(new_root, None, space).unwrap();
    state
        .pages
        .grant_permission(new_root, PageAssignee::Public, PermissionLevel::View)
        .unwrap();

    let moved = PageId::new();
    state.pages.create_page(moved, Some(old_root), space).unwrap();
    let child = PageId::new();
    state.pages.create_page(child, Some(moved), space).unwrap();
    let grandchild = PageId::new();
    state.pages.create_page(grandchild, Some(child), space).unwrap();

    let before_child = state.pages.grants_of(child);
    let wf = seeded(state);
    let version = wf.store().version();

    let report = wf.reposition_page(moved, Some(new_root)).await.unwrap();
    assert!(report.moved);
    assert_eq!(report.descendants, 2);
    assert_eq!(wf.store().version(), version + 1);

    let state = wf.store().snapshot().await.unwrap();
    assert!(verify_inheritance(&state.pages).is_ok());
    assert_eq!(state.pages.grants_of(moved), state.pages.grants_of(new_root));
    // descendants keep exactly the access they had
    assert_eq!(state.pages.grants_of(child), before_child);
    assert_eq!(state.pages.grants_of(grandchild), before_child);
}

#[tokio::test]
async fn test_move_to_root_makes_rows_local() {
    let space = SpaceId::new();
    let mut state = WorkspaceState::default();
    let root = granted_root(&mut state.pages, space, UserId::new());
    let mut chain = vec![root];
    for _ in 0..3 {
        let id = PageId::new();
        state.pages.create_page(id, chain.last().copied(), space).unwrap();
        chain.push(id);
    }
    let (moved, below) = (chain[1], &chain[2..]);
    let wf = seeded(state);

    let report = wf.reposition_page(moved, None).await.unwrap();
    assert_eq!(report.localized, 2);
    assert_eq!(report.descendants, 2);

    let state = wf.store().snapshot().await.unwrap();
    let moved_rows: Vec<_> = state.pages.permissions_of(moved).iter().map(|p| p.id).collect();
    assert!(state.pages.permissions_of(moved).iter().all(|p| p.is_local()));
    // child and grandchild both point straight at the moved page's rows
    for page in below {
        let rows = state.pages.permissions_of(*page);
        assert_eq!(rows.len(), moved_rows.len());
        for row in rows {
            assert!(moved_rows.contains(&row.inherited_from.unwrap()));
        }
    }
}

#[tokio::test]
async fn test_rejected_move_leaves_state_untouched() {
    let space = SpaceId::new();
    let mut state = WorkspaceState::default();
    let pages = page_chain(&mut state.pages, space, 3);
    let wf = seeded(state);
    let before = wf.store().snapshot().await.unwrap();

    let err = wf.reposition_page(pages[0], Some(pages[2])).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidInput(_)));

    let err = wf.reposition_page(PageId::new(), None).await.unwrap_err();
    assert!(matches!(err, WorkflowError::DataNotFound { .. }));

    let other_space = PageId::new();
    wf.create_page(other_space, None, SpaceId::new()).await.unwrap();
    let mid = wf.store().snapshot().await.unwrap();
    let err = wf.reposition_page(pages[1], Some(other_space)).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidInput(_)));

    assert_eq!(wf.store().snapshot().await.unwrap(), mid);
    assert_eq!(before.pages.page_count() + 1, mid.pages.page_count());
}

#[tokio::test]
async fn test_grant_and_revoke_cascade_through_workflow() {
    let wf = permissive_workflow();
    let space = SpaceId::new();
    let (root, child) = (PageId::new(), PageId::new());
    wf.create_page(root, None, space).await.unwrap();
    wf.create_page(child, Some(root), space).await.unwrap();

    let granted = wf
        .grant_page_permission(root, PageAssignee::Space(space), PermissionLevel::ViewComment)
        .await
        .unwrap();
    let state = wf.store().snapshot().await.unwrap();
    assert_eq!(state.pages.permissions_of(child).len(), 1);
    assert_eq!(state.pages.permissions_of(child)[0].inherited_from, Some(granted));

    let removed = wf.revoke_page_permission(granted).await.unwrap();
    assert_eq!(removed.len(), 2);
    let state = wf.store().snapshot().await.unwrap();
    assert!(state.pages.permissions_of(child).is_empty());
    assert!(verify_inheritance(&state.pages).is_ok());
}

#[tokio::test]
async fn test_proposal_page_inherits_parent_permissions() {
    let wf = permissive_workflow();
    let space = SpaceId::new();
    let parent = PageId::new();
    wf.create_page(parent, None, space).await.unwrap();
    wf.grant_page_permission(parent, PageAssignee::Space(space), PermissionLevel::View)
        .await
        .unwrap();

    let draft = ProposalDraft::new(space, UserId::new()).under(parent);
    let proposal = wf.create_proposal(draft).await.unwrap();

    let state = wf.store().snapshot().await.unwrap();
    assert_eq!(state.pages.page(proposal.page_id).unwrap().parent_id, Some(parent));
    assert_eq!(state.pages.grants_of(proposal.page_id), state.pages.grants_of(parent));
}
