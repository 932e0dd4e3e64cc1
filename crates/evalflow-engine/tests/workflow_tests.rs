use evalflow_core::{
    AnswerInput, Assignee, Evaluation, EvaluationResult, EvaluationType, Proposal,
    ProposalOperation, ProposalPermissionFlags, SystemRole, UserId, WorkflowError,
};
use evalflow_engine::{
    Advanced, ProposalDraft, ProposalPosition, ProposalWorkflow, RubricPolicyConfig, StepDraft,
    WorkflowConfig, WorkflowStore,
};
use evalflow_test_utils::{permissive_workflow, Harness, StaticPermissions};
use pretty_assertions::assert_eq;
use std::sync::Arc;

/// Publish the four-step proposal and walk it to the rubric step
async fn at_rubric(h: &Harness) -> (Proposal, Vec<Evaluation>) {
    let (proposal, steps) = h.four_step_proposal().await;
    let [r0, _] = h.reviewers;

    h.workflow.advance(proposal.id, h.author, steps[0].id).await.unwrap();
    h.workflow
        .submit_pass_fail_review(steps[1].id, r0, EvaluationResult::Pass, None)
        .await
        .unwrap();
    h.workflow.advance(proposal.id, r0, steps[1].id).await.unwrap();
    (proposal, steps)
}

async fn criteria(h: &Harness, step: &Evaluation) -> Vec<evalflow_core::CriterionId> {
    h.store
        .snapshot()
        .await
        .unwrap()
        .criteria_of(step.id)
        .iter()
        .map(|c| c.id)
        .collect()
}

#[tokio::test]
async fn test_four_step_round_trip() {
    let h = Harness::new();
    let (proposal, steps) = at_rubric(&h).await;
    let [r0, r1] = h.reviewers;
    let ids = criteria(&h, &steps[2]).await;

    h.workflow
        .submit_rubric_answers(steps[2].id, r0, vec![AnswerInput::new(ids[0], 4.0), AnswerInput::new(ids[1], 5.0)])
        .await
        .unwrap();
    h.workflow
        .submit_rubric_answers(steps[2].id, r1, vec![AnswerInput::new(ids[0], 3.0), AnswerInput::new(ids[1], 4.0)])
        .await
        .unwrap();

    let results = h.workflow.aggregate_results(steps[2].id).await.unwrap();
    assert_eq!(results.aggregation.overall_average, Some(4.0));
    assert_eq!(results.overall_result, Some(EvaluationResult::Pass));

    assert_eq!(
        h.workflow.resolve_rubric(steps[2].id, r1).await.unwrap(),
        Some(EvaluationResult::Pass)
    );
    let next = h.workflow.advance(proposal.id, r1, steps[2].id).await.unwrap();
    assert_eq!(next.evaluation().map(|e| e.id), Some(steps[3].id));

    h.workflow.conclude_vote(steps[3].id, EvaluationResult::Pass).await.unwrap();
    let done = h.workflow.advance(proposal.id, r0, steps[3].id).await.unwrap();
    assert_eq!(done, Advanced::Completed);

    let position = h.workflow.position(proposal.id).await.unwrap();
    assert!(matches!(position, ProposalPosition::Resolved(ref e) if e.id == steps[3].id));
    assert!(h.workflow.can_go_back(proposal.id).await.unwrap());

    let reopened = h.workflow.go_back(proposal.id, r0).await.unwrap();
    assert_eq!(reopened.id, steps[2].id);

    let after = h.steps(proposal.id).await;
    assert!(after[0].is_resolved() && after[1].is_resolved());
    assert!(!after[2].is_resolved() && !after[3].is_resolved());
    assert_eq!(after[2].outcome, None);

    // answers survive reopening, so the rubric can be re-resolved as-is
    let again = h.workflow.aggregate_results(steps[2].id).await.unwrap();
    assert_eq!(again.aggregation.answer_count, 4);
}

#[tokio::test]
async fn test_duplicate_advance_does_not_skip_steps() {
    let h = Harness::new();
    let (proposal, steps) = h.four_step_proposal().await;

    let first = h.workflow.advance(proposal.id, h.author, steps[0].id).await.unwrap();
    let second = h.workflow.advance(proposal.id, h.author, steps[0].id).await.unwrap();

    assert_eq!(first.evaluation().map(|e| e.id), Some(steps[1].id));
    assert_eq!(second.evaluation().map(|e| e.id), Some(steps[1].id));
    let current = h.workflow.current_evaluation(proposal.id).await.unwrap().unwrap();
    assert_eq!(current.id, steps[1].id);
    assert!(!current.is_resolved());
}

#[tokio::test]
async fn test_concurrent_advance_commits_once() {
    let h = Harness::new();
    let (proposal, steps) = h.four_step_proposal().await;

    let (a, b) = tokio::join!(
        h.workflow.advance(proposal.id, h.author, steps[0].id),
        h.workflow.advance(proposal.id, h.author, steps[0].id),
    );
    assert_eq!(a.unwrap(), b.unwrap());

    let after = h.steps(proposal.id).await;
    assert_eq!(after[0].result, Some(EvaluationResult::Pass));
    assert_eq!(after[1].result, None);
}

#[tokio::test]
async fn test_advance_without_result_is_invalid_state() {
    let h = Harness::new();
    let (proposal, steps) = h.four_step_proposal().await;
    let [r0, _] = h.reviewers;
    h.workflow.advance(proposal.id, h.author, steps[0].id).await.unwrap();

    let err = h.workflow.advance(proposal.id, r0, steps[1].id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)));

    h.workflow
        .submit_pass_fail_review(steps[1].id, r0, EvaluationResult::Fail, None)
        .await
        .unwrap();
    let err = h.workflow.advance(proposal.id, r0, steps[1].id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)));
}

#[tokio::test]
async fn test_unreached_step_cannot_be_advanced() {
    let wf = permissive_workflow();
    let h = Harness::new();
    let proposal = wf.create_proposal(h.four_step_draft()).await.unwrap();
    wf.publish(proposal.id, h.author).await.unwrap();
    let steps = wf.store().snapshot().await.unwrap().evaluations_of(proposal.id);

    let err = wf.advance(proposal.id, h.author, steps[2].id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)));
}

#[tokio::test]
async fn test_go_back_discards_reviews_of_reopened_steps() {
    let h = Harness::new();
    let (proposal, steps) = at_rubric(&h).await;
    let [r0, _] = h.reviewers;

    let target = h.workflow.go_back(proposal.id, r0).await.unwrap();
    assert_eq!(target.id, steps[1].id);

    let state = h.store.snapshot().await.unwrap();
    assert!(state.reviews_of(steps[1].id).is_empty());
    assert_eq!(state.evaluation(steps[1].id).unwrap().outcome, None);

    // first step is still resolved, so one more go-back is possible
    assert!(h.workflow.can_go_back(proposal.id).await.unwrap());
}

#[tokio::test]
async fn test_go_back_at_first_step_is_invalid_state() {
    let h = Harness::new();
    let (proposal, _) = h.four_step_proposal().await;
    assert!(!h.workflow.can_go_back(proposal.id).await.unwrap());

    let err = h.workflow.go_back(proposal.id, h.admin).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)));
}

#[tokio::test]
async fn test_non_reviewer_cannot_evaluate() {
    let h = Harness::new();
    let (_, steps) = at_rubric(&h).await;
    let ids = criteria(&h, &steps[2]).await;

    let err = h
        .workflow
        .submit_rubric_answers(steps[2].id, h.author, vec![AnswerInput::new(ids[0], 3.0), AnswerInput::new(ids[1], 3.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotPermitted(_)));
    assert_eq!(err.http_status(), 403);
}

#[tokio::test]
async fn test_rubric_submission_is_all_or_nothing() {
    let h = Harness::new();
    let (_, steps) = at_rubric(&h).await;
    let [r0, _] = h.reviewers;
    let ids = criteria(&h, &steps[2]).await;

    h.workflow
        .save_draft_rubric_answers(steps[2].id, r0, vec![AnswerInput::new(ids[0], 2.0)])
        .await
        .unwrap();

    let err = h
        .workflow
        .submit_rubric_answers(steps[2].id, r0, vec![AnswerInput::new(ids[0], 4.0), AnswerInput::new(ids[1], 9.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidInput(_)));

    let state = h.store.snapshot().await.unwrap();
    assert!(state.answers_of(steps[2].id).is_empty());
    assert_eq!(state.drafts_of(steps[2].id, r0).len(), 1);

    let err = h
        .workflow
        .submit_rubric_answers(steps[2].id, r0, vec![AnswerInput::new(ids[0], 4.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidInput(_)));
}

#[tokio::test]
async fn test_drafts_are_excluded_from_aggregation() {
    let h = Harness::new();
    let (_, steps) = at_rubric(&h).await;
    let [r0, r1] = h.reviewers;
    let ids = criteria(&h, &steps[2]).await;

    h.workflow
        .submit_rubric_answers(steps[2].id, r0, vec![AnswerInput::new(ids[0], 2.0), AnswerInput::new(ids[1], 2.0)])
        .await
        .unwrap();
    h.workflow
        .save_draft_rubric_answers(steps[2].id, r1, vec![AnswerInput::new(ids[0], 5.0)])
        .await
        .unwrap();

    let results = h.workflow.aggregate_results(steps[2].id).await.unwrap();
    assert_eq!(results.aggregation.answer_count, 2);
    assert_eq!(results.aggregation.overall_average, Some(2.0));
    assert_eq!(results.overall_result, Some(EvaluationResult::Fail));

    assert_eq!(h.workflow.delete_draft_rubric_answers(steps[2].id, r1).await.unwrap(), 1);
}

#[tokio::test]
async fn test_resubmission_replaces_answers_and_clears_drafts() {
    let h = Harness::new();
    let (_, steps) = at_rubric(&h).await;
    let [r0, _] = h.reviewers;
    let ids = criteria(&h, &steps[2]).await;

    h.workflow
        .submit_rubric_answers(steps[2].id, r0, vec![AnswerInput::new(ids[0], 1.0), AnswerInput::new(ids[1], 1.0)])
        .await
        .unwrap();
    h.workflow
        .save_draft_rubric_answers(steps[2].id, r0, vec![AnswerInput::new(ids[1], 3.0)])
        .await
        .unwrap();
    h.workflow
        .submit_rubric_answers(
            steps[2].id,
            r0,
            vec![AnswerInput::new(ids[0], 5.0), AnswerInput::new(ids[1], 5.0).with_comment("Strong")],
        )
        .await
        .unwrap();

    let state = h.store.snapshot().await.unwrap();
    let answers = state.answers_of(steps[2].id);
    assert_eq!(answers.len(), 2);
    assert!(answers.iter().all(|a| a.score == 5.0));
    assert!(state.drafts_of(steps[2].id, r0).is_empty());
}

#[tokio::test]
async fn test_purged_reviewer_no_longer_counts() {
    let h = Harness::new();
    let (_, steps) = at_rubric(&h).await;
    let [r0, r1] = h.reviewers;
    let ids = criteria(&h, &steps[2]).await;

    for (reviewer, score) in [(r0, 5.0), (r1, 1.0)] {
        h.workflow
            .submit_rubric_answers(
                steps[2].id,
                reviewer,
                vec![AnswerInput::new(ids[0], score), AnswerInput::new(ids[1], score)],
            )
            .await
            .unwrap();
    }

    let removed = h.workflow.purge_reviewer_answers(steps[2].id, h.admin, r1).await.unwrap();
    assert_eq!(removed, 2);

    let results = h.workflow.aggregate_results(steps[2].id).await.unwrap();
    assert_eq!(results.aggregation.overall_average, Some(5.0));
    assert_eq!(results.aggregation.reviewers.len(), 1);
}

#[tokio::test]
async fn test_configured_policy_decides_rubric() {
    let config = WorkflowConfig::new().with_rubric_policy(RubricPolicyConfig::MeanAbove { threshold: 4.5 });
    let h = Harness::with_config(config);
    let (proposal, steps) = at_rubric(&h).await;
    let [r0, _] = h.reviewers;
    let ids = criteria(&h, &steps[2]).await;

    h.workflow
        .submit_rubric_answers(steps[2].id, r0, vec![AnswerInput::new(ids[0], 4.0), AnswerInput::new(ids[1], 5.0)])
        .await
        .unwrap();
    assert_eq!(
        h.workflow.resolve_rubric(steps[2].id, r0).await.unwrap(),
        Some(EvaluationResult::Fail)
    );

    // a failed rubric blocks the pointer
    let err = h.workflow.advance(proposal.id, r0, steps[2].id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)));
}

#[tokio::test]
async fn test_archived_proposal_is_frozen() {
    let h = Harness::new();
    let (proposal, steps) = h.four_step_proposal().await;

    let archived = h.workflow.set_archived(proposal.id, h.admin, true).await.unwrap();
    assert!(archived.archived);

    let err = h.workflow.advance(proposal.id, h.author, steps[0].id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)));
    assert!(!h.workflow.can_go_back(proposal.id).await.unwrap());
}

#[tokio::test]
async fn test_template_instantiation_copies_blueprint() {
    let h = Harness::new();
    let template = h
        .workflow
        .create_proposal(h.four_step_draft().as_template())
        .await
        .unwrap();

    let err = h.workflow.publish(template.id, h.author).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotPermitted(_)));

    let copy = h
        .workflow
        .instantiate_template(template.id, h.author, None)
        .await
        .unwrap();
    assert_eq!(copy.source_template, Some(template.id));
    assert!(copy.is_draft());
    assert!(!copy.is_template);

    let state = h.store.snapshot().await.unwrap();
    let originals = state.evaluations_of(template.id);
    let copies = state.evaluations_of(copy.id);
    assert_eq!(copies.len(), originals.len());
    for (a, b) in originals.iter().zip(&copies) {
        assert_ne!(a.id, b.id);
        assert_eq!(a.evaluation_type, b.evaluation_type);
        assert_eq!(a.reviewers, b.reviewers);
    }
    assert_eq!(state.criteria_of(copies[2].id).len(), 2);
    assert_ne!(state.criteria_of(copies[2].id)[0].id, state.criteria_of(originals[2].id)[0].id);

    let err = h
        .workflow
        .instantiate_template(copy.id, h.author, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidInput(_)));
}

#[tokio::test]
async fn test_static_permissions_gate_each_operation() {
    let h = Harness::new();
    let viewer = UserId::new();
    let permissions = StaticPermissions::new()
        .with_user(h.author, ProposalPermissionFlags::all())
        .with_user(viewer, ProposalPermissionFlags::none());
    let wf = ProposalWorkflow::new(
        Arc::clone(&h.store),
        Arc::new(permissions),
        WorkflowConfig::default(),
    );

    let proposal = wf.create_proposal(h.four_step_draft()).await.unwrap();
    assert!(matches!(
        wf.publish(proposal.id, viewer).await,
        Err(WorkflowError::NotPermitted(_))
    ));
    assert!(matches!(
        wf.set_archived(proposal.id, viewer, true).await,
        Err(WorkflowError::NotPermitted(_))
    ));
    wf.publish(proposal.id, h.author).await.unwrap();
}

#[tokio::test]
async fn test_scenario_positive_average_then_three_go_backs() {
    let config = WorkflowConfig::new().with_rubric_policy(RubricPolicyConfig::MeanAbove { threshold: 0.0 });
    let h = Harness::with_config(config);
    let [r0, _] = h.reviewers;
    let reviewer = Assignee::User(r0);

    let draft = ProposalDraft::new(h.space, h.author)
        .with_step(
            StepDraft::new(EvaluationType::Feedback, "Feedback")
                .with_grant(Assignee::System(SystemRole::Author), ProposalOperation::Move),
        )
        .with_step(StepDraft::new(EvaluationType::PassFail, "Review").with_reviewer(reviewer))
        .with_step(
            StepDraft::new(EvaluationType::Rubric, "Score")
                .with_reviewer(reviewer)
                .with_criterion("Merit", 0.0, 20.0),
        )
        .with_step(StepDraft::new(EvaluationType::Vote, "Vote").with_reviewer(reviewer));
    let proposal = h.workflow.create_proposal(draft).await.unwrap();
    h.workflow.publish(proposal.id, h.author).await.unwrap();
    let steps = h.steps(proposal.id).await;

    h.workflow.advance(proposal.id, h.author, steps[0].id).await.unwrap();
    h.workflow
        .submit_pass_fail_review(steps[1].id, r0, EvaluationResult::Pass, None)
        .await
        .unwrap();
    h.workflow.advance(proposal.id, r0, steps[1].id).await.unwrap();

    let merit = criteria(&h, &steps[2]).await[0];
    h.workflow
        .submit_rubric_answers(steps[2].id, r0, vec![AnswerInput::new(merit, 10.0)])
        .await
        .unwrap();
    let results = h.workflow.aggregate_results(steps[2].id).await.unwrap();
    assert_eq!(results.aggregation.average_for(merit), Some(10.0));
    assert_eq!(
        h.workflow.resolve_rubric(steps[2].id, r0).await.unwrap(),
        Some(EvaluationResult::Pass)
    );

    let next = h.workflow.advance(proposal.id, r0, steps[2].id).await.unwrap();
    assert_eq!(next.evaluation().map(|e| e.id), Some(steps[3].id));

    let mut landed = Vec::new();
    for _ in 0..3 {
        landed.push(h.workflow.go_back(proposal.id, r0).await.unwrap().index);
    }
    assert_eq!(landed, vec![2, 1, 0]);
    assert!(!h.workflow.can_go_back(proposal.id).await.unwrap());
}

/// Spam check (appealable, decided by the second reviewer), a priority
/// rules check, then a badge check
async fn screening(h: &Harness) -> (Proposal, Vec<Evaluation>) {
    let [r0, r1] = h.reviewers;
    let draft = ProposalDraft::new(h.space, h.author)
        .with_step(
            StepDraft::new(EvaluationType::PassFail, "Spam check")
                .with_reviewer(Assignee::User(r0))
                .with_appeal_reviewer(Assignee::User(r1), 1),
        )
        .with_step(
            StepDraft::new(EvaluationType::PassFail, "Rules check")
                .with_reviewer(Assignee::User(r0))
                .as_final_step(),
        )
        .with_step(StepDraft::new(EvaluationType::PassFail, "Badge check").with_reviewer(Assignee::User(r0)));
    let proposal = h.workflow.create_proposal(draft).await.unwrap();
    let proposal = h.workflow.publish(proposal.id, h.author).await.unwrap();
    let steps = h.steps(proposal.id).await;
    (proposal, steps)
}

#[tokio::test]
async fn test_appeal_reviewer_upholds_decline() {
    let h = Harness::new();
    let (proposal, steps) = screening(&h).await;
    let [r0, r1] = h.reviewers;

    h.workflow
        .submit_pass_fail_review(steps[0].id, r0, EvaluationResult::Fail, None)
        .await
        .unwrap();
    let err = h.workflow.advance(proposal.id, r0, steps[0].id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)));

    let err = h.workflow.appeal(steps[0].id, r1, "not mine to appeal").await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotPermitted(_)));

    let appealed = h
        .workflow
        .appeal(steps[0].id, h.author, "I disagree with the evaluation")
        .await
        .unwrap();
    assert_eq!(appealed.appealed_by, Some(h.author));
    assert!(appealed.appealed_at.is_some());
    assert_eq!(appealed.outcome, None);

    let err = h.workflow.appeal(steps[0].id, h.author, "again").await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)));

    // the original reviewer no longer decides the step
    let err = h
        .workflow
        .submit_pass_fail_review(steps[0].id, r0, EvaluationResult::Pass, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotPermitted(_)));

    let outcome = h
        .workflow
        .submit_pass_fail_review(steps[0].id, r1, EvaluationResult::Fail, None)
        .await
        .unwrap();
    assert_eq!(outcome, Some(EvaluationResult::Fail));

    let done = h.workflow.advance(proposal.id, r1, steps[0].id).await.unwrap();
    assert_eq!(done, Advanced::Completed);

    let position = h.workflow.position(proposal.id).await.unwrap();
    assert!(matches!(position, ProposalPosition::Resolved(ref e) if e.id == steps[0].id));
    assert_eq!(h.workflow.current_evaluation(proposal.id).await.unwrap(), None);

    let state = h.store.snapshot().await.unwrap();
    assert_eq!(state.evaluation(steps[0].id).unwrap().result, Some(EvaluationResult::Fail));
    assert_eq!(state.reviews_of(steps[0].id).len(), 2);
    assert_eq!(state.evaluation(steps[1].id).unwrap().result, None);
}

#[tokio::test]
async fn test_upheld_appeal_passes_and_ends_workflow() {
    let h = Harness::new();
    let (proposal, steps) = screening(&h).await;
    let [r0, r1] = h.reviewers;

    let err = h.workflow.appeal(steps[0].id, h.author, "too early").await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)));

    h.workflow
        .submit_pass_fail_review(steps[0].id, r0, EvaluationResult::Fail, None)
        .await
        .unwrap();
    h.workflow
        .appeal(steps[0].id, h.author, "I disagree with the evaluation")
        .await
        .unwrap();
    h.workflow
        .submit_pass_fail_review(steps[0].id, r1, EvaluationResult::Pass, None)
        .await
        .unwrap();

    let done = h.workflow.advance(proposal.id, r1, steps[0].id).await.unwrap();
    assert_eq!(done, Advanced::Completed);
    let after = h.steps(proposal.id).await;
    assert_eq!(after[0].result, Some(EvaluationResult::Pass));
    assert!(!after[1].is_resolved() && !after[2].is_resolved());
}

#[tokio::test]
async fn test_passed_priority_step_skips_remaining_steps() {
    let h = Harness::new();
    let (proposal, steps) = screening(&h).await;
    let [r0, _] = h.reviewers;

    h.workflow
        .submit_pass_fail_review(steps[0].id, r0, EvaluationResult::Pass, None)
        .await
        .unwrap();
    h.workflow.advance(proposal.id, r0, steps[0].id).await.unwrap();

    let err = h.workflow.appeal(steps[1].id, h.author, "not appealable").await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)));

    h.workflow
        .submit_pass_fail_review(steps[1].id, r0, EvaluationResult::Pass, None)
        .await
        .unwrap();
    let done = h.workflow.advance(proposal.id, r0, steps[1].id).await.unwrap();
    assert_eq!(done, Advanced::Completed);

    let position = h.workflow.position(proposal.id).await.unwrap();
    assert!(matches!(position, ProposalPosition::Resolved(ref e) if e.id == steps[1].id));
    let err = h.workflow.advance(proposal.id, r0, steps[2].id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)));

    // going back from the priority step reopens it
    let reopened = h.workflow.go_back(proposal.id, h.admin).await.unwrap();
    assert_eq!(reopened.id, steps[0].id);
}

#[tokio::test]
async fn test_failed_priority_step_falls_through() {
    let h = Harness::new();
    let (proposal, steps) = screening(&h).await;
    let [r0, _] = h.reviewers;

    h.workflow
        .submit_pass_fail_review(steps[0].id, r0, EvaluationResult::Pass, None)
        .await
        .unwrap();
    h.workflow.advance(proposal.id, r0, steps[0].id).await.unwrap();
    h.workflow
        .submit_pass_fail_review(steps[1].id, r0, EvaluationResult::Fail, None)
        .await
        .unwrap();

    let next = h.workflow.advance(proposal.id, r0, steps[1].id).await.unwrap();
    assert_eq!(next.evaluation().map(|e| e.id), Some(steps[2].id));
    let after = h.steps(proposal.id).await;
    assert_eq!(after[1].result, Some(EvaluationResult::Fail));
}

#[tokio::test]
async fn test_publish_requires_appeal_reviewers_when_appealable() {
    let wf = permissive_workflow();
    let h = Harness::new();
    let draft = ProposalDraft::new(h.space, h.author).with_step(
        StepDraft::new(EvaluationType::PassFail, "Spam check")
            .with_reviewer(Assignee::User(h.reviewers[0])),
    );
    let proposal = wf.create_proposal(draft).await.unwrap();
    let step = wf.current_evaluation(proposal.id).await.unwrap().unwrap();

    // flip the flag without reviewers, as an imported snapshot could
    wf.store()
        .transaction(move |state| state.update_evaluation(step.id, |e| e.appealable = true))
        .await
        .unwrap();
    let err = wf.publish(proposal.id, h.author).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidInput(_)));
}
