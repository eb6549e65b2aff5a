use std::sync::Arc;

use super::common::*;
use crate::workflows::submissions::domain::{SubmissionId, SubmissionStatus};
use crate::workflows::submissions::repository::{Reviewer, SubmissionRepository};
use crate::workflows::submissions::{
    InMemorySubmissionStore, InMemoryTaskCatalog, RepositoryError, ScoreSignals,
    SettlementOutcome, SubmissionService, SubmissionServiceError, VerificationConfig,
};

fn flaky_service() -> (
    Arc<SubmissionService<FlakySettlementStore, InMemoryTaskCatalog>>,
    FlakySettlementStore,
) {
    let store = FlakySettlementStore::default();
    let service = SubmissionService::new(
        Arc::new(store.clone()),
        Arc::new(catalog()),
        VerificationConfig::default(),
    );
    (Arc::new(service), store)
}

/// Verifies a submission while ledger writes fail, leaving it owed its credit.
fn verified_unsettled(
    service: &SubmissionService<FlakySettlementStore, InMemoryTaskCatalog>,
    store: &FlakySettlementStore,
    task: &str,
    user_id: &str,
) -> SubmissionId {
    let submission = submitted(service, task, user_id);
    store.fail_settlements(true);
    let result = service.decide(&submission.id, approved_signals());
    store.fail_settlements(false);

    assert!(matches!(
        result,
        Err(SubmissionServiceError::Repository(RepositoryError::Unavailable(_)))
    ));
    submission.id
}

#[test]
fn settle_is_idempotent() {
    let (service, _, _) = build_service();
    let submission = submitted(&service, RECYCLING, "ana");
    let outcome = service
        .decide_at(
            &submission.id,
            approved_signals(),
            Reviewer::Automated,
            at(2025, 4, 1, 9),
        )
        .expect("decision applies");
    assert_eq!(outcome.points_awarded(), Some(150));

    for _ in 0..3 {
        let repeat = service
            .settle_at(&submission.id, at(2025, 4, 2, 9))
            .expect("settle succeeds");
        assert_eq!(
            repeat,
            SettlementOutcome::AlreadySettled {
                awarded_at: at(2025, 4, 1, 9)
            }
        );
    }

    let ledger = service.ledger(&user("ana")).expect("ledger loads");
    assert_eq!(ledger.total_points, 150);
    assert_eq!(ledger.tasks_completed, 1);
}

#[test]
fn unverified_submission_is_not_eligible() {
    let (service, _, _) = build_service();
    let submission = submitted(&service, RECYCLING, "ana");
    service
        .decide(&submission.id, review_signals())
        .expect("decision applies");

    let outcome = service.settle(&submission.id).expect("settle succeeds");

    assert_eq!(
        outcome,
        SettlementOutcome::NotEligible {
            status: SubmissionStatus::ManualReview
        }
    );
    assert_eq!(service.ledger(&user("ana")).expect("ledger").total_points, 0);
}

#[test]
fn settle_unknown_submission_is_not_found() {
    let (service, _, _) = build_service();
    assert!(matches!(
        service.settle(&SubmissionId("sub-missing".to_string())),
        Err(SubmissionServiceError::NotFound(_))
    ));
}

#[test]
fn missing_task_settles_with_zero_points() {
    let (service, store, _) = build_service();
    let id = verified_orphan(&store, "ana");

    let outcome = service
        .settle_at(&id, at(2025, 4, 1, 12))
        .expect("settle succeeds");

    let receipt = outcome.receipt().expect("settled");
    assert_eq!(receipt.points_awarded, 0);
    assert_eq!(receipt.tasks_completed, 1);
    assert_eq!(receipt.streak.days, 1);

    let stored = store.fetch(&id).expect("fetch").expect("present");
    assert_eq!(stored.points_awarded_at, Some(at(2025, 4, 1, 12)));
}

#[test]
fn streak_follows_settlement_days() {
    let catalog = InMemoryTaskCatalog::with_tasks([
        task("task-day-1", 10, None),
        task("task-day-2", 20, None),
        task("task-day-2b", 30, None),
        task("task-day-4", 40, None),
        task("task-day-5", 50, None),
        task("task-day-6", 60, None),
    ]);
    let service = SubmissionService::new(
        Arc::new(InMemorySubmissionStore::default()),
        Arc::new(catalog),
        VerificationConfig::default(),
    );

    let days = [
        ("task-day-1", at(2025, 4, 1, 8), 1, 1),
        ("task-day-2", at(2025, 4, 2, 23), 2, 2),
        ("task-day-2b", at(2025, 4, 2, 23), 2, 2),
        ("task-day-4", at(2025, 4, 4, 0), 1, 2),
        ("task-day-5", at(2025, 4, 5, 7), 2, 2),
        ("task-day-6", at(2025, 4, 6, 7), 3, 3),
    ];

    for (task, when, streak, best) in days {
        let submission = submitted(&service, task, "ana");
        let outcome = service
            .decide_at(&submission.id, approved_signals(), Reviewer::Automated, when)
            .expect("decision applies");
        let receipt = outcome
            .settlement
            .as_ref()
            .and_then(SettlementOutcome::receipt)
            .expect("settled");
        assert_eq!(receipt.streak.days, streak, "streak after {task}");
        assert_eq!(receipt.streak.best, best, "best after {task}");
    }

    let ledger = service.ledger(&user("ana")).expect("ledger loads");
    assert_eq!(ledger.total_points, 210);
    assert_eq!(ledger.tasks_completed, 6);
    assert_eq!(ledger.streak_days, 3);
    assert_eq!(ledger.streak_best_days, 3);
}

#[test]
fn failed_ledger_write_is_recovered_by_settle() {
    let (service, store) = flaky_service();
    let id = verified_unsettled(&service, &store, RECYCLING, "ana");

    let stored = service.get(&id).expect("submission readable");
    assert_eq!(stored.status, SubmissionStatus::Verified);
    assert!(stored.points_awarded_at.is_none());
    assert!(stored.awaiting_settlement());
    assert_eq!(service.ledger(&user("ana")).expect("ledger").total_points, 0);

    let outcome = service.settle(&id).expect("settle succeeds");
    assert_eq!(outcome.points_awarded(), Some(150));

    let again = service.settle(&id).expect("settle succeeds");
    assert!(matches!(again, SettlementOutcome::AlreadySettled { .. }));
    assert_eq!(service.ledger(&user("ana")).expect("ledger").total_points, 150);
}

#[test]
fn failed_ledger_write_is_recovered_by_redeciding() {
    let (service, store) = flaky_service();
    let id = verified_unsettled(&service, &store, TREES, "ana");
    let snapshot = service.get(&id).expect("readable").verification;

    let outcome = service
        .decide(&id, ScoreSignals::default())
        .expect("recovery pass succeeds");

    assert_eq!(outcome.decision, None);
    assert_eq!(outcome.points_awarded(), Some(200));
    assert_eq!(outcome.submission.verification, snapshot);
    assert!(outcome.submission.is_settled());
}

#[test]
fn concurrent_settles_credit_once() {
    let (service, store) = flaky_service();
    let id = verified_unsettled(&service, &store, RECYCLING, "ana");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            let id = id.clone();
            std::thread::spawn(move || service.settle(&id))
        })
        .collect();

    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|handle| {
            handle
                .join()
                .expect("thread finished")
                .expect("settle succeeds")
        })
        .collect();

    let settled = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, SettlementOutcome::Settled(_)))
        .count();
    assert_eq!(settled, 1);
    assert!(outcomes.iter().all(|outcome| matches!(
        outcome,
        SettlementOutcome::Settled(_) | SettlementOutcome::AlreadySettled { .. }
    )));

    let ledger = service.ledger(&user("ana")).expect("ledger loads");
    assert_eq!(ledger.total_points, 150);
    assert_eq!(ledger.tasks_completed, 1);
}

#[test]
fn concurrent_settles_for_one_user_lose_nothing() {
    let (service, store) = flaky_service();
    let ids = vec![
        verified_unsettled(&service, &store, RECYCLING, "ana"),
        verified_unsettled(&service, &store, TREES, "ana"),
        verified_unsettled(&service, &store, STRICT, "ana"),
    ];

    let handles: Vec<_> = ids
        .into_iter()
        .flat_map(|id| [id.clone(), id])
        .map(|id| {
            let service = service.clone();
            std::thread::spawn(move || service.settle(&id))
        })
        .collect();

    for handle in handles {
        handle
            .join()
            .expect("thread finished")
            .expect("settle succeeds");
    }

    let ledger = service.ledger(&user("ana")).expect("ledger loads");
    assert_eq!(ledger.total_points, 150 + 200 + 130);
    assert_eq!(ledger.tasks_completed, 3);
    assert_eq!(ledger.streak_days, 1);
}
