use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::submissions::domain::{
    EvidenceDraft, GeoPoint, Submission, SubmissionId, SubmissionStatus, TaskDefinition, TaskId,
    UserId, UserScore,
};
use crate::workflows::submissions::repository::{
    EventError, EventPublisher, RepositoryError, SubmissionRepository, TaskEvent,
    VerificationRecord,
};
use crate::workflows::submissions::settlement::{SettlementCommand, SettlementOutcome};
use crate::workflows::submissions::{
    InMemorySubmissionStore, InMemoryTaskCatalog, ScoreSignals, SubmissionService,
    VerificationConfig,
};

pub(super) const RECYCLING: &str = "task-recycling-drive";
pub(super) const TREES: &str = "task-tree-planting";
pub(super) const STRICT: &str = "task-solar-survey";
pub(super) const RETIRED: &str = "task-retired";

pub(super) fn task_id(raw: &str) -> TaskId {
    TaskId(raw.to_string())
}

pub(super) fn user(raw: &str) -> UserId {
    UserId(raw.to_string())
}

pub(super) fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn task(id: &str, base_points: u64, min_confidence: Option<f64>) -> TaskDefinition {
    TaskDefinition {
        id: task_id(id),
        title: format!("Task {id}"),
        category: "waste".to_string(),
        base_points,
        min_confidence,
        is_active: true,
    }
}

pub(super) fn catalog() -> InMemoryTaskCatalog {
    let mut retired = task(RETIRED, 50, None);
    retired.is_active = false;
    let mut trees = task(TREES, 200, None);
    trees.category = "biodiversity".to_string();

    InMemoryTaskCatalog::with_tasks([
        task(RECYCLING, 150, Some(0.75)),
        trees,
        task(STRICT, 130, Some(0.9)),
        retired,
    ])
}

pub(super) fn evidence() -> EvidenceDraft {
    EvidenceDraft {
        image_refs: vec!["uploads/bags-sorted.png".to_string()],
        description: "Collected and sorted twelve bags of plastic".to_string(),
        location: GeoPoint::new(52.37, 4.89),
        location_text: "Vondelpark entrance".to_string(),
    }
}

pub(super) fn approved_signals() -> ScoreSignals {
    ScoreSignals::new(Some(0.9), Some(0.1), vec!["image_received".to_string()])
}

pub(super) fn review_signals() -> ScoreSignals {
    ScoreSignals::new(Some(0.6), Some(0.1), Vec::new())
}

pub(super) fn rejected_signals() -> ScoreSignals {
    ScoreSignals::new(Some(0.1), Some(0.1), vec!["missing_image".to_string()])
}

pub(super) type MemoryService = SubmissionService<InMemorySubmissionStore, InMemoryTaskCatalog>;

pub(super) fn build_service() -> (MemoryService, Arc<InMemorySubmissionStore>, Arc<MemoryEvents>) {
    let store = Arc::new(InMemorySubmissionStore::default());
    let events = Arc::new(MemoryEvents::default());
    let service = SubmissionService::new(
        store.clone(),
        Arc::new(catalog()),
        VerificationConfig::default(),
    )
    .with_events(events.clone());
    (service, store, events)
}

/// Starts `task` for `user_id` and attaches evidence.
pub(super) fn submitted<R>(
    service: &SubmissionService<R, InMemoryTaskCatalog>,
    task: &str,
    user_id: &str,
) -> Submission
where
    R: SubmissionRepository + 'static,
{
    let started = service
        .start(&task_id(task), &user(user_id))
        .expect("submission starts");
    service
        .attach_evidence(&started.id, &user(user_id), evidence())
        .expect("evidence attaches")
}

/// Puts a submission for an unknown task straight into the store as verified.
pub(super) fn verified_orphan(store: &InMemorySubmissionStore, user_id: &str) -> SubmissionId {
    let id = SubmissionId(format!("sub-orphan-{user_id}"));
    let inserted = store
        .insert(Submission::new(
            id.clone(),
            task_id("task-deleted"),
            user(user_id),
            at(2025, 4, 1, 9),
        ))
        .expect("insert orphan");

    let mut verified = inserted;
    verified.status = SubmissionStatus::Verified;
    store.update(verified).expect("mark verified");
    id
}

#[derive(Default, Clone)]
pub(super) struct MemoryEvents {
    events: Arc<Mutex<Vec<TaskEvent>>>,
}

impl MemoryEvents {
    pub(super) fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().expect("event mutex poisoned").clone()
    }
}

impl EventPublisher for MemoryEvents {
    fn publish(&self, event: TaskEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .expect("event mutex poisoned")
            .push(event);
        Ok(())
    }
}

pub(super) struct FailingEvents;

impl EventPublisher for FailingEvents {
    fn publish(&self, _event: TaskEvent) -> Result<(), EventError> {
        Err(EventError::Transport("broker offline".to_string()))
    }
}

/// Store whose settlement commits can be made to fail on demand.
#[derive(Default, Clone)]
pub(super) struct FlakySettlementStore {
    pub(super) inner: InMemorySubmissionStore,
    fail_settlements: Arc<AtomicBool>,
}

impl FlakySettlementStore {
    pub(super) fn fail_settlements(&self, fail: bool) {
        self.fail_settlements.store(fail, Ordering::SeqCst);
    }
}

impl SubmissionRepository for FlakySettlementStore {
    fn insert(&self, submission: Submission) -> Result<Submission, RepositoryError> {
        self.inner.insert(submission)
    }

    fn update(&self, submission: Submission) -> Result<Submission, RepositoryError> {
        self.inner.update(submission)
    }

    fn fetch(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn verified_for_task(&self, task_id: &TaskId) -> Result<Option<SubmissionId>, RepositoryError> {
        self.inner.verified_for_task(task_id)
    }

    fn for_user(
        &self,
        user_id: &UserId,
        statuses: &[SubmissionStatus],
        limit: usize,
    ) -> Result<Vec<Submission>, RepositoryError> {
        self.inner.for_user(user_id, statuses, limit)
    }

    fn commit_settlement(
        &self,
        command: SettlementCommand,
    ) -> Result<SettlementOutcome, RepositoryError> {
        if self.fail_settlements.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("ledger write failed".to_string()));
        }
        self.inner.commit_settlement(command)
    }

    fn ledger(&self, user_id: &UserId) -> Result<Option<UserScore>, RepositoryError> {
        self.inner.ledger(user_id)
    }

    fn append_verification(&self, record: VerificationRecord) -> Result<(), RepositoryError> {
        self.inner.append_verification(record)
    }

    fn latest_verification(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Option<VerificationRecord>, RepositoryError> {
        self.inner.latest_verification(submission_id)
    }
}

pub(super) struct UnavailableStore;

impl SubmissionRepository for UnavailableStore {
    fn insert(&self, _submission: Submission) -> Result<Submission, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update(&self, _submission: Submission) -> Result<Submission, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: &SubmissionId) -> Result<Option<Submission>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn verified_for_task(
        &self,
        _task_id: &TaskId,
    ) -> Result<Option<SubmissionId>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn for_user(
        &self,
        _user_id: &UserId,
        _statuses: &[SubmissionStatus],
        _limit: usize,
    ) -> Result<Vec<Submission>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn commit_settlement(
        &self,
        _command: SettlementCommand,
    ) -> Result<SettlementOutcome, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn ledger(&self, _user_id: &UserId) -> Result<Option<UserScore>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn append_verification(&self, _record: VerificationRecord) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn latest_verification(
        &self,
        _submission_id: &SubmissionId,
    ) -> Result<Option<VerificationRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
