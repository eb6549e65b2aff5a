use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Submission, SubmissionId, SubmissionStatus, TaskDefinition, TaskId, UserId, UserScore,
};
use super::settlement::{SettlementCommand, SettlementOutcome};
use super::verification::VerificationDecision;

/// Storage abstraction for submissions and the settlement ledger.
///
/// Implementations own the concurrency guards: `insert` enforces one live
/// submission per user and task, `update` is a compare-and-swap on
/// `Submission::version` that also admits at most one verified submission per
/// task, and `commit_settlement` applies the ledger credit together with the
/// submission's award marker.
pub trait SubmissionRepository: Send + Sync {
    fn insert(&self, submission: Submission) -> Result<Submission, RepositoryError>;
    fn update(&self, submission: Submission) -> Result<Submission, RepositoryError>;
    fn fetch(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError>;
    fn verified_for_task(&self, task_id: &TaskId) -> Result<Option<SubmissionId>, RepositoryError>;
    fn for_user(
        &self,
        user_id: &UserId,
        statuses: &[SubmissionStatus],
        limit: usize,
    ) -> Result<Vec<Submission>, RepositoryError>;

    fn commit_settlement(
        &self,
        command: SettlementCommand,
    ) -> Result<SettlementOutcome, RepositoryError>;
    fn ledger(&self, user_id: &UserId) -> Result<Option<UserScore>, RepositoryError>;

    fn append_verification(&self, record: VerificationRecord) -> Result<(), RepositoryError>;
    fn latest_verification(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Option<VerificationRecord>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("user already holds submission {existing} ({status})")]
    ActiveSubmission {
        existing: SubmissionId,
        status: SubmissionStatus,
    },
    #[error("task already verified by submission {winner}")]
    TaskAlreadyVerified { winner: SubmissionId },
    #[error("submission {submission_id} changed concurrently (expected version {expected}, found {found})")]
    StaleWrite {
        submission_id: SubmissionId,
        expected: u64,
        found: u64,
    },
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the task catalog.
pub trait TaskCatalog: Send + Sync {
    fn fetch(&self, id: &TaskId) -> Result<Option<TaskDefinition>, RepositoryError>;
    /// Tasks open to new submissions, ordered by id.
    fn active(&self) -> Result<Vec<TaskDefinition>, RepositoryError>;
}

/// Who produced a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Reviewer {
    Automated,
    Person(String),
}

/// Append-only audit entry written for every decision pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub submission_id: SubmissionId,
    pub confidence: Option<f64>,
    pub fraud_score: Option<f64>,
    pub flags: Vec<String>,
    pub decision: VerificationDecision,
    pub reviewer: Reviewer,
    pub decided_at: DateTime<Utc>,
}

/// Outbound notifications about submission milestones.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: TaskEvent) -> Result<(), EventError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskEventKind {
    TaskVerified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub submission_id: SubmissionId,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub payload: BTreeMap<String, String>,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event transport unavailable: {0}")]
    Transport(String),
}

/// Publisher that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardEvents;

impl EventPublisher for DiscardEvents {
    fn publish(&self, _event: TaskEvent) -> Result<(), EventError> {
        Ok(())
    }
}
