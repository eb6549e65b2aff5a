//! Process-local store backing the service binary and the test suites.
//!
//! A single mutex guards all tables, so each trait method is one atomic unit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::domain::{
    Submission, SubmissionId, SubmissionStatus, TaskDefinition, TaskId, UserId, UserScore,
};
use super::repository::{RepositoryError, SubmissionRepository, TaskCatalog, VerificationRecord};
use super::settlement::{utc_day, SettlementCommand, SettlementOutcome, SettlementReceipt};

#[derive(Debug, Default)]
struct StoreState {
    submissions: HashMap<SubmissionId, Submission>,
    verified_by_task: HashMap<TaskId, SubmissionId>,
    scores: HashMap<UserId, UserScore>,
    verifications: HashMap<SubmissionId, Vec<VerificationRecord>>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemorySubmissionStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemorySubmissionStore {
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }

    /// Every ledger row, for reporting and assertions.
    pub fn ledgers(&self) -> Result<Vec<UserScore>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard.scores.values().cloned().collect())
    }
}

impl SubmissionRepository for InMemorySubmissionStore {
    fn insert(&self, mut submission: Submission) -> Result<Submission, RepositoryError> {
        let mut guard = self.lock()?;

        if guard.submissions.contains_key(&submission.id) {
            return Err(RepositoryError::Conflict);
        }

        if let Some(winner) = guard.verified_by_task.get(&submission.task_id) {
            return Err(RepositoryError::TaskAlreadyVerified {
                winner: winner.clone(),
            });
        }

        if let Some(existing) = guard.submissions.values().find(|existing| {
            existing.task_id == submission.task_id
                && existing.user_id == submission.user_id
                && existing.status.blocks_restart()
        }) {
            return Err(RepositoryError::ActiveSubmission {
                existing: existing.id.clone(),
                status: existing.status,
            });
        }

        submission.version = 1;
        guard
            .submissions
            .insert(submission.id.clone(), submission.clone());
        Ok(submission)
    }

    fn update(&self, mut submission: Submission) -> Result<Submission, RepositoryError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let current = state
            .submissions
            .get(&submission.id)
            .ok_or(RepositoryError::NotFound)?;

        if current.version != submission.version {
            return Err(RepositoryError::StaleWrite {
                submission_id: submission.id.clone(),
                expected: submission.version,
                found: current.version,
            });
        }

        if current.status == SubmissionStatus::Verified
            && submission.status != SubmissionStatus::Verified
        {
            return Err(RepositoryError::Conflict);
        }

        if submission.status == SubmissionStatus::Verified {
            match state.verified_by_task.get(&submission.task_id) {
                Some(winner) if *winner != submission.id => {
                    return Err(RepositoryError::TaskAlreadyVerified {
                        winner: winner.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    state
                        .verified_by_task
                        .insert(submission.task_id.clone(), submission.id.clone());
                }
            }
        }

        // The award marker is written only by `commit_settlement`.
        submission.points_awarded_at = current.points_awarded_at;
        submission.version = current.version + 1;
        state
            .submissions
            .insert(submission.id.clone(), submission.clone());
        Ok(submission)
    }

    fn fetch(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard.submissions.get(id).cloned())
    }

    fn verified_for_task(&self, task_id: &TaskId) -> Result<Option<SubmissionId>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard.verified_by_task.get(task_id).cloned())
    }

    fn for_user(
        &self,
        user_id: &UserId,
        statuses: &[SubmissionStatus],
        limit: usize,
    ) -> Result<Vec<Submission>, RepositoryError> {
        let guard = self.lock()?;
        let mut matches: Vec<Submission> = guard
            .submissions
            .values()
            .filter(|submission| &submission.user_id == user_id)
            .filter(|submission| statuses.is_empty() || statuses.contains(&submission.status))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    fn commit_settlement(
        &self,
        command: SettlementCommand,
    ) -> Result<SettlementOutcome, RepositoryError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let submission = state
            .submissions
            .get_mut(&command.submission_id)
            .ok_or(RepositoryError::NotFound)?;

        if let Some(awarded_at) = submission.points_awarded_at {
            return Ok(SettlementOutcome::AlreadySettled { awarded_at });
        }
        if submission.status != SubmissionStatus::Verified {
            return Ok(SettlementOutcome::NotEligible {
                status: submission.status,
            });
        }

        let score = state
            .scores
            .entry(submission.user_id.clone())
            .or_insert_with(|| UserScore::new(submission.user_id.clone()));
        let streak = score.apply_settlement(command.points, utc_day(command.awarded_at));

        submission.points_awarded_at = Some(command.awarded_at);
        submission.updated_at = command.awarded_at;
        submission.version += 1;

        debug!(
            submission_id = %submission.id,
            user_id = %submission.user_id,
            points = command.points,
            "settlement committed"
        );

        Ok(SettlementOutcome::Settled(SettlementReceipt {
            submission_id: submission.id.clone(),
            user_id: submission.user_id.clone(),
            points_awarded: command.points,
            total_points: score.total_points,
            tasks_completed: score.tasks_completed,
            streak,
            awarded_at: command.awarded_at,
        }))
    }

    fn ledger(&self, user_id: &UserId) -> Result<Option<UserScore>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard.scores.get(user_id).cloned())
    }

    fn append_verification(&self, record: VerificationRecord) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        guard
            .verifications
            .entry(record.submission_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    fn latest_verification(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Option<VerificationRecord>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard
            .verifications
            .get(submission_id)
            .and_then(|records| records.last())
            .cloned())
    }
}

/// Fixed catalog held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTaskCatalog {
    tasks: Arc<Mutex<HashMap<TaskId, TaskDefinition>>>,
}

impl InMemoryTaskCatalog {
    pub fn with_tasks(tasks: impl IntoIterator<Item = TaskDefinition>) -> Self {
        let tasks = tasks
            .into_iter()
            .map(|task| (task.id.clone(), task))
            .collect();
        Self {
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }

    pub fn upsert(&self, task: TaskDefinition) -> Result<(), RepositoryError> {
        let mut guard = self
            .tasks
            .lock()
            .map_err(|_| RepositoryError::Unavailable("catalog mutex poisoned".to_string()))?;
        guard.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn all(&self) -> Result<Vec<TaskDefinition>, RepositoryError> {
        let guard = self
            .tasks
            .lock()
            .map_err(|_| RepositoryError::Unavailable("catalog mutex poisoned".to_string()))?;
        let mut tasks: Vec<TaskDefinition> = guard.values().cloned().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }
}

impl TaskCatalog for InMemoryTaskCatalog {
    fn fetch(&self, id: &TaskId) -> Result<Option<TaskDefinition>, RepositoryError> {
        let guard = self
            .tasks
            .lock()
            .map_err(|_| RepositoryError::Unavailable("catalog mutex poisoned".to_string()))?;
        Ok(guard.get(id).cloned())
    }

    fn active(&self) -> Result<Vec<TaskDefinition>, RepositoryError> {
        let mut tasks = self.all()?;
        tasks.retain(|task| task.is_active);
        Ok(tasks)
    }
}
