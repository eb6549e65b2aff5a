use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    Evidence, EvidenceDraft, LedgerSummary, Submission, SubmissionId, SubmissionStatus,
    TaskDefinition, TaskId, UserId, VerificationSnapshot,
};
use super::repository::{
    DiscardEvents, EventPublisher, RepositoryError, Reviewer, SubmissionRepository, TaskCatalog,
    TaskEvent, TaskEventKind, VerificationRecord,
};
use super::settlement::{SettlementCommand, SettlementOutcome};
use super::verification::{
    DecisionPolicy, EvidenceImage, EvidenceScorer, ScoreSignals, ScoringGateway, ScoringRequest,
    VerificationConfig, VerificationDecision, FLAG_FRAUD_CHECK_UNAVAILABLE, FLAG_IMAGE_RECEIVED,
    FLAG_MISSING_IMAGE, FLAG_SCORER_UNAVAILABLE,
};

/// Attempts per state transition before a version conflict is reported.
const MAX_WRITE_ATTEMPTS: usize = 5;
const LIST_LIMIT: usize = 200;

static SUBMISSION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_submission_id() -> SubmissionId {
    let id = SUBMISSION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    SubmissionId(format!("sub-{id:06}"))
}

/// Service composing the submission state machine, decision policy, and
/// settlement ledger.
pub struct SubmissionService<R, C> {
    repository: Arc<R>,
    catalog: Arc<C>,
    policy: Arc<DecisionPolicy>,
    events: Arc<dyn EventPublisher>,
    scoring: Option<ScoringGateway>,
}

/// Result of a decision pass, including the settlement it triggered.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionOutcome {
    pub submission: Submission,
    /// `None` when the pass only completed an outstanding settlement.
    pub decision: Option<VerificationDecision>,
    pub settlement: Option<SettlementOutcome>,
}

impl DecisionOutcome {
    pub fn status(&self) -> SubmissionStatus {
        self.submission.status
    }

    pub fn points_awarded(&self) -> Option<u64> {
        self.settlement
            .as_ref()
            .and_then(SettlementOutcome::points_awarded)
    }

    pub fn total_points(&self) -> Option<u64> {
        self.settlement
            .as_ref()
            .and_then(SettlementOutcome::total_points)
    }
}

/// Ledger figures plus the number of submissions still awaiting a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardView {
    #[serde(flatten)]
    pub ledger: LedgerSummary,
    pub pending_review: usize,
    /// Sorted by category name.
    pub category_progress: Vec<CategoryProgress>,
}

/// Verified submissions of one user against the active tasks of a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryProgress {
    pub category: String,
    pub completed: usize,
    pub total: usize,
}

impl CategoryProgress {
    fn empty(category: &str) -> Self {
        Self {
            category: category.to_string(),
            completed: 0,
            total: 0,
        }
    }
}

/// Open task together with the caller's latest submission for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskListing {
    #[serde(flatten)]
    pub task: TaskDefinition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<SubmissionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_status: Option<SubmissionStatus>,
}

impl<R, C> SubmissionService<R, C>
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    pub fn new(repository: Arc<R>, catalog: Arc<C>, config: VerificationConfig) -> Self {
        Self {
            repository,
            catalog,
            policy: Arc::new(DecisionPolicy::new(config)),
            events: Arc::new(DiscardEvents),
            scoring: None,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    /// Wires the evidence scorer, bounded by the configured scorer timeout.
    pub fn with_scorer(mut self, scorer: Arc<dyn EvidenceScorer>) -> Self {
        let deadline = self.policy.config().scorer_timeout;
        self.scoring = Some(ScoringGateway::new(scorer, deadline));
        self
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    /// Active tasks nobody has completed yet, optionally limited to one
    /// category. With a `user_id`, each entry carries that user's latest
    /// submission for the task.
    pub fn available_tasks(
        &self,
        user_id: Option<&UserId>,
        category: Option<&str>,
    ) -> Result<Vec<TaskListing>, SubmissionServiceError> {
        let category = category.map(str::trim).filter(|value| !value.is_empty());

        let mut latest: HashMap<TaskId, Submission> = HashMap::new();
        if let Some(user_id) = user_id {
            for submission in self.repository.for_user(user_id, &[], usize::MAX)? {
                latest.entry(submission.task_id.clone()).or_insert(submission);
            }
        }

        let mut listings = Vec::new();
        for task in self.catalog.active()? {
            if category.is_some_and(|category| !task.category.eq_ignore_ascii_case(category)) {
                continue;
            }
            if self.repository.verified_for_task(&task.id)?.is_some() {
                continue;
            }

            let submission = latest.remove(&task.id);
            listings.push(TaskListing {
                submission_id: submission.as_ref().map(|submission| submission.id.clone()),
                submission_status: submission.map(|submission| submission.status),
                task,
            });
        }

        Ok(listings)
    }

    /// An active task that is still open to submissions.
    pub fn task(&self, task_id: &TaskId) -> Result<TaskDefinition, SubmissionServiceError> {
        let task = self
            .catalog
            .fetch(task_id)?
            .filter(|task| task.is_active)
            .ok_or_else(|| SubmissionServiceError::TaskNotFound(task_id.clone()))?;

        if let Some(winner) = self.repository.verified_for_task(&task.id)? {
            return Err(SubmissionServiceError::TaskClosed {
                task_id: task.id,
                winner,
            });
        }

        Ok(task)
    }

    /// Open a submission for `user_id` on `task_id`.
    pub fn start(
        &self,
        task_id: &TaskId,
        user_id: &UserId,
    ) -> Result<Submission, SubmissionServiceError> {
        let task = self.task(task_id)?;

        let submission = Submission::new(
            next_submission_id(),
            task.id.clone(),
            user_id.clone(),
            Utc::now(),
        );

        let stored = self
            .repository
            .insert(submission)
            .map_err(|err| match err {
                RepositoryError::ActiveSubmission { existing, status } => {
                    SubmissionServiceError::AlreadyStarted { existing, status }
                }
                RepositoryError::TaskAlreadyVerified { winner } => {
                    SubmissionServiceError::TaskClosed {
                        task_id: task.id.clone(),
                        winner,
                    }
                }
                other => other.into(),
            })?;

        info!(
            submission_id = %stored.id,
            task_id = %stored.task_id,
            user_id = %stored.user_id,
            "submission started"
        );
        Ok(stored)
    }

    /// Attach evidence to a pending submission owned by `user_id`.
    pub fn attach_evidence(
        &self,
        submission_id: &SubmissionId,
        user_id: &UserId,
        draft: EvidenceDraft,
    ) -> Result<Submission, SubmissionServiceError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut submission = self.load(submission_id)?;

            if &submission.user_id != user_id {
                return Err(SubmissionServiceError::Forbidden(submission_id.clone()));
            }
            if submission.status != SubmissionStatus::Pending {
                return Err(SubmissionServiceError::WrongState {
                    status: submission.status,
                    action: "attach evidence to",
                });
            }

            let now = Utc::now();
            submission.evidence = Some(Evidence::from_draft(draft.clone(), now));
            submission.status = SubmissionStatus::PendingVerification;
            submission.updated_at = now;

            match self.repository.update(submission) {
                Ok(stored) => {
                    info!(submission_id = %stored.id, "evidence attached");
                    return Ok(stored);
                }
                Err(RepositoryError::StaleWrite { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(SubmissionServiceError::Contention(submission_id.clone()))
    }

    /// Apply scorer output to a submission awaiting a decision.
    pub fn decide(
        &self,
        submission_id: &SubmissionId,
        signals: ScoreSignals,
    ) -> Result<DecisionOutcome, SubmissionServiceError> {
        self.decide_at(submission_id, signals, Reviewer::Automated, Utc::now())
    }

    /// Decision pass stamped with `now`.
    ///
    /// A submission already `verified` is not re-decided; the pass only
    /// completes its settlement if that is still outstanding.
    pub fn decide_at(
        &self,
        submission_id: &SubmissionId,
        signals: ScoreSignals,
        reviewer: Reviewer,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, SubmissionServiceError> {
        let mut attempts = 0;
        let (stored, decision, signals) = loop {
            attempts += 1;
            if attempts > MAX_WRITE_ATTEMPTS {
                return Err(SubmissionServiceError::Contention(submission_id.clone()));
            }

            let mut submission = self.load(submission_id)?;

            if submission.status == SubmissionStatus::Verified {
                let settlement = self.settle_submission(&submission, now)?;
                let submission = self.load(submission_id)?;
                return Ok(DecisionOutcome {
                    submission,
                    decision: None,
                    settlement: Some(settlement),
                });
            }

            if !submission.status.accepts_decision() {
                return Err(SubmissionServiceError::WrongState {
                    status: submission.status,
                    action: "decide",
                });
            }

            let min_confidence = self
                .catalog
                .fetch(&submission.task_id)?
                .and_then(|task| task.min_confidence);
            let signals = ScoreSignals::new(signals.confidence, signals.fraud, signals.flags.clone());
            let decision = self.policy.decide(&signals, min_confidence);

            submission.verification = Some(VerificationSnapshot {
                confidence: signals.confidence,
                fraud_score: signals.fraud,
                flags: signals.flags.clone(),
                decision,
                decided_at: now,
            });
            submission.status = decision.into();
            submission.updated_at = now;

            match self.repository.update(submission) {
                Ok(stored) => break (stored, decision, signals),
                Err(RepositoryError::StaleWrite { .. }) => continue,
                Err(RepositoryError::TaskAlreadyVerified { winner }) => {
                    let submission = self.load(submission_id)?;
                    return Err(SubmissionServiceError::TaskClosed {
                        task_id: submission.task_id,
                        winner,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        };

        info!(
            submission_id = %stored.id,
            decision = decision.label(),
            status = %stored.status,
            "submission decided"
        );

        let record = VerificationRecord {
            submission_id: stored.id.clone(),
            confidence: signals.confidence,
            fraud_score: signals.fraud,
            flags: signals.flags,
            decision,
            reviewer,
            decided_at: now,
        };
        if let Err(err) = self.repository.append_verification(record) {
            warn!(submission_id = %stored.id, error = %err, "failed to append verification record");
        }

        if stored.status != SubmissionStatus::Verified {
            return Ok(DecisionOutcome {
                submission: stored,
                decision: Some(decision),
                settlement: None,
            });
        }

        self.publish_verified(&stored, decision, now);

        let settlement = self.settle_submission(&stored, now)?;
        let submission = self.load(submission_id)?;
        Ok(DecisionOutcome {
            submission,
            decision: Some(decision),
            settlement: Some(settlement),
        })
    }

    /// Score the submission's evidence and decide on the result.
    ///
    /// No store lock is held while the scorer runs.
    pub async fn verify(
        &self,
        submission_id: &SubmissionId,
        image: Option<EvidenceImage>,
    ) -> Result<DecisionOutcome, SubmissionServiceError> {
        let submission = self.load(submission_id)?;

        if submission.status == SubmissionStatus::Verified {
            return self.decide(submission_id, ScoreSignals::default());
        }
        if !submission.status.accepts_decision() {
            return Err(SubmissionServiceError::WrongState {
                status: submission.status,
                action: "verify",
            });
        }

        let task = self.catalog.fetch(&submission.task_id)?;
        let evidence = submission.evidence.as_ref();
        let description = evidence
            .map(|evidence| evidence.description.clone())
            .unwrap_or_default();
        let claim = match &task {
            Some(task) if description.is_empty() => task.title.clone(),
            Some(task) => format!("{}: {}", task.title, description),
            None => description.clone(),
        };
        let image = image.or_else(|| {
            evidence
                .and_then(|evidence| evidence.image_refs.first())
                .map(EvidenceImage::reference_only)
        });

        let request = ScoringRequest {
            image,
            claim,
            description,
        };

        let signals = match &self.scoring {
            Some(gateway) => gateway.assess(&request).await,
            None => {
                let image_flag = if request.image.is_some() {
                    FLAG_IMAGE_RECEIVED
                } else {
                    FLAG_MISSING_IMAGE
                };
                ScoreSignals::new(
                    None,
                    None,
                    vec![
                        image_flag.to_string(),
                        FLAG_SCORER_UNAVAILABLE.to_string(),
                        FLAG_FRAUD_CHECK_UNAVAILABLE.to_string(),
                    ],
                )
            }
        };

        self.decide(submission_id, signals)
    }

    /// Credit a verified submission to its owner's ledger, at most once.
    pub fn settle(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<SettlementOutcome, SubmissionServiceError> {
        self.settle_at(submission_id, Utc::now())
    }

    pub fn settle_at(
        &self,
        submission_id: &SubmissionId,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, SubmissionServiceError> {
        let submission = self.load(submission_id)?;
        self.settle_submission(&submission, now)
    }

    pub fn get(&self, submission_id: &SubmissionId) -> Result<Submission, SubmissionServiceError> {
        self.load(submission_id)
    }

    pub fn verification(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<VerificationRecord, SubmissionServiceError> {
        self.load(submission_id)?;
        self.repository
            .latest_verification(submission_id)?
            .ok_or_else(|| SubmissionServiceError::VerificationNotFound(submission_id.clone()))
    }

    pub fn ledger(&self, user_id: &UserId) -> Result<LedgerSummary, SubmissionServiceError> {
        Ok(self
            .repository
            .ledger(user_id)?
            .map(|score| score.summary())
            .unwrap_or_default())
    }

    /// Newest-first submissions of a user, optionally limited to `statuses`.
    pub fn list(
        &self,
        user_id: &UserId,
        statuses: &[SubmissionStatus],
    ) -> Result<Vec<Submission>, SubmissionServiceError> {
        Ok(self.repository.for_user(user_id, statuses, LIST_LIMIT)?)
    }

    pub fn dashboard(&self, user_id: &UserId) -> Result<DashboardView, SubmissionServiceError> {
        let ledger = self.ledger(user_id)?;
        let submissions = self.repository.for_user(user_id, &[], usize::MAX)?;
        let pending_review = submissions
            .iter()
            .filter(|submission| submission.status.awaiting_review())
            .count();

        let mut progress: BTreeMap<String, CategoryProgress> = BTreeMap::new();
        for task in self.catalog.active()? {
            progress
                .entry(task.category.clone())
                .or_insert_with(|| CategoryProgress::empty(&task.category))
                .total += 1;
        }
        for submission in submissions
            .iter()
            .filter(|submission| submission.status == SubmissionStatus::Verified)
        {
            if let Some(task) = self.catalog.fetch(&submission.task_id)? {
                progress
                    .entry(task.category.clone())
                    .or_insert_with(|| CategoryProgress::empty(&task.category))
                    .completed += 1;
            }
        }

        Ok(DashboardView {
            ledger,
            pending_review,
            category_progress: progress.into_values().collect(),
        })
    }

    fn load(&self, submission_id: &SubmissionId) -> Result<Submission, SubmissionServiceError> {
        self.repository
            .fetch(submission_id)?
            .ok_or_else(|| SubmissionServiceError::NotFound(submission_id.clone()))
    }

    fn settle_submission(
        &self,
        submission: &Submission,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, SubmissionServiceError> {
        if let Some(awarded_at) = submission.points_awarded_at {
            return Ok(SettlementOutcome::AlreadySettled { awarded_at });
        }
        if submission.status != SubmissionStatus::Verified {
            return Ok(SettlementOutcome::NotEligible {
                status: submission.status,
            });
        }

        let points = match self.catalog.fetch(&submission.task_id)? {
            Some(task) => task.base_points,
            None => {
                warn!(
                    submission_id = %submission.id,
                    task_id = %submission.task_id,
                    "task missing from catalog; settling with zero points"
                );
                0
            }
        };

        let outcome = self.repository.commit_settlement(SettlementCommand {
            submission_id: submission.id.clone(),
            points,
            awarded_at: now,
        })?;

        if let SettlementOutcome::Settled(receipt) = &outcome {
            info!(
                submission_id = %receipt.submission_id,
                user_id = %receipt.user_id,
                points = receipt.points_awarded,
                total_points = receipt.total_points,
                streak_days = receipt.streak.days,
                "submission settled"
            );
        }

        Ok(outcome)
    }

    fn publish_verified(
        &self,
        submission: &Submission,
        decision: VerificationDecision,
        now: DateTime<Utc>,
    ) {
        let mut payload = BTreeMap::new();
        payload.insert("final_status".to_string(), decision.label().to_string());

        let event = TaskEvent {
            kind: TaskEventKind::TaskVerified,
            submission_id: submission.id.clone(),
            task_id: submission.task_id.clone(),
            user_id: submission.user_id.clone(),
            payload,
            emitted_at: now,
        };

        if let Err(err) = self.events.publish(event) {
            warn!(submission_id = %submission.id, error = %err, "failed to publish task event");
        }
    }
}

/// Error raised by the submission service.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionServiceError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    #[error("task {task_id} already completed by submission {winner}")]
    TaskClosed {
        task_id: TaskId,
        winner: SubmissionId,
    },
    #[error("task already started or completed (submission {existing}, {status})")]
    AlreadyStarted {
        existing: SubmissionId,
        status: SubmissionStatus,
    },
    #[error("submission {0} not found")]
    NotFound(SubmissionId),
    #[error("no verification recorded for submission {0}")]
    VerificationNotFound(SubmissionId),
    #[error("submission {0} belongs to another user")]
    Forbidden(SubmissionId),
    #[error("cannot {action} a submission in status {status}")]
    WrongState {
        status: SubmissionStatus,
        action: &'static str,
    },
    #[error("submission {0} kept changing concurrently; retry the request")]
    Contention(SubmissionId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
