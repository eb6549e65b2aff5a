use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::settlement::streak::{advance_streak, StreakUpdate};
use super::verification::VerificationDecision;

/// Identifier wrapper for catalog tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

/// Identifier wrapper for users known to the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Identifier wrapper for submissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubmissionId(pub String);

macro_rules! display_id {
    ($($name:ident),*) => {
        $(impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

display_id!(TaskId, UserId, SubmissionId);

/// Read-only catalog entry owned by the task catalog service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    pub title: String,
    pub category: String,
    pub base_points: u64,
    pub min_confidence: Option<f64>,
    pub is_active: bool,
}

/// Optional geolocation attached to evidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Returns `None` unless both coordinates are finite and within range.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }
}

/// Caller-supplied evidence before it is stamped onto a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceDraft {
    #[serde(default)]
    pub image_refs: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub location_text: String,
}

/// Evidence as stored on a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub image_refs: Vec<String>,
    pub description: String,
    pub location: Option<GeoPoint>,
    pub location_text: String,
    pub submitted_at: DateTime<Utc>,
}

impl Evidence {
    pub fn from_draft(draft: EvidenceDraft, submitted_at: DateTime<Utc>) -> Self {
        let image_refs = draft
            .image_refs
            .into_iter()
            .map(|reference| reference.trim().to_string())
            .filter(|reference| !reference.is_empty())
            .collect();

        Self {
            image_refs,
            description: draft.description.trim().to_string(),
            location: draft
                .location
                .and_then(|point| GeoPoint::new(point.latitude, point.longitude)),
            location_text: draft.location_text.trim().to_string(),
            submitted_at,
        }
    }

    pub fn has_images(&self) -> bool {
        !self.image_refs.is_empty()
    }
}

/// Lifecycle status of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    PendingVerification,
    ManualReview,
    Verified,
    Rejected,
}

impl SubmissionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::PendingVerification => "pending_verification",
            SubmissionStatus::ManualReview => "manual_review",
            SubmissionStatus::Verified => "verified",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "pending_verification" => Some(Self::PendingVerification),
            "manual_review" => Some(Self::ManualReview),
            "verified" => Some(Self::Verified),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// A user holding a submission in one of these states may not start the task again.
    pub const fn blocks_restart(self) -> bool {
        !matches!(self, SubmissionStatus::Rejected)
    }

    /// States from which a decision pass may run.
    pub const fn accepts_decision(self) -> bool {
        matches!(
            self,
            SubmissionStatus::PendingVerification | SubmissionStatus::ManualReview
        )
    }

    /// Submissions the owner is still waiting on before any decision was made.
    pub const fn awaiting_review(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Pending | SubmissionStatus::PendingVerification
        )
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<VerificationDecision> for SubmissionStatus {
    fn from(decision: VerificationDecision) -> Self {
        match decision {
            VerificationDecision::Approved => SubmissionStatus::Verified,
            VerificationDecision::ManualReview => SubmissionStatus::ManualReview,
            VerificationDecision::Rejected => SubmissionStatus::Rejected,
        }
    }
}

/// Snapshot of the most recent decision pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSnapshot {
    pub confidence: Option<f64>,
    pub fraud_score: Option<f64>,
    pub flags: Vec<String>,
    pub decision: VerificationDecision,
    pub decided_at: DateTime<Utc>,
}

/// One user's attempt at one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub status: SubmissionStatus,
    pub evidence: Option<Evidence>,
    pub verification: Option<VerificationSnapshot>,
    pub points_awarded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every successful write.
    pub version: u64,
}

impl Submission {
    pub fn new(
        id: SubmissionId,
        task_id: TaskId,
        user_id: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            user_id,
            status: SubmissionStatus::Pending,
            evidence: None,
            verification: None,
            points_awarded_at: None,
            created_at,
            updated_at: created_at,
            version: 0,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.points_awarded_at.is_some()
    }

    /// Verified and still owed its ledger credit.
    pub fn awaiting_settlement(&self) -> bool {
        self.status == SubmissionStatus::Verified && !self.is_settled()
    }

    pub fn status_view(&self) -> SubmissionStatusView {
        SubmissionStatusView {
            submission_id: self.id.clone(),
            task_id: self.task_id.clone(),
            user_id: self.user_id.clone(),
            status: self.status.label(),
            decision: self
                .verification
                .as_ref()
                .map(|snapshot| snapshot.decision.label()),
            flags: self
                .verification
                .as_ref()
                .map(|snapshot| snapshot.flags.clone())
                .unwrap_or_default(),
            points_awarded_at: self.points_awarded_at,
            updated_at: self.updated_at,
        }
    }
}

/// Sanitized representation of a submission for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionStatusView {
    pub submission_id: SubmissionId,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<&'static str>,
    pub flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_awarded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user settlement ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserScore {
    pub user_id: UserId,
    pub total_points: u64,
    pub tasks_completed: u64,
    pub streak_days: u32,
    pub streak_last_date: Option<NaiveDate>,
    pub streak_best_days: u32,
}

impl UserScore {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            total_points: 0,
            tasks_completed: 0,
            streak_days: 0,
            streak_last_date: None,
            streak_best_days: 0,
        }
    }

    /// Credits one settled submission worth `points` on `today`.
    pub fn apply_settlement(&mut self, points: u64, today: NaiveDate) -> StreakUpdate {
        let update = advance_streak(
            self.streak_last_date,
            self.streak_days,
            self.streak_best_days,
            today,
        );

        self.total_points = self.total_points.saturating_add(points);
        self.tasks_completed = self.tasks_completed.saturating_add(1);
        self.streak_days = update.days;
        self.streak_last_date = Some(today);
        self.streak_best_days = update.best;

        update
    }

    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            total_points: self.total_points,
            tasks_completed: self.tasks_completed,
            streak_days: self.streak_days,
            streak_best_days: self.streak_best_days,
        }
    }
}

/// Ledger figures read by leaderboards and dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total_points: u64,
    pub tasks_completed: u64,
    pub streak_days: u32,
    pub streak_best_days: u32,
}
