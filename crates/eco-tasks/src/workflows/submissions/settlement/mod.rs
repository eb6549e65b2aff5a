//! Exactly-once crediting of verified submissions to the per-user ledger.
//!
//! The ledger increment and the submission's `points_awarded_at` marker are
//! committed by the store as one unit (`SubmissionRepository::commit_settlement`).

pub mod streak;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{SubmissionId, SubmissionStatus, UserId};
pub use streak::{advance_streak, next_streak, previous_day, utc_day, StreakUpdate};

/// Everything the store needs to settle one submission atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementCommand {
    pub submission_id: SubmissionId,
    pub points: u64,
    pub awarded_at: DateTime<Utc>,
}

/// Ledger credit applied for a single submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub submission_id: SubmissionId,
    pub user_id: UserId,
    pub points_awarded: u64,
    pub total_points: u64,
    pub tasks_completed: u64,
    pub streak: StreakUpdate,
    pub awarded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Settled(SettlementReceipt),
    AlreadySettled { awarded_at: DateTime<Utc> },
    NotEligible { status: SubmissionStatus },
}

impl SettlementOutcome {
    pub fn receipt(&self) -> Option<&SettlementReceipt> {
        match self {
            SettlementOutcome::Settled(receipt) => Some(receipt),
            _ => None,
        }
    }

    pub fn points_awarded(&self) -> Option<u64> {
        self.receipt().map(|receipt| receipt.points_awarded)
    }

    pub fn total_points(&self) -> Option<u64> {
        self.receipt().map(|receipt| receipt.total_points)
    }
}
