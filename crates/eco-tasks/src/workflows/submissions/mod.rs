//! Task submission lifecycle: evidence intake, verification decisions, and
//! exactly-once reward settlement.

pub mod domain;
pub mod memory;
pub mod repository;
pub mod router;
pub mod service;
pub mod settlement;
pub mod verification;

#[cfg(test)]
mod tests;

pub use domain::{
    Evidence, EvidenceDraft, GeoPoint, LedgerSummary, Submission, SubmissionId, SubmissionStatus,
    SubmissionStatusView, TaskDefinition, TaskId, UserId, UserScore, VerificationSnapshot,
};
pub use memory::{InMemorySubmissionStore, InMemoryTaskCatalog};
pub use repository::{
    DiscardEvents, EventError, EventPublisher, RepositoryError, Reviewer, SubmissionRepository,
    TaskCatalog, TaskEvent, TaskEventKind, VerificationRecord,
};
pub use router::submission_router;
pub use service::{
    CategoryProgress, DashboardView, DecisionOutcome, SubmissionService, SubmissionServiceError,
    TaskListing,
};
pub use settlement::{SettlementOutcome, SettlementReceipt, StreakUpdate};
pub use verification::{
    DecisionPolicy, EvidenceImage, EvidenceScorer, HeuristicScorer, ScoreSignals, ScorerError,
    VerificationConfig, VerificationDecision,
};
