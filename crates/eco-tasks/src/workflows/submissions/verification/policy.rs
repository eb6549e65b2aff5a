use serde::{Deserialize, Serialize};

use super::config::VerificationConfig;

/// Outcome of the decision policy for one verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationDecision {
    Approved,
    ManualReview,
    Rejected,
}

impl VerificationDecision {
    pub const fn label(self) -> &'static str {
        match self {
            VerificationDecision::Approved => "approved",
            VerificationDecision::ManualReview => "manual_review",
            VerificationDecision::Rejected => "rejected",
        }
    }
}

/// Normalizes a scorer value: non-finite values count as absent, the rest
/// are clamped into `[0, 1]`.
pub fn unit_interval(value: Option<f64>) -> Option<f64> {
    value
        .filter(|raw| raw.is_finite())
        .map(|raw| raw.clamp(0.0, 1.0))
}

/// Maps scorer output onto a decision. Both bounds are inclusive.
pub(crate) fn decide_outcome(
    confidence: Option<f64>,
    fraud: Option<f64>,
    threshold: f64,
    config: &VerificationConfig,
) -> VerificationDecision {
    let Some(confidence) = unit_interval(confidence) else {
        return VerificationDecision::ManualReview;
    };
    let fraud = unit_interval(fraud);

    let high = threshold;
    let mid = (threshold - config.review_band).max(0.0);

    let fraud_clear = fraud.map_or(true, |score| score <= config.fraud_ceiling);
    if confidence >= high && fraud_clear {
        return VerificationDecision::Approved;
    }

    if confidence >= mid {
        return VerificationDecision::ManualReview;
    }

    VerificationDecision::Rejected
}
