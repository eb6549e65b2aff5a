use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.75;
pub const DEFAULT_REVIEW_BAND: f64 = 0.25;
pub const DEFAULT_FRAUD_CEILING: f64 = 0.30;
pub const DEFAULT_SCORER_TIMEOUT: Duration = Duration::from_millis(8_000);

/// Thresholds steering the decision policy and the scorer budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationConfig {
    pub default_min_confidence: f64,
    pub review_band: f64,
    pub fraud_ceiling: f64,
    #[serde(with = "duration_millis")]
    pub scorer_timeout: Duration,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            default_min_confidence: DEFAULT_MIN_CONFIDENCE,
            review_band: DEFAULT_REVIEW_BAND,
            fraud_ceiling: DEFAULT_FRAUD_CEILING,
            scorer_timeout: DEFAULT_SCORER_TIMEOUT,
        }
    }
}

impl VerificationConfig {
    /// Approval threshold for a task, falling back to the default when the
    /// task carries no usable override.
    pub fn threshold_for(&self, task_min_confidence: Option<f64>) -> f64 {
        task_min_confidence
            .filter(|value| value.is_finite() && (0.0..=1.0).contains(value))
            .unwrap_or(self.default_min_confidence)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
