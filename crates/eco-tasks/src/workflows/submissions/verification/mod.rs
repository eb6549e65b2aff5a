mod config;
mod policy;
pub mod scorer;

pub use config::{
    VerificationConfig, DEFAULT_FRAUD_CEILING, DEFAULT_MIN_CONFIDENCE, DEFAULT_REVIEW_BAND,
    DEFAULT_SCORER_TIMEOUT,
};
pub use policy::{unit_interval, VerificationDecision};
pub use scorer::{
    EvidenceImage, EvidenceScorer, FraudReport, HeuristicScorer, ScoreReport, ScorerError,
    ScoringGateway, ScoringRequest,
};

use policy::decide_outcome;
use serde::{Deserialize, Serialize};

pub const FLAG_IMAGE_RECEIVED: &str = "image_received";
pub const FLAG_MISSING_IMAGE: &str = "missing_image";
pub const FLAG_SCORER_UNAVAILABLE: &str = "scorer_unavailable";
pub const FLAG_FRAUD_CHECK_UNAVAILABLE: &str = "fraud_check_unavailable";

/// Scorer output for one verification pass, after normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSignals {
    pub confidence: Option<f64>,
    pub fraud: Option<f64>,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl ScoreSignals {
    pub fn new(confidence: Option<f64>, fraud: Option<f64>, flags: Vec<String>) -> Self {
        let mut flags: Vec<String> = flags
            .into_iter()
            .map(|flag| flag.trim().to_string())
            .filter(|flag| !flag.is_empty())
            .collect();
        flags.sort();
        flags.dedup();

        Self {
            confidence: unit_interval(confidence),
            fraud: unit_interval(fraud),
            flags,
        }
    }
}

/// Stateless policy applying the configured thresholds to scorer output.
#[derive(Debug, Clone, Default)]
pub struct DecisionPolicy {
    config: VerificationConfig,
}

impl DecisionPolicy {
    pub fn new(config: VerificationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    pub fn decide(
        &self,
        signals: &ScoreSignals,
        task_min_confidence: Option<f64>,
    ) -> VerificationDecision {
        let threshold = self.config.threshold_for(task_min_confidence);
        decide_outcome(signals.confidence, signals.fraud, threshold, &self.config)
    }
}
