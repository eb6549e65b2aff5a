use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::policy::unit_interval;
use super::{
    ScoreSignals, FLAG_FRAUD_CHECK_UNAVAILABLE, FLAG_IMAGE_RECEIVED, FLAG_MISSING_IMAGE,
    FLAG_SCORER_UNAVAILABLE,
};

const FALLBACK_MIME_TYPE: &str = "image/jpeg";

/// Image payload handed to the evidence scorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceImage {
    pub reference: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl EvidenceImage {
    pub fn new(reference: impl Into<String>, bytes: Vec<u8>) -> Self {
        let reference = reference.into();
        let mime_type = guess_mime_type(&reference);
        Self {
            reference,
            mime_type,
            bytes,
        }
    }

    /// Image known only by its storage reference, for scorers that fetch it themselves.
    pub fn reference_only(reference: impl Into<String>) -> Self {
        Self::new(reference, Vec::new())
    }
}

/// Content type for an image reference, defaulting to JPEG when the
/// extension is unknown or not an image.
pub fn guess_mime_type(reference: &str) -> String {
    mime_guess::from_path(reference)
        .first_raw()
        .filter(|mime| mime.starts_with("image/"))
        .unwrap_or(FALLBACK_MIME_TYPE)
        .to_string()
}

/// Evidence and claim text for one scoring pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoringRequest {
    pub image: Option<EvidenceImage>,
    pub claim: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReport {
    pub confidence: f64,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FraudReport {
    pub fraud: f64,
    pub explanation: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("scorer unavailable: {0}")]
    Unavailable(String),
    #[error("scorer returned malformed output: {0}")]
    Malformed(String),
    #[error("scorer did not answer within {0:?}")]
    TimedOut(Duration),
}

/// External oracle assessing submitted evidence. Treated as untrusted and slow.
#[async_trait]
pub trait EvidenceScorer: Send + Sync {
    /// Semantic consistency between the image and the claim.
    async fn score(
        &self,
        image: Option<&EvidenceImage>,
        claim: &str,
    ) -> Result<ScoreReport, ScorerError>;

    /// Likelihood that the image is staged, manipulated, or sourced elsewhere.
    async fn fraud_score(
        &self,
        image: Option<&EvidenceImage>,
        description: &str,
    ) -> Result<FraudReport, ScorerError>;
}

/// Extracts `field` and `explanation` from a model response.
///
/// Accepts a bare JSON object or text wrapping one; the numeric field is
/// clamped to `[0, 1]`.
pub fn parse_scorer_payload(text: &str, field: &str) -> Result<(f64, String), ScorerError> {
    let parsed = serde_json::from_str::<Value>(text)
        .ok()
        .filter(Value::is_object)
        .or_else(|| {
            let start = text.find('{')?;
            let end = text.rfind('}')?;
            if end <= start {
                return None;
            }
            serde_json::from_str::<Value>(&text[start..=end])
                .ok()
                .filter(Value::is_object)
        })
        .ok_or_else(|| ScorerError::Malformed("response is not a JSON object".to_string()))?;

    let score = parsed
        .get(field)
        .and_then(Value::as_f64)
        .and_then(|value| unit_interval(Some(value)))
        .ok_or_else(|| ScorerError::Malformed(format!("missing numeric `{field}`")))?;

    let explanation = parsed
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok((score, explanation))
}

/// Stand-in scorer used until a model is wired in: trusts the presence of an image.
#[derive(Debug, Clone)]
pub struct HeuristicScorer {
    pub with_image: f64,
    pub without_image: f64,
    pub fraud: f64,
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self {
            with_image: 0.8,
            without_image: 0.3,
            fraud: 0.1,
        }
    }
}

#[async_trait]
impl EvidenceScorer for HeuristicScorer {
    async fn score(
        &self,
        image: Option<&EvidenceImage>,
        _claim: &str,
    ) -> Result<ScoreReport, ScorerError> {
        let (confidence, explanation) = match image {
            Some(_) => (self.with_image, "image received"),
            None => (self.without_image, "no image supplied"),
        };
        Ok(ScoreReport {
            confidence,
            explanation: explanation.to_string(),
        })
    }

    async fn fraud_score(
        &self,
        _image: Option<&EvidenceImage>,
        _description: &str,
    ) -> Result<FraudReport, ScorerError> {
        Ok(FraudReport {
            fraud: self.fraud,
            explanation: "no manipulation heuristics applied".to_string(),
        })
    }
}

/// Runs both scorer calls concurrently under a deadline and folds failures
/// into absent values.
#[derive(Clone)]
pub struct ScoringGateway {
    scorer: Arc<dyn EvidenceScorer>,
    deadline: Duration,
}

impl ScoringGateway {
    pub fn new(scorer: Arc<dyn EvidenceScorer>, deadline: Duration) -> Self {
        Self { scorer, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn assess(&self, request: &ScoringRequest) -> ScoreSignals {
        let image = request.image.as_ref();
        let (score, fraud) = tokio::join!(
            timeout(self.deadline, self.scorer.score(image, &request.claim)),
            timeout(
                self.deadline,
                self.scorer.fraud_score(image, &request.description)
            ),
        );

        let mut flags = vec![if image.is_some() {
            FLAG_IMAGE_RECEIVED
        } else {
            FLAG_MISSING_IMAGE
        }
        .to_string()];

        let confidence = match score.unwrap_or(Err(ScorerError::TimedOut(self.deadline))) {
            Ok(report) => unit_interval(Some(report.confidence)),
            Err(err) => {
                warn!(error = %err, "confidence scoring failed");
                None
            }
        };
        if confidence.is_none() {
            flags.push(FLAG_SCORER_UNAVAILABLE.to_string());
        }

        let fraud = match fraud.unwrap_or(Err(ScorerError::TimedOut(self.deadline))) {
            Ok(report) => unit_interval(Some(report.fraud)),
            Err(err) => {
                warn!(error = %err, "fraud scoring failed");
                None
            }
        };
        if fraud.is_none() {
            flags.push(FLAG_FRAUD_CHECK_UNAVAILABLE.to_string());
        }

        debug!(?confidence, ?fraud, "evidence assessed");
        ScoreSignals::new(confidence, fraud, flags)
    }
}
