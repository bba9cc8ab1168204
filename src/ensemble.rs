//! Stage-1 lightweight ensemble.
//!
//! Runs the fast predictors concurrently, combines their probabilities with
//! fixed weights and decides whether the pipeline may skip the expensive
//! Stage-2 analyzers entirely. Each predictor carries a tagged backend:
//! either a remote inference client or a local deterministic heuristic.
//! The choice is internal to the predictor and invisible to the combiner,
//! and tests can force either path.

use crate::config::Stage1Weights;
use crate::models::{CombinedPrediction, ScanTarget, StagePrediction};
use crate::provider::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Features extracted once per scan and shared by all predictors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Analyzable text: the URL itself or the message body
    pub text: String,
    /// Numeric features for the tabular predictor
    pub tabular: BTreeMap<String, f64>,
}

/// Derive the feature vector from a target. Deterministic: identical
/// targets always produce identical features.
pub fn extract_features(target: &ScanTarget) -> FeatureVector {
    let text = target.content.clone().unwrap_or_default();
    let mut tabular = BTreeMap::new();

    let len = text.len() as f64;
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count() as f64;
    let specials = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count() as f64;

    tabular.insert("length".to_string(), len);
    tabular.insert("digit_ratio".to_string(), if len > 0.0 { digits / len } else { 0.0 });
    tabular.insert(
        "special_ratio".to_string(),
        if len > 0.0 { specials / len } else { 0.0 },
    );
    tabular.insert("hyphens".to_string(), text.matches('-').count() as f64);
    tabular.insert("dots".to_string(), text.matches('.').count() as f64);
    tabular.insert(
        "has_https".to_string(),
        if text.starts_with("https://") { 1.0 } else { 0.0 },
    );

    FeatureVector { text, tabular }
}

/// Why one predictor produced no usable output. Recovered locally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PredictorFailure {
    #[error("predictor timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("inference backend error: {0}")]
    Backend(String),
}

/// Remote model-serving seam. The core never does network I/O itself; the
/// caller injects a client, and tests inject a mock.
pub trait InferenceClient: Send + Sync {
    fn infer<'a>(
        &'a self,
        model: &'a str,
        features: &'a FeatureVector,
    ) -> BoxFuture<'a, Result<f64, String>>;
}

/// Tagged backend variant: remote inference when an endpoint is configured,
/// a local deterministic heuristic otherwise.
#[derive(Clone)]
pub enum PredictorBackend {
    Remote(Arc<dyn InferenceClient>),
    Local,
}

/// A fast Stage-1 predictor.
pub trait StagePredictor: Send + Sync {
    fn model_name(&self) -> &str;

    fn predict<'a>(
        &'a self,
        features: &'a FeatureVector,
    ) -> BoxFuture<'a, Result<StagePrediction, PredictorFailure>>;
}

/// Self-assessed confidence: distance of the probability from 0.5.
pub fn self_confidence(probability: f64) -> f64 {
    ((probability - 0.5).abs() * 2.0).clamp(0.0, 1.0)
}

fn prediction(model: &str, probability: f64, started: Instant) -> StagePrediction {
    let probability = probability.clamp(0.0, 1.0);
    StagePrediction {
        model: model.to_string(),
        probability,
        confidence: self_confidence(probability),
        latency_ms: started.elapsed().as_millis() as u64,
    }
}

async fn backend_probability(
    backend: &PredictorBackend,
    model: &str,
    features: &FeatureVector,
    local: impl Fn(&FeatureVector) -> f64,
) -> Result<f64, PredictorFailure> {
    match backend {
        PredictorBackend::Remote(client) => client
            .infer(model, features)
            .await
            .map_err(PredictorFailure::Backend),
        PredictorBackend::Local => Ok(local(features)),
    }
}

/// Character-level lexical classifier. The local heuristic scores character
/// statistics that skew phishy: digit stuffing, punctuation density, very
/// long identifiers.
pub struct CharGramPredictor {
    backend: PredictorBackend,
}

impl CharGramPredictor {
    pub fn new(backend: PredictorBackend) -> Self {
        Self { backend }
    }

    fn local_score(features: &FeatureVector) -> f64 {
        let digit_ratio = features.tabular.get("digit_ratio").copied().unwrap_or(0.0);
        let special_ratio = features.tabular.get("special_ratio").copied().unwrap_or(0.0);
        let length = features.tabular.get("length").copied().unwrap_or(0.0);
        let hyphens = features.tabular.get("hyphens").copied().unwrap_or(0.0);

        let mut score = 0.1;
        score += digit_ratio * 1.2;
        score += (special_ratio - 0.1).max(0.0) * 1.5;
        score += (hyphens / 10.0).min(0.2);
        if length > 90.0 {
            score += 0.15;
        }
        score.clamp(0.0, 1.0)
    }
}

impl StagePredictor for CharGramPredictor {
    fn model_name(&self) -> &str {
        "lexical-char"
    }

    fn predict<'a>(
        &'a self,
        features: &'a FeatureVector,
    ) -> BoxFuture<'a, Result<StagePrediction, PredictorFailure>> {
        Box::pin(async move {
            let started = Instant::now();
            let p =
                backend_probability(&self.backend, self.model_name(), features, Self::local_score)
                    .await?;
            Ok(prediction(self.model_name(), p, started))
        })
    }
}

/// Token-sequence classifier. The local heuristic counts credential-bait
/// vocabulary in the target text.
pub struct TokenPredictor {
    backend: PredictorBackend,
}

const BAIT_TOKENS: &[&str] = &[
    "login", "verify", "secure", "account", "update", "confirm", "password", "billing",
    "suspend", "unlock", "wallet", "invoice", "urgent",
];

impl TokenPredictor {
    pub fn new(backend: PredictorBackend) -> Self {
        Self { backend }
    }

    fn local_score(features: &FeatureVector) -> f64 {
        let lower = features.text.to_lowercase();
        let hits = BAIT_TOKENS.iter().filter(|t| lower.contains(*t)).count();
        (0.08 + hits as f64 * 0.18).clamp(0.0, 1.0)
    }
}

impl StagePredictor for TokenPredictor {
    fn model_name(&self) -> &str {
        "lexical-token"
    }

    fn predict<'a>(
        &'a self,
        features: &'a FeatureVector,
    ) -> BoxFuture<'a, Result<StagePrediction, PredictorFailure>> {
        Box::pin(async move {
            let started = Instant::now();
            let p =
                backend_probability(&self.backend, self.model_name(), features, Self::local_score)
                    .await?;
            Ok(prediction(self.model_name(), p, started))
        })
    }
}

/// Tabular-feature classifier over the numeric feature map.
pub struct TabularPredictor {
    backend: PredictorBackend,
}

impl TabularPredictor {
    pub fn new(backend: PredictorBackend) -> Self {
        Self { backend }
    }

    fn local_score(features: &FeatureVector) -> f64 {
        let get = |k: &str| features.tabular.get(k).copied().unwrap_or(0.0);
        let mut score = 0.12;
        score += (get("dots") / 8.0).min(0.25);
        score += get("digit_ratio") * 0.8;
        score += (get("length") / 400.0).min(0.25);
        if get("has_https") == 0.0 && !features.text.is_empty() {
            score += 0.1;
        }
        score.clamp(0.0, 1.0)
    }
}

impl StagePredictor for TabularPredictor {
    fn model_name(&self) -> &str {
        "tabular"
    }

    fn predict<'a>(
        &'a self,
        features: &'a FeatureVector,
    ) -> BoxFuture<'a, Result<StagePrediction, PredictorFailure>> {
        Box::pin(async move {
            let started = Instant::now();
            let p =
                backend_probability(&self.backend, self.model_name(), features, Self::local_score)
                    .await?;
            Ok(prediction(self.model_name(), p, started))
        })
    }
}

/// Settled Stage-1 outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage1Result {
    pub combined: CombinedPrediction,
    pub members: Vec<StagePrediction>,
    /// True when combined confidence met the configured bar and Stage 2
    /// may be skipped
    pub should_exit: bool,
    /// True when every predictor failed and the neutral default was used
    pub degraded: bool,
}

/// Pure weighted combine. Weights are renormalized over the members that
/// actually settled, so a single predictor failure shifts weight instead of
/// shrinking the probability. Combined confidence is the exact minimum of
/// the members' confidences.
pub fn combine(members: &[(f64, StagePrediction)]) -> CombinedPrediction {
    if members.is_empty() {
        return CombinedPrediction::neutral();
    }
    let weight_sum: f64 = members.iter().map(|(w, _)| w).sum();
    if weight_sum <= 0.0 {
        return CombinedPrediction::neutral();
    }
    let probability = members
        .iter()
        .map(|(w, p)| w * p.probability)
        .sum::<f64>()
        / weight_sum;
    let confidence = members
        .iter()
        .map(|(_, p)| p.confidence)
        .fold(f64::INFINITY, f64::min);
    CombinedPrediction {
        probability,
        confidence,
    }
}

/// Launch all Stage-1 predictors, wait for all, combine, decide early exit.
pub async fn predict_stage1(
    features: &FeatureVector,
    predictors: &[Arc<dyn StagePredictor>],
    weights: &Stage1Weights,
    confidence_threshold: f64,
    timeout_ms: u64,
) -> Stage1Result {
    let budget = Duration::from_millis(timeout_ms);
    let mut tasks = tokio::task::JoinSet::new();

    for predictor in predictors {
        let predictor = Arc::clone(predictor);
        let features = features.clone();
        tasks.spawn(async move {
            let name = predictor.model_name().to_string();
            let outcome = match tokio::time::timeout(budget, predictor.predict(&features)).await {
                Ok(result) => result,
                Err(_) => Err(PredictorFailure::Timeout { ms: timeout_ms }),
            };
            (name, outcome)
        });
    }

    let mut members = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, Ok(p))) => {
                if let Some(weight) = weights.weight_for(&name) {
                    members.push((weight, p));
                } else {
                    log::warn!("stage-1 predictor '{}' has no configured weight, ignoring", name);
                }
            }
            Ok((name, Err(failure))) => {
                log::warn!("stage-1 predictor '{}' failed: {}", name, failure);
            }
            Err(e) => log::error!("stage-1 predictor task panicked: {}", e),
        }
    }
    members.sort_by(|a, b| a.1.model.cmp(&b.1.model));

    if members.is_empty() {
        // Degraded-but-safe: neutral and non-exiting, so the target always
        // routes to additional scrutiny rather than classifying as safe.
        log::warn!("all stage-1 predictors failed; using neutral prediction");
        return Stage1Result {
            combined: CombinedPrediction::neutral(),
            members: Vec::new(),
            should_exit: false,
            degraded: true,
        };
    }

    let combined = combine(&members);
    let should_exit = combined.confidence >= confidence_threshold;
    log::debug!(
        "stage-1 combined p={:.4} c={:.4} exit={}",
        combined.probability,
        combined.confidence,
        should_exit
    );

    Stage1Result {
        combined,
        members: members.into_iter().map(|(_, p)| p).collect(),
        should_exit,
        degraded: false,
    }
}
