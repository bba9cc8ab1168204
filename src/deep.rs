//! Stage-2 deep analyzer invoker.
//!
//! Runs the expensive predictors (persuasion-tactic detection, visual
//! classification) only when Stage 1 was not confident enough, under a
//! longer timeout budget. If Stage 2 cannot complete at all, the pipeline
//! falls back to the Stage-1 combined result instead of blocking.

use crate::config::Stage2Weights;
use crate::ensemble::{self, FeatureVector, InferenceClient, PredictorFailure, Stage1Result};
use crate::models::{CombinedPrediction, Finding, FindingOrigin, ScanTarget, StagePrediction};
use crate::provider::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A deep prediction carries structured evidence alongside the probability.
#[derive(Debug, Clone, PartialEq)]
pub struct DeepPrediction {
    pub prediction: StagePrediction,
    pub findings: Vec<Finding>,
}

/// An expensive Stage-2 predictor.
pub trait DeepPredictor: Send + Sync {
    fn model_name(&self) -> &str;

    fn predict<'a>(
        &'a self,
        target: &'a ScanTarget,
        features: &'a FeatureVector,
    ) -> BoxFuture<'a, Result<DeepPrediction, PredictorFailure>>;
}

/// Settled Stage-2 outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage2Result {
    pub combined: CombinedPrediction,
    pub members: Vec<StagePrediction>,
    pub findings: Vec<Finding>,
    /// True when every deep predictor failed and the Stage-1 combined
    /// result was carried forward
    pub fell_back: bool,
}

/// Launch all deep predictors, wait for all, combine. Total failure falls
/// back to the Stage-1 combined result.
pub async fn predict_stage2(
    target: &ScanTarget,
    features: &FeatureVector,
    predictors: &[Arc<dyn DeepPredictor>],
    weights: &Stage2Weights,
    stage1: &Stage1Result,
    timeout_ms: u64,
) -> Stage2Result {
    let budget = Duration::from_millis(timeout_ms);
    let mut tasks = tokio::task::JoinSet::new();

    for predictor in predictors {
        let predictor = Arc::clone(predictor);
        let target = target.clone();
        let features = features.clone();
        tasks.spawn(async move {
            let name = predictor.model_name().to_string();
            let outcome =
                match tokio::time::timeout(budget, predictor.predict(&target, &features)).await {
                    Ok(result) => result,
                    Err(_) => Err(PredictorFailure::Timeout { ms: timeout_ms }),
                };
            (name, outcome)
        });
    }

    let mut members = Vec::new();
    let mut findings = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, Ok(deep))) => {
                if let Some(weight) = weights.weight_for(&name) {
                    members.push((weight, deep.prediction));
                    findings.extend(deep.findings);
                } else {
                    log::warn!("stage-2 predictor '{}' has no configured weight, ignoring", name);
                }
            }
            Ok((name, Err(failure))) => {
                log::warn!("stage-2 predictor '{}' failed: {}", name, failure);
            }
            Err(e) => log::error!("stage-2 predictor task panicked: {}", e),
        }
    }
    members.sort_by(|a, b| a.1.model.cmp(&b.1.model));
    findings.sort_by(|a, b| a.category.cmp(&b.category));

    if members.is_empty() {
        log::warn!("all stage-2 predictors failed; falling back to stage-1 result");
        return Stage2Result {
            combined: stage1.combined,
            members: Vec::new(),
            findings: vec![Finding::new(
                FindingOrigin::Stage2,
                "stage2_fallback",
                "deep analysis unavailable; stage-1 combined result carried forward",
            )],
            fell_back: true,
        };
    }

    let combined = ensemble::combine(&members);
    Stage2Result {
        combined,
        members: members.into_iter().map(|(_, p)| p).collect(),
        findings,
        fell_back: false,
    }
}

/// Persuasion-tactic detector over the target text. Local and
/// deterministic: matches vocabulary groups for the classic social
/// engineering levers and reports each detected tactic as evidence.
pub struct PersuasionPredictor {
    tactics: Vec<(&'static str, Regex)>,
}

impl PersuasionPredictor {
    pub fn new() -> crate::errors::ScanResult<Self> {
        let groups: [(&str, &str); 5] = [
            ("urgency", r"(?i)\b(urgent|immediately|within 24 hours|act now|expires?)\b"),
            ("fear", r"(?i)\b(suspended|locked|unauthori[sz]ed|breach|deleted)\b"),
            ("authority", r"(?i)\b(security (team|department)|bank|government|support desk)\b"),
            ("scarcity", r"(?i)\b(limited|last chance|only \d+ (left|remaining))\b"),
            ("reward", r"(?i)\b(winner|prize|reward|refund|free gift)\b"),
        ];
        let mut tactics = Vec::with_capacity(groups.len());
        for (name, pattern) in groups {
            let re = Regex::new(pattern).map_err(|e| crate::errors::ScanError::regex(e, pattern))?;
            tactics.push((name, re));
        }
        Ok(Self { tactics })
    }

    fn detect(&self, text: &str) -> Vec<&'static str> {
        self.tactics
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(name, _)| *name)
            .collect()
    }
}

impl DeepPredictor for PersuasionPredictor {
    fn model_name(&self) -> &str {
        "persuasion"
    }

    fn predict<'a>(
        &'a self,
        _target: &'a ScanTarget,
        features: &'a FeatureVector,
    ) -> BoxFuture<'a, Result<DeepPrediction, PredictorFailure>> {
        Box::pin(async move {
            let started = Instant::now();
            let detected = self.detect(&features.text);
            let probability = (0.1 + detected.len() as f64 * 0.22).clamp(0.0, 1.0);
            let findings = detected
                .iter()
                .map(|tactic| {
                    Finding::new(
                        FindingOrigin::Stage2,
                        "persuasion_tactic",
                        format!("{} language detected", tactic),
                    )
                })
                .collect();
            Ok(DeepPrediction {
                prediction: StagePrediction {
                    model: self.model_name().to_string(),
                    probability,
                    confidence: ensemble::self_confidence(probability),
                    latency_ms: started.elapsed().as_millis() as u64,
                },
                findings,
            })
        })
    }
}

/// Visual classifier over a rendered screenshot. Inference is always
/// remote (there is no local stand-in for a vision model); with no client
/// the predictor reports itself unavailable and Stage 2 degrades.
pub struct VisualPredictor {
    client: Option<Arc<dyn InferenceClient>>,
}

impl VisualPredictor {
    pub fn new(client: Option<Arc<dyn InferenceClient>>) -> Self {
        Self { client }
    }
}

impl DeepPredictor for VisualPredictor {
    fn model_name(&self) -> &str {
        "visual"
    }

    fn predict<'a>(
        &'a self,
        _target: &'a ScanTarget,
        features: &'a FeatureVector,
    ) -> BoxFuture<'a, Result<DeepPrediction, PredictorFailure>> {
        Box::pin(async move {
            let client = self.client.as_ref().ok_or_else(|| {
                PredictorFailure::Backend("no visual inference endpoint configured".to_string())
            })?;
            let started = Instant::now();
            let probability = client
                .infer(self.model_name(), features)
                .await
                .map_err(PredictorFailure::Backend)?
                .clamp(0.0, 1.0);
            let mut findings = Vec::new();
            if probability >= 0.8 {
                findings.push(Finding::new(
                    FindingOrigin::Stage2,
                    "fake_login_page",
                    "rendered page resembles a credential harvesting form",
                ));
            }
            Ok(DeepPrediction {
                prediction: StagePrediction {
                    model: self.model_name().to_string(),
                    probability,
                    confidence: ensemble::self_confidence(probability),
                    latency_ms: started.elapsed().as_millis() as u64,
                },
                findings,
            })
        })
    }
}
