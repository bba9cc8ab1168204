//! Scan pipeline orchestration.
//!
//! One scan is a bounded tree of short-lived concurrent tasks: the check
//! fan-out and the Stage-1 ensemble run side by side, Stage 2 runs only
//! when Stage 1 is not confident enough, then the policy engine and the
//! branch threshold classifier turn the combined evidence into the final
//! verdict. There is no shared mutable state across scans; the config
//! snapshot is immutable for the scan's duration.

use crate::aggregate::{self, AggregateResult};
use crate::config::ConfigSnapshot;
use crate::deep::{self, DeepPredictor, Stage2Result};
use crate::ensemble::{self, StagePredictor, Stage1Result};
use crate::errors::{ScanError, ScanResult};
use crate::models::{
    Branch, CombinedPrediction, FinalVerdict, PolicyOverride, RiskLevel, ScanTarget,
};
use crate::policy::{self, PolicyEvidence, RuleAction};
use crate::provider::CheckProvider;
use crate::thresholds::ThresholdSet;
use crate::verdict;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;

/// Typed capability registry, populated at startup. Providers and
/// predictors are trait objects resolved once, never dispatched by name at
/// scan time.
#[derive(Default)]
pub struct ScanPipeline {
    providers: Vec<Arc<dyn CheckProvider>>,
    stage1: Vec<Arc<dyn StagePredictor>>,
    stage2: Vec<Arc<dyn DeepPredictor>>,
}

impl ScanPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&mut self, provider: Arc<dyn CheckProvider>) -> &mut Self {
        log::info!("registering check provider '{}'", provider.name());
        self.providers.push(provider);
        self
    }

    pub fn register_stage1(&mut self, predictor: Arc<dyn StagePredictor>) -> &mut Self {
        log::info!("registering stage-1 predictor '{}'", predictor.model_name());
        self.stage1.push(predictor);
        self
    }

    pub fn register_stage2(&mut self, predictor: Arc<dyn DeepPredictor>) -> &mut Self {
        log::info!("registering stage-2 predictor '{}'", predictor.model_name());
        self.stage2.push(predictor);
        self
    }

    /// Run one scan to a final verdict.
    ///
    /// The snapshot is validated up front: configuration problems are
    /// fatal before any fan-out launches. Provider and predictor failures
    /// inside the scan are absorbed with neutral defaults and surface only
    /// as degradation findings.
    pub async fn run_scan(
        &self,
        target: &ScanTarget,
        snapshot: &ConfigSnapshot,
    ) -> ScanResult<FinalVerdict> {
        snapshot.validate()?;
        let branch = target.branch;
        log::info!("scanning {} (branch {})", target.id, branch);

        let ml_eligible = self.ml_eligible(branch);

        // Checks and the fast ensemble fan out together; aggregation waits
        // for every member to settle before proceeding.
        let aggregate_fut = aggregate::aggregate(
            target,
            &self.providers,
            snapshot.provider_timeout_ms,
        );
        let stage1_fut = async {
            if !ml_eligible {
                return None;
            }
            let features = ensemble::extract_features(target);
            Some(
                ensemble::predict_stage1(
                    &features,
                    &self.stage1,
                    &snapshot.stage1_weights,
                    snapshot.confidence_threshold,
                    snapshot.stage1_timeout_ms,
                )
                .await,
            )
        };
        let (aggregate_result, stage1_result) = tokio::join!(aggregate_fut, stage1_fut);

        let stage2_result = match &stage1_result {
            Some(s1) if !s1.should_exit && !self.stage2.is_empty() => {
                let features = ensemble::extract_features(target);
                Some(
                    deep::predict_stage2(
                        target,
                        &features,
                        &self.stage2,
                        &snapshot.stage2_weights,
                        s1,
                        snapshot.stage2_timeout_ms,
                    )
                    .await,
                )
            }
            Some(s1) if s1.should_exit => {
                log::debug!("stage-1 confidence met the bar; skipping stage 2");
                None
            }
            _ => None,
        };

        Ok(self.settle_verdict(
            target,
            snapshot,
            aggregate_result,
            stage1_result,
            stage2_result,
        ))
    }

    /// Race a scan against a caller-supplied cancellation future (e.g. a
    /// client disconnect). Dropping the scan future aborts all in-flight
    /// provider and predictor tasks; the caller gets a distinguishable
    /// cancelled outcome, never a half-built verdict.
    pub async fn run_scan_cancellable<F>(
        &self,
        target: &ScanTarget,
        snapshot: &ConfigSnapshot,
        cancel: F,
    ) -> ScanResult<FinalVerdict>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run_scan(target, snapshot) => result,
            _ = cancel => {
                log::warn!("scan of {} cancelled by caller", target.id);
                Err(ScanError::Cancelled)
            }
        }
    }

    fn ml_eligible(&self, branch: Branch) -> bool {
        // Only branches with live content to model run the ensembles; the
        // rest classify on check points alone.
        matches!(branch, Branch::Online | Branch::WafChallenge) && !self.stage1.is_empty()
    }

    fn settle_verdict(
        &self,
        target: &ScanTarget,
        snapshot: &ConfigSnapshot,
        aggregate_result: AggregateResult,
        stage1_result: Option<Stage1Result>,
        stage2_result: Option<Stage2Result>,
    ) -> FinalVerdict {
        // The best probability-shaped estimate available for this branch.
        let combined: CombinedPrediction = match (&stage2_result, &stage1_result) {
            (Some(s2), _) => s2.combined,
            (None, Some(s1)) => s1.combined,
            (None, None) => CombinedPrediction {
                probability: aggregate_result.score_ratio(),
                confidence: 1.0,
            },
        };

        // ONLINE and WAF_CHALLENGE threshold sets are probability-shaped,
        // so those branches always classify the probability estimate (the
        // point ratio when no ensembles ran); the rest classify the
        // aggregate point total.
        let mut value = if stage1_result.is_some()
            || matches!(target.branch, Branch::Online | Branch::WafChallenge)
        {
            combined.probability
        } else {
            aggregate_result.risk_score as f64
        };

        let evidence = PolicyEvidence {
            branch: target.branch,
            aggregate_points: Some(aggregate_result.risk_score),
            probability: combined.probability,
            finding_categories: aggregate_result
                .findings
                .iter()
                .map(|f| f.category.clone())
                .chain(
                    stage1_result
                        .iter()
                        .filter(|s| s.degraded)
                        .map(|_| "stage1_degraded".to_string()),
                )
                .chain(
                    stage2_result
                        .iter()
                        .flat_map(|s| s.findings.iter().map(|f| f.category.clone())),
                )
                .collect(),
        };

        let matched = policy::apply_policies(&evidence, &snapshot.rules);
        let thresholds: &ThresholdSet = snapshot.thresholds.for_branch(target.branch);

        let mut forced_level = None;
        let mut floor_level = None;
        let policy_override = matched.map(|fired| {
            let mut adjusted_score = None;
            match fired.action {
                RuleAction::ForceLevel { level } => forced_level = Some(*level),
                RuleAction::FloorLevel { level } => floor_level = Some(*level),
                RuleAction::SetScore { value: v } => {
                    value = *v;
                    adjusted_score = Some(*v);
                }
                RuleAction::AdjustScore { delta } => {
                    value += delta;
                    adjusted_score = Some(value);
                }
            }
            PolicyOverride {
                rule: fired.name.to_string(),
                priority: fired.priority,
                forced_level,
                adjusted_score,
            }
        });

        let risk_level = match (forced_level, floor_level) {
            (Some(forced), _) => forced,
            (None, Some(floor)) => thresholds.classify(value).max(floor),
            (None, None) => thresholds.classify(value),
        };

        verdict::assemble(
            target,
            Some(&aggregate_result),
            stage1_result.as_ref(),
            stage2_result.as_ref(),
            policy_override,
            risk_level,
            combined,
            Utc::now(),
        )
    }
}
