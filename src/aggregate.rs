//! Fan-out check aggregator.
//!
//! Runs every registered check provider concurrently against one target,
//! each under its own timeout, and sums the settled results into a
//! point-based score. A single provider's failure never fails the scan:
//! the failed member is replaced by its zero-score default and the
//! substitution is noted in the findings. Aggregation only proceeds after
//! every member has settled.

use crate::models::{CheckResult, Finding, FindingOrigin, RiskLevel, ScanTarget};
use crate::provider::{CheckFailure, CheckProvider};
use crate::thresholds::ThresholdSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Settled outcome of one check fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Sum of provider scores (points, not a probability)
    pub risk_score: u32,
    /// Sum of declared provider maxima
    pub max_score: u32,
    /// Fixed-ladder classification of `risk_score`
    pub level: RiskLevel,
    pub findings: Vec<Finding>,
    /// Provider evidence, keys namespaced as `<provider>.<key>`
    pub evidence: BTreeMap<String, String>,
    pub failed_providers: Vec<String>,
}

impl AggregateResult {
    /// `risk_score / max_score` clamped to `[0, 1]`, for branches that feed
    /// the point total into probability-shaped evidence.
    pub fn score_ratio(&self) -> f64 {
        if self.max_score == 0 {
            0.0
        } else {
            (self.risk_score as f64 / self.max_score as f64).min(1.0)
        }
    }
}

/// Pure defaulting step between fan-out and aggregation: a failed provider
/// becomes its zero-score default plus a degradation finding. Keeping this
/// a single function keeps the substitution policy testable on its own.
pub fn settle(
    provider: &str,
    declared_max: u32,
    outcome: Result<CheckResult, CheckFailure>,
) -> (CheckResult, bool) {
    match outcome {
        Ok(result) => (result, false),
        Err(failure) => {
            log::warn!("check provider '{}' failed: {}", provider, failure);
            let mut defaulted = CheckResult::defaulted(provider, declared_max);
            defaulted.findings.push(Finding::new(
                FindingOrigin::Check(provider.to_string()),
                "provider_failure",
                format!("{}; zero-score default substituted", failure),
            ));
            (defaulted, true)
        }
    }
}

/// Launch all providers, wait for all to settle, sum and classify.
pub async fn aggregate(
    target: &ScanTarget,
    providers: &[Arc<dyn CheckProvider>],
    timeout_ms: u64,
) -> AggregateResult {
    let budget = Duration::from_millis(timeout_ms);
    let mut tasks = tokio::task::JoinSet::new();

    for provider in providers {
        let provider = Arc::clone(provider);
        let target = target.clone();
        tasks.spawn(async move {
            let name = provider.name().to_string();
            let declared_max = provider.max_score();
            let outcome = match tokio::time::timeout(budget, provider.evaluate(&target)).await {
                Ok(result) => result,
                Err(_) => Err(CheckFailure::Timeout { ms: timeout_ms }),
            };
            (name, declared_max, outcome)
        });
    }

    let mut settled = Vec::with_capacity(providers.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(entry) => settled.push(entry),
            // A panicking provider task is treated like any other failure,
            // but we cannot recover its name from the join error alone.
            Err(e) => log::error!("check provider task panicked: {}", e),
        }
    }
    // Join order is completion order; sort for a stable findings list.
    settled.sort_by(|a, b| a.0.cmp(&b.0));

    let mut risk_score: u32 = 0;
    let mut max_score: u32 = 0;
    let mut findings = Vec::new();
    let mut evidence = BTreeMap::new();
    let mut failed_providers = Vec::new();

    for (name, declared_max, outcome) in settled {
        let (result, failed) = settle(&name, declared_max, outcome);
        risk_score += result.score;
        max_score += result.max_score;
        for (key, value) in result.evidence {
            evidence.insert(format!("{}.{}", name, key), value);
        }
        findings.extend(result.findings);
        if failed {
            failed_providers.push(name);
        }
    }

    let level = ThresholdSet::point_ladder().classify(risk_score as f64);
    log::debug!(
        "aggregate for {}: {}/{} points, level {}, {} failed provider(s)",
        target.id,
        risk_score,
        max_score,
        level,
        failed_providers.len()
    );

    AggregateResult {
        risk_score,
        max_score,
        level,
        findings,
        evidence,
        failed_providers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Branch, ScanTarget};
    use crate::provider::BoxFuture;
    use std::collections::BTreeMap;

    struct FixedProvider {
        name: &'static str,
        score: u32,
        max: u32,
    }

    impl CheckProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }
        fn max_score(&self) -> u32 {
            self.max
        }
        fn evaluate<'a>(
            &'a self,
            _target: &'a ScanTarget,
        ) -> BoxFuture<'a, Result<CheckResult, CheckFailure>> {
            Box::pin(async move {
                Ok(CheckResult {
                    provider: self.name.to_string(),
                    score: self.score,
                    max_score: self.max,
                    findings: vec![Finding::new(
                        FindingOrigin::Check(self.name.to_string()),
                        "fixed",
                        "fixed score",
                    )],
                    evidence: BTreeMap::from([("mode".to_string(), "fixed".to_string())]),
                })
            })
        }
    }

    struct FailingProvider;

    impl CheckProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }
        fn max_score(&self) -> u32 {
            40
        }
        fn evaluate<'a>(
            &'a self,
            _target: &'a ScanTarget,
        ) -> BoxFuture<'a, Result<CheckResult, CheckFailure>> {
            Box::pin(async move { Err(CheckFailure::Unavailable("connection refused".into())) })
        }
    }

    struct HangingProvider;

    impl CheckProvider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }
        fn max_score(&self) -> u32 {
            25
        }
        fn evaluate<'a>(
            &'a self,
            _target: &'a ScanTarget,
        ) -> BoxFuture<'a, Result<CheckResult, CheckFailure>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("provider should have been timed out")
            })
        }
    }

    fn target() -> ScanTarget {
        ScanTarget::url("https://example.com", Branch::Online)
    }

    #[tokio::test]
    async fn test_scores_and_maxima_are_summed() {
        let providers: Vec<Arc<dyn CheckProvider>> = vec![
            Arc::new(FixedProvider {
                name: "a",
                score: 30,
                max: 40,
            }),
            Arc::new(FixedProvider {
                name: "b",
                score: 25,
                max: 60,
            }),
        ];
        let result = aggregate(&target(), &providers, 1_000).await;
        assert_eq!(result.risk_score, 55);
        assert_eq!(result.max_score, 100);
        assert_eq!(result.level, RiskLevel::Low);
        assert!(result.failed_providers.is_empty());
        assert_eq!(result.findings.len(), 2);
    }

    #[tokio::test]
    async fn test_all_providers_failing_yields_zero_not_error() {
        let providers: Vec<Arc<dyn CheckProvider>> =
            vec![Arc::new(FailingProvider), Arc::new(FailingProvider)];
        let result = aggregate(&target(), &providers, 1_000).await;
        assert_eq!(result.risk_score, 0);
        assert_eq!(result.level, RiskLevel::Safe);
        assert_eq!(result.failed_providers.len(), 2);
        // Max score still reflects the declared ceilings
        assert_eq!(result.max_score, 80);
        assert!(result
            .findings
            .iter()
            .all(|f| f.category == "provider_failure"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_provider_is_timed_out_and_defaulted() {
        let providers: Vec<Arc<dyn CheckProvider>> = vec![
            Arc::new(HangingProvider),
            Arc::new(FixedProvider {
                name: "a",
                score: 10,
                max: 40,
            }),
        ];
        let result = aggregate(&target(), &providers, 100).await;
        assert_eq!(result.risk_score, 10);
        assert_eq!(result.failed_providers, vec!["hanging".to_string()]);
    }

    #[test]
    fn test_settle_substitutes_zero_score_default() {
        let (result, failed) = settle("whois", 35, Err(CheckFailure::Timeout { ms: 500 }));
        assert!(failed);
        assert_eq!(result.score, 0);
        assert_eq!(result.max_score, 35);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].category, "provider_failure");
    }

    #[test]
    fn test_score_ratio_handles_empty_registry() {
        let empty = AggregateResult {
            risk_score: 0,
            max_score: 0,
            level: RiskLevel::Safe,
            findings: vec![],
            evidence: BTreeMap::new(),
            failed_providers: vec![],
        };
        assert_eq!(empty.score_ratio(), 0.0);
    }

    #[test]
    fn test_bonus_penalties_cap_the_ratio() {
        let over = AggregateResult {
            risk_score: 120,
            max_score: 100,
            level: RiskLevel::High,
            findings: vec![],
            evidence: BTreeMap::new(),
            failed_providers: vec![],
        };
        assert_eq!(over.score_ratio(), 1.0);
    }

    #[tokio::test]
    async fn test_provider_evidence_is_collected_and_namespaced() {
        let providers: Vec<Arc<dyn CheckProvider>> = vec![
            Arc::new(FixedProvider {
                name: "a",
                score: 30,
                max: 40,
            }),
            Arc::new(FixedProvider {
                name: "b",
                score: 25,
                max: 60,
            }),
        ];
        let result = aggregate(&target(), &providers, 1_000).await;
        assert_eq!(result.evidence["a.mode"], "fixed");
        assert_eq!(result.evidence["b.mode"], "fixed");
        assert_eq!(result.evidence.len(), 2);
    }
}
