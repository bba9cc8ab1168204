//! Verdict assembler.
//!
//! A pure function that merges the settled pipeline pieces into the single
//! immutable result object. No I/O and no hidden time dependence: the
//! timestamp is an explicit input, so identical inputs always produce an
//! identical verdict.

use crate::aggregate::AggregateResult;
use crate::deep::Stage2Result;
use crate::ensemble::Stage1Result;
use crate::models::{
    CombinedPrediction, ConfidenceInterval, FinalVerdict, Finding, FindingOrigin, PolicyOverride,
    RiskLevel, ScanTarget,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Merge already-computed pieces into the final verdict.
#[allow(clippy::too_many_arguments)]
pub fn assemble(
    target: &ScanTarget,
    aggregate: Option<&AggregateResult>,
    stage1: Option<&Stage1Result>,
    stage2: Option<&Stage2Result>,
    policy_override: Option<PolicyOverride>,
    risk_level: RiskLevel,
    combined: CombinedPrediction,
    completed_at: DateTime<Utc>,
) -> FinalVerdict {
    let mut findings = Vec::new();
    let mut evidence = BTreeMap::new();

    evidence.insert("branch".to_string(), target.branch.to_string());

    if let Some(agg) = aggregate {
        findings.extend(agg.findings.iter().cloned());
        for (key, value) in &agg.evidence {
            evidence.insert(key.clone(), value.clone());
        }
        evidence.insert("aggregate_points".to_string(), agg.risk_score.to_string());
        evidence.insert("aggregate_max".to_string(), agg.max_score.to_string());
        evidence.insert("aggregate_level".to_string(), agg.level.to_string());
    }

    if let Some(s1) = stage1 {
        for member in &s1.members {
            evidence.insert(
                format!("stage1.{}", member.model),
                format!("{:.4}", member.probability),
            );
        }
        if s1.degraded {
            findings.push(Finding::new(
                FindingOrigin::Stage1,
                "stage1_degraded",
                "all fast predictors failed; neutral prediction substituted",
            ));
        }
        evidence.insert(
            "stage1.early_exit".to_string(),
            s1.should_exit.to_string(),
        );
    }

    if let Some(s2) = stage2 {
        findings.extend(s2.findings.iter().cloned());
        for member in &s2.members {
            evidence.insert(
                format!("stage2.{}", member.model),
                format!("{:.4}", member.probability),
            );
        }
    }

    if let Some(ref fired) = policy_override {
        findings.push(Finding::new(
            FindingOrigin::Policy,
            "policy_override",
            format!(
                "rule '{}' (priority {}) overrode the verdict",
                fired.rule, fired.priority
            ),
        ));
    }

    let degraded = aggregate.is_some_and(|a| !a.failed_providers.is_empty())
        || stage1.is_some_and(|s| s.degraded)
        || stage2.is_some_and(|s| s.fell_back);

    FinalVerdict {
        target: target.clone(),
        risk_score: combined.probability,
        risk_level,
        confidence: combined.confidence,
        confidence_interval: ConfidenceInterval::from_prediction(&combined),
        policy_override,
        findings,
        evidence,
        degraded,
        completed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Branch;
    use chrono::TimeZone;

    fn fixed_inputs() -> (
        ScanTarget,
        AggregateResult,
        Stage1Result,
        CombinedPrediction,
        DateTime<Utc>,
    ) {
        let target = ScanTarget::url("https://example.com", Branch::Online);
        let aggregate = AggregateResult {
            risk_score: 45,
            max_score: 100,
            level: RiskLevel::Low,
            findings: vec![Finding::new(
                FindingOrigin::Check("lexical".to_string()),
                "suspicious_tld",
                "uncommon top-level domain",
            )],
            evidence: BTreeMap::from([(
                "lexical.host".to_string(),
                "example.com".to_string(),
            )]),
            failed_providers: vec![],
        };
        let stage1 = Stage1Result {
            combined: CombinedPrediction {
                probability: 0.62,
                confidence: 0.4,
            },
            members: vec![],
            should_exit: false,
            degraded: false,
        };
        let combined = stage1.combined;
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        (target, aggregate, stage1, combined, at)
    }

    #[test]
    fn test_assemble_is_idempotent() {
        let (target, aggregate, stage1, combined, at) = fixed_inputs();
        let a = assemble(
            &target,
            Some(&aggregate),
            Some(&stage1),
            None,
            None,
            RiskLevel::Medium,
            combined,
            at,
        );
        let b = assemble(
            &target,
            Some(&aggregate),
            Some(&stage1),
            None,
            None,
            RiskLevel::Medium,
            combined,
            at,
        );
        assert_eq!(a, b);
        // Byte-identical serialization, not just structural equality
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn test_findings_are_origin_tagged() {
        let (target, aggregate, stage1, combined, at) = fixed_inputs();
        let verdict = assemble(
            &target,
            Some(&aggregate),
            Some(&stage1),
            None,
            Some(PolicyOverride {
                rule: "probability-cap".to_string(),
                priority: 5,
                forced_level: Some(RiskLevel::High),
                adjusted_score: None,
            }),
            RiskLevel::High,
            combined,
            at,
        );
        assert!(verdict
            .findings
            .iter()
            .any(|f| matches!(f.origin, FindingOrigin::Check(_))));
        assert!(verdict
            .findings
            .iter()
            .any(|f| f.origin == FindingOrigin::Policy && f.category == "policy_override"));
    }

    #[test]
    fn test_degradation_is_visible() {
        let (target, mut aggregate, stage1, combined, at) = fixed_inputs();
        aggregate.failed_providers.push("whois".to_string());
        let verdict = assemble(
            &target,
            Some(&aggregate),
            Some(&stage1),
            None,
            None,
            RiskLevel::Medium,
            combined,
            at,
        );
        assert!(verdict.degraded);
    }

    #[test]
    fn test_evidence_records_stage_probabilities() {
        let (target, aggregate, mut stage1, combined, at) = fixed_inputs();
        stage1.members.push(crate::models::StagePrediction {
            model: "tabular".to_string(),
            probability: 0.71,
            confidence: 0.42,
            latency_ms: 3,
        });
        let verdict = assemble(
            &target,
            Some(&aggregate),
            Some(&stage1),
            None,
            None,
            RiskLevel::Medium,
            combined,
            at,
        );
        assert_eq!(verdict.evidence["stage1.tabular"], "0.7100");
        assert_eq!(verdict.evidence["aggregate_points"], "45");
        assert_eq!(verdict.evidence["lexical.host"], "example.com");
        assert_eq!(verdict.evidence["branch"], "online");
    }
}
