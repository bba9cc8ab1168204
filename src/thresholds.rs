//! Branch threshold classifier.
//!
//! Maps a continuous score or probability to a discrete risk level via an
//! ordered breakpoint scan. The reachability branch selects which set
//! applies; the classifier itself is branch-agnostic beyond that selection.

use crate::errors::{ScanError, ScanResult};
use crate::models::{Branch, RiskLevel};
use serde::{Deserialize, Serialize};

/// Ordered breakpoints for one branch. Each named breakpoint is the value
/// at which the input outgrows that label: `v >= high` classifies as
/// Critical, `v >= medium` as High, and so on down to Safe. `critical` is
/// the scale ceiling and only participates in monotonicity validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub safe: f64,
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl ThresholdSet {
    /// Fixed point ladder used by the fan-out aggregator.
    pub fn point_ladder() -> Self {
        Self {
            safe: 20.0,
            low: 60.0,
            medium: 120.0,
            high: 200.0,
            critical: f64::MAX,
        }
    }

    /// Default probability ladder for branches that run the ML stages.
    pub fn probability_ladder() -> Self {
        Self {
            safe: 0.2,
            low: 0.4,
            medium: 0.6,
            high: 0.8,
            critical: 1.0,
        }
    }

    /// Breakpoints must be strictly monotonic or the set is rejected at
    /// snapshot load, before any scan runs.
    pub fn validate(&self, branch_label: &str) -> ScanResult<()> {
        let ordered = self.safe < self.low
            && self.low < self.medium
            && self.medium < self.high
            && self.high < self.critical;
        if !ordered {
            return Err(ScanError::NonMonotonicThresholds {
                branch: branch_label.to_string(),
            });
        }
        Ok(())
    }

    /// Ordered-breakpoint scan, most severe first: the first breakpoint the
    /// value meets or exceeds wins.
    pub fn classify(&self, value: f64) -> RiskLevel {
        if value >= self.high {
            RiskLevel::Critical
        } else if value >= self.medium {
            RiskLevel::High
        } else if value >= self.low {
            RiskLevel::Medium
        } else if value >= self.safe {
            RiskLevel::Low
        } else {
            RiskLevel::Safe
        }
    }
}

/// One threshold set per reachability branch, loaded as part of the
/// immutable config snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchThresholds {
    pub online: ThresholdSet,
    pub offline: ThresholdSet,
    pub parked: ThresholdSet,
    pub waf_challenge: ThresholdSet,
    pub sinkhole: ThresholdSet,
}

impl BranchThresholds {
    pub fn for_branch(&self, branch: Branch) -> &ThresholdSet {
        match branch {
            Branch::Online => &self.online,
            Branch::Offline => &self.offline,
            Branch::Parked => &self.parked,
            Branch::WafChallenge => &self.waf_challenge,
            Branch::Sinkhole => &self.sinkhole,
        }
    }

    pub fn validate(&self) -> ScanResult<()> {
        self.online.validate("online")?;
        self.offline.validate("offline")?;
        self.parked.validate("parked")?;
        self.waf_challenge.validate("waf_challenge")?;
        self.sinkhole.validate("sinkhole")?;
        Ok(())
    }
}

impl Default for BranchThresholds {
    fn default() -> Self {
        // ONLINE and WAF_CHALLENGE classify combined probabilities; the
        // remaining branches classify aggregate point totals.
        Self {
            online: ThresholdSet::probability_ladder(),
            offline: ThresholdSet::point_ladder(),
            parked: ThresholdSet::point_ladder(),
            waf_challenge: ThresholdSet::probability_ladder(),
            sinkhole: ThresholdSet::point_ladder(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_scan_scenario() {
        // {safe:20, low:60, medium:120, high:200} and a 150-point score
        let ladder = ThresholdSet::point_ladder();
        assert_eq!(ladder.classify(150.0), RiskLevel::High);
    }

    #[test]
    fn test_ladder_edges() {
        let ladder = ThresholdSet::point_ladder();
        assert_eq!(ladder.classify(0.0), RiskLevel::Safe);
        assert_eq!(ladder.classify(20.0), RiskLevel::Low);
        assert_eq!(ladder.classify(60.0), RiskLevel::Medium);
        assert_eq!(ladder.classify(120.0), RiskLevel::High);
        assert_eq!(ladder.classify(200.0), RiskLevel::Critical);
        assert_eq!(ladder.classify(5000.0), RiskLevel::Critical);
    }

    #[test]
    fn test_classification_is_monotonic() {
        let ladder = ThresholdSet::probability_ladder();
        let mut last = RiskLevel::Safe;
        for step in 0..=100 {
            let level = ladder.classify(step as f64 / 100.0);
            assert!(level >= last, "risk level regressed at step {}", step);
            last = level;
        }
    }

    #[test]
    fn test_non_monotonic_set_rejected() {
        let bad = ThresholdSet {
            safe: 20.0,
            low: 15.0,
            medium: 120.0,
            high: 200.0,
            critical: 500.0,
        };
        let err = bad.validate("offline").unwrap_err();
        assert!(matches!(
            err,
            ScanError::NonMonotonicThresholds { ref branch } if branch == "offline"
        ));
    }

    #[test]
    fn test_branch_selection() {
        let sets = BranchThresholds::default();
        assert_eq!(sets.for_branch(Branch::Online).high, 0.8);
        assert_eq!(sets.for_branch(Branch::Parked).high, 200.0);
    }
}
