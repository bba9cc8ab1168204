//! Immutable configuration snapshot.
//!
//! One snapshot is loaded per scan and never mutated for that scan's
//! duration; refreshing configuration means fetching a new snapshot for the
//! next scan. All validation happens here, before any fan-out runs: a
//! malformed snapshot is fatal to scan startup, never discovered mid-scan.

use crate::errors::{ScanError, ScanResult};
use crate::policy::{self, PolicyRule};
use crate::thresholds::BranchThresholds;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Fixed Stage-1 ensemble weights, keyed by predictor model name.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stage1Weights {
    pub char_gram: f64,
    pub token: f64,
    pub tabular: f64,
}

impl Stage1Weights {
    pub fn weight_for(&self, model: &str) -> Option<f64> {
        match model {
            "lexical-char" => Some(self.char_gram),
            "lexical-token" => Some(self.token),
            "tabular" => Some(self.tabular),
            _ => None,
        }
    }

    fn sum(&self) -> f64 {
        self.char_gram + self.token + self.tabular
    }
}

impl Default for Stage1Weights {
    fn default() -> Self {
        Self {
            char_gram: 0.25,
            token: 0.35,
            tabular: 0.40,
        }
    }
}

/// Fixed Stage-2 ensemble weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stage2Weights {
    pub persuasion: f64,
    pub visual: f64,
}

impl Stage2Weights {
    pub fn weight_for(&self, model: &str) -> Option<f64> {
        match model {
            "persuasion" => Some(self.persuasion),
            "visual" => Some(self.visual),
            _ => None,
        }
    }

    fn sum(&self) -> f64 {
        self.persuasion + self.visual
    }
}

impl Default for Stage2Weights {
    fn default() -> Self {
        Self {
            persuasion: 0.6,
            visual: 0.4,
        }
    }
}

/// The whole per-scan configuration: ensemble weights, the early-exit
/// confidence bar, fan-out timeout budgets, per-branch threshold sets and
/// the policy rule list.
///
/// The early-exit threshold and the weights are tuning knobs with no
/// documented derivation; they are configuration, not constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSnapshot {
    pub stage1_weights: Stage1Weights,
    pub stage2_weights: Stage2Weights,
    /// Stage 1 may skip Stage 2 once combined confidence reaches this bar
    pub confidence_threshold: f64,
    /// Per-provider budget inside the check fan-out
    pub provider_timeout_ms: u64,
    /// Per-predictor budget for the fast Stage-1 ensemble
    pub stage1_timeout_ms: u64,
    /// Per-predictor budget for the expensive Stage-2 analyzers
    pub stage2_timeout_ms: u64,
    pub thresholds: BranchThresholds,
    pub rules: Vec<PolicyRule>,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            stage1_weights: Stage1Weights::default(),
            stage2_weights: Stage2Weights::default(),
            confidence_threshold: 0.85,
            provider_timeout_ms: 3_000,
            stage1_timeout_ms: 2_000,
            stage2_timeout_ms: 8_000,
            thresholds: BranchThresholds::default(),
            rules: vec![policy::sinkhole_rule()],
        }
    }
}

impl ConfigSnapshot {
    /// Load and validate a snapshot from a JSON file. Missing fields fall
    /// back to defaults.
    pub fn load(path: &Path) -> ScanResult<Self> {
        log::info!("Loading config snapshot from {:?}", path);
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ScanError::io(e, Some(path.to_path_buf())))?;
        let snapshot: Self = serde_json::from_str(&raw)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Reject a malformed snapshot before any scan runs.
    pub fn validate(&self) -> ScanResult<()> {
        let s1 = self.stage1_weights.sum();
        if (s1 - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ScanError::WeightSum {
                stage: "stage1".to_string(),
                sum: s1,
            });
        }
        let s2 = self.stage2_weights.sum();
        if (s2 - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ScanError::WeightSum {
                stage: "stage2".to_string(),
                sum: s2,
            });
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ScanError::InvalidConfigValue {
                field: "confidence_threshold".to_string(),
                value: self.confidence_threshold,
            });
        }
        self.thresholds.validate()?;

        // Equal priorities among enabled rules would make first-match-wins
        // depend on storage order.
        let mut seen = HashSet::new();
        for rule in self.rules.iter().filter(|r| r.enabled) {
            if !seen.insert(rule.priority) {
                return Err(ScanError::DuplicateRulePriority {
                    priority: rule.priority,
                });
            }
        }
        Ok(())
    }
}
