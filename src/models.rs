//! Core data model for the scan pipeline.
//!
//! Every entity here is scan-scoped: created when a scan starts, handed to
//! the caller inside the final verdict, and never mutated after creation.
//! Results are recombined, never edited in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// What kind of artifact is being scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Url,
    Message,
    File,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Url => write!(f, "url"),
            TargetKind::Message => write!(f, "message"),
            TargetKind::File => write!(f, "file"),
        }
    }
}

/// Reachability state of the target, resolved by the probing collaborator
/// before the pipeline is invoked. The branch decides which pipeline stages
/// are eligible to run and which threshold set classifies the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Online,
    Offline,
    Parked,
    WafChallenge,
    Sinkhole,
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Branch::Online => write!(f, "online"),
            Branch::Offline => write!(f, "offline"),
            Branch::Parked => write!(f, "parked"),
            Branch::WafChallenge => write!(f, "waf_challenge"),
            Branch::Sinkhole => write!(f, "sinkhole"),
        }
    }
}

/// Discrete risk verdict. Ordered: comparisons follow severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An already-resolved scan target. Immutable for the scan's duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTarget {
    /// Normalized identifier: lowered URL, or `msg:`/`file:` + SHA-256 hex
    pub id: String,
    pub kind: TargetKind,
    pub branch: Branch,
    /// Analyzable text, when the target has any (URL string, message body)
    pub content: Option<String>,
}

impl ScanTarget {
    /// Build a URL target. Normalizes by trimming, dropping a trailing
    /// slash, and lowercasing the scheme and host portion.
    pub fn url(raw: &str, branch: Branch) -> Self {
        let normalized = normalize_url(raw);
        Self {
            id: normalized.clone(),
            kind: TargetKind::Url,
            branch,
            content: Some(normalized),
        }
    }

    /// Build a message target, identified by the SHA-256 of its body.
    pub fn message(body: &str, branch: Branch) -> Self {
        Self {
            id: format!("msg:{}", sha256_hex(body.as_bytes())),
            kind: TargetKind::Message,
            branch,
            content: Some(body.to_string()),
        }
    }

    /// Build a file target from a precomputed SHA-256 digest (hex).
    pub fn file_from_hash(sha256: &str, branch: Branch) -> Self {
        Self {
            id: format!("file:{}", sha256.trim().to_lowercase()),
            kind: TargetKind::File,
            branch,
            content: None,
        }
    }

    /// Build a file target by hashing raw bytes.
    pub fn file_from_bytes(bytes: &[u8], branch: Branch) -> Self {
        Self {
            id: format!("file:{}", sha256_hex(bytes)),
            kind: TargetKind::File,
            branch,
            content: None,
        }
    }

    /// Apply a caller-supplied branch hint, e.g. when a later probe
    /// supersedes the branch the target was created with.
    pub fn with_branch(mut self, branch: Branch) -> Self {
        self.branch = branch;
        self
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    match trimmed.split_once("://") {
        Some((scheme, rest)) => {
            let (host, path) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, ""),
            };
            format!("{}://{}{}", scheme.to_lowercase(), host.to_lowercase(), path)
        }
        None => trimmed.to_string(),
    }
}

/// Where a finding came from, so the verdict's flat findings list stays
/// attributable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingOrigin {
    /// A check provider, by name
    Check(String),
    Stage1,
    Stage2,
    Policy,
}

/// A single explainable observation contributing to the verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub origin: FindingOrigin,
    /// Machine-matchable category (policy conditions key on this)
    pub category: String,
    pub detail: String,
}

impl Finding {
    pub fn new(
        origin: FindingOrigin,
        category: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            origin,
            category: category.into(),
            detail: detail.into(),
        }
    }
}

/// Outcome of one check provider invocation.
///
/// `score` is a non-negative point total and may exceed `max_score`
/// (providers are allowed bonus penalties); normalization always divides by
/// the sum of declared maxima, not per-provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub provider: String,
    pub score: u32,
    pub max_score: u32,
    pub findings: Vec<Finding>,
    pub evidence: BTreeMap<String, String>,
}

impl CheckResult {
    /// Zero-score default substituted when a provider fails or times out.
    pub fn defaulted(provider: &str, max_score: u32) -> Self {
        Self {
            provider: provider.to_string(),
            score: 0,
            max_score,
            findings: Vec::new(),
            evidence: BTreeMap::new(),
        }
    }
}

/// One predictor's output. Confidence is the model's self-assessment
/// (distance of probability from 0.5), not a calibrated statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePrediction {
    pub model: String,
    pub probability: f64,
    pub confidence: f64,
    pub latency_ms: u64,
}

/// Weighted combination of stage predictions. Confidence is the minimum of
/// the inputs' confidences: the ensemble is only as confident as its
/// least-confident member.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombinedPrediction {
    pub probability: f64,
    pub confidence: f64,
}

impl CombinedPrediction {
    /// Degraded-but-safe default when every predictor fails: neutral
    /// probability, zero confidence, so the pipeline routes to additional
    /// scrutiny instead of silently classifying as safe.
    pub fn neutral() -> Self {
        Self {
            probability: 0.5,
            confidence: 0.0,
        }
    }
}

/// Record of the policy rule that fired for this scan, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyOverride {
    pub rule: String,
    pub priority: i32,
    /// Level the rule forced or floored the verdict to
    pub forced_level: Option<RiskLevel>,
    /// Numeric score the rule substituted before classification
    pub adjusted_score: Option<f64>,
}

/// `[lower, upper]` interval around the verdict probability, derived from
/// combined confidence and clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    pub fn from_prediction(p: &CombinedPrediction) -> Self {
        let half_width = (1.0 - p.confidence) / 2.0;
        Self {
            lower: (p.probability - half_width).clamp(0.0, 1.0),
            upper: (p.probability + half_width).clamp(0.0, 1.0),
        }
    }
}

/// The sole artifact the pipeline emits. Immutable once assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalVerdict {
    pub target: ScanTarget,
    /// Combined probability in `[0, 1]` (derived from points on branches
    /// that run only the aggregator)
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub confidence_interval: ConfidenceInterval,
    pub policy_override: Option<PolicyOverride>,
    pub findings: Vec<Finding>,
    pub evidence: BTreeMap<String, String>,
    /// True when any fan-out member settled on its failure default
    pub degraded: bool,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Safe < RiskLevel::Low);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!(
            RiskLevel::Critical,
            [RiskLevel::Medium, RiskLevel::Critical, RiskLevel::Low]
                .into_iter()
                .max()
                .unwrap()
        );
    }

    #[test]
    fn test_url_normalization() {
        let target = ScanTarget::url("  HTTPS://Example.COM/Login/ ", Branch::Online);
        assert_eq!(target.id, "https://example.com/Login");
        assert_eq!(target.kind, TargetKind::Url);
    }

    #[test]
    fn test_message_targets_share_id_for_same_body() {
        let a = ScanTarget::message("click here to verify", Branch::Online);
        let b = ScanTarget::message("click here to verify", Branch::Offline);
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("msg:"));
        assert_ne!(a.branch, b.branch);
    }

    #[test]
    fn test_file_targets_hash_bytes_to_the_declared_digest() {
        // SHA-256 of the empty input
        let empty_digest = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let hashed = ScanTarget::file_from_bytes(b"", Branch::Offline);
        assert_eq!(hashed.id, format!("file:{}", empty_digest));
        let declared = ScanTarget::file_from_hash(&empty_digest.to_uppercase(), Branch::Offline);
        assert_eq!(hashed.id, declared.id);
    }

    #[test]
    fn test_branch_hint_supersedes_initial_branch() {
        let target =
            ScanTarget::url("https://example.com", Branch::Online).with_branch(Branch::Parked);
        assert_eq!(target.branch, Branch::Parked);
        assert_eq!(target.id, "https://example.com");
    }

    #[test]
    fn test_neutral_prediction_never_exits() {
        let neutral = CombinedPrediction::neutral();
        assert_eq!(neutral.probability, 0.5);
        assert_eq!(neutral.confidence, 0.0);
    }

    #[test]
    fn test_confidence_interval_clamped() {
        let ci = ConfidenceInterval::from_prediction(&CombinedPrediction {
            probability: 0.95,
            confidence: 0.5,
        });
        assert_eq!(ci.upper, 1.0);
        assert!((ci.lower - 0.7).abs() < 1e-9);
    }
}
