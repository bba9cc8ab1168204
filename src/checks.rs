//! Built-in check providers.
//!
//! A small battery of self-contained providers for the demo registry:
//! lexical URL analysis, credential-bait keyword scanning, and a wrapper
//! that turns threat-intel lookups into check results. Production
//! deployments register their own providers next to (or instead of) these.

use crate::errors::{ScanError, ScanResult};
use crate::intel::{CacheStatus, IntelLookup};
use crate::models::{CheckResult, Finding, FindingOrigin, RiskLevel, ScanTarget, TargetKind};
use crate::provider::{BoxFuture, CheckFailure, CheckProvider};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;

const SUSPICIOUS_TLDS: &[&str] = &[
    ".zip", ".mov", ".xyz", ".top", ".gq", ".tk", ".ml", ".cf", ".icu", ".rest",
];

/// Lexical URL analyzer: structural tricks that phishing URLs lean on.
pub struct LexicalUrlProvider {
    ip_host: Regex,
    punycode: Regex,
}

impl LexicalUrlProvider {
    pub fn new() -> ScanResult<Self> {
        let ip_pattern = r"^[a-z][a-z0-9+.-]*://\d{1,3}(\.\d{1,3}){3}";
        let puny_pattern = r"://[^/]*xn--";
        Ok(Self {
            ip_host: Regex::new(ip_pattern).map_err(|e| ScanError::regex(e, ip_pattern))?,
            punycode: Regex::new(puny_pattern).map_err(|e| ScanError::regex(e, puny_pattern))?,
        })
    }

    fn host_of(url: &str) -> &str {
        let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
        rest.split(['/', '?', '#']).next().unwrap_or(rest)
    }
}

impl CheckProvider for LexicalUrlProvider {
    fn name(&self) -> &str {
        "url-lexical"
    }

    fn max_score(&self) -> u32 {
        40
    }

    fn evaluate<'a>(
        &'a self,
        target: &'a ScanTarget,
    ) -> BoxFuture<'a, Result<CheckResult, CheckFailure>> {
        Box::pin(async move {
            if target.kind != TargetKind::Url {
                return Ok(CheckResult::defaulted(self.name(), self.max_score()));
            }
            let url = target.content.as_deref().unwrap_or(&target.id);
            let host = Self::host_of(url);
            let origin = FindingOrigin::Check(self.name().to_string());

            let mut score = 0;
            let mut findings = Vec::new();
            let mut push = |points: u32, category: &str, detail: String| {
                score += points;
                findings.push(Finding::new(origin.clone(), category, detail));
            };

            if self.ip_host.is_match(url) {
                push(15, "ip_literal_host", "host is a raw IP address".to_string());
            }
            if host.contains('@') {
                push(
                    10,
                    "userinfo_trick",
                    "'@' in authority hides the real host".to_string(),
                );
            }
            if self.punycode.is_match(url) {
                push(
                    10,
                    "punycode_host",
                    "punycode-encoded host, possible homoglyph".to_string(),
                );
            }
            let subdomains = host.matches('.').count();
            if subdomains >= 4 {
                push(
                    5,
                    "deep_subdomains",
                    format!("{} subdomain levels", subdomains),
                );
            }
            if let Some(tld) = SUSPICIOUS_TLDS.iter().find(|t| host.ends_with(*t)) {
                push(10, "suspicious_tld", format!("abuse-heavy TLD '{}'", tld));
            }
            if url.len() > 120 {
                push(5, "oversized_url", format!("{} characters", url.len()));
            }

            let mut evidence = BTreeMap::new();
            evidence.insert("host".to_string(), host.to_string());

            Ok(CheckResult {
                provider: self.name().to_string(),
                score,
                max_score: self.max_score(),
                findings,
                evidence,
            })
        })
    }
}

/// Credential-bait keyword scan over any textual target.
pub struct KeywordProvider {
    pattern: Regex,
}

impl KeywordProvider {
    pub fn new() -> ScanResult<Self> {
        let pattern =
            r"(?i)\b(login|verify|secure|account|update|confirm|password|billing|suspend)\b";
        Ok(Self {
            pattern: Regex::new(pattern).map_err(|e| ScanError::regex(e, pattern))?,
        })
    }
}

impl CheckProvider for KeywordProvider {
    fn name(&self) -> &str {
        "keyword"
    }

    fn max_score(&self) -> u32 {
        30
    }

    fn evaluate<'a>(
        &'a self,
        target: &'a ScanTarget,
    ) -> BoxFuture<'a, Result<CheckResult, CheckFailure>> {
        Box::pin(async move {
            let text = match target.content.as_deref() {
                Some(text) => text,
                None => return Ok(CheckResult::defaulted(self.name(), self.max_score())),
            };

            let mut seen = Vec::new();
            for m in self.pattern.find_iter(text) {
                let word = m.as_str().to_lowercase();
                if !seen.contains(&word) {
                    seen.push(word);
                }
            }
            let score = (seen.len() as u32 * 8).min(self.max_score());
            let findings = seen
                .iter()
                .map(|word| {
                    Finding::new(
                        FindingOrigin::Check(self.name().to_string()),
                        "bait_keyword",
                        format!("credential-bait keyword '{}'", word),
                    )
                })
                .collect();

            Ok(CheckResult {
                provider: self.name().to_string(),
                score,
                max_score: self.max_score(),
                findings,
                evidence: BTreeMap::new(),
            })
        })
    }
}

/// Check provider over the threat-intel lookup capability. Scores by the
/// worst verdict any source reports for the target identifier.
pub struct IntelProvider {
    intel: Arc<dyn IntelLookup>,
}

impl IntelProvider {
    pub fn new(intel: Arc<dyn IntelLookup>) -> Self {
        Self { intel }
    }

    fn points_for(verdict: RiskLevel) -> u32 {
        match verdict {
            RiskLevel::Safe => 0,
            RiskLevel::Low => 10,
            RiskLevel::Medium => 20,
            RiskLevel::High => 35,
            RiskLevel::Critical => 50,
        }
    }
}

impl CheckProvider for IntelProvider {
    fn name(&self) -> &str {
        "threat-intel"
    }

    fn max_score(&self) -> u32 {
        50
    }

    fn evaluate<'a>(
        &'a self,
        target: &'a ScanTarget,
    ) -> BoxFuture<'a, Result<CheckResult, CheckFailure>> {
        Box::pin(async move {
            let answer = self.intel.lookup(&target.id).await?;

            let worst = answer.hits.iter().map(|h| h.verdict).max();
            let score = worst.map(Self::points_for).unwrap_or(0);
            let findings = answer
                .hits
                .iter()
                .map(|hit| {
                    Finding::new(
                        FindingOrigin::Check(self.name().to_string()),
                        "intel_match",
                        format!(
                            "{} flags this indicator as {} (confidence {})",
                            hit.source, hit.verdict, hit.confidence
                        ),
                    )
                })
                .collect();

            let mut evidence = BTreeMap::new();
            evidence.insert(
                "cache".to_string(),
                match answer.cache {
                    CacheStatus::Hit { age_secs, ttl_secs } => {
                        format!("hit (age {}s, ttl {}s)", age_secs, ttl_secs)
                    }
                    CacheStatus::Miss => "miss".to_string(),
                },
            );

            Ok(CheckResult {
                provider: self.name().to_string(),
                score,
                max_score: self.max_score(),
                findings,
                evidence,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intel::{IntelAnswer, IntelHit};
    use crate::models::Branch;

    #[tokio::test]
    async fn test_lexical_flags_stack_up() {
        let provider = LexicalUrlProvider::new().unwrap();
        let target = ScanTarget::url(
            "http://198.51.100.7/login@secure.example.zip/account",
            Branch::Online,
        );
        let result = provider.evaluate(&target).await.unwrap();
        assert!(result.score >= 15);
        assert!(result
            .findings
            .iter()
            .any(|f| f.category == "ip_literal_host"));
    }

    #[tokio::test]
    async fn test_lexical_clean_url_scores_zero() {
        let provider = LexicalUrlProvider::new().unwrap();
        let target = ScanTarget::url("https://docs.example.com/guide", Branch::Online);
        let result = provider.evaluate(&target).await.unwrap();
        assert_eq!(result.score, 0);
        assert!(result.findings.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_scan_dedupes_words() {
        let provider = KeywordProvider::new().unwrap();
        let target = ScanTarget::message(
            "Please VERIFY your account. verify now, confirm your password.",
            Branch::Online,
        );
        let result = provider.evaluate(&target).await.unwrap();
        // verify, account, confirm, password: four distinct words
        assert_eq!(result.score, 30); // capped at max
        assert_eq!(result.findings.len(), 4);
    }

    struct StaticIntel;

    impl IntelLookup for StaticIntel {
        fn lookup<'a>(
            &'a self,
            indicator: &'a str,
        ) -> BoxFuture<'a, Result<IntelAnswer, CheckFailure>> {
            Box::pin(async move {
                let hits = if indicator.contains("sinkholed") {
                    vec![
                        IntelHit {
                            source: "feed-a".to_string(),
                            verdict: RiskLevel::Medium,
                            confidence: 60,
                        },
                        IntelHit {
                            source: "feed-b".to_string(),
                            verdict: RiskLevel::Critical,
                            confidence: 99,
                        },
                    ]
                } else {
                    vec![]
                };
                Ok(IntelAnswer {
                    hits,
                    cache: CacheStatus::Miss,
                })
            })
        }
    }

    #[tokio::test]
    async fn test_intel_provider_scores_worst_verdict() {
        let provider = IntelProvider::new(Arc::new(StaticIntel));
        let target = ScanTarget::url("https://sinkholed.example.com", Branch::Sinkhole);
        let result = provider.evaluate(&target).await.unwrap();
        assert_eq!(result.score, 50);
        assert_eq!(result.findings.len(), 2);
        assert_eq!(result.evidence["cache"], "miss");
    }

    #[tokio::test]
    async fn test_intel_provider_clean_indicator() {
        let provider = IntelProvider::new(Arc::new(StaticIntel));
        let target = ScanTarget::url("https://clean.example.com", Branch::Online);
        let result = provider.evaluate(&target).await.unwrap();
        assert_eq!(result.score, 0);
        assert!(result.findings.is_empty());
    }
}
