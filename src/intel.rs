//! Threat-intelligence lookup capability.
//!
//! The pipeline consumes indicator verdicts through the `IntelLookup`
//! seam; feed fetching itself is a collaborator concern. This module adds
//! the deduplicated in-memory indicator cache with caller-visible TTL and
//! hit/miss metadata.

use crate::provider::{BoxFuture, CheckFailure};
use crate::models::RiskLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// One source's opinion about an indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntelHit {
    pub source: String,
    pub verdict: RiskLevel,
    /// Source-reported confidence, 0-100
    pub confidence: u8,
}

/// Whether the answer came from the cache, and how stale it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Hit { age_secs: u64, ttl_secs: u64 },
    Miss,
}

/// Lookup answer with cache metadata the caller can surface as evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntelAnswer {
    pub hits: Vec<IntelHit>,
    pub cache: CacheStatus,
}

/// Indicator lookup seam. Implementations may consult any number of feeds.
pub trait IntelLookup: Send + Sync {
    fn lookup<'a>(&'a self, indicator: &'a str)
        -> BoxFuture<'a, Result<IntelAnswer, CheckFailure>>;
}

/// Canonical indicator form so the cache deduplicates equivalent spellings.
pub fn normalize_indicator(raw: &str) -> String {
    raw.trim().trim_end_matches('.').to_lowercase()
}

/// TTL'd in-memory cache over any `IntelLookup`. Entries are keyed by
/// normalized indicator; expired entries are refreshed through the inner
/// lookup on the next request.
pub struct MemoryIntelCache {
    inner: Arc<dyn IntelLookup>,
    ttl: Duration,
    entries: RwLock<HashMap<String, (Vec<IntelHit>, Instant)>>,
}

impl MemoryIntelCache {
    pub fn new(inner: Arc<dyn IntelLookup>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl IntelLookup for MemoryIntelCache {
    fn lookup<'a>(
        &'a self,
        indicator: &'a str,
    ) -> BoxFuture<'a, Result<IntelAnswer, CheckFailure>> {
        Box::pin(async move {
            let key = normalize_indicator(indicator);

            {
                let entries = self.entries.read().await;
                if let Some((hits, stored_at)) = entries.get(&key) {
                    let age = stored_at.elapsed();
                    if age < self.ttl {
                        log::trace!("intel cache hit for '{}'", key);
                        return Ok(IntelAnswer {
                            hits: hits.clone(),
                            cache: CacheStatus::Hit {
                                age_secs: age.as_secs(),
                                ttl_secs: self.ttl.as_secs(),
                            },
                        });
                    }
                }
            }

            let fresh = self.inner.lookup(&key).await?;
            let mut entries = self.entries.write().await;
            entries.insert(key, (fresh.hits.clone(), Instant::now()));
            Ok(IntelAnswer {
                hits: fresh.hits,
                cache: CacheStatus::Miss,
            })
        })
    }
}
