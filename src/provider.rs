//! Check provider capability contract.
//!
//! Each provider is an independent, failure-prone signal source with a
//! single `evaluate(target)` contract. Providers are registered on the
//! pipeline at startup as typed trait objects, never dispatched by name at
//! runtime.

use crate::models::{CheckResult, ScanTarget};
use std::future::Future;
use std::pin::Pin;

/// Boxed future used across the capability traits so registries can hold
/// `Arc<dyn ...>` without an async-trait dependency.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Why a single provider invocation produced no usable result. Always
/// recovered locally by substituting the provider's zero-score default.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckFailure {
    #[error("provider timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// One independent check: domain analysis, network probing, content
/// scraping, brand heuristics and so on. Implementations must be safe to
/// run concurrently with each other.
pub trait CheckProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Declared score ceiling, used for normalization and for the
    /// zero-score default when the provider fails.
    fn max_score(&self) -> u32;

    fn evaluate<'a>(
        &'a self,
        target: &'a ScanTarget,
    ) -> BoxFuture<'a, Result<CheckResult, CheckFailure>>;
}
