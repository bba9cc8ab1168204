//! Sentra - risk-scoring decision pipeline
//!
//! Takes a URL, message or file target plus a set of independently-computed
//! signals and produces a single, explainable verdict. Signal sources fan
//! out concurrently with bulkhead isolation, a fast ensemble can skip the
//! expensive analyzers when it is already confident, and deterministic
//! policy rules can force the verdict regardless of model output.

pub mod aggregate;
pub mod checks;
pub mod cli;
pub mod config;
pub mod deep;
pub mod ensemble;
pub mod errors;
pub mod intel;
pub mod models;
pub mod pipeline;
pub mod policy;
pub mod provider;
pub mod thresholds;
pub mod verdict;

pub use config::ConfigSnapshot;
pub use errors::{ScanError, ScanResult};
pub use models::{Branch, FinalVerdict, RiskLevel, ScanTarget, TargetKind};
pub use pipeline::ScanPipeline;
