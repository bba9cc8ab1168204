//! Policy override engine.
//!
//! Ordered, priority-based rule evaluation over the assembled scan
//! evidence. The first enabled rule whose condition matches wins; later
//! matching rules are never evaluated. Rules can force a risk level, floor
//! it, or rewrite the numeric score before classification.

use crate::models::{Branch, RiskLevel};
use serde::{Deserialize, Serialize};

/// Condition evaluated against the assembled evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    BranchIs { branch: Branch },
    ProbabilityAtLeast { value: f64 },
    AggregateAtLeast { points: u32 },
    HasFindingCategory { category: String },
    AllOf { conditions: Vec<RuleCondition> },
    AnyOf { conditions: Vec<RuleCondition> },
}

/// What a matching rule does to the verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    /// Set the final risk level outright, skipping classification
    ForceLevel { level: RiskLevel },
    /// Classification proceeds, but the level never drops below this
    FloorLevel { level: RiskLevel },
    /// Replace the numeric score before classification
    SetScore { value: f64 },
    /// Shift the numeric score before classification
    AdjustScore { delta: f64 },
}

/// One deterministic override rule from the config snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub condition: RuleCondition,
    pub action: RuleAction,
}

/// Evidence snapshot the conditions are evaluated against. Built once per
/// scan after the eligible stages settle.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyEvidence {
    pub branch: Branch,
    pub aggregate_points: Option<u32>,
    pub probability: f64,
    pub finding_categories: Vec<String>,
}

impl RuleCondition {
    pub fn matches(&self, evidence: &PolicyEvidence) -> bool {
        match self {
            RuleCondition::BranchIs { branch } => evidence.branch == *branch,
            RuleCondition::ProbabilityAtLeast { value } => evidence.probability >= *value,
            RuleCondition::AggregateAtLeast { points } => {
                evidence.aggregate_points.is_some_and(|p| p >= *points)
            }
            RuleCondition::HasFindingCategory { category } => {
                evidence.finding_categories.iter().any(|c| c == category)
            }
            RuleCondition::AllOf { conditions } => {
                conditions.iter().all(|c| c.matches(evidence))
            }
            RuleCondition::AnyOf { conditions } => {
                conditions.iter().any(|c| c.matches(evidence))
            }
        }
    }
}

/// The rule that fired, borrowed from the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRule<'a> {
    pub name: &'a str,
    pub priority: i32,
    pub action: &'a RuleAction,
}

/// First-match-wins evaluation: rules are sorted ascending by priority and
/// the first enabled match is returned. `None` means classification
/// proceeds from model/aggregate output unmodified.
pub fn apply_policies<'a>(
    evidence: &PolicyEvidence,
    rules: &'a [PolicyRule],
) -> Option<MatchedRule<'a>> {
    let mut ordered: Vec<&PolicyRule> = rules.iter().filter(|r| r.enabled).collect();
    ordered.sort_by_key(|r| r.priority);

    for rule in ordered {
        if rule.condition.matches(evidence) {
            log::debug!(
                "policy rule '{}' (priority {}) matched",
                rule.name,
                rule.priority
            );
            return Some(MatchedRule {
                name: &rule.name,
                priority: rule.priority,
                action: &rule.action,
            });
        }
    }
    None
}

/// Standing rule shipped in the default snapshot: a known sinkhole is
/// always critical, regardless of computed scores.
pub fn sinkhole_rule() -> PolicyRule {
    PolicyRule {
        name: "sinkhole-force-critical".to_string(),
        priority: 0,
        enabled: true,
        condition: RuleCondition::BranchIs {
            branch: Branch::Sinkhole,
        },
        action: RuleAction::ForceLevel {
            level: RiskLevel::Critical,
        },
    }
}
