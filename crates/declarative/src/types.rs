//! Core types shared by the planner, executor and state store

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Desired or last-applied attributes of a resource.
///
/// A `BTreeMap` keeps serialized state stable and makes comparison order-free.
pub type Attributes = BTreeMap<String, Value>;

/// Values a provider reports back after create/update (ids, endpoints, ARNs).
pub type Outputs = BTreeMap<String, Value>;

/// A resource as declared by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    /// Logical name, unique within a graph
    pub name: String,
    /// Type tag used to pick a provider
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Desired attributes; string values may contain `${resource.output}` references
    #[serde(default)]
    pub attributes: Attributes,
    /// Explicit dependencies in addition to those implied by references
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Declaration {
    /// Create a declaration with no attributes or dependencies
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            attributes: Attributes::new(),
            depends_on: Vec::new(),
        }
    }

    /// Set an attribute
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add an explicit dependency
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }
}

/// Kind of change an action makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Terminal result of one plan action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// The provider call (if any) and the state write both succeeded
    Succeeded,
    /// The action was attempted and failed
    Failed { reason: String },
    /// The action was never attempted
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Per-resource entry of an apply report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResult {
    pub name: String,
    pub resource_type: String,
    pub kind: ActionKind,
    pub outcome: Outcome,
    /// Provider calls made, including retries (0 when skipped or no call was needed)
    pub attempts: u32,
}

/// Result of applying a plan, in plan order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub results: Vec<ResourceResult>,
}

impl ApplyReport {
    /// Look up the result for a resource.
    ///
    /// Returns the last action for the name, which matters only if a plan
    /// carries more than one action per resource.
    pub fn get(&self, name: &str) -> Option<&ResourceResult> {
        self.results.iter().rev().find(|r| r.name == name)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ResourceResult> {
        self.results.iter().filter(|r| r.outcome.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ResourceResult> {
        self.results.iter().filter(|r| r.outcome.is_failed())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ResourceResult> {
        self.results.iter().filter(|r| r.outcome.is_skipped())
    }

    /// True when every action succeeded
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_success())
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for result in &self.results {
            summary.add_result(result);
        }
        summary
    }
}

/// Counts of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Check if execution was fully successful
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Total number of actions processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.skipped + self.failed
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ResourceResult) {
        match (&result.outcome, result.kind) {
            (Outcome::Succeeded, ActionKind::Create) => self.created += 1,
            (Outcome::Succeeded, ActionKind::Update) => self.updated += 1,
            (Outcome::Succeeded, ActionKind::Delete) => self.deleted += 1,
            (Outcome::Failed { .. }, _) => self.failed += 1,
            (Outcome::Skipped { .. }, _) => self.skipped += 1,
        }
    }
}

/// Backoff settings for retryable provider errors
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Upper bound on a single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a config with the given attempt budget and default delays
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Calculate the delay after a failed attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// A config that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Options for plan execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of worker threads for provider calls
    pub jobs: usize,
    /// Per-attempt deadline handed to providers
    pub timeout: Option<Duration>,
    /// Retry policy for transient errors
    pub retry: RetryConfig,
    /// Stop dispatching new actions after the first failure
    pub fail_fast: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            timeout: Some(Duration::from_secs(300)),
            retry: RetryConfig::default(),
            fail_fast: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(kind: ActionKind, outcome: Outcome) -> ResourceResult {
        ResourceResult {
            name: "r".into(),
            resource_type: "t".into(),
            kind,
            outcome,
            attempts: 1,
        }
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_with_attempts_floor() {
        assert_eq!(RetryConfig::with_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_summary_counts() {
        let report = ApplyReport {
            results: vec![
                result(ActionKind::Create, Outcome::Succeeded),
                result(ActionKind::Update, Outcome::Succeeded),
                result(
                    ActionKind::Delete,
                    Outcome::Failed {
                        reason: "boom".into(),
                    },
                ),
                result(
                    ActionKind::Create,
                    Outcome::Skipped {
                        reason: "dep".into(),
                    },
                ),
            ],
        };
        let summary = report.summary();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total(), 4);
        assert!(!summary.is_success());
        assert!(!report.is_success());
    }

    #[test]
    fn test_declaration_builder() {
        let decl = Declaration::new("db", "database")
            .attr("size", 20)
            .depends_on("network");
        assert_eq!(decl.attributes["size"], Value::from(20));
        assert_eq!(decl.depends_on, vec!["network".to_string()]);
    }
}
