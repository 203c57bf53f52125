//! Declarative workflow definitions.
//!
//! A [`WorkflowDefinition`] is loaded once per run and never mutated; it is
//! the static description of what steps to run, in what order, under what
//! conditions. Runtime state lives in the engine's `WorkflowContext`, not
//! here.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// A predicate over initial variables that gates whether a workflow applies
/// to a task (e.g. `task_type == "task"`). Stored as the raw condition
/// string; parsed with [`crate::condition::ConditionExpr`] by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trigger {
    pub condition: String,
}

/// Gating flags that determine what context a workflow needs before it can
/// run at all (distinct from per-step `condition`s).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContextGate {
    #[serde(default)]
    pub repo_required: bool,
}

/// Per-step retry override.
///
/// `retryable_errors` is a narrowing filter: when present, only errors whose
/// code matches one of these strings are retried; everything else fails the
/// step immediately regardless of attempts remaining.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySpec {
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default)]
    pub retryable_errors: Option<Vec<String>>,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl RetrySpec {
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        if attempt <= 1 {
            return std::time::Duration::ZERO;
        }
        let retry_num = (attempt - 1) as i32 - 1;
        let millis = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(retry_num.max(0));
        std::time::Duration::from_millis(millis.round() as u64)
    }

    pub fn should_retry(&self, error_code: Option<&str>) -> bool {
        match (&self.retryable_errors, error_code) {
            (None, _) => true,
            (Some(allowed), Some(code)) => allowed.iter().any(|c| c == code),
            (Some(_), None) => false,
        }
    }
}

/// One step in a workflow. `config` is free-form JSON interpreted by the
/// concrete step kind named by `type` (looked up in the engine's step
/// registry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub outputs: Option<HashMap<String, String>>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetrySpec>,
}

/// Steps run when the workflow as a whole fails. Best-effort: a failing
/// failure-handler step is logged and does not re-raise (§7).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FailureHandling {
    #[serde(default)]
    pub on_workflow_failure: Vec<StepSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub trigger: Trigger,
    #[serde(default)]
    pub context: ContextGate,
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub failure_handling: FailureHandling,
}

impl WorkflowDefinition {
    /// All step names declared in this definition, in source order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn step(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_follows_exponential_backoff() {
        let spec = RetrySpec {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            retryable_errors: None,
        };
        assert_eq!(spec.delay_for_attempt(1), std::time::Duration::ZERO);
        assert_eq!(spec.delay_for_attempt(2), std::time::Duration::from_millis(1_000));
        assert_eq!(spec.delay_for_attempt(3), std::time::Duration::from_millis(2_000));
        assert_eq!(spec.delay_for_attempt(4), std::time::Duration::from_millis(4_000));
    }

    #[test]
    fn should_retry_honors_allowlist() {
        let spec = RetrySpec {
            max_attempts: 3,
            initial_delay_ms: 0,
            backoff_multiplier: 1.0,
            retryable_errors: Some(vec!["timeout".into()]),
        };
        assert!(spec.should_retry(Some("timeout")));
        assert!(!spec.should_retry(Some("dirty_working_tree")));
        assert!(!spec.should_retry(None));
    }

    #[test]
    fn deserializes_minimal_step() {
        let json = serde_json::json!({
            "name": "run_tests",
            "type": "persona-request",
            "config": {"persona": "tester-qa"}
        });
        let step: StepSpec = serde_json::from_value(json).unwrap();
        assert_eq!(step.kind, "persona-request");
        assert!(step.depends_on.is_empty());
    }
}
