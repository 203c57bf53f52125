//! The abstract step contract every concrete step kind implements (§4.4).

use std::collections::HashMap;

use async_trait::async_trait;
use flowforge_schemas::StepSpec;
use serde_json::Value;

use crate::context::WorkflowContext;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![error.into()],
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Failure,
}

/// What `execute` hands back to the scheduler. `outputs` are promoted into
/// the context under `${step_name}.<key>` and, when the spec declares an
/// `outputs` mapping, also under the mapped context variable name.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub status: Option<StepStatus>,
    pub data: Option<Value>,
    pub outputs: HashMap<String, Value>,
    pub error: Option<String>,
    pub metrics: Option<Value>,
}

impl StepOutcome {
    pub fn success() -> Self {
        Self {
            status: Some(StepStatus::Success),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: Some(StepStatus::Failure),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(StepStatus::Success)
    }
}

/// A runnable unit of work inside a workflow. Implementations must be
/// stateless across invocations — all per-run state lives in
/// [`WorkflowContext`], since the same step instance is reused for every
/// run that includes it (§4.4, registry pattern).
#[async_trait]
pub trait WorkflowStep: Send + Sync {
    /// Checks `spec.config` before any side effect runs. A workflow whose
    /// steps don't all validate fails pre-execution with no side effects.
    async fn validate(&self, spec: &StepSpec, ctx: &WorkflowContext) -> ValidationResult;

    async fn execute(&self, spec: &StepSpec, ctx: &mut WorkflowContext) -> StepOutcome;
}
