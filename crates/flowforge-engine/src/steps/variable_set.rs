//! VariableSetStep: assigns literal or template-interpolated values onto
//! the context (§2 item 6).

use async_trait::async_trait;
use flowforge_schemas::StepSpec;
use serde_json::Value;

use crate::context::WorkflowContext;
use crate::step::{StepOutcome, ValidationResult, WorkflowStep};

pub struct VariableSetStep;

#[async_trait]
impl WorkflowStep for VariableSetStep {
    async fn validate(&self, spec: &StepSpec, _ctx: &WorkflowContext) -> ValidationResult {
        match spec.config.as_object() {
            Some(map) if !map.is_empty() => ValidationResult::ok(),
            _ => ValidationResult::invalid("variable-set requires a non-empty object config"),
        }
    }

    async fn execute(&self, spec: &StepSpec, ctx: &mut WorkflowContext) -> StepOutcome {
        let Some(map) = spec.config.as_object() else {
            return StepOutcome::failure("variable-set config must be an object");
        };

        let mut outcome = StepOutcome::success();
        for (key, value) in map {
            let resolved = match value {
                Value::String(s) => Value::String(ctx.resolve_template(s)),
                other => other.clone(),
            };
            ctx.set_variable(key.clone(), resolved.clone());
            outcome = outcome.with_output(key.clone(), resolved);
        }
        outcome
    }
}
