//! Drives a [`WorkflowDefinition`] to completion against a
//! [`WorkflowContext`] (§4.4).
//!
//! Scheduling is single-threaded and cooperative: steps run one at a time,
//! in topological order of `depends_on`, ties broken by source order.
//! Parallel execution across independent branches is not attempted — a
//! step itself may suspend on transport/git/HTTP without blocking the
//! process, which is enough concurrency across workflow runs sharing one
//! process.

use std::collections::HashSet;

use flowforge_schemas::{StepSpec, WorkflowDefinition};
use tracing::{error, info, warn};

use crate::condition_eval;
use crate::context::WorkflowContext;
use crate::registry::StepRegistry;
use crate::step::StepStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Success,
    Failed { failed_step: String, reason: String },
    Aborted { reason: String },
}

pub struct WorkflowEngine<'a> {
    registry: &'a StepRegistry,
}

impl<'a> WorkflowEngine<'a> {
    pub fn new(registry: &'a StepRegistry) -> Self {
        Self { registry }
    }

    /// Runs every step in `definition`, then `failure_handling` steps if the
    /// run did not succeed. Returns the terminal outcome.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        ctx: &mut WorkflowContext,
    ) -> WorkflowOutcome {
        if let Err(reason) = self.validate_all(definition, ctx).await {
            return WorkflowOutcome::Failed {
                failed_step: "<pre-execution>".to_string(),
                reason,
            };
        }

        let outcome = self.run_steps(&definition.steps, ctx).await;

        if !matches!(outcome, WorkflowOutcome::Success) {
            self.run_failure_handlers(definition, ctx).await;
        }

        outcome
    }

    async fn validate_all(
        &self,
        definition: &WorkflowDefinition,
        ctx: &WorkflowContext,
    ) -> Result<(), String> {
        for spec in &definition.steps {
            let Some(step) = self.registry.create(&spec.kind) else {
                return Err(format!("unknown step type: {}", spec.kind));
            };
            let result = step.validate(spec, ctx).await;
            if !result.valid {
                return Err(format!(
                    "step {} failed validation: {}",
                    spec.name,
                    result.errors.join("; ")
                ));
            }
            for warning in result.warnings {
                warn!(step = spec.name, warning, "step validation warning");
            }
        }
        Ok(())
    }

    async fn run_steps(&self, steps: &[StepSpec], ctx: &mut WorkflowContext) -> WorkflowOutcome {
        let mut remaining: Vec<&StepSpec> = steps.iter().collect();

        while !remaining.is_empty() {
            let Some(idx) = remaining.iter().position(|spec| self.is_ready(spec, ctx)) else {
                let names: Vec<&str> = remaining.iter().map(|s| s.name.as_str()).collect();
                error!(?names, "no ready step found; dependency cycle or unmet condition");
                return WorkflowOutcome::Failed {
                    failed_step: names.first().unwrap_or(&"<unknown>").to_string(),
                    reason: "no ready step: unmet dependency or cyclic depends_on".to_string(),
                };
            };
            let spec = remaining.remove(idx);

            if let Some(condition) = &spec.condition {
                match condition_eval::evaluate(condition, ctx) {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(step = spec.name, condition, "step skipped: condition false");
                        ctx.mark_completed(&spec.name);
                        continue;
                    }
                    Err(err) => {
                        ctx.mark_failed(&spec.name);
                        return WorkflowOutcome::Failed {
                            failed_step: spec.name.clone(),
                            reason: format!("condition error: {err}"),
                        };
                    }
                }
            }

            let Some(step) = self.registry.create(&spec.kind) else {
                ctx.mark_failed(&spec.name);
                return WorkflowOutcome::Failed {
                    failed_step: spec.name.clone(),
                    reason: format!("unknown step type: {}", spec.kind),
                };
            };

            info!(step = spec.name, kind = spec.kind, "executing step");
            let outcome = step.execute(spec, ctx).await;

            if let Some(mapping) = &spec.outputs {
                for (local_key, context_var) in mapping {
                    if let Some(value) = outcome.outputs.get(local_key) {
                        ctx.set_variable(context_var.clone(), value.clone());
                    }
                }
            }
            ctx.set_step_outputs(&spec.name, outcome.outputs.clone());

            match outcome.status {
                Some(StepStatus::Success) => {
                    ctx.mark_completed(&spec.name);
                }
                _ => {
                    ctx.mark_failed(&spec.name);
                    let reason = outcome.error.unwrap_or_else(|| "step failed".to_string());
                    error!(step = spec.name, reason, "step failed");
                    return WorkflowOutcome::Failed {
                        failed_step: spec.name.clone(),
                        reason,
                    };
                }
            }

            if ctx.abort_requested() {
                let reason = ctx.abort_reason().unwrap_or("workflow_abort_requested").to_string();
                warn!(reason, "workflow abort requested");
                return WorkflowOutcome::Aborted { reason };
            }
        }

        WorkflowOutcome::Success
    }

    /// Ready when all declared `depends_on` are terminal (success or
    /// skipped — both recorded via `mark_completed`). Does not consider
    /// `condition`, which is evaluated only once a step is chosen to run.
    fn is_ready(&self, spec: &StepSpec, ctx: &WorkflowContext) -> bool {
        spec.depends_on.iter().all(|dep| ctx.is_completed(dep))
    }

    /// Runs `failure_handling.on_workflow_failure` best-effort: each step's
    /// own failure is logged, never re-raised, and does not stop the
    /// remaining handlers from running (§4.4, §7).
    async fn run_failure_handlers(&self, definition: &WorkflowDefinition, ctx: &mut WorkflowContext) {
        let mut seen: HashSet<String> = HashSet::new();
        for spec in &definition.failure_handling.on_workflow_failure {
            if !seen.insert(spec.name.clone()) {
                continue;
            }
            let Some(step) = self.registry.create(&spec.kind) else {
                warn!(step = spec.name, kind = spec.kind, "failure handler has unknown step type");
                continue;
            };
            info!(step = spec.name, "running failure handler");
            let outcome = step.execute(spec, ctx).await;
            if !outcome.is_success() {
                warn!(
                    step = spec.name,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "failure handler step itself failed; continuing"
                );
            }
        }
    }
}
