//! QAIterationLoopStep (§4.4.2): plan-fix -> implement -> apply-diffs ->
//! commit -> retest, repeated until tester-qa passes or iterations run out.

use async_trait::async_trait;
use flowforge_personas::{PersonaResponseInterpreter, SendRequest};
use flowforge_schemas::{StepSpec, TaskStatus};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::context::WorkflowContext;
use crate::step::{StepOutcome, ValidationResult, WorkflowStep};

const DEFAULT_FIX_PERSONA: &str = "lead-engineer";
const DEFAULT_RETEST_PERSONA: &str = "tester-qa";
const DEFAULT_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    fix_persona: Option<String>,
    #[serde(default)]
    retest_persona: Option<String>,
    #[serde(default)]
    max_iterations: Option<u32>,
    #[serde(default)]
    commit_paths: Vec<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

fn parse_config(spec: &StepSpec) -> Result<Config, String> {
    serde_json::from_value(spec.config.clone()).map_err(|e| e.to_string())
}

pub struct QaIterationLoopStep;

#[async_trait]
impl WorkflowStep for QaIterationLoopStep {
    async fn validate(&self, spec: &StepSpec, _ctx: &WorkflowContext) -> ValidationResult {
        match parse_config(spec) {
            Ok(_) => ValidationResult::ok(),
            Err(err) => ValidationResult::invalid(format!("invalid qa-iteration-loop config: {err}")),
        }
    }

    async fn execute(&self, spec: &StepSpec, ctx: &mut WorkflowContext) -> StepOutcome {
        let config = match parse_config(spec) {
            Ok(c) => c,
            Err(err) => return StepOutcome::failure(err),
        };

        if ctx.get_variable("skip_persona_operations") == Some(&Value::Bool(true)) {
            return StepOutcome::success()
                .with_output("qa_passed", json!(true))
                .with_output("iterations", json!(0));
        }

        let fix_persona = config.fix_persona.clone().unwrap_or_else(|| DEFAULT_FIX_PERSONA.to_string());
        let retest_persona = config.retest_persona.clone().unwrap_or_else(|| DEFAULT_RETEST_PERSONA.to_string());
        let timeout_ms = config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        let Some(repo_root) = ctx.repo_root.clone() else {
            return StepOutcome::failure("qa-iteration-loop requires repo_root to be set on the context");
        };
        let Some(branch) = ctx.branch.clone() else {
            return StepOutcome::failure("qa-iteration-loop requires a checked-out branch");
        };

        let mut failure_history: Vec<String> = Vec::new();
        let mut iteration = 1u32;

        loop {
            let fix_payload = json!({
                "task": ctx.get_variable("task_id"),
                "failure_history": failure_history,
                "iteration": iteration,
            });
            if let Err(err) = send_and_wait(ctx, &fix_persona, "qa-fix", fix_payload, timeout_ms).await {
                return StepOutcome::failure(format!("fix persona request failed: {err}"));
            }

            if !config.commit_paths.is_empty() {
                let message = format!("qa-fix iteration {iteration}");
                match ctx.git.commit_and_push_paths(&repo_root, &branch, &config.commit_paths, &message).await {
                    Ok(outcome) if outcome.reason.as_deref() == Some("push_failed") => {
                        ctx.request_abort("push_failed");
                        return StepOutcome::failure("push failed while committing QA fix");
                    }
                    Ok(_) => {}
                    Err(err) => return StepOutcome::failure(format!("git error: {err}")),
                }
            }

            let retest_payload = json!({ "task": ctx.get_variable("task_id"), "iteration": iteration });
            let raw = match send_and_wait(ctx, &retest_persona, "retest", retest_payload, timeout_ms).await {
                Ok(raw) => raw,
                Err(err) => return StepOutcome::failure(format!("retest persona request failed: {err}")),
            };

            let status = PersonaResponseInterpreter::interpret(&retest_persona, &raw);
            if status.is_pass() {
                info!(step = spec.name, iteration, "qa iteration loop converged");
                if let Some(task_id) = ctx.get_variable("task_id").and_then(Value::as_str).map(str::to_string) {
                    if let Some(project_id) = ctx.project_id.clone() {
                        if let Err(err) = ctx.dashboard.patch_task_status(&project_id, &task_id, TaskStatus::Done).await {
                            warn!(error = %err, "failed to mark task done after QA pass");
                        }
                    }
                }
                return StepOutcome::success()
                    .with_output("qa_passed", json!(true))
                    .with_output("iterations", json!(iteration));
            }

            failure_history.push(status.details.clone().unwrap_or(status.raw.clone()));

            if let Some(max) = config.max_iterations {
                if iteration >= max {
                    ctx.request_abort("qa_max_iterations");
                    return StepOutcome::failure(format!(
                        "QA did not pass after {iteration} iteration(s); exhausted max_iterations={max}"
                    ));
                }
            }
            iteration += 1;
        }
    }
}

async fn send_and_wait(
    ctx: &WorkflowContext,
    persona: &str,
    intent: &str,
    payload: Value,
    timeout_ms: u64,
) -> Result<String, String> {
    let corr_id = ctx
        .personas
        .send(SendRequest {
            workflow_id: ctx.workflow_id,
            step: None,
            from: "coordinator".to_string(),
            to_persona: persona.to_string(),
            intent: intent.to_string(),
            payload,
            deadline_s: Some(timeout_ms / 1000),
            repo: ctx.repo_root.as_ref().map(|p| p.display().to_string()),
            branch: ctx.branch.clone(),
            project_id: ctx.project_id.clone(),
            task_id: ctx.get_variable("task_id").and_then(Value::as_str).map(str::to_string),
        })
        .await
        .map_err(|e| e.to_string())?;

    let event = ctx
        .personas
        .wait(ctx.workflow_id, persona, corr_id, std::time::Duration::from_millis(timeout_ms))
        .await
        .map_err(|e| e.to_string())?;
    Ok(event.result.unwrap_or_default())
}
