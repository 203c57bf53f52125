//! PlanningLoopStep (§4.4.3): alternates planner and evaluator personas,
//! committing each artifact under `.ma/tasks/<taskId>/` best-effort.

use async_trait::async_trait;
use flowforge_personas::{PersonaResponseInterpreter, SendRequest};
use flowforge_schemas::StepSpec;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::context::WorkflowContext;
use crate::step::{StepOutcome, ValidationResult, WorkflowStep};

const DEFAULT_PLANNER_PERSONA: &str = "planner";
const DEFAULT_EVALUATOR_PERSONA: &str = "plan-evaluator";
const DEFAULT_MAX_ITERATIONS: u32 = 5;
const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const LENIENT_AFTER_ITERATION: u32 = 3;

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    planner_persona: Option<String>,
    #[serde(default)]
    evaluator_persona: Option<String>,
    #[serde(default)]
    max_iterations: Option<u32>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

fn parse_config(spec: &StepSpec) -> Result<Config, String> {
    serde_json::from_value(spec.config.clone()).map_err(|e| e.to_string())
}

pub struct PlanningLoopStep;

#[async_trait]
impl WorkflowStep for PlanningLoopStep {
    async fn validate(&self, spec: &StepSpec, _ctx: &WorkflowContext) -> ValidationResult {
        match parse_config(spec) {
            Ok(_) => ValidationResult::ok(),
            Err(err) => ValidationResult::invalid(format!("invalid planning-loop config: {err}")),
        }
    }

    async fn execute(&self, spec: &StepSpec, ctx: &mut WorkflowContext) -> StepOutcome {
        let config = match parse_config(spec) {
            Ok(c) => c,
            Err(err) => return StepOutcome::failure(err),
        };

        if ctx.get_variable("skip_persona_operations") == Some(&Value::Bool(true)) {
            return StepOutcome::success()
                .with_output("plan_accepted", json!(true))
                .with_output("iterations", json!(0));
        }

        let planner = config.planner_persona.clone().unwrap_or_else(|| DEFAULT_PLANNER_PERSONA.to_string());
        let evaluator = config.evaluator_persona.clone().unwrap_or_else(|| DEFAULT_EVALUATOR_PERSONA.to_string());
        let max_iterations = config.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS).max(1);
        let timeout_ms = config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        let task_id = ctx.get_variable("task_id").and_then(Value::as_str).unwrap_or("unknown").to_string();

        let mut evaluation_history: Vec<String> = Vec::new();
        let mut final_plan = String::new();

        for iteration in 1..=max_iterations {
            let lenient = iteration > LENIENT_AFTER_ITERATION;

            let plan_payload = json!({
                "task_id": task_id,
                "iteration": iteration,
                "evaluation_history": evaluation_history,
            });
            let plan_raw = match send_and_wait(ctx, &planner, "plan", plan_payload, timeout_ms).await {
                Ok(raw) => raw,
                Err(err) => return StepOutcome::failure(format!("planner request failed: {err}")),
            };
            final_plan = plan_raw.clone();
            commit_artifact(ctx, &task_id, &format!("02-plan-iteration-{iteration}.md"), &plan_raw).await;

            let eval_payload = json!({
                "task_id": task_id,
                "plan": plan_raw,
                "iteration": iteration,
                "lenient": lenient,
            });
            let eval_raw = match send_and_wait(ctx, &evaluator, "evaluate_plan", eval_payload, timeout_ms).await {
                Ok(raw) => raw,
                Err(err) => return StepOutcome::failure(format!("evaluator request failed: {err}")),
            };
            commit_artifact(ctx, &task_id, &format!("02-plan-eval-iteration-{iteration}.md"), &eval_raw).await;

            let status = PersonaResponseInterpreter::interpret(&evaluator, &eval_raw);
            if status.is_pass() {
                commit_artifact(ctx, &task_id, "03-plan-final.md", &final_plan).await;
                return StepOutcome::success()
                    .with_output("plan_accepted", json!(true))
                    .with_output("iterations", json!(iteration))
                    .with_output("plan", json!(final_plan));
            }
            evaluation_history.push(status.details.clone().unwrap_or(status.raw.clone()));
        }

        StepOutcome::failure(format!(
            "plan not accepted after {max_iterations} iteration(s)"
        ))
        .with_output("iterations", json!(max_iterations))
    }
}

async fn commit_artifact(ctx: &WorkflowContext, task_id: &str, filename: &str, content: &str) {
    let Some(repo_root) = ctx.repo_root.clone() else {
        return;
    };
    let Some(branch) = ctx.branch.clone() else {
        return;
    };
    let relative = format!(".ma/tasks/{task_id}/{filename}");
    let absolute = repo_root.join(&relative);
    if let Some(parent) = absolute.parent() {
        if let Err(err) = tokio::fs::create_dir_all(parent).await {
            warn!(error = %err, "failed to create planning artifact directory");
            return;
        }
    }
    if let Err(err) = tokio::fs::write(&absolute, content).await {
        warn!(error = %err, "failed to write planning artifact");
        return;
    }
    let message = format!("planning artifact: {filename}");
    if let Err(err) = ctx
        .git
        .commit_and_push_paths(&repo_root, &branch, &[relative], &message)
        .await
    {
        warn!(error = %err, "best-effort planning artifact commit failed");
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
