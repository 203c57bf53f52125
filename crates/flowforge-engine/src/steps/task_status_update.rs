//! TaskStatusUpdateStep: patches a task's status on the dashboard (§6.1).

use async_trait::async_trait;
use flowforge_schemas::{StepSpec, TaskStatus};
use serde::Deserialize;
use serde_json::json;

use crate::context::WorkflowContext;
use crate::step::{StepOutcome, ValidationResult, WorkflowStep};

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    task_id: Option<String>,
    status: String,
}

fn parse_status(raw: &str) -> Option<TaskStatus> {
    match raw {
        "open" => Some(TaskStatus::Open),
        "in_progress" => Some(TaskStatus::InProgress),
        "in_review" => Some(TaskStatus::InReview),
        "blocked" => Some(TaskStatus::Blocked),
        "done" => Some(TaskStatus::Done),
        "archived" => Some(TaskStatus::Archived),
        _ => None,
    }
}

pub struct TaskStatusUpdateStep;

#[async_trait]
impl WorkflowStep for TaskStatusUpdateStep {
    async fn validate(&self, spec: &StepSpec, _ctx: &WorkflowContext) -> ValidationResult {
        match serde_json::from_value::<Config>(spec.config.clone()) {
            Ok(config) if parse_status(&config.status).is_none() => {
                ValidationResult::invalid(format!("unknown task status: {}", config.status))
            }
            Ok(_) => ValidationResult::ok(),
            Err(err) => ValidationResult::invalid(format!("invalid task-status-update config: {err}")),
        }
    }

    async fn execute(&self, spec: &StepSpec, ctx: &mut WorkflowContext) -> StepOutcome {
        let config: Config = match serde_json::from_value(spec.config.clone()) {
            Ok(c) => c,
            Err(err) => return StepOutcome::failure(err.to_string()),
        };
        let Some(status) = parse_status(&config.status) else {
            return StepOutcome::failure(format!("unknown task status: {}", config.status));
        };
        let Some(task_id) = config
            .task_id
            .or_else(|| ctx.get_variable("task_id").and_then(|v| v.as_str()).map(str::to_string))
        else {
            return StepOutcome::failure("task-status-update requires task_id in config or context");
        };
        let Some(project_id) = ctx.project_id.clone() else {
            return StepOutcome::failure("task-status-update requires project_id in context");
        };

        match ctx.dashboard.patch_task_status(&project_id, &task_id, status).await {
            Ok(task) => StepOutcome::success()
                .with_output("task_id", json!(task.id))
                .with_output("status", json!(task.status)),
            Err(err) => StepOutcome::failure(format!("dashboard error: {err}")),
        }
    }
}
