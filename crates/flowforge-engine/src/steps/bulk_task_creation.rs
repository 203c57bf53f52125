//! BulkTaskCreationStep (§4.4.5): enrich -> dedup -> prioritize -> route ->
//! submit, with retry on retriable dashboard errors.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use flowforge_dashboard::{DashboardError, Task, EXTERNAL_ID_DUPLICATE_REASON_PREFIX};
use flowforge_schemas::{Priority, StepSpec, TaskToCreate};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::context::WorkflowContext;
use crate::step::{StepOutcome, ValidationResult, WorkflowStep};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Substrings that mark a bulk-create failure as worth retrying (§4.4.5).
const RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "etimedout",
    "econnreset",
    "econnrefused",
    "network",
    "rate limit",
    "429",
    "5xx",
];

#[derive(Debug, Deserialize)]
struct Config {
    tasks: Vec<TaskToCreate>,
    #[serde(default)]
    title_prefix: Option<String>,
    #[serde(default)]
    duplicate_strategy: Option<String>,
    #[serde(default)]
    existing_tasks: Vec<ExistingTask>,
    #[serde(default)]
    external_id_template: Option<String>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    abort_on_partial_failure: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ExistingTask {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    milestone_slug: Option<String>,
    #[serde(default)]
    external_id: Option<String>,
}

fn parse_config(spec: &StepSpec) -> Result<Config, String> {
    serde_json::from_value(spec.config.clone()).map_err(|e| e.to_string())
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn overlap_score(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    (intersection / union) * 100.0
}

/// Returns the id of the matching existing task, if any, under the
/// configured strategy (§4.4.5): `external_id` (exact match, score 100),
/// `title` (word-set overlap, threshold 80), or `title_and_milestone`
/// (weighted title/description overlap restricted to the same milestone,
/// threshold 70).
fn find_duplicate(task: &TaskToCreate, existing: &[ExistingTask], strategy: &str) -> Option<String> {
    match strategy {
        "external_id" => {
            let external_id = task.external_id.as_deref()?;
            existing
                .iter()
                .find(|e| e.external_id.as_deref() == Some(external_id))
                .map(|e| e.id.clone())
        }
        "title_and_milestone" => {
            let title_words = word_set(&task.title);
            let desc_words = task.description.as_deref().map(word_set).unwrap_or_default();
            existing
                .iter()
                .filter(|e| e.milestone_slug == task.milestone_slug)
                .map(|e| {
                    let title_score = overlap_score(&title_words, &word_set(&e.title));
                    let desc_score = e
                        .description
                        .as_deref()
                        .map(|d| overlap_score(&desc_words, &word_set(d)))
                        .unwrap_or(0.0);
                    (e.id.clone(), 0.7 * title_score + 0.3 * desc_score)
                })
                .find(|(_, score)| *score >= 70.0)
                .map(|(id, _)| id)
        }
        _ => {
            let title_words = word_set(&task.title);
            existing
                .iter()
                .map(|e| (e.id.clone(), overlap_score(&title_words, &word_set(&e.title))))
                .find(|(_, score)| *score >= 80.0)
                .map(|(id, _)| id)
        }
    }
}

fn title_slug(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn route_milestone(task: &TaskToCreate) -> Option<String> {
    match task.priority {
        Priority::Critical | Priority::High => Some("urgent".to_string()),
        Priority::Medium | Priority::Low => Some("deferred".to_string()),
    }
}

fn render_external_id(template: &str, workflow_id: &str, step_name: &str, index: usize, task: &TaskToCreate) -> String {
    template
        .replace("${workflow_run_id}", workflow_id)
        .replace("${step_name}", step_name)
        .replace("${task_index}", &index.to_string())
        .replace("${task.title_slug}", &title_slug(&task.title))
        .replace("${task.title}", &task.title)
        .replace("${task.priority}", task.priority.as_str())
        .replace("${task.milestone_slug}", task.milestone_slug.as_deref().unwrap_or(""))
}

fn enrich(config: &Config, ctx: &WorkflowContext, step_name: &str) -> Vec<TaskToCreate> {
    let strategy = config.duplicate_strategy.as_deref().unwrap_or("title");
    let template = config
        .external_id_template
        .as_deref()
        .unwrap_or("${workflow_run_id}:${step_name}:${task_index}");
    let workflow_id = ctx.workflow_id.to_string();

    config
        .tasks
        .iter()
        .enumerate()
        .map(|(index, original)| {
            let mut task = original.clone();
            if let Some(prefix) = &config.title_prefix {
                task.title = format!("{prefix}{}", task.title);
            }
            task.priority_score = Some(task.priority.default_score());
            if task.milestone_slug.is_none() {
                task.milestone_slug = route_milestone(&task);
            }
            if task.external_id.is_none() {
                task.external_id = Some(render_external_id(template, &workflow_id, step_name, index, &task));
            }
            if let Some(dup_id) = find_duplicate(&task, &config.existing_tasks, strategy) {
                task.is_duplicate = Some(true);
                task.duplicate_of_task_id = Some(dup_id);
                task.skip_reason = Some(format!("duplicate detected via {strategy} strategy"));
            }
            task
        })
        .collect()
}

fn is_retryable(err: &DashboardError) -> bool {
    if err.is_retriable() {
        return true;
    }
    let message = err.to_string().to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| message.contains(p))
}

pub struct BulkTaskCreationStep;

impl BulkTaskCreationStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BulkTaskCreationStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStep for BulkTaskCreationStep {
    async fn validate(&self, spec: &StepSpec, _ctx: &WorkflowContext) -> ValidationResult {
        match parse_config(spec) {
            Ok(config) if config.tasks.is_empty() => {
                ValidationResult::ok().with_warning("bulk-task-creation called with zero tasks")
            }
            Ok(_) => ValidationResult::ok(),
            Err(err) => ValidationResult::invalid(format!("invalid bulk-task-creation config: {err}")),
        }
    }

    async fn execute(&self, spec: &StepSpec, ctx: &mut WorkflowContext) -> StepOutcome {
        let config = match parse_config(spec) {
            Ok(c) => c,
            Err(err) => return StepOutcome::failure(err),
        };
        let Some(project_id) = ctx.project_id.clone() else {
            return StepOutcome::failure("bulk-task-creation requires project_id in context");
        };

        let enriched = enrich(&config, ctx, &spec.name);
        let submittable: Vec<TaskToCreate> = enriched
            .iter()
            .filter(|t| t.is_duplicate != Some(true))
            .cloned()
            .collect();
        let skipped_as_duplicate = enriched.len() - submittable.len();

        if submittable.is_empty() {
            return StepOutcome::success()
                .with_output("created_count", json!(0))
                .with_output("skipped_duplicate_count", json!(skipped_as_duplicate))
                .with_output("tasks", json!(Vec::<Task>::new()));
        }

        let max_attempts = config.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1);
        let mut attempt = 1u32;
        loop {
            match ctx.dashboard.create_tasks_bulk(&project_id, submittable.clone()).await {
                Ok(response) => {
                    let partial_failure = response.summary.created < response.summary.total_requested
                        && response
                            .skipped
                            .iter()
                            .any(|s| !s.reason.starts_with(EXTERNAL_ID_DUPLICATE_REASON_PREFIX));
                    if partial_failure && config.abort_on_partial_failure {
                        ctx.request_abort("bulk_task_creation_partial_failure");
                    }
                    return StepOutcome::success()
                        .with_output("created_count", json!(response.summary.created))
                        .with_output("skipped_duplicate_count", json!(skipped_as_duplicate))
                        .with_output("skipped_count", json!(response.summary.skipped))
                        .with_output("tasks", json!(response.created))
                        .with_output("skipped", json!(response.skipped));
                }
                Err(err) if is_retryable(&err) && attempt < max_attempts => {
                    warn!(step = spec.name, attempt, error = %err, "bulk task creation failed, retrying");
                    tokio::time::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1))).await;
                    attempt += 1;
                }
                Err(err) => return StepOutcome::failure(format!("dashboard error: {err}")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use flowforge_dashboard::{DashboardClient, InMemoryDashboardClient};
    use flowforge_git::GitWorkspace;
    use flowforge_personas::PersonaMessenger;
    use flowforge_transport::inprocess::InProcessTransport;
    use uuid::Uuid;

    use super::*;
    use crate::step::WorkflowStep as _;

    fn task(title: &str, priority: Priority) -> TaskToCreate {
        TaskToCreate::new(title, priority)
    }

    #[test]
    fn title_strategy_matches_near_identical_titles() {
        let existing = vec![ExistingTask {
            id: "t1".to_string(),
            title: "Fix the login redirect bug".to_string(),
            description: None,
            milestone_slug: None,
            external_id: None,
        }];
        let candidate = task("Fix login redirect bug", Priority::High);
        assert_eq!(find_duplicate(&candidate, &existing, "title"), Some("t1".to_string()));
    }

    #[test]
    fn external_id_strategy_requires_exact_match() {
        let existing = vec![ExistingTask {
            id: "t1".to_string(),
            title: "unrelated".to_string(),
            description: None,
            milestone_slug: None,
            external_id: Some("wf-1:step:0".to_string()),
        }];
        let mut candidate = task("totally different", Priority::Low);
        candidate.external_id = Some("wf-1:step:0".to_string());
        assert_eq!(find_duplicate(&candidate, &existing, "external_id"), Some("t1".to_string()));
    }

    #[test]
    fn critical_and_high_route_to_urgent_milestone() {
        assert_eq!(route_milestone(&task("x", Priority::Critical)), Some("urgent".to_string()));
        assert_eq!(route_milestone(&task("x", Priority::High)), Some("urgent".to_string()));
        assert_eq!(route_milestone(&task("x", Priority::Medium)), Some("deferred".to_string()));
        assert_eq!(route_milestone(&task("x", Priority::Low)), Some("deferred".to_string()));
    }

    #[test]
    fn external_id_template_renders_default_pattern() {
        let t = task("Example Title", Priority::Medium);
        let id = render_external_id(
            "${workflow_run_id}:${step_name}:${task_index}",
            "wf-123",
            "create-tasks",
            2,
            &t,
        );
        assert_eq!(id, "wf-123:create-tasks:2");
    }

    /// §8 S4: re-running a bulk-create with the same `external_id`s is
    /// idempotent, and that replay must not be mistaken for a partial
    /// failure even when `abort_on_partial_failure` is set.
    #[tokio::test]
    async fn external_id_replay_skip_does_not_trigger_partial_failure_abort() {
        let dashboard = InMemoryDashboardClient::new();
        dashboard.seed_project("p1", "Widget", "git@example.com:acme/widget.git");
        let mut existing = TaskToCreate::new("Fix bug", Priority::High);
        existing.external_id = Some("jira-1".to_string());
        dashboard
            .create_tasks_bulk("p1", vec![existing])
            .await
            .unwrap();

        let transport: Arc<dyn flowforge_transport::Transport> = Arc::new(InProcessTransport::new());
        let mut ctx = WorkflowContext::new(
            Uuid::now_v7(),
            transport.clone(),
            Arc::new(GitWorkspace::new("/tmp/flowforge-test-workspaces")),
            Arc::new(dashboard),
            Arc::new(PersonaMessenger::new(
                transport,
                "agent.requests",
                "agent.events",
                "flowforge-test",
                "coordinator-test",
            )),
        );
        ctx.project_id = Some("p1".to_string());

        let step = BulkTaskCreationStep::new();
        let spec = StepSpec {
            name: "create-tasks".to_string(),
            kind: "bulk-task-creation".to_string(),
            description: String::new(),
            depends_on: Default::default(),
            condition: None,
            config: json!({
                "tasks": [{"title": "Fix bug", "priority": "high", "external_id": "jira-1"}],
                "abort_on_partial_failure": true,
            }),
            outputs: None,
            timeout_ms: None,
            retry: None,
        };

        let outcome = step.execute(&spec, &mut ctx).await;

        assert!(outcome.is_success());
        assert!(!ctx.abort_requested());
    }
}
