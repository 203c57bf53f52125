//! PersonaRequestStep (§4.4.1).

use std::time::Duration;

use async_trait::async_trait;
use flowforge_personas::{PersonaResponseInterpreter, SendRequest};
use flowforge_schemas::StepSpec;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::context::WorkflowContext;
use crate::step::{StepOutcome, ValidationResult, WorkflowStep};

const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_INCREMENT_MS: u64 = 30_000;

#[derive(Debug, Deserialize)]
struct Config {
    persona: String,
    intent: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timeout_ms: Option<u64>,
    /// `null`/absent defers to the per-persona table; a JSON `"unlimited"`
    /// string means no retry cap.
    #[serde(default)]
    max_retries: Option<Value>,
}

fn parse_config(spec: &StepSpec) -> Result<Config, String> {
    serde_json::from_value(spec.config.clone()).map_err(|e| e.to_string())
}

/// `None` means unlimited attempts.
fn resolve_max_retries(config: &Config, ctx: &WorkflowContext, persona: &str) -> Option<u32> {
    if let Some(value) = &config.max_retries {
        return max_retries_from_value(value);
    }
    if let Some(table) = ctx.get_variable("persona_max_retries").and_then(|v| v.as_object()) {
        if let Some(value) = table.get(persona) {
            return max_retries_from_value(value);
        }
    }
    if let Some(value) = ctx.get_variable("persona_default_max_retries") {
        return max_retries_from_value(value);
    }
    Some(DEFAULT_MAX_RETRIES)
}

fn max_retries_from_value(value: &Value) -> Option<u32> {
    match value {
        Value::String(s) if s == "unlimited" => None,
        Value::Number(n) => n.as_u64().map(|n| n as u32),
        _ => Some(DEFAULT_MAX_RETRIES),
    }
}

fn resolve_base_timeout(config: &Config, ctx: &WorkflowContext, persona: &str) -> u64 {
    if let Some(timeout) = config.timeout_ms {
        return timeout;
    }
    if let Some(table) = ctx.get_variable("persona_timeouts").and_then(|v| v.as_object()) {
        if let Some(value) = table.get(persona).and_then(Value::as_u64) {
            return value;
        }
    }
    ctx.get_variable("persona_default_timeout_ms")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_TIMEOUT_MS)
}

fn resolve_backoff_increment(ctx: &WorkflowContext) -> u64 {
    ctx.get_variable("persona_retry_backoff_increment_ms")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_BACKOFF_INCREMENT_MS)
}

fn enrich_payload(base: &Value, ctx: &WorkflowContext) -> Value {
    let mut payload = match base {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    if let Some(task_id) = ctx.get_variable("task_id") {
        payload.entry("task").or_insert_with(|| task_id.clone());
    }
    let repo = ctx
        .get_variable("effective_repo_path")
        .or_else(|| ctx.get_variable("repo_remote"))
        .cloned();
    if let Some(repo) = repo {
        payload.insert("repo".to_string(), repo);
    }
    if let Some(branch) = &ctx.branch {
        payload.insert("branch".to_string(), json!(branch));
    }
    if let Some(project_id) = &ctx.project_id {
        payload.insert("project_id".to_string(), json!(project_id));
    }
    Value::Object(payload)
}

pub struct PersonaRequestStep;

#[async_trait]
impl WorkflowStep for PersonaRequestStep {
    async fn validate(&self, spec: &StepSpec, _ctx: &WorkflowContext) -> ValidationResult {
        match parse_config(spec) {
            Ok(config) if config.persona.is_empty() => {
                ValidationResult::invalid("persona-request requires a non-empty persona")
            }
            Ok(config) if config.intent.is_empty() => {
                ValidationResult::invalid("persona-request requires a non-empty intent")
            }
            Ok(_) => ValidationResult::ok(),
            Err(err) => ValidationResult::invalid(format!("invalid persona-request config: {err}")),
        }
    }

    async fn execute(&self, spec: &StepSpec, ctx: &mut WorkflowContext) -> StepOutcome {
        let config = match parse_config(spec) {
            Ok(c) => c,
            Err(err) => return StepOutcome::failure(err),
        };

        if ctx.get_variable("skip_persona_operations") == Some(&Value::Bool(true)) {
            return StepOutcome::success()
                .with_output("status", json!("pass"))
                .with_output("result", json!(null))
                .with_output("details", json!("skip_persona_operations=true"));
        }

        let base_timeout = resolve_base_timeout(&config, ctx, &config.persona);
        let max_retries = resolve_max_retries(&config, ctx, &config.persona);
        let backoff_increment = resolve_backoff_increment(ctx);
        let payload = enrich_payload(&config.payload, ctx);

        let attempt_limit = max_retries.map(|n| n + 1).unwrap_or(u32::MAX);
        let mut attempt = 1u32;
        loop {
            let progressive_timeout = base_timeout + ((attempt - 1) as u64 * backoff_increment);

            let send_result = ctx
                .personas
                .send(SendRequest {
                    workflow_id: ctx.workflow_id,
                    step: Some(spec.name.clone()),
                    from: "coordinator".to_string(),
                    to_persona: config.persona.clone(),
                    intent: config.intent.clone(),
                    payload: payload.clone(),
                    deadline_s: Some(progressive_timeout / 1000),
                    repo: ctx.repo_root.as_ref().map(|p| p.display().to_string()),
                    branch: ctx.branch.clone(),
                    project_id: ctx.project_id.clone(),
                    task_id: ctx
                        .get_variable("task_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
                .await;

            let corr_id = match send_result {
                Ok(id) => id,
                Err(err) => return StepOutcome::failure(format!("failed to send request: {err}")),
            };

            let wait_result = ctx
                .personas
                .wait(
                    ctx.workflow_id,
                    &config.persona,
                    corr_id,
                    Duration::from_millis(progressive_timeout),
                )
                .await;

            match wait_result {
                Ok(event) => {
                    let raw = event.result.unwrap_or_default();
                    let status = PersonaResponseInterpreter::interpret(&config.persona, &raw);
                    return StepOutcome::success()
                        .with_output("status", json!(status.status.to_string()))
                        .with_output("result", json!(raw))
                        .with_output(
                            "details",
                            json!(status.details.unwrap_or_default()),
                        );
                }
                Err(flowforge_personas::PersonaMessengerError::PersonaTimeout(_)) => {
                    warn!(
                        step = spec.name,
                        attempt,
                        progressive_timeout,
                        "persona request timed out, retrying"
                    );
                    if attempt >= attempt_limit {
                        ctx.request_abort("persona_exhausted_retries");
                        return StepOutcome::failure(format!(
                            "persona {} timed out after {attempt} attempts on step {}. Base timeout: {base_timeout}ms. Final timeout: {progressive_timeout}ms.",
                            config.persona, spec.name
                        ));
                    }
                    attempt += 1;
                    continue;
                }
                Err(err) => return StepOutcome::failure(format!("persona messenger error: {err}")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use flowforge_dashboard::InMemoryDashboardClient;
    use flowforge_git::GitWorkspace;
    use flowforge_personas::PersonaMessenger;
    use flowforge_schemas::StepSpec;
    use flowforge_transport::inprocess::InProcessTransport;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::step::WorkflowStep as _;

    fn ctx() -> WorkflowContext {
        let transport: Arc<dyn flowforge_transport::Transport> = Arc::new(InProcessTransport::new());
        WorkflowContext::new(
            Uuid::now_v7(),
            transport.clone(),
            Arc::new(GitWorkspace::new("/tmp/flowforge-test-workspaces")),
            Arc::new(InMemoryDashboardClient::new()),
            Arc::new(PersonaMessenger::new(
                transport,
                "agent.requests",
                "agent.events",
                "flowforge-test",
                "coordinator-test",
            )),
        )
    }

    fn spec(config: Value) -> StepSpec {
        StepSpec {
            name: "lead-engineer-request".to_string(),
            kind: "persona-request".to_string(),
            description: String::new(),
            depends_on: Default::default(),
            condition: None,
            config,
            outputs: None,
            timeout_ms: None,
            retry: None,
        }
    }

    #[test]
    fn resolve_base_timeout_prefers_explicit_config() {
        let config = Config {
            persona: "lead-engineer".to_string(),
            intent: "implement".to_string(),
            payload: Value::Null,
            timeout_ms: Some(90_000),
            max_retries: None,
        };
        let ctx = ctx();
        assert_eq!(resolve_base_timeout(&config, &ctx, "lead-engineer"), 90_000);
    }

    #[test]
    fn resolve_max_retries_treats_unlimited_as_none() {
        let config = Config {
            persona: "lead-engineer".to_string(),
            intent: "implement".to_string(),
            payload: Value::Null,
            max_retries: Some(json!("unlimited")),
            timeout_ms: None,
        };
        let ctx = ctx();
        assert_eq!(resolve_max_retries(&config, &ctx, "lead-engineer"), None);
    }

    /// §8 property 2 / scenario S6: with a 90_000ms base and 30_000ms
    /// increment, attempt N's wait budget is `90_000 + (N-1)*30_000`.
    #[test]
    fn progressive_timeout_grows_linearly_with_attempt() {
        let base = 90_000u64;
        let increment = 30_000u64;
        let timeouts: Vec<u64> = (1..=3).map(|attempt| base + (attempt - 1) * increment).collect();
        assert_eq!(timeouts, vec![90_000, 120_000, 150_000]);
    }

    /// S6, compressed to millisecond-scale timeouts so the test runs fast:
    /// a persona that never responds exhausts `max_retries` and aborts the
    /// workflow with `persona_exhausted_retries`.
    #[tokio::test]
    async fn persona_timeout_exhausts_retries_and_requests_abort() {
        let mut ctx = ctx();
        ctx.set_variable("persona_retry_backoff_increment_ms", json!(5));
        let step = PersonaRequestStep;
        let spec = spec(json!({
            "persona": "lead-engineer",
            "intent": "implement",
            "timeout_ms": 5,
            "max_retries": 2,
        }));

        let outcome = step.execute(&spec, &mut ctx).await;

        assert!(!outcome.is_success());
        assert!(ctx.abort_requested());
        assert_eq!(ctx.abort_reason(), Some("persona_exhausted_retries"));
        assert!(outcome.error.unwrap().contains("timed out after 3 attempts"));
    }
}
