//! PMDecisionParserStep (§4.4.4).

use async_trait::async_trait;
use flowforge_schemas::{MilestoneUpdate, PmDecision, PmDecisionKind, Priority, StepSpec, TaskToCreate};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::WorkflowContext;
use crate::step::{StepOutcome, ValidationResult, WorkflowStep};

#[derive(Debug, Deserialize)]
struct Config {
    /// Free-form persona response, or the raw variable name to read it from.
    #[serde(default)]
    raw_result: Option<String>,
    #[serde(default)]
    review_type: Option<String>,
}

fn extract_json(raw: &str) -> Value {
    let candidate = extract_fenced_block(raw).unwrap_or(raw).trim();
    serde_json::from_str(candidate).unwrap_or(Value::Null)
}

fn extract_fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```json").map(|i| i + "```json".len())
        .or_else(|| raw.find("```").map(|i| i + "```".len()))?;
    let rest = &raw[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

fn collect_follow_up_tasks(value: &Value, warnings: &mut Vec<String>) -> Vec<TaskToCreate> {
    let mut tasks = Vec::new();
    for key in ["follow_up_tasks", "followUpTasks"] {
        if let Some(arr) = value.get(key).and_then(Value::as_array) {
            tasks.extend(arr.iter().filter_map(|t| task_from_value(t, warnings)));
        }
    }
    if let Some(arr) = value.get("backlog").and_then(Value::as_array) {
        if !arr.is_empty() {
            warnings.push("backlog is deprecated; merged into follow_up_tasks".to_string());
        }
        tasks.extend(arr.iter().filter_map(|t| task_from_value(t, warnings)));
    }
    tasks
}

fn task_from_value(value: &Value, warnings: &mut Vec<String>) -> Option<TaskToCreate> {
    let obj = value.as_object()?;
    let priority_raw = obj.get("priority").and_then(Value::as_str).unwrap_or("medium");
    let parsed_priority = Priority::parse(priority_raw);
    let priority = parsed_priority.unwrap_or_else(|| {
        warnings.push(format!("invalid priority {priority_raw:?}, substituting medium"));
        Priority::Medium
    });

    // The step-level review_type prefix (if any) is applied once, by the
    // caller in parse_decision, after all follow-up tasks are collected.
    let title = match obj.get("title").and_then(Value::as_str) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => "untitled follow-up".to_string(),
    };
    let has_title = obj.get("title").and_then(Value::as_str).map(|t| !t.is_empty()).unwrap_or(false);

    let mut task = TaskToCreate::new(title, priority);
    task.description = obj.get("description").and_then(Value::as_str).map(str::to_string);
    task.milestone_slug = obj.get("milestone_slug").and_then(Value::as_str).map(str::to_string);
    if !has_title {
        task.metadata_entry("generated_title_reason", json!("missing_pm_title"));
    }
    if parsed_priority.is_none() {
        task.metadata_entry("invalid_priority_raw", json!(priority_raw));
    }
    Some(task)
}

fn collect_milestone_updates(value: &Value) -> Vec<MilestoneUpdate> {
    value
        .get("milestone_updates")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|m| {
                    let obj = m.as_object()?;
                    Some(MilestoneUpdate {
                        milestone_slug: obj.get("milestone_slug")?.as_str()?.to_string(),
                        status: obj.get("status").and_then(Value::as_str).map(str::to_string),
                        notes: obj.get("notes").and_then(Value::as_str).map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_decision(raw: &str, review_type: Option<&str>) -> PmDecision {
    let value = extract_json(raw);
    if value.is_null() {
        return PmDecision::defer();
    }

    let mut warnings = Vec::new();
    let mut follow_up_tasks = collect_follow_up_tasks(&value, &mut warnings);
    if let Some(review_type) = review_type {
        for task in &mut follow_up_tasks {
            if task.metadata.as_ref().map(|m| m.contains_key("generated_title_reason")).unwrap_or(false) {
                task.title = format!("{review_type}: {}", task.title);
            }
        }
    }

    let milestone_updates = collect_milestone_updates(&value);

    let raw_decision = value.get("decision").and_then(Value::as_str).unwrap_or("defer");
    let decision = if raw_decision == "immediate_fix" {
        if follow_up_tasks.is_empty() {
            warnings.push("immediate_fix with no follow_up_tasks, auto-corrected to defer".to_string());
            PmDecisionKind::Defer
        } else {
            PmDecisionKind::ImmediateFix
        }
    } else {
        PmDecisionKind::Defer
    };

    PmDecision {
        decision,
        follow_up_tasks,
        milestone_updates,
        warnings,
    }
}

pub struct PmDecisionParserStep;

#[async_trait]
impl WorkflowStep for PmDecisionParserStep {
    async fn validate(&self, spec: &StepSpec, _ctx: &WorkflowContext) -> ValidationResult {
        match serde_json::from_value::<Config>(spec.config.clone()) {
            Ok(_) => ValidationResult::ok(),
            Err(err) => ValidationResult::invalid(format!("invalid pm-decision-parse config: {err}")),
        }
    }

    async fn execute(&self, spec: &StepSpec, ctx: &mut WorkflowContext) -> StepOutcome {
        let config: Config = match serde_json::from_value(spec.config.clone()) {
            Ok(c) => c,
            Err(err) => return StepOutcome::failure(err.to_string()),
        };

        let raw = match &config.raw_result {
            Some(literal) => ctx.resolve_template(literal),
            None => ctx
                .get_variable("pm_raw_result")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };

        let decision = parse_decision(&raw, config.review_type.as_deref());
        let serialized = serde_json::to_value(&decision).unwrap_or(Value::Null);

        StepOutcome::success()
            .with_output("decision", json!(decision.decision))
            .with_output("follow_up_task_count", json!(decision.follow_up_tasks.len()))
            .with_output("warnings", json!(decision.warnings))
            .with_output("pm_decision", serialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_fix_with_no_tasks_auto_corrects_to_defer() {
        let decision = parse_decision(r#"{"decision": "immediate_fix", "follow_up_tasks": []}"#, None);
        assert_eq!(decision.decision, PmDecisionKind::Defer);
        assert!(decision.warnings.iter().any(|w| w.contains("auto-corrected")));
    }

    #[test]
    fn backlog_merges_into_follow_up_tasks_with_warning() {
        let decision = parse_decision(
            r#"{"decision": "defer", "backlog": [{"title": "old item", "priority": "low"}]}"#,
            None,
        );
        assert_eq!(decision.follow_up_tasks.len(), 1);
        assert!(decision.warnings.iter().any(|w| w.contains("deprecated")));
    }

    #[test]
    fn missing_title_gets_generated_title_reason() {
        let decision = parse_decision(
            r#"{"decision": "defer", "follow_up_tasks": [{"priority": "high"}]}"#,
            None,
        );
        let task = &decision.follow_up_tasks[0];
        assert!(task
            .metadata
            .as_ref()
            .and_then(|m| m.get("generated_title_reason"))
            .is_some());
    }

    #[test]
    fn parse_failure_falls_back_to_defer_never_panics() {
        let decision = parse_decision("not json at all", None);
        assert_eq!(decision.decision, PmDecisionKind::Defer);
    }

    #[test]
    fn missing_title_gets_a_single_review_type_prefix() {
        let decision = parse_decision(
            r#"{"decision": "defer", "follow_up_tasks": [{"priority": "high"}]}"#,
            Some("code-review"),
        );
        assert_eq!(decision.follow_up_tasks[0].title, "code-review: untitled follow-up");
    }

    #[test]
    fn invalid_priority_is_recorded_and_warning_is_truthful() {
        let decision = parse_decision(
            r#"{"decision": "defer", "follow_up_tasks": [{"title": "x", "priority": "urgent"}]}"#,
            None,
        );
        let task = &decision.follow_up_tasks[0];
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(
            task.metadata.as_ref().and_then(|m| m.get("invalid_priority_raw")),
            Some(&json!("urgent"))
        );
        assert!(decision.warnings.iter().any(|w| w.contains("substituting medium")));
    }
}
