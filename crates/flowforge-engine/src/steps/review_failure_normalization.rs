//! ReviewFailureNormalizationStep (§4.4.6): reduces heterogeneous review
//! output into a canonical issue list.

use async_trait::async_trait;
use flowforge_schemas::StepSpec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::context::WorkflowContext;
use crate::step::{StepOutcome, ValidationResult, WorkflowStep};

#[derive(Debug, Deserialize)]
struct Config {
    /// Raw review persona output, or a literal template resolved through
    /// the context.
    raw_result: String,
    review_type: String,
    feature_branch: String,
}

fn parse_config(spec: &StepSpec) -> Result<Config, String> {
    serde_json::from_value(spec.config.clone()).map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct NormalizedIssue {
    description: String,
    severity: &'static str,
    labels: Vec<String>,
    severity_gap: bool,
}

/// Normalizes a severity value from either a keyword or a numeric score
/// (§4.4.6). Returns the severity plus whether a fallback rule fired,
/// which callers record as a "severity gap" telemetry event.
fn normalize_severity(value: &Value) -> (Severity, bool) {
    if let Some(text) = value.as_str() {
        let lower = text.to_lowercase();
        if lower.contains("critical") || lower.contains("severe") {
            return (Severity::Critical, false);
        }
        if lower.contains("high") || lower.contains("blocker") {
            return (Severity::High, false);
        }
        if lower.contains("medium") || lower.contains("moderate") {
            return (Severity::Medium, false);
        }
        if lower.contains("low") || lower.contains("minor") {
            return (Severity::Low, false);
        }
        return (Severity::Low, true);
    }
    if let Some(score) = value.as_f64() {
        if score >= 0.9 {
            return (Severity::Critical, false);
        }
        if score >= 0.6 {
            return (Severity::High, false);
        }
        if score >= 0.3 {
            return (Severity::Medium, false);
        }
        return (Severity::Low, false);
    }
    (Severity::Low, true)
}

fn describe(value: &Value) -> String {
    if let Some(text) = value.as_str() {
        return text.to_string();
    }
    if let Some(obj) = value.as_object() {
        for key in ["description", "summary", "message", "title"] {
            if let Some(text) = obj.get(key).and_then(Value::as_str) {
                return text.to_string();
            }
        }
    }
    value.to_string()
}

fn severity_value(value: &Value) -> Value {
    value
        .as_object()
        .and_then(|o| o.get("severity").or_else(|| o.get("score")))
        .cloned()
        .unwrap_or(Value::Null)
}

fn labels_for(review_type: &str, description: &str) -> Vec<String> {
    let mut labels = vec!["review-gap".to_string(), format!("{review_type}-gap")];
    let lower = description.to_lowercase();
    if lower.contains("no test framework") || lower.contains("missing test framework") || lower.contains("test infrastructure") {
        labels.push("infra".to_string());
    }
    labels
}

fn collect_from_array(array: &[Value], review_type: &str, issues: &mut Vec<NormalizedIssue>) {
    for entry in array {
        let description = describe(entry);
        let (severity, gap) = normalize_severity(&severity_value(entry));
        issues.push(NormalizedIssue {
            labels: labels_for(review_type, &description),
            description,
            severity: severity.as_str(),
            severity_gap: gap,
        });
    }
}

fn extract_issues(value: &Value, review_type: &str) -> Vec<NormalizedIssue> {
    let mut issues = Vec::new();

    if let Some(array) = value.get("root_causes").and_then(Value::as_array) {
        collect_from_array(array, review_type, &mut issues);
    }

    if let Some(findings) = value.get("findings").and_then(Value::as_object) {
        for bucket in findings.values() {
            if let Some(array) = bucket.as_array() {
                collect_from_array(array, review_type, &mut issues);
            }
        }
    }

    if let Some(array) = value.get("issues").and_then(Value::as_array) {
        collect_from_array(array, review_type, &mut issues);
    }

    if let Some(analysis) = value.get("critical_analysis").and_then(Value::as_object) {
        for entry in analysis.values() {
            if let Some(array) = entry.as_array() {
                collect_from_array(array, review_type, &mut issues);
            } else {
                let description = describe(entry);
                let (severity, gap) = normalize_severity(&severity_value(entry));
                issues.push(NormalizedIssue {
                    labels: labels_for(review_type, &description),
                    description,
                    severity: severity.as_str(),
                    severity_gap: gap,
                });
            }
        }
    }

    issues
}

pub struct ReviewFailureNormalizationStep;

#[async_trait]
impl WorkflowStep for ReviewFailureNormalizationStep {
    async fn validate(&self, spec: &StepSpec, _ctx: &WorkflowContext) -> ValidationResult {
        match parse_config(spec) {
            Ok(_) => ValidationResult::ok(),
            Err(err) => ValidationResult::invalid(format!("invalid review-failure-normalization config: {err}")),
        }
    }

    async fn execute(&self, spec: &StepSpec, ctx: &mut WorkflowContext) -> StepOutcome {
        let config = match parse_config(spec) {
            Ok(c) => c,
            Err(err) => return StepOutcome::failure(err),
        };

        if ctx.branch.as_deref() != Some(config.feature_branch.as_str()) {
            return StepOutcome::failure(format!(
                "branch mismatch: context is on {:?} but review targets {}",
                ctx.branch, config.feature_branch
            ));
        }

        let raw = ctx.resolve_template(&config.raw_result);
        let value: Value = serde_json::from_str(raw.trim()).unwrap_or(Value::Null);
        let issues = extract_issues(&value, &config.review_type);

        for issue in &issues {
            if issue.severity_gap {
                warn!(
                    step = spec.name,
                    description = issue.description,
                    "severity gap: falling back to default severity"
                );
            }
        }

        StepOutcome::success()
            .with_output("issue_count", json!(issues.len()))
            .with_output("issues", json!(issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_severity_matches_expected_buckets() {
        assert_eq!(normalize_severity(&json!("Critical defect")).0, Severity::Critical);
        assert_eq!(normalize_severity(&json!("blocker issue")).0, Severity::High);
        assert_eq!(normalize_severity(&json!("moderate concern")).0, Severity::Medium);
        assert_eq!(normalize_severity(&json!("minor nit")).0, Severity::Low);
    }

    #[test]
    fn numeric_severity_thresholds_match_spec() {
        assert_eq!(normalize_severity(&json!(0.95)).0, Severity::Critical);
        assert_eq!(normalize_severity(&json!(0.65)).0, Severity::High);
        assert_eq!(normalize_severity(&json!(0.35)).0, Severity::Medium);
        assert_eq!(normalize_severity(&json!(0.1)).0, Severity::Low);
    }

    #[test]
    fn unrecognized_severity_reports_gap() {
        let (severity, gap) = normalize_severity(&json!("mysterious"));
        assert_eq!(severity, Severity::Low);
        assert!(gap);
    }

    #[test]
    fn missing_test_framework_adds_infra_label() {
        let labels = labels_for("qa", "no test framework found in repository");
        assert!(labels.contains(&"infra".to_string()));
    }

    #[test]
    fn extracts_from_all_recognized_buckets() {
        let value = json!({
            "root_causes": [{"description": "root cause 1", "severity": "high"}],
            "findings": {"security": [{"description": "finding 1", "severity": "critical"}]},
            "issues": [{"description": "issue 1", "severity": "low"}],
            "critical_analysis": {"summary": {"description": "analysis issue", "severity": "medium"}},
        });
        let issues = extract_issues(&value, "qa");
        assert_eq!(issues.len(), 4);
    }
}
