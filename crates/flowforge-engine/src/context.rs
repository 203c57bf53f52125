//! Per-run mutable workflow state (§3.3).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use flowforge_dashboard::DashboardClient;
use flowforge_git::GitWorkspace;
use flowforge_personas::PersonaMessenger;
use flowforge_transport::Transport;
use serde_json::Value;
use uuid::Uuid;

/// Carries everything a step needs to read or mutate during one workflow
/// run, including handles to the collaborators steps invoke as side
/// effects (§2: "Git/DashboardClient are invoked by steps as side
/// effects"). `repo_root` is immutable for the life of a run; `branch` is
/// updated only by git-operation steps, and every reader must go through
/// the context rather than a snapshot taken at workflow start.
pub struct WorkflowContext {
    pub workflow_id: Uuid,
    pub project_id: Option<String>,
    pub repo_root: Option<PathBuf>,
    pub branch: Option<String>,
    pub transport: Arc<dyn Transport>,
    pub git: Arc<GitWorkspace>,
    pub dashboard: Arc<dyn DashboardClient>,
    pub personas: Arc<PersonaMessenger>,

    variables: HashMap<String, Value>,
    step_outputs: HashMap<String, HashMap<String, Value>>,
    completed_steps: Vec<String>,
    failed_step: Option<String>,
    abort_requested: bool,
    abort_reason: Option<String>,
}

impl WorkflowContext {
    pub fn new(
        workflow_id: Uuid,
        transport: Arc<dyn Transport>,
        git: Arc<GitWorkspace>,
        dashboard: Arc<dyn DashboardClient>,
        personas: Arc<PersonaMessenger>,
    ) -> Self {
        Self {
            workflow_id,
            project_id: None,
            repo_root: None,
            branch: None,
            transport,
            git,
            dashboard,
            personas,
            variables: HashMap::new(),
            step_outputs: HashMap::new(),
            completed_steps: Vec::new(),
            failed_step: None,
            abort_requested: false,
            abort_reason: None,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Promotes each output under `${step_name}_<key>` (§4.4.1's
    /// `${step}_status` convention), in addition to the per-step output map.
    pub fn set_step_outputs(&mut self, step_name: &str, outputs: HashMap<String, Value>) {
        for (key, value) in &outputs {
            self.variables
                .insert(format!("{step_name}_{key}"), value.clone());
        }
        self.step_outputs.insert(step_name.to_string(), outputs);
    }

    pub fn step_output(&self, step_name: &str, key: &str) -> Option<&Value> {
        self.step_outputs.get(step_name).and_then(|o| o.get(key))
    }

    pub fn mark_completed(&mut self, step_name: &str) {
        self.completed_steps.push(step_name.to_string());
    }

    pub fn is_completed(&self, step_name: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step_name)
    }

    pub fn mark_failed(&mut self, step_name: &str) {
        self.failed_step = Some(step_name.to_string());
    }

    pub fn failed_step(&self) -> Option<&str> {
        self.failed_step.as_deref()
    }

    pub fn request_abort(&mut self, reason: impl Into<String>) {
        self.abort_requested = true;
        self.abort_reason = Some(reason.into());
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    /// Resolves every `${name}` or `${name.field}` placeholder in `template`
    /// against variables and step outputs. Unknown variables resolve to the
    /// literal string `unknown` rather than failing (§4.4).
    pub fn resolve_template(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let name = &after[..end];
            out.push_str(&self.resolve_scalar(name));
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }

    /// Looks up a single `${name}` reference as a [`Value`], without string
    /// interpolation. Used by the condition evaluator, which needs to
    /// compare typed literals rather than stringified ones.
    pub fn resolve_value(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    fn resolve_scalar(&self, name: &str) -> String {
        match self.variables.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "unknown".to_string(),
        }
    }
}
