//! `Coordinator`: the outer per-project loop (§4.6). Chooses the next
//! milestone and task from the dashboard, prepares the git branch, invokes
//! the workflow engine, and reconciles task status on the way out.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

use flowforge_dashboard::{DashboardClient, DashboardError, Milestone, Project, Task};
use flowforge_engine::{StepRegistry, WorkflowContext, WorkflowEngine, WorkflowOutcome};
use flowforge_git::GitWorkspace;
use flowforge_personas::PersonaMessenger;
use flowforge_schemas::{TaskStatus, WorkflowDefinition};
use flowforge_transport::Transport;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;

/// Iteration bound for [`Coordinator::run_loop`] (§4.6: "e.g. 50 to
/// prevent runaway").
const MAX_LOOP_ITERATIONS: u32 = 50;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("dashboard error: {0}")]
    Dashboard(#[from] DashboardError),
    #[error("git error: {0}")]
    Git(#[from] flowforge_git::GitWorkspaceError),
    #[error("project {0} has no repository configured")]
    NoRepository(String),
}

/// The task (and its milestone/project context) the coordinator picked for
/// one iteration.
#[derive(Debug, Clone)]
pub struct SelectedTask {
    pub task: Task,
    pub task_slug: String,
    pub milestone: Option<Milestone>,
    pub project_id: String,
    pub project_name: String,
    pub feature_branch: String,
}

/// Builds the workflow a selected task should run. Operators supply this
/// (workflow definitions themselves are out of scope, §1) so the
/// coordinator never hardcodes one fixed pipeline.
pub trait WorkflowProvider: Send + Sync {
    fn workflow_for(&self, selected: &SelectedTask) -> WorkflowDefinition;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No eligible milestone/task was found; the project has nothing to do
    /// right now.
    NoTaskAvailable,
    Completed {
        task_id: String,
        outcome: TaskCompletion,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCompletion {
    Done,
    InReview,
    Blocked { reason: String },
}

pub struct Coordinator {
    config: RuntimeConfig,
    dashboard: Arc<dyn DashboardClient>,
    git: Arc<GitWorkspace>,
    transport: Arc<dyn Transport>,
    personas: Arc<PersonaMessenger>,
    registry: StepRegistry,
    workflow_provider: Arc<dyn WorkflowProvider>,
}

impl Coordinator {
    pub fn new(
        config: RuntimeConfig,
        dashboard: Arc<dyn DashboardClient>,
        git: Arc<GitWorkspace>,
        transport: Arc<dyn Transport>,
        personas: Arc<PersonaMessenger>,
        registry: StepRegistry,
        workflow_provider: Arc<dyn WorkflowProvider>,
    ) -> Self {
        Self {
            config,
            dashboard,
            git,
            transport,
            personas,
            registry,
            workflow_provider,
        }
    }

    /// Runs every step of the outer loop once for `project_id`: select a
    /// task, prepare its branch, drive the engine, reconcile status.
    /// Returns `NoTaskAvailable` rather than erroring when the project has
    /// nothing eligible.
    pub async fn run_once(
        &self,
        project_id: &str,
        already_processed: &HashSet<String>,
    ) -> Result<RunOutcome, CoordinatorError> {
        let project = self.dashboard.get_project_status(project_id).await?;

        let Some(selected) = self.select_task(&project, already_processed).await? else {
            return Ok(RunOutcome::NoTaskAvailable);
        };

        let repository = project
            .repository
            .clone()
            .or_else(|| project.repositories.first().cloned())
            .ok_or_else(|| CoordinatorError::NoRepository(project.id.clone()))?;

        let repo_root = self
            .git
            .ensure(&repository.remote_url, repository.project_hint.as_deref())
            .await?;

        self.git
            .checkout_branch_from_base(&repo_root, &self.config.git_default_branch, &selected.feature_branch)
            .await?;
        self.git
            .ensure_branch_published(&repo_root, &selected.feature_branch)
            .await?;

        self.dashboard
            .patch_task_status(project_id, &selected.task.id, TaskStatus::InProgress)
            .await?;

        let workflow_id = Uuid::now_v7();
        let mut ctx = WorkflowContext::new(
            workflow_id,
            self.transport.clone(),
            self.git.clone(),
            self.dashboard.clone(),
            self.personas.clone(),
        )
        .with_variable("task_id", json!(selected.task.id))
        .with_variable("task_slug", json!(selected.task_slug))
        .with_variable("task_name", json!(selected.task.title))
        .with_variable(
            "milestone_slug",
            json!(selected.milestone.as_ref().map(|m| m.slug.clone())),
        )
        .with_variable(
            "milestone_name",
            json!(selected.milestone.as_ref().map(|m| m.name.clone())),
        )
        .with_variable("project_id", json!(selected.project_id))
        .with_variable("project_name", json!(selected.project_name))
        .with_variable("repo_remote", json!(repository.remote_url))
        .with_variable("feature_branch_name", json!(selected.feature_branch))
        .with_variable("base_branch", json!(self.config.git_default_branch));
        ctx.project_id = Some(selected.project_id.clone());
        ctx.repo_root = Some(repo_root);
        ctx.branch = Some(selected.feature_branch.clone());

        let definition = self.workflow_provider.workflow_for(&selected);
        let engine = WorkflowEngine::new(&self.registry);
        let outcome = engine.run(&definition, &mut ctx).await;

        let completion = self.reconcile_status(project_id, &selected.task.id, &outcome).await?;

        Ok(RunOutcome::Completed {
            task_id: selected.task.id,
            outcome: completion,
        })
    }

    /// Runs [`Self::run_once`] repeatedly until no task is available or
    /// `MAX_LOOP_ITERATIONS` is reached, tracking processed task ids
    /// in-run so a task is never reselected within the same loop (§4.6
    /// step 1).
    pub async fn run_loop(&self, project_id: &str) -> Result<Vec<RunOutcome>, CoordinatorError> {
        let mut processed = HashSet::new();
        let mut outcomes = Vec::new();

        for iteration in 0..MAX_LOOP_ITERATIONS {
            let outcome = self.run_once(project_id, &processed).await?;
            match &outcome {
                RunOutcome::NoTaskAvailable => {
                    info!(project_id, iteration, "no eligible task remaining; stopping loop");
                    outcomes.push(outcome);
                    break;
                }
                RunOutcome::Completed { task_id, .. } => {
                    processed.insert(task_id.clone());
                    outcomes.push(outcome);
                }
            }
        }

        if outcomes.len() as u32 >= MAX_LOOP_ITERATIONS {
            warn!(project_id, "coordinator loop hit the iteration bound");
        }

        Ok(outcomes)
    }

    async fn reconcile_status(
        &self,
        project_id: &str,
        task_id: &str,
        outcome: &WorkflowOutcome,
    ) -> Result<TaskCompletion, CoordinatorError> {
        match outcome {
            WorkflowOutcome::Success => {
                self.dashboard
                    .patch_task_status(project_id, task_id, TaskStatus::InReview)
                    .await?;
                self.dashboard
                    .patch_task_status(project_id, task_id, TaskStatus::Done)
                    .await?;
                Ok(TaskCompletion::Done)
            }
            WorkflowOutcome::Failed { failed_step, reason } => {
                warn!(project_id, task_id, failed_step, reason, "workflow failed; marking task blocked");
                self.dashboard
                    .patch_task_status(project_id, task_id, TaskStatus::Blocked)
                    .await?;
                Ok(TaskCompletion::Blocked {
                    reason: format!("{failed_step}: {reason}"),
                })
            }
            WorkflowOutcome::Aborted { reason } => {
                warn!(project_id, task_id, reason, "workflow aborted; marking task blocked");
                self.dashboard
                    .patch_task_status(project_id, task_id, TaskStatus::Blocked)
                    .await?;
                Ok(TaskCompletion::Blocked { reason: reason.clone() })
            }
        }
    }

    /// §4.6 step 1: first active milestone, else any milestone with
    /// not-done tasks; then the highest-priority not-done task within it
    /// not already processed this run.
    async fn select_task(
        &self,
        project: &Project,
        already_processed: &HashSet<String>,
    ) -> Result<Option<SelectedTask>, CoordinatorError> {
        let milestone = self.next_milestone(project).await?;
        let milestone_slug = milestone.as_ref().map(|m| m.slug.as_str());

        let mut tasks = self.dashboard.list_tasks(&project.id, milestone_slug).await?;
        tasks.retain(|t| !is_terminal_status(&t.status) && !already_processed.contains(&t.id));
        tasks.sort_by_key(|t| Reverse(t.priority.map(|p| p.default_score()).unwrap_or(0)));

        let Some(task) = tasks.into_iter().next() else {
            return Ok(None);
        };

        let task_slug = slugify(&task.title);
        // §4.6 / GLOSSARY: branch is named after the milestone when the task
        // belongs to one, else after the task itself.
        let feature_branch = match &milestone {
            Some(m) => format!("milestone/{}", m.slug),
            None => format!("task/{task_slug}"),
        };

        Ok(Some(SelectedTask {
            task,
            task_slug,
            milestone,
            project_id: project.id.clone(),
            project_name: project.name.clone(),
            feature_branch,
        }))
    }

    async fn next_milestone(&self, project: &Project) -> Result<Option<Milestone>, CoordinatorError> {
        if let Some(active) = project.milestones.iter().find(|m| is_active_status(m.status.as_deref())) {
            return Ok(Some(active.clone()));
        }
        for milestone in &project.milestones {
            let tasks = self.dashboard.list_tasks(&project.id, Some(&milestone.slug)).await?;
            if tasks.iter().any(|t| !is_terminal_status(&t.status)) {
                return Ok(Some(milestone.clone()));
            }
        }
        Ok(None)
    }
}

fn is_active_status(status: Option<&str>) -> bool {
    !matches!(status, Some("done") | Some("closed") | Some("archived"))
}

fn is_terminal_status(status: &str) -> bool {
    matches!(status, "done" | "archived")
}

fn slugify(title: &str) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_punctuation_and_case() {
        assert_eq!(slugify("Fix Login Redirect!"), "fix-login-redirect");
    }

    #[test]
    fn active_status_excludes_terminal_states() {
        assert!(is_active_status(None));
        assert!(is_active_status(Some("open")));
        assert!(!is_active_status(Some("done")));
        assert!(!is_active_status(Some("archived")));
    }
}
