//! GitOperationStep (§4.4.7).

use async_trait::async_trait;
use flowforge_schemas::StepSpec;
use serde::Deserialize;
use serde_json::json;

use crate::context::WorkflowContext;
use crate::step::{StepOutcome, ValidationResult, WorkflowStep};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", tag = "operation")]
enum Operation {
    CheckoutBranchFromBase {
        base: String,
        new_branch: String,
    },
    CommitAndPush {
        branch: String,
        paths: Vec<String>,
        message: String,
    },
    DescribeWorkingTree,
}

fn parse_config(spec: &StepSpec) -> Result<Operation, String> {
    serde_json::from_value(spec.config.clone()).map_err(|e| e.to_string())
}

pub struct GitOperationStep;

impl GitOperationStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GitOperationStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStep for GitOperationStep {
    async fn validate(&self, spec: &StepSpec, _ctx: &WorkflowContext) -> ValidationResult {
        match parse_config(spec) {
            Ok(_) => ValidationResult::ok(),
            Err(err) => ValidationResult::invalid(format!("invalid git-operation config: {err}")),
        }
    }

    async fn execute(&self, spec: &StepSpec, ctx: &mut WorkflowContext) -> StepOutcome {
        let operation = match parse_config(spec) {
            Ok(op) => op,
            Err(err) => return StepOutcome::failure(err),
        };

        let Some(repo_root) = ctx.repo_root.clone() else {
            return StepOutcome::failure("git-operation requires repo_root to be set on the context");
        };

        match operation {
            Operation::CheckoutBranchFromBase { base, new_branch } => {
                match ctx.git.describe_working_tree(&repo_root).await {
                    Ok(status) if status.dirty => {
                        ctx.request_abort("dirty_working_tree");
                        return StepOutcome::failure(format!(
                            "refusing checkout-from-base: {}",
                            status.summary
                        ));
                    }
                    Ok(_) => {}
                    Err(err) => return StepOutcome::failure(format!("git error: {err}")),
                }

                match ctx
                    .git
                    .checkout_branch_from_base(&repo_root, &base, &new_branch)
                    .await
                {
                    Ok(()) => {
                        ctx.branch = Some(new_branch.clone());
                        StepOutcome::success().with_output("branch", json!(new_branch))
                    }
                    Err(err) => StepOutcome::failure(format!("git error: {err}")),
                }
            }
            Operation::CommitAndPush { branch, paths, message } => {
                match ctx.git.commit_and_push_paths(&repo_root, &branch, &paths, &message).await {
                    Ok(outcome) if outcome.pushed => StepOutcome::success()
                        .with_output("committed", json!(outcome.committed))
                        .with_output("pushed", json!(true)),
                    Ok(outcome) if outcome.reason.as_deref() == Some("push_failed") => {
                        ctx.request_abort("push_failed");
                        StepOutcome::failure("push failed after commit")
                    }
                    Ok(outcome) => StepOutcome::success()
                        .with_output("committed", json!(outcome.committed))
                        .with_output("pushed", json!(false))
                        .with_output("reason", json!(outcome.reason)),
                    Err(err) => StepOutcome::failure(format!("git error: {err}")),
                }
            }
            Operation::DescribeWorkingTree => match ctx.git.describe_working_tree(&repo_root).await {
                Ok(status) => StepOutcome::success()
                    .with_output("dirty", json!(status.dirty))
                    .with_output("branch", json!(status.branch))
                    .with_output("summary", json!(status.summary)),
                Err(err) => StepOutcome::failure(format!("git error: {err}")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::process::Command as StdCommand;
    use std::sync::Arc;

    use flowforge_dashboard::InMemoryDashboardClient;
    use flowforge_git::GitWorkspace;
    use flowforge_personas::PersonaMessenger;
    use flowforge_transport::inprocess::InProcessTransport;
    use uuid::Uuid;

    use super::*;

    fn run_git(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .current_dir(dir)
            .args(args)
            .status()
            .expect("git binary must be available");
        assert!(status.success(), "git {args:?} failed");
    }

    /// A local repo with one commit and an uncommitted edit, so
    /// `describe_working_tree` reports `dirty=true` without touching a
    /// remote (§8 scenario S5).
    fn dirty_repo() -> (PathBuf, PathBuf) {
        let base = std::env::temp_dir().join(format!("flowforge-git-op-test-{}", Uuid::now_v7()));
        let repo_dir = base.join("repo");
        std::fs::create_dir_all(&repo_dir).unwrap();
        run_git(&repo_dir, &["init"]);
        run_git(&repo_dir, &["config", "user.email", "test@example.com"]);
        run_git(&repo_dir, &["config", "user.name", "Test"]);
        std::fs::write(repo_dir.join("a.txt"), "one\n").unwrap();
        run_git(&repo_dir, &["add", "a.txt"]);
        run_git(&repo_dir, &["commit", "-m", "init"]);
        std::fs::write(repo_dir.join("a.txt"), "one\ntwo\n").unwrap();
        (base, repo_dir)
    }

    fn test_ctx(repo_root: PathBuf, base_dir: PathBuf) -> WorkflowContext {
        let transport: Arc<dyn flowforge_transport::Transport> = Arc::new(InProcessTransport::new());
        let mut ctx = WorkflowContext::new(
            Uuid::now_v7(),
            transport.clone(),
            Arc::new(GitWorkspace::new(base_dir)),
            Arc::new(InMemoryDashboardClient::new()),
            Arc::new(PersonaMessenger::new(
                transport,
                "agent.requests",
                "agent.events",
                "flowforge-test",
                "coordinator-test",
            )),
        );
        ctx.repo_root = Some(repo_root);
        ctx
    }

    fn spec(config: serde_json::Value) -> StepSpec {
        StepSpec {
            name: "checkout".to_string(),
            kind: "git-operation".to_string(),
            description: String::new(),
            depends_on: Default::default(),
            condition: None,
            config,
            outputs: None,
            timeout_ms: None,
            retry: None,
        }
    }

    #[tokio::test]
    async fn dirty_working_tree_aborts_checkout_from_base() {
        let (base_dir, repo_dir) = dirty_repo();
        let mut ctx = test_ctx(repo_dir, base_dir.clone());
        let step = GitOperationStep::new();
        let config = spec(json!({
            "operation": "checkout_branch_from_base",
            "base": "main",
            "new_branch": "feature/x",
        }));

        let outcome = step.execute(&config, &mut ctx).await;

        assert!(!outcome.is_success());
        assert!(ctx.abort_requested());
        assert_eq!(ctx.abort_reason(), Some("dirty_working_tree"));
        std::fs::remove_dir_all(&base_dir).ok();
    }

    #[tokio::test]
    async fn describe_working_tree_reports_clean_repo() {
        let (base_dir, repo_dir) = dirty_repo();
        run_git(&repo_dir, &["checkout", "--", "a.txt"]);
        let mut ctx = test_ctx(repo_dir, base_dir.clone());
        let step = GitOperationStep::new();
        let config = spec(json!({"operation": "describe_working_tree"}));

        let outcome = step.execute(&config, &mut ctx).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.outputs.get("dirty"), Some(&json!(false)));
        std::fs::remove_dir_all(&base_dir).ok();
    }
}
