//! Coordinator-level integration tests (§8 scenario S1 and the Blocked
//! path). Drives a real local `git` repository (a bare "origin" plus a
//! working clone, both under a temp dir) so branch creation and
//! publishing are exercised for real, with `InProcessTransport` and
//! `InMemoryDashboardClient` standing in for the broker and dashboard.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use std::sync::Arc;

use flowforge_coordinator::config::{RetryLimit, RuntimeConfig, TransportType};
use flowforge_coordinator::{Coordinator, RunOutcome, SelectedTask, TaskCompletion, WorkflowProvider};
use flowforge_dashboard::{DashboardClient, InMemoryDashboardClient};
use flowforge_engine::StepRegistry;
use flowforge_git::GitWorkspace;
use flowforge_personas::PersonaMessenger;
use flowforge_schemas::{ContextGate, FailureHandling, Priority, StepSpec, TaskToCreate, Trigger, WorkflowDefinition};
use flowforge_transport::inprocess::InProcessTransport;
use uuid::Uuid;

fn run_git(dir: &Path, args: &[&str]) {
    let status = StdCommand::new("git")
        .current_dir(dir)
        .args(args)
        .status()
        .expect("git binary must be available");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

/// A bare "origin" repo seeded with one commit on `main`, plus an empty
/// workspace dir for `GitWorkspace` to clone into.
struct TestRepo {
    root: PathBuf,
    origin_path: PathBuf,
    workspace_dir: PathBuf,
}

impl TestRepo {
    fn new() -> Self {
        let root = std::env::temp_dir().join(format!("flowforge-coordinator-test-{}", Uuid::now_v7()));
        let origin_path = root.join("origin.git");
        let workspace_dir = root.join("workspaces");
        std::fs::create_dir_all(&origin_path).unwrap();
        std::fs::create_dir_all(&workspace_dir).unwrap();
        run_git(&origin_path, &["init", "--bare", "-b", "main"]);

        let seed = root.join("seed");
        std::fs::create_dir_all(&seed).unwrap();
        run_git(&seed, &["init", "-b", "main"]);
        run_git(&seed, &["config", "user.email", "test@example.com"]);
        run_git(&seed, &["config", "user.name", "Test"]);
        std::fs::write(seed.join("README.md"), "hello\n").unwrap();
        run_git(&seed, &["add", "README.md"]);
        run_git(&seed, &["commit", "-m", "init"]);
        run_git(&seed, &["remote", "add", "origin", origin_path.to_str().unwrap()]);
        run_git(&seed, &["push", "origin", "main"]);

        Self {
            root,
            origin_path,
            workspace_dir,
        }
    }

    fn remote_url(&self) -> String {
        self.origin_path.to_str().unwrap().to_string()
    }
}

impl Drop for TestRepo {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.root).ok();
    }
}

fn test_config(workspace_dir: &Path) -> RuntimeConfig {
    RuntimeConfig {
        project_base: workspace_dir.to_path_buf(),
        default_repo_name: "repo".to_string(),
        allow_workspace_git: false,
        git_username: None,
        git_password: None,
        git_token: None,
        git_ssh_key_path: None,
        git_credentials_path: None,
        git_default_branch: "main".to_string(),
        git_user_name: None,
        git_user_email: None,
        transport_type: TransportType::Local,
        broker_url: None,
        request_stream: "agent.requests".to_string(),
        event_stream: "agent.events".to_string(),
        group_prefix: "flowforge-test".to_string(),
        consumer_id: "coordinator-test".to_string(),
        persona_timeouts: Default::default(),
        persona_max_retries: Default::default(),
        persona_default_timeout_ms: 60_000,
        persona_default_max_retries: RetryLimit::Limited(3),
        persona_retry_backoff_increment_ms: 15_000,
        allowed_personas: Vec::new(),
        skip_persona_operations: true,
        skip_git_operations: false,
    }
}

struct OneStepWorkflow {
    step: StepSpec,
}

impl OneStepWorkflow {
    fn variable_set() -> Self {
        Self {
            step: StepSpec {
                name: "record-pickup".to_string(),
                kind: "variable-set".to_string(),
                description: String::new(),
                depends_on: Default::default(),
                condition: None,
                config: serde_json::json!({"picked_up": true}),
                outputs: None,
                timeout_ms: None,
                retry: None,
            },
        }
    }

    fn always_fails() -> Self {
        Self {
            step: StepSpec {
                name: "broken-step".to_string(),
                kind: "variable-set".to_string(),
                description: String::new(),
                depends_on: Default::default(),
                condition: None,
                // variable-set requires a non-empty object config; an empty
                // one fails validation, which the engine surfaces as a
                // `WorkflowOutcome::Failed` before any step executes.
                config: serde_json::json!({}),
                outputs: None,
                timeout_ms: None,
                retry: None,
            },
        }
    }
}

impl WorkflowProvider for OneStepWorkflow {
    fn workflow_for(&self, _selected: &SelectedTask) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "test-workflow".to_string(),
            version: "1".to_string(),
            description: String::new(),
            trigger: Trigger {
                condition: "true".to_string(),
            },
            context: ContextGate::default(),
            steps: vec![self.step.clone()],
            failure_handling: FailureHandling::default(),
        }
    }
}

fn build_coordinator(
    repo: &TestRepo,
    dashboard: Arc<InMemoryDashboardClient>,
    provider: Arc<dyn WorkflowProvider>,
) -> Coordinator {
    let config = test_config(&repo.workspace_dir);
    let transport: Arc<dyn flowforge_transport::Transport> = Arc::new(InProcessTransport::new());
    let git = Arc::new(GitWorkspace::new(repo.workspace_dir.clone()));
    let personas = Arc::new(PersonaMessenger::new(
        transport.clone(),
        config.request_stream.clone(),
        config.event_stream.clone(),
        config.group_prefix.clone(),
        config.consumer_id.clone(),
    ));
    let mut registry = StepRegistry::new();
    flowforge_engine::steps::register_builtins(&mut registry);

    Coordinator::new(config, dashboard, git, transport, personas, registry, provider)
}

#[tokio::test]
async fn happy_path_publishes_branch_and_marks_task_done() {
    let repo = TestRepo::new();
    let dashboard = Arc::new(InMemoryDashboardClient::new());
    dashboard.seed_project("proj-1", "Widget", &repo.remote_url());
    dashboard
        .create_milestone("proj-1", "foundation", "Foundation")
        .await
        .unwrap();
    let mut task = TaskToCreate::new("Set up CI", Priority::High);
    task.milestone_slug = Some("foundation".to_string());
    dashboard.create_task("proj-1", &task).await.unwrap();

    let provider: Arc<dyn WorkflowProvider> = Arc::new(OneStepWorkflow::variable_set());
    let coordinator = build_coordinator(&repo, dashboard.clone(), provider);

    let outcome = coordinator
        .run_once("proj-1", &HashSet::new())
        .await
        .expect("run_once should succeed");

    match outcome {
        RunOutcome::Completed { outcome, .. } => assert_eq!(outcome, TaskCompletion::Done),
        RunOutcome::NoTaskAvailable => panic!("expected a task to be selected"),
    }

    // The feature branch is named after the milestone (§4.6 / GLOSSARY).
    let tasks = dashboard.list_tasks("proj-1", Some("foundation")).await.unwrap();
    assert_eq!(tasks[0].status, "done");

    // `GitWorkspace::resolve` prefers the seeded project's name as the
    // directory hint (see `InMemoryDashboardClient::seed_project`).
    let clone_dir = repo.workspace_dir.join("widget");
    let branches = StdCommand::new("git")
        .current_dir(&clone_dir)
        .args(["branch", "-r"])
        .output()
        .unwrap();
    let branches = String::from_utf8_lossy(&branches.stdout);
    assert!(branches.contains("origin/milestone/foundation"), "{branches}");
}

#[tokio::test]
async fn no_eligible_task_reports_no_task_available() {
    let repo = TestRepo::new();
    let dashboard = Arc::new(InMemoryDashboardClient::new());
    dashboard.seed_project("proj-empty", "Widget", &repo.remote_url());

    let provider: Arc<dyn WorkflowProvider> = Arc::new(OneStepWorkflow::variable_set());
    let coordinator = build_coordinator(&repo, dashboard, provider);

    let outcome = coordinator.run_once("proj-empty", &HashSet::new()).await.unwrap();
    assert_eq!(outcome, RunOutcome::NoTaskAvailable);
}

#[tokio::test]
async fn workflow_failure_marks_task_blocked() {
    let repo = TestRepo::new();
    let dashboard = Arc::new(InMemoryDashboardClient::new());
    dashboard.seed_project("proj-2", "Widget", &repo.remote_url());
    let task = TaskToCreate::new("Fix the thing", Priority::Medium);
    dashboard.create_task("proj-2", &task).await.unwrap();

    let provider: Arc<dyn WorkflowProvider> = Arc::new(OneStepWorkflow::always_fails());
    let coordinator = build_coordinator(&repo, dashboard.clone(), provider);

    let outcome = coordinator.run_once("proj-2", &HashSet::new()).await.unwrap();
    match outcome {
        RunOutcome::Completed { outcome, .. } => {
            assert!(matches!(outcome, TaskCompletion::Blocked { .. }), "{outcome:?}")
        }
        RunOutcome::NoTaskAvailable => panic!("expected a task to be selected"),
    }

    let tasks = dashboard.list_tasks("proj-2", None).await.unwrap();
    assert_eq!(tasks[0].status, "blocked");
}
