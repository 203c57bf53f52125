//! Trait and wire DTOs for the dashboard HTTP API (§6.1).

use async_trait::async_trait;
use flowforge_schemas::{TaskStatus, TaskToCreate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure kinds a dashboard call can surface (§7).
/// 4xx other than 404/409 is a step failure; 5xx/network is retried by
/// `BulkTaskCreationStep` but fails fast everywhere else.
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("client error ({status}): {message}")]
    Client { status: u16, message: String },
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl DashboardError {
    /// §7: 5xx and network errors are retriable; everything else is not.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Request(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub remote_url: String,
    #[serde(default)]
    pub project_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub repository: Option<Repository>,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: String,
    #[serde(default)]
    pub priority: Option<flowforge_schemas::Priority>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub milestone_slug: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkCreateTasksRequest {
    pub tasks: Vec<TaskToCreate>,
}

/// Reason prefix [`crate::memory::InMemoryDashboardClient`] emits for a
/// bulk-create entry skipped because its `external_id` already exists.
/// `HttpDashboardClient` forwards whatever a real server returns instead of
/// constructing this itself, so servers implementing §6.1's bulk endpoint
/// are expected to use the same prefix for idempotent-replay skips; callers
/// that need to tell idempotent replay apart from a genuine partial failure
/// (§4.4.5, §8 S4) should match on this prefix rather than exact-comparing
/// `SkippedTask.reason`.
pub const EXTERNAL_ID_DUPLICATE_REASON_PREFIX: &str = "duplicate external_id";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SkippedTask {
    pub task: String,
    pub external_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkCreateSummary {
    pub total_requested: usize,
    pub created: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkCreateTasksResponse {
    pub created: Vec<Task>,
    pub skipped: Vec<SkippedTask>,
    pub summary: BulkCreateSummary,
}

/// Everything a workflow step needs from the dashboard. Implemented by
/// [`crate::http::HttpDashboardClient`] for production use and by
/// [`crate::memory::InMemoryDashboardClient`] for tests.
#[async_trait]
pub trait DashboardClient: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Result<Project, DashboardError>;
    async fn get_project_status(&self, project_id: &str) -> Result<Project, DashboardError>;

    async fn create_milestone(
        &self,
        project_id: &str,
        slug: &str,
        name: &str,
    ) -> Result<Milestone, DashboardError>;

    async fn patch_milestone(
        &self,
        project_id: &str,
        slug: &str,
        status: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Milestone, DashboardError>;

    async fn create_task(
        &self,
        project_id: &str,
        task: &TaskToCreate,
    ) -> Result<Task, DashboardError>;

    async fn patch_task_status(
        &self,
        project_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<Task, DashboardError>;

    async fn create_tasks_bulk(
        &self,
        project_id: &str,
        tasks: Vec<TaskToCreate>,
    ) -> Result<BulkCreateTasksResponse, DashboardError>;

    /// Lists a project's tasks in creation order, optionally restricted to
    /// one milestone. The Coordinator (§4.6) sorts the result by priority
    /// score, falling back to this insertion order for ties.
    async fn list_tasks(
        &self,
        project_id: &str,
        milestone_slug: Option<&str>,
    ) -> Result<Vec<Task>, DashboardError>;

    async fn health(&self) -> Result<(), DashboardError>;
}
