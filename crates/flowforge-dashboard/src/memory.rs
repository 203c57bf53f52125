//! In-memory [`DashboardClient`] test double. Implements the same
//! idempotent bulk-create and slug-uniqueness semantics the real
//! dashboard is required to provide, so steps can be exercised without an
//! HTTP server.

use std::collections::HashMap;

use async_trait::async_trait;
use flowforge_schemas::{TaskStatus, TaskToCreate};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::client::{
    BulkCreateSummary, BulkCreateTasksResponse, DashboardClient, DashboardError, Milestone,
    Project, Repository, SkippedTask, Task, EXTERNAL_ID_DUPLICATE_REASON_PREFIX,
};

struct ProjectState {
    project: Project,
    milestones: HashMap<String, Milestone>,
    tasks: HashMap<String, Task>,
    tasks_by_external_id: HashMap<String, String>,
    /// Insertion order, for the Coordinator's priority-then-order sort (§4.6).
    task_order: Vec<String>,
}

pub struct InMemoryDashboardClient {
    projects: RwLock<HashMap<String, ProjectState>>,
}

impl Default for InMemoryDashboardClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDashboardClient {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
        }
    }

    /// Seeds a project so steps under test can resolve its repository.
    pub fn seed_project(&self, id: &str, name: &str, remote_url: &str) {
        let repository = Repository {
            id: format!("{id}-repo"),
            remote_url: remote_url.to_string(),
            project_hint: Some(name.to_string()),
        };
        let project = Project {
            id: id.to_string(),
            name: name.to_string(),
            repository: Some(repository.clone()),
            repositories: vec![repository],
            milestones: Vec::new(),
        };
        self.projects.write().insert(
            id.to_string(),
            ProjectState {
                project,
                milestones: HashMap::new(),
                tasks: HashMap::new(),
                tasks_by_external_id: HashMap::new(),
                task_order: Vec::new(),
            },
        );
    }

    pub fn task_count(&self, project_id: &str) -> usize {
        self.projects
            .read()
            .get(project_id)
            .map(|p| p.tasks.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl DashboardClient for InMemoryDashboardClient {
    async fn get_project(&self, project_id: &str) -> Result<Project, DashboardError> {
        let mut projects = self.projects.write();
        let state = projects
            .get_mut(project_id)
            .ok_or(DashboardError::NotFound)?;
        state.project.milestones = state.milestones.values().cloned().collect();
        Ok(state.project.clone())
    }

    async fn get_project_status(&self, project_id: &str) -> Result<Project, DashboardError> {
        self.get_project(project_id).await
    }

    async fn create_milestone(
        &self,
        project_id: &str,
        slug: &str,
        name: &str,
    ) -> Result<Milestone, DashboardError> {
        let mut projects = self.projects.write();
        let state = projects
            .get_mut(project_id)
            .ok_or(DashboardError::NotFound)?;
        if state.milestones.contains_key(slug) {
            return Err(DashboardError::Conflict(format!(
                "milestone slug already exists: {slug}"
            )));
        }
        let milestone = Milestone {
            id: Uuid::now_v7().to_string(),
            slug: slug.to_string(),
            name: name.to_string(),
            status: Some("open".to_string()),
        };
        state.milestones.insert(slug.to_string(), milestone.clone());
        Ok(milestone)
    }

    async fn patch_milestone(
        &self,
        project_id: &str,
        slug: &str,
        status: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Milestone, DashboardError> {
        let mut projects = self.projects.write();
        let state = projects
            .get_mut(project_id)
            .ok_or(DashboardError::NotFound)?;
        let milestone = state
            .milestones
            .get_mut(slug)
            .ok_or(DashboardError::NotFound)?;
        if let Some(status) = status {
            milestone.status = Some(status.to_string());
        }
        let _ = notes;
        Ok(milestone.clone())
    }

    async fn create_task(
        &self,
        project_id: &str,
        task: &TaskToCreate,
    ) -> Result<Task, DashboardError> {
        let mut projects = self.projects.write();
        let state = projects
            .get_mut(project_id)
            .ok_or(DashboardError::NotFound)?;
        let created = insert_task(state, task);
        Ok(created)
    }

    async fn patch_task_status(
        &self,
        project_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<Task, DashboardError> {
        let mut projects = self.projects.write();
        let state = projects
            .get_mut(project_id)
            .ok_or(DashboardError::NotFound)?;
        let task = state.tasks.get_mut(task_id).ok_or(DashboardError::NotFound)?;
        task.status = status.as_str().to_string();
        Ok(task.clone())
    }

    async fn create_tasks_bulk(
        &self,
        project_id: &str,
        tasks: Vec<TaskToCreate>,
    ) -> Result<BulkCreateTasksResponse, DashboardError> {
        let mut projects = self.projects.write();
        let state = projects
            .get_mut(project_id)
            .ok_or(DashboardError::NotFound)?;

        let total_requested = tasks.len();
        let mut created = Vec::new();
        let mut skipped = Vec::new();

        for task in &tasks {
            if let Some(external_id) = &task.external_id {
                if let Some(existing_id) = state.tasks_by_external_id.get(external_id) {
                    skipped.push(SkippedTask {
                        task: task.title.clone(),
                        external_id: Some(external_id.clone()),
                        reason: format!("{EXTERNAL_ID_DUPLICATE_REASON_PREFIX}: {existing_id}"),
                    });
                    continue;
                }
            }
            created.push(insert_task(state, task));
        }

        Ok(BulkCreateTasksResponse {
            summary: BulkCreateSummary {
                total_requested,
                created: created.len(),
                skipped: skipped.len(),
            },
            created,
            skipped,
        })
    }

    async fn list_tasks(
        &self,
        project_id: &str,
        milestone_slug: Option<&str>,
    ) -> Result<Vec<Task>, DashboardError> {
        let projects = self.projects.read();
        let state = projects.get(project_id).ok_or(DashboardError::NotFound)?;
        Ok(state
            .task_order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|t| match milestone_slug {
                Some(slug) => t.milestone_slug.as_deref() == Some(slug),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn health(&self) -> Result<(), DashboardError> {
        Ok(())
    }
}

fn insert_task(state: &mut ProjectState, task: &TaskToCreate) -> Task {
    let id = Uuid::now_v7().to_string();
    let created = Task {
        id: id.clone(),
        title: task.title.clone(),
        status: TaskStatus::Open.as_str().to_string(),
        priority: Some(task.priority),
        external_id: task.external_id.clone(),
        milestone_slug: task.milestone_slug.clone(),
    };
    if let Some(external_id) = &task.external_id {
        state.tasks_by_external_id.insert(external_id.clone(), id.clone());
    }
    state.tasks.insert(id.clone(), created.clone());
    state.task_order.push(id);
    created
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_project() -> InMemoryDashboardClient {
        let client = InMemoryDashboardClient::new();
        client.seed_project("p1", "Widget", "git@example.com:acme/widget.git");
        client
    }

    #[tokio::test]
    async fn bulk_create_is_idempotent_on_external_id() {
        let client = client_with_project();
        let mut task = TaskToCreate::new("Fix bug", flowforge_schemas::Priority::High);
        task.external_id = Some("jira-123".into());

        let first = client
            .create_tasks_bulk("p1", vec![task.clone()])
            .await
            .unwrap();
        assert_eq!(first.summary.created, 1);

        let second = client.create_tasks_bulk("p1", vec![task]).await.unwrap();
        assert_eq!(second.summary.created, 0);
        assert_eq!(second.summary.skipped, 1);
        assert_eq!(client.task_count("p1"), 1);
    }

    #[tokio::test]
    async fn milestone_slug_conflict_is_409() {
        let client = client_with_project();
        client.create_milestone("p1", "m1", "Milestone 1").await.unwrap();
        let err = client
            .create_milestone("p1", "m1", "Milestone 1 again")
            .await
            .unwrap_err();
        assert!(matches!(err, DashboardError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let client = InMemoryDashboardClient::new();
        let err = client.get_project("missing").await.unwrap_err();
        assert!(matches!(err, DashboardError::NotFound));
    }
}
