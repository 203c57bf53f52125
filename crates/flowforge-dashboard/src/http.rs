//! `reqwest`-backed [`DashboardClient`], adapted from the source corpus's
//! thin HTTP client: base URL + one shared `reqwest::Client`, generic
//! get/post/patch helpers, and a single response-handling chokepoint that
//! maps status codes onto [`DashboardError`].

use async_trait::async_trait;
use flowforge_schemas::{TaskStatus, TaskToCreate};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::client::{
    BulkCreateTasksResponse, DashboardClient, DashboardError, Milestone, Project, Task,
};

pub struct HttpDashboardClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpDashboardClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, DashboardError> {
        let response = self.http.get(format!("{}{path}", self.base_url)).send().await?;
        self.handle_response(response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DashboardError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DashboardError> {
        let response = self
            .http
            .patch(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, DashboardError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        match status {
            StatusCode::NOT_FOUND => Err(DashboardError::NotFound),
            StatusCode::CONFLICT => Err(DashboardError::Conflict(message)),
            s if s.is_client_error() => Err(DashboardError::Client {
                status: s.as_u16(),
                message,
            }),
            s => Err(DashboardError::Server {
                status: s.as_u16(),
                message,
            }),
        }
    }
}

#[async_trait]
impl DashboardClient for HttpDashboardClient {
    async fn get_project(&self, project_id: &str) -> Result<Project, DashboardError> {
        self.get(&format!("/projects/{project_id}")).await
    }

    async fn get_project_status(&self, project_id: &str) -> Result<Project, DashboardError> {
        self.get(&format!("/projects/{project_id}/status")).await
    }

    async fn create_milestone(
        &self,
        project_id: &str,
        slug: &str,
        name: &str,
    ) -> Result<Milestone, DashboardError> {
        self.post(
            &format!("/projects/{project_id}/milestones"),
            &json!({"slug": slug, "name": name}),
        )
        .await
    }

    async fn patch_milestone(
        &self,
        project_id: &str,
        slug: &str,
        status: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Milestone, DashboardError> {
        self.patch(
            &format!("/projects/{project_id}/milestones/{slug}"),
            &json!({"status": status, "notes": notes}),
        )
        .await
    }

    async fn create_task(
        &self,
        project_id: &str,
        task: &TaskToCreate,
    ) -> Result<Task, DashboardError> {
        self.post(&format!("/projects/{project_id}/tasks"), task).await
    }

    async fn patch_task_status(
        &self,
        project_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<Task, DashboardError> {
        self.patch(
            &format!("/projects/{project_id}/tasks/{task_id}"),
            &json!({"status": status.as_str()}),
        )
        .await
    }

    async fn create_tasks_bulk(
        &self,
        project_id: &str,
        tasks: Vec<TaskToCreate>,
    ) -> Result<BulkCreateTasksResponse, DashboardError> {
        self.post(
            &format!("/projects/{project_id}/tasks:bulk"),
            &json!({"tasks": tasks}),
        )
        .await
    }

    async fn list_tasks(
        &self,
        project_id: &str,
        milestone_slug: Option<&str>,
    ) -> Result<Vec<Task>, DashboardError> {
        match milestone_slug {
            Some(slug) => {
                self.get(&format!("/projects/{project_id}/tasks?milestone_slug={slug}"))
                    .await
            }
            None => self.get(&format!("/projects/{project_id}/tasks")).await,
        }
    }

    async fn health(&self) -> Result<(), DashboardError> {
        self.get::<serde_json::Value>("/health").await.map(|_| ())
    }
}
