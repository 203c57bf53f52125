//! Typed client over the dashboard HTTP API (§6.1).

pub mod client;
pub mod http;
pub mod memory;

pub use client::{
    BulkCreateSummary, BulkCreateTasksRequest, BulkCreateTasksResponse, DashboardClient,
    DashboardError, Milestone, Project, Repository, SkippedTask, Task,
    EXTERNAL_ID_DUPLICATE_REASON_PREFIX,
};
pub use http::HttpDashboardClient;
pub use memory::InMemoryDashboardClient;
