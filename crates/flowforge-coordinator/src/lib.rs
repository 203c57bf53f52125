//! # FlowForge Coordinator
//!
//! The outer task-selection loop (§4.6): for one project, pick the next
//! milestone and task from the dashboard, prepare its git branch, drive
//! the [`flowforge_engine::WorkflowEngine`] over an operator-supplied
//! [`WorkflowProvider`], and reconcile task status on the way out.
//!
//! Embedders construct a [`Coordinator`] with their own `Transport`,
//! `DashboardClient`, and `WorkflowProvider` implementations and call
//! [`Coordinator::run_once`] (single iteration, e.g. from a cron) or
//! [`Coordinator::run_loop`] (continuous operation up to the iteration
//! bound).

pub mod config;
pub mod coordinator;

pub use config::{RetryLimit, RuntimeConfig, TransportType};
pub use coordinator::{Coordinator, CoordinatorError, RunOutcome, SelectedTask, TaskCompletion, WorkflowProvider};
