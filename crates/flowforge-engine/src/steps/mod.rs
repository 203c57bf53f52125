//! Concrete step kinds (§4.4.1-§4.4.7, plus the small utility kinds named
//! in §2 item 6).

pub mod bulk_task_creation;
pub mod git_operation;
pub mod persona_request;
pub mod planning_loop;
pub mod pm_decision_parser;
pub mod qa_iteration_loop;
pub mod review_failure_normalization;
pub mod task_status_update;
pub mod variable_set;

use crate::registry::StepRegistry;

/// Registers every built-in step kind under its `type` string.
pub fn register_builtins(registry: &mut StepRegistry) {
    registry.register("persona-request", || {
        std::sync::Arc::new(persona_request::PersonaRequestStep)
    });
    registry.register("git-operation", || {
        std::sync::Arc::new(git_operation::GitOperationStep::new())
    });
    registry.register("variable-set", || {
        std::sync::Arc::new(variable_set::VariableSetStep)
    });
    registry.register("task-status-update", || {
        std::sync::Arc::new(task_status_update::TaskStatusUpdateStep)
    });
    registry.register("pm-decision-parse", || {
        std::sync::Arc::new(pm_decision_parser::PmDecisionParserStep)
    });
    registry.register("bulk-task-creation", || {
        std::sync::Arc::new(bulk_task_creation::BulkTaskCreationStep::new())
    });
    registry.register("review-failure-normalization", || {
        std::sync::Arc::new(review_failure_normalization::ReviewFailureNormalizationStep)
    });
    registry.register("qa-iteration-loop", || {
        std::sync::Arc::new(qa_iteration_loop::QaIterationLoopStep)
    });
    registry.register("planning-loop", || {
        std::sync::Arc::new(planning_loop::PlanningLoopStep)
    });
}
