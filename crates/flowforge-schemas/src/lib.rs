// FlowForge Schemas
//
// Decision: This crate is the source of truth for all shared data structures
// Decision: Minimal dependencies - only serde, uuid, chrono, thiserror
// Decision: No runtime logic - only type definitions, parsing, and serialization

pub mod condition;
pub mod persona;
pub mod pm_decision;
pub mod task;
pub mod workflow;

pub use condition::{ConditionError, ConditionExpr, Literal, LogicalOp};
pub use persona::{PersonaStatus, PersonaStatusKind};
pub use pm_decision::{MilestoneUpdate, PmDecision, PmDecisionKind};
pub use task::{Priority, TaskStatus, TaskToCreate};
pub use workflow::{
    ContextGate, FailureHandling, RetrySpec, StepSpec, Trigger, WorkflowDefinition,
};
