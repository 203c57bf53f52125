//! # FlowForge Engine
//!
//! The declarative workflow engine: per-run context, the `WorkflowStep`
//! contract, a type-erased step registry, the DAG scheduler, and the
//! concrete step kinds a workflow definition can reference by `type`
//! (§4.4).
//!
//! ## Architecture
//!
//! ```text
//! WorkflowEngine::run(definition, &mut ctx)
//!   -> validate_all(steps)            // fail pre-execution, no side effects
//!   -> run_steps(steps)               // topological order of depends_on
//!        step.validate / step.execute // via StepRegistry-created instances
//!        ctx.set_step_outputs(..)     // promote ${step}_<key> variables
//!   -> run_failure_handlers(..)       // best-effort, on any non-success outcome
//! ```
//!
//! Scheduling is single-threaded and cooperative within one run (§4.4):
//! steps execute one at a time, but a step's own body may suspend on
//! transport reads, git subprocesses, or dashboard HTTP calls.

pub mod condition_eval;
pub mod context;
pub mod engine;
pub mod registry;
pub mod step;
pub mod steps;

pub use context::WorkflowContext;
pub use engine::{WorkflowEngine, WorkflowOutcome};
pub use registry::StepRegistry;
pub use step::{StepOutcome, StepStatus, ValidationResult, WorkflowStep};
