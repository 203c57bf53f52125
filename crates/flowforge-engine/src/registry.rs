//! Maps a `StepSpec.type` string to a constructor for the concrete step
//! (§2 item 6). Adapted from the source corpus's workflow-factory registry:
//! a type-erased map of boxed closures, each producing a fresh
//! `Box<dyn WorkflowStep>` on demand, so registering a new step kind never
//! touches the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use crate::step::WorkflowStep;

type StepFactory = Box<dyn Fn() -> Arc<dyn WorkflowStep> + Send + Sync>;

#[derive(Default)]
pub struct StepRegistry {
    factories: HashMap<String, StepFactory>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        factory: impl Fn() -> Arc<dyn WorkflowStep> + Send + Sync + 'static,
    ) {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn create(&self, kind: &str) -> Option<Arc<dyn WorkflowStep>> {
        self.factories.get(kind).map(|factory| factory())
    }

    pub fn known_kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowforge_schemas::StepSpec;

    use crate::context::WorkflowContext;
    use crate::step::{StepOutcome, ValidationResult};

    struct NoopStep;

    #[async_trait]
    impl WorkflowStep for NoopStep {
        async fn validate(&self, _spec: &StepSpec, _ctx: &WorkflowContext) -> ValidationResult {
            ValidationResult::ok()
        }

        async fn execute(&self, _spec: &StepSpec, _ctx: &mut WorkflowContext) -> StepOutcome {
            StepOutcome::success()
        }
    }

    #[test]
    fn registers_and_creates_by_kind() {
        let mut registry = StepRegistry::new();
        registry.register("noop", || Arc::new(NoopStep));

        assert!(registry.contains("noop"));
        assert!(registry.create("noop").is_some());
        assert!(registry.create("missing").is_none());
    }
}
