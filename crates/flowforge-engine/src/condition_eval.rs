//! Evaluates a parsed [`ConditionExpr`] against a [`WorkflowContext`].
//!
//! Parsing (grammar, operator validation) lives in
//! `flowforge_schemas::condition`; this module only resolves `${var}`
//! against live state and applies the comparison.

use flowforge_schemas::condition::{CompareOp, ConditionExpr, Leaf, Literal, LogicalOp};
use serde_json::Value;

use crate::context::WorkflowContext;

/// Parses and evaluates `source` against `ctx`. A step with no `condition`
/// is always ready; this is only called when one is present.
pub fn evaluate(source: &str, ctx: &WorkflowContext) -> Result<bool, String> {
    let expr = ConditionExpr::parse(source).map_err(|e| e.to_string())?;
    Ok(evaluate_expr(&expr, ctx))
}

fn evaluate_expr(expr: &ConditionExpr, ctx: &WorkflowContext) -> bool {
    let results = expr.leaves.iter().map(|leaf| evaluate_leaf(leaf, ctx));
    match expr.join {
        Some(LogicalOp::And) => results.fold(true, |acc, r| acc && r),
        Some(LogicalOp::Or) => results.fold(false, |acc, r| acc || r),
        None => results.take(1).next().unwrap_or(false),
    }
}

fn evaluate_leaf(leaf: &Leaf, ctx: &WorkflowContext) -> bool {
    let resolved = ctx.resolve_value(&leaf.variable);
    let equal = literal_matches(resolved, &leaf.literal);
    match leaf.op {
        CompareOp::Eq => equal,
        CompareOp::Ne => !equal,
    }
}

/// `${var}` resolving to nothing is treated as the literal string
/// `"unknown"`, matching [`WorkflowContext::resolve_template`]'s behavior
/// for unresolved variables.
fn literal_matches(resolved: Option<&Value>, literal: &Literal) -> bool {
    match (resolved, literal) {
        (None, Literal::Str(s)) => s == "unknown",
        (None, _) => false,
        (Some(Value::String(s)), Literal::Str(l)) => s == l,
        (Some(Value::Bool(b)), Literal::Bool(l)) => b == l,
        (Some(Value::Null), Literal::Null) => true,
        (Some(Value::Number(n)), Literal::Int(l)) => n.as_i64() == Some(*l),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use flowforge_dashboard::InMemoryDashboardClient;
    use flowforge_git::GitWorkspace;
    use flowforge_personas::PersonaMessenger;
    use flowforge_transport::inprocess::InProcessTransport;
    use uuid::Uuid;

    fn ctx_with(vars: &[(&str, Value)]) -> WorkflowContext {
        let transport: Arc<dyn flowforge_transport::Transport> = Arc::new(InProcessTransport::new());
        let mut ctx = WorkflowContext::new(
            Uuid::now_v7(),
            transport.clone(),
            Arc::new(GitWorkspace::new("/tmp/flowforge-test-workspaces")),
            Arc::new(InMemoryDashboardClient::new()),
            Arc::new(PersonaMessenger::new(
                transport,
                "agent.requests",
                "agent.events",
                "flowforge",
                "coordinator-1",
            )),
        );
        for (k, v) in vars {
            ctx.set_variable(*k, v.clone());
        }
        ctx
    }

    #[test]
    fn single_leaf_matches_string() {
        let ctx = ctx_with(&[("task_type", Value::String("task".into()))]);
        assert!(evaluate("${task_type} == 'task'", &ctx).unwrap());
        assert!(!evaluate("${task_type} == 'bug'", &ctx).unwrap());
    }

    #[test]
    fn and_chain_requires_all_leaves() {
        let ctx = ctx_with(&[
            ("a", Value::String("x".into())),
            ("b", Value::String("y".into())),
        ]);
        assert!(evaluate("${a} == 'x' && ${b} == 'y'", &ctx).unwrap());
        assert!(!evaluate("${a} == 'x' && ${b} == 'z'", &ctx).unwrap());
    }

    #[test]
    fn unknown_variable_resolves_to_unknown_literal() {
        let ctx = ctx_with(&[]);
        assert!(evaluate("${missing} == 'unknown'", &ctx).unwrap());
        assert!(!evaluate("${missing} == 'task'", &ctx).unwrap());
    }

    #[test]
    fn null_and_bool_literals_compare_typed() {
        let ctx = ctx_with(&[
            ("parent_task_id", Value::Null),
            ("repo_required", Value::Bool(true)),
        ]);
        assert!(evaluate("${parent_task_id} == null", &ctx).unwrap());
        assert!(evaluate("${repo_required} == true", &ctx).unwrap());
    }
}
