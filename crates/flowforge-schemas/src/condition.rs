//! The step `condition` mini-language.
//!
//! A condition is a leaf comparison, or a chain of leaves joined by a single
//! logical operator (`&&` or `||` — the two never mix in one condition, so
//! there is no precedence to resolve and parentheses are never required).
//!
//! ```text
//! leaf       := "${" ident "}" ws ("=="|"!=") ws literal
//! literal    := "'" ... "'" | integer | "true" | "false" | "null"
//! condition  := leaf (("&&" leaf)* | ("||" leaf)*)
//! ```
//!
//! This module only parses the expression into a tree; resolving `${var}`
//! against a context and evaluating the comparisons is the engine's job
//! (`flowforge-engine::condition`), since that requires live variable state.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("empty condition")]
    Empty,
    #[error("mixed && and || in a single condition: {0:?}")]
    MixedOperators(String),
    #[error("malformed leaf expression: {0:?}")]
    MalformedLeaf(String),
    #[error("unterminated string literal: {0:?}")]
    UnterminatedString(String),
}

/// A literal value a variable is compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// `${var} <op> literal`
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub variable: String,
    pub op: CompareOp,
    pub literal: Literal,
}

/// A parsed condition: one leaf, or several joined by the same logical operator.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpr {
    pub leaves: Vec<Leaf>,
    pub join: Option<LogicalOp>,
}

impl ConditionExpr {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(ConditionError::Empty);
        }

        let has_and = trimmed.contains("&&");
        let has_or = trimmed.contains("||");
        if has_and && has_or {
            return Err(ConditionError::MixedOperators(trimmed.to_string()));
        }

        let join = if has_and {
            Some(LogicalOp::And)
        } else if has_or {
            Some(LogicalOp::Or)
        } else {
            None
        };

        let separator = match join {
            Some(LogicalOp::And) => "&&",
            Some(LogicalOp::Or) => "||",
            None => "",
        };

        let parts: Vec<&str> = if separator.is_empty() {
            vec![trimmed]
        } else {
            trimmed.split(separator).collect()
        };

        let leaves = parts
            .into_iter()
            .map(|part| parse_leaf(part.trim()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { leaves, join })
    }
}

fn parse_leaf(source: &str) -> Result<Leaf, ConditionError> {
    let (op, op_str) = if let Some(idx) = source.find("==") {
        (CompareOp::Eq, idx)
    } else if let Some(idx) = source.find("!=") {
        (CompareOp::Ne, idx)
    } else {
        return Err(ConditionError::MalformedLeaf(source.to_string()));
    };

    let lhs = source[..op_str].trim();
    let rhs = source[op_str + 2..].trim();

    let variable = lhs
        .strip_prefix("${")
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| ConditionError::MalformedLeaf(source.to_string()))?
        .to_string();

    let literal = parse_literal(rhs)?;

    Ok(Leaf {
        variable,
        op,
        literal,
    })
}

fn parse_literal(source: &str) -> Result<Literal, ConditionError> {
    if let Some(inner) = source.strip_prefix('\'') {
        let inner = inner
            .strip_suffix('\'')
            .ok_or_else(|| ConditionError::UnterminatedString(source.to_string()))?;
        return Ok(Literal::Str(inner.to_string()));
    }
    match source {
        "true" => Ok(Literal::Bool(true)),
        "false" => Ok(Literal::Bool(false)),
        "null" => Ok(Literal::Null),
        _ => source
            .parse::<i64>()
            .map(Literal::Int)
            .map_err(|_| ConditionError::MalformedLeaf(source.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_leaf() {
        let expr = ConditionExpr::parse("${task_type} == 'task'").unwrap();
        assert_eq!(expr.leaves.len(), 1);
        assert_eq!(expr.join, None);
        assert_eq!(expr.leaves[0].variable, "task_type");
        assert_eq!(expr.leaves[0].op, CompareOp::Eq);
        assert_eq!(expr.leaves[0].literal, Literal::Str("task".into()));
    }

    #[test]
    fn parses_and_chain() {
        let expr =
            ConditionExpr::parse("${a} == 'x' && ${b} != 'y' && ${c} == 1").unwrap();
        assert_eq!(expr.join, Some(LogicalOp::And));
        assert_eq!(expr.leaves.len(), 3);
        assert_eq!(expr.leaves[2].literal, Literal::Int(1));
    }

    #[test]
    fn rejects_mixed_operators() {
        let err = ConditionExpr::parse("${a} == 'x' && ${b} == 'y' || ${c} == 'z'").unwrap_err();
        assert!(matches!(err, ConditionError::MixedOperators(_)));
    }

    #[test]
    fn parses_bool_and_null_literals() {
        let expr = ConditionExpr::parse("${repo_required} == true").unwrap();
        assert_eq!(expr.leaves[0].literal, Literal::Bool(true));

        let expr = ConditionExpr::parse("${parent_task_id} == null").unwrap();
        assert_eq!(expr.leaves[0].literal, Literal::Null);
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(ConditionExpr::parse("   ").unwrap_err(), ConditionError::Empty);
    }
}
