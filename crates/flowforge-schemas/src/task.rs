//! Task types shared between the bulk-task-creation step and the dashboard
//! client (§3.6, §6.1).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    /// Base score used by the priority calculator (§4.4.5), before any
    /// per-workflow override mapping is applied.
    pub fn default_score(&self) -> i64 {
        match self {
            Self::Critical => 1500,
            Self::High => 1200,
            Self::Medium => 800,
            Self::Low => 50,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task status transitions used by the coordinator (§6.1):
/// `not_started -> in_progress -> in_review -> done`; failure -> `blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    InReview,
    Blocked,
    Done,
    Archived,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::InReview => "in_review",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A task to create via the dashboard's bulk endpoint (§3.6, §4.4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskToCreate {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_persona: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_duplicate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Computed by the priority calculator; not part of the operator-authored
    /// payload, but carried alongside it once enriched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_score: Option<i64>,
}

impl TaskToCreate {
    pub fn new(title: impl Into<String>, priority: Priority) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority,
            milestone_slug: None,
            parent_task_id: None,
            external_id: None,
            assignee_persona: None,
            metadata: None,
            is_duplicate: None,
            duplicate_of_task_id: None,
            skip_reason: None,
            priority_score: None,
        }
    }

    pub fn metadata_entry(&mut self, key: &str, value: serde_json::Value) {
        self.metadata
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scores_match_spec_defaults() {
        assert_eq!(Priority::Critical.default_score(), 1500);
        assert_eq!(Priority::High.default_score(), 1200);
        assert_eq!(Priority::Medium.default_score(), 800);
        assert_eq!(Priority::Low.default_score(), 50);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(Priority::parse("HIGH"), Some(Priority::High));
        assert_eq!(Priority::parse("nope"), None);
    }
}
