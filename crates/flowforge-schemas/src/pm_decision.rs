//! Normalized PM-decision shape produced by [`PMDecisionParserStep`]
//! (§4.4.4). The `flowforge-engine` crate does the parsing; this module
//! just carries the normalized result and its serde surface.

use serde::{Deserialize, Serialize};

use crate::task::TaskToCreate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PmDecisionKind {
    ImmediateFix,
    Defer,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MilestoneUpdate {
    pub milestone_slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmDecision {
    pub decision: PmDecisionKind,
    #[serde(default)]
    pub follow_up_tasks: Vec<TaskToCreate>,
    #[serde(default)]
    pub milestone_updates: Vec<MilestoneUpdate>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl PmDecision {
    pub fn defer() -> Self {
        Self {
            decision: PmDecisionKind::Defer,
            follow_up_tasks: Vec::new(),
            milestone_updates: Vec::new(),
            warnings: Vec::new(),
        }
    }
}
