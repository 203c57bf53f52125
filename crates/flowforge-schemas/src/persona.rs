//! The normalized persona status contract (§3.5).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonaStatusKind {
    Pass,
    Fail,
    Unknown,
}

impl std::fmt::Display for PersonaStatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Output of [`flowforge_personas::interpreter`]. `raw` is always the
/// untouched `result` payload so downstream steps and logs can recover the
/// original text even after normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaStatus {
    pub status: PersonaStatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub raw: String,
}

impl PersonaStatus {
    pub fn pass(raw: impl Into<String>) -> Self {
        Self {
            status: PersonaStatusKind::Pass,
            details: None,
            raw: raw.into(),
        }
    }

    pub fn fail(raw: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status: PersonaStatusKind::Fail,
            details: Some(details.into()),
            raw: raw.into(),
        }
    }

    pub fn unknown(raw: impl Into<String>) -> Self {
        Self {
            status: PersonaStatusKind::Unknown,
            details: None,
            raw: raw.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.status == PersonaStatusKind::Pass
    }
}
