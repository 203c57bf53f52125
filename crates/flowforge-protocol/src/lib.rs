//! Request/event envelopes exchanged between the coordinator and personas
//! over the stream transport (§3.4).
//!
//! Every field is a string on the wire — that's what a stream transport's
//! field map holds — so these types round-trip through a
//! `HashMap<String, String>` rather than through protobuf or raw JSON.
//! `parse_envelope . serialize_envelope = id` is a testable property (§8).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid uuid in field {field}: {source}")]
    InvalidUuid {
        field: &'static str,
        #[source]
        source: uuid::Error,
    },
    #[error("invalid timestamp in field {field}: {source}")]
    InvalidTimestamp {
        field: &'static str,
        #[source]
        source: chrono::ParseError,
    },
    #[error("invalid integer in field {field}: {source}")]
    InvalidInt {
        field: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("unknown status value: {0:?}")]
    UnknownStatus(String),
}

/// A request sent from the coordinator to a persona (§3.4).
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMsg {
    pub workflow_id: Uuid,
    pub step: Option<String>,
    pub from: String,
    pub to_persona: String,
    pub intent: String,
    pub payload: serde_json::Value,
    pub corr_id: Uuid,
    pub deadline_s: Option<u64>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
}

impl RequestMsg {
    pub fn to_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("workflow_id".into(), self.workflow_id.to_string());
        insert_opt(&mut fields, "step", &self.step);
        fields.insert("from".into(), self.from.clone());
        fields.insert("to_persona".into(), self.to_persona.clone());
        fields.insert("intent".into(), self.intent.clone());
        fields.insert(
            "payload".into(),
            serde_json::to_string(&self.payload).unwrap_or_default(),
        );
        fields.insert("corr_id".into(), self.corr_id.to_string());
        if let Some(deadline) = self.deadline_s {
            fields.insert("deadline_s".into(), deadline.to_string());
        }
        insert_opt(&mut fields, "repo", &self.repo);
        insert_opt(&mut fields, "branch", &self.branch);
        insert_opt(&mut fields, "project_id", &self.project_id);
        insert_opt(&mut fields, "task_id", &self.task_id);
        fields
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, ProtocolError> {
        let workflow_id = parse_uuid(fields, "workflow_id")?;
        let from = required(fields, "from")?.clone();
        let to_persona = required(fields, "to_persona")?.clone();
        let intent = required(fields, "intent")?.clone();
        let payload = fields
            .get("payload")
            .map(|raw| serde_json::from_str(raw).unwrap_or(serde_json::Value::String(raw.clone())))
            .unwrap_or(serde_json::Value::Null);
        let corr_id = parse_uuid(fields, "corr_id")?;
        let deadline_s = fields
            .get("deadline_s")
            .map(|raw| {
                raw.parse::<u64>().map_err(|source| ProtocolError::InvalidInt {
                    field: "deadline_s",
                    source,
                })
            })
            .transpose()?;

        Ok(Self {
            workflow_id,
            step: fields.get("step").cloned(),
            from,
            to_persona,
            intent,
            payload,
            corr_id,
            deadline_s,
            repo: fields.get("repo").cloned(),
            branch: fields.get("branch").cloned(),
            project_id: fields.get("project_id").cloned(),
            task_id: fields.get("task_id").cloned(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Done,
    Progress,
    Error,
    Blocked,
}

impl EventStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Progress => "progress",
            Self::Error => "error",
            Self::Blocked => "blocked",
        }
    }

    fn parse(raw: &str) -> Result<Self, ProtocolError> {
        match raw {
            "done" => Ok(Self::Done),
            "progress" => Ok(Self::Progress),
            "error" => Ok(Self::Error),
            "blocked" => Ok(Self::Blocked),
            other => Err(ProtocolError::UnknownStatus(other.to_string())),
        }
    }
}

/// An event emitted by a persona in response to (or independent of) a
/// request (§3.4).
#[derive(Debug, Clone, PartialEq)]
pub struct EventMsg {
    pub workflow_id: Uuid,
    pub step: Option<String>,
    pub from_persona: String,
    pub status: EventStatus,
    pub result: Option<String>,
    pub corr_id: Option<Uuid>,
    pub ts: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl EventMsg {
    /// True when this event is the terminal reply to `(workflow_id,
    /// from_persona, corr_id)` — the correlation PersonaMessenger waits on
    /// (§4.3). Correlation is by `corr_id` alone, never by consumer position.
    pub fn matches(&self, workflow_id: Uuid, from_persona: &str, corr_id: Uuid) -> bool {
        self.workflow_id == workflow_id
            && self.from_persona == from_persona
            && self.corr_id == Some(corr_id)
    }

    pub fn to_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("workflow_id".into(), self.workflow_id.to_string());
        insert_opt(&mut fields, "step", &self.step);
        fields.insert("from_persona".into(), self.from_persona.clone());
        fields.insert("status".into(), self.status.as_str().to_string());
        insert_opt(&mut fields, "result", &self.result);
        if let Some(corr_id) = self.corr_id {
            fields.insert("corr_id".into(), corr_id.to_string());
        }
        if let Some(ts) = self.ts {
            fields.insert("ts".into(), ts.to_rfc3339());
        }
        insert_opt(&mut fields, "error", &self.error);
        fields
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, ProtocolError> {
        let workflow_id = parse_uuid(fields, "workflow_id")?;
        let from_persona = required(fields, "from_persona")?.clone();
        let status = EventStatus::parse(required(fields, "status")?)?;
        let corr_id = fields
            .get("corr_id")
            .map(|raw| {
                Uuid::parse_str(raw).map_err(|source| ProtocolError::InvalidUuid {
                    field: "corr_id",
                    source,
                })
            })
            .transpose()?;
        let ts = fields
            .get("ts")
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|source| ProtocolError::InvalidTimestamp { field: "ts", source })
            })
            .transpose()?;

        Ok(Self {
            workflow_id,
            step: fields.get("step").cloned(),
            from_persona,
            status,
            result: fields.get("result").cloned(),
            corr_id,
            ts,
            error: fields.get("error").cloned(),
        })
    }
}

fn insert_opt(fields: &mut HashMap<String, String>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        fields.insert(key.to_string(), v.clone());
    }
}

fn required<'a>(
    fields: &'a HashMap<String, String>,
    key: &'static str,
) -> Result<&'a String, ProtocolError> {
    fields.get(key).ok_or(ProtocolError::MissingField(key))
}

fn parse_uuid(fields: &HashMap<String, String>, key: &'static str) -> Result<Uuid, ProtocolError> {
    let raw = required(fields, key)?;
    Uuid::parse_str(raw).map_err(|source| ProtocolError::InvalidUuid { field: key, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips_through_fields() {
        let msg = RequestMsg {
            workflow_id: Uuid::now_v7(),
            step: Some("implement".into()),
            from: "coordinator".into(),
            to_persona: "lead-engineer".into(),
            intent: "implement_task".into(),
            payload: json!({"task_id": "42"}),
            corr_id: Uuid::now_v7(),
            deadline_s: Some(90),
            repo: Some("git@example.com:org/repo.git".into()),
            branch: Some("task/foo".into()),
            project_id: Some("p1".into()),
            task_id: Some("42".into()),
        };

        let fields = msg.to_fields();
        let parsed = RequestMsg::from_fields(&fields).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn event_round_trips_and_matches_correlation() {
        let workflow_id = Uuid::now_v7();
        let corr_id = Uuid::now_v7();
        let msg = EventMsg {
            workflow_id,
            step: Some("implement".into()),
            from_persona: "lead-engineer".into(),
            status: EventStatus::Done,
            result: Some(r#"{"status":"pass"}"#.into()),
            corr_id: Some(corr_id),
            ts: Some(Utc::now()),
            error: None,
        };

        let fields = msg.to_fields();
        let parsed = EventMsg::from_fields(&fields).unwrap();
        assert_eq!(parsed.workflow_id, msg.workflow_id);
        assert_eq!(parsed.status, EventStatus::Done);
        assert!(parsed.matches(workflow_id, "lead-engineer", corr_id));
        assert!(!parsed.matches(workflow_id, "tester-qa", corr_id));
    }

    #[test]
    fn missing_required_field_errors() {
        let fields = HashMap::new();
        let err = RequestMsg::from_fields(&fields).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("workflow_id")));
    }
}
