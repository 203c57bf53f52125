//! Request/wait messaging between the coordinator and personas (§4.3).

use std::sync::Arc;
use std::time::{Duration, Instant};

use flowforge_protocol::{EventMsg, ProtocolError, RequestMsg};
use flowforge_transport::{GroupStart, ReadGroupOptions, Transport, TransportError};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PersonaMessengerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("persona did not respond within {0:?}")]
    PersonaTimeout(Duration),
}

/// A request the coordinator wants to send to a persona.
pub struct SendRequest {
    pub workflow_id: Uuid,
    pub step: Option<String>,
    pub from: String,
    pub to_persona: String,
    pub intent: String,
    pub payload: serde_json::Value,
    pub deadline_s: Option<u64>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
}

/// Wraps a [`Transport`] with the request/event envelope protocol so steps
/// never touch raw stream fields.
pub struct PersonaMessenger {
    transport: Arc<dyn Transport>,
    request_stream: String,
    event_stream: String,
    group_prefix: String,
    consumer_id: String,
}

impl PersonaMessenger {
    pub fn new(
        transport: Arc<dyn Transport>,
        request_stream: impl Into<String>,
        event_stream: impl Into<String>,
        group_prefix: impl Into<String>,
        consumer_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            request_stream: request_stream.into(),
            event_stream: event_stream.into(),
            group_prefix: group_prefix.into(),
            consumer_id: consumer_id.into(),
        }
    }

    /// Appends the request envelope and returns the `corr_id` to wait on.
    pub async fn send(&self, request: SendRequest) -> Result<Uuid, PersonaMessengerError> {
        let corr_id = Uuid::now_v7();
        let msg = RequestMsg {
            workflow_id: request.workflow_id,
            step: request.step,
            from: request.from,
            to_persona: request.to_persona,
            intent: request.intent,
            payload: request.payload,
            corr_id,
            deadline_s: request.deadline_s,
            repo: request.repo,
            branch: request.branch,
            project_id: request.project_id,
            task_id: request.task_id,
        };
        self.transport
            .x_add(&self.request_stream, "*", msg.to_fields())
            .await?;
        Ok(corr_id)
    }

    /// Blocks (in bounded ~1s slices) until an event matching
    /// `(workflow_id, from_persona, corr_id)` arrives, or `timeout` elapses.
    /// Non-matching events for this persona and workflow are acked so they
    /// don't accumulate; unrelated events are left untouched.
    pub async fn wait(
        &self,
        workflow_id: Uuid,
        from_persona: &str,
        corr_id: Uuid,
        timeout: Duration,
    ) -> Result<EventMsg, PersonaMessengerError> {
        let group = format!("{}:coordinator", self.group_prefix);
        if let Err(err) = self
            .transport
            .x_group_create(&self.event_stream, &group, GroupStart::NewMessagesOnly)
            .await
        {
            if !err.is_already_exists() {
                return Err(err.into());
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(PersonaMessengerError::PersonaTimeout(timeout));
            }

            let messages = self
                .transport
                .x_read_group(
                    &group,
                    &self.consumer_id,
                    &self.event_stream,
                    ReadGroupOptions {
                        count: 50,
                        block: Duration::from_secs(1),
                    },
                )
                .await?;

            for message in messages {
                let event = match EventMsg::from_fields(&message.fields) {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(error = %err, "dropping malformed event");
                        self.transport.x_ack(&self.event_stream, &group, &message.id).await?;
                        continue;
                    }
                };

                if event.matches(workflow_id, from_persona, corr_id) {
                    self.transport.x_ack(&self.event_stream, &group, &message.id).await?;
                    return Ok(event);
                }

                if event.workflow_id == workflow_id && event.from_persona == from_persona {
                    debug!(id = %message.id, "acking stale event for this persona/workflow");
                    self.transport.x_ack(&self.event_stream, &group, &message.id).await?;
                }
            }
        }
    }
}
