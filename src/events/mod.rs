//! Outbound event channel.
//!
//! The saga appends exactly one event on successful spawn completion;
//! downstream notification and observability consumers read the stream
//! independently, decoupled from the orchestration path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetEventType {
    SpawnCompleted,
}

impl FleetEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpawnCompleted => "spawn.completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetEvent {
    pub event_type: FleetEventType,
    pub task_id: String,
    pub requester_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FleetEvent {
    pub fn spawn_completed(
        task_id: impl Into<String>,
        requester_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: FleetEventType::SpawnCompleted,
            task_id: task_id.into(),
            requester_id: requester_id.into(),
            message: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

pub type EventSink = mpsc::UnboundedSender<FleetEvent>;
pub type EventStream = mpsc::UnboundedReceiver<FleetEvent>;

pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = FleetEvent::spawn_completed("t-1", "op-1").with_message("agent running");
        assert_eq!(event.event_type.as_str(), "spawn.completed");
        assert_eq!(event.task_id, "t-1");
        assert_eq!(event.message.as_deref(), Some("agent running"));
    }

    #[tokio::test]
    async fn test_channel_delivery() {
        let (sink, mut stream) = event_channel();
        sink.send(FleetEvent::spawn_completed("t-1", "op-1")).unwrap();
        drop(sink);

        let received = stream.recv().await.unwrap();
        assert_eq!(received.task_id, "t-1");
        assert!(stream.recv().await.is_none());
    }
}
