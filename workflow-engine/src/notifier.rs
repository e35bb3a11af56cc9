// Outbound notifications emitted after committed state changes
use events_bus::{DomainEvent, EventBus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

pub const TOPIC_NEW_APPROVAL_NEEDED: &str = "approval.new_approval_needed";
pub const TOPIC_STATUS_CHANGED: &str = "approval.status_changed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalEventKind {
    NewApprovalNeeded,
    StatusChanged,
}

impl ApprovalEventKind {
    pub fn topic(&self) -> &'static str {
        match self {
            ApprovalEventKind::NewApprovalNeeded => TOPIC_NEW_APPROVAL_NEEDED,
            ApprovalEventKind::StatusChanged => TOPIC_STATUS_CHANGED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub kind: ApprovalEventKind,
    pub request_id: Uuid,
    pub target_identity: String,
    pub payload: Value,
}

impl ApprovalEvent {
    pub fn new_approval_needed(request_id: Uuid, approver: &str, payload: Value) -> Self {
        Self {
            kind: ApprovalEventKind::NewApprovalNeeded,
            request_id,
            target_identity: approver.to_string(),
            payload,
        }
    }

    pub fn status_changed(request_id: Uuid, target: &str, payload: Value) -> Self {
        Self {
            kind: ApprovalEventKind::StatusChanged,
            request_id,
            target_identity: target.to_string(),
            payload,
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification channel closed")]
    ChannelClosed,

    #[error("Notification delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Delivery channel for approval events.
///
/// Called after the owning write has committed. Implementations must not
/// block; failures are logged by the engine and never undo state.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, event: ApprovalEvent) -> Result<(), NotifyError>;
}

/// Publishes events onto the in-process event bus, one topic per kind
pub struct EventBusNotifier {
    bus: Arc<EventBus>,
}

impl EventBusNotifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl Notifier for EventBusNotifier {
    fn notify(&self, event: ApprovalEvent) -> Result<(), NotifyError> {
        let data = json!({
            "request_id": event.request_id,
            "target_identity": event.target_identity,
            "payload": event.payload,
        });
        let published = self
            .bus
            .publish(DomainEvent::new(event.kind.topic(), data))
            .map_err(|e| NotifyError::DeliveryFailed(e.to_string()))?;
        debug!(event_id = %published.id, topic = event.kind.topic(), "Published approval event");
        Ok(())
    }
}

/// Forwards events to an unbounded channel
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<ApprovalEvent>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::UnboundedSender<ApprovalEvent>) -> Self {
        Self { sender }
    }

    /// Notifier plus the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ApprovalEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: ApprovalEvent) -> Result<(), NotifyError> {
        self.sender.send(event).map_err(|_| NotifyError::ChannelClosed)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: ApprovalEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}
