// Event types and structures
use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Stamp a domain event with an id and publish time
    pub fn from_domain(event: DomainEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event.event_type,
            data: event.data,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_type: String,
    pub data: serde_json::Value,
}

impl DomainEvent {
    pub fn new(event_type: &str, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            data,
        }
    }
}
