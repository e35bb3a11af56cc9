use crate::error::{EventBusError, Result};
use crate::event::{DomainEvent, Event};
use crate::subscriber::{SubjectPattern, Subscriber};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default number of events buffered per subscriber before it starts lagging
pub const DEFAULT_CAPACITY: usize = 1024;

/// In-process publish/subscribe bus
///
/// Publishing never waits on subscribers. A subscriber that falls more than
/// `capacity` events behind skips the oldest ones.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    published: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: AtomicU64::new(0),
        }
    }

    /// Publish a domain event to every matching subscriber
    pub fn publish(&self, event: DomainEvent) -> Result<Event> {
        validate_subject(&event.event_type)?;
        let event = Event::from_domain(event);

        // Serializability is part of the wire contract even in-process.
        serde_json::to_vec(&event)?;

        match self.sender.send(event.clone()) {
            Ok(receivers) => trace!(subject = %event.event_type, receivers, "Event published"),
            Err(_) => debug!(subject = %event.event_type, "Event published with no subscribers"),
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(event)
    }

    /// Subscribe to subjects matching `pattern`
    pub fn subscribe(&self, pattern: &str) -> Result<Subscriber> {
        let pattern = SubjectPattern::parse(pattern)?;
        Ok(Subscriber::new(pattern, self.sender.subscribe()))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Total events accepted since the bus was created
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn validate_subject(subject: &str) -> Result<()> {
    if subject.is_empty()
        || subject
            .split('.')
            .any(|token| token.is_empty() || token == "*" || token == ">")
    {
        return Err(EventBusError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}
