use crate::error::{EventBusError, Result};
use crate::event::Event;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// NATS-style subject pattern.
///
/// Tokens are dot separated; `*` matches exactly one token and a trailing `>`
/// matches one or more remaining tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPattern {
    tokens: Vec<String>,
}

impl SubjectPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let tokens: Vec<String> = pattern.split('.').map(str::to_string).collect();
        let last = tokens.len().saturating_sub(1);
        let valid = !pattern.is_empty()
            && tokens.iter().enumerate().all(|(i, token)| {
                !token.is_empty() && (token != ">" || i == last)
            });
        if !valid {
            return Err(EventBusError::InvalidPattern(pattern.to_string()));
        }
        Ok(Self { tokens })
    }

    pub fn matches(&self, subject: &str) -> bool {
        let subject: Vec<&str> = subject.split('.').collect();
        for (i, token) in self.tokens.iter().enumerate() {
            match token.as_str() {
                ">" => return subject.len() > i,
                "*" => {
                    if i >= subject.len() {
                        return false;
                    }
                }
                literal => {
                    if subject.get(i) != Some(&literal) {
                        return false;
                    }
                }
            }
        }
        subject.len() == self.tokens.len()
    }
}

/// Receiving half of a subscription
pub struct Subscriber {
    pattern: SubjectPattern,
    receiver: broadcast::Receiver<Event>,
}

impl Subscriber {
    pub(crate) fn new(pattern: SubjectPattern, receiver: broadcast::Receiver<Event>) -> Self {
        Self { pattern, receiver }
    }

    /// Wait for the next matching event; `None` once the bus is dropped
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.pattern.matches(&event.event_type) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged behind, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next matching event that is already buffered, if any
    pub fn try_next(&mut self) -> Result<Option<Event>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.pattern.matches(&event.event_type) => return Ok(Some(event)),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged behind, events dropped");
                }
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Closed) => return Err(EventBusError::Closed),
            }
        }
    }

    pub fn pattern(&self) -> &SubjectPattern {
        &self.pattern
    }
}
