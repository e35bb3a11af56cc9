//! In-process event bus for the approvals platform
//!
//! This crate provides the delivery channel that sits behind the approval
//! engine's notifier:
//! - Publish/Subscribe over named subjects (`approval.status_changed`, ...)
//! - NATS-style subject patterns (`approval.*`, `approval.>`)
//! - Non-blocking publish; slow subscribers lag instead of stalling publishers
//!
//! # Example
//!
//! ```rust
//! use events_bus::{EventBus, DomainEvent};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = EventBus::new(256);
//!     let mut subscriber = bus.subscribe("approval.*")?;
//!
//!     bus.publish(DomainEvent::new(
//!         "approval.status_changed",
//!         json!({ "request_id": "7d7f...", "status": "approved" }),
//!     ))?;
//!
//!     if let Some(event) = subscriber.next().await {
//!         println!("Received event: {:?}", event);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod event;
pub mod subscriber;
pub mod error;

pub use bus::*;
pub use event::*;
pub use subscriber::*;
pub use error::*;
