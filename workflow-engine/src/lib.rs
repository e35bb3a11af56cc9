//! Multi-step approval workflow engine for the approvals platform
//!
//! This crate drives business objects (leave, travel, expense, attendance,
//! purchase requests) through configurable approval flows:
//! - Versioned flow definitions built from ordered steps
//! - Sequential single-approver and parallel threshold steps
//! - Payload conditions that skip steps, plus auto-approve/auto-reject steps
//! - Approver resolution by fixed identity, requester's manager or role pool
//! - Time-based escalation on a background scheduler
//! - Optimistic concurrency on every request write, with bounded retry
//! - Notifications dispatched only after the owning write commits
//! - In-memory and PostgreSQL stores
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use workflow_engine::{
//!     ApprovalEngine, ApproverStrategy, Decision, FlowDefinition, InMemoryIdentityDirectory,
//!     Module, RequestStatus, StepDefinition, SubmitRequest,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = InMemoryIdentityDirectory::new()
//!         .with_identity("alice", Some("bob"), &["staff"])
//!         .with_identity("carol", None, &["hr"]);
//!
//!     let engine = ApprovalEngine::builder()
//!         .identity_provider(Arc::new(directory))
//!         .build()?;
//!
//!     // Define a flow: manager first, then HR
//!     let flow = engine
//!         .publish_flow(
//!             FlowDefinition::builder("Annual leave", Module::Leave)
//!                 .add_step(StepDefinition::new(1, ApproverStrategy::RequesterManager))
//!                 .add_step(StepDefinition::new(2, ApproverStrategy::role("hr")))
//!                 .build()?,
//!         )
//!         .await?;
//!
//!     // Submit and approve
//!     let request = engine
//!         .submit(SubmitRequest::new(flow.id, "alice", "leave-2026-031").with_payload(json!({ "days": 3 })))
//!         .await?;
//!     engine.record_decision(request.id, "bob", Decision::Approve, None).await?;
//!     let request = engine.record_decision(request.id, "carol", Decision::Approve, Some("enjoy")).await?;
//!
//!     assert_eq!(request.status, RequestStatus::Approved);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod conditions;
pub mod config;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod repository;
pub mod resolver;
pub mod scheduler;
pub mod state_machine;
pub mod step;
pub mod transition;
pub mod workflow;

pub use clock::*;
pub use conditions::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use notifier::*;
pub use repository::*;
pub use resolver::*;
pub use scheduler::*;
pub use state_machine::*;
pub use step::*;
pub use transition::*;
pub use workflow::*;
