//! Operations CLI for the approval workflow engine
//!
//! The `approvals` binary covers the operator tasks around the engine:
//! - **Flows**: parse and validate flow definition files before publishing
//! - **Database**: install or upgrade the Postgres schema
//! - **Sweep**: escalate overdue steps once, or on a schedule until Ctrl-C
//!
//! Configuration is layered by `config-engine`: built-in defaults, then
//! `approvals.yaml` (or `--config <path>`), then `APPROVALS__*` variables.
//!
//! # Example Usage
//!
//! ```bash
//! approvals flows validate flows.example.yaml
//! APPROVALS__DATABASE_URL=postgres://localhost/approvals approvals db migrate
//! approvals sweep --once --verbose
//! APPROVALS_ENV=production approvals sweep
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;

pub use cli::*;
pub use commands::run;
pub use config::*;
pub use logging::init_tracing;
