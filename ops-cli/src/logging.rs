use anyhow::Result;
use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Human-readable logs in development, JSON when `APPROVALS_ENV=production`.
/// `RUST_LOG` overrides the computed filter.
pub fn init_tracing(verbose: bool, log_level: &str) -> Result<()> {
    let level = if verbose { Level::DEBUG.to_string() } else { log_level.to_string() };

    let is_production = env::var("APPROVALS_ENV").map(|v| v == "production").unwrap_or(false);
    let use_colors = env::var("NO_COLOR").is_err() && atty::is(atty::Stream::Stdout);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "workflow_engine={level},ops_cli={level},events_bus={level},config_engine=warn,sqlx=warn,tokio_cron_scheduler=warn",
            level = level
        )
        .into()
    });

    if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(use_colors)
                    .with_level(true),
            )
            .try_init()?;
    }

    Ok(())
}
