use crate::cli::{Cli, Command, DbCommand, FlowsCommand};
use crate::config::ApprovalsConfig;
use anyhow::{anyhow, bail, Context, Result};
use colored::*;
use events_bus::{Event, EventBus, Subscriber};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use workflow_engine::repository::postgres;
use workflow_engine::{
    ApprovalEngine, Clock, EscalationReport, EscalationScheduler, EventBusNotifier, FlowDefinition,
    InMemoryIdentityDirectory, PostgresFlowStore, PostgresRequestStore,
};

pub async fn run(cli: Cli, config: ApprovalsConfig) -> Result<()> {
    match cli.command {
        Command::Flows { command: FlowsCommand::Validate { file } } => validate_flows_file(&file),
        Command::Db { command: DbCommand::Migrate } => migrate(&config).await,
        Command::Sweep { once } => sweep(&config, once).await,
    }
}

// =============================================================================
// flows validate
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum FlowFile {
    Many(Vec<FlowDefinition>),
    One(FlowDefinition),
}

/// Parse a flow file; `.json` files are read as JSON, anything else as YAML
pub fn parse_flows(content: &str, path: &Path) -> Result<Vec<FlowDefinition>> {
    let is_json = path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
    let file: FlowFile = if is_json {
        serde_json::from_str(content).with_context(|| format!("{} is not a valid flow file", path.display()))?
    } else {
        serde_yaml::from_str(content).with_context(|| format!("{} is not a valid flow file", path.display()))?
    };
    Ok(match file {
        FlowFile::Many(flows) => flows,
        FlowFile::One(flow) => vec![flow],
    })
}

/// Validate every flow, pairing each with its own result
pub fn validate_flows(flows: &[FlowDefinition]) -> Vec<(&FlowDefinition, Option<String>)> {
    flows
        .iter()
        .map(|flow| (flow, flow.validate().err().map(|e| e.to_string())))
        .collect()
}

fn validate_flows_file(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let flows = parse_flows(&content, path)?;
    let results = validate_flows(&flows);

    for (flow, error) in &results {
        match error {
            Some(error) => println!("{} {} ({}): {}", "✗".bright_red(), flow.name.bold(), flow.module, error),
            None => println!(
                "{} {} ({}, {} steps)",
                "✓".bright_green(),
                flow.name.bold(),
                flow.module,
                flow.steps.len()
            ),
        }
    }

    let invalid = results.iter().filter(|(_, error)| error.is_some()).count();
    if invalid > 0 {
        bail!("{} of {} flows in {} are invalid", invalid, flows.len(), path.display());
    }
    println!("{}", format!("All {} flows are valid", flows.len()).bright_green());
    Ok(())
}

// =============================================================================
// db migrate
// =============================================================================

fn database_url(config: &ApprovalsConfig) -> Result<String> {
    config
        .database_url()
        .ok_or_else(|| anyhow!("No database configured; set APPROVALS__DATABASE_URL or DATABASE_URL"))
}

async fn migrate(config: &ApprovalsConfig) -> Result<()> {
    let pool = postgres::connect(&database_url(config)?).await?;
    postgres::migrate(&pool).await?;
    println!("{}", "Approval schema is up to date".bright_green());
    Ok(())
}

// =============================================================================
// sweep
// =============================================================================

async fn sweep(config: &ApprovalsConfig, once: bool) -> Result<()> {
    let pool = postgres::connect(&database_url(config)?).await?;
    let bus = Arc::new(EventBus::default());
    let mut subscriber = bus.subscribe("approval.>")?;

    // Escalation only targets configured identities, so no directory lookups happen.
    let engine = Arc::new(
        ApprovalEngine::builder()
            .flow_store(Arc::new(PostgresFlowStore::new(pool.clone())))
            .request_store(Arc::new(PostgresRequestStore::new(pool)))
            .identity_provider(Arc::new(InMemoryIdentityDirectory::new()))
            .notifier(Arc::new(EventBusNotifier::new(bus.clone())))
            .config(config.engine.clone())
            .build()?,
    );

    if once {
        let report = engine.escalate(engine.clock().now()).await?;
        drain_events(&mut subscriber);
        print_report(&report);
        return Ok(());
    }

    tokio::spawn(async move {
        while let Some(event) = subscriber.next().await {
            log_event(&event);
        }
    });

    let mut scheduler = EscalationScheduler::new(engine);
    scheduler.start().await?;
    info!(
        interval_secs = config.engine.escalation_interval_secs,
        "Escalation sweeper running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    scheduler.shutdown().await?;
    Ok(())
}

fn drain_events(subscriber: &mut Subscriber) {
    loop {
        match subscriber.try_next() {
            Ok(Some(event)) => log_event(&event),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Stopped reading approval events");
                break;
            }
        }
    }
}

fn log_event(event: &Event) {
    info!(
        topic = %event.event_type,
        target = %event.data["target_identity"],
        request_id = %event.data["request_id"],
        "Approval notification"
    );
}

fn print_report(report: &EscalationReport) {
    println!(
        "{} escalated: {}, re-notified: {}, failed: {}",
        "Sweep finished".bright_cyan(),
        report.escalated.len().to_string().bright_yellow(),
        report.renotified.len(),
        if report.failed.is_empty() {
            "0".normal()
        } else {
            report.failed.len().to_string().bright_red()
        }
    );
    for id in &report.failed {
        println!("  {} {}", "failed".bright_red(), id);
    }
}
