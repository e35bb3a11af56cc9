// Periodic escalation sweeps on tokio-cron-scheduler
use crate::engine::{ApprovalEngine, EscalationReport};
use crate::error::{Result, WorkflowError};
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{error, info};

pub struct EscalationScheduler {
    engine: Arc<ApprovalEngine>,
    interval: Duration,
    scheduler: Option<JobScheduler>,
}

impl EscalationScheduler {
    /// Sweep every `escalation_interval_secs` from the engine's config
    pub fn new(engine: Arc<ApprovalEngine>) -> Self {
        let interval = engine.config().escalation_interval();
        Self { engine, interval, scheduler: None }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// One sweep at the engine clock's current time
    pub async fn run_once(&self) -> Result<EscalationReport> {
        sweep(&self.engine).await
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.scheduler.is_some() {
            return Ok(());
        }

        let scheduler = JobScheduler::new().await.map_err(scheduling_error)?;
        let engine = self.engine.clone();
        let job = Job::new_repeated_async(self.interval, move |_id, _scheduler| {
            let engine = engine.clone();
            Box::pin(async move {
                // The next tick runs regardless.
                if let Err(e) = sweep(&engine).await {
                    error!(error = %e, code = e.code(), "Escalation sweep failed");
                }
            })
        })
        .map_err(scheduling_error)?;

        scheduler.add(job).await.map_err(scheduling_error)?;
        scheduler.start().await.map_err(scheduling_error)?;
        info!(interval_secs = self.interval.as_secs(), "Escalation scheduler started");

        self.scheduler = Some(scheduler);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown().await.map_err(scheduling_error)?;
            info!("Escalation scheduler stopped");
        }
        Ok(())
    }
}

async fn sweep(engine: &ApprovalEngine) -> Result<EscalationReport> {
    let now = engine.clock().now();
    engine.escalate(now).await
}

fn scheduling_error(err: JobSchedulerError) -> WorkflowError {
    WorkflowError::SchedulingError(err.to_string())
}
