use crate::clock::{Clock, SystemClock};
use crate::conditions::{ConditionDiagnostic, ConditionEvaluator};
use crate::config::EngineConfig;
use crate::error::{Result, WorkflowError};
use crate::notifier::{ApprovalEvent, NoopNotifier, Notifier};
use crate::repository::{FlowStore, InMemoryFlowStore, InMemoryRequestStore, RequestStore, StoreError};
use crate::resolver::{ApproverResolver, IdentityProvider};
use crate::state_machine::{Attachment, Decision, HistoryAction, Priority, RequestInstance, RequestStatus};
use crate::step::StepDefinition;
use crate::transition::{EscalationOutcome, Transition};
use crate::workflow::{FlowDefinition, Module};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Input to [`ApprovalEngine::submit`]
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub flow_id: Uuid,
    pub requester_id: String,
    pub referenced_object_id: String,
    pub payload: Value,
    pub priority: Priority,
    /// Defaults to `default_due_days` after submission
    pub due_date: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
}

impl SubmitRequest {
    pub fn new(flow_id: Uuid, requester_id: &str, referenced_object_id: &str) -> Self {
        Self {
            flow_id,
            requester_id: requester_id.to_string(),
            referenced_object_id: referenced_object_id.to_string(),
            payload: Value::Object(Default::default()),
            priority: Priority::default(),
            due_date: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn due_by(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_attachment(mut self, name: &str, url: &str) -> Self {
        self.attachments.push(Attachment { name: name.to_string(), url: url.to_string() });
        self
    }
}

/// What one escalation sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalationReport {
    pub escalated: Vec<Uuid>,
    pub renotified: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

impl EscalationReport {
    pub fn is_empty(&self) -> bool {
        self.escalated.is_empty() && self.renotified.is_empty() && self.failed.is_empty()
    }
}

enum Mutation<'m> {
    Vote {
        voter_id: &'m str,
        decision: Decision,
        comment: Option<&'m str>,
        expected_step: Option<u32>,
    },
    Cancel {
        actor_id: &'m str,
    },
    Escalate {
        now: DateTime<Utc>,
    },
}

struct Mutated {
    instance: RequestInstance,
    escalation: Option<EscalationOutcome>,
}

/// Multi-step approval engine
pub struct ApprovalEngine {
    /// Versioned flow definitions
    flows: Arc<dyn FlowStore>,

    /// Request instances, written with optimistic concurrency
    requests: Arc<dyn RequestStore>,

    resolver: ApproverResolver,
    evaluator: ConditionEvaluator,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl ApprovalEngine {
    pub fn builder() -> ApprovalEngineBuilder {
        ApprovalEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    // =============================================================================
    // Flow Administration
    // =============================================================================

    /// Validate and store a new flow
    pub async fn publish_flow(&self, flow: FlowDefinition) -> Result<FlowDefinition> {
        flow.validate()?;
        self.flows.insert(flow.clone()).await?;
        info!(flow_id = %flow.id, version = flow.version, module = %flow.module, "Published approval flow");
        Ok(flow)
    }

    /// Publish the next version of a flow with new steps.
    /// Requests already submitted keep the version they were bound to.
    pub async fn revise_flow(&self, flow_id: Uuid, steps: Vec<StepDefinition>) -> Result<FlowDefinition> {
        let latest = self.get_flow(flow_id).await?;
        let revision = latest.revised(steps)?;
        self.flows.insert(revision.clone()).await?;
        info!(flow_id = %flow_id, version = revision.version, "Revised approval flow");
        Ok(revision)
    }

    pub async fn set_flow_active(&self, flow_id: Uuid, active: bool) -> Result<()> {
        match self.flows.set_active(flow_id, active).await {
            Ok(()) => {
                info!(flow_id = %flow_id, active, "Updated approval flow status");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Err(WorkflowError::FlowNotFound(flow_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_flows(&self, module: Option<Module>, active: Option<bool>) -> Result<Vec<FlowDefinition>> {
        Ok(self.flows.list(module, active).await?)
    }

    /// Latest version of a flow
    pub async fn get_flow(&self, flow_id: Uuid) -> Result<FlowDefinition> {
        self.flows
            .get(flow_id, None)
            .await?
            .ok_or_else(|| WorkflowError::FlowNotFound(flow_id.to_string()))
    }

    // =============================================================================
    // Request Lifecycle
    // =============================================================================

    /// Create a request against the latest version of a flow and route it
    /// to the first step that needs approvers.
    pub async fn submit(&self, request: SubmitRequest) -> Result<RequestInstance> {
        let flow = self.get_flow(request.flow_id).await?;
        if !flow.active {
            return Err(WorkflowError::FlowInactive(flow.id.to_string()));
        }

        let now = self.clock.now();
        let mut instance = RequestInstance {
            id: Uuid::new_v4(),
            module: flow.module,
            referenced_object_id: request.referenced_object_id,
            requester_id: request.requester_id,
            flow_id: flow.id,
            flow_version: flow.version,
            priority: request.priority,
            payload: request.payload,
            attachments: request.attachments,
            current_step: 1,
            status: RequestStatus::Pending,
            current_approvers: BTreeSet::new(),
            votes: Vec::new(),
            history: Vec::new(),
            due_date: request.due_date.unwrap_or(now + self.config.default_due()),
            entered_step_at: now,
            submitted_at: now,
            updated_at: now,
            version: 1,
        };
        let requester = instance.requester_id.clone();
        instance.record(HistoryAction::Submitted, &requester, now, None);

        let mut events = Vec::new();
        self.transition(&flow, now).enter_step(&mut instance, &mut events).await?;

        self.requests.insert(instance.clone()).await?;
        info!(
            request_id = %instance.id,
            flow_id = %flow.id,
            flow_version = flow.version,
            step = instance.current_step,
            status = %instance.status,
            "Approval request submitted"
        );
        self.dispatch(events);
        Ok(instance)
    }

    /// Record an approver's decision on the request's current step
    pub async fn record_decision(
        &self,
        request_id: Uuid,
        voter_id: &str,
        decision: Decision,
        comment: Option<&str>,
    ) -> Result<RequestInstance> {
        let mutation = Mutation::Vote { voter_id, decision, comment, expected_step: None };
        Ok(self.mutate(request_id, mutation).await?.instance)
    }

    /// Like [`record_decision`](Self::record_decision), but fails with
    /// `InvalidStepState` unless the request is still at `expected_step`.
    pub async fn record_decision_at_step(
        &self,
        request_id: Uuid,
        voter_id: &str,
        decision: Decision,
        comment: Option<&str>,
        expected_step: u32,
    ) -> Result<RequestInstance> {
        let mutation = Mutation::Vote { voter_id, decision, comment, expected_step: Some(expected_step) };
        Ok(self.mutate(request_id, mutation).await?.instance)
    }

    /// Requester withdraws a pending request
    pub async fn cancel(&self, request_id: Uuid, actor_id: &str) -> Result<RequestInstance> {
        Ok(self.mutate(request_id, Mutation::Cancel { actor_id }).await?.instance)
    }

    /// Escalate every pending request whose current step has waited past its
    /// escalation threshold at `now`.
    pub async fn escalate(&self, now: DateTime<Utc>) -> Result<EscalationReport> {
        let pending = self.requests.list_pending().await?;
        let mut flows: HashMap<(Uuid, u32), FlowDefinition> = HashMap::new();
        let mut report = EscalationReport::default();

        for instance in pending {
            let key = (instance.flow_id, instance.flow_version);
            if !flows.contains_key(&key) {
                match self.pinned_flow(&instance).await {
                    Ok(flow) => {
                        flows.insert(key, flow);
                    }
                    Err(e) => {
                        warn!(request_id = %instance.id, error = %e, "Cannot load flow for escalation");
                        report.failed.push(instance.id);
                        continue;
                    }
                }
            }
            let due = flows
                .get(&key)
                .and_then(|flow| flow.step(instance.current_step))
                .and_then(|step| step.escalation.as_ref())
                .map_or(false, |escalation| escalation.is_due(instance.entered_step_at, now));
            if !due {
                continue;
            }

            match self.mutate(instance.id, Mutation::Escalate { now }).await {
                Ok(Mutated { escalation: Some(EscalationOutcome::Escalated(target)), .. }) => {
                    info!(request_id = %instance.id, escalate_to = %target, "Approval request escalated");
                    report.escalated.push(instance.id);
                }
                Ok(Mutated { escalation: Some(EscalationOutcome::Renotify(target)), .. }) => {
                    debug!(request_id = %instance.id, escalate_to = %target, "Escalation target reminded");
                    report.renotified.push(instance.id);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(request_id = %instance.id, error = %e, "Escalation failed");
                    report.failed.push(instance.id);
                }
            }
        }

        if !report.is_empty() {
            info!(
                escalated = report.escalated.len(),
                renotified = report.renotified.len(),
                failed = report.failed.len(),
                "Escalation sweep finished"
            );
        }
        Ok(report)
    }

    // =============================================================================
    // Queries
    // =============================================================================

    pub async fn get(&self, request_id: Uuid) -> Result<RequestInstance> {
        self.requests
            .get(request_id)
            .await?
            .ok_or(WorkflowError::RequestNotFound(request_id))
    }

    /// Requests waiting on `approver_id`, most urgent first, then oldest first
    pub async fn list_pending(&self, approver_id: &str) -> Result<Vec<RequestInstance>> {
        let mut pending: Vec<RequestInstance> = self
            .requests
            .list_awaiting(approver_id)
            .await?
            .into_iter()
            .filter(|instance| instance.is_awaiting(approver_id))
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.submitted_at.cmp(&b.submitted_at))
        });
        Ok(pending)
    }

    /// Requests submitted by `requester_id`, newest first
    pub async fn list_by_requester(&self, requester_id: &str) -> Result<Vec<RequestInstance>> {
        let mut requests = self.requests.list_by_requester(requester_id).await?;
        requests.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(requests)
    }

    // =============================================================================
    // Internals
    // =============================================================================

    fn transition<'a>(&'a self, flow: &'a FlowDefinition, now: DateTime<Utc>) -> Transition<'a> {
        Transition {
            flow,
            resolver: &self.resolver,
            evaluator: &self.evaluator,
            now,
            notify_on_step_advance: self.config.notify_on_step_advance,
        }
    }

    /// The flow version a request was bound to at submit time
    async fn pinned_flow(&self, instance: &RequestInstance) -> Result<FlowDefinition> {
        self.flows
            .get(instance.flow_id, Some(instance.flow_version))
            .await?
            .ok_or_else(|| WorkflowError::FlowNotFound(format!("{} v{}", instance.flow_id, instance.flow_version)))
    }

    /// Read-modify-write with a conditional update, retried on version
    /// conflicts. Events are dispatched only after the write succeeds.
    async fn mutate(&self, request_id: Uuid, mutation: Mutation<'_>) -> Result<Mutated> {
        let mut retries = 0;
        loop {
            let current = self.get(request_id).await?;
            let flow = self.pinned_flow(&current).await?;
            let mut next = current.clone();
            let mut events = Vec::new();

            let escalation = match &mutation {
                Mutation::Vote { voter_id, decision, comment, expected_step } => {
                    let transition = self.transition(&flow, self.clock.now());
                    transition
                        .apply_vote(
                            &mut next,
                            voter_id,
                            *decision,
                            comment.map(str::to_string),
                            *expected_step,
                            &mut events,
                        )
                        .await?;
                    None
                }
                Mutation::Cancel { actor_id } => {
                    self.transition(&flow, self.clock.now()).cancel(&mut next, actor_id, &mut events)?;
                    None
                }
                Mutation::Escalate { now } => Some(self.transition(&flow, *now).escalate(&mut next, &mut events)),
            };

            if matches!(escalation, Some(EscalationOutcome::NotDue) | Some(EscalationOutcome::Renotify(_))) {
                self.dispatch(events);
                return Ok(Mutated { instance: current, escalation });
            }

            match self.requests.update(next, current.version).await {
                Ok(stored) => {
                    debug!(request_id = %request_id, version = stored.version, "Committed request update");
                    self.dispatch(events);
                    return Ok(Mutated { instance: stored, escalation });
                }
                Err(StoreError::VersionConflict { .. }) if retries < self.config.max_retries => {
                    retries += 1;
                    warn!(request_id = %request_id, attempt = retries, "Version conflict, retrying request update");
                }
                Err(StoreError::VersionConflict { .. }) => {
                    warn!(request_id = %request_id, retries, "Giving up after repeated version conflicts");
                    return Err(WorkflowError::ConcurrentModification(request_id));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Fire-and-forget delivery; failures never undo the committed state
    fn dispatch(&self, events: Vec<ApprovalEvent>) {
        for event in events {
            let (request_id, target, kind) = (event.request_id, event.target_identity.clone(), event.kind);
            if let Err(e) = self.notifier.notify(event) {
                warn!(
                    request_id = %request_id,
                    target = %target,
                    kind = ?kind,
                    error = %e,
                    "Failed to deliver approval notification"
                );
            }
        }
    }
}

/// Builder for [`ApprovalEngine`]; only the identity provider is mandatory
#[derive(Default)]
pub struct ApprovalEngineBuilder {
    flows: Option<Arc<dyn FlowStore>>,
    requests: Option<Arc<dyn RequestStore>>,
    identities: Option<Arc<dyn IdentityProvider>>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Option<Arc<dyn Clock>>,
    config: EngineConfig,
    diagnostics: Option<mpsc::UnboundedSender<ConditionDiagnostic>>,
}

impl ApprovalEngineBuilder {
    pub fn flow_store(mut self, flows: Arc<dyn FlowStore>) -> Self {
        self.flows = Some(flows);
        self
    }

    pub fn request_store(mut self, requests: Arc<dyn RequestStore>) -> Self {
        self.requests = Some(requests);
        self
    }

    pub fn identity_provider(mut self, identities: Arc<dyn IdentityProvider>) -> Self {
        self.identities = Some(identities);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Receive a report for each distinct unknown condition operator
    pub fn condition_diagnostics(mut self, sender: mpsc::UnboundedSender<ConditionDiagnostic>) -> Self {
        self.diagnostics = Some(sender);
        self
    }

    pub fn build(self) -> Result<ApprovalEngine> {
        let identities = self
            .identities
            .ok_or_else(|| anyhow::anyhow!("an identity provider is required to resolve approvers"))?;
        let evaluator = match self.diagnostics {
            Some(sender) => ConditionEvaluator::with_diagnostics(sender),
            None => ConditionEvaluator::new(),
        };

        Ok(ApprovalEngine {
            flows: self.flows.unwrap_or_else(|| Arc::new(InMemoryFlowStore::new())),
            requests: self.requests.unwrap_or_else(|| Arc::new(InMemoryRequestStore::new())),
            resolver: ApproverResolver::new(identities),
            evaluator,
            notifier: self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config: self.config,
        })
    }
}
