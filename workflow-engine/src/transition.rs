//! Request state transitions.
//!
//! Everything here works on an in-memory [`RequestInstance`] and a pinned
//! [`FlowDefinition`]. Nothing is persisted or sent: the notifications a
//! transition would trigger are collected into a `Vec<ApprovalEvent>` that the
//! engine dispatches once the resulting instance has been committed.

use crate::conditions::ConditionEvaluator;
use crate::error::{Result, WorkflowError};
use crate::notifier::ApprovalEvent;
use crate::resolver::{ApproverResolver, RequestContext};
use crate::state_machine::{Decision, HistoryAction, RequestInstance, RequestStatus, Vote, SYSTEM_ACTOR};
use crate::workflow::FlowDefinition;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info};

/// Result of checking a request for escalation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    NotDue,
    /// `escalate_to` was added to the current approvers
    Escalated(String),
    /// `escalate_to` was already an approver and only needs a reminder
    Renotify(String),
}

pub struct Transition<'a> {
    pub flow: &'a FlowDefinition,
    pub resolver: &'a ApproverResolver,
    pub evaluator: &'a ConditionEvaluator,
    pub now: DateTime<Utc>,
    pub notify_on_step_advance: bool,
}

impl<'a> Transition<'a> {
    /// Enter `instance.current_step`, skipping and auto-deciding steps until
    /// one needs human approvers or the request reaches a terminal state.
    pub async fn enter_step(&self, instance: &mut RequestInstance, events: &mut Vec<ApprovalEvent>) -> Result<()> {
        loop {
            let Some(step) = self.flow.step(instance.current_step) else {
                return Ok(());
            };

            if !self.evaluator.evaluate(&step.conditions, &instance.payload) {
                debug!(request_id = %instance.id, step = step.order, "Step conditions not met, skipping");
                instance.record(
                    HistoryAction::StepSkipped,
                    SYSTEM_ACTOR,
                    self.now,
                    Some(format!("{} skipped, conditions not met", step.display_name())),
                );
                if self.advance(instance, events, false) {
                    return Ok(());
                }
                continue;
            }

            if step.auto_reject {
                instance.record(
                    HistoryAction::AutoRejected,
                    SYSTEM_ACTOR,
                    self.now,
                    Some(format!("{} rejects automatically", step.display_name())),
                );
                self.finish(instance, RequestStatus::Rejected, events);
                return Ok(());
            }

            if step.auto_approve {
                instance.record(
                    HistoryAction::AutoApproved,
                    SYSTEM_ACTOR,
                    self.now,
                    Some(format!("{} approves automatically", step.display_name())),
                );
                if self.advance(instance, events, false) {
                    return Ok(());
                }
                continue;
            }

            let approvers = self
                .resolver
                .resolve(step, &RequestContext::new(&instance.requester_id))
                .await?;
            instance.current_approvers = approvers;
            instance.entered_step_at = self.now;

            let payload = self.approval_payload(instance);
            for approver in &instance.current_approvers {
                events.push(ApprovalEvent::new_approval_needed(instance.id, approver, payload.clone()));
            }
            return Ok(());
        }
    }

    /// Record a vote on the current step and apply its consequences
    pub async fn apply_vote(
        &self,
        instance: &mut RequestInstance,
        voter_id: &str,
        decision: Decision,
        comment: Option<String>,
        expected_step: Option<u32>,
        events: &mut Vec<ApprovalEvent>,
    ) -> Result<()> {
        if instance.is_terminal() {
            return Err(WorkflowError::InvalidStepState(format!(
                "request {} is already {}",
                instance.id, instance.status
            )));
        }
        if let Some(expected) = expected_step {
            if expected != instance.current_step {
                return Err(WorkflowError::InvalidStepState(format!(
                    "request {} is at step {}, not step {}",
                    instance.id, instance.current_step, expected
                )));
            }
        }
        let step = self.flow.step(instance.current_step).ok_or_else(|| {
            WorkflowError::InvalidStepState(format!(
                "request {} has no open step (current step {})",
                instance.id, instance.current_step
            ))
        })?;
        if !instance.current_approvers.contains(voter_id) {
            return Err(WorkflowError::NotAuthorizedApprover {
                request_id: instance.id,
                voter_id: voter_id.to_string(),
                step: step.order,
            });
        }

        instance.upsert_vote(Vote {
            step: step.order,
            voter_id: voter_id.to_string(),
            decision,
            comment: comment.clone(),
            decided_at: self.now,
        });
        let action = match decision {
            Decision::Approve => HistoryAction::Approved,
            Decision::Reject => HistoryAction::Rejected,
        };
        instance.record(action, voter_id, self.now, comment);

        let required = step.required_approvals as usize;
        if decision == Decision::Reject {
            let fatal = if step.parallel && step.tolerate_rejections {
                let reachable = instance
                    .current_approvers
                    .len()
                    .saturating_sub(instance.rejections_at(step.order));
                reachable < required
            } else {
                true
            };
            if fatal {
                self.finish(instance, RequestStatus::Rejected, events);
            }
            return Ok(());
        }

        if instance.approvals_at(step.order) >= required && !self.advance(instance, events, true) {
            self.enter_step(instance, events).await?;
        }
        Ok(())
    }

    /// Requester withdraws a pending request
    pub fn cancel(&self, instance: &mut RequestInstance, actor_id: &str, events: &mut Vec<ApprovalEvent>) -> Result<()> {
        if actor_id != instance.requester_id {
            return Err(WorkflowError::NotRequester(instance.id));
        }
        if instance.is_terminal() {
            return Err(WorkflowError::NotCancellable(instance.id));
        }

        instance.record(HistoryAction::Cancelled, actor_id, self.now, None);
        instance.status = RequestStatus::Cancelled;
        let approvers = std::mem::take(&mut instance.current_approvers);
        let payload = self.status_payload(instance);
        for approver in &approvers {
            events.push(ApprovalEvent::status_changed(instance.id, approver, payload.clone()));
        }
        info!(request_id = %instance.id, "Approval request cancelled");
        Ok(())
    }

    /// Widen the approver pool of an overdue step
    pub fn escalate(&self, instance: &mut RequestInstance, events: &mut Vec<ApprovalEvent>) -> EscalationOutcome {
        if instance.is_terminal() {
            return EscalationOutcome::NotDue;
        }
        let Some(escalation) = self.flow.step(instance.current_step).and_then(|s| s.escalation.as_ref()) else {
            return EscalationOutcome::NotDue;
        };
        if !escalation.is_due(instance.entered_step_at, self.now) {
            return EscalationOutcome::NotDue;
        }

        let target = escalation.escalate_to.clone();
        let payload = self.approval_payload(instance);
        events.push(ApprovalEvent::new_approval_needed(instance.id, &target, payload));

        if instance.current_approvers.contains(&target) {
            return EscalationOutcome::Renotify(target);
        }
        instance.current_approvers.insert(target.clone());
        instance.record(
            HistoryAction::Escalated,
            SYSTEM_ACTOR,
            self.now,
            Some(format!("escalated to {}", target)),
        );
        EscalationOutcome::Escalated(target)
    }

    /// Move past the current step. Returns true when that completed the flow.
    fn advance(&self, instance: &mut RequestInstance, events: &mut Vec<ApprovalEvent>, announce: bool) -> bool {
        instance.current_step += 1;
        instance.current_approvers.clear();

        if instance.current_step > self.flow.steps.len() as u32 {
            instance.record(HistoryAction::Completed, SYSTEM_ACTOR, self.now, None);
            self.finish(instance, RequestStatus::Approved, events);
            return true;
        }

        instance.record(
            HistoryAction::StepAdvanced,
            SYSTEM_ACTOR,
            self.now,
            Some(format!("entered step {}", instance.current_step)),
        );
        if announce && self.notify_on_step_advance {
            let payload = self.status_payload(instance);
            events.push(ApprovalEvent::status_changed(instance.id, &instance.requester_id, payload));
        }
        false
    }

    fn finish(&self, instance: &mut RequestInstance, status: RequestStatus, events: &mut Vec<ApprovalEvent>) {
        instance.status = status;
        instance.current_approvers.clear();
        instance.updated_at = self.now;
        info!(request_id = %instance.id, status = %status, step = instance.current_step, "Approval request finished");

        let payload = self.status_payload(instance);
        events.push(ApprovalEvent::status_changed(instance.id, &instance.requester_id, payload));
    }

    fn approval_payload(&self, instance: &RequestInstance) -> Value {
        let step_name = self.flow.step(instance.current_step).map(|s| s.display_name());
        json!({
            "module": instance.module,
            "referenced_object_id": instance.referenced_object_id,
            "requester_id": instance.requester_id,
            "step": instance.current_step,
            "step_name": step_name,
            "priority": instance.priority,
            "due_date": instance.due_date,
        })
    }

    fn status_payload(&self, instance: &RequestInstance) -> Value {
        json!({
            "module": instance.module,
            "referenced_object_id": instance.referenced_object_id,
            "status": instance.status,
            "step": instance.current_step,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::Condition;
    use crate::notifier::ApprovalEventKind;
    use crate::resolver::InMemoryIdentityDirectory;
    use crate::state_machine::Priority;
    use crate::step::{ApproverStrategy, StepDefinition};
    use crate::workflow::Module;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn resolver() -> ApproverResolver {
        ApproverResolver::new(Arc::new(
            InMemoryIdentityDirectory::new()
                .with_identity("alice", Some("bob"), &[])
                .with_identity("carol", None, &["hr"])
                .with_identity("dave", None, &["hr"])
                .with_identity("erin", None, &["hr"]),
        ))
    }

    fn instance(flow: &FlowDefinition, payload: Value) -> RequestInstance {
        let now = Utc::now();
        RequestInstance {
            id: Uuid::new_v4(),
            module: flow.module,
            referenced_object_id: "obj-1".into(),
            requester_id: "alice".into(),
            flow_id: flow.id,
            flow_version: flow.version,
            priority: Priority::Medium,
            payload,
            attachments: vec![],
            current_step: 1,
            status: RequestStatus::Pending,
            current_approvers: BTreeSet::new(),
            votes: vec![],
            history: vec![],
            due_date: now,
            entered_step_at: now,
            submitted_at: now,
            updated_at: now,
            version: 1,
        }
    }

    fn transition<'a>(
        flow: &'a FlowDefinition,
        resolver: &'a ApproverResolver,
        evaluator: &'a ConditionEvaluator,
    ) -> Transition<'a> {
        Transition { flow, resolver, evaluator, now: Utc::now(), notify_on_step_advance: false }
    }

    fn actions(instance: &RequestInstance) -> Vec<HistoryAction> {
        instance.history.iter().map(|h| h.action).collect()
    }

    #[tokio::test]
    async fn test_skip_and_auto_approve_chain_to_human_step() {
        let flow = FlowDefinition::builder("travel", Module::Travel)
            .add_step(
                StepDefinition::new(1, ApproverStrategy::RequesterManager)
                    .with_condition(Condition::equals("international", true)),
            )
            .add_step(StepDefinition::new(2, ApproverStrategy::fixed("ops")).auto_approve())
            .add_step(StepDefinition::new(3, ApproverStrategy::role("hr")))
            .build()
            .unwrap();
        let (resolver, evaluator) = (resolver(), ConditionEvaluator::new());
        let t = transition(&flow, &resolver, &evaluator);
        let mut request = instance(&flow, json!({ "international": false }));
        let mut events = Vec::new();

        t.enter_step(&mut request, &mut events).await.unwrap();

        assert_eq!(request.current_step, 3);
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(
            actions(&request),
            vec![
                HistoryAction::StepSkipped,
                HistoryAction::StepAdvanced,
                HistoryAction::AutoApproved,
                HistoryAction::StepAdvanced
            ]
        );
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.kind == ApprovalEventKind::NewApprovalNeeded));
    }

    #[tokio::test]
    async fn test_auto_reject_stops_the_flow() {
        let flow = FlowDefinition::builder("expense", Module::Expense)
            .add_step(
                StepDefinition::new(1, ApproverStrategy::RequesterManager)
                    .with_condition(Condition::greater_than("amount", 10_000))
                    .auto_reject(),
            )
            .add_step(StepDefinition::new(2, ApproverStrategy::RequesterManager))
            .build()
            .unwrap();
        let (resolver, evaluator) = (resolver(), ConditionEvaluator::new());
        let t = transition(&flow, &resolver, &evaluator);
        let mut request = instance(&flow, json!({ "amount": 25_000 }));
        let mut events = Vec::new();

        t.enter_step(&mut request, &mut events).await.unwrap();

        assert_eq!(request.status, RequestStatus::Rejected);
        assert_eq!(request.current_step, 1);
        assert_eq!(events, vec![ApprovalEvent::status_changed(request.id, "alice", t.status_payload(&request))]);
    }

    #[tokio::test]
    async fn test_every_step_skipped_completes_without_votes() {
        let flow = FlowDefinition::builder("leave", Module::Leave)
            .add_step(
                StepDefinition::new(1, ApproverStrategy::RequesterManager)
                    .with_condition(Condition::greater_than("days", 10)),
            )
            .build()
            .unwrap();
        let (resolver, evaluator) = (resolver(), ConditionEvaluator::new());
        let t = transition(&flow, &resolver, &evaluator);
        let mut request = instance(&flow, json!({ "days": 2 }));
        let mut events = Vec::new();

        t.enter_step(&mut request, &mut events).await.unwrap();

        assert_eq!(request.status, RequestStatus::Approved);
        assert_eq!(request.current_step, 2);
        assert!(request.votes.is_empty());
        assert_eq!(actions(&request), vec![HistoryAction::StepSkipped, HistoryAction::Completed]);
    }

    #[tokio::test]
    async fn test_tolerated_rejections_reject_only_when_threshold_unreachable() {
        let flow = FlowDefinition::builder("purchase", Module::Purchase)
            .add_step(
                StepDefinition::new(1, ApproverStrategy::role("hr"))
                    .parallel(2)
                    .tolerating_rejections(),
            )
            .build()
            .unwrap();
        let (resolver, evaluator) = (resolver(), ConditionEvaluator::new());
        let t = transition(&flow, &resolver, &evaluator);
        let mut request = instance(&flow, json!({}));
        let mut events = Vec::new();
        t.enter_step(&mut request, &mut events).await.unwrap();
        assert_eq!(request.current_approvers.len(), 3);

        t.apply_vote(&mut request, "carol", Decision::Reject, None, None, &mut events).await.unwrap();
        assert_eq!(request.status, RequestStatus::Pending);

        t.apply_vote(&mut request, "dave", Decision::Reject, Some("over budget".into()), None, &mut events)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Rejected);
        assert!(request.current_approvers.is_empty());
    }

    #[tokio::test]
    async fn test_vote_preconditions() {
        let flow = FlowDefinition::builder("leave", Module::Leave)
            .add_step(StepDefinition::new(1, ApproverStrategy::RequesterManager))
            .add_step(StepDefinition::new(2, ApproverStrategy::role("hr")))
            .build()
            .unwrap();
        let (resolver, evaluator) = (resolver(), ConditionEvaluator::new());
        let t = transition(&flow, &resolver, &evaluator);
        let mut request = instance(&flow, json!({}));
        let mut events = Vec::new();
        t.enter_step(&mut request, &mut events).await.unwrap();

        let err = t
            .apply_vote(&mut request, "carol", Decision::Approve, None, None, &mut events)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotAuthorizedApprover { step: 1, .. }));

        let err = t
            .apply_vote(&mut request, "bob", Decision::Approve, None, Some(2), &mut events)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidStepState(_)));

        t.apply_vote(&mut request, "bob", Decision::Approve, None, Some(1), &mut events)
            .await
            .unwrap();
        assert_eq!(request.current_step, 2);
        assert!(request.current_approvers.contains("carol"));
        assert!(!request.current_approvers.contains("bob"));
    }

    #[tokio::test]
    async fn test_escalation_adds_target_once() {
        let flow = FlowDefinition::builder("leave", Module::Leave)
            .add_step(
                StepDefinition::new(1, ApproverStrategy::RequesterManager)
                    .escalate_after(Duration::from_secs(3600), "director"),
            )
            .build()
            .unwrap();
        let (resolver, evaluator) = (resolver(), ConditionEvaluator::new());
        let mut t = transition(&flow, &resolver, &evaluator);
        let mut request = instance(&flow, json!({}));
        let mut events = Vec::new();
        t.enter_step(&mut request, &mut events).await.unwrap();
        events.clear();

        t.now = request.entered_step_at + chrono::Duration::minutes(30);
        assert_eq!(t.escalate(&mut request, &mut events), EscalationOutcome::NotDue);
        assert!(events.is_empty());

        t.now = request.entered_step_at + chrono::Duration::minutes(61);
        assert_eq!(t.escalate(&mut request, &mut events), EscalationOutcome::Escalated("director".into()));
        assert_eq!(t.escalate(&mut request, &mut events), EscalationOutcome::Renotify("director".into()));
        assert_eq!(events.len(), 2);
        assert_eq!(request.current_step, 1);
        assert_eq!(request.history.iter().filter(|h| h.action == HistoryAction::Escalated).count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_notifies_current_approvers() {
        let flow = FlowDefinition::builder("hr", Module::Attendance)
            .add_step(StepDefinition::new(1, ApproverStrategy::role("hr")).parallel(2))
            .build()
            .unwrap();
        let (resolver, evaluator) = (resolver(), ConditionEvaluator::new());
        let t = transition(&flow, &resolver, &evaluator);
        let mut request = instance(&flow, json!({}));
        let mut events = Vec::new();
        t.enter_step(&mut request, &mut events).await.unwrap();
        events.clear();

        assert!(matches!(t.cancel(&mut request, "carol", &mut events), Err(WorkflowError::NotRequester(_))));
        t.cancel(&mut request, "alice", &mut events).unwrap();

        assert_eq!(request.status, RequestStatus::Cancelled);
        let targets: Vec<&str> = events.iter().map(|e| e.target_identity.as_str()).collect();
        assert_eq!(targets, vec!["carol", "dave", "erin"]);
        assert!(matches!(t.cancel(&mut request, "alice", &mut events), Err(WorkflowError::NotCancellable(_))));
    }
}
