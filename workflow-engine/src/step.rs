// Step definitions: who approves, how many approvals, when the step applies
use crate::conditions::Condition;
use crate::error::{Result, WorkflowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::time::Duration;

/// How the approvers of a step are determined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ApproverStrategy {
    /// A single configured identity
    #[serde(alias = "specific-user")]
    FixedIdentity {
        #[serde(default)]
        identity: Option<String>,
    },
    /// The requester's manager, as reported by the identity provider
    #[serde(alias = "manager")]
    RequesterManager,
    /// Every active identity holding `role`
    #[serde(alias = "role-based")]
    RolePool { role: String },
}

impl ApproverStrategy {
    pub fn fixed(identity: &str) -> Self {
        ApproverStrategy::FixedIdentity { identity: Some(identity.to_string()) }
    }

    pub fn role(role: &str) -> Self {
        ApproverStrategy::RolePool { role: role.to_string() }
    }
}

/// Time-based widening of a step's approver pool
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "after_seconds")]
    pub after: Duration,
    pub escalate_to: String,
}

impl Escalation {
    pub fn new(after: Duration, escalate_to: &str) -> Self {
        Self { enabled: true, after, escalate_to: escalate_to.to_string() }
    }

    /// True once `after` has elapsed since `entered_at`
    pub fn is_due(&self, entered_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match (now - entered_at).to_std() {
            Ok(elapsed) => elapsed >= self.after,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// 1-based position within the flow
    pub order: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub approver: ApproverStrategy,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_required_approvals")]
    pub required_approvals: u32,
    /// Parallel steps only: a reject counts against the threshold instead of
    /// ending the request outright.
    #[serde(default)]
    pub tolerate_rejections: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub auto_reject: bool,
    #[serde(default)]
    pub escalation: Option<Escalation>,
}

impl StepDefinition {
    /// Sequential single-approver step
    pub fn new(order: u32, approver: ApproverStrategy) -> Self {
        Self {
            order,
            name: None,
            approver,
            parallel: false,
            required_approvals: 1,
            tolerate_rejections: false,
            conditions: Vec::new(),
            auto_approve: false,
            auto_reject: false,
            escalation: None,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Parallel step satisfied by `required_approvals` approve votes
    pub fn parallel(mut self, required_approvals: u32) -> Self {
        self.parallel = true;
        self.required_approvals = required_approvals;
        self
    }

    pub fn tolerating_rejections(mut self) -> Self {
        self.tolerate_rejections = true;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn auto_approve(mut self) -> Self {
        self.auto_approve = true;
        self
    }

    pub fn auto_reject(mut self) -> Self {
        self.auto_reject = true;
        self
    }

    pub fn escalate_after(mut self, after: Duration, escalate_to: &str) -> Self {
        self.escalation = Some(Escalation::new(after, escalate_to));
        self
    }

    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("step {}", self.order))
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(WorkflowError::InvalidDefinition(msg));

        if self.order == 0 {
            return invalid("step order starts at 1".into());
        }
        if self.required_approvals == 0 {
            return invalid(format!("step {} requires at least one approval", self.order));
        }
        if !self.parallel && self.required_approvals != 1 {
            return invalid(format!(
                "step {} is sequential but requires {} approvals",
                self.order, self.required_approvals
            ));
        }
        if self.auto_approve && self.auto_reject {
            return invalid(format!("step {} cannot both auto-approve and auto-reject", self.order));
        }
        if let ApproverStrategy::RolePool { role } = &self.approver {
            if role.trim().is_empty() {
                return invalid(format!("step {} has an empty role", self.order));
            }
        }
        if let Some(escalation) = &self.escalation {
            if escalation.enabled && escalation.after.is_zero() {
                return invalid(format!("step {} escalates after zero seconds", self.order));
            }
            if escalation.enabled && escalation.escalate_to.trim().is_empty() {
                return invalid(format!("step {} escalates to nobody", self.order));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_required_approvals() -> u32 {
    1
}
