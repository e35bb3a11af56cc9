//! Request instances and their state.
//!
//! A [`RequestInstance`] is created at submit time, mutated only by the engine
//! and never deleted. Its `history` is append-only and `version` is the
//! optimistic concurrency token checked by every store write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::workflow::Module;

/// Actor recorded for engine-driven history entries
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(format!("unknown request status '{}'", other)),
        }
    }
}

/// Ordered so that sorting descending puts urgent work first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub step: u32,
    pub voter_id: String,
    pub decision: Decision,
    #[serde(default)]
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryAction {
    Submitted,
    Approved,
    Rejected,
    StepSkipped,
    AutoApproved,
    AutoRejected,
    StepAdvanced,
    Escalated,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub actor_id: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInstance {
    pub id: Uuid,
    pub module: Module,
    pub referenced_object_id: String,
    pub requester_id: String,
    pub flow_id: Uuid,
    pub flow_version: u32,
    pub priority: Priority,
    pub payload: Value,
    pub attachments: Vec<Attachment>,
    /// 1-based; `steps.len() + 1` once every step is satisfied
    pub current_step: u32,
    pub status: RequestStatus,
    pub current_approvers: BTreeSet<String>,
    pub votes: Vec<Vote>,
    pub history: Vec<HistoryEntry>,
    pub due_date: DateTime<Utc>,
    pub entered_step_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl RequestInstance {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Still pending after its due date
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && now > self.due_date
    }

    pub fn votes_for_step(&self, step: u32) -> impl Iterator<Item = &Vote> {
        self.votes.iter().filter(move |vote| vote.step == step)
    }

    pub fn approvals_at(&self, step: u32) -> usize {
        self.votes_for_step(step)
            .filter(|vote| vote.decision == Decision::Approve)
            .count()
    }

    pub fn rejections_at(&self, step: u32) -> usize {
        self.votes_for_step(step)
            .filter(|vote| vote.decision == Decision::Reject)
            .count()
    }

    pub fn has_voted(&self, step: u32, voter_id: &str) -> bool {
        self.votes_for_step(step).any(|vote| vote.voter_id == voter_id)
    }

    /// Whether `approver_id` has an outstanding decision on this request
    pub fn is_awaiting(&self, approver_id: &str) -> bool {
        !self.is_terminal()
            && self.current_approvers.contains(approver_id)
            && !self.has_voted(self.current_step, approver_id)
    }

    /// Insert or overwrite the voter's vote on `vote.step`
    pub fn upsert_vote(&mut self, vote: Vote) {
        match self
            .votes
            .iter_mut()
            .find(|existing| existing.step == vote.step && existing.voter_id == vote.voter_id)
        {
            Some(existing) => *existing = vote,
            None => self.votes.push(vote),
        }
    }

    pub fn record(&mut self, action: HistoryAction, actor_id: &str, at: DateTime<Utc>, note: Option<String>) {
        self.history.push(HistoryEntry { action, actor_id: actor_id.to_string(), at, note });
        self.updated_at = at;
    }
}
