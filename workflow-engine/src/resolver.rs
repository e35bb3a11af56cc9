// Approver resolution: turns a step's strategy into concrete identities
use crate::error::{Result, WorkflowError};
use crate::step::{ApproverStrategy, StepDefinition};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Directory of people and roles, owned by the host application
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Manager of `identity`, if one is recorded
    async fn manager_of(&self, identity: &str) -> Result<Option<String>>;

    /// Every active identity holding `role`
    async fn identities_with_role(&self, role: &str) -> Result<Vec<String>>;
}

/// What the resolver needs to know about the request being routed
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub requester_id: String,
}

impl RequestContext {
    pub fn new(requester_id: &str) -> Self {
        Self { requester_id: requester_id.to_string() }
    }
}

#[derive(Debug, Clone)]
struct DirectoryEntry {
    manager: Option<String>,
    roles: BTreeSet<String>,
    active: bool,
}

/// In-memory identity directory for tests and embedded use
pub struct InMemoryIdentityDirectory {
    entries: Arc<DashMap<String, DirectoryEntry>>,
}

impl InMemoryIdentityDirectory {
    pub fn new() -> Self {
        Self { entries: Arc::new(DashMap::new()) }
    }

    /// Add or replace an active identity
    pub fn add_identity(&self, identity: &str, manager: Option<&str>, roles: &[&str]) {
        self.entries.insert(
            identity.to_string(),
            DirectoryEntry {
                manager: manager.map(str::to_string),
                roles: roles.iter().map(|r| r.to_string()).collect(),
                active: true,
            },
        );
    }

    pub fn with_identity(self, identity: &str, manager: Option<&str>, roles: &[&str]) -> Self {
        self.add_identity(identity, manager, roles);
        self
    }

    /// Mark an identity inactive; it stays resolvable as a manager
    pub fn deactivate(&self, identity: &str) {
        if let Some(mut entry) = self.entries.get_mut(identity) {
            entry.active = false;
        }
    }
}

impl Default for InMemoryIdentityDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityDirectory {
    async fn manager_of(&self, identity: &str) -> Result<Option<String>> {
        Ok(self.entries.get(identity).and_then(|entry| entry.manager.clone()))
    }

    async fn identities_with_role(&self, role: &str) -> Result<Vec<String>> {
        let mut identities: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.active && entry.roles.contains(role))
            .map(|entry| entry.key().clone())
            .collect();
        identities.sort();
        Ok(identities)
    }
}

pub struct ApproverResolver {
    identities: Arc<dyn IdentityProvider>,
}

impl ApproverResolver {
    pub fn new(identities: Arc<dyn IdentityProvider>) -> Self {
        Self { identities }
    }

    /// Resolve the approvers of `step`; never empty on success.
    pub async fn resolve(&self, step: &StepDefinition, ctx: &RequestContext) -> Result<BTreeSet<String>> {
        let unresolved = |reason: String| WorkflowError::NoApproverResolved { step: step.order, reason };

        let approvers: BTreeSet<String> = match &step.approver {
            ApproverStrategy::FixedIdentity { identity } => match identity.as_deref().map(str::trim) {
                Some(identity) if !identity.is_empty() => BTreeSet::from([identity.to_string()]),
                _ => return Err(unresolved("no identity configured".into())),
            },
            ApproverStrategy::RequesterManager => {
                match self.identities.manager_of(&ctx.requester_id).await? {
                    Some(manager) => BTreeSet::from([manager]),
                    None => {
                        return Err(unresolved(format!("{} has no manager", ctx.requester_id)))
                    }
                }
            }
            ApproverStrategy::RolePool { role } => {
                self.identities.identities_with_role(role).await?.into_iter().collect()
            }
        };

        if approvers.is_empty() {
            return Err(unresolved(format!("no active identity for {:?}", step.approver)));
        }

        debug!(step = step.order, approvers = ?approvers, "Resolved step approvers");
        Ok(approvers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> InMemoryIdentityDirectory {
        InMemoryIdentityDirectory::new()
            .with_identity("alice", Some("bob"), &["staff"])
            .with_identity("bob", None, &["hr", "staff"])
            .with_identity("carol", None, &["hr"])
            .with_identity("dave", None, &["hr"])
    }

    #[tokio::test]
    async fn test_resolves_each_strategy() {
        let directory = directory();
        directory.deactivate("dave");
        let resolver = ApproverResolver::new(Arc::new(directory));
        let ctx = RequestContext::new("alice");

        let fixed = StepDefinition::new(1, ApproverStrategy::fixed("erin"));
        assert_eq!(resolver.resolve(&fixed, &ctx).await.unwrap(), BTreeSet::from(["erin".to_string()]));

        let manager = StepDefinition::new(1, ApproverStrategy::RequesterManager);
        assert_eq!(resolver.resolve(&manager, &ctx).await.unwrap(), BTreeSet::from(["bob".to_string()]));

        let hr = StepDefinition::new(1, ApproverStrategy::role("hr")).parallel(2);
        assert_eq!(
            resolver.resolve(&hr, &ctx).await.unwrap(),
            BTreeSet::from(["bob".to_string(), "carol".to_string()])
        );
    }

    #[tokio::test]
    async fn test_requester_is_not_filtered_out() {
        let resolver = ApproverResolver::new(Arc::new(directory()));

        let hr = StepDefinition::new(1, ApproverStrategy::role("hr"));
        let approvers = resolver.resolve(&hr, &RequestContext::new("bob")).await.unwrap();
        assert!(approvers.contains("bob"));

        let fixed = StepDefinition::new(2, ApproverStrategy::fixed("alice"));
        let approvers = resolver.resolve(&fixed, &RequestContext::new("alice")).await.unwrap();
        assert_eq!(approvers, BTreeSet::from(["alice".to_string()]));
    }

    #[tokio::test]
    async fn test_unresolvable_strategies() {
        let resolver = ApproverResolver::new(Arc::new(directory()));
        let ctx = RequestContext::new("bob");

        let unset = StepDefinition::new(1, ApproverStrategy::FixedIdentity { identity: None });
        assert!(matches!(
            resolver.resolve(&unset, &ctx).await,
            Err(WorkflowError::NoApproverResolved { .. })
        ));

        let no_manager = StepDefinition::new(1, ApproverStrategy::RequesterManager);
        assert!(resolver.resolve(&no_manager, &ctx).await.is_err());

        let empty_role = StepDefinition::new(1, ApproverStrategy::role("auditor"));
        assert!(resolver.resolve(&empty_role, &ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_provider_errors_propagate() {
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_manager_of()
            .returning(|_| Err(WorkflowError::StorageError("directory offline".into())));

        let resolver = ApproverResolver::new(Arc::new(provider));
        let step = StepDefinition::new(1, ApproverStrategy::RequesterManager);
        let err = resolver.resolve(&step, &RequestContext::new("alice")).await.unwrap_err();
        assert!(matches!(err, WorkflowError::StorageError(_)));
    }
}
