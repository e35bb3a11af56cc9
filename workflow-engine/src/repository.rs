use crate::error::WorkflowError;
use crate::state_machine::{RequestInstance, RequestStatus};
use crate::workflow::{FlowDefinition, Module};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub mod postgres;

pub use postgres::{PostgresFlowStore, PostgresRequestStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Version conflict on {id}: expected version {expected}")]
    VersionConflict { id: Uuid, expected: u64 },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { id, .. } => WorkflowError::ConcurrentModification(id),
            other => WorkflowError::StorageError(other.to_string()),
        }
    }
}

/// Versioned flow definitions
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Store a new `(id, version)`; fails `Duplicate` if it already exists
    async fn insert(&self, flow: FlowDefinition) -> StoreResult<()>;

    /// A specific version, or the latest when `version` is None
    async fn get(&self, flow_id: Uuid, version: Option<u32>) -> StoreResult<Option<FlowDefinition>>;

    /// Toggle the flow-level active flag, applying to every version
    async fn set_active(&self, flow_id: Uuid, active: bool) -> StoreResult<()>;

    /// Latest version of each flow, filtered; None acts as a wildcard
    async fn list(&self, module: Option<Module>, active: Option<bool>) -> StoreResult<Vec<FlowDefinition>>;
}

/// Request instances with optimistic concurrency on `version`
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn insert(&self, instance: RequestInstance) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<RequestInstance>>;

    /// Write `instance` iff the stored version equals `expected_version`.
    /// Returns the stored instance carrying the bumped version.
    async fn update(&self, instance: RequestInstance, expected_version: u64) -> StoreResult<RequestInstance>;

    async fn list_pending(&self) -> StoreResult<Vec<RequestInstance>>;

    /// Pending instances whose current approvers include `approver_id`
    async fn list_awaiting(&self, approver_id: &str) -> StoreResult<Vec<RequestInstance>>;

    async fn list_by_requester(&self, requester_id: &str) -> StoreResult<Vec<RequestInstance>>;
}

struct FlowVersions {
    active: bool,
    versions: BTreeMap<u32, FlowDefinition>,
}

impl FlowVersions {
    fn resolve(&self, version: Option<u32>) -> Option<FlowDefinition> {
        let flow = match version {
            Some(v) => self.versions.get(&v),
            None => self.versions.values().next_back(),
        }?;
        Some(FlowDefinition { active: self.active, ..flow.clone() })
    }
}

/// In-memory flow store for testing and development
pub struct InMemoryFlowStore {
    flows: Arc<DashMap<Uuid, FlowVersions>>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self { flows: Arc::new(DashMap::new()) }
    }
}

impl Default for InMemoryFlowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn insert(&self, flow: FlowDefinition) -> StoreResult<()> {
        let mut entry = self.flows.entry(flow.id).or_insert_with(|| FlowVersions {
            active: flow.active,
            versions: BTreeMap::new(),
        });
        if entry.versions.contains_key(&flow.version) {
            return Err(StoreError::Duplicate(format!("flow {} version {}", flow.id, flow.version)));
        }
        entry.active = flow.active;
        entry.versions.insert(flow.version, flow);
        Ok(())
    }

    async fn get(&self, flow_id: Uuid, version: Option<u32>) -> StoreResult<Option<FlowDefinition>> {
        Ok(self.flows.get(&flow_id).and_then(|entry| entry.resolve(version)))
    }

    async fn set_active(&self, flow_id: Uuid, active: bool) -> StoreResult<()> {
        match self.flows.get_mut(&flow_id) {
            Some(mut entry) => {
                entry.active = active;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("flow {}", flow_id))),
        }
    }

    async fn list(&self, module: Option<Module>, active: Option<bool>) -> StoreResult<Vec<FlowDefinition>> {
        let mut flows: Vec<FlowDefinition> = self
            .flows
            .iter()
            .filter_map(|entry| entry.resolve(None))
            .filter(|flow| module.map_or(true, |m| flow.module == m))
            .filter(|flow| active.map_or(true, |a| flow.active == a))
            .collect();
        flows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(flows)
    }
}

/// In-memory request store; conditional updates run under the entry lock
pub struct InMemoryRequestStore {
    requests: Arc<DashMap<Uuid, RequestInstance>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self { requests: Arc::new(DashMap::new()) }
    }

    fn collect(&self, predicate: impl Fn(&RequestInstance) -> bool) -> Vec<RequestInstance> {
        self.requests
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Default for InMemoryRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert(&self, instance: RequestInstance) -> StoreResult<()> {
        match self.requests.entry(instance.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!("request {}", instance.id))),
            Entry::Vacant(slot) => {
                slot.insert(instance);
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<RequestInstance>> {
        Ok(self.requests.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update(&self, mut instance: RequestInstance, expected_version: u64) -> StoreResult<RequestInstance> {
        let mut stored = self
            .requests
            .get_mut(&instance.id)
            .ok_or_else(|| StoreError::NotFound(format!("request {}", instance.id)))?;

        if stored.version != expected_version {
            debug!(
                request_id = %instance.id,
                expected = expected_version,
                actual = stored.version,
                "Rejecting stale request update"
            );
            return Err(StoreError::VersionConflict { id: instance.id, expected: expected_version });
        }

        instance.version = expected_version + 1;
        *stored = instance.clone();
        Ok(instance)
    }

    async fn list_pending(&self) -> StoreResult<Vec<RequestInstance>> {
        Ok(self.collect(|r| r.status == RequestStatus::Pending))
    }

    async fn list_awaiting(&self, approver_id: &str) -> StoreResult<Vec<RequestInstance>> {
        Ok(self.collect(|r| r.status == RequestStatus::Pending && r.current_approvers.contains(approver_id)))
    }

    async fn list_by_requester(&self, requester_id: &str) -> StoreResult<Vec<RequestInstance>> {
        Ok(self.collect(|r| r.requester_id == requester_id))
    }
}
