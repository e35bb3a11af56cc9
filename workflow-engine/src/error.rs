use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Approval flow not found: {0}")]
    FlowNotFound(String),

    #[error("Approval flow is inactive: {0}")]
    FlowInactive(String),

    #[error("Approval request not found: {0}")]
    RequestNotFound(Uuid),

    #[error("No approver could be resolved for step {step}: {reason}")]
    NoApproverResolved { step: u32, reason: String },

    #[error("{voter_id} is not an approver for step {step} of request {request_id}")]
    NotAuthorizedApprover {
        request_id: Uuid,
        voter_id: String,
        step: u32,
    },

    #[error("Invalid step state: {0}")]
    InvalidStepState(String),

    #[error("Only the requester can cancel request {0}")]
    NotRequester(Uuid),

    #[error("Request {0} is not pending and cannot be cancelled")]
    NotCancellable(Uuid),

    #[error("Request {0} was modified concurrently, retries exhausted")]
    ConcurrentModification(Uuid),

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Scheduling error: {0}")]
    SchedulingError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl WorkflowError {
    /// Stable code for API responses and log correlation
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::FlowNotFound(_) => codes::FLOW_NOT_FOUND,
            WorkflowError::FlowInactive(_) => codes::FLOW_INACTIVE,
            WorkflowError::RequestNotFound(_) => codes::REQUEST_NOT_FOUND,
            WorkflowError::NoApproverResolved { .. } => codes::NO_APPROVER_RESOLVED,
            WorkflowError::NotAuthorizedApprover { .. } => codes::NOT_AUTHORIZED_APPROVER,
            WorkflowError::InvalidStepState(_) => codes::INVALID_STEP_STATE,
            WorkflowError::NotRequester(_) => codes::NOT_REQUESTER,
            WorkflowError::NotCancellable(_) => codes::NOT_CANCELLABLE,
            WorkflowError::ConcurrentModification(_) => codes::CONCURRENT_MODIFICATION,
            WorkflowError::InvalidDefinition(_) => codes::INVALID_DEFINITION,
            WorkflowError::StorageError(_) => codes::STORAGE_ERROR,
            WorkflowError::SchedulingError(_) => codes::SCHEDULING_ERROR,
            WorkflowError::InternalError(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Whether the caller may reasonably retry the same call later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WorkflowError::ConcurrentModification(_) | WorkflowError::StorageError(_)
        )
    }
}

pub mod codes {
    pub const FLOW_NOT_FOUND: &str = "APPROVAL_1001";
    pub const FLOW_INACTIVE: &str = "APPROVAL_1002";
    pub const INVALID_DEFINITION: &str = "APPROVAL_1003";
    pub const REQUEST_NOT_FOUND: &str = "APPROVAL_2001";
    pub const INVALID_STEP_STATE: &str = "APPROVAL_2002";
    pub const NOT_CANCELLABLE: &str = "APPROVAL_2003";
    pub const NO_APPROVER_RESOLVED: &str = "APPROVAL_3001";
    pub const NOT_AUTHORIZED_APPROVER: &str = "APPROVAL_3002";
    pub const NOT_REQUESTER: &str = "APPROVAL_3003";
    pub const CONCURRENT_MODIFICATION: &str = "APPROVAL_4001";
    pub const STORAGE_ERROR: &str = "APPROVAL_4002";
    pub const SCHEDULING_ERROR: &str = "APPROVAL_5001";
    pub const INTERNAL_ERROR: &str = "APPROVAL_5002";
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
