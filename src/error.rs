//! Typed failures surfaced by the lifecycle engine.
//!
//! Store faults never leak out raw: they are folded into this taxonomy so
//! callers can decide between fixing the request, refreshing their view,
//! or retrying the whole call.

use thiserror::Error;

use crate::model::WorkflowStatus;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error(
        "Asset {asset_id} is locked by a pending workflow{}",
        .workflow_id.as_deref().map(|id| format!(" ({id})")).unwrap_or_default()
    )]
    AssetLocked {
        asset_id: String,
        workflow_id: Option<String>,
    },

    #[error("Workflow {workflow_id} is already {status} and cannot be decided again")]
    InvalidState {
        workflow_id: String,
        status: WorkflowStatus,
    },

    #[error("Approver {approver_id} is not authorized: {reason}")]
    Unauthorized { approver_id: String, reason: String },

    #[error("Lifecycle invariant violated: {details}")]
    InvariantViolation { details: String },

    #[error("Transient store failure during {operation}: {reason}")]
    TransientStore { operation: String, reason: String },
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

impl LifecycleError {
    pub fn validation(message: impl Into<String>) -> Self {
        LifecycleError::Validation {
            message: message.into(),
        }
    }

    pub fn asset_not_found(id: impl Into<String>) -> Self {
        LifecycleError::NotFound {
            entity: "Asset",
            id: id.into(),
        }
    }

    pub fn workflow_not_found(id: impl Into<String>) -> Self {
        LifecycleError::NotFound {
            entity: "Workflow",
            id: id.into(),
        }
    }

    /// Only store timeouts and connection faults are worth retrying verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LifecycleError::TransientStore { .. })
    }

    /// Stable machine-readable code for gateways and the CLI.
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::Validation { .. } => "validation_error",
            LifecycleError::NotFound { .. } => "not_found",
            LifecycleError::AssetLocked { .. } => "asset_locked",
            LifecycleError::InvalidState { .. } => "invalid_state",
            LifecycleError::Unauthorized { .. } => "unauthorized",
            LifecycleError::InvariantViolation { .. } => "invariant_violation",
            LifecycleError::TransientStore { .. } => "transient_store_error",
        }
    }

    pub(crate) fn from_store(operation: &str, err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation {
                asset_id,
                workflow_id,
            } => LifecycleError::AssetLocked {
                asset_id,
                workflow_id,
            },
            StoreError::Serialization(e) => LifecycleError::InvariantViolation {
                details: format!("stored record could not be decoded during {operation}: {e}"),
            },
            other => LifecycleError::TransientStore {
                operation: operation.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
