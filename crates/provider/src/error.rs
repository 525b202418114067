use thiserror::Error;

use crate::stack::StackError;

/// Errors returned by the provisioning orchestrator.
///
/// Messages never contain credential material.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("instance already exists: {0}")]
    InstanceAlreadyExists(String),

    #[error("binding already exists: {0}")]
    BindingAlreadyExists(String),

    #[error("instance does not exist: {0}")]
    InstanceDoesNotExist(String),

    /// Only GetBinding treats a missing stack as terminal.
    #[error("cloudformation stack does not exist: {0}")]
    StackNotFound(String),

    #[error("invalid parameters: {0}")]
    BadParameters(String),

    #[error("unknown access policy {0:?}")]
    UnknownAccessPolicy(String),

    #[error("unknown plan {0:?}")]
    UnknownPlan(String),

    #[error("timed out waiting for binding {0} to complete")]
    BindingDeadlineExceeded(String),

    #[error("binding failed: {0}")]
    BindingFailed(String),

    /// The engine answered with a shape the broker cannot work with.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error(transparent)]
    Stack(#[from] StackError),
}

impl BrokerError {
    /// Bad caller input, rejected before any call to the engine.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::BadParameters(_) | Self::UnknownAccessPolicy(_) | Self::UnknownPlan(_)
        )
    }

    /// The instance or binding is already provisioned.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::InstanceAlreadyExists(_) | Self::BindingAlreadyExists(_)
        )
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e.to_string())
    }
}
