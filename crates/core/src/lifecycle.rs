//! Broker-facing lifecycle types.
//!
//! These are the shapes the broker layer exchanges with the provider:
//! the operation tag it stores between calls, the async/sync result of
//! each verb, and the polled state of an in-flight operation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle verb carried as opaque operation data between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Provision,
    Deprovision,
    Update,
    Bind,
    Unbind,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Deprovision => "deprovision",
            Self::Update => "update",
            Self::Bind => "bind",
            Self::Unbind => "unbind",
        }
    }

    /// Whether this operation removes the underlying stack, so that a
    /// missing stack means the operation finished.
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Deprovision | Self::Unbind)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provision" => Ok(Self::Provision),
            "deprovision" => Ok(Self::Deprovision),
            "update" => Ok(Self::Update),
            "bind" => Ok(Self::Bind),
            "unbind" => Ok(Self::Unbind),
            other => Err(format!("unknown operation '{other}'")),
        }
    }
}

/// Polled state of the last operation on an instance or binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastOperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl LastOperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for LastOperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOperation {
    pub state: LastOperationState,
    pub description: String,
}

impl LastOperation {
    pub fn new(state: LastOperationState, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
        }
    }
}

/// Result of Provision, Deprovision, Update and Unbind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub operation: Operation,
    pub is_async: bool,
}

impl OperationSpec {
    pub fn asynchronous(operation: Operation) -> Self {
        Self {
            operation,
            is_async: true,
        }
    }

    pub fn completed(operation: Operation) -> Self {
        Self {
            operation,
            is_async: false,
        }
    }
}

/// Result of Bind. Credentials are only present for a synchronous bind.
#[derive(Clone, Serialize, Deserialize)]
pub struct BindingSpec {
    pub operation: Operation,
    pub is_async: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<serde_json::Value>,
}

impl fmt::Debug for BindingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingSpec")
            .field("operation", &self.operation)
            .field("is_async", &self.is_async)
            .field("credentials", &self.credentials.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_round_trips_through_str() {
        for op in [
            Operation::Provision,
            Operation::Deprovision,
            Operation::Update,
            Operation::Bind,
            Operation::Unbind,
        ] {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert!("destroy".parse::<Operation>().is_err());
    }

    #[test]
    fn only_delete_operations_treat_missing_stack_as_done() {
        assert!(Operation::Deprovision.is_delete());
        assert!(Operation::Unbind.is_delete());
        assert!(!Operation::Provision.is_delete());
        assert!(!Operation::Bind.is_delete());
        assert!(!Operation::Update.is_delete());
    }

    #[test]
    fn state_serializes_with_broker_names() {
        let json = serde_json::to_string(&LastOperationState::InProgress).unwrap();
        assert_eq!(json, "\"in progress\"");
        assert!(!LastOperationState::InProgress.is_terminal());
        assert!(LastOperationState::Failed.is_terminal());
    }

    #[test]
    fn binding_spec_debug_hides_credentials() {
        let spec = BindingSpec {
            operation: Operation::Bind,
            is_async: false,
            credentials: Some(serde_json::json!({"aws_secret_access_key": "s3cr3t"})),
        };
        assert!(!format!("{spec:?}").contains("s3cr3t"));
    }
}
