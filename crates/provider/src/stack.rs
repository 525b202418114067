//! Stack client seam.
//!
//! The orchestrator talks to the infrastructure engine only through
//! [`StackClient`]. Production uses [`crate::aws::AwsStackClient`]; tests
//! plug in in-memory fakes.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use sqs_broker_core::{LastOperation, LastOperationState};

/// Capability required to create stacks that contain named IAM resources.
pub const CAPABILITY_NAMED_IAM: &str = "CAPABILITY_NAMED_IAM";

/// Message fragment CloudFormation uses when a described stack is absent.
const NO_EXIST_ERR_MATCH: &str = "does not exist";

/// Error code CloudFormation attaches to the "stack does not exist" response.
const VALIDATION_ERROR_CODE: &str = "ValidationError";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors reported by a [`StackClient`].
#[derive(Debug, Clone, Error)]
pub enum StackError {
    /// The engine returned a typed "resource not found" error.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The engine returned a typed "already exists" error.
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// Any other error response from the engine.
    #[error("{}: {message}", .code.as_deref().unwrap_or("ServiceError"))]
    Service {
        code: Option<String>,
        message: String,
    },

    /// The request never produced a service response (dispatch, timeout, IO).
    #[error("transport error: {0}")]
    Transport(String),
}

/// Whether `err` means the stack or secret does not exist.
///
/// This is the only place where error messages are inspected:
/// `DescribeStacks` reports a missing stack as a generic `ValidationError`
/// with no dedicated error code.
pub fn is_not_found(err: &StackError) -> bool {
    match err {
        StackError::NotFound(_) => true,
        StackError::Service {
            code: Some(code),
            message,
        } => code == VALIDATION_ERROR_CODE && message.contains(NO_EXIST_ERR_MATCH),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Inputs / outputs
// ---------------------------------------------------------------------------

/// Value submitted for one template parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    Value(String),
    UsePrevious,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackParameter {
    pub key: String,
    pub value: ParameterValue,
}

impl StackParameter {
    pub fn value(key: impl Into<String>, value: impl ToString) -> Self {
        Self {
            key: key.into(),
            value: ParameterValue::Value(value.to_string()),
        }
    }

    pub fn use_previous(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: ParameterValue::UsePrevious,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateStackInput {
    pub stack_name: String,
    pub template_body: String,
    pub parameters: Vec<StackParameter>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateStackInput {
    pub stack_name: String,
    pub parameters: Vec<StackParameter>,
    pub use_previous_template: bool,
    /// Replacement body; only set when `use_previous_template` is false.
    pub template_body: Option<String>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
}

/// One stack as reported by `DescribeStacks`.
#[derive(Debug, Clone, Default)]
pub struct StackDescription {
    pub name: String,
    /// `None` only when the engine misbehaves; callers treat it as an error.
    pub status: Option<String>,
    pub outputs: Vec<StackOutput>,
}

impl StackDescription {
    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|o| o.key == key)
            .map(|o| o.value.as_str())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub const STATUS_DELETE_COMPLETE: &str = "DELETE_COMPLETE";
pub const STATUS_DELETE_IN_PROGRESS: &str = "DELETE_IN_PROGRESS";

/// Infra-engine stack status, e.g. `CREATE_COMPLETE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackStatus(String);

impl StackStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Map the engine status onto the broker lifecycle.
    ///
    /// Anything still moving (including rollbacks in flight) is in progress;
    /// failures and completed rollbacks are failed; other completions succeed.
    pub fn lifecycle(&self) -> LastOperationState {
        let s = self.0.as_str();
        if s.ends_with("_IN_PROGRESS") {
            LastOperationState::InProgress
        } else if s.ends_with("_FAILED") || s.contains("ROLLBACK") {
            LastOperationState::Failed
        } else if s.ends_with("_COMPLETE") {
            LastOperationState::Succeeded
        } else {
            LastOperationState::InProgress
        }
    }

    /// Lifecycle state plus the broker-visible description.
    ///
    /// `ready_description` is what a succeeded stack reports.
    pub fn to_last_operation(&self, ready_description: &str) -> LastOperation {
        match self.lifecycle() {
            LastOperationState::Failed => {
                LastOperation::new(LastOperationState::Failed, format!("failed: {}", self.0))
            }
            LastOperationState::Succeeded => {
                LastOperation::new(LastOperationState::Succeeded, ready_description)
            }
            LastOperationState::InProgress => {
                LastOperation::new(LastOperationState::InProgress, "pending")
            }
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Asynchronous operations against the infrastructure engine.
///
/// Every call returns as soon as the engine accepted (or rejected) the
/// request; progress is observed through [`StackClient::describe_stacks`].
#[async_trait]
pub trait StackClient: Send + Sync {
    async fn create_stack(&self, input: CreateStackInput) -> Result<(), StackError>;

    async fn update_stack(&self, input: UpdateStackInput) -> Result<(), StackError>;

    async fn delete_stack(&self, stack_name: &str) -> Result<(), StackError>;

    /// Body of the template the stack currently runs. `Ok(None)` means the
    /// engine returned no body.
    async fn get_template(&self, stack_name: &str) -> Result<Option<String>, StackError>;

    /// Describe the stack with the given name.
    ///
    /// A missing stack surfaces as an error for which [`is_not_found`] holds.
    async fn describe_stacks(&self, stack_name: &str) -> Result<Vec<StackDescription>, StackError>;

    /// Read a secret's string value. `Ok(None)` means the secret has no
    /// string payload.
    async fn get_secret_value(&self, secret_id: &str) -> Result<Option<String>, StackError>;
}
