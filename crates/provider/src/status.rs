//! Reading a stack back from the engine and classifying it.

use sqs_broker_core::{LastOperation, LastOperationState, Operation};

use crate::error::BrokerError;
use crate::stack::{is_not_found, StackClient, StackDescription, StackStatus};

pub const DESCRIPTION_DONE: &str = "done";
pub const DESCRIPTION_READY: &str = "ready";
pub const DESCRIPTION_STACK_MISSING: &str = "failed: cloudformation stack does not exist";

/// Describe exactly one stack.
///
/// `Ok(None)` means the engine reports the stack as absent. Zero or several
/// stacks, or a stack without a status, are integration errors.
pub async fn describe_stack(
    client: &dyn StackClient,
    stack_name: &str,
) -> Result<Option<StackDescription>, BrokerError> {
    let mut stacks = match client.describe_stacks(stack_name).await {
        Ok(stacks) => stacks,
        Err(e) if is_not_found(&e) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if stacks.len() != 1 {
        return Err(BrokerError::UnexpectedResponse(format!(
            "describe {stack_name} returned {} stacks, expected exactly one",
            stacks.len()
        )));
    }
    let stack = stacks.remove(0);
    if stack.status.is_none() {
        return Err(BrokerError::UnexpectedResponse(format!(
            "describe {stack_name} returned a stack without a status"
        )));
    }
    Ok(Some(stack))
}

/// Current lifecycle state of `stack_name` for the operation the broker
/// last started on it.
///
/// `ready_description` is reported on success: `done` for instances,
/// `ready` for bindings.
pub async fn last_operation(
    client: &dyn StackClient,
    stack_name: &str,
    operation: Operation,
    ready_description: &str,
) -> Result<LastOperation, BrokerError> {
    let Some(stack) = describe_stack(client, stack_name).await? else {
        return Ok(missing_stack(operation));
    };
    Ok(stack_status(&stack).to_last_operation(ready_description))
}

/// A missing stack finishes a delete and fails everything else.
pub fn missing_stack(operation: Operation) -> LastOperation {
    if operation.is_delete() {
        LastOperation::new(LastOperationState::Succeeded, DESCRIPTION_DONE)
    } else {
        LastOperation::new(LastOperationState::Failed, DESCRIPTION_STACK_MISSING)
    }
}

/// Status of a stack returned by [`describe_stack`], which guarantees one.
pub(crate) fn stack_status(stack: &StackDescription) -> StackStatus {
    StackStatus::new(stack.status.clone().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_stack_depends_on_operation() {
        let done = missing_stack(Operation::Deprovision);
        assert_eq!(done.state, LastOperationState::Succeeded);
        assert_eq!(done.description, "done");

        assert_eq!(missing_stack(Operation::Unbind).state, LastOperationState::Succeeded);

        for op in [Operation::Provision, Operation::Update, Operation::Bind] {
            let failed = missing_stack(op);
            assert_eq!(failed.state, LastOperationState::Failed);
            assert_eq!(failed.description, DESCRIPTION_STACK_MISSING);
        }
    }
}
