//! Provisioning orchestrator.
//!
//! Stateless: every call derives the stack name from the configured prefix
//! and the caller's id, then reads the current state back from the engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use sqs_broker_core::{BindingSpec, LastOperation, Operation, OperationSpec, ProviderConfig};

use crate::error::BrokerError;
use crate::naming::stack_name;
use crate::params::{BindParameters, QueueParameters, QueuePlan};
use crate::poller::{CleanupGuard, OperationPoller};
use crate::stack::{
    CreateStackInput, StackClient, StackDescription, StackError, UpdateStackInput,
    CAPABILITY_NAMED_IAM, STATUS_DELETE_COMPLETE, STATUS_DELETE_IN_PROGRESS,
};
use crate::status::{describe_stack, last_operation, DESCRIPTION_DONE, DESCRIPTION_READY};
use crate::template::queue::{
    track_redrive_parameter, OUTPUT_PRIMARY_QUEUE_ARN, OUTPUT_PRIMARY_QUEUE_URL,
    OUTPUT_SECONDARY_QUEUE_ARN, OUTPUT_SECONDARY_QUEUE_URL,
};
use crate::template::user::OUTPUT_CREDENTIALS_ARN;
use crate::template::{
    render_queue_template, render_user_template, AccessPolicy, Template, UserTemplateParams,
};


const SERVICE_TAG: &str = "sqs";

/// A Provision request as handed over by the broker layer.
#[derive(Debug, Clone, Default)]
pub struct ProvisionRequest {
    pub instance_id: String,
    pub service_id: String,
    pub plan: String,
    pub parameters: Option<Value>,
}

/// A Bind request as handed over by the broker layer.
#[derive(Debug, Clone, Default)]
pub struct BindRequest {
    pub instance_id: String,
    pub binding_id: String,
    pub service_id: String,
    pub parameters: Option<Value>,
    /// Whether the caller accepts an asynchronous bind.
    pub async_allowed: bool,
}

pub struct Provider {
    client: Arc<dyn StackClient>,
    settings: ProviderConfig,
    poll_interval: Duration,
    bind_timeout: Duration,
    cleanup_tasks: TaskTracker,
}

impl Provider {
    pub fn new(client: Arc<dyn StackClient>, settings: ProviderConfig) -> Self {
        Self {
            client,
            poll_interval: settings.poll_interval(),
            bind_timeout: settings.bind_timeout(),
            settings,
            cleanup_tasks: TaskTracker::new(),
        }
    }

    /// Override the synchronous bind timing from config.
    pub fn with_bind_timing(mut self, poll_interval: Duration, bind_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.bind_timeout = bind_timeout;
        self
    }

    pub fn settings(&self) -> &ProviderConfig {
        &self.settings
    }

    /// Wait for background deletes of failed binding stacks.
    ///
    /// Call before the runtime shuts down; cleanups started afterwards are
    /// still tracked.
    pub async fn wait_for_cleanup(&self) {
        self.cleanup_tasks.close();
        self.cleanup_tasks.wait().await;
        self.cleanup_tasks.reopen();
    }

    fn stack_name(&self, id: &str) -> String {
        stack_name(&self.settings.resource_prefix, id)
    }

    fn tags(&self, name: &str, service_id: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Name".to_string(), name.to_string()),
            ("Service".to_string(), SERVICE_TAG.to_string()),
            ("ServiceID".to_string(), service_id.to_string()),
            ("Environment".to_string(), self.settings.deploy_env.clone()),
        ])
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Start creating the queue pair for a new instance.
    pub async fn provision(&self, request: &ProvisionRequest) -> Result<OperationSpec, BrokerError> {
        let plan: QueuePlan = request.plan.parse()?;
        let params = QueueParameters::decode(request.parameters.as_ref())?;
        if !plan.is_fifo() && params.content_based_deduplication.is_some() {
            return Err(BrokerError::BadParameters(
                "content_based_deduplication is only supported on the fifo plan".into(),
            ));
        }

        let stack_name = self.stack_name(&request.instance_id);
        let template = render_queue_template(
            &stack_name,
            plan.is_fifo(),
            &self.tags(&request.instance_id, &request.service_id),
            &params,
        );

        let input = CreateStackInput {
            stack_name: stack_name.clone(),
            template_body: template.to_body()?,
            parameters: params.create_parameters(),
            capabilities: vec![CAPABILITY_NAMED_IAM.to_string()],
        };
        match self.client.create_stack(input).await {
            Ok(()) => {}
            Err(StackError::AlreadyExists(_)) => {
                return Err(BrokerError::InstanceAlreadyExists(request.instance_id.clone()))
            }
            Err(e) => return Err(e.into()),
        }

        info!(stack_name = %stack_name, plan = %request.plan, "instance stack create requested");
        Ok(OperationSpec::asynchronous(Operation::Provision))
    }

    /// Start deleting an instance's queue pair. Idempotent.
    pub async fn deprovision(&self, instance_id: &str) -> Result<OperationSpec, BrokerError> {
        let stack_name = self.stack_name(instance_id);
        self.delete_if_present(&stack_name, Operation::Deprovision).await
    }

    /// Change queue settings in place. Omitted settings keep their value.
    ///
    /// The previous template is reused unless a new redrive count is given
    /// and the instance was provisioned with a pinned redrive policy; then
    /// the template is resubmitted with the policy following the parameter.
    pub async fn update(
        &self,
        instance_id: &str,
        parameters: Option<&Value>,
    ) -> Result<OperationSpec, BrokerError> {
        let params = QueueParameters::decode(parameters)?;
        if params.content_based_deduplication.is_some() {
            return Err(BrokerError::BadParameters(
                "content_based_deduplication cannot be changed after provisioning".into(),
            ));
        }

        let stack_name = self.stack_name(instance_id);
        let template_body = match params.redrive_max_receive_count {
            Some(_) => self.redrive_template(&stack_name).await?,
            None => None,
        };
        let input = UpdateStackInput {
            stack_name: stack_name.clone(),
            parameters: params.update_parameters(),
            use_previous_template: template_body.is_none(),
            template_body,
            capabilities: vec![CAPABILITY_NAMED_IAM.to_string()],
        };
        self.client.update_stack(input).await?;

        info!(stack_name = %stack_name, "instance stack update requested");
        Ok(OperationSpec::asynchronous(Operation::Update))
    }

    pub async fn last_operation(
        &self,
        instance_id: &str,
        operation: Operation,
    ) -> Result<LastOperation, BrokerError> {
        let stack_name = self.stack_name(instance_id);
        let state =
            last_operation(self.client.as_ref(), &stack_name, operation, DESCRIPTION_DONE).await?;
        debug!(stack_name = %stack_name, operation = %operation, state = %state.state, "last operation");
        Ok(state)
    }

    // ── Bindings ───────────────────────────────────────────────────

    /// Create the binding principal for an instance.
    ///
    /// With `async_allowed` this returns as soon as the engine accepted the
    /// stack. Otherwise it waits for the stack to settle (bounded by the
    /// configured bind timeout and by `cancel`) and returns the credentials.
    /// A synchronous bind that does not succeed leaves nothing behind: the
    /// binding stack is deleted in the background.
    pub async fn bind(
        &self,
        request: &BindRequest,
        cancel: &CancellationToken,
    ) -> Result<BindingSpec, BrokerError> {
        let bind_params = BindParameters::decode(request.parameters.as_ref())?;
        let access_policy: AccessPolicy =
            bind_params.access_policy.as_deref().unwrap_or("").parse()?;

        let instance_stack_name = self.stack_name(&request.instance_id);
        let Some(instance_stack) = describe_stack(self.client.as_ref(), &instance_stack_name).await?
        else {
            return Err(BrokerError::InstanceDoesNotExist(request.instance_id.clone()));
        };

        let template = render_user_template(&UserTemplateParams {
            binding_id: request.binding_id.clone(),
            resource_prefix: self.settings.resource_prefix.clone(),
            permissions_boundary: self.settings.permissions_boundary.clone(),
            additional_user_policy: self.settings.additional_user_policy.clone(),
            tags: self.tags(&request.binding_id, &request.service_id),
            primary_queue_arn: required_output(&instance_stack, OUTPUT_PRIMARY_QUEUE_ARN)?,
            primary_queue_url: required_output(&instance_stack, OUTPUT_PRIMARY_QUEUE_URL)?,
            secondary_queue_arn: required_output(&instance_stack, OUTPUT_SECONDARY_QUEUE_ARN)?,
            secondary_queue_url: required_output(&instance_stack, OUTPUT_SECONDARY_QUEUE_URL)?,
            access_policy: Some(access_policy.as_str().to_string()),
        })?;

        let binding_stack_name = self.stack_name(&request.binding_id);
        let input = CreateStackInput {
            stack_name: binding_stack_name.clone(),
            template_body: template.to_body()?,
            parameters: Vec::new(),
            capabilities: vec![CAPABILITY_NAMED_IAM.to_string()],
        };
        match self.client.create_stack(input).await {
            Ok(()) => {}
            Err(StackError::AlreadyExists(_)) => {
                return Err(BrokerError::BindingAlreadyExists(request.binding_id.clone()))
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            stack_name = %binding_stack_name,
            instance_stack = %instance_stack_name,
            is_async = request.async_allowed,
            "binding stack create requested"
        );

        if request.async_allowed {
            return Ok(BindingSpec {
                operation: Operation::Bind,
                is_async: true,
                credentials: None,
            });
        }

        let guard = CleanupGuard::new(
            Arc::clone(&self.client),
            binding_stack_name.clone(),
            self.cleanup_tasks.clone(),
        );
        let poller = self.poller();
        poller.wait(&binding_stack_name, cancel).await?;
        let credentials = poller
            .within(&binding_stack_name, cancel, self.read_credentials(&binding_stack_name))
            .await?;
        guard.disarm();

        info!(stack_name = %binding_stack_name, "synchronous bind completed");
        Ok(BindingSpec {
            operation: Operation::Bind,
            is_async: false,
            credentials: Some(credentials),
        })
    }

    // Binding stacks are named after the binding id alone; the instance id
    // below is only recorded in logs.

    /// Start deleting a binding principal. Idempotent.
    pub async fn unbind(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<OperationSpec, BrokerError> {
        let stack_name = self.stack_name(binding_id);
        debug!(stack_name = %stack_name, instance_id = %instance_id, "unbind");
        self.delete_if_present(&stack_name, Operation::Unbind).await
    }

    pub async fn last_binding_operation(
        &self,
        instance_id: &str,
        binding_id: &str,
        operation: Operation,
    ) -> Result<LastOperation, BrokerError> {
        let stack_name = self.stack_name(binding_id);
        let state =
            last_operation(self.client.as_ref(), &stack_name, operation, DESCRIPTION_READY).await?;
        debug!(
            stack_name = %stack_name,
            instance_id = %instance_id,
            operation = %operation,
            state = %state.state,
            "last binding operation"
        );
        Ok(state)
    }

    /// Credentials of an existing binding, as stored in its secret.
    pub async fn get_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<Value, BrokerError> {
        let stack_name = self.stack_name(binding_id);
        debug!(stack_name = %stack_name, instance_id = %instance_id, "get binding");
        self.read_credentials(&stack_name).await
    }

    // ── Internals ──────────────────────────────────────────────────

    fn poller(&self) -> OperationPoller {
        OperationPoller::new(Arc::clone(&self.client), self.poll_interval, self.bind_timeout)
    }

    /// Replacement template for an update that changes the redrive count,
    /// or `None` when the running template already follows the parameter.
    async fn redrive_template(&self, stack_name: &str) -> Result<Option<String>, BrokerError> {
        let body = self.client.get_template(stack_name).await?.ok_or_else(|| {
            BrokerError::UnexpectedResponse(format!("stack {stack_name} returned no template body"))
        })?;
        let unexpected =
            || BrokerError::UnexpectedResponse(format!("stack {stack_name} is not a queue stack"));
        let mut template = Template::from_body(&body).map_err(|_| unexpected())?;

        match track_redrive_parameter(&mut template) {
            None => Err(unexpected()),
            Some(false) => Ok(None),
            Some(true) => {
                info!(stack_name = %stack_name, "redrive policy switched to follow parameter");
                Ok(Some(template.to_body()?))
            }
        }
    }

    /// Shared by Deprovision and Unbind.
    async fn delete_if_present(
        &self,
        stack_name: &str,
        operation: Operation,
    ) -> Result<OperationSpec, BrokerError> {
        let Some(stack) = describe_stack(self.client.as_ref(), stack_name).await? else {
            info!(stack_name = %stack_name, operation = %operation, "stack already gone");
            return Ok(OperationSpec::completed(operation));
        };

        match stack.status.as_deref() {
            Some(STATUS_DELETE_COMPLETE) => {
                info!(stack_name = %stack_name, operation = %operation, "stack already deleted");
                Ok(OperationSpec::completed(operation))
            }
            Some(STATUS_DELETE_IN_PROGRESS) => {
                debug!(stack_name = %stack_name, operation = %operation, "delete already in progress");
                Ok(OperationSpec::asynchronous(operation))
            }
            _ => {
                self.client.delete_stack(stack_name).await?;
                info!(stack_name = %stack_name, operation = %operation, "stack delete requested");
                Ok(OperationSpec::asynchronous(operation))
            }
        }
    }

    async fn read_credentials(&self, binding_stack_name: &str) -> Result<Value, BrokerError> {
        let Some(stack) = describe_stack(self.client.as_ref(), binding_stack_name).await? else {
            return Err(BrokerError::StackNotFound(binding_stack_name.to_string()));
        };
        let secret_arn = required_output(&stack, OUTPUT_CREDENTIALS_ARN)?;

        let secret = self
            .client
            .get_secret_value(&secret_arn)
            .await?
            .ok_or_else(|| {
                BrokerError::UnexpectedResponse(format!(
                    "secret for {binding_stack_name} has no string value"
                ))
            })?;

        // The parse error would echo the secret, so it is not passed on.
        match serde_json::from_str::<Value>(&secret) {
            Ok(credentials @ Value::Object(_)) => Ok(credentials),
            Ok(_) | Err(_) => {
                warn!(stack_name = %binding_stack_name, "binding secret is not a JSON object");
                Err(BrokerError::UnexpectedResponse(format!(
                    "secret for {binding_stack_name} is not a JSON object"
                )))
            }
        }
    }
}

fn required_output(stack: &StackDescription, key: &str) -> Result<String, BrokerError> {
    stack
        .output(key)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            BrokerError::UnexpectedResponse(format!("stack {} has no {key} output", stack.name))
        })
}
