//! [`StackClient`] over CloudFormation and Secrets Manager.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::operation::create_stack::CreateStackError;
use aws_sdk_cloudformation::types::{Capability, Parameter};
use aws_sdk_secretsmanager::operation::get_secret_value::GetSecretValueError;
use aws_types::region::Region;
use tracing::{debug, info};

use sqs_broker_core::AwsConfig;

use crate::stack::{
    CreateStackInput, ParameterValue, StackClient, StackDescription, StackError, StackOutput,
    StackParameter, UpdateStackInput,
};

pub struct AwsStackClient {
    cloudformation: aws_sdk_cloudformation::Client,
    secrets: aws_sdk_secretsmanager::Client,
}

impl AwsStackClient {
    /// Build both SDK clients from broker config.
    ///
    /// Static credentials are used when configured; otherwise the default
    /// provider chain applies (env, profile, instance role).
    pub async fn new(aws: &AwsConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(aws.region.clone()));

        if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
            let creds = Credentials::new(
                key_id,
                secret,
                aws.session_token.clone(),
                None,
                "sqs-broker-static",
            );
            loader = loader.credentials_provider(creds);
        }

        if let Some(endpoint) = aws.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.to_string()
            } else {
                format!("https://{endpoint}")
            };
            loader = loader.endpoint_url(url);
        }

        let sdk_config = loader.load().await;

        info!(
            region = %aws.region,
            static_credentials = aws.has_static_credentials(),
            "AWS stack client initialized"
        );

        Self {
            cloudformation: aws_sdk_cloudformation::Client::new(&sdk_config),
            secrets: aws_sdk_secretsmanager::Client::new(&sdk_config),
        }
    }
}

fn to_sdk_parameters(parameters: &[StackParameter]) -> Vec<Parameter> {
    parameters
        .iter()
        .map(|p| match &p.value {
            ParameterValue::Value(v) => Parameter::builder()
                .parameter_key(&p.key)
                .parameter_value(v)
                .build(),
            ParameterValue::UsePrevious => Parameter::builder()
                .parameter_key(&p.key)
                .use_previous_value(true)
                .build(),
        })
        .collect()
}

fn to_sdk_capabilities(capabilities: &[String]) -> Vec<Capability> {
    capabilities
        .iter()
        .map(|c| Capability::from(c.as_str()))
        .collect()
}

/// Untyped service error: keep code and message for the caller.
fn service_error<E: ProvideErrorMetadata + std::fmt::Display>(err: &E) -> StackError {
    StackError::Service {
        code: err.code().map(str::to_string),
        message: err
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
    }
}

fn transport_error<E, R>(err: &SdkError<E, R>) -> StackError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    StackError::Transport(DisplayErrorContext(err).to_string())
}

/// Map any SDK error whose service errors carry no variant the broker
/// cares about.
fn map_sdk_error<E, R>(err: SdkError<E, R>) -> StackError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::ServiceError(ctx) => service_error(ctx.err()),
        other => transport_error(&other),
    }
}

#[async_trait]
impl StackClient for AwsStackClient {
    async fn create_stack(&self, input: CreateStackInput) -> Result<(), StackError> {
        debug!(stack_name = %input.stack_name, "CreateStack");
        let result = self
            .cloudformation
            .create_stack()
            .stack_name(&input.stack_name)
            .template_body(input.template_body)
            .set_parameters(Some(to_sdk_parameters(&input.parameters)))
            .set_capabilities(Some(to_sdk_capabilities(&input.capabilities)))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(ctx)) => match ctx.err() {
                CreateStackError::AlreadyExistsException(_) => {
                    Err(StackError::AlreadyExists(input.stack_name))
                }
                other => Err(service_error(other)),
            },
            Err(other) => Err(transport_error(&other)),
        }
    }

    async fn update_stack(&self, input: UpdateStackInput) -> Result<(), StackError> {
        debug!(stack_name = %input.stack_name, "UpdateStack");
        self.cloudformation
            .update_stack()
            .stack_name(&input.stack_name)
            .use_previous_template(input.use_previous_template)
            .set_template_body(input.template_body)
            .set_parameters(Some(to_sdk_parameters(&input.parameters)))
            .set_capabilities(Some(to_sdk_capabilities(&input.capabilities)))
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), StackError> {
        debug!(stack_name = %stack_name, "DeleteStack");
        self.cloudformation
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn get_template(&self, stack_name: &str) -> Result<Option<String>, StackError> {
        debug!(stack_name = %stack_name, "GetTemplate");
        let output = self
            .cloudformation
            .get_template()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(output.template_body().map(str::to_string))
    }

    async fn describe_stacks(&self, stack_name: &str) -> Result<Vec<StackDescription>, StackError> {
        let output = self
            .cloudformation
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let stacks = output
            .stacks()
            .iter()
            .map(|stack| StackDescription {
                name: stack.stack_name().unwrap_or_default().to_string(),
                status: stack.stack_status().map(|s| s.as_str().to_string()),
                outputs: stack
                    .outputs()
                    .iter()
                    .filter_map(|o| {
                        Some(StackOutput {
                            key: o.output_key()?.to_string(),
                            value: o.output_value()?.to_string(),
                        })
                    })
                    .collect(),
            })
            .collect();
        Ok(stacks)
    }

    async fn get_secret_value(&self, secret_id: &str) -> Result<Option<String>, StackError> {
        debug!(secret_id = %secret_id, "GetSecretValue");
        let result = self.secrets.get_secret_value().secret_id(secret_id).send().await;

        match result {
            Ok(output) => Ok(output.secret_string().map(str::to_string)),
            Err(SdkError::ServiceError(ctx)) => match ctx.err() {
                GetSecretValueError::ResourceNotFoundException(_) => {
                    Err(StackError::NotFound(secret_id.to_string()))
                }
                other => Err(service_error(other)),
            },
            Err(other) => Err(transport_error(&other)),
        }
    }
}
