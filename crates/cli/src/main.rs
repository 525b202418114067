mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sqs_broker_core::config::load_dotenv;
use sqs_broker_core::BrokerConfig;
use sqs_broker_provider::{AwsStackClient, BindRequest, Provider, ProvisionRequest};

use crate::cli::{parse_params, CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Before parsing, so .env can supply SQS_BROKER_PROFILE.
    load_dotenv();
    let args = CliArgs::parse();

    let config = match args.profile.as_deref() {
        Some(profile) => BrokerConfig::for_profile(profile),
        None => BrokerConfig::from_env(),
    };

    if let Command::Config = args.command {
        print_json(&config.redacted_summary())?;
        return Ok(());
    }

    config.validate().context("invalid configuration")?;
    config.log_summary();

    let client = Arc::new(AwsStackClient::new(&config.aws).await);
    let mut provider = Provider::new(client, config.provider.clone());
    if let Command::Bind {
        timeout_secs: Some(secs),
        ..
    } = &args.command
    {
        provider = provider.with_bind_timing(config.provider.poll_interval(), Duration::from_secs(*secs));
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            interrupt.cancel();
        }
    });

    let result = run(&provider, args.command, &cancel).await;

    // A failed synchronous bind leaves a delete running in the background.
    provider.wait_for_cleanup().await;

    let output = result?;
    print_json(&output)
}

async fn run(provider: &Provider, command: Command, cancel: &CancellationToken) -> Result<Value> {
    let output = match command {
        Command::Provision {
            instance_id,
            plan,
            service_id,
            params,
        } => {
            let request = ProvisionRequest {
                instance_id,
                service_id,
                plan,
                parameters: parse_params(params.as_deref())?,
            };
            serde_json::to_value(provider.provision(&request).await?)?
        }
        Command::Deprovision { instance_id } => {
            serde_json::to_value(provider.deprovision(&instance_id).await?)?
        }
        Command::Update {
            instance_id,
            params,
        } => {
            let params = parse_params(params.as_deref())?;
            serde_json::to_value(provider.update(&instance_id, params.as_ref()).await?)?
        }
        Command::Bind {
            instance_id,
            binding_id,
            service_id,
            params,
            async_allowed,
            timeout_secs: _,
        } => {
            let request = BindRequest {
                instance_id,
                binding_id,
                service_id,
                parameters: parse_params(params.as_deref())?,
                async_allowed,
            };
            let spec = provider.bind(&request, cancel).await?;
            info!(binding_id = %request.binding_id, is_async = spec.is_async, "bind finished");
            serde_json::to_value(spec)?
        }
        Command::Unbind {
            instance_id,
            binding_id,
        } => serde_json::to_value(provider.unbind(&instance_id, &binding_id).await?)?,
        Command::LastOperation {
            instance_id,
            operation,
        } => serde_json::to_value(provider.last_operation(&instance_id, operation).await?)?,
        Command::LastBindingOperation {
            instance_id,
            binding_id,
            operation,
        } => serde_json::to_value(
            provider
                .last_binding_operation(&instance_id, &binding_id, operation)
                .await?,
        )?,
        Command::GetBinding {
            instance_id,
            binding_id,
        } => provider.get_binding(&instance_id, &binding_id).await?,
        Command::Config => anyhow::bail!("config is printed before the provider is built"),
    };
    Ok(output)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
