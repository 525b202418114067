use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use sqs_broker_core::Operation;

/// Operator tool for the SQS broker provider.
///
/// Each subcommand runs one lifecycle verb against the configured AWS
/// account and prints the result as JSON.
#[derive(Parser, Debug)]
#[command(name = "sqs-broker", version, about = "Drive SQS broker lifecycle verbs against AWS")]
pub struct CliArgs {
    /// Config profile; keys are read as {PROFILE}_{KEY} before {KEY}
    #[arg(long, global = true, env = "SQS_BROKER_PROFILE")]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the queue pair for a new instance
    Provision {
        instance_id: String,

        /// Plan name: standard or fifo
        #[arg(long, default_value = "standard")]
        plan: String,

        /// Service id recorded in the ServiceID tag
        #[arg(long, default_value = "")]
        service_id: String,

        /// Queue parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },

    /// Delete an instance's queue pair
    Deprovision { instance_id: String },

    /// Change queue settings; omitted settings keep their value
    Update {
        instance_id: String,

        /// Queue parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },

    /// Create a binding principal
    Bind {
        instance_id: String,
        binding_id: String,

        #[arg(long, default_value = "")]
        service_id: String,

        /// Bind parameters as a JSON object
        #[arg(long)]
        params: Option<String>,

        /// Return once the stack create is accepted instead of waiting
        #[arg(long = "async")]
        async_allowed: bool,

        /// Override BROKER_BIND_TIMEOUT_SECS for this call
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Delete a binding principal
    Unbind {
        instance_id: String,
        binding_id: String,
    },

    /// Poll the last operation on an instance
    LastOperation {
        instance_id: String,

        #[arg(long, default_value = "provision")]
        operation: Operation,
    },

    /// Poll the last operation on a binding
    LastBindingOperation {
        instance_id: String,
        binding_id: String,

        #[arg(long, default_value = "bind")]
        operation: Operation,
    },

    /// Print the credentials of an existing binding
    GetBinding {
        instance_id: String,
        binding_id: String,
    },

    /// Print the resolved configuration with secrets redacted
    Config,
}

/// Parse a `--params` argument. Absent means no parameters.
pub fn parse_params(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(s).context("--params is not valid JSON"))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provision_defaults_to_standard_plan() {
        let args = CliArgs::try_parse_from(["sqs-broker", "provision", "i1"]).unwrap();
        match args.command {
            Command::Provision {
                instance_id,
                plan,
                service_id,
                params,
            } => {
                assert_eq!(instance_id, "i1");
                assert_eq!(plan, "standard");
                assert_eq!(service_id, "");
                assert!(params.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn bind_flags() {
        let args = CliArgs::try_parse_from([
            "sqs-broker",
            "bind",
            "i1",
            "b1",
            "--async",
            "--timeout-secs",
            "30",
            "--params",
            r#"{"access_policy":"consumer"}"#,
        ])
        .unwrap();
        match args.command {
            Command::Bind {
                binding_id,
                async_allowed,
                timeout_secs,
                params,
                ..
            } => {
                assert_eq!(binding_id, "b1");
                assert!(async_allowed);
                assert_eq!(timeout_secs, Some(30));
                assert_eq!(
                    parse_params(params.as_deref()).unwrap(),
                    Some(json!({"access_policy": "consumer"}))
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn operation_is_parsed() {
        let args = CliArgs::try_parse_from([
            "sqs-broker",
            "last-binding-operation",
            "i1",
            "b1",
            "--operation",
            "unbind",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::LastBindingOperation {
                operation: Operation::Unbind,
                ..
            }
        ));

        let err = CliArgs::try_parse_from([
            "sqs-broker",
            "last-operation",
            "i1",
            "--operation",
            "teleport",
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn profile_is_global() {
        let args =
            CliArgs::try_parse_from(["sqs-broker", "deprovision", "i1", "--profile", "prod"])
                .unwrap();
        assert_eq!(args.profile.as_deref(), Some("prod"));
    }

    #[test]
    fn bad_params_json_is_rejected() {
        assert!(parse_params(Some("{not json")).is_err());
        assert_eq!(parse_params(None).unwrap(), None);
    }
}
