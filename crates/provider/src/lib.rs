//! Provisioning backend for the SQS service broker.
//!
//! Renders CloudFormation templates for a queue pair and for a binding
//! principal, drives them through a [`StackClient`] and reports their
//! progress in broker lifecycle terms.

pub mod aws;
pub mod error;
pub mod naming;
pub mod params;
pub mod poller;
pub mod provider;
pub mod stack;
pub mod status;
pub mod template;

pub use aws::AwsStackClient;
pub use error::BrokerError;
pub use params::{BindParameters, QueueParameters, QueuePlan};
pub use provider::{BindRequest, ProvisionRequest, Provider};
pub use stack::{is_not_found, StackClient, StackError};
pub use template::{render_queue_template, render_user_template, AccessPolicy, UserTemplateParams};
