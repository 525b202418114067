//! Binding principal: IAM user, access key, scoped policy and a secret
//! holding the rendered credentials.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::{
    reference, sub, tag_list, AccessKeyProperties, Output, PolicyDocument, PolicyProperties,
    PolicyStatement, Resource, SecretProperties, Template, UserProperties,
};
use crate::error::BrokerError;

pub const RESOURCE_USER: &str = "IAMUser";
pub const RESOURCE_ACCESS_KEY: &str = "IAMAccessKey";
pub const RESOURCE_POLICY: &str = "IAMPolicy";
pub const RESOURCE_CREDENTIALS: &str = "BindingCredentials";

pub const OUTPUT_CREDENTIALS_ARN: &str = "CredentialsARN";

const POLICY_VERSION: &str = "2012-10-17";

/// Canned action set granted to a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    #[default]
    Full,
    Producer,
    Consumer,
}

impl AccessPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }

    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            Self::Full => &[
                "sqs:ChangeMessageVisibility",
                "sqs:DeleteMessage",
                "sqs:GetQueueAttributes",
                "sqs:GetQueueUrl",
                "sqs:ListDeadLetterSourceQueues",
                "sqs:ListQueueTags",
                "sqs:PurgeQueue",
                "sqs:ReceiveMessage",
                "sqs:SendMessage",
            ],
            Self::Producer => &[
                "sqs:GetQueueAttributes",
                "sqs:GetQueueUrl",
                "sqs:ListDeadLetterSourceQueues",
                "sqs:ListQueueTags",
                "sqs:SendMessage",
            ],
            Self::Consumer => &[
                "sqs:DeleteMessage",
                "sqs:GetQueueAttributes",
                "sqs:GetQueueUrl",
                "sqs:ListDeadLetterSourceQueues",
                "sqs:ListQueueTags",
                "sqs:PurgeQueue",
                "sqs:ReceiveMessage",
            ],
        }
    }
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessPolicy {
    type Err = BrokerError;

    /// An empty string selects [`AccessPolicy::Full`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "full" => Ok(Self::Full),
            "producer" => Ok(Self::Producer),
            "consumer" => Ok(Self::Consumer),
            other => Err(BrokerError::UnknownAccessPolicy(other.to_string())),
        }
    }
}

/// Inputs for [`render_user_template`].
#[derive(Debug, Clone, Default)]
pub struct UserTemplateParams {
    pub binding_id: String,
    pub resource_prefix: String,
    pub permissions_boundary: Option<String>,
    pub additional_user_policy: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub primary_queue_arn: String,
    pub primary_queue_url: String,
    pub secondary_queue_arn: String,
    pub secondary_queue_url: String,
    /// Raw access policy name; `None` means full access.
    pub access_policy: Option<String>,
}

/// Placeholder document interpolated by the engine into the secret.
#[derive(Serialize)]
struct CredentialsPlaceholders<'a> {
    aws_access_key_id: String,
    aws_secret_access_key: String,
    aws_region: &'a str,
    primary_queue_url: &'a str,
    secondary_queue_url: &'a str,
}

/// Render the stack template for one binding.
///
/// Fails with [`BrokerError::UnknownAccessPolicy`] before building anything
/// when the access policy name is not recognised.
pub fn render_user_template(params: &UserTemplateParams) -> Result<Template, BrokerError> {
    let access_policy: AccessPolicy = params.access_policy.as_deref().unwrap_or("").parse()?;

    let mut template = Template::new();

    let user = UserProperties {
        user_name: format!("binding-{}", params.binding_id),
        path: format!("/{}/", params.resource_prefix),
        permissions_boundary: non_empty(params.permissions_boundary.as_deref()),
        managed_policy_arns: non_empty(params.additional_user_policy.as_deref())
            .into_iter()
            .collect(),
        tags: tag_list(None, &params.tags),
    };

    let access_key = AccessKeyProperties {
        status: "Active".to_string(),
        user_name: reference(RESOURCE_USER),
    };

    let policy = PolicyProperties {
        policy_name: format!("{}-binding-{}", params.resource_prefix, params.binding_id),
        policy_document: PolicyDocument {
            version: POLICY_VERSION.to_string(),
            statement: vec![PolicyStatement {
                effect: "Allow".to_string(),
                action: access_policy
                    .actions()
                    .iter()
                    .map(|a| a.to_string())
                    .collect(),
                resource: vec![
                    params.primary_queue_arn.clone(),
                    params.secondary_queue_arn.clone(),
                ],
            }],
        },
        users: vec![reference(RESOURCE_USER)],
    };

    let placeholders = CredentialsPlaceholders {
        aws_access_key_id: format!("${{{RESOURCE_ACCESS_KEY}}}"),
        aws_secret_access_key: format!("${{{RESOURCE_ACCESS_KEY}.SecretAccessKey}}"),
        aws_region: "${AWS::Region}",
        primary_queue_url: &params.primary_queue_url,
        secondary_queue_url: &params.secondary_queue_url,
    };
    let secret_template = serde_json::to_string(&placeholders)
        .map_err(|e| BrokerError::Serialize(e.to_string()))?;

    let secret = SecretProperties {
        description: format!("Credentials for binding {}", params.binding_id),
        secret_string: sub(&secret_template),
        tags: tag_list(None, &params.tags),
    };

    template
        .resources
        .insert(RESOURCE_USER.to_string(), Resource::User(user));
    template
        .resources
        .insert(RESOURCE_ACCESS_KEY.to_string(), Resource::AccessKey(access_key));
    template
        .resources
        .insert(RESOURCE_POLICY.to_string(), Resource::Policy(policy));
    template
        .resources
        .insert(RESOURCE_CREDENTIALS.to_string(), Resource::Secret(secret));

    template.outputs.insert(
        OUTPUT_CREDENTIALS_ARN.to_string(),
        Output {
            description: "Binding credentials secret ARN".to_string(),
            value: reference(RESOURCE_CREDENTIALS),
            export: None,
        },
    );

    Ok(template)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn params(access_policy: Option<&str>) -> UserTemplateParams {
        let mut tags = BTreeMap::new();
        tags.insert("Service".to_string(), "sqs".to_string());
        UserTemplateParams {
            binding_id: "b1".into(),
            resource_prefix: "testprefix".into(),
            tags,
            primary_queue_arn: "a1".into(),
            primary_queue_url: "https://sqs/pri".into(),
            secondary_queue_arn: "a2".into(),
            secondary_queue_url: "https://sqs/sec".into(),
            access_policy: access_policy.map(str::to_string),
            ..Default::default()
        }
    }

    fn policy(template: &Template) -> &PolicyProperties {
        match template.resources.get(RESOURCE_POLICY) {
            Some(Resource::Policy(p)) => p,
            other => panic!("expected policy, got {other:?}"),
        }
    }

    fn user(template: &Template) -> &UserProperties {
        match template.resources.get(RESOURCE_USER) {
            Some(Resource::User(u)) => u,
            other => panic!("expected user, got {other:?}"),
        }
    }

    #[test]
    fn unknown_access_policy_is_rejected() {
        let err = render_user_template(&params(Some("bananas"))).unwrap_err();
        assert!(matches!(err, BrokerError::UnknownAccessPolicy(ref p) if p == "bananas"));
        assert_eq!(err.to_string(), "unknown access policy \"bananas\"");
        assert!(err.is_client_error());
    }

    #[test]
    fn producer_policy_is_scoped_to_both_queues() {
        let template = render_user_template(&params(Some("producer"))).unwrap();
        let doc = &policy(&template).policy_document;
        assert_eq!(doc.statement.len(), 1);

        let statement = &doc.statement[0];
        assert_eq!(statement.effect, "Allow");
        assert_eq!(statement.resource, vec!["a1".to_string(), "a2".to_string()]);
        assert_eq!(statement.action, AccessPolicy::Producer.actions());
        assert!(!statement.action.iter().any(|a| a == "sqs:DeleteMessage"));
        assert!(!statement.action.iter().any(|a| a == "sqs:ReceiveMessage"));
    }

    #[test]
    fn missing_or_empty_policy_means_full() {
        for name in [None, Some("")] {
            let template = render_user_template(&params(name)).unwrap();
            assert_eq!(
                policy(&template).policy_document.statement[0].action,
                AccessPolicy::Full.actions()
            );
        }
    }

    #[test]
    fn consumer_cannot_send() {
        let actions = AccessPolicy::Consumer.actions();
        assert!(!actions.contains(&"sqs:SendMessage"));
        assert!(actions.contains(&"sqs:ReceiveMessage"));
        assert!(actions.iter().all(|a| a.starts_with("sqs:")));
    }

    #[test]
    fn user_naming_and_optional_attachments() {
        let template = render_user_template(&params(None)).unwrap();
        let u = user(&template);
        assert_eq!(u.user_name, "binding-b1");
        assert_eq!(u.path, "/testprefix/");
        assert_eq!(u.permissions_boundary, None);
        assert!(u.managed_policy_arns.is_empty());

        let mut p = params(None);
        p.permissions_boundary = Some("arn:aws:iam::123:policy/boundary".into());
        p.additional_user_policy = Some("arn:aws:iam::123:policy/extra".into());
        let template = render_user_template(&p).unwrap();
        let u = user(&template);
        assert_eq!(
            u.permissions_boundary.as_deref(),
            Some("arn:aws:iam::123:policy/boundary")
        );
        assert_eq!(u.managed_policy_arns, vec!["arn:aws:iam::123:policy/extra"]);

        let mut p = params(None);
        p.permissions_boundary = Some(String::new());
        let template = render_user_template(&p).unwrap();
        assert_eq!(user(&template).permissions_boundary, None);
    }

    #[test]
    fn access_key_and_credentials_secret() {
        let template = render_user_template(&params(None)).unwrap();
        let v: Value = serde_json::from_str(&template.to_body().unwrap()).unwrap();

        let key = &v["Resources"][RESOURCE_ACCESS_KEY];
        assert_eq!(key["Type"], "AWS::IAM::AccessKey");
        assert_eq!(key["Properties"]["Status"], "Active");
        assert_eq!(key["Properties"]["UserName"], json!({ "Ref": "IAMUser" }));

        let secret = &v["Resources"][RESOURCE_CREDENTIALS];
        assert_eq!(secret["Type"], "AWS::SecretsManager::Secret");
        let sub_body = secret["Properties"]["SecretString"]["Fn::Sub"].as_str().unwrap();
        let creds: Value = serde_json::from_str(sub_body).unwrap();
        assert_eq!(creds["aws_access_key_id"], "${IAMAccessKey}");
        assert_eq!(creds["aws_secret_access_key"], "${IAMAccessKey.SecretAccessKey}");
        assert_eq!(creds["aws_region"], "${AWS::Region}");
        assert_eq!(creds["primary_queue_url"], "https://sqs/pri");
        assert_eq!(creds["secondary_queue_url"], "https://sqs/sec");

        assert_eq!(
            v["Outputs"][OUTPUT_CREDENTIALS_ARN]["Value"],
            json!({ "Ref": "BindingCredentials" })
        );
        assert!(v.get("Parameters").is_none());
    }
}
