//! Typed CloudFormation documents.
//!
//! Only the resource types the broker provisions are modelled. Intrinsic
//! functions (`Ref`, `Fn::GetAtt`, ...) are plain JSON values built by the
//! helpers at the bottom of this module.

pub mod queue;
pub mod user;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use queue::render_queue_template;
pub use user::{render_user_template, AccessPolicy, UserTemplateParams};

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, Value>,
    pub resources: BTreeMap<String, Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new() -> Self {
        Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            parameters: BTreeMap::new(),
            conditions: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Render the template body submitted to CloudFormation.
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a rendered template body back into a document.
    pub fn from_body(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

impl Default for Template {
    fn default() -> Self {
        Self::new()
    }
}

/// A numeric template parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub kind: String,
    pub description: String,
    pub default: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<u32>,
}

impl Parameter {
    pub fn number(description: &str, default: u32, min: Option<u32>, max: Option<u32>) -> Self {
        Self {
            kind: "Number".to_string(),
            description: description.to_string(),
            default,
            min_value: min,
            max_value: max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub description: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Export {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Build a tag list: the fixed leading tag (if any) followed by the caller's
/// tags in key order.
pub(crate) fn tag_list(leading: Option<Tag>, tags: &BTreeMap<String, String>) -> Vec<Tag> {
    leading
        .into_iter()
        .chain(tags.iter().map(|(k, v)| Tag::new(k.as_str(), v.as_str())))
        .collect()
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type", content = "Properties")]
pub enum Resource {
    #[serde(rename = "AWS::SQS::Queue")]
    Queue(QueueProperties),
    #[serde(rename = "AWS::IAM::User")]
    User(UserProperties),
    #[serde(rename = "AWS::IAM::AccessKey")]
    AccessKey(AccessKeyProperties),
    #[serde(rename = "AWS::IAM::Policy")]
    Policy(PolicyProperties),
    #[serde(rename = "AWS::SecretsManager::Secret")]
    Secret(SecretProperties),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueueProperties {
    pub queue_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fifo_queue: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_based_deduplication: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_message_size: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_retention_period: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_message_wait_time_seconds: Option<Value>,
    /// Absent means the queue has no dead-letter wiring at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redrive_policy: Option<Redrive>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_timeout: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

/// Dead-letter wiring on the primary queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Redrive {
    /// Fixed at render time.
    Policy(RedrivePolicy),
    /// Decided by the engine from a template condition at apply time.
    Conditional(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedrivePolicy {
    pub dead_letter_target_arn: Value,
    pub max_receive_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserProperties {
    pub user_name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions_boundary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_policy_arns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccessKeyProperties {
    pub status: String,
    pub user_name: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyProperties {
    pub policy_name: String,
    pub policy_document: PolicyDocument,
    pub users: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: String,
    pub action: Vec<String>,
    pub resource: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecretProperties {
    pub description: String,
    pub secret_string: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

// ---------------------------------------------------------------------------
// Intrinsic functions
// ---------------------------------------------------------------------------

pub fn reference(name: &str) -> Value {
    json!({ "Ref": name })
}

pub fn get_att(resource: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [resource, attribute] })
}

pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

pub fn fn_if(condition: &str, when_true: Value, when_false: Value) -> Value {
    json!({ "Fn::If": [condition, when_true, when_false] })
}

pub fn equals(left: Value, right: Value) -> Value {
    json!({ "Fn::Equals": [left, right] })
}

/// `Ref AWS::NoValue`: removes the enclosing property when selected.
pub fn no_value() -> Value {
    reference("AWS::NoValue")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_tagging() {
        let res = Resource::AccessKey(AccessKeyProperties {
            status: "Active".into(),
            user_name: reference("IAMUser"),
        });
        let v = serde_json::to_value(&res).unwrap();
        assert_eq!(v["Type"], "AWS::IAM::AccessKey");
        assert_eq!(v["Properties"]["UserName"]["Ref"], "IAMUser");
    }

    #[test]
    fn empty_sections_are_omitted() {
        let body = Template::new().to_body().unwrap();
        let v: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["AWSTemplateFormatVersion"], TEMPLATE_FORMAT_VERSION);
        assert!(v.get("Parameters").is_none());
        assert!(v.get("Conditions").is_none());
        assert!(v.get("Outputs").is_none());
    }

    #[test]
    fn redrive_variants_parse_back() {
        let fixed = Redrive::Policy(RedrivePolicy {
            dead_letter_target_arn: get_att("SecondaryQueue", "Arn"),
            max_receive_count: 4,
        });
        let conditional = Redrive::Conditional(fn_if("C", no_value(), json!({})));

        for redrive in [fixed, conditional] {
            let text = serde_json::to_string(&redrive).unwrap();
            let parsed: Redrive = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed, redrive);
        }
    }

    #[test]
    fn tag_list_puts_leading_tag_first() {
        let mut tags = BTreeMap::new();
        tags.insert("Service".to_string(), "sqs".to_string());
        tags.insert("Environment".to_string(), "test".to_string());

        let list = tag_list(Some(Tag::new("QueueType", "Primary")), &tags);
        assert_eq!(
            list,
            vec![
                Tag::new("QueueType", "Primary"),
                Tag::new("Environment", "test"),
                Tag::new("Service", "sqs"),
            ]
        );
    }
}
