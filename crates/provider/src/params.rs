//! Caller-supplied parameters.
//!
//! Raw JSON from the broker request is decoded into typed structs with
//! every field optional. Unknown keys are rejected so a typo never turns
//! into a silently ignored setting.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BrokerError;
use crate::stack::StackParameter;

pub const PARAM_DELAY_SECONDS: &str = "DelaySeconds";
pub const PARAM_MAXIMUM_MESSAGE_SIZE: &str = "MaximumMessageSize";
pub const PARAM_MESSAGE_RETENTION_PERIOD: &str = "MessageRetentionPeriod";
pub const PARAM_RECEIVE_MESSAGE_WAIT_TIME_SECONDS: &str = "ReceiveMessageWaitTimeSeconds";
pub const PARAM_REDRIVE_MAX_RECEIVE_COUNT: &str = "RedriveMaxReceiveCount";
pub const PARAM_VISIBILITY_TIMEOUT: &str = "VisibilityTimeout";

/// Queue settings accepted on Provision and Update.
///
/// Ranges follow the SQS limits and are enforced by the template parameter
/// constraints at apply time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueParameters {
    /// FIFO only: treat messages with identical bodies as duplicates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_based_deduplication: Option<bool>,
    /// 0 to 900 seconds. Default 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u32>,
    /// 1024 to 262144 bytes. Default 262144.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_message_size: Option<u32>,
    /// 60 to 1209600 seconds. Default 345600 (4 days).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_retention_period: Option<u32>,
    /// 0 to 20 seconds; 0 means short polling. Default 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_message_wait_time_seconds: Option<u32>,
    /// Deliveries before a message moves to the secondary queue. 0 disables
    /// the dead-letter queue. Default 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redrive_max_receive_count: Option<u32>,
    /// 0 to 43200 seconds. Default 30.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_timeout: Option<u32>,
}

impl QueueParameters {
    /// Decode from the raw request parameters. `None` and JSON `null`
    /// both mean "nothing supplied".
    pub fn decode(raw: Option<&Value>) -> Result<Self, BrokerError> {
        decode_raw(raw)
    }

    fn numeric(&self) -> [(&'static str, Option<u32>); 6] {
        [
            (PARAM_DELAY_SECONDS, self.delay_seconds),
            (PARAM_MAXIMUM_MESSAGE_SIZE, self.maximum_message_size),
            (PARAM_MESSAGE_RETENTION_PERIOD, self.message_retention_period),
            (
                PARAM_RECEIVE_MESSAGE_WAIT_TIME_SECONDS,
                self.receive_message_wait_time_seconds,
            ),
            (PARAM_REDRIVE_MAX_RECEIVE_COUNT, self.redrive_max_receive_count),
            (PARAM_VISIBILITY_TIMEOUT, self.visibility_timeout),
        ]
    }

    /// Stack parameters for CreateStack: only the supplied values, so the
    /// template defaults apply to everything else.
    pub fn create_parameters(&self) -> Vec<StackParameter> {
        self.numeric()
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| StackParameter::value(key, v)))
            .collect()
    }

    /// Stack parameters for UpdateStack: every parameter is sent, omitted
    /// ones as "use previous value" so they keep their current setting.
    pub fn update_parameters(&self) -> Vec<StackParameter> {
        self.numeric()
            .into_iter()
            .map(|(key, value)| match value {
                Some(v) => StackParameter::value(key, v),
                None => StackParameter::use_previous(key),
            })
            .collect()
    }
}

/// Parameters accepted on Bind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindParameters {
    /// One of `full`, `producer`, `consumer`. Omitted means `full`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_policy: Option<String>,
}

impl BindParameters {
    pub fn decode(raw: Option<&Value>) -> Result<Self, BrokerError> {
        decode_raw(raw)
    }
}

fn decode_raw<T: DeserializeOwned + Default>(raw: Option<&Value>) -> Result<T, BrokerError> {
    match raw {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| BrokerError::BadParameters(e.to_string())),
    }
}

/// Service plan. Fixed for the life of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePlan {
    Standard,
    Fifo,
}

impl QueuePlan {
    pub fn is_fifo(&self) -> bool {
        matches!(self, Self::Fifo)
    }
}

impl FromStr for QueuePlan {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "fifo" => Ok(Self::Fifo),
            other => Err(BrokerError::UnknownPlan(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::ParameterValue;
    use serde_json::json;

    #[test]
    fn decode_missing_and_null_as_empty() {
        assert_eq!(QueueParameters::decode(None).unwrap(), QueueParameters::default());
        assert_eq!(
            QueueParameters::decode(Some(&Value::Null)).unwrap(),
            QueueParameters::default()
        );
    }

    #[test]
    fn decode_snake_case_keys() {
        let raw = json!({
            "content_based_deduplication": true,
            "delay_seconds": 5,
            "maximum_message_size": 2048,
            "message_retention_period": 3600,
            "receive_message_wait_time_seconds": 20,
            "redrive_max_receive_count": 3,
            "visibility_timeout": 11
        });
        let params = QueueParameters::decode(Some(&raw)).unwrap();
        assert_eq!(params.content_based_deduplication, Some(true));
        assert_eq!(params.delay_seconds, Some(5));
        assert_eq!(params.maximum_message_size, Some(2048));
        assert_eq!(params.message_retention_period, Some(3600));
        assert_eq!(params.receive_message_wait_time_seconds, Some(20));
        assert_eq!(params.redrive_max_receive_count, Some(3));
        assert_eq!(params.visibility_timeout, Some(11));
    }

    #[test]
    fn decode_rejects_unknown_keys() {
        let raw = json!({ "delay_seconds": 5, "queue_name": "sneaky" });
        let err = QueueParameters::decode(Some(&raw)).unwrap_err();
        assert!(matches!(err, BrokerError::BadParameters(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn decode_rejects_wrong_types() {
        let raw = json!({ "delay_seconds": "five" });
        assert!(matches!(
            QueueParameters::decode(Some(&raw)),
            Err(BrokerError::BadParameters(_))
        ));
        let raw = json!({ "delay_seconds": -1 });
        assert!(QueueParameters::decode(Some(&raw)).is_err());
    }

    #[test]
    fn create_parameters_only_include_supplied_values() {
        let params = QueueParameters {
            delay_seconds: Some(5),
            visibility_timeout: Some(60),
            ..Default::default()
        };
        assert_eq!(
            params.create_parameters(),
            vec![
                StackParameter::value(PARAM_DELAY_SECONDS, 5),
                StackParameter::value(PARAM_VISIBILITY_TIMEOUT, 60),
            ]
        );
    }

    #[test]
    fn empty_update_uses_previous_for_all_six() {
        let params = QueueParameters::default().update_parameters();
        assert_eq!(params.len(), 6);
        assert!(params
            .iter()
            .all(|p| p.value == ParameterValue::UsePrevious));
    }

    #[test]
    fn partial_update_only_overrides_supplied() {
        let params = QueueParameters {
            redrive_max_receive_count: Some(0),
            ..Default::default()
        }
        .update_parameters();
        for p in &params {
            if p.key == PARAM_REDRIVE_MAX_RECEIVE_COUNT {
                assert_eq!(p.value, ParameterValue::Value("0".into()));
            } else {
                assert_eq!(p.value, ParameterValue::UsePrevious, "{}", p.key);
            }
        }
    }

    #[test]
    fn bind_parameters() {
        assert_eq!(BindParameters::decode(None).unwrap().access_policy, None);
        let raw = json!({ "access_policy": "consumer" });
        assert_eq!(
            BindParameters::decode(Some(&raw)).unwrap().access_policy.as_deref(),
            Some("consumer")
        );
        let raw = json!({ "permissions": "read-only" });
        assert!(BindParameters::decode(Some(&raw)).is_err());
    }

    #[test]
    fn plan_names() {
        assert_eq!("standard".parse::<QueuePlan>().unwrap(), QueuePlan::Standard);
        assert!("fifo".parse::<QueuePlan>().unwrap().is_fifo());
        assert!(matches!(
            "premium".parse::<QueuePlan>(),
            Err(BrokerError::UnknownPlan(_))
        ));
    }
}
