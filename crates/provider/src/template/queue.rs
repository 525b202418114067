//! Primary/secondary queue pair.

use std::collections::BTreeMap;

use serde_json::json;

use super::{
    equals, fn_if, get_att, no_value, reference, tag_list, Export, Output, Parameter,
    QueueProperties, Redrive, RedrivePolicy, Resource, Tag, Template,
};
use crate::params::{
    QueueParameters, PARAM_DELAY_SECONDS, PARAM_MAXIMUM_MESSAGE_SIZE,
    PARAM_MESSAGE_RETENTION_PERIOD, PARAM_RECEIVE_MESSAGE_WAIT_TIME_SECONDS,
    PARAM_REDRIVE_MAX_RECEIVE_COUNT, PARAM_VISIBILITY_TIMEOUT,
};

pub const RESOURCE_PRIMARY_QUEUE: &str = "PrimaryQueue";
pub const RESOURCE_SECONDARY_QUEUE: &str = "SecondaryQueue";

pub const OUTPUT_PRIMARY_QUEUE_URL: &str = "PrimaryQueueURL";
pub const OUTPUT_PRIMARY_QUEUE_ARN: &str = "PrimaryQueueARN";
pub const OUTPUT_SECONDARY_QUEUE_URL: &str = "SecondaryQueueURL";
pub const OUTPUT_SECONDARY_QUEUE_ARN: &str = "SecondaryQueueARN";

pub const CONDITION_SHOULD_NOT_USE_DLQ: &str = "ShouldNotUseDLQ";

const FIFO_SUFFIX: &str = ".fifo";

/// Render the stack template for one service instance.
///
/// Queue attributes reference template parameters so that an update can
/// keep previous values. The redrive policy is the exception when the
/// caller pins `redrive_max_receive_count` at render time: `Some(0)` drops
/// the attribute, `Some(n)` fixes it to `n`, and `None` leaves the choice
/// to the `RedriveMaxReceiveCount` parameter. A pinned policy is switched
/// over by [`track_redrive_parameter`] before an update changes the count.
pub fn render_queue_template(
    name: &str,
    is_fifo: bool,
    tags: &BTreeMap<String, String>,
    params: &QueueParameters,
) -> Template {
    let mut template = Template::new();
    template.parameters = parameters();
    template.conditions.insert(
        CONDITION_SHOULD_NOT_USE_DLQ.to_string(),
        equals(reference(PARAM_REDRIVE_MAX_RECEIVE_COUNT), json!(0)),
    );

    let fifo_queue = is_fifo.then_some(true);

    let primary = QueueProperties {
        queue_name: queue_name(name, "pri", is_fifo),
        fifo_queue,
        content_based_deduplication: if is_fifo {
            params.content_based_deduplication
        } else {
            None
        },
        delay_seconds: Some(reference(PARAM_DELAY_SECONDS)),
        maximum_message_size: Some(reference(PARAM_MAXIMUM_MESSAGE_SIZE)),
        message_retention_period: Some(reference(PARAM_MESSAGE_RETENTION_PERIOD)),
        receive_message_wait_time_seconds: Some(reference(
            PARAM_RECEIVE_MESSAGE_WAIT_TIME_SECONDS,
        )),
        redrive_policy: redrive(params.redrive_max_receive_count),
        visibility_timeout: Some(reference(PARAM_VISIBILITY_TIMEOUT)),
        tags: tag_list(Some(Tag::new("QueueType", "Primary")), tags),
    };

    let secondary = QueueProperties {
        queue_name: queue_name(name, "sec", is_fifo),
        fifo_queue,
        message_retention_period: Some(reference(PARAM_MESSAGE_RETENTION_PERIOD)),
        visibility_timeout: Some(reference(PARAM_VISIBILITY_TIMEOUT)),
        tags: tag_list(Some(Tag::new("QueueType", "Secondary")), tags),
        ..Default::default()
    };

    template
        .resources
        .insert(RESOURCE_PRIMARY_QUEUE.to_string(), Resource::Queue(primary));
    template
        .resources
        .insert(RESOURCE_SECONDARY_QUEUE.to_string(), Resource::Queue(secondary));

    let outputs = [
        (
            OUTPUT_PRIMARY_QUEUE_URL,
            "Primary queue URL",
            reference(RESOURCE_PRIMARY_QUEUE),
        ),
        (
            OUTPUT_PRIMARY_QUEUE_ARN,
            "Primary queue ARN",
            get_att(RESOURCE_PRIMARY_QUEUE, "Arn"),
        ),
        (
            OUTPUT_SECONDARY_QUEUE_URL,
            "Secondary queue URL",
            reference(RESOURCE_SECONDARY_QUEUE),
        ),
        (
            OUTPUT_SECONDARY_QUEUE_ARN,
            "Secondary queue ARN",
            get_att(RESOURCE_SECONDARY_QUEUE, "Arn"),
        ),
    ];
    for (key, description, value) in outputs {
        template.outputs.insert(
            key.to_string(),
            Output {
                description: description.to_string(),
                value,
                export: Some(Export {
                    name: format!("{name}-{key}"),
                }),
            },
        );
    }

    template
}

/// Make the primary queue's redrive policy follow the
/// `RedriveMaxReceiveCount` parameter.
///
/// Returns `Some(true)` when the template changed, `Some(false)` when the
/// policy already followed the parameter and `None` when the template has
/// no primary queue.
pub fn track_redrive_parameter(template: &mut Template) -> Option<bool> {
    let Some(Resource::Queue(primary)) = template.resources.get_mut(RESOURCE_PRIMARY_QUEUE) else {
        return None;
    };
    if matches!(primary.redrive_policy, Some(Redrive::Conditional(_))) {
        return Some(false);
    }
    primary.redrive_policy = redrive(None);
    template.conditions.insert(
        CONDITION_SHOULD_NOT_USE_DLQ.to_string(),
        equals(reference(PARAM_REDRIVE_MAX_RECEIVE_COUNT), json!(0)),
    );
    Some(true)
}

fn queue_name(name: &str, role: &str, is_fifo: bool) -> String {
    if is_fifo {
        format!("{name}-{role}{FIFO_SUFFIX}")
    } else {
        format!("{name}-{role}")
    }
}

fn redrive(max_receive_count: Option<u32>) -> Option<Redrive> {
    let target = get_att(RESOURCE_SECONDARY_QUEUE, "Arn");
    match max_receive_count {
        Some(0) => None,
        Some(n) => Some(Redrive::Policy(RedrivePolicy {
            dead_letter_target_arn: target,
            max_receive_count: n,
        })),
        None => Some(Redrive::Conditional(fn_if(
            CONDITION_SHOULD_NOT_USE_DLQ,
            no_value(),
            json!({
                "deadLetterTargetArn": target,
                "maxReceiveCount": reference(PARAM_REDRIVE_MAX_RECEIVE_COUNT),
            }),
        ))),
    }
}

fn parameters() -> BTreeMap<String, Parameter> {
    let entries = [
        (
            PARAM_DELAY_SECONDS,
            Parameter::number(
                "The time in seconds for which the delivery of all messages in the queue is delayed. You can specify an integer value of 0 to 900 (15 minutes).",
                0,
                Some(0),
                Some(900),
            ),
        ),
        (
            PARAM_MAXIMUM_MESSAGE_SIZE,
            Parameter::number(
                "The limit of how many bytes that a message can contain before Amazon SQS rejects it. You can specify an integer value from 1,024 bytes (1 KiB) to 262,144 bytes (256 KiB).",
                262_144,
                Some(1024),
                Some(262_144),
            ),
        ),
        (
            PARAM_MESSAGE_RETENTION_PERIOD,
            Parameter::number(
                "The number of seconds that Amazon SQS retains a message. You can specify an integer value from 60 seconds (1 minute) to 1,209,600 seconds (14 days).",
                345_600,
                Some(60),
                Some(1_209_600),
            ),
        ),
        (
            PARAM_RECEIVE_MESSAGE_WAIT_TIME_SECONDS,
            Parameter::number(
                "The duration, in seconds, that the ReceiveMessage action call waits until a message is in the queue. Short polling is used when this is 0.",
                0,
                Some(0),
                Some(20),
            ),
        ),
        (
            PARAM_REDRIVE_MAX_RECEIVE_COUNT,
            Parameter::number(
                "The number of times a message is delivered to the source queue before being moved to the dead-letter queue. A value of 0 disables the dead-letter queue.",
                0,
                Some(0),
                None,
            ),
        ),
        (
            PARAM_VISIBILITY_TIMEOUT,
            Parameter::number(
                "The length of time during which a message will be unavailable after a message is delivered from the queue. Values must be from 0 to 43,200 seconds (12 hours).",
                30,
                Some(0),
                Some(43_200),
            ),
        ),
    ];
    entries
        .into_iter()
        .map(|(key, param)| (key.to_string(), param))
        .collect()
}
