//! Trigger payload decoding.
//!
//! A trigger message body is a notification envelope whose `Message` field
//! is itself a JSON-encoded alarm state change. The target instance is the
//! value of the first dimension of the alarm's trigger.
//!
//! Field names are matched in PascalCase (what the alarm service emits) and
//! camelCase.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Dimension, InstanceId};

/// Errors decoding a trigger message.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("unable to decode trigger envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("unable to decode alarm message: {0}")]
    Alarm(#[source] serde_json::Error),

    #[error("alarm {alarm} carries no dimensions")]
    NoDimensions { alarm: String },
}

/// A message received from the trigger queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMessage {
    /// Handle used to delete the message once processed.
    pub receipt_handle: String,
    pub body: String,
}

/// Outer notification envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(rename = "Type", alias = "type", default)]
    pub kind: String,
    #[serde(rename = "MessageId", alias = "messageId", default)]
    pub message_id: String,
    #[serde(rename = "TopicArn", alias = "topicArn", default)]
    pub topic_arn: String,
    #[serde(rename = "Subject", alias = "subject", default)]
    pub subject: Option<String>,
    #[serde(rename = "Message", alias = "message")]
    pub message: String,
    #[serde(rename = "Timestamp", alias = "timestamp", default)]
    pub timestamp: String,
}

/// Alarm state-change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmMessage {
    #[serde(rename = "AlarmName", alias = "alarmName", default)]
    pub alarm_name: String,
    #[serde(rename = "AlarmDescription", alias = "alarmDescription", default)]
    pub alarm_description: Option<String>,
    #[serde(rename = "NewStateValue", alias = "newStateValue", default)]
    pub new_state_value: String,
    #[serde(rename = "NewStateReason", alias = "newStateReason", default)]
    pub new_state_reason: String,
    #[serde(rename = "StateChangeTime", alias = "stateChangeTime", default)]
    pub state_change_time: String,
    #[serde(rename = "Region", alias = "region", default)]
    pub region: String,
    #[serde(rename = "OldStateValue", alias = "oldStateValue", default)]
    pub old_state_value: String,
    #[serde(rename = "Trigger", alias = "trigger")]
    pub trigger: AlarmTrigger,
}

/// Metric description inside an alarm notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmTrigger {
    #[serde(rename = "MetricName", alias = "metricName", default)]
    pub metric_name: String,
    #[serde(rename = "Namespace", alias = "namespace", default)]
    pub namespace: String,
    #[serde(rename = "Dimensions", alias = "dimensions", default)]
    pub dimensions: Vec<Dimension>,
    #[serde(rename = "Period", alias = "period", default)]
    pub period: u32,
    #[serde(rename = "EvaluationPeriods", alias = "evaluationPeriods", default)]
    pub evaluation_periods: u32,
    #[serde(rename = "ComparisonOperator", alias = "comparisonOperator", default)]
    pub comparison_operator: String,
    #[serde(rename = "Threshold", alias = "threshold", default)]
    pub threshold: f64,
}

/// The decoded trigger: which instance needs a scaling step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingEvent {
    pub instance_id: InstanceId,
    pub alarm_name: String,
}

impl ScalingEvent {
    /// Decode a trigger message body.
    pub fn from_body(body: &str) -> Result<Self, EventError> {
        let envelope: NotificationEnvelope =
            serde_json::from_str(body).map_err(EventError::Envelope)?;
        let alarm: AlarmMessage =
            serde_json::from_str(&envelope.message).map_err(EventError::Alarm)?;

        let instance_id = alarm
            .trigger
            .dimensions
            .first()
            .map(|d| d.value.clone())
            .ok_or_else(|| EventError::NoDimensions {
                alarm: alarm.alarm_name.clone(),
            })?;

        Ok(Self {
            instance_id,
            alarm_name: alarm.alarm_name,
        })
    }

    /// Build the body a trigger message for `instance_id` would carry.
    pub fn encode_body(instance_id: &str, alarm_name: &str) -> String {
        let alarm = serde_json::json!({
            "AlarmName": alarm_name,
            "NewStateValue": "ALARM",
            "Trigger": {
                "MetricName": "FreeableMemory",
                "Namespace": "AWS/RDS",
                "Dimensions": [{ "name": "DBInstanceIdentifier", "value": instance_id }],
            },
        });
        serde_json::json!({
            "Type": "Notification",
            "Message": alarm.to_string(),
        })
        .to_string()
    }
}
