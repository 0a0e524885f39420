//! Collaborator interfaces.
//!
//! The engine talks to the outside world only through these traits: the
//! trigger queue, the database and metrics control planes, and the
//! notification sink. Implementations live outside the engine (or in
//! [`crate::sim`] for tests and dry runs).

use async_trait::async_trait;
use serde::Serialize;

use dbscale_core::{AlarmDefinition, ClusterMembership, InstanceDescription, TriggerMessage};

use crate::error::ControlError;

pub type ControlResult<T> = Result<T, ControlError>;

/// Queue delivering trigger messages, one at a time.
#[async_trait]
pub trait TriggerQueue: Send + Sync {
    /// Receive at most one pending message.
    async fn receive(&self) -> ControlResult<Option<TriggerMessage>>;

    /// Remove a processed message.
    async fn delete(&self, receipt_handle: &str) -> ControlResult<()>;
}

/// Managed database control plane.
#[async_trait]
pub trait DatabaseControlPlane: Send + Sync {
    async fn describe_instance(&self, instance_id: &str) -> ControlResult<InstanceDescription>;

    async fn describe_cluster(&self, cluster_id: &str) -> ControlResult<ClusterMembership>;

    /// Change the instance class, applied immediately.
    async fn modify_instance_class(&self, instance_id: &str, class: &str) -> ControlResult<()>;

    /// Promote `instance_id` to writer of `cluster_id`.
    async fn failover_cluster(&self, cluster_id: &str, instance_id: &str) -> ControlResult<()>;
}

/// Metrics/alarm control plane.
#[async_trait]
pub trait MetricsControlPlane: Send + Sync {
    /// Read an alarm by name. `Ok(None)` when no such alarm exists.
    async fn describe_alarm(&self, name: &str) -> ControlResult<Option<AlarmDefinition>>;

    /// Replace an alarm definition in full.
    async fn put_alarm(&self, alarm: &AlarmDefinition) -> ControlResult<()>;
}

/// Summary of a successful scaling step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalingReport {
    /// Instance named by the trigger.
    pub instance_id: String,
    pub cluster_id: String,
    /// Class the scaled instance now has (or was targeted to).
    pub new_class: String,
    /// Whether the triggering instance was the writer.
    pub is_writer: bool,
    /// Instance whose class changed or which was promoted.
    pub scaled_instance: String,
    /// Whether a class change was issued this invocation.
    pub resized: bool,
    /// Whether a failover was issued this invocation.
    pub failed_over: bool,
}

/// Outbound notification sink. Failures are logged by the caller and never
/// change the outcome of an invocation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_success(&self, report: &ScalingReport) -> anyhow::Result<()>;

    async fn notify_failure(&self, title: &str, error: &str) -> anyhow::Result<()>;
}
