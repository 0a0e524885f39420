//! In-memory simulated control planes.
//!
//! `SimCloud` implements every collaborator trait against a single shared
//! in-memory model of instances, clusters, alarms, and the trigger queue.
//! Class changes progress through scripted status transitions on each
//! instance read, and faults can be injected (transient read failures,
//! modifications that never start or never settle, rejected failovers).
//! Every call is recorded so tests can assert on what the engine did.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use dbscale_core::{
    AlarmDefinition, ClusterMember, ClusterMembership, Dimension, InstanceDescription,
    MetricQuery, MetricStat, ScalingEvent, TriggerMessage, STATUS_AVAILABLE,
};

use crate::alarms::{CONNECTIONS_METRIC, MEMORY_BASE_METRIC_ID, MEMORY_EXPRESSION_ID};
use crate::control::{
    ControlResult, DatabaseControlPlane, MetricsControlPlane, Notifier, ScalingReport,
    TriggerQueue,
};
use crate::error::ControlError;

/// Status reported while a class change is in progress.
pub const STATUS_MODIFYING: &str = "modifying";

/// A recorded collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    ReceiveMessage,
    DeleteMessage(String),
    DescribeInstance(String),
    DescribeCluster(String),
    ModifyInstanceClass { instance: String, class: String },
    FailoverCluster { cluster: String, instance: String },
    DescribeAlarm(String),
    PutAlarm(String),
}

impl SimCall {
    /// Whether this call reached the database or metrics control plane.
    pub fn is_control_plane(&self) -> bool {
        !matches!(self, SimCall::ReceiveMessage | SimCall::DeleteMessage(_))
    }
}

/// How a class change progresses once requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifyScript {
    /// Reads that still report "available" before the change begins.
    pub reads_before_start: u32,
    /// Reads that report "modifying" before the change completes.
    pub reads_before_settle: u32,
    /// The change never begins.
    pub never_starts: bool,
    /// The change begins but never completes.
    pub never_settles: bool,
}

impl Default for ModifyScript {
    fn default() -> Self {
        Self {
            reads_before_start: 0,
            reads_before_settle: 1,
            never_starts: false,
            never_settles: false,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingModify {
    class: String,
    reads_before_start: u32,
    reads_before_settle: u32,
}

#[derive(Debug, Clone)]
struct SimInstance {
    cluster_id: String,
    class: String,
    status: String,
    pending: Option<PendingModify>,
}

#[derive(Default)]
struct SimState {
    instances: HashMap<String, SimInstance>,
    /// cluster id → members in listing order.
    clusters: HashMap<String, Vec<ClusterMember>>,
    alarms: HashMap<String, AlarmDefinition>,
    queue: VecDeque<TriggerMessage>,
    next_receipt: u64,
    calls: Vec<SimCall>,
    script: ModifyScript,
    failing_reads: u32,
    reject_modify: bool,
    reject_failover: bool,
    reject_alarm_writes: bool,
}

/// Simulated database, metrics, and queue control planes.
#[derive(Default)]
pub struct SimCloud {
    state: Mutex<SimState>,
}

impl SimCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a cluster. Members are `(instance id, class, is_writer)` in
    /// listing order; every instance starts out available.
    pub fn add_cluster(&self, cluster_id: &str, members: &[(&str, &str, bool)]) {
        let mut state = self.state();
        let mut listing = Vec::with_capacity(members.len());
        for (id, class, is_writer) in members {
            state.instances.insert(
                id.to_string(),
                SimInstance {
                    cluster_id: cluster_id.to_string(),
                    class: class.to_string(),
                    status: STATUS_AVAILABLE.to_string(),
                    pending: None,
                },
            );
            listing.push(ClusterMember {
                instance_id: id.to_string(),
                is_writer: *is_writer,
            });
        }
        state.clusters.insert(cluster_id.to_string(), listing);
    }

    /// Seed the memory and connections alarms for `instance_id`.
    pub fn seed_alarms(&self, instance_id: &str) {
        let memory = memory_alarm(instance_id);
        let connections = connections_alarm(instance_id);
        let mut state = self.state();
        state.alarms.insert(memory.name.clone(), memory);
        state.alarms.insert(connections.name.clone(), connections);
    }

    pub fn remove_alarm(&self, name: &str) {
        self.state().alarms.remove(name);
    }

    /// Enqueue a trigger for `instance_id`; returns its receipt handle.
    pub fn push_trigger(&self, instance_id: &str) -> String {
        let body = ScalingEvent::encode_body(instance_id, &format!("{instance_id}-memory"));
        self.push_raw_trigger(body)
    }

    /// Enqueue a trigger with an arbitrary body.
    pub fn push_raw_trigger(&self, body: String) -> String {
        let mut state = self.state();
        state.next_receipt += 1;
        let receipt_handle = format!("receipt-{}", state.next_receipt);
        state.queue.push_back(TriggerMessage {
            receipt_handle: receipt_handle.clone(),
            body,
        });
        receipt_handle
    }

    pub fn set_modify_script(&self, script: ModifyScript) {
        self.state().script = script;
    }

    /// Fail the next `n` instance reads with a transport error.
    pub fn fail_next_reads(&self, n: u32) {
        self.state().failing_reads = n;
    }

    pub fn reject_modify(&self, reject: bool) {
        self.state().reject_modify = reject;
    }

    pub fn reject_failover(&self, reject: bool) {
        self.state().reject_failover = reject;
    }

    pub fn reject_alarm_writes(&self, reject: bool) {
        self.state().reject_alarm_writes = reject;
    }

    // ── Inspection ────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<SimCall> {
        self.state().calls.clone()
    }

    pub fn pending_messages(&self) -> usize {
        self.state().queue.len()
    }

    pub fn instance_class(&self, instance_id: &str) -> Option<String> {
        self.state().instances.get(instance_id).map(|i| i.class.clone())
    }

    pub fn writer_of(&self, cluster_id: &str) -> Option<String> {
        self.state()
            .clusters
            .get(cluster_id)
            .and_then(|m| m.iter().find(|m| m.is_writer))
            .map(|m| m.instance_id.clone())
    }

    pub fn alarm(&self, name: &str) -> Option<AlarmDefinition> {
        self.state().alarms.get(name).cloned()
    }

    pub fn modify_calls(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SimCall::ModifyInstanceClass { instance, class } => Some((instance, class)),
                _ => None,
            })
            .collect()
    }

    pub fn failover_calls(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SimCall::FailoverCluster { cluster, instance } => Some((cluster, instance)),
                _ => None,
            })
            .collect()
    }

    pub fn alarm_writes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SimCall::PutAlarm(name) => Some(name),
                _ => None,
            })
            .collect()
    }
}

/// Advance a pending class change by one observation.
fn observe(instance: &mut SimInstance, script: &ModifyScript) {
    let Some(pending) = instance.pending.as_mut() else {
        return;
    };
    if script.never_starts {
        instance.status = STATUS_AVAILABLE.to_string();
    } else if pending.reads_before_start > 0 {
        pending.reads_before_start -= 1;
        instance.status = STATUS_AVAILABLE.to_string();
    } else if script.never_settles || pending.reads_before_settle > 0 {
        pending.reads_before_settle = pending.reads_before_settle.saturating_sub(1);
        instance.status = STATUS_MODIFYING.to_string();
    } else {
        instance.class = pending.class.clone();
        instance.status = STATUS_AVAILABLE.to_string();
        instance.pending = None;
    }
}

#[async_trait]
impl TriggerQueue for SimCloud {
    async fn receive(&self) -> ControlResult<Option<TriggerMessage>> {
        let mut state = self.state();
        state.calls.push(SimCall::ReceiveMessage);
        Ok(state.queue.front().cloned())
    }

    async fn delete(&self, receipt_handle: &str) -> ControlResult<()> {
        let mut state = self.state();
        state.calls.push(SimCall::DeleteMessage(receipt_handle.to_string()));
        let before = state.queue.len();
        state.queue.retain(|m| m.receipt_handle != receipt_handle);
        if state.queue.len() == before {
            return Err(ControlError::NotFound(format!("receipt {receipt_handle}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseControlPlane for SimCloud {
    async fn describe_instance(&self, instance_id: &str) -> ControlResult<InstanceDescription> {
        let mut state = self.state();
        state.calls.push(SimCall::DescribeInstance(instance_id.to_string()));

        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(ControlError::Transport("connection reset".to_string()));
        }

        let script = state.script;
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ControlError::NotFound(instance_id.to_string()))?;
        observe(instance, &script);

        Ok(InstanceDescription {
            id: instance_id.to_string(),
            cluster_id: instance.cluster_id.clone(),
            class: instance.class.clone(),
            status: instance.status.clone(),
        })
    }

    async fn describe_cluster(&self, cluster_id: &str) -> ControlResult<ClusterMembership> {
        let mut state = self.state();
        state.calls.push(SimCall::DescribeCluster(cluster_id.to_string()));
        let members = state
            .clusters
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| ControlError::NotFound(cluster_id.to_string()))?;
        Ok(ClusterMembership {
            cluster_id: cluster_id.to_string(),
            members,
        })
    }

    async fn modify_instance_class(&self, instance_id: &str, class: &str) -> ControlResult<()> {
        let mut state = self.state();
        state.calls.push(SimCall::ModifyInstanceClass {
            instance: instance_id.to_string(),
            class: class.to_string(),
        });
        if state.reject_modify {
            return Err(ControlError::Rejected("InvalidDBInstanceState".to_string()));
        }

        let script = state.script;
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ControlError::NotFound(instance_id.to_string()))?;
        instance.pending = Some(PendingModify {
            class: class.to_string(),
            reads_before_start: script.reads_before_start,
            reads_before_settle: script.reads_before_settle,
        });
        debug!(instance = %instance_id, %class, "sim: class change accepted");
        Ok(())
    }

    async fn failover_cluster(&self, cluster_id: &str, instance_id: &str) -> ControlResult<()> {
        let mut state = self.state();
        state.calls.push(SimCall::FailoverCluster {
            cluster: cluster_id.to_string(),
            instance: instance_id.to_string(),
        });
        if state.reject_failover {
            return Err(ControlError::Rejected("InvalidDBClusterStateFault".to_string()));
        }

        let members = state
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| ControlError::NotFound(cluster_id.to_string()))?;
        if !members.iter().any(|m| m.instance_id == instance_id) {
            return Err(ControlError::Rejected(format!(
                "{instance_id} is not a member of {cluster_id}"
            )));
        }
        for member in members.iter_mut() {
            member.is_writer = member.instance_id == instance_id;
        }
        debug!(cluster = %cluster_id, writer = %instance_id, "sim: failover complete");
        Ok(())
    }
}

#[async_trait]
impl MetricsControlPlane for SimCloud {
    async fn describe_alarm(&self, name: &str) -> ControlResult<Option<AlarmDefinition>> {
        let mut state = self.state();
        state.calls.push(SimCall::DescribeAlarm(name.to_string()));
        Ok(state.alarms.get(name).cloned())
    }

    async fn put_alarm(&self, alarm: &AlarmDefinition) -> ControlResult<()> {
        let mut state = self.state();
        state.calls.push(SimCall::PutAlarm(alarm.name.clone()));
        if state.reject_alarm_writes {
            return Err(ControlError::Rejected("LimitExceeded".to_string()));
        }
        state.alarms.insert(alarm.name.clone(), alarm.clone());
        Ok(())
    }
}

fn instance_dimension(instance_id: &str) -> Vec<Dimension> {
    vec![Dimension {
        name: "DBInstanceIdentifier".to_string(),
        value: instance_id.to_string(),
    }]
}

/// A metric-math memory alarm shaped like the ones the scaler maintains.
pub fn memory_alarm(instance_id: &str) -> AlarmDefinition {
    AlarmDefinition {
        name: format!("{instance_id}-memory"),
        description: Some(format!("Freeable memory headroom for {instance_id}")),
        metric_name: None,
        namespace: None,
        statistic: None,
        period: None,
        evaluation_periods: 3,
        datapoints_to_alarm: Some(2),
        comparison_operator: "LessThanThreshold".to_string(),
        threshold: Some(0.0),
        treat_missing_data: Some("missing".to_string()),
        dimensions: Vec::new(),
        alarm_actions: vec!["arn:sns:scaling".to_string()],
        metrics: vec![
            MetricQuery {
                id: MEMORY_BASE_METRIC_ID.to_string(),
                expression: None,
                metric_stat: Some(MetricStat {
                    namespace: "AWS/RDS".to_string(),
                    metric_name: "FreeableMemory".to_string(),
                    dimensions: instance_dimension(instance_id),
                    period: 60,
                    stat: "Average".to_string(),
                }),
                label: None,
                return_data: false,
            },
            MetricQuery {
                id: MEMORY_EXPRESSION_ID.to_string(),
                expression: Some(format!("{MEMORY_BASE_METRIC_ID} + 0.1*4294967296")),
                metric_stat: None,
                label: Some("headroom".to_string()),
                return_data: true,
            },
        ],
    }
}

/// A single-metric connections alarm.
pub fn connections_alarm(instance_id: &str) -> AlarmDefinition {
    AlarmDefinition {
        name: format!("{instance_id}-connections"),
        description: Some(format!("Database connections for {instance_id}")),
        metric_name: Some(CONNECTIONS_METRIC.to_string()),
        namespace: Some("AWS/RDS".to_string()),
        statistic: Some("Average".to_string()),
        period: Some(60),
        evaluation_periods: 3,
        datapoints_to_alarm: Some(2),
        comparison_operator: "GreaterThanThreshold".to_string(),
        threshold: Some(100.0),
        treat_missing_data: Some("missing".to_string()),
        dimensions: instance_dimension(instance_id),
        alarm_actions: vec!["arn:sns:scaling".to_string()],
        metrics: Vec::new(),
    }
}

/// A delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Success(ScalingReport),
    Failure { title: String, error: String },
}

/// Notifier that records what it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail (after recording it).
    pub fn fail_sends(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, n: Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(n);
        if *self.fail.lock().unwrap_or_else(|e| e.into_inner()) {
            anyhow::bail!("webhook unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_success(&self, report: &ScalingReport) -> anyhow::Result<()> {
        self.record(Notification::Success(report.clone()))
    }

    async fn notify_failure(&self, title: &str, error: &str) -> anyhow::Result<()> {
        self.record(Notification::Failure {
            title: title.to_string(),
            error: error.to_string(),
        })
    }
}
