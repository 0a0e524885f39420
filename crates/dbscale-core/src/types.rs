//! Domain types shared between the engine and its collaborators.
//!
//! These mirror what the database and metrics control planes report. None
//! of them are persisted: each invocation reads fresh values and drops them
//! when it finishes.

use serde::{Deserialize, Serialize};

use crate::catalog::Architecture;

/// Identifier of a database instance.
pub type InstanceId = String;

/// Identifier of a database cluster.
pub type ClusterId = String;

/// Status string the database control plane reports for an idle instance.
pub const STATUS_AVAILABLE: &str = "available";

// ── Instance ──────────────────────────────────────────────────────

/// Raw instance description as returned by the database control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceDescription {
    pub id: InstanceId,
    pub cluster_id: ClusterId,
    pub class: String,
    pub status: String,
}

/// Working view of a database instance during one invocation.
///
/// Starts out with only an identifier and is filled in by the role
/// resolver. Updates produce a new value rather than mutating a shared
/// record, so the writer and its peer never alias each other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseInstance {
    pub id: InstanceId,
    pub cluster_id: ClusterId,
    pub class: String,
    pub status: String,
    pub architecture: Architecture,
    pub is_writer: bool,
    /// Position of `class` in its catalog, once resolved.
    pub size_index: Option<usize>,
}

impl DatabaseInstance {
    /// An unresolved instance known only by its identifier.
    pub fn new(id: impl Into<InstanceId>) -> Self {
        Self {
            id: id.into(),
            cluster_id: String::new(),
            class: String::new(),
            status: String::new(),
            architecture: Architecture::Standard,
            is_writer: false,
            size_index: None,
        }
    }

    /// Populate from a control-plane description and the writer flag.
    pub fn from_description(desc: InstanceDescription, is_writer: bool) -> Self {
        Self {
            architecture: Architecture::of(&desc.class),
            id: desc.id,
            cluster_id: desc.cluster_id,
            class: desc.class,
            status: desc.status,
            is_writer,
            size_index: None,
        }
    }

    /// Copy with a freshly observed status.
    pub fn with_status(&self, status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..self.clone()
        }
    }

    /// Copy with a new class; re-derives the architecture and clears the
    /// resolved index.
    pub fn with_class(&self, class: impl Into<String>) -> Self {
        let class = class.into();
        Self {
            architecture: Architecture::of(&class),
            class,
            size_index: None,
            ..self.clone()
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == STATUS_AVAILABLE
    }
}

// ── Cluster ───────────────────────────────────────────────────────

/// One member of a database cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterMember {
    pub instance_id: InstanceId,
    pub is_writer: bool,
}

/// Cluster membership in control-plane listing order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterMembership {
    pub cluster_id: ClusterId,
    pub members: Vec<ClusterMember>,
}

impl ClusterMembership {
    /// Writer flag for `instance_id`, or `None` if it is not a member.
    pub fn is_writer(&self, instance_id: &str) -> Option<bool> {
        self.members
            .iter()
            .find(|m| m.instance_id == instance_id)
            .map(|m| m.is_writer)
    }

    pub fn writer(&self) -> Option<&ClusterMember> {
        self.members.iter().find(|m| m.is_writer)
    }
}

// ── Alarms ────────────────────────────────────────────────────────

/// Name/value pair attached to a metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

/// Single-metric statistic used inside a metric-math alarm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricStat {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    pub period: u32,
    pub stat: String,
}

/// One node of a metric-math alarm: either a raw metric or an expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricQuery {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_stat: Option<MetricStat>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub return_data: bool,
}

/// Full alarm definition. Writes replace every field, so updates always
/// start from the definition that was read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlarmDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metric_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub statistic: Option<String>,
    #[serde(default)]
    pub period: Option<u32>,
    pub evaluation_periods: u32,
    #[serde(default)]
    pub datapoints_to_alarm: Option<u32>,
    pub comparison_operator: String,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub treat_missing_data: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub alarm_actions: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<MetricQuery>,
}
