//! Alarm threshold refresh.
//!
//! After a class change the memory and connections alarms of the resized
//! instance still carry values derived from the old class. Both are
//! recomputed from the new class's memory capacity:
//!
//! ```text
//! <id>-memory       e1.expression = "m1 + <cache_proportion>*<memory_bytes>"
//! <id>-connections  threshold     = safety_percentage * (memory_bytes / divider)
//! ```
//!
//! Memory is looked up in the catalog of the instance's own architecture.
//! The metrics control plane replaces alarms wholesale, so each update
//! writes back the full definition it read.

use tracing::info;

use dbscale_core::{AlarmDefinition, AlarmRatios, DatabaseInstance};

use crate::control::MetricsControlPlane;
use crate::error::{ScaleError, ScaleResult};

/// Metric whose alarm carries the connections threshold.
pub const CONNECTIONS_METRIC: &str = "DatabaseConnections";
/// Query id of the raw freeable-memory metric in the memory alarm.
pub const MEMORY_BASE_METRIC_ID: &str = "m1";
/// Query id of the headroom expression in the memory alarm.
pub const MEMORY_EXPRESSION_ID: &str = "e1";

pub fn memory_alarm_name(instance_id: &str) -> String {
    format!("{instance_id}-memory")
}

pub fn connections_alarm_name(instance_id: &str) -> String {
    format!("{instance_id}-connections")
}

/// Headroom expression for an instance with `memory_bytes` of memory.
pub fn memory_expression(cache_proportion: f64, memory_bytes: u64) -> String {
    format!("{MEMORY_BASE_METRIC_ID} + {cache_proportion}*{memory_bytes}")
}

/// Connections threshold for an instance with `memory_bytes` of memory.
pub fn connections_threshold(ratios: &AlarmRatios, memory_bytes: u64) -> f64 {
    ratios.connections_safety_percentage
        * (memory_bytes as f64 / ratios.memory_connections_divider)
}

/// Replace the headroom expression node of a memory alarm.
pub fn with_memory_expression(
    mut alarm: AlarmDefinition,
    expression: String,
) -> ScaleResult<AlarmDefinition> {
    let node = alarm
        .metrics
        .iter_mut()
        .find(|m| m.id == MEMORY_EXPRESSION_ID)
        .ok_or_else(|| ScaleError::AlarmElementMissing {
            alarm: alarm.name.clone(),
            element: format!("metric expression {MEMORY_EXPRESSION_ID}"),
        })?;
    node.expression = Some(expression);
    Ok(alarm)
}

/// Replace the threshold of a connections alarm.
pub fn with_connections_threshold(
    mut alarm: AlarmDefinition,
    threshold: f64,
) -> ScaleResult<AlarmDefinition> {
    if alarm.metric_name.as_deref() != Some(CONNECTIONS_METRIC) {
        return Err(ScaleError::AlarmElementMissing {
            alarm: alarm.name,
            element: format!("{CONNECTIONS_METRIC} metric"),
        });
    }
    alarm.threshold = Some(threshold);
    Ok(alarm)
}

/// Rewrites the two dependent alarms of a resized instance.
pub struct AlarmUpdater<'a> {
    metrics: &'a dyn MetricsControlPlane,
    ratios: AlarmRatios,
}

impl<'a> AlarmUpdater<'a> {
    pub fn new(metrics: &'a dyn MetricsControlPlane, ratios: AlarmRatios) -> Self {
        Self { metrics, ratios }
    }

    /// Update both alarms of `instance` for `new_class`.
    pub async fn update_all(&self, instance: &DatabaseInstance, new_class: &str) -> ScaleResult<()> {
        self.update_memory_alarm(instance, new_class).await?;
        self.update_connections_alarm(instance, new_class).await
    }

    pub async fn update_memory_alarm(
        &self,
        instance: &DatabaseInstance,
        new_class: &str,
    ) -> ScaleResult<()> {
        let memory_bytes = memory_for(instance, new_class)?;
        let name = memory_alarm_name(&instance.id);
        let alarm = self.load(&name).await?;

        let expression = memory_expression(self.ratios.cache_proportion, memory_bytes);
        let alarm = with_memory_expression(alarm, expression.clone())?;
        self.store(&alarm).await?;

        info!(alarm = %name, %expression, "memory alarm updated");
        Ok(())
    }

    pub async fn update_connections_alarm(
        &self,
        instance: &DatabaseInstance,
        new_class: &str,
    ) -> ScaleResult<()> {
        let memory_bytes = memory_for(instance, new_class)?;
        let name = connections_alarm_name(&instance.id);
        let alarm = self.load(&name).await?;

        let threshold = connections_threshold(&self.ratios, memory_bytes);
        let alarm = with_connections_threshold(alarm, threshold)?;
        self.store(&alarm).await?;

        info!(alarm = %name, threshold, "connections alarm updated");
        Ok(())
    }

    async fn load(&self, name: &str) -> ScaleResult<AlarmDefinition> {
        self.metrics
            .describe_alarm(name)
            .await
            .map_err(|e| ScaleError::control("describe alarm", "alarm", name, e))?
            .ok_or_else(|| ScaleError::NotFound {
                entity: "alarm",
                id: name.to_string(),
            })
    }

    async fn store(&self, alarm: &AlarmDefinition) -> ScaleResult<()> {
        self.metrics
            .put_alarm(alarm)
            .await
            .map_err(|e| ScaleError::control("put alarm", "alarm", &alarm.name, e))
    }
}

fn memory_for(instance: &DatabaseInstance, class: &str) -> ScaleResult<u64> {
    instance
        .architecture
        .catalog()
        .memory_bytes(class)
        .ok_or_else(|| ScaleError::UnsupportedClass {
            instance: instance.id.clone(),
            class: class.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCloud, connections_alarm, memory_alarm};
    use dbscale_core::{Architecture, InstanceDescription, STATUS_AVAILABLE};

    fn ratios() -> AlarmRatios {
        AlarmRatios {
            cache_proportion: 0.2,
            connections_safety_percentage: 0.8,
            memory_connections_divider: 100.0,
        }
    }

    fn instance(id: &str, class: &str) -> DatabaseInstance {
        DatabaseInstance::from_description(
            InstanceDescription {
                id: id.to_string(),
                cluster_id: "c1".to_string(),
                class: class.to_string(),
                status: STATUS_AVAILABLE.to_string(),
            },
            false,
        )
    }

    #[test]
    fn connections_threshold_is_exact() {
        let threshold = connections_threshold(&ratios(), 17_179_869_184);
        assert_eq!(threshold, 0.8 * (17_179_869_184.0 / 100.0));
        assert!((threshold - 137_438_953.472).abs() < 1e-6);
    }

    #[test]
    fn memory_expression_substitutes_exact_bytes() {
        assert_eq!(memory_expression(0.2, 17_179_869_184), "m1 + 0.2*17179869184");
        assert_eq!(memory_expression(0.25, 824_633_720_832), "m1 + 0.25*824633720832");
    }

    #[test]
    fn expression_node_must_exist() {
        let mut alarm = memory_alarm("db-1");
        alarm.metrics.retain(|m| m.id != MEMORY_EXPRESSION_ID);
        let err = with_memory_expression(alarm, "m1 + 1".to_string()).unwrap_err();
        assert!(matches!(err, ScaleError::AlarmElementMissing { .. }));
    }

    #[test]
    fn connections_metric_must_match() {
        let mut alarm = connections_alarm("db-1");
        alarm.metric_name = Some("CPUUtilization".to_string());
        assert!(with_connections_threshold(alarm, 1.0).is_err());
    }

    #[test]
    fn other_alarm_fields_are_preserved() {
        let original = memory_alarm("db-1");
        let updated = with_memory_expression(original.clone(), "m1 + 2".to_string()).unwrap();
        assert_eq!(updated.alarm_actions, original.alarm_actions);
        assert_eq!(updated.evaluation_periods, original.evaluation_periods);
        assert_eq!(updated.metrics[0], original.metrics[0]);
        assert_eq!(updated.metrics[1].expression.as_deref(), Some("m1 + 2"));
    }

    #[tokio::test]
    async fn updates_both_alarms_for_standard_class() {
        let cloud = SimCloud::new();
        cloud.seed_alarms("db-1");
        let updater = AlarmUpdater::new(&cloud, ratios());

        updater
            .update_all(&instance("db-1", "db.r5.large"), "db.r5.xlarge")
            .await
            .unwrap();

        let memory = cloud.alarm("db-1-memory").unwrap();
        let expr = memory
            .metrics
            .iter()
            .find(|m| m.id == MEMORY_EXPRESSION_ID)
            .and_then(|m| m.expression.clone());
        assert_eq!(expr.as_deref(), Some("m1 + 0.2*34359738368"));

        let connections = cloud.alarm("db-1-connections").unwrap();
        assert_eq!(connections.threshold, Some(0.8 * (34_359_738_368.0 / 100.0)));
    }

    #[tokio::test]
    async fn graviton_instance_reads_graviton_table() {
        let cloud = SimCloud::new();
        cloud.seed_alarms("db-g");
        let updater = AlarmUpdater::new(&cloud, ratios());
        let inst = instance("db-g", "db.t4g.small");
        assert_eq!(inst.architecture, Architecture::Graviton);

        updater.update_all(&inst, "db.t4g.medium").await.unwrap();
        let memory = cloud.alarm("db-g-memory").unwrap();
        assert_eq!(
            memory.metrics[1].expression.as_deref(),
            Some("m1 + 0.2*4294967296")
        );

        // A standard class is not in the graviton table.
        let err = updater.update_all(&inst, "db.r5.large").await.unwrap_err();
        assert!(matches!(err, ScaleError::UnsupportedClass { .. }));
    }

    #[tokio::test]
    async fn missing_alarm_is_not_found() {
        let cloud = SimCloud::new();
        cloud.seed_alarms("db-1");
        cloud.remove_alarm("db-1-connections");
        let updater = AlarmUpdater::new(&cloud, ratios());

        let err = updater
            .update_all(&instance("db-1", "db.r5.large"), "db.r5.xlarge")
            .await
            .unwrap_err();
        assert!(matches!(err, ScaleError::NotFound { entity: "alarm", ref id } if id == "db-1-connections"));
    }

    #[tokio::test]
    async fn rejected_write_is_reported() {
        let cloud = SimCloud::new();
        cloud.seed_alarms("db-1");
        cloud.reject_alarm_writes(true);
        let updater = AlarmUpdater::new(&cloud, ratios());

        let err = updater
            .update_memory_alarm(&instance("db-1", "db.r5.large"), "db.r5.xlarge")
            .await
            .unwrap_err();
        assert!(matches!(err, ScaleError::ControlPlane { operation: "put alarm", .. }));
    }
}
