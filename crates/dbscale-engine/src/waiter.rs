//! State-transition waiting around a class change.
//!
//! After a mutating request the instance status is polled in two phases,
//! each bounded by its own deadline:
//!
//! 1. modification started: status is anything but "available"
//! 2. settled: status is "available" again
//!
//! A failed status read is logged and polled again on the next tick. Only
//! the deadline ends a phase unsuccessfully; it never cancels the class
//! change that was already issued.

use std::time::Duration;

use tracing::{debug, info, warn};

use dbscale_core::{DatabaseInstance, PollingConfig, STATUS_AVAILABLE};

use crate::control::DatabaseControlPlane;
use crate::error::{ScaleError, ScaleResult, WaitPhase};

/// Polls instance status until a phase condition holds.
pub struct StatusWaiter<'a> {
    db: &'a dyn DatabaseControlPlane,
    polling: PollingConfig,
}

impl<'a> StatusWaiter<'a> {
    pub fn new(db: &'a dyn DatabaseControlPlane, polling: PollingConfig) -> Self {
        Self { db, polling }
    }

    /// Issue a class change and wait for it to begin and then settle.
    ///
    /// Returns the instance as last observed (available, new class).
    pub async fn resize_instance(
        &self,
        instance: &DatabaseInstance,
        new_class: &str,
    ) -> ScaleResult<DatabaseInstance> {
        info!(
            instance = %instance.id,
            from = %instance.class,
            to = %new_class,
            "upgrading instance class"
        );
        self.db
            .modify_instance_class(&instance.id, new_class)
            .await
            .map_err(|e| ScaleError::control("modify instance class", "instance", &instance.id, e))?;

        let modifying = self.await_modification_started(instance).await?;
        self.await_settled(&modifying).await
    }

    /// Phase A: wait until the status leaves "available".
    pub async fn await_modification_started(
        &self,
        instance: &DatabaseInstance,
    ) -> ScaleResult<DatabaseInstance> {
        info!(
            instance = %instance.id,
            deadline_secs = self.polling.start_deadline.as_secs(),
            "waiting for modification to begin"
        );
        self.poll_until(
            instance,
            WaitPhase::ModificationStart,
            self.polling.start_interval,
            self.polling.start_deadline,
            |status| status != STATUS_AVAILABLE,
        )
        .await
    }

    /// Phase B: wait until the status is "available" again.
    pub async fn await_settled(&self, instance: &DatabaseInstance) -> ScaleResult<DatabaseInstance> {
        info!(
            instance = %instance.id,
            deadline_secs = self.polling.settle_deadline.as_secs(),
            "waiting for instance to become available"
        );
        self.poll_until(
            instance,
            WaitPhase::Settle,
            self.polling.settle_interval,
            self.polling.settle_deadline,
            |status| status == STATUS_AVAILABLE,
        )
        .await
    }

    async fn poll_until<F>(
        &self,
        instance: &DatabaseInstance,
        phase: WaitPhase,
        interval: Duration,
        deadline: Duration,
        done: F,
    ) -> ScaleResult<DatabaseInstance>
    where
        F: Fn(&str) -> bool,
    {
        let poll = async {
            loop {
                match self.db.describe_instance(&instance.id).await {
                    Ok(desc) => {
                        let mut observed = instance.with_status(desc.status);
                        if desc.class != observed.class {
                            observed = observed.with_class(desc.class);
                        }
                        if done(&observed.status) {
                            info!(
                                instance = %observed.id,
                                status = %observed.status,
                                class = %observed.class,
                                "instance status reached"
                            );
                            return observed;
                        }
                        debug!(instance = %observed.id, status = %observed.status, ?phase, "still waiting");
                    }
                    Err(e) => {
                        warn!(instance = %instance.id, error = %e, "unable to describe instance, retrying");
                    }
                }
                tokio::time::sleep(interval).await;
            }
        };

        tokio::time::timeout(deadline, poll)
            .await
            .map_err(|_| ScaleError::Timeout {
                instance: instance.id.clone(),
                phase,
                waited: deadline,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ModifyScript, STATUS_MODIFYING, SimCall, SimCloud};
    use dbscale_core::InstanceDescription;
    use tokio::time::Instant;

    fn cloud() -> SimCloud {
        let cloud = SimCloud::new();
        cloud.add_cluster("c1", &[("db-a", "db.r5.large", true), ("db-b", "db.r5.large", false)]);
        cloud
    }

    fn reader() -> DatabaseInstance {
        DatabaseInstance::from_description(
            InstanceDescription {
                id: "db-b".to_string(),
                cluster_id: "c1".to_string(),
                class: "db.r5.large".to_string(),
                status: STATUS_AVAILABLE.to_string(),
            },
            false,
        )
    }

    fn describes(cloud: &SimCloud) -> usize {
        cloud
            .calls()
            .iter()
            .filter(|c| matches!(c, SimCall::DescribeInstance(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn resize_runs_both_phases() {
        let cloud = cloud();
        cloud.set_modify_script(ModifyScript {
            reads_before_start: 2,
            reads_before_settle: 3,
            ..ModifyScript::default()
        });
        let waiter = StatusWaiter::new(&cloud, PollingConfig::default());

        let start = Instant::now();
        let resized = waiter.resize_instance(&reader(), "db.r5.xlarge").await.unwrap();

        assert!(resized.is_available());
        assert_eq!(resized.class, "db.r5.xlarge");
        assert_eq!(resized.size_index, None);
        // Phase A: 2 available + 1 modifying. Phase B: 2 modifying + 1 available.
        assert_eq!(describes(&cloud), 6);
        // Phase A sleeps twice at 15s, phase B twice at 5s.
        assert_eq!(start.elapsed(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_read_failures_are_tolerated() {
        let cloud = cloud();
        let waiter = StatusWaiter::new(&cloud, PollingConfig::default());
        cloud.modify_instance_class("db-b", "db.r5.xlarge").await.unwrap();
        cloud.fail_next_reads(3);

        let modifying = waiter.await_modification_started(&reader()).await.unwrap();
        assert_eq!(modifying.status, STATUS_MODIFYING);

        cloud.fail_next_reads(2);
        let settled = waiter.await_settled(&modifying).await.unwrap();
        assert!(settled.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn modification_that_never_starts_times_out() {
        let cloud = cloud();
        cloud.set_modify_script(ModifyScript {
            never_starts: true,
            ..ModifyScript::default()
        });
        let waiter = StatusWaiter::new(&cloud, PollingConfig::default());

        let start = Instant::now();
        let err = waiter.resize_instance(&reader(), "db.r5.xlarge").await.unwrap_err();
        assert!(matches!(
            err,
            ScaleError::Timeout { phase: WaitPhase::ModificationStart, .. }
        ));
        assert!(err.to_string().contains("modification did not begin"));
        assert_eq!(start.elapsed(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn modification_that_never_settles_times_out() {
        let cloud = cloud();
        cloud.set_modify_script(ModifyScript {
            never_settles: true,
            ..ModifyScript::default()
        });
        let waiter = StatusWaiter::new(&cloud, PollingConfig::default());

        let err = waiter.resize_instance(&reader(), "db.r5.xlarge").await.unwrap_err();
        assert!(matches!(err, ScaleError::Timeout { phase: WaitPhase::Settle, .. }));
        assert_eq!(cloud.instance_class("db-b").as_deref(), Some("db.r5.large"));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_deadlines_apply() {
        let cloud = cloud();
        cloud.set_modify_script(ModifyScript {
            never_starts: true,
            ..ModifyScript::default()
        });
        let polling = PollingConfig {
            start_interval: Duration::from_secs(1),
            start_deadline: Duration::from_secs(10),
            ..PollingConfig::default()
        };
        let waiter = StatusWaiter::new(&cloud, polling);

        let start = Instant::now();
        assert!(waiter.resize_instance(&reader(), "db.r5.xlarge").await.is_err());
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        // One immediate read plus one per elapsed second.
        assert!(describes(&cloud) >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_modify_skips_polling() {
        let cloud = cloud();
        cloud.reject_modify(true);
        let waiter = StatusWaiter::new(&cloud, PollingConfig::default());

        let err = waiter.resize_instance(&reader(), "db.r5.xlarge").await.unwrap_err();
        assert!(matches!(
            err,
            ScaleError::ControlPlane { operation: "modify instance class", .. }
        ));
        assert_eq!(describes(&cloud), 0);
    }
}
