//! Orchestrator — drives one scaling invocation.
//!
//! ```text
//! Start → RoleResolved → ClassValidated ─┬─ DirectResize ────────────┬→ AlarmsUpdated → Acknowledged → Done
//!                                         └─ PeerResize? → Failover ─┘
//! ```
//!
//! Any step may end in `Failed`. The trigger message is deleted only once
//! every step before `Acknowledged` has succeeded, so a failed invocation
//! leaves it on the queue for redelivery. Notification failures are logged
//! and never change the outcome.

use std::sync::Arc;

use tracing::{error, info, warn};

use dbscale_core::{DatabaseInstance, ScalerConfig, ScalingEvent};

use crate::alarms::AlarmUpdater;
use crate::control::{
    DatabaseControlPlane, MetricsControlPlane, Notifier, ScalingReport, TriggerQueue,
};
use crate::decision::{self, PeerPlan};
use crate::error::{ScaleError, ScaleResult};
use crate::failover::failover;
use crate::role::{find_peer_reader, resolve_role};
use crate::waiter::StatusWaiter;

/// Title of the failure notification.
pub const FAILURE_TITLE: &str = "The database vertical scaling failed";

/// Progress of an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Start,
    RoleResolved,
    ClassValidated,
    DirectResize,
    PeerResize,
    Failover,
    AlarmsUpdated,
    Acknowledged,
    Done,
    Failed(String),
}

/// Result of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No trigger was pending.
    Idle,
    /// One scaling step completed.
    Scaled(ScalingReport),
}

/// The collaborators an orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub queue: Arc<dyn TriggerQueue>,
    pub database: Arc<dyn DatabaseControlPlane>,
    pub metrics: Arc<dyn MetricsControlPlane>,
    pub notifier: Arc<dyn Notifier>,
}

/// Sequences role resolution, class selection, resizing, failover, alarm
/// refresh, and acknowledgement for one trigger.
pub struct Orchestrator {
    config: ScalerConfig,
    collaborators: Collaborators,
    history: Vec<Stage>,
}

impl Orchestrator {
    pub fn new(config: ScalerConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            history: vec![Stage::Start],
        }
    }

    /// Current stage.
    pub fn stage(&self) -> &Stage {
        self.history.last().unwrap_or(&Stage::Start)
    }

    /// Every stage entered so far, in order.
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    fn advance(&mut self, stage: Stage) {
        info!(?stage, "scaling stage");
        self.history.push(stage);
    }

    /// Run one invocation and report a failure to the notifier.
    pub async fn invoke(&mut self) -> ScaleResult<Outcome> {
        let result = self.run_once().await;
        if let Err(e) = &result {
            error!(error = %e.chain(), retryable = e.is_retryable(), "vertical scaling failed");
            if let Err(notify_err) = self
                .collaborators
                .notifier
                .notify_failure(FAILURE_TITLE, &e.chain())
                .await
            {
                error!(error = %notify_err, "failed to send error notification");
            }
        }
        result
    }

    /// Run one invocation: receive a trigger, scale, acknowledge, notify.
    pub async fn run_once(&mut self) -> ScaleResult<Outcome> {
        match self.process().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.history.push(Stage::Failed(e.chain()));
                Err(e)
            }
        }
    }

    async fn process(&mut self) -> ScaleResult<Outcome> {
        let queue = self.collaborators.queue.clone();

        let message = queue
            .receive()
            .await
            .map_err(|e| ScaleError::control("receive trigger", "queue", &self.config.queue_url, e))?;
        let Some(message) = message else {
            info!("no new messages to process, skipping");
            self.advance(Stage::Done);
            return Ok(Outcome::Idle);
        };

        let event = ScalingEvent::from_body(&message.body)?;
        info!(
            instance = %event.instance_id,
            alarm = %event.alarm_name,
            "vertical scaling requested"
        );

        let report = self.scale(&event).await?;

        info!("vertical scaling handled, deleting trigger message");
        queue
            .delete(&message.receipt_handle)
            .await
            .map_err(|e| {
                ScaleError::control("delete trigger message", "message", &message.receipt_handle, e)
            })?;
        self.advance(Stage::Acknowledged);

        if let Err(e) = self.collaborators.notifier.notify_success(&report).await {
            error!(error = %e, "failed to send success notification");
        }
        self.advance(Stage::Done);
        Ok(Outcome::Scaled(report))
    }

    async fn scale(&mut self, event: &ScalingEvent) -> ScaleResult<ScalingReport> {
        let database = self.collaborators.database.clone();
        let metrics = self.collaborators.metrics.clone();
        let waiter = StatusWaiter::new(database.as_ref(), self.config.polling);
        let alarms = AlarmUpdater::new(metrics.as_ref(), self.config.ratios);

        let (target, membership) = resolve_role(database.as_ref(), &event.instance_id).await?;
        self.advance(Stage::RoleResolved);

        let target = decision::resolve_index(target)?;
        let new_class = decision::next_class(&target)?;
        info!(instance = %target.id, from = %target.class, to = %new_class, "new instance class selected");
        self.advance(Stage::ClassValidated);

        if !target.is_writer {
            info!(instance = %target.id, "instance is a reader, resizing directly");
            self.advance(Stage::DirectResize);
            waiter.resize_instance(&target, new_class).await?;

            alarms.update_all(&target, new_class).await?;
            self.advance(Stage::AlarmsUpdated);

            return Ok(report(&target, &target, new_class, true, false));
        }

        info!(instance = %target.id, "instance is the writer, selecting a reader to promote");
        let member = find_peer_reader(&target, &membership, &self.config.instance_name_prefix)?;
        let (peer, _) = resolve_role(database.as_ref(), &member.instance_id).await?;
        let peer = decision::resolve_index(peer)?;
        ensure_same_family(&peer, new_class)?;

        let plan = decision::plan_peer(decision::position(&target)?, decision::position(&peer)?);
        let resized = plan == PeerPlan::ResizeThenFailover;
        if resized {
            info!(peer = %peer.id, class = %peer.class, "peer reader is smaller than target class");
            self.advance(Stage::PeerResize);
            waiter.resize_instance(&peer, new_class).await?;
        } else {
            warn!(
                peer = %peer.id,
                class = %peer.class,
                target = %new_class,
                "peer reader already large enough, skipping resize"
            );
        }

        self.advance(Stage::Failover);
        failover(database.as_ref(), &peer).await?;

        alarms.update_all(&peer, new_class).await?;
        self.advance(Stage::AlarmsUpdated);

        Ok(report(&target, &peer, new_class, resized, true))
    }
}

/// The peer must share the writer's catalog for indices to be comparable.
fn ensure_same_family(peer: &DatabaseInstance, new_class: &str) -> ScaleResult<()> {
    if peer.architecture.catalog().index_of(new_class).is_none() {
        return Err(ScaleError::UnsupportedClass {
            instance: peer.id.clone(),
            class: new_class.to_string(),
        });
    }
    Ok(())
}

fn report(
    target: &DatabaseInstance,
    scaled: &DatabaseInstance,
    new_class: &str,
    resized: bool,
    failed_over: bool,
) -> ScalingReport {
    ScalingReport {
        instance_id: target.id.clone(),
        cluster_id: target.cluster_id.clone(),
        new_class: new_class.to_string(),
        is_writer: target.is_writer,
        scaled_instance: scaled.id.clone(),
        resized,
        failed_over,
    }
}
