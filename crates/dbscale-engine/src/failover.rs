//! Failover coordination.

use tracing::{error, info};

use dbscale_core::DatabaseInstance;

use crate::control::DatabaseControlPlane;
use crate::error::{ScaleError, ScaleResult};

/// Promote `instance` to writer of its cluster.
///
/// A rejected failover leaves the cluster with a resized reader and the old
/// writer still in place. It is reported as [`ScaleError::PartialTopology`]
/// and never retried here.
pub async fn failover(db: &dyn DatabaseControlPlane, instance: &DatabaseInstance) -> ScaleResult<()> {
    info!(
        instance = %instance.id,
        cluster = %instance.cluster_id,
        "initiating cluster failover"
    );
    match db.failover_cluster(&instance.cluster_id, &instance.id).await {
        Ok(()) => {
            info!(instance = %instance.id, cluster = %instance.cluster_id, "failover issued");
            Ok(())
        }
        Err(source) => {
            error!(
                instance = %instance.id,
                cluster = %instance.cluster_id,
                error = %source,
                "failover failed after class change, cluster left in partial state"
            );
            Err(ScaleError::PartialTopology {
                cluster: instance.cluster_id.clone(),
                instance: instance.id.clone(),
                source,
            })
        }
    }
}
