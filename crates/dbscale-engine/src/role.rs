//! Cluster role resolution.
//!
//! Reads an instance and its cluster from the database control plane to
//! decide whether it is the writer, and for writers picks the reader that
//! will take over.

use tracing::{debug, info};

use dbscale_core::{ClusterMember, ClusterMembership, DatabaseInstance};

use crate::control::DatabaseControlPlane;
use crate::error::{ScaleError, ScaleResult};

/// Load status, class, cluster, and writer flag for `instance_id`.
///
/// Returns the populated instance together with the cluster membership it
/// was resolved against.
pub async fn resolve_role(
    db: &dyn DatabaseControlPlane,
    instance_id: &str,
) -> ScaleResult<(DatabaseInstance, ClusterMembership)> {
    let description = db
        .describe_instance(instance_id)
        .await
        .map_err(|e| ScaleError::control("describe instance", "instance", instance_id, e))?;

    let membership = db
        .describe_cluster(&description.cluster_id)
        .await
        .map_err(|e| {
            ScaleError::control("describe cluster", "cluster", &description.cluster_id, e)
        })?;

    if membership.members.is_empty() {
        return Err(ScaleError::NotFound {
            entity: "cluster members of",
            id: membership.cluster_id,
        });
    }

    // An instance missing from its own cluster listing is treated as a reader.
    let is_writer = membership.is_writer(instance_id).unwrap_or(false);
    let instance = DatabaseInstance::from_description(description, is_writer);

    info!(
        instance = %instance.id,
        cluster = %instance.cluster_id,
        class = %instance.class,
        status = %instance.status,
        writer = instance.is_writer,
        "resolved instance role"
    );
    Ok((instance, membership))
}

/// Pick the reader that will replace `writer`.
///
/// Candidates are members whose identifier contains `name_prefix` and that
/// are not the writer itself. The first candidate in listing order wins.
pub fn find_peer_reader<'a>(
    writer: &DatabaseInstance,
    membership: &'a ClusterMembership,
    name_prefix: &str,
) -> ScaleResult<&'a ClusterMember> {
    let mut candidates = membership
        .members
        .iter()
        .filter(|m| m.instance_id.contains(name_prefix) && m.instance_id != writer.id);

    let peer = candidates.next().ok_or_else(|| ScaleError::NoPeerReader {
        cluster: membership.cluster_id.clone(),
        writer: writer.id.clone(),
    })?;

    let others = candidates.count();
    if others > 0 {
        debug!(
            cluster = %membership.cluster_id,
            peer = %peer.instance_id,
            skipped = others,
            "multiple peer candidates, using first listed"
        );
    }
    Ok(peer)
}
