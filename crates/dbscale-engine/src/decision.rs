//! Scaling decisions: where an instance sits in its catalog and what it
//! should become.
//!
//! # Progression rule
//!
//! ```text
//! index = position of class in catalog(architecture(class))
//! next  = catalog[index + 1]      if index + 2 < catalog.len()
//!         CeilingReached          otherwise
//! ```
//!
//! The rule keeps one class of headroom: the largest class is never chosen,
//! and neither of the two largest classes can be scaled from.

use tracing::debug;

use dbscale_core::DatabaseInstance;

use crate::error::{ScaleError, ScaleResult};

/// What to do with the peer reader when the target is the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPlan {
    /// Peer is smaller than the writer's next class: resize, then fail over.
    ResizeThenFailover,
    /// Peer is already large enough: only fail over.
    FailoverOnly,
}

/// Locate the instance's class in its catalog and record the index.
pub fn resolve_index(instance: DatabaseInstance) -> ScaleResult<DatabaseInstance> {
    let catalog = instance.architecture.catalog();
    match catalog.index_of(&instance.class) {
        Some(index) => {
            debug!(
                instance = %instance.id,
                class = %instance.class,
                architecture = %instance.architecture,
                index,
                "resolved class position"
            );
            Ok(DatabaseInstance {
                size_index: Some(index),
                ..instance
            })
        }
        None => Err(ScaleError::UnsupportedClass {
            instance: instance.id,
            class: instance.class,
        }),
    }
}

/// Catalog position of the instance's class, resolving it if needed.
pub fn position(instance: &DatabaseInstance) -> ScaleResult<usize> {
    instance
        .size_index
        .or_else(|| instance.architecture.catalog().index_of(&instance.class))
        .ok_or_else(|| ScaleError::UnsupportedClass {
            instance: instance.id.clone(),
            class: instance.class.clone(),
        })
}

/// The class one step above the instance's current class.
pub fn next_class(instance: &DatabaseInstance) -> ScaleResult<&'static str> {
    let catalog = instance.architecture.catalog();
    let next = position(instance)? + 1;

    let ceiling = || ScaleError::CeilingReached {
        instance: instance.id.clone(),
        class: instance.class.clone(),
    };
    if next + 1 >= catalog.len() {
        return Err(ceiling());
    }
    catalog.class_at(next).ok_or_else(ceiling)
}

/// Decide whether the peer needs resizing before it is promoted.
pub fn plan_peer(writer_index: usize, peer_index: usize) -> PeerPlan {
    if writer_index + 1 > peer_index {
        PeerPlan::ResizeThenFailover
    } else {
        PeerPlan::FailoverOnly
    }
}
