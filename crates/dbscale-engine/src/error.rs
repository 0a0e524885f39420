//! Engine error types.

use std::time::Duration;

use thiserror::Error;

use dbscale_core::EventError;

/// Errors reported by a control-plane collaborator.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The request succeeded but returned an empty result set.
    #[error("{0} not found")]
    NotFound(String),

    /// The control plane refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Which polling phase timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
    /// Waiting for the status to leave "available".
    ModificationStart,
    /// Waiting for the status to return to "available".
    Settle,
}

impl std::fmt::Display for WaitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitPhase::ModificationStart => f.write_str("modification did not begin"),
            WaitPhase::Settle => f.write_str("instance did not become available"),
        }
    }
}

/// Errors that abort a scaling invocation.
///
/// Every variant names the entity it concerns; control-plane failures also
/// name the operation and keep the underlying error as their source.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("failed to decode trigger message: {0}")]
    Event(#[from] EventError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("instance {instance} has class {class}, which is not in the supported catalogs")]
    UnsupportedClass { instance: String, class: String },

    #[error("instance {instance} with class {class}: maximum usable size reached")]
    CeilingReached { instance: String, class: String },

    #[error("cluster {cluster} has no reader eligible to replace writer {writer}")]
    NoPeerReader { cluster: String, writer: String },

    #[error("timed out after {waited:?} waiting on instance {instance}: {phase}")]
    Timeout {
        instance: String,
        phase: WaitPhase,
        waited: Duration,
    },

    #[error(
        "failover of cluster {cluster} to {instance} failed after its class change; \
         the cluster topology was not switched"
    )]
    PartialTopology {
        cluster: String,
        instance: String,
        #[source]
        source: ControlError,
    },

    #[error("alarm {alarm} has no {element}")]
    AlarmElementMissing { alarm: String, element: String },

    #[error("{operation} failed for {id}")]
    ControlPlane {
        operation: &'static str,
        id: String,
        #[source]
        source: ControlError,
    },
}

impl ScaleError {
    /// Wrap a control-plane failure, turning empty results into `NotFound`.
    pub fn control(
        operation: &'static str,
        entity: &'static str,
        id: &str,
        source: ControlError,
    ) -> Self {
        match source {
            ControlError::NotFound(_) => ScaleError::NotFound {
                entity,
                id: id.to_string(),
            },
            source => ScaleError::ControlPlane {
                operation,
                id: id.to_string(),
                source,
            },
        }
    }

    /// Whether redelivering the trigger could lead to a different outcome.
    ///
    /// Unsupported classes and a reached ceiling reproduce on every
    /// redelivery; a failed failover must be inspected by an operator.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ScaleError::Event(_)
                | ScaleError::UnsupportedClass { .. }
                | ScaleError::CeilingReached { .. }
                | ScaleError::PartialTopology { .. }
        )
    }

    /// The error and all of its sources, outermost first, joined by ": ".
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let msg = err.to_string();
            if !out.ends_with(&msg) {
                out.push_str(": ");
                out.push_str(&msg);
            }
            source = err.source();
        }
        out
    }
}

pub type ScaleResult<T> = Result<T, ScaleError>;
