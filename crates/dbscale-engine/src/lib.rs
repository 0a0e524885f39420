//! dbscale-engine — one-step vertical scale-up for clustered databases.
//!
//! Given a trigger naming a database instance, the engine moves that
//! instance (or, for a writer, its peer reader) one class up its catalog,
//! waits for the change to settle, promotes the peer when needed, and
//! refreshes the memory and connections alarms for the new capacity.
//!
//! # Flow
//!
//! ```text
//! trigger ─→ resolve_role ─→ resolve_index/next_class
//!              reader: resize_instance(target)
//!              writer: find_peer_reader → resize_instance(peer)? → failover(peer)
//!          ─→ update alarms ─→ delete trigger ─→ notify
//! ```
//!
//! All external effects go through the traits in [`control`]; [`sim`]
//! provides in-memory implementations.

pub mod alarms;
pub mod control;
pub mod decision;
pub mod error;
pub mod failover;
pub mod orchestrator;
pub mod role;
pub mod sim;
pub mod waiter;

pub use control::{
    DatabaseControlPlane, MetricsControlPlane, Notifier, ScalingReport, TriggerQueue,
};
pub use error::{ControlError, ScaleError, ScaleResult, WaitPhase};
pub use orchestrator::{Collaborators, Orchestrator, Outcome, Stage};
