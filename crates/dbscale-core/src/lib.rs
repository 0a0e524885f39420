//! dbscale-core — shared types for the database vertical scaler.
//!
//! - [`catalog`]: ordered instance-class tables per hardware family
//! - [`types`]: instance, cluster, and alarm records
//! - [`event`]: trigger payload decoding
//! - [`config`]: environment and poll-timing configuration

pub mod catalog;
pub mod config;
pub mod event;
pub mod types;

pub use catalog::{Architecture, Catalog, ClassEntry};
pub use config::{AlarmRatios, ConfigError, PollingConfig, ScalerConfig};
pub use event::{EventError, ScalingEvent, TriggerMessage};
pub use types::*;
