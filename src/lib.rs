//! # evbridge - vehicle telemetry to publish/subscribe bridge
//!
//! Polls a vendor vehicle API on an adaptive schedule, reconciles the two
//! overlapping telemetry sources into one canonical state and publishes only
//! the values that changed. Inbound commands adjust the polling behaviour of
//! each vehicle or are forwarded to the vendor.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `model`: Vehicle identity, refresh modes and activity classes
//! - `topics`: Topic layout and inbound command grammar
//! - `snapshot`: Raw telemetry snapshots
//! - `schedule`: Per-vehicle refresh state machine
//! - `relogin`: Shared single-flight authentication with backoff
//! - `reconcile`: Merging of the status and charge sources
//! - `publisher`: Change-only publishing and payload anonymization
//! - `dispatch`: Fan-out to downstream collaborators
//! - `integrations`: Built-in collaborators
//! - `persistence`: Refresh settings kept across restarts
//! - `vehicle`: Per-vehicle orchestration task
//! - `gateway`: Vehicle registry and inbound routing

pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod integrations;
pub mod logging;
pub mod model;
pub mod persistence;
pub mod publisher;
pub mod reconcile;
pub mod relogin;
pub mod schedule;
pub mod snapshot;
pub mod topics;
pub mod vehicle;

// Re-export commonly used types
pub use config::Config;
pub use error::{BridgeError, Result};
pub use gateway::{Gateway, GatewayEvent};
pub use vehicle::{VehicleClient, VehicleHandler};
