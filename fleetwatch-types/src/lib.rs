//! # fleetwatch-types
//!
//! Wire schema for load balancer fleet telemetry. These types describe what
//! the backend's REST endpoints and push stream carry, and nothing else:
//! the reconciliation logic lives in `fleetwatch`.
//!
//! ## Design Goals
//!
//! - **Zero required dependencies**: types work without a serialization framework
//! - **Optional serialization**: enable the `serde` feature for JSON
//! - **Absent is not zero**: every field but `name` is optional, so consumers
//!   decide how a missing value merges with what they already know
//!
//! ## Endpoints
//!
//! | Endpoint | Type |
//! |---|---|
//! | `GET /stats` | [`StatsResponse`] |
//! | `GET /servers` | [`ServersResponse`] |
//! | `GET /algorithm/{name}` | [`AlgorithmResponse`] |
//! | push stream line | [`PushEnvelope`] |
//!
//! ## Example
//!
//! ```rust
//! use fleetwatch_types::{Algorithm, EntitySnapshot, HealthSignal};
//!
//! let snapshot = EntitySnapshot::new("web-server-3").cpu_usage(91.0);
//! assert_eq!(snapshot.health_signal(), HealthSignal::Unknown);
//!
//! let algorithm: Algorithm = "least_connections".parse().unwrap();
//! assert_eq!(algorithm, Algorithm::LeastConnections);
//! ```

mod algorithm;
mod entity;
mod fleet;
mod push;

pub use algorithm::*;
pub use entity::*;
pub use fleet::*;
pub use push::*;
