//! # fleetwatch
//!
//! A live telemetry client for a load-balanced server fleet.
//!
//! fleetwatch polls a load balancer's REST API and listens to its push
//! stream, reconciles both into one consistent picture of every backend
//! server, and derives what a dashboard needs: health classification,
//! trends, rolling request/latency/error statistics, a radial topology
//! layout and short-lived traffic animations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Session                             │
//! │  ┌──────────┐    ┌────────────────┐    ┌──────────────────┐  │
//! │  │  source  │───▶│ TelemetryStore │───▶│    FleetView     │──┼──▶ consumers
//! │  │poll/push │    │ (single writer)│    │ (Arc, watch chan)│  │
//! │  └──────────┘    └────────────────┘    └──────────────────┘  │
//! │                    ▲  StatsAggregator, TrafficEventScheduler │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`source`]**: transport adapters: [`HttpSource`] and [`FileSource`]
//!   implement [`PollSource`]; [`PushStream`] reads the push channel
//! - **[`data`]**: the store, classification, history, statistics,
//!   topology layout and traffic events
//! - **[`session`]**: the timer loop tying it together, controlled through
//!   a [`SessionHandle`]
//! - **[`config`]**: layered [`Settings`]
//!
//! ## Usage
//!
//! ### Driving a session
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetwatch::{HttpSource, PushStream, Session, SessionOptions};
//!
//! # tokio_test::block_on(async {
//! let source = HttpSource::builder("http://localhost:5000").build()?;
//! let push = PushStream::connect_tcp("localhost:5001", std::time::Duration::from_secs(60));
//!
//! let handle = Session::new(Arc::new(source), SessionOptions::default())
//!     .with_push(push)
//!     .start();
//!
//! handle.refresh().await?;
//! handle.set_algorithm("least_connections").await?;
//!
//! let view = handle.view();
//! for server in &view.entities {
//!     println!("{} {:?} cpu {:+.1}", server.entity.name, server.status, server.trend.cpu);
//! }
//! # Ok::<(), fleetwatch::SyncError>(())
//! # });
//! ```
//!
//! ### Using the store directly
//!
//! ```
//! use std::time::Instant;
//! use fleetwatch::{EntitySnapshot, HealthStatus, Metric, TelemetryStore};
//!
//! let mut store = TelemetryStore::default();
//! let now = Instant::now();
//! store.apply_snapshot(&[EntitySnapshot::new("s1").cpu_usage(95.0)], now);
//! store.apply_snapshot(&[EntitySnapshot::new("s1").cpu_usage(50.0)], now);
//!
//! assert_eq!(store.status("s1"), Some(HealthStatus::Healthy));
//! assert_eq!(store.get_trend("s1", Metric::Cpu), -45.0);
//! ```
//!
//! ### Laying out the fleet
//!
//! ```
//! use fleetwatch::layout;
//!
//! let topology = layout(&["s0", "s1", "s2"], 300.0, 300.0);
//! let s0 = topology.position("s0").unwrap();
//! assert!((s0.x - 240.0).abs() < 1e-9);
//! ```

pub mod backoff;
pub mod config;
pub mod data;
pub mod error;
pub mod session;
pub mod source;

// Re-export main types for convenience
pub use config::{Overrides, Settings};
pub use data::{
    classify, classify_with, layout, Channel, Entity, EntityView, FleetView, HealthStatus, Metric,
    StatsAggregator, StatsSnapshot, StatusCounts, StoreOptions, TelemetryStore, Thresholds,
    Topology, TrafficEvent, TrafficEventScheduler,
};
pub use error::SyncError;
pub use fleetwatch_types::{Algorithm, EntitySnapshot, FleetSummary, HealthSignal, TrafficRecord};
pub use session::{Session, SessionHandle, SessionOptions};
pub use source::{FileSource, HttpSource, PollBatch, PollSource, PushEvent, PushMessage, PushStream};
