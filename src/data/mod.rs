//! Client-side fleet state and everything derived from it.
//!
//! ## Submodules
//!
//! - [`entity`]: The client model of a server ([`Entity`]) and history samples
//! - [`classify`]: Health classification against [`Thresholds`]
//! - [`history`]: Bounded per-server sample buffers for trends
//! - [`store`]: [`TelemetryStore`], the single writer of server state
//! - [`stats`]: Rolling windows for request rate, latency and error rate
//! - [`topology`]: Radial layout of servers around the load balancer
//! - [`traffic`]: Ephemeral traffic events with per-event expiry
//! - [`view`]: The immutable [`FleetView`] published to consumers
//! - [`duration`]: Parsing and formatting of duration strings (e.g., "5s", "500ms")
//!
//! ## Data Flow
//!
//! ```text
//! poll batch / push delta
//!        │
//!        ▼
//! TelemetryStore::apply_snapshot() / apply_event()
//!        │
//!        ├──▶ HistoryBuffer::append()
//!        ├──▶ classify_with(Thresholds)
//!        │
//!        ▼
//! FleetView ──▶ layout(), StatsAggregator, presentation
//! ```

pub mod classify;
pub mod duration;
pub mod entity;
pub mod history;
pub mod stats;
pub mod store;
pub mod topology;
pub mod traffic;
pub mod view;

pub use classify::{classify, classify_with, HealthStatus, Thresholds};
pub use entity::{Entity, Metric, Sample};
pub use history::HistoryBuffer;
pub use stats::{StatsAggregator, StatsSnapshot, TrafficLog, WindowSample};
pub use store::{
    ApplyReport, Channel, CounterSample, EntityView, StoreOptions, TelemetryStore, Trend,
};
pub use topology::{layout, Point, Topology, TopologyNode, HUB_ID};
pub use traffic::{TrafficEvent, TrafficEventScheduler};
pub use view::{FleetView, StatusCounts};
