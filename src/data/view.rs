//! The read model published after every store mutation.

use std::time::Instant;

use fleetwatch_types::FleetSummary;
use serde::Serialize;

use super::classify::HealthStatus;
use super::stats::StatsSnapshot;
use super::store::{EntityView, TelemetryStore};
use super::traffic::TrafficEvent;

/// Per-status server counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub healthy: usize,
    pub warning: usize,
    pub unhealthy: usize,
    pub stale: usize,
}

impl StatusCounts {
    pub fn from_views(views: &[EntityView]) -> Self {
        views.iter().fold(Self::default(), |mut counts, view| {
            match view.status {
                HealthStatus::Healthy => counts.healthy += 1,
                HealthStatus::Warning => counts.warning += 1,
                HealthStatus::Unhealthy => counts.unhealthy += 1,
            }
            if view.stale {
                counts.stale += 1;
            }
            counts
        })
    }

    pub fn total(&self) -> usize {
        self.healthy + self.warning + self.unhealthy
    }
}

/// Immutable snapshot of everything the session knows.
///
/// Consumers receive this behind an `Arc` and never touch the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetView {
    pub entities: Vec<EntityView>,
    pub summary: FleetSummary,
    pub algorithm: Option<String>,
    pub connected: bool,
    pub counts: StatusCounts,
    pub stats: StatsSnapshot,
    pub traffic: Vec<TrafficEvent>,
    /// Store sequence number at the time the view was built.
    pub sequence: u64,
    #[serde(skip)]
    pub taken_at: Option<Instant>,
}

impl FleetView {
    pub fn build(
        store: &TelemetryStore,
        stats: StatsSnapshot,
        traffic: Vec<TrafficEvent>,
        now: Instant,
    ) -> Self {
        let entities = store.entity_views();
        let counts = StatusCounts::from_views(&entities);
        Self {
            entities,
            summary: store.summary().clone(),
            algorithm: store.algorithm().map(str::to_string),
            connected: store.is_connected(now),
            counts,
            stats,
            traffic,
            sequence: store.sequence(),
            taken_at: Some(now),
        }
    }

    pub fn entity(&self, name: &str) -> Option<&EntityView> {
        self.entities.iter().find(|e| e.entity.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.entity.name.as_str()).collect()
    }

    /// One-line human summary for logs.
    pub fn headline(&self) -> String {
        format!(
            "{} servers ({} ok, {} warn, {} down, {} stale) | {:.1} req/s | {:.1} ms | {:.1}% efficient | {}",
            self.counts.total(),
            self.counts.healthy,
            self.counts.warning,
            self.counts.unhealthy,
            self.counts.stale,
            self.stats.latest.requests_per_second,
            self.stats.average_response_time_ms,
            self.stats.efficiency_percent,
            if self.connected { "online" } else { "offline" },
        )
    }
}
