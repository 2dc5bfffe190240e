//! The telemetry store: single writer of server state.
//!
//! Poll snapshots and push deltas both land here, in arrival order. When a
//! poll and a push touch the same server, whichever was applied last wins;
//! every update is stamped with a store-wide sequence number and the channel
//! it came from so that consumers can see which write is current.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use fleetwatch_types::{EntitySnapshot, FleetSummary};
use serde::Serialize;

use super::classify::{classify_with, HealthStatus, Thresholds};
use super::entity::{Entity, Metric};
use super::history::{HistoryBuffer, DEFAULT_HISTORY_CAPACITY};

/// Which update channel produced a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Poll,
    Push,
}

/// Tunables for the store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Samples kept per server.
    pub history_capacity: usize,
    /// Consecutive polls a server may be missing from before it is stale.
    pub stale_after_polls: u32,
    /// Classification thresholds.
    pub thresholds: Thresholds,
    /// The store reports itself disconnected once the last successful
    /// contact is older than this.
    pub offline_after: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            stale_after_polls: 3,
            thresholds: Thresholds::default(),
            offline_after: Duration::from_secs(15),
        }
    }
}

/// A cumulative fleet request counter observed at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSample {
    pub at: Instant,
    pub total: u64,
}

/// Outcome of applying a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Records applied.
    pub applied: usize,
    /// Records that introduced a previously unseen server.
    pub created: usize,
    /// Records skipped because they carried no usable name.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
struct EntityRecord {
    entity: Entity,
    history: HistoryBuffer,
    status: HealthStatus,
    missed_polls: u32,
    sequence: u64,
    channel: Channel,
    updated_at: Instant,
}

/// Current state of every server observed so far.
#[derive(Debug, Clone)]
pub struct TelemetryStore {
    options: StoreOptions,
    records: Vec<EntityRecord>,
    index: HashMap<String, usize>,
    summary: FleetSummary,
    algorithm: Option<String>,
    counters: VecDeque<CounterSample>,
    sequence: u64,
    last_contact: Option<Instant>,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl TelemetryStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            records: Vec::new(),
            index: HashMap::new(),
            summary: FleetSummary::default(),
            algorithm: None,
            counters: VecDeque::with_capacity(2),
            sequence: 0,
            last_contact: None,
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Apply a full poll snapshot.
    ///
    /// Listed servers have every field replaced. Servers missing from the
    /// snapshot keep their last-known values and move one poll closer to
    /// being stale; they are never removed.
    pub fn apply_snapshot(&mut self, entities: &[EntitySnapshot], now: Instant) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut seen = vec![false; self.records.len()];

        for snapshot in entities {
            if snapshot.name.trim().is_empty() {
                report.skipped += 1;
                continue;
            }
            let (idx, created) = self.upsert(&snapshot.name, now);
            let record = &mut self.records[idx];
            record.entity.replace_with(snapshot);
            record.missed_polls = 0;
            if idx < seen.len() {
                seen[idx] = true;
            }
            self.commit(idx, Channel::Poll, now);

            report.applied += 1;
            report.created += usize::from(created);
        }

        for (idx, seen) in seen.into_iter().enumerate() {
            if !seen {
                let record = &mut self.records[idx];
                record.missed_polls = record.missed_polls.saturating_add(1);
            }
        }

        self.last_contact = Some(now);
        report
    }

    /// Apply a partial push delta for one server.
    ///
    /// Fields absent from the delta are left unchanged. An unknown name
    /// creates the server. Returns `true` if the server was created.
    pub fn apply_event(&mut self, delta: &EntitySnapshot, now: Instant) -> bool {
        if delta.name.trim().is_empty() {
            return false;
        }
        let (idx, created) = self.upsert(&delta.name, now);
        let record = &mut self.records[idx];
        record.entity.merge(delta);
        record.missed_polls = 0;
        self.commit(idx, Channel::Push, now);
        self.last_contact = Some(now);
        created
    }

    /// Apply fleet-level counters. Fields absent from `summary` keep their
    /// previous value.
    ///
    /// A request counter sample is recorded only when the summary carries
    /// `total_requests`, or for a poll, from the sum over servers. Push
    /// deltas without a counter leave the rate pair untouched.
    pub fn apply_summary(&mut self, summary: &FleetSummary, channel: Channel, now: Instant) {
        if summary.total_requests.is_some() {
            self.summary.total_requests = summary.total_requests;
        }
        if summary.healthy_servers.is_some() {
            self.summary.healthy_servers = summary.healthy_servers;
        }
        if summary.total_servers.is_some() {
            self.summary.total_servers = summary.total_servers;
        }
        if let Some(ref algorithm) = summary.algorithm {
            self.summary.algorithm = Some(algorithm.clone());
            self.algorithm = Some(algorithm.clone());
        }

        let total = match (summary.total_requests, channel) {
            (Some(total), _) => Some(total),
            (None, Channel::Poll) => {
                Some(self.records.iter().map(|r| r.entity.total_requests).sum())
            }
            (None, Channel::Push) => None,
        };
        if let Some(total) = total {
            self.record_counter(CounterSample { at: now, total });
        }
        self.last_contact = Some(now);
    }

    /// Record a cumulative request counter observation.
    pub fn record_counter(&mut self, sample: CounterSample) {
        if self.counters.len() == 2 {
            self.counters.pop_front();
        }
        self.counters.push_back(sample);
    }

    /// Set the active algorithm label after the backend confirmed a switch.
    pub fn set_algorithm(&mut self, name: impl Into<String>) {
        self.algorithm = Some(name.into());
    }

    /// Note a successful exchange with the backend that carried no data.
    pub fn mark_contact(&mut self, now: Instant) {
        self.last_contact = Some(now);
    }

    fn upsert(&mut self, name: &str, now: Instant) -> (usize, bool) {
        if let Some(&idx) = self.index.get(name) {
            return (idx, false);
        }
        let idx = self.records.len();
        self.records.push(EntityRecord {
            entity: Entity::new(name),
            history: HistoryBuffer::new(self.options.history_capacity),
            status: HealthStatus::Healthy,
            missed_polls: 0,
            sequence: 0,
            channel: Channel::Poll,
            updated_at: now,
        });
        self.index.insert(name.to_string(), idx);
        (idx, true)
    }

    fn commit(&mut self, idx: usize, channel: Channel, now: Instant) {
        self.sequence += 1;
        let record = &mut self.records[idx];
        record.history.append(record.entity.sample(now));
        record.status = classify_with(&record.entity, &self.options.thresholds);
        record.sequence = self.sequence;
        record.channel = channel;
        record.updated_at = now;
    }

    fn record(&self, name: &str) -> Option<&EntityRecord> {
        self.index.get(name).map(|&idx| &self.records[idx])
    }

    /// Current values for a server.
    pub fn get_entity(&self, name: &str) -> Option<&Entity> {
        self.record(name).map(|r| &r.entity)
    }

    /// Every known server, in order of first observation.
    pub fn list_entities(&self) -> impl Iterator<Item = &Entity> {
        self.records.iter().map(|r| &r.entity)
    }

    /// Server names, in order of first observation.
    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.entity.name.clone()).collect()
    }

    /// Single-step trend of a metric; 0 for unknown servers.
    pub fn get_trend(&self, name: &str, metric: Metric) -> f64 {
        self.record(name).map_or(0.0, |r| r.history.trend(metric))
    }

    pub fn status(&self, name: &str) -> Option<HealthStatus> {
        self.record(name).map(|r| r.status)
    }

    pub fn history(&self, name: &str) -> Option<&HistoryBuffer> {
        self.record(name).map(|r| &r.history)
    }

    /// True once the server has been absent from enough consecutive polls.
    pub fn is_stale(&self, name: &str) -> bool {
        self.record(name)
            .is_some_and(|r| r.missed_polls >= self.options.stale_after_polls)
    }

    /// Sequence number and channel of the last write to a server.
    pub fn provenance(&self, name: &str) -> Option<(u64, Channel)> {
        self.record(name).map(|r| (r.sequence, r.channel))
    }

    /// Whether the last successful contact is recent enough.
    pub fn is_connected(&self, now: Instant) -> bool {
        self.last_contact
            .is_some_and(|at| now.saturating_duration_since(at) < self.options.offline_after)
    }

    pub fn last_contact(&self) -> Option<Instant> {
        self.last_contact
    }

    pub fn summary(&self) -> &FleetSummary {
        &self.summary
    }

    pub fn algorithm(&self) -> Option<&str> {
        self.algorithm.as_deref()
    }

    /// The two most recent counter observations, oldest first.
    pub fn latest_counters(&self) -> Option<(CounterSample, CounterSample)> {
        match (self.counters.front(), self.counters.back()) {
            (Some(&previous), Some(&current)) if self.counters.len() == 2 => {
                Some((previous, current))
            }
            _ => None,
        }
    }

    /// Highest sequence number issued so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy out a consistent read view of every server.
    pub fn entity_views(&self) -> Vec<EntityView> {
        self.records
            .iter()
            .map(|r| EntityView {
                entity: r.entity.clone(),
                status: r.status,
                stale: r.missed_polls >= self.options.stale_after_polls,
                trend: Trend {
                    cpu: r.history.trend(Metric::Cpu),
                    memory: r.history.trend(Metric::Memory),
                    connections: r.history.trend(Metric::Connections),
                },
                cpu_history: r.history.values(Metric::Cpu),
                sequence: r.sequence,
                channel: r.channel,
            })
            .collect()
    }
}

/// Trend of every tracked metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Trend {
    pub cpu: f64,
    pub memory: f64,
    pub connections: f64,
}

/// Immutable copy of one server's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityView {
    #[serde(flatten)]
    pub entity: Entity,
    pub status: HealthStatus,
    pub stale: bool,
    pub trend: Trend,
    pub cpu_history: Vec<f64>,
    pub sequence: u64,
    pub channel: Channel,
}
