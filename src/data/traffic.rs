//! Ephemeral hub-to-server traffic events for topology animation.
//!
//! The scheduler owns no timers of its own. The session loop calls
//! [`TrafficEventScheduler::tick`] on its traffic cadence and sleeps until
//! [`TrafficEventScheduler::next_deadline`] to call
//! [`TrafficEventScheduler::expire`]. Every event carries its own removal
//! deadline, so several in-flight events expire independently and each is
//! removed exactly once.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use super::topology::HUB_ID;

/// Lifetime of a traffic event.
pub const DEFAULT_TRAFFIC_TTL: Duration = Duration::from_millis(2000);

/// Cadence at which new traffic events are generated.
pub const DEFAULT_TRAFFIC_INTERVAL: Duration = Duration::from_millis(500);

/// A short-lived marker travelling from the hub to one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficEvent {
    pub id: u64,
    pub source_id: String,
    pub target_id: String,
    #[serde(skip)]
    pub created_at: Instant,
    #[serde(rename = "ttl_ms", serialize_with = "super::duration::serialize_millis")]
    pub ttl: Duration,
}

impl TrafficEvent {
    /// Instant at which the event must be removed.
    pub fn deadline(&self) -> Instant {
        self.created_at + self.ttl
    }

    /// Fraction of the lifetime elapsed at `now`, in [0, 1].
    pub fn progress(&self, now: Instant) -> f64 {
        if self.ttl.is_zero() {
            return 1.0;
        }
        let age = now.saturating_duration_since(self.created_at);
        (age.as_secs_f64() / self.ttl.as_secs_f64()).min(1.0)
    }
}

/// Generates one event per tick and tracks each event's removal deadline.
#[derive(Debug)]
pub struct TrafficEventScheduler {
    rng: StdRng,
    ttl: Duration,
    next_id: u64,
    active: BTreeMap<u64, TrafficEvent>,
    removals: BTreeSet<(Instant, u64)>,
    stopped: bool,
}

impl Default for TrafficEventScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_TRAFFIC_TTL, None)
    }
}

impl TrafficEventScheduler {
    /// Create a scheduler. A `seed` makes target selection reproducible.
    pub fn new(ttl: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            ttl,
            next_id: 0,
            active: BTreeMap::new(),
            removals: BTreeSet::new(),
            stopped: false,
        }
    }

    /// Generate one event towards a uniformly chosen target.
    ///
    /// Does nothing when `targets` is empty or the scheduler is stopped.
    pub fn tick<S: AsRef<str>>(&mut self, now: Instant, targets: &[S]) -> Option<TrafficEvent> {
        if self.stopped {
            return None;
        }
        let target = targets.choose(&mut self.rng)?;

        self.next_id += 1;
        let event = TrafficEvent {
            id: self.next_id,
            source_id: HUB_ID.to_string(),
            target_id: target.as_ref().to_string(),
            created_at: now,
            ttl: self.ttl,
        };
        self.removals.insert((event.deadline(), event.id));
        self.active.insert(event.id, event.clone());
        Some(event)
    }

    /// Remove every event whose deadline is at or before `now`.
    ///
    /// Returns the removed events in deadline order.
    pub fn expire(&mut self, now: Instant) -> Vec<TrafficEvent> {
        let mut expired = Vec::new();
        while let Some(&(deadline, id)) = self.removals.first() {
            if deadline > now {
                break;
            }
            self.removals.remove(&(deadline, id));
            if let Some(event) = self.active.remove(&id) {
                expired.push(event);
            }
        }
        expired
    }

    /// Earliest pending removal, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.removals.first().map(|&(deadline, _)| deadline)
    }

    /// Events currently in flight, oldest first.
    pub fn active(&self) -> impl Iterator<Item = &TrafficEvent> {
        self.active.values()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.active.contains_key(&id)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Stop generating events and cancel every pending removal.
    ///
    /// Returns the number of removals cancelled.
    pub fn stop(&mut self) -> usize {
        self.stopped = true;
        let cancelled = self.removals.len();
        self.removals.clear();
        self.active.clear();
        cancelled
    }
}
