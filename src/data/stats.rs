//! Rolling-window statistics over fleet traffic.

use std::collections::VecDeque;

use fleetwatch_types::TrafficRecord;
use serde::Serialize;

use super::store::{CounterSample, EntityView, TelemetryStore};

/// Samples kept per rolling window.
pub const DEFAULT_WINDOW: usize = 30;

/// Records kept in the traffic log.
pub const DEFAULT_TRAFFIC_LOG: usize = 50;

/// Requests per second between two cumulative counter observations.
///
/// A counter that went backwards means the backend restarted; the rate
/// for that interval is 0, never negative. A non-positive interval also
/// yields 0.
pub fn compute_rate(previous: CounterSample, current: CounterSample) -> f64 {
    if current.total < previous.total {
        return 0.0;
    }
    let elapsed = current.at.saturating_duration_since(previous.at).as_secs_f64();
    if elapsed <= 0.0 {
        return 0.0;
    }
    (current.total - previous.total) as f64 / elapsed
}

/// Current request rate from the store's two latest counters.
pub fn current_rate(store: &TelemetryStore) -> f64 {
    store
        .latest_counters()
        .map_or(0.0, |(previous, current)| compute_rate(previous, current))
}

/// Fixed-capacity FIFO of numbers.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Mean of the window contents, 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.values.iter().sum::<f64>() / self.values.len() as f64
        }
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn values(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Bounded log of the most recent routed requests from the push channel.
#[derive(Debug, Clone)]
pub struct TrafficLog {
    records: VecDeque<TrafficRecord>,
    capacity: usize,
}

impl Default for TrafficLog {
    fn default() -> Self {
        Self::new(DEFAULT_TRAFFIC_LOG)
    }
}

impl TrafficLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: TrafficRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Percentage of logged requests that failed; 0 for an empty log.
    pub fn error_rate_percent(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let errors = self.records.iter().filter(|r| r.is_error()).count();
        errors as f64 * 100.0 / self.records.len() as f64
    }

    /// Records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TrafficRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One row appended to the windows on each stats tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WindowSample {
    pub requests_per_second: f64,
    pub response_time_ms: f64,
    pub error_rate_percent: f64,
}

impl WindowSample {
    /// Derive a sample from the current store and traffic log.
    ///
    /// Response time is the mean over servers that are not stale.
    pub fn observe(store: &TelemetryStore, views: &[EntityView], traffic: &TrafficLog) -> Self {
        let live: Vec<f64> = views
            .iter()
            .filter(|v| !v.stale)
            .map(|v| v.entity.avg_response_time_ms)
            .collect();
        let response_time_ms = if live.is_empty() {
            0.0
        } else {
            live.iter().sum::<f64>() / live.len() as f64
        };

        Self {
            requests_per_second: current_rate(store),
            response_time_ms,
            error_rate_percent: traffic.error_rate_percent(),
        }
    }
}

/// Three parallel rolling windows fed once per stats tick.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    requests_per_second: RollingWindow,
    response_time_ms: RollingWindow,
    error_rate_percent: RollingWindow,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl StatsAggregator {
    pub fn new(window: usize) -> Self {
        Self {
            requests_per_second: RollingWindow::new(window),
            response_time_ms: RollingWindow::new(window),
            error_rate_percent: RollingWindow::new(window),
        }
    }

    pub fn record(&mut self, sample: WindowSample) {
        self.requests_per_second.push(sample.requests_per_second);
        self.response_time_ms.push(sample.response_time_ms);
        self.error_rate_percent.push(sample.error_rate_percent);
    }

    /// Windowed mean response time in milliseconds.
    pub fn average_response_time(&self) -> f64 {
        self.response_time_ms.mean()
    }

    /// Windowed mean request rate.
    pub fn average_rate(&self) -> f64 {
        self.requests_per_second.mean()
    }

    /// Windowed mean error rate in percent.
    pub fn average_error_rate(&self) -> f64 {
        self.error_rate_percent.mean()
    }

    /// Share of successful traffic over the window, in percent.
    /// An empty window reports 100.
    pub fn efficiency(&self) -> f64 {
        (100.0 - self.error_rate_percent.mean()).clamp(0.0, 100.0)
    }

    pub fn requests_per_second(&self) -> &RollingWindow {
        &self.requests_per_second
    }

    pub fn response_time_ms(&self) -> &RollingWindow {
        &self.response_time_ms
    }

    pub fn error_rate_percent(&self) -> &RollingWindow {
        &self.error_rate_percent
    }

    /// Copy out the window contents and derived figures.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            latest: WindowSample {
                requests_per_second: self.requests_per_second.latest().unwrap_or(0.0),
                response_time_ms: self.response_time_ms.latest().unwrap_or(0.0),
                error_rate_percent: self.error_rate_percent.latest().unwrap_or(0.0),
            },
            average_rate: self.average_rate(),
            average_response_time_ms: self.average_response_time(),
            efficiency_percent: self.efficiency(),
            requests_per_second: self.requests_per_second.values(),
            response_time_ms: self.response_time_ms.values(),
            error_rate_percent: self.error_rate_percent.values(),
        }
    }
}

/// Immutable copy of the aggregator's state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub latest: WindowSample,
    pub average_rate: f64,
    pub average_response_time_ms: f64,
    pub efficiency_percent: f64,
    pub requests_per_second: Vec<f64>,
    pub response_time_ms: Vec<f64>,
    pub error_rate_percent: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Channel;
    use fleetwatch_types::{EntitySnapshot, FleetSummary};
    use std::time::{Duration, Instant};

    fn counter(at: Instant, total: u64) -> CounterSample {
        CounterSample { at, total }
    }

    #[test]
    fn rate_from_two_counters() {
        let t0 = Instant::now();
        let rate = compute_rate(counter(t0, 100), counter(t0 + Duration::from_secs(2), 300));
        assert_eq!(rate, 100.0);
    }

    #[test]
    fn counter_regression_reports_zero() {
        let t0 = Instant::now();
        let rate = compute_rate(counter(t0, 300), counter(t0 + Duration::from_secs(1), 100));
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn zero_interval_reports_zero() {
        let t0 = Instant::now();
        assert_eq!(compute_rate(counter(t0, 1), counter(t0, 50)), 0.0);
    }

    #[test]
    fn current_rate_reads_store_counters() {
        let mut store = TelemetryStore::default();
        let t0 = Instant::now();
        assert_eq!(current_rate(&store), 0.0);

        for (secs, total) in [(0, 100), (2, 300)] {
            let summary = FleetSummary {
                total_requests: Some(total),
                ..FleetSummary::default()
            };
            store.apply_summary(&summary, Channel::Poll, t0 + Duration::from_secs(secs));
        }
        assert_eq!(current_rate(&store), 100.0);
    }

    #[test]
    fn windows_cap_at_capacity() {
        let mut stats = StatsAggregator::default();
        for i in 0..45 {
            stats.record(WindowSample {
                requests_per_second: i as f64,
                ..WindowSample::default()
            });
        }
        assert_eq!(stats.requests_per_second().len(), DEFAULT_WINDOW);
        assert_eq!(stats.requests_per_second().values()[0], 15.0);
        // mean of 15..=44
        assert_eq!(stats.average_rate(), 29.5);
    }

    #[test]
    fn efficiency_from_error_window() {
        let mut stats = StatsAggregator::new(4);
        assert_eq!(stats.efficiency(), 100.0);

        for error_rate in [0.0, 10.0, 20.0, 10.0] {
            stats.record(WindowSample {
                error_rate_percent: error_rate,
                ..WindowSample::default()
            });
        }
        assert_eq!(stats.efficiency(), 90.0);
    }

    #[test]
    fn traffic_log_is_bounded_and_counts_errors() {
        let mut log = TrafficLog::default();
        for i in 0..60 {
            log.push(TrafficRecord {
                success: Some(i % 5 != 0),
                ..TrafficRecord::default()
            });
        }
        assert_eq!(log.len(), DEFAULT_TRAFFIC_LOG);
        // records 10..60: i % 5 == 0 for 10 of them
        assert_eq!(log.error_rate_percent(), 20.0);
        assert_eq!(TrafficLog::default().error_rate_percent(), 0.0);
    }

    #[test]
    fn observe_averages_live_response_times() {
        let mut store = TelemetryStore::default();
        let t0 = Instant::now();
        store.apply_snapshot(
            &[
                EntitySnapshot::new("s1").avg_response_time(10.0),
                EntitySnapshot::new("s2").avg_response_time(30.0),
            ],
            t0,
        );
        let views = store.entity_views();
        let sample = WindowSample::observe(&store, &views, &TrafficLog::default());

        assert_eq!(sample.response_time_ms, 20.0);
        assert_eq!(sample.requests_per_second, 0.0);
        assert_eq!(sample.error_rate_percent, 0.0);
    }

    #[test]
    fn snapshot_copies_windows() {
        let mut stats = StatsAggregator::new(3);
        stats.record(WindowSample {
            requests_per_second: 5.0,
            response_time_ms: 40.0,
            error_rate_percent: 0.0,
        });
        stats.record(WindowSample {
            requests_per_second: 7.0,
            response_time_ms: 60.0,
            error_rate_percent: 50.0,
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.latest.requests_per_second, 7.0);
        assert_eq!(snapshot.average_response_time_ms, 50.0);
        assert_eq!(snapshot.efficiency_percent, 75.0);
        assert_eq!(snapshot.response_time_ms, vec![40.0, 60.0]);
    }
}
