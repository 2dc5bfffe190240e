//! The telemetry session: one task that owns all mutable state.
//!
//! ```text
//!   poll timer ──▶ PollSource::fetch (spawned, at most one in flight)
//!                         │
//!   PushStream ───────────┤
//!                         ▼
//!                  TelemetryStore ──▶ FleetView (watch channel)
//!                         ▲
//!   stats timer ──────────┤  StatsAggregator
//!   traffic timer ────────┤  TrafficEventScheduler
//!   removal deadline ─────┘
//! ```
//!
//! Every timer, the push stream and the command channel are branches of one
//! `tokio::select!`, so updates are applied strictly in arrival order and
//! no lock guards the store. Network calls run in spawned tasks and re-enter
//! the loop through their join handle or the command channel.

mod handle;

pub use handle::SessionHandle;
pub(crate) use handle::Command;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::data::stats::{DEFAULT_TRAFFIC_LOG, DEFAULT_WINDOW};
use crate::data::traffic::{DEFAULT_TRAFFIC_INTERVAL, DEFAULT_TRAFFIC_TTL};
use crate::data::{
    Channel, FleetView, StatsAggregator, StoreOptions, TelemetryStore, TrafficEventScheduler,
    TrafficLog, WindowSample,
};
use crate::error::SyncError;
use crate::source::{PollBatch, PollSource, PushEvent, PushMessage, PushStream};

/// Cadences and capacities for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Time between polls while the backend answers.
    pub poll_interval: Duration,
    /// Time between rolling-window samples.
    pub stats_interval: Duration,
    /// Time between generated traffic events.
    pub traffic_interval: Duration,
    /// Lifetime of a traffic event.
    pub traffic_ttl: Duration,
    /// Upper bound for the poll retry delay.
    pub max_backoff: Duration,
    /// Samples per rolling window.
    pub stats_window: usize,
    /// Records kept in the traffic log.
    pub traffic_log_capacity: usize,
    /// Seed for traffic-event target selection.
    pub seed: Option<u64>,
    pub store: StoreOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            stats_interval: Duration::from_secs(1),
            traffic_interval: DEFAULT_TRAFFIC_INTERVAL,
            traffic_ttl: DEFAULT_TRAFFIC_TTL,
            max_backoff: Duration::from_secs(60),
            stats_window: DEFAULT_WINDOW,
            traffic_log_capacity: DEFAULT_TRAFFIC_LOG,
            seed: None,
            store: StoreOptions::default(),
        }
    }
}

/// A configured, not yet running session.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use fleetwatch::{HttpSource, Session, SessionOptions};
///
/// # tokio_test::block_on(async {
/// let source = HttpSource::builder("http://localhost:5000").build()?;
/// let handle = Session::new(Arc::new(source), SessionOptions::default()).start();
///
/// let mut views = handle.subscribe();
/// views.changed().await.ok();
/// println!("{}", views.borrow().headline());
///
/// let store = handle.stop().await?;
/// println!("{} servers known", store.len());
/// # Ok::<(), fleetwatch::SyncError>(())
/// # });
/// ```
#[derive(Debug)]
pub struct Session {
    source: Arc<dyn PollSource>,
    push: Option<PushStream>,
    options: SessionOptions,
}

impl Session {
    pub fn new(source: Arc<dyn PollSource>, options: SessionOptions) -> Self {
        Self {
            source,
            push: None,
            options,
        }
    }

    /// Also consume a push stream.
    pub fn with_push(mut self, push: PushStream) -> Self {
        self.push = Some(push);
        self
    }

    /// Spawn the session loop. Must be called within a tokio runtime.
    pub fn start(self) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (view_tx, view_rx) = watch::channel(Arc::new(FleetView::default()));
        let description = self.source.description().to_string();

        let runner = Runner::new(self.source, self.options, view_tx, commands_tx.clone());
        let task = tokio::spawn(runner.run(self.push, commands_rx, stop_rx));

        SessionHandle {
            commands: commands_tx,
            stop_tx,
            views: view_rx,
            task,
            description,
        }
    }
}

type PollTask = JoinHandle<Result<PollBatch, SyncError>>;

/// State owned by the session task.
struct Runner {
    source: Arc<dyn PollSource>,
    options: SessionOptions,
    store: TelemetryStore,
    stats: StatsAggregator,
    traffic_log: TrafficLog,
    scheduler: TrafficEventScheduler,
    backoff: Backoff,
    view_tx: watch::Sender<Arc<FleetView>>,
    commands_tx: mpsc::Sender<Command>,
}

impl Runner {
    fn new(
        source: Arc<dyn PollSource>,
        options: SessionOptions,
        view_tx: watch::Sender<Arc<FleetView>>,
        commands_tx: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            store: TelemetryStore::new(options.store.clone()),
            stats: StatsAggregator::new(options.stats_window),
            traffic_log: TrafficLog::new(options.traffic_log_capacity),
            scheduler: TrafficEventScheduler::new(options.traffic_ttl, options.seed),
            backoff: Backoff::new(options.poll_interval, options.max_backoff),
            source,
            options,
            view_tx,
            commands_tx,
        }
    }

    async fn run(
        mut self,
        mut push: Option<PushStream>,
        mut commands: mpsc::Receiver<Command>,
        mut stop_rx: watch::Receiver<bool>,
    ) -> TelemetryStore {
        info!("Session started for {}", self.source.description());

        let start = tokio::time::Instant::now();
        let mut stats_timer = tokio::time::interval_at(
            start + self.options.stats_interval,
            self.options.stats_interval,
        );
        stats_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut traffic_timer = tokio::time::interval_at(
            start + self.options.traffic_interval,
            self.options.traffic_interval,
        );
        traffic_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut next_poll: Option<Instant> = Some(now());
        let mut in_flight: Option<PollTask> = None;

        loop {
            tokio::select! {
                _ = sleep_until(next_poll) => {
                    next_poll = None;
                    in_flight = Some(self.spawn_poll());
                }
                result = join_poll(&mut in_flight) => {
                    in_flight = None;
                    let delay = self.finish_poll(result);
                    next_poll = Some(now() + delay);
                }
                _ = sleep_until(self.scheduler.next_deadline()) => {
                    let expired = self.scheduler.expire(now());
                    if !expired.is_empty() {
                        self.publish();
                    }
                }
                _ = stats_timer.tick() => {
                    let views = self.store.entity_views();
                    let sample = WindowSample::observe(&self.store, &views, &self.traffic_log);
                    self.stats.record(sample);
                    self.publish();
                }
                _ = traffic_timer.tick() => {
                    let targets = self.store.names();
                    if self.scheduler.tick(now(), &targets).is_some() {
                        self.publish();
                    }
                }
                event = recv_push(&mut push) => match event {
                    Some(event) => self.handle_push(event),
                    None => {
                        warn!("Push channel finished");
                        push = None;
                    }
                },
                Some(command) = commands.recv() => {
                    if let Some(task) = self.handle_command(command, in_flight.is_some()) {
                        next_poll = None;
                        in_flight = Some(task);
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }

        if let Some(task) = in_flight.take() {
            task.abort();
        }
        if let Some(mut stream) = push.take() {
            stream.close();
        }
        let cancelled = self.scheduler.stop();
        self.publish();
        info!(
            "Session stopped for {} ({} servers kept, {} traffic removals cancelled)",
            self.source.description(),
            self.store.len(),
            cancelled
        );

        self.store
    }

    fn spawn_poll(&self) -> PollTask {
        let source = self.source.clone();
        tokio::spawn(async move { source.fetch().await })
    }

    /// Apply a finished poll. Returns the delay before the next one.
    fn finish_poll(&mut self, result: Result<Result<PollBatch, SyncError>, JoinError>) -> Duration {
        let result = result
            .unwrap_or_else(|e| Err(SyncError::Http(format!("poll task failed: {}", e))));

        match result {
            Ok(batch) => {
                let now = now();
                let report = self.store.apply_snapshot(&batch.entities, now);
                self.store.apply_summary(&batch.summary, Channel::Poll, now);
                if batch.dropped > 0 {
                    warn!("Dropped {} malformed server records", batch.dropped);
                }
                if self.backoff.failures() > 0 {
                    info!("Backend reachable again after {} failed polls", self.backoff.failures());
                }
                debug!(
                    "Poll applied {} servers ({} new)",
                    report.applied, report.created
                );
                self.backoff.reset();
                self.publish();
                self.options.poll_interval
            }
            Err(e) if !e.is_transient() => {
                // Backend is reachable; keep the regular cadence
                warn!(
                    "Poll of {} returned unusable data: {} (retrying in {:?})",
                    self.source.description(),
                    e,
                    self.options.poll_interval
                );
                self.publish();
                self.options.poll_interval
            }
            Err(e) => {
                let delay = self.backoff.fail();
                warn!(
                    "Poll of {} failed: {} (retrying in {:?})",
                    self.source.description(),
                    e,
                    delay
                );
                self.publish();
                delay
            }
        }
    }

    fn handle_push(&mut self, event: PushEvent) {
        let now = now();
        match event {
            PushEvent::Connected => {
                info!("Push channel connected");
                self.store.mark_contact(now);
            }
            PushEvent::Disconnected(reason) => {
                warn!("Push channel disconnected: {}", reason);
            }
            PushEvent::Message(PushMessage::Stats(batch)) => {
                for delta in &batch.entities {
                    if self.store.apply_event(delta, now) {
                        debug!("Push introduced server {}", delta.name);
                    }
                }
                self.store.apply_summary(&batch.summary, Channel::Push, now);
                if batch.dropped > 0 {
                    warn!("Dropped {} malformed pushed records", batch.dropped);
                }
            }
            PushEvent::Message(PushMessage::Traffic { records, dropped }) => {
                for record in records {
                    self.traffic_log.push(record);
                }
                if dropped > 0 {
                    warn!("Dropped {} malformed traffic records", dropped);
                }
                self.store.mark_contact(now);
            }
            PushEvent::Message(PushMessage::Ignored) => return,
        }
        self.publish();
    }

    /// Returns a poll task to track if the command started one.
    fn handle_command(&mut self, command: Command, polling: bool) -> Option<PollTask> {
        match command {
            Command::Refresh if polling => {
                debug!("Refresh ignored: a poll is already in flight");
                None
            }
            Command::Refresh => {
                debug!("Refresh requested");
                Some(self.spawn_poll())
            }
            Command::SetAlgorithm { algorithm, reply } => {
                info!("Requesting algorithm switch to {}", algorithm);
                let source = self.source.clone();
                let commands = self.commands_tx.clone();
                tokio::spawn(async move {
                    let result = source.set_algorithm(algorithm).await;
                    let _ = commands
                        .send(Command::AlgorithmSwitched { result, reply })
                        .await;
                });
                None
            }
            Command::AlgorithmSwitched { result, reply } => {
                match &result {
                    Ok(name) => {
                        info!("Algorithm switched to {}", name);
                        self.store.set_algorithm(name.clone());
                        self.publish();
                    }
                    Err(e) => warn!("Algorithm switch failed: {}", e),
                }
                let _ = reply.send(result);
                None
            }
        }
    }

    fn publish(&self) {
        let traffic = self.scheduler.active().cloned().collect();
        let view = FleetView::build(&self.store, self.stats.snapshot(), traffic, now());
        self.view_tx.send_replace(Arc::new(view));
    }
}

/// Current time on the runtime clock, so a paused test clock applies.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

async fn join_poll(task: &mut Option<PollTask>) -> Result<Result<PollBatch, SyncError>, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn recv_push(push: &mut Option<PushStream>) -> Option<PushEvent> {
    match push {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleetwatch_types::{Algorithm, EntitySnapshot, FleetSummary};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory poll source. `None` makes fetches fail.
    #[derive(Debug, Default)]
    struct MockSource {
        batch: Mutex<Option<PollBatch>>,
        fetches: AtomicUsize,
        latency: Duration,
        malformed: AtomicBool,
    }

    impl MockSource {
        fn serving(names: &[&str]) -> Arc<Self> {
            let source = Arc::new(Self::default());
            source.set(Some(batch(names)));
            source
        }

        fn set(&self, batch: Option<PollBatch>) {
            *self.batch.lock().unwrap() = batch;
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PollSource for MockSource {
        async fn fetch(&self) -> Result<PollBatch, SyncError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.malformed.load(Ordering::SeqCst) {
                return Err(SyncError::Parse("expected an object".to_string()));
            }
            self.batch
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| SyncError::Connection("refused".to_string()))
        }

        async fn set_algorithm(&self, algorithm: Algorithm) -> Result<String, SyncError> {
            match algorithm {
                Algorithm::Random => Err(SyncError::Rejected("disabled".to_string())),
                other => Ok(other.to_string()),
            }
        }

        fn description(&self) -> &str {
            "mock"
        }
    }

    fn batch(names: &[&str]) -> PollBatch {
        PollBatch {
            summary: FleetSummary {
                total_requests: Some(100),
                algorithm: Some("round_robin".to_string()),
                ..FleetSummary::default()
            },
            entities: names
                .iter()
                .map(|name| EntitySnapshot::new(*name).cpu_usage(20.0).healthy(true))
                .collect(),
            dropped: 0,
        }
    }

    fn start(source: Arc<MockSource>) -> SessionHandle {
        Session::new(source, SessionOptions {
            seed: Some(1),
            ..SessionOptions::default()
        })
        .start()
    }

    async fn advance(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_is_immediate() {
        let source = MockSource::serving(&["s1", "s2"]);
        let handle = start(source.clone());

        advance(Duration::from_millis(10)).await;

        let view = handle.view();
        assert_eq!(source.fetches(), 1);
        assert_eq!(view.names(), vec!["s1", "s2"]);
        assert!(view.connected);
        assert_eq!(view.algorithm.as_deref(), Some("round_robin"));
    }

    #[tokio::test(start_paused = true)]
    async fn polls_follow_interval() {
        let source = MockSource::serving(&["s1"]);
        let _handle = start(source.clone());

        advance(Duration::from_millis(11_000)).await;
        // t = 0, 5, 10
        assert_eq!(source.fetches(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off() {
        let source = Arc::new(MockSource::default());
        let _handle = start(source.clone());

        advance(Duration::from_secs(36)).await;
        // t = 0, 5, 15, 35
        assert_eq!(source.fetches(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_replies_keep_regular_cadence() {
        let source = MockSource::serving(&["s1"]);
        source.malformed.store(true, Ordering::SeqCst);
        let _handle = start(source.clone());

        advance(Duration::from_secs(16)).await;
        // t = 0, 5, 10, 15; a refused connection would back off to 0, 5, 15
        assert_eq!(source.fetches(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_polls_now() {
        let source = MockSource::serving(&["s1"]);
        let handle = start(source.clone());

        advance(Duration::from_secs(1)).await;
        handle.refresh().await.unwrap();
        advance(Duration::from_millis(10)).await;

        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn one_poll_in_flight() {
        let source = Arc::new(MockSource {
            latency: Duration::from_secs(3),
            ..MockSource::default()
        });
        source.set(Some(batch(&["s1"])));
        let handle = start(source.clone());

        advance(Duration::from_millis(100)).await;
        handle.refresh().await.unwrap();
        handle.refresh().await.unwrap();
        advance(Duration::from_millis(100)).await;

        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_keeps_last_known_state() {
        let source = MockSource::serving(&["s1"]);
        let handle = start(source.clone());

        advance(Duration::from_millis(10)).await;
        source.set(None);
        advance(Duration::from_secs(16)).await;

        let view = handle.view();
        assert!(!view.connected);
        assert_eq!(view.names(), vec!["s1"]);
        assert_eq!(view.entity("s1").unwrap().entity.cpu_usage, 20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn servers_missing_from_polls_go_stale() {
        let source = MockSource::serving(&["s1", "s2"]);
        let handle = start(source.clone());

        advance(Duration::from_millis(10)).await;
        source.set(Some(batch(&["s1"])));
        advance(Duration::from_secs(15)).await;

        let view = handle.view();
        assert!(view.entity("s2").unwrap().stale);
        assert!(!view.entity("s1").unwrap().stale);
        assert_eq!(view.counts.stale, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn traffic_events_expire() {
        let source = MockSource::serving(&["s1", "s2", "s3"]);
        let handle = start(source.clone());

        // Ticks at 0.5, 1.0, 1.5, 2.0; first removal due at 2.5
        advance(Duration::from_millis(2100)).await;
        assert_eq!(handle.view().traffic.len(), 4);

        advance(Duration::from_millis(500)).await;
        let view = handle.view();
        assert_eq!(view.traffic.len(), 4);
        assert!(view.traffic.iter().all(|e| e.id >= 2));
    }

    #[tokio::test(start_paused = true)]
    async fn no_traffic_without_servers() {
        let source = Arc::new(MockSource::default());
        let handle = start(source);

        advance(Duration::from_secs(3)).await;
        assert!(handle.view().traffic.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stats_window_fills_once_per_second() {
        let source = MockSource::serving(&["s1"]);
        let handle = start(source);

        advance(Duration::from_millis(3500)).await;
        let view = handle.view();
        assert_eq!(view.stats.requests_per_second.len(), 3);
        assert_eq!(view.stats.efficiency_percent, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn push_updates_apply_in_order() {
        let source = MockSource::serving(&["s1"]);
        let (tx, rx) = mpsc::channel::<Vec<u8>>(16);
        let handle = Session::new(source, SessionOptions::default())
            .with_push(PushStream::from_bytes_channel(rx, "test"))
            .start();

        advance(Duration::from_millis(10)).await;
        tx.send(
            br#"{"type":"stats_update","payload":{"server_stats":[{"name":"s1","cpu_usage":90.0},{"name":"s9"}]}}"#
                .to_vec(),
        )
        .await
        .unwrap();
        tx.send(br#"{"type":"traffic_update","payload":{"server":"s1","success":false}}"#.to_vec())
            .await
            .unwrap();
        advance(Duration::from_millis(1000)).await;

        let view = handle.view();
        let s1 = view.entity("s1").unwrap();
        assert_eq!(s1.entity.cpu_usage, 90.0);
        // Partial delta keeps the polled health signal
        assert!(s1.entity.healthy.as_bool().unwrap());
        assert_eq!(s1.channel, Channel::Push);
        assert!(view.entity("s9").is_some());
        assert_eq!(view.stats.latest.error_rate_percent, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn push_without_counter_keeps_rate_flat() {
        let source = MockSource::serving(&["s1"]);
        let (tx, rx) = mpsc::channel::<Vec<u8>>(16);
        let handle = Session::new(source, SessionOptions::default())
            .with_push(PushStream::from_bytes_channel(rx, "test"))
            .start();

        advance(Duration::from_millis(10)).await;
        tx.send(
            br#"{"type":"stats_update","payload":{"server_stats":[{"name":"s1","cpu_usage":30.0}]}}"#
                .to_vec(),
        )
        .await
        .unwrap();
        // Second poll at t = 5 reports the same counter
        advance(Duration::from_millis(6200)).await;

        let view = handle.view();
        assert_eq!(view.stats.requests_per_second.len(), 6);
        assert!(view.stats.requests_per_second.iter().all(|&rate| rate == 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_closes_push_channel() {
        let source = MockSource::serving(&["s1"]);
        let (tx, rx) = mpsc::channel::<Vec<u8>>(16);
        let handle = Session::new(source, SessionOptions::default())
            .with_push(PushStream::from_bytes_channel(rx, "test"))
            .start();

        advance(Duration::from_millis(10)).await;
        let store = handle.stop().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .expect("push reader still open after stop");
        let late = br#"{"type":"stats_update","payload":{"server_stats":[{"name":"s9"}]}}"#;
        assert!(tx.send(late.to_vec()).await.is_err());
        assert!(store.get_entity("s9").is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn set_algorithm_updates_label_only() {
        let source = MockSource::serving(&["s1"]);
        let handle = start(source);
        advance(Duration::from_millis(10)).await;
        let before = handle.view();

        let active = handle.set_algorithm("least_connections").await.unwrap();
        assert_eq!(active, "least_connections");

        let after = handle.view();
        assert_eq!(after.algorithm.as_deref(), Some("least_connections"));
        assert_eq!(after.entities, before.entities);
    }

    #[tokio::test(start_paused = true)]
    async fn set_algorithm_errors() {
        let source = MockSource::serving(&["s1"]);
        let handle = start(source);
        advance(Duration::from_millis(10)).await;

        assert!(matches!(
            handle.set_algorithm("fastest").await,
            Err(SyncError::InvalidAlgorithm(_))
        ));
        assert!(matches!(
            handle.set_algorithm("random").await,
            Err(SyncError::Rejected(_))
        ));
        assert_eq!(handle.view().algorithm.as_deref(), Some("round_robin"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_keeps_store_and_halts_timers() {
        let source = MockSource::serving(&["s1", "s2"]);
        let handle = start(source.clone());
        let views = handle.subscribe();

        advance(Duration::from_millis(1200)).await;
        let store = handle.stop().await.unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get_entity("s1").is_some());
        // Final view carries no in-flight traffic
        assert!(views.borrow().traffic.is_empty());

        let fetches = source.fetches();
        advance(Duration::from_secs(30)).await;
        assert_eq!(source.fetches(), fetches);
    }
}
