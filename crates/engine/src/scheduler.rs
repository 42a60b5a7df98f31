//! Polling loop: fetch → record → evaluate → notify.
//!
//! The fetch runs outside every lock. Recording and evaluation are
//! synchronous and never straddle an await, so a shutdown can only land
//! between cycles, never inside one. Notifications go out after the
//! registry has released its locks.

use crate::notifier::{dispatch, DispatchSummary, Notifier};
use crate::store::{persist_users, UserStore};
use crate::{AlertRegistry, HistoryError, HistoryStore};
use pricebot_core::{FiredAlert, TrackedAsset, UserId};
use pricebot_feeds::{FetchError, PriceSource};
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Exponential backoff for consecutive upstream failures.
///
/// The delay doubles with each attempt: 5s → 10s → 20s → ... and never
/// exceeds `max_delay`. With jitter enabled, up to 25% is added before
/// capping.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            jitter: true,
        }
    }

    /// Disable jitter (useful for testing).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        // 2^16 is far past any sane cap.
        let power = attempt.saturating_sub(1).min(16);
        let exponential = self.initial_delay.saturating_mul(1 << power);
        let capped = exponential.min(self.max_delay);

        if self.jitter {
            let jitter = capped.mul_f64(rand::thread_rng().gen::<f64>() * 0.25);
            (capped + jitter).min(self.max_delay)
        } else {
            capped
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(600))
    }
}

/// Configuration for the polling scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between successful polls.
    pub poll_interval: Duration,
    pub backoff: BackoffPolicy,
    /// Consecutive failures before a `Degraded` health event is emitted.
    pub degraded_after: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
            degraded_after: 5,
        }
    }
}

/// Where the scheduler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
    Backoff { attempt: u32 },
}

/// Service health transitions for an observability collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    /// The price feed failed `consecutive_failures` times in a row.
    Degraded {
        consecutive_failures: u32,
        last_error: String,
    },
    /// A poll succeeded after a degraded period.
    Recovered { after_failures: u32 },
}

/// Why a poll did not produce a sample.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Price fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    InvalidSample(#[from] HistoryError),
}

impl CycleError {
    /// Whether retrying can be expected to help.
    pub fn is_transient(&self) -> bool {
        match self {
            CycleError::Fetch(e) => e.is_transient(),
            CycleError::InvalidSample(_) => true,
        }
    }

    fn retry_floor(&self) -> Option<Duration> {
        match self {
            CycleError::Fetch(e) => e.suggested_retry_delay(),
            CycleError::InvalidSample(_) => None,
        }
    }
}

/// Result of one successful poll.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub price: f64,
    /// Alerts that matched; empty for the very first sample.
    pub fired: Vec<FiredAlert>,
    pub dispatch: DispatchSummary,
}

/// Drives the poll cycle for one asset.
pub struct PollingScheduler {
    asset: TrackedAsset,
    config: SchedulerConfig,
    source: Arc<dyn PriceSource>,
    history: Arc<HistoryStore>,
    registry: Arc<AlertRegistry>,
    notifier: Arc<dyn Notifier>,
    store: Option<Arc<dyn UserStore>>,
    health_tx: Option<mpsc::Sender<HealthEvent>>,
    state: SchedulerState,
    consecutive_failures: u32,
    degraded: bool,
}

impl PollingScheduler {
    pub fn new(
        asset: TrackedAsset,
        config: SchedulerConfig,
        source: Arc<dyn PriceSource>,
        history: Arc<HistoryStore>,
        registry: Arc<AlertRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            asset,
            config,
            source,
            history,
            registry,
            notifier,
            store: None,
            health_tx: None,
            state: SchedulerState::Idle,
            consecutive_failures: 0,
            degraded: false,
        }
    }

    /// Persist users touched by fired alerts.
    pub fn with_store(mut self, store: Arc<dyn UserStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Emit health transitions on `tx`.
    pub fn with_health_events(mut self, tx: mpsc::Sender<HealthEvent>) -> Self {
        self.health_tx = Some(tx);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run one poll cycle. A failed fetch or invalid sample touches neither
    /// the history nor the registry.
    pub async fn poll_once(&mut self) -> Result<CycleReport, CycleError> {
        self.state = SchedulerState::Polling;

        let sample = self.source.fetch_price(&self.asset).await?;
        let outcome = self.history.record(sample)?;

        let fired = match outcome.previous {
            Some(_) if !outcome.is_newest => {
                warn!(
                    price = sample.value(),
                    timestamp = %sample.timestamp(),
                    "Sample older than the newest recorded one, skipping evaluation"
                );
                Vec::new()
            }
            Some(previous) => self
                .registry
                .evaluate(previous, sample.value(), sample.timestamp()),
            None => {
                debug!(price = sample.value(), "First sample recorded, nothing to compare");
                Vec::new()
            }
        };

        if let Some(store) = &self.store {
            let touched: BTreeSet<UserId> = fired.iter().map(|f| f.user_id()).collect();
            persist_users(store.as_ref(), &self.registry, touched).await;
        }

        let summary = dispatch(self.notifier.as_ref(), &self.asset, &fired).await;

        Ok(CycleReport {
            price: sample.value(),
            fired,
            dispatch: summary,
        })
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    ///
    /// The first poll starts immediately. An in-flight poll always finishes
    /// before the loop exits.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            asset = %self.asset,
            source = self.source.name(),
            interval_secs = self.config.poll_interval.as_secs(),
            "Polling scheduler started"
        );

        let mut delay = Duration::ZERO;
        loop {
            if wait_or_shutdown(delay, &mut shutdown).await {
                break;
            }

            delay = match self.poll_once().await {
                Ok(report) => {
                    self.on_success(&report);
                    self.config.poll_interval
                }
                Err(e) => self.on_failure(&e),
            };
        }

        self.state = SchedulerState::Idle;
        info!("Polling scheduler stopped");
    }

    fn on_success(&mut self, report: &CycleReport) {
        debug!(
            price = report.price,
            fired = report.fired.len(),
            delivered = report.dispatch.delivered,
            "Poll complete"
        );

        if self.degraded {
            info!(
                after_failures = self.consecutive_failures,
                "Price feed recovered"
            );
            self.emit(HealthEvent::Recovered {
                after_failures: self.consecutive_failures,
            });
        }
        self.degraded = false;
        self.consecutive_failures = 0;
        self.state = SchedulerState::Idle;
    }

    fn on_failure(&mut self, err: &CycleError) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let attempt = self.consecutive_failures;
        self.state = SchedulerState::Backoff { attempt };

        let mut delay = self.config.backoff.delay(attempt);
        if let Some(floor) = err.retry_floor() {
            delay = delay.max(floor);
        }

        if err.is_transient() {
            warn!(
                error = %err,
                attempt = attempt,
                retry_in_secs = delay.as_secs_f64(),
                "Poll failed, backing off"
            );
        } else {
            // Still retried, but unlikely to fix itself.
            error!(
                error = %err,
                attempt = attempt,
                retry_in_secs = delay.as_secs_f64(),
                "Poll failed with non-transient error"
            );
        }

        if !self.degraded && attempt >= self.config.degraded_after {
            self.degraded = true;
            error!(consecutive_failures = attempt, "Price feed degraded");
            self.emit(HealthEvent::Degraded {
                consecutive_failures: attempt,
                last_error: err.to_string(),
            });
        }

        delay
    }

    fn emit(&self, event: HealthEvent) {
        if let Some(tx) = &self.health_tx {
            if let Err(e) = tx.try_send(event) {
                warn!("Failed to send health event: {}", e);
            }
        }
    }
}

/// Sleep for `delay`, returning true as soon as shutdown is requested.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::DeliveryError;
    use crate::HistoryConfig;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use pricebot_core::{Direction, PriceSample};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed script of prices and failures.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<f64, FetchError>>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<f64, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl PriceSource for ScriptedSource {
        async fn fetch_price(&self, _asset: &TrackedAsset) -> Result<PriceSample, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(value)) => Ok(PriceSample::now(value)),
                Some(Err(e)) => Err(e),
                None => Err(FetchError::Network("script exhausted".to_string())),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(UserId, String)>>,
        fail_for: Option<UserId>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, user_id: UserId, message: &str) -> Result<(), DeliveryError> {
            if self.fail_for == Some(user_id) {
                return Err(DeliveryError::Failed {
                    user_id,
                    reason: "bot was blocked by the user".to_string(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((user_id, message.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        history: Arc<HistoryStore>,
        registry: Arc<AlertRegistry>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture(notifier: RecordingNotifier) -> Fixture {
        Fixture {
            history: Arc::new(HistoryStore::new(HistoryConfig::default())),
            registry: Arc::new(AlertRegistry::default()),
            notifier: Arc::new(notifier),
        }
    }

    fn scheduler(fx: &Fixture, source: Arc<ScriptedSource>, config: SchedulerConfig) -> PollingScheduler {
        PollingScheduler::new(
            TrackedAsset::worldcoin(),
            config,
            source,
            fx.history.clone(),
            fx.registry.clone(),
            fx.notifier.clone(),
        )
    }

    fn fast_config(degraded_after: u32) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(60),
            backoff: BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(600))
                .without_jitter(),
            degraded_after,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::default().without_jitter();
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(2), Duration::from_secs(10));
        assert_eq!(policy.delay(3), Duration::from_secs(20));
        assert_eq!(policy.delay(8), Duration::from_secs(600));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn test_backoff_jitter_stays_within_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 1..12 {
            let base = policy.clone().without_jitter().delay(attempt);
            let delay = policy.delay(attempt);
            assert!(delay >= base);
            assert!(delay <= Duration::from_secs(600));
        }
    }

    #[tokio::test]
    async fn test_first_poll_records_without_evaluating() {
        let fx = fixture(RecordingNotifier::default());
        fx.registry.set_tracking(UserId(1), true);
        let mut sched = scheduler(&fx, ScriptedSource::new(vec![Ok(2.0)]), fast_config(5));

        let report = sched.poll_once().await.unwrap();
        assert_eq!(report.price, 2.0);
        assert!(report.fired.is_empty());
        assert_eq!(fx.history.current_price(), Ok(2.0));
        assert_eq!(fx.registry.user_state(UserId(1)).unwrap().last_notified_price, None);
    }

    #[tokio::test]
    async fn test_failed_fetch_touches_nothing() {
        let fx = fixture(RecordingNotifier::default());
        let mut sched = scheduler(
            &fx,
            ScriptedSource::new(vec![Err(FetchError::Timeout("10s".into()))]),
            fast_config(5),
        );

        assert!(matches!(sched.poll_once().await, Err(CycleError::Fetch(_))));
        assert!(fx.history.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_sample_is_a_failure() {
        let fx = fixture(RecordingNotifier::default());
        let mut sched = scheduler(&fx, ScriptedSource::new(vec![Ok(0.0)]), fast_config(5));

        assert!(matches!(
            sched.poll_once().await,
            Err(CycleError::InvalidSample(HistoryError::InvalidSample(_)))
        ));
        assert!(fx.history.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_dispatches_fired_alerts() {
        let fx = fixture(RecordingNotifier::default());
        fx.registry.set_tracking(UserId(1), true);
        fx.registry
            .register_custom_alert(UserId(2), 2.5, Direction::Above)
            .unwrap();
        let mut sched = scheduler(
            &fx,
            ScriptedSource::new(vec![Ok(2.0), Ok(3.1)]),
            fast_config(5),
        );

        sched.poll_once().await.unwrap();
        let report = sched.poll_once().await.unwrap();
        assert_eq!(report.fired.len(), 2);
        assert_eq!(report.dispatch.delivered, 2);

        let sent = fx.notifier.sent.lock().unwrap();
        let mut users: Vec<UserId> = sent.iter().map(|(u, _)| *u).collect();
        users.sort();
        assert_eq!(users, vec![UserId(1), UserId(2)]);
    }

    #[tokio::test]
    async fn test_late_sample_is_recorded_but_not_evaluated() {
        let fx = fixture(RecordingNotifier::default());
        let id = fx
            .registry
            .register_custom_alert(UserId(1), 5.0, Direction::Above)
            .unwrap();
        // Newest recorded sample is ahead of the wall clock the source uses.
        let ahead = chrono::Utc::now() + chrono::Duration::minutes(30);
        fx.history.record(PriceSample::new(4.0, ahead)).unwrap();

        let mut sched = scheduler(&fx, ScriptedSource::new(vec![Ok(6.0)]), fast_config(5));
        let report = sched.poll_once().await.unwrap();

        assert!(report.fired.is_empty());
        assert_eq!(fx.history.len(), 2);
        assert_eq!(fx.history.current_price(), Ok(4.0));
        assert_eq!(fx.registry.list_alerts(UserId(1)).alerts[0].id, id);
        assert!(fx.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_alert_fired() {
        let fx = fixture(RecordingNotifier {
            fail_for: Some(UserId(1)),
            ..Default::default()
        });
        let id = fx
            .registry
            .register_custom_alert(UserId(1), 2.5, Direction::Above)
            .unwrap();
        fx.registry
            .register_custom_alert(UserId(2), 2.5, Direction::Above)
            .unwrap();
        let mut sched = scheduler(
            &fx,
            ScriptedSource::new(vec![Ok(2.0), Ok(3.0), Ok(2.0), Ok(3.0)]),
            fast_config(5),
        );

        sched.poll_once().await.unwrap();
        let report = sched.poll_once().await.unwrap();
        assert_eq!(report.dispatch.delivered, 1);
        assert_eq!(report.dispatch.failed, 1);

        // No re-notification on a later crossing.
        sched.poll_once().await.unwrap();
        let report = sched.poll_once().await.unwrap();
        assert!(report.fired.is_empty());
        assert!(fx.registry.cancel_alert(UserId(1), id).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_degraded_and_recovered() {
        let fx = fixture(RecordingNotifier::default());
        let source = ScriptedSource::new(vec![
            Err(FetchError::HttpStatus(502)),
            Err(FetchError::HttpStatus(502)),
            Err(FetchError::HttpStatus(502)),
            Ok(2.0),
        ]);
        let (health_tx, mut health_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sched = scheduler(&fx, source.clone(), fast_config(2)).with_health_events(health_tx);
        let handle = tokio::spawn(sched.run(shutdown_rx));

        assert_eq!(
            health_rx.recv().await,
            Some(HealthEvent::Degraded {
                consecutive_failures: 2,
                last_error: "Price fetch failed: Unexpected HTTP status: 502".to_string(),
            })
        );
        assert_eq!(
            health_rx.recv().await,
            Some(HealthEvent::Recovered { after_failures: 3 })
        );
        assert_eq!(fx.history.current_price(), Ok(2.0));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_poll() {
        let fx = fixture(RecordingNotifier::default());
        let source = ScriptedSource::new(vec![Ok(2.0)]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        scheduler(&fx, source.clone(), fast_config(5))
            .run(shutdown_rx)
            .await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(fx.history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_wait() {
        let fx = fixture(RecordingNotifier::default());
        let source = ScriptedSource::new(vec![Ok(2.0), Ok(2.1)]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(scheduler(&fx, source.clone(), fast_config(5)).run(shutdown_rx));

        // Let the first poll complete, then stop during the 60s wait.
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_shutdown_sender_stops_loop() {
        let fx = fixture(RecordingNotifier::default());
        let source = ScriptedSource::new(vec![Ok(2.0)]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(scheduler(&fx, source, fast_config(5)).run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(shutdown_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_state_and_reset() {
        let fx = fixture(RecordingNotifier::default());
        let mut sched = scheduler(
            &fx,
            ScriptedSource::new(vec![Err(FetchError::RateLimitExceeded), Ok(2.0)]),
            fast_config(5),
        );

        let err = sched.poll_once().await.unwrap_err();
        let delay = sched.on_failure(&err);
        assert_eq!(sched.state(), SchedulerState::Backoff { attempt: 1 });
        // Rate limiting asks for at least a minute.
        assert_eq!(delay, Duration::from_secs(60));

        let report = sched.poll_once().await.unwrap();
        sched.on_success(&report);
        assert_eq!(sched.state(), SchedulerState::Idle);
        assert_eq!(sched.consecutive_failures(), 0);
    }
}
