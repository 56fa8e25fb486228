//! Polling data cache.
//!
//! A `PollingCache` runs a producer once immediately and then on a fixed
//! interval, publishing `{data, error, is_loading}` through a watch channel
//! that views subscribe to. One driver task owns the schedule:
//!
//! - invocations never overlap; a tick that comes due while one is
//!   outstanding is skipped
//! - `refetch()` wakes the driver; any number of calls made during an
//!   invocation collapse into a single follow-up run
//! - after `dispose()` (or drop) nothing touches the state again, and an
//!   outstanding invocation finishes on its own with its result discarded

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{ApiError, ErrorInfo};
use crate::types::ClientConfig;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(30_000);

/// Snapshot of one cache's lifecycle, what a view renders from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchState<T> {
    /// Last successful result; kept across later failures.
    pub data: Option<T>,
    /// Most recent failure, cleared by the next success.
    pub error: Option<ErrorInfo>,
    pub is_loading: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub completed_fetches: u64,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: true,
            last_updated: None,
            completed_fetches: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    /// Upper bound on one invocation; `None` waits as long as the producer does.
    pub fetch_timeout: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            fetch_timeout: None,
        }
    }
}

impl PollOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            fetch_timeout: Some(Duration::from_secs(config.fetch_timeout_secs)),
        }
    }
}

struct Shared<T> {
    id: String,
    state: watch::Sender<FetchState<T>>,
    wake: Notify,
    disposed: Mutex<bool>,
}

impl<T> Shared<T> {
    /// Apply `f` unless the cache was disposed. Holding the lock across the
    /// write keeps `dispose()` from interleaving with it.
    fn update(&self, f: impl FnOnce(&mut FetchState<T>)) -> bool {
        let disposed = self.disposed.lock();
        if *disposed {
            return false;
        }
        self.state.send_modify(f);
        true
    }

    fn is_disposed(&self) -> bool {
        *self.disposed.lock()
    }
}

pub struct PollingCache<T> {
    shared: Arc<Shared<T>>,
    driver: JoinHandle<()>,
}

impl<T> PollingCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start polling `producer` every `interval`, beginning now.
    pub fn start<F, Fut>(producer: F, interval: Duration) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        Self::start_with(
            producer,
            PollOptions {
                interval,
                ..PollOptions::default()
            },
        )
    }

    pub fn start_with<F, Fut>(producer: F, options: PollOptions) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let (state, _) = watch::channel(FetchState::default());
        let shared = Arc::new(Shared {
            id: uuid::Uuid::new_v4().to_string(),
            state,
            wake: Notify::new(),
            disposed: Mutex::new(false),
        });

        log::debug!(
            "PollingCache {}: started (interval {:?}, fetch timeout {:?})",
            shared.id,
            options.interval,
            options.fetch_timeout
        );
        let driver = tokio::spawn(drive(shared.clone(), Arc::new(producer), options));

        Self { shared, driver }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Ask for an invocation now. Coalesced with any other pending request.
    pub fn refetch(&self) {
        if self.shared.is_disposed() {
            return;
        }
        log::debug!("PollingCache {}: manual refetch", self.shared.id);
        self.shared.wake.notify_one();
    }

    pub fn snapshot(&self) -> FetchState<T> {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.shared.state.subscribe()
    }

    /// Wait for the next invocation to settle and return the resulting state.
    pub async fn wait_for_settle(&self) -> FetchState<T> {
        let seen = self.shared.state.borrow().completed_fetches;
        self.wait_for_fetches(seen + 1).await
    }

    /// Wait until at least `count` invocations have settled.
    ///
    /// Returns the current state right away once the cache is disposed.
    pub async fn wait_for_fetches(&self, count: u64) -> FetchState<T> {
        let mut rx = self.shared.state.subscribe();
        loop {
            let disposed = self.shared.is_disposed();
            {
                let state = rx.borrow_and_update();
                if state.completed_fetches >= count || disposed {
                    return state.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }

    /// Stop polling. The state is frozen from here on.
    pub fn dispose(&self) {
        {
            let mut disposed = self.shared.disposed.lock();
            if *disposed {
                return;
            }
            *disposed = true;
        }
        // The invocation itself runs in its own task and is not cancelled.
        self.driver.abort();
        // Wake waiters blocked in `wait_for_fetches`; the value is left as is.
        self.shared.state.send_modify(|_| {});
        log::debug!("PollingCache {}: disposed", self.shared.id);
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }
}

impl<T> Drop for PollingCache<T> {
    fn drop(&mut self) {
        *self.shared.disposed.lock() = true;
        self.driver.abort();
    }
}

async fn drive<T, F, Fut>(shared: Arc<Shared<T>>, producer: Arc<F>, options: PollOptions)
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
    let interval = options.interval.max(Duration::from_millis(1));
    let mut next_tick = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(next_tick) => {
                next_tick += interval;
            },
            _ = shared.wake.notified() => {},
        }
        if shared.is_disposed() {
            break;
        }

        invoke(&shared, producer.clone(), options.fetch_timeout).await;

        // Ticks that came due while the invocation was outstanding are dropped.
        let now = Instant::now();
        while next_tick <= now {
            log::debug!("PollingCache {}: skipped tick, previous fetch still running", shared.id);
            next_tick += interval;
        }
    }
}

async fn invoke<T, F, Fut>(shared: &Shared<T>, producer: Arc<F>, fetch_timeout: Option<Duration>)
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
    if !shared.update(|state| state.is_loading = true) {
        return;
    }

    let task = tokio::spawn(async move {
        let fetch = producer();
        match fetch_timeout {
            Some(limit) => match tokio::time::timeout(limit, fetch).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout(limit)),
            },
            None => fetch.await,
        }
    });

    let outcome = match task.await {
        Ok(Ok(data)) => Ok(data),
        Ok(Err(e)) => {
            log::warn!("PollingCache {}: fetch failed: {}", shared.id, e);
            Err(ErrorInfo::from(&e))
        }
        Err(join_err) if join_err.is_panic() => {
            let message = panic_message(join_err.into_panic());
            log::error!("PollingCache {}: producer panicked: {}", shared.id, message);
            Err(ErrorInfo::panicked(message))
        }
        Err(_) => Err(ErrorInfo::from(ApiError::Cancelled)),
    };

    let applied = shared.update(|state| {
        match outcome {
            Ok(data) => {
                state.data = Some(data);
                state.error = None;
            }
            Err(info) => state.error = Some(info),
        }
        state.is_loading = false;
        state.last_updated = Some(Utc::now());
        state.completed_fetches += 1;
    });
    if !applied {
        log::debug!("PollingCache {}: discarded result that settled after disposal", shared.id);
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "producer panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts invocations and the peak number running at once.
    #[derive(Default)]
    struct Probe {
        started: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Probe {
        fn enter(&self) -> usize {
            let n = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(n, Ordering::SeqCst);
            self.started.fetch_add(1, Ordering::SeqCst)
        }

        fn exit(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    type BoxedFetch<T> = std::pin::Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send>>;

    fn slow_counter(probe: Arc<Probe>, delay: Duration) -> impl Fn() -> BoxedFetch<u64> + Send + Sync + 'static {
        move || -> BoxedFetch<u64> {
            let probe = probe.clone();
            Box::pin(async move {
                let n = probe.enter();
                tokio::time::sleep(delay).await;
                probe.exit();
                Ok::<u64, ApiError>(n as u64)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state_is_loading() {
        let cache = PollingCache::start(|| async { Ok(1u32) }, Duration::from_secs(1));
        let state = cache.snapshot();
        assert!(state.is_loading);
        assert!(state.data.is_none());
        assert!(state.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolving_producer_clears_loading_and_error() {
        let cache = PollingCache::start(|| async { Ok("ok".to_string()) }, Duration::from_secs(1));

        for n in 1..=3 {
            let state = cache.wait_for_fetches(n).await;
            assert!(!state.is_loading);
            assert!(state.error.is_none());
            assert_eq!(state.data.as_deref(), Some("ok"));
            assert!(state.last_updated.is_some());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejecting_producer_sets_error_without_data() {
        let cache: PollingCache<u32> = PollingCache::start(
            || async {
                Err(ApiError::Status {
                    status: 500,
                    message: "boom".into(),
                    body: None,
                })
            },
            Duration::from_secs(1),
        );

        let state = cache.wait_for_fetches(1).await;
        assert!(!state.is_loading);
        assert!(state.data.is_none());
        let error = state.error.unwrap();
        assert_eq!(error.status, Some(500));
        assert!(error.can_retry);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_tick_replaces_data() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = PollingCache::start(
            move || {
                let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(serde_json::json!({ "value": value })) }
            },
            Duration::from_millis(1000),
        );

        let first = cache.wait_for_fetches(1).await;
        assert_eq!(first.data, Some(serde_json::json!({"value": 1})));

        let second = cache.wait_for_fetches(2).await;
        assert_eq!(second.data, Some(serde_json::json!({"value": 2})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_last_good_data() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = PollingCache::start(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok(10u32)
                    } else {
                        Err(ApiError::Timeout(Duration::from_secs(30)))
                    }
                }
            },
            Duration::from_millis(500),
        );

        cache.wait_for_fetches(1).await;
        let state = cache.wait_for_fetches(2).await;
        assert_eq!(state.data, Some(10));
        assert_eq!(state.error.unwrap().kind, ErrorKind::Transport);
        assert!(!state.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_failure_clears_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = PollingCache::start(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ApiError::NotAuthenticated)
                    } else {
                        Ok(n)
                    }
                }
            },
            Duration::from_millis(500),
        );

        assert!(cache.wait_for_fetches(1).await.error.is_some());
        let state = cache.wait_for_fetches(2).await;
        assert!(state.error.is_none());
        assert_eq!(state.data, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_freezes_state_and_lets_call_finish() {
        let probe = Arc::new(Probe::default());
        let cache = PollingCache::start(slow_counter(probe.clone(), Duration::from_millis(500)), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.started.load(Ordering::SeqCst), 1);
        let before = cache.snapshot();

        cache.dispose();
        assert!(cache.is_disposed());
        tokio::time::sleep(Duration::from_secs(5)).await;

        // The outstanding call ran to completion, but its result was dropped.
        assert_eq!(probe.active.load(Ordering::SeqCst), 0);
        assert_eq!(probe.started.load(Ordering::SeqCst), 1);
        assert_eq!(cache.snapshot(), before);
        assert_eq!(cache.snapshot().completed_fetches, 0);

        cache.refetch();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(probe.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_polling() {
        let probe = Arc::new(Probe::default());
        let cache = PollingCache::start(slow_counter(probe.clone(), Duration::ZERO), Duration::from_millis(100));
        cache.wait_for_fetches(2).await;
        drop(cache);

        let started = probe.started.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(probe.started.load(Ordering::SeqCst), started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_during_invocation_is_coalesced() {
        let probe = Arc::new(Probe::default());
        let cache = PollingCache::start(slow_counter(probe.clone(), Duration::from_millis(100)), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.refetch();
        cache.refetch();
        cache.refetch();

        let state = cache.wait_for_fetches(2).await;
        assert_eq!(state.data, Some(1));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(probe.started.load(Ordering::SeqCst), 2);
        assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
        assert_eq!(cache.snapshot().completed_fetches, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_while_idle_runs_immediately() {
        let probe = Arc::new(Probe::default());
        let cache = PollingCache::start(slow_counter(probe.clone(), Duration::ZERO), Duration::from_secs(60));
        cache.wait_for_fetches(1).await;

        cache.refetch();
        let state = cache.wait_for_settle().await;
        assert_eq!(state.completed_fetches, 2);
        assert_eq!(state.data, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_skipped_while_busy() {
        let probe = Arc::new(Probe::default());
        // Each call outlives two ticks.
        let _cache = PollingCache::start(slow_counter(probe.clone(), Duration::from_millis(250)), Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(1050)).await;

        // Runs start at 0, 300, 600 and 900 ms.
        assert_eq!(probe.started.load(Ordering::SeqCst), 4);
        assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_producer_becomes_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = PollingCache::start(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        panic!("bad payload");
                    }
                    Ok(n)
                }
            },
            Duration::from_millis(100),
        );

        let state = cache.wait_for_fetches(1).await;
        assert!(!state.is_loading);
        assert_eq!(state.error.unwrap().message, "bad payload");

        // Polling continues after the panic.
        let state = cache.wait_for_fetches(2).await;
        assert_eq!(state.data, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout() {
        let cache = PollingCache::start_with(
            || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(1u8)
            },
            PollOptions {
                interval: Duration::from_secs(30),
                fetch_timeout: Some(Duration::from_secs(1)),
            },
        );

        let state = cache.wait_for_fetches(1).await;
        let error = state.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Transport);
        assert!(error.message.contains("timed out"));
    }

    #[test]
    fn test_poll_options_from_config() {
        let config = ClientConfig {
            poll_interval_ms: 5_000,
            fetch_timeout_secs: 12,
            ..ClientConfig::default()
        };
        let options = PollOptions::from_config(&config);
        assert_eq!(options.interval, Duration::from_secs(5));
        assert_eq!(options.fetch_timeout, Some(Duration::from_secs(12)));
        assert_eq!(PollOptions::default().interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_fetch_state_serializes_camel_case() {
        let state: FetchState<u32> = FetchState::default();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["isLoading"], true);
        assert_eq!(json["completedFetches"], 0);
    }
}
