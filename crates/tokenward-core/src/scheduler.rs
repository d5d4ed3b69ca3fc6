//! Background access token refresh.
//!
//! `RefreshScheduler` owns at most one timer task. Every period the task
//! exchanges the refresh token for a new access token, so the token is
//! replaced before the server expires it. A failed exchange terminates the
//! session; a missing refresh token just skips the tick.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::{RefreshOutcome, TokenRefresher};
use crate::config::DEFAULT_REFRESH_INTERVAL_SECS;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS);

/// One refresh cycle, run on every timer tick.
pub trait Refresh: Clone + Send + Sync + 'static {
    fn refresh_now(&self) -> impl Future<Output = RefreshOutcome> + Send;
}

impl Refresh for TokenRefresher {
    fn refresh_now(&self) -> impl Future<Output = RefreshOutcome> + Send {
        TokenRefresher::refresh_now(self)
    }
}

pub struct RefreshScheduler<R: Refresh = TokenRefresher> {
    refresher: R,
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Refresh> RefreshScheduler<R> {
    pub fn new(refresher: R, period: Duration) -> Self {
        let period = if period.is_zero() {
            warn!("Refresh period of zero requested, using the default");
            DEFAULT_REFRESH_INTERVAL
        } else {
            period
        };

        Self {
            refresher,
            period,
            task: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start the timer. The first refresh happens one period from now.
    ///
    /// Returns `false` if it was already running. Must be called from within
    /// a tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Token refresh already running");
            return false;
        }

        let refresher = self.refresher.clone();
        let period = self.period;
        let first = Instant::now() + period;
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = refresher.refresh_now().await;
                debug!(?outcome, "Scheduled token refresh finished");
            }
        }));

        info!(period_secs = period.as_secs(), "Background token refresh started");
        true
    }

    /// Cancel the timer. Safe to call when not running.
    pub fn stop(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Background token refresh stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run one refresh cycle now, outside the timer.
    pub async fn tick(&self) -> RefreshOutcome {
        self.refresher.refresh_now().await
    }
}

impl<R: Refresh> Drop for RefreshScheduler<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const PERIOD: Duration = Duration::from_secs(60);

    #[derive(Clone, Default)]
    struct CountingRefresher {
        calls: Arc<AtomicUsize>,
    }

    impl CountingRefresher {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Refresh for CountingRefresher {
        fn refresh_now(&self) -> impl Future<Output = RefreshOutcome> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(RefreshOutcome::Rotated)
        }
    }

    /// Move the paused clock forward and let the timer task catch up
    async fn advance(by: Duration) {
        tokio::time::advance(by).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_refresh_one_period_after_start() {
        let refresher = CountingRefresher::default();
        let scheduler = RefreshScheduler::new(refresher.clone(), PERIOD);
        assert!(scheduler.start());

        advance(PERIOD - Duration::from_secs(1)).await;
        assert_eq!(refresher.calls(), 0);

        advance(Duration::from_secs(1)).await;
        assert_eq!(refresher.calls(), 1);

        advance(PERIOD).await;
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_keeps_one_timer() {
        let refresher = CountingRefresher::default();
        let scheduler = RefreshScheduler::new(refresher.clone(), PERIOD);
        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.is_running());

        for expected in 1..=3 {
            advance(PERIOD).await;
            assert_eq!(refresher.calls(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_safe_and_restartable() {
        let refresher = CountingRefresher::default();
        let scheduler = RefreshScheduler::new(refresher.clone(), PERIOD);
        scheduler.stop();
        assert!(!scheduler.is_running());

        assert!(scheduler.start());
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());

        advance(PERIOD * 3).await;
        assert_eq!(refresher.calls(), 0);

        assert!(scheduler.start());
        advance(PERIOD).await;
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_the_timer() {
        let refresher = CountingRefresher::default();
        {
            let scheduler = RefreshScheduler::new(refresher.clone(), PERIOD);
            assert!(scheduler.start());
        }

        advance(PERIOD * 3).await;
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycle_does_not_stack_ticks() {
        let refresher = CountingRefresher::default();
        let scheduler = RefreshScheduler::new(refresher.clone(), PERIOD);
        assert!(scheduler.start());

        // A single jump over several periods yields one catch-up tick, not a burst
        advance(PERIOD * 3).await;
        assert_eq!(refresher.calls(), 1);
    }

    #[test]
    fn test_zero_period_uses_default() {
        let scheduler = RefreshScheduler::new(CountingRefresher::default(), Duration::ZERO);
        assert_eq!(scheduler.period(), DEFAULT_REFRESH_INTERVAL);
    }
}
