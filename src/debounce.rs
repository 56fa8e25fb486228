//! Debounced execution for bursty callers such as filter inputs.
//!
//! Each call waits out the delay; only a call that is still the latest when
//! its delay ends goes on to run. Superseded calls resolve to `None`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    generation: AtomicU64,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_DELAY)
    }
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: AtomicU64::new(0),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `f` after the delay unless a newer call arrives first.
    pub async fn run<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ticket = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tokio::time::sleep(self.delay).await;

        if self.generation.load(Ordering::Acquire) != ticket {
            log::debug!("Debouncer: call {} superseded", ticket);
            return None;
        }
        Some(f().await)
    }

    /// Supersede every pending call without starting a new one.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}
