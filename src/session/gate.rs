//! Single-flight refresh gate.
//!
//! At most one refresh is in flight. The first caller to find the gate idle
//! becomes the leader and holds a [`RefreshLease`]; everyone arriving while
//! the lease is held is parked in the [`PendingRequestQueue`] and receives
//! the leader's outcome. The queue is taken in one step when the lease
//! settles and every continuation is settled exactly once, in arrival order.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::RefreshFailure;

pub type RefreshOutcome = Result<String, RefreshFailure>;

type Continuation = oneshot::Sender<RefreshOutcome>;

/// Continuations parked while a refresh is in flight.
#[derive(Debug, Default)]
pub struct PendingRequestQueue {
    waiters: VecDeque<Continuation>,
}

impl PendingRequestQueue {
    fn push(&mut self) -> oneshot::Receiver<RefreshOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(tx);
        rx
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Settle every continuation front to back. Returns how many were delivered.
    fn settle_all(self, outcome: &RefreshOutcome) -> usize {
        let mut delivered = 0;
        for waiter in self.waiters {
            // A waiter whose caller went away is still settled; the send just has no reader.
            if waiter.send(outcome.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

#[derive(Debug)]
enum GateState {
    Idle,
    Refreshing(PendingRequestQueue),
}

/// Result of [`RefreshGate::acquire_or_wait`].
pub enum Acquire<'a> {
    /// A token fresher than the rejected one is already available.
    Fresh(String),
    /// Caller must run the refresh and settle the lease.
    Leader(RefreshLease<'a>),
    /// A refresh is in flight; await its outcome.
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

#[derive(Debug)]
pub struct RefreshGate {
    state: Mutex<GateState>,
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Idle),
        }
    }

    /// Become the refresh leader, or join the queue behind the current one.
    ///
    /// `fresh` is consulted only while idle, under the gate lock: when it
    /// yields a token, a refresh that already settled made the caller's
    /// rejection stale and no new refresh is started.
    pub fn acquire_or_wait(&self, fresh: impl FnOnce() -> Option<String>) -> Acquire<'_> {
        let mut state = self.state.lock();
        if let GateState::Refreshing(queue) = &mut *state {
            let rx = queue.push();
            log::debug!("RefreshGate: queued waiter ({} pending)", queue.len());
            return Acquire::Waiter(rx);
        }

        if let Some(token) = fresh() {
            return Acquire::Fresh(token);
        }
        *state = GateState::Refreshing(PendingRequestQueue::default());
        Acquire::Leader(RefreshLease {
            gate: self,
            settled: false,
        })
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock(), GateState::Refreshing(_))
    }

    pub fn pending(&self) -> usize {
        match &*self.state.lock() {
            GateState::Refreshing(queue) => queue.len(),
            GateState::Idle => 0,
        }
    }

    fn settle(&self, outcome: &RefreshOutcome) -> usize {
        let queue = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, GateState::Idle) {
                GateState::Refreshing(queue) => queue,
                GateState::Idle => PendingRequestQueue::default(),
            }
        };
        queue.settle_all(outcome)
    }
}

/// Proof of refresh leadership. Settling (or dropping) it returns the gate to idle.
pub struct RefreshLease<'a> {
    gate: &'a RefreshGate,
    settled: bool,
}

impl RefreshLease<'_> {
    /// Publish the refresh outcome to every queued waiter and hand it back to the leader.
    pub fn settle(mut self, outcome: RefreshOutcome) -> RefreshOutcome {
        self.settled = true;
        let delivered = self.gate.settle(&outcome);
        match &outcome {
            Ok(_) => log::info!("RefreshGate: refresh succeeded, released {} waiters", delivered),
            Err(failure) => log::warn!(
                "RefreshGate: refresh failed ({}), rejected {} waiters",
                failure,
                delivered
            ),
        }
        outcome
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Leader future dropped or panicked mid-refresh.
        let failure = RefreshFailure::new(None, "token refresh was cancelled");
        let delivered = self.gate.settle(&Err(failure));
        log::warn!("RefreshGate: lease dropped unsettled, rejected {} waiters", delivered);
    }
}
