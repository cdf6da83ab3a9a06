use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;
use tracing::trace;

use super::MutexStore;
use super::Reason;
use super::Store;
use super::Strategy;

/// Per-client state of a [`FixedWindow`].
#[derive(Debug)]
pub struct WindowRecord {
    window_start: Instant,
    count: usize,
}

/// A simple window-based limiter.
///
/// Divides each client's time into fixed intervals, starting a new window at the first
/// request after the previous one expired. It is the cheapest strategy but can be
/// susceptible to "boundary bursts" where double the limit is allowed in a short period
/// spanning two windows.
#[derive(Debug)]
pub struct FixedWindow<S = MutexStore<WindowRecord>> {
    limit: usize,
    window: Duration,
    clients: S,
    clock: Clock,
}

impl FixedWindow {
    /// Creates a new `FixedWindow` strategy.
    ///
    /// # Arguments
    ///
    /// * `limit` - The maximum number of requests allowed per client within a single window.
    /// * `window` - The duration of the fixed time window.
    pub fn new(limit: NonZeroUsize, window: Duration) -> Self {
        Self::with_clock(limit, window, Clock::new())
    }

    pub fn with_clock(limit: NonZeroUsize, window: Duration, clock: Clock) -> Self {
        Self::with_store(limit, window, clock, MutexStore::new())
    }
}

impl<S: Store<WindowRecord>> FixedWindow<S> {
    pub fn with_store(limit: NonZeroUsize, window: Duration, clock: Clock, clients: S) -> Self {
        Self {
            limit: limit.get(),
            window,
            clients,
            clock,
        }
    }

    /// Number of distinct clients seen so far.
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Time until the window has strictly passed, which is when it rolls over.
    fn remaining(&self, record: &WindowRecord, now: Instant) -> Duration {
        self.window
            .saturating_sub(now.saturating_duration_since(record.window_start))
            .saturating_add(Duration::from_nanos(1))
    }
}

impl<S: Store<WindowRecord>> Strategy for FixedWindow<S> {
    fn process(&self, key: &str) -> ControlFlow<Reason> {
        let now = self.clock.now();

        self.clients.update_or_insert(
            key,
            || {
                trace!(key = %key, "tracking new client");
                WindowRecord {
                    window_start: now,
                    count: 0,
                }
            },
            |record| {
                let now = now.max(record.window_start);
                if now.saturating_duration_since(record.window_start) > self.window {
                    record.window_start = now;
                    record.count = 0;
                }

                if record.count < self.limit {
                    record.count += 1;
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(Reason::Overloaded {
                        retry_after: self.remaining(record, now),
                    })
                }
            },
        )
    }

    fn retry_after(&self, key: &str) -> Duration {
        let now = self.clock.now();

        self.clients
            .update(key, |record| {
                let now = now.max(record.window_start);
                let expired = now.saturating_duration_since(record.window_start) > self.window;
                if expired || record.count < self.limit {
                    Duration::ZERO
                } else {
                    self.remaining(record, now)
                }
            })
            .unwrap_or_default()
    }

    fn name(&self) -> &'static str {
        "fixed_window"
    }
}
