use std::collections::VecDeque;
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

/// Admission instants of one client inside the trailing window, oldest first.
#[derive(Debug)]
pub struct TimestampLog {
    admitted: VecDeque<Instant>,
}

impl TimestampLog {
    fn with_capacity(limit: usize) -> Self {
        Self {
            // Large limits grow on demand
            admitted: VecDeque::with_capacity(limit.min(64)),
        }
    }

    /// Drops every entry that is at least `window` old.
    fn trim(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.admitted.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn latest(&self) -> Option<Instant> {
        self.admitted.back().copied()
    }
}

/// A Sliding Window Log implementation.
///
/// It remembers the instant of every admitted request inside the trailing window, which
/// gives an exact rolling count with no boundary bursts. Memory per client is proportional
/// to the limit.
#[derive(Debug)]
pub struct SlidingWindow<S = MutexStore<TimestampLog>> {
    limit: usize,
    window: Duration,
    clients: S,
    clock: Clock,
}

impl SlidingWindow {
    pub fn new(limit: NonZeroUsize, window: Duration) -> Self {
        Self::with_clock(limit, window, Clock::new())
    }

    pub fn with_clock(limit: NonZeroUsize, window: Duration, clock: Clock) -> Self {
        Self::with_store(limit, window, clock, MutexStore::new())
    }
}

impl<S: Store<TimestampLog>> SlidingWindow<S> {
    pub fn with_store(limit: NonZeroUsize, window: Duration, clock: Clock, clients: S) -> Self {
        Self {
            limit: limit.get(),
            window,
            clients,
            clock,
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Time until the oldest entry leaves the window. Only meaningful when the log is full.
    fn until_oldest_expires(&self, log: &TimestampLog, now: Instant) -> Duration {
        log.admitted
            .front()
            .map(|oldest| {
                self.window
                    .saturating_sub(now.saturating_duration_since(*oldest))
            })
            .unwrap_or_default()
    }
}

impl<S: Store<TimestampLog>> Strategy for SlidingWindow<S> {
    #[inline]
    fn process(&self, key: &str) -> ControlFlow<Reason> {
        let now = self.clock.now();

        self.clients.update_or_insert(
            key,
            || {
                trace!(key = %key, "tracking new client");
                TimestampLog::with_capacity(self.limit)
            },
            |log| {
                // Keep the log sorted even if a caller read the clock before a later one
                // but acquired the record after it.
                let now = log.latest().map_or(now, |latest| now.max(latest));
                log.trim(now, self.window);

                if log.admitted.len() < self.limit {
                    log.admitted.push_back(now);
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(Reason::Overloaded {
                        retry_after: self.until_oldest_expires(log, now),
                    })
                }
            },
        )
    }

    fn retry_after(&self, key: &str) -> Duration {
        let now = self.clock.now();

        self.clients
            .update(key, |log| {
                let now = log.latest().map_or(now, |latest| now.max(latest));
                log.trim(now, self.window);

                if log.admitted.len() < self.limit {
                    Duration::ZERO
                } else {
                    self.until_oldest_expires(log, now)
                }
            })
            .unwrap_or_default()
    }

    fn name(&self) -> &'static str {
        "sliding_window"
    }
}
