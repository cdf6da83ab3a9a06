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
use super::UNBOUNDED;
use super::sanitize_rate;
use super::secs_to_retry;

/// Per-client state of a [`TokenBucket`].
#[derive(Debug)]
pub struct RefillRecord {
    tokens: f64,
    last_refill: Instant,
}

/// Continuously refilling token bucket.
///
/// Each client starts with a full bucket, so a burst up to `bucket_size` is admitted
/// immediately. Tokens then accrue fractionally at `refill_rate` per second and each
/// admitted request spends one.
#[derive(Debug)]
pub struct TokenBucket<S = MutexStore<RefillRecord>> {
    bucket_size: f64,
    refill_rate: f64,
    clients: S,
    clock: Clock,
}

impl TokenBucket {
    /// Creates a new `TokenBucket` strategy.
    ///
    /// # Arguments
    ///
    /// * `bucket_size` - The maximum number of tokens a client can hold.
    /// * `refill_rate` - Tokens added per second. Negative or NaN rates are treated as zero.
    pub fn new(bucket_size: NonZeroUsize, refill_rate: f64) -> Self {
        Self::with_clock(bucket_size, refill_rate, Clock::new())
    }

    pub fn with_clock(bucket_size: NonZeroUsize, refill_rate: f64, clock: Clock) -> Self {
        Self::with_store(bucket_size, refill_rate, clock, MutexStore::new())
    }
}

impl<S: Store<RefillRecord>> TokenBucket<S> {
    pub fn with_store(
        bucket_size: NonZeroUsize,
        refill_rate: f64,
        clock: Clock,
        clients: S,
    ) -> Self {
        Self {
            bucket_size: bucket_size.get() as f64,
            refill_rate: sanitize_rate(refill_rate),
            clients,
            clock,
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    fn refill(&self, record: &mut RefillRecord, now: Instant) {
        let now = now.max(record.last_refill);
        let elapsed = now.saturating_duration_since(record.last_refill).as_secs_f64();
        record.tokens = (record.tokens + elapsed * self.refill_rate).clamp(0.0, self.bucket_size);
        record.last_refill = now;
    }

    /// Time until the bucket holds a whole token again.
    fn until_next_token(&self, tokens: f64) -> Duration {
        if tokens >= 1.0 {
            Duration::ZERO
        } else if self.refill_rate == 0.0 {
            UNBOUNDED
        } else {
            secs_to_retry((1.0 - tokens) / self.refill_rate, self.refill_rate, |gained| {
                tokens + gained >= 1.0
            })
        }
    }
}

impl<S: Store<RefillRecord>> Strategy for TokenBucket<S> {
    fn process(&self, key: &str) -> ControlFlow<Reason> {
        let now = self.clock.now();

        self.clients.update_or_insert(
            key,
            || {
                trace!(key = %key, "tracking new client");
                RefillRecord {
                    tokens: self.bucket_size,
                    last_refill: now,
                }
            },
            |record| {
                self.refill(record, now);

                if record.tokens >= 1.0 {
                    record.tokens -= 1.0;
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(Reason::Overloaded {
                        retry_after: self.until_next_token(record.tokens),
                    })
                }
            },
        )
    }

    fn retry_after(&self, key: &str) -> Duration {
        let now = self.clock.now();

        self.clients
            .update(key, |record| {
                self.refill(record, now);
                self.until_next_token(record.tokens)
            })
            .unwrap_or_default()
    }

    fn name(&self) -> &'static str {
        "token_bucket"
    }
}
