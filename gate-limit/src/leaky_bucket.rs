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

/// Per-client state of a [`LeakyBucket`].
#[derive(Debug)]
pub struct LeakRecord {
    queued: f64,
    last_leak: Instant,
}

/// Leaky bucket used as a meter.
///
/// Every admitted request occupies one slot of the client's bucket and the bucket drains
/// continuously at `leak_rate` slots per second. Requests arriving while the bucket is full
/// are rejected rather than queued. With a `leak_rate` of zero the bucket never drains and
/// the retry hint is [`UNBOUNDED`].
#[derive(Debug)]
pub struct LeakyBucket<S = MutexStore<LeakRecord>> {
    bucket_size: f64,
    leak_rate: f64,
    clients: S,
    clock: Clock,
}

impl LeakyBucket {
    /// Creates a new `LeakyBucket` strategy.
    ///
    /// # Arguments
    ///
    /// * `bucket_size` - The maximum number of outstanding requests per client.
    /// * `leak_rate` - Requests drained per second. Negative or NaN rates are treated as zero.
    pub fn new(bucket_size: NonZeroUsize, leak_rate: f64) -> Self {
        Self::with_clock(bucket_size, leak_rate, Clock::new())
    }

    pub fn with_clock(bucket_size: NonZeroUsize, leak_rate: f64, clock: Clock) -> Self {
        Self::with_store(bucket_size, leak_rate, clock, MutexStore::new())
    }
}

impl<S: Store<LeakRecord>> LeakyBucket<S> {
    pub fn with_store(bucket_size: NonZeroUsize, leak_rate: f64, clock: Clock, clients: S) -> Self {
        Self {
            bucket_size: bucket_size.get() as f64,
            leak_rate: sanitize_rate(leak_rate),
            clients,
            clock,
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    fn leak(&self, record: &mut LeakRecord, now: Instant) {
        let now = now.max(record.last_leak);
        let elapsed = now.saturating_duration_since(record.last_leak).as_secs_f64();
        record.queued = (record.queued - elapsed * self.leak_rate).max(0.0);
        record.last_leak = now;
    }

    /// Time until a whole slot is guaranteed to be free.
    fn until_slot_frees(&self, queued: f64) -> Duration {
        if queued < self.bucket_size {
            Duration::ZERO
        } else if self.leak_rate == 0.0 {
            UNBOUNDED
        } else {
            let slot_free = self.bucket_size - 1.0;
            secs_to_retry((queued - slot_free) / self.leak_rate, self.leak_rate, |leaked| {
                (queued - leaked).max(0.0) <= slot_free
            })
        }
    }
}

impl<S: Store<LeakRecord>> Strategy for LeakyBucket<S> {
    fn process(&self, key: &str) -> ControlFlow<Reason> {
        let now = self.clock.now();

        self.clients.update_or_insert(
            key,
            || {
                trace!(key = %key, "tracking new client");
                LeakRecord {
                    queued: 0.0,
                    last_leak: now,
                }
            },
            |record| {
                self.leak(record, now);

                if record.queued < self.bucket_size {
                    // A fractional remainder may leave the queue up to one slot over the size
                    record.queued += 1.0;
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(Reason::Overloaded {
                        retry_after: self.until_slot_frees(record.queued),
                    })
                }
            },
        )
    }

    fn retry_after(&self, key: &str) -> Duration {
        let now = self.clock.now();

        self.clients
            .update(key, |record| {
                self.leak(record, now);
                self.until_slot_frees(record.queued)
            })
            .unwrap_or_default()
    }

    fn name(&self) -> &'static str {
        "leaky_bucket"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn it_never_drains_without_a_leak_rate() {
        let (clock, mock) = Clock::mock();
        let rl = LeakyBucket::with_clock(size(1), 0.0, clock);

        assert!(rl.is_request_allowed("user-a"));
        assert!(!rl.is_request_allowed("user-a"));

        mock.increment(Duration::from_secs(60 * 60 * 24));
        assert_eq!(
            rl.process("user-a"),
            ControlFlow::Break(Reason::Overloaded {
                retry_after: UNBOUNDED
            })
        );
        assert_eq!(rl.retry_after("user-a"), UNBOUNDED);
    }

    #[test]
    fn it_drains_after_one_window() {
        let window = Duration::from_millis(100);
        // Drains the whole bucket in one window
        let rl = LeakyBucket::new(size(1), 1.0 / window.as_secs_f64());

        assert!(rl.is_request_allowed("user-a"));
        std::thread::sleep(window + Duration::from_millis(10));
        assert!(rl.is_request_allowed("user-a"));
    }

    #[test]
    fn test_partial_leak_admits_new_request() {
        let (clock, mock) = Clock::mock();
        let rl = LeakyBucket::with_clock(size(3), 2.0, clock);

        for i in 0..3 {
            assert!(rl.is_request_allowed("user-a"), "prefill {i}");
        }
        assert!(!rl.is_request_allowed("user-a"), "bucket should be full");

        // Roughly 1.2 requests leak out, leaving 1.8 queued
        mock.increment(Duration::from_millis(600));
        assert!(rl.is_request_allowed("user-a"));
        assert!(rl.is_request_allowed("user-a"));
        assert!(!rl.is_request_allowed("user-a"));
    }

    #[test]
    fn test_steady_client_is_held_to_leak_rate() {
        let (clock, mock) = Clock::mock();
        let rl = LeakyBucket::with_clock(size(1), 1.0, clock);

        // Twice the leak rate for 10s: one burst slot plus one per leaked second
        let mut admitted = 0;
        for _ in 0..20 {
            if rl.is_request_allowed("user-a") {
                admitted += 1;
            }
            mock.increment(Duration::from_millis(500));
        }
        assert_eq!(admitted, 11);

        // The half slot left over from the last admission is still queued
        let queued = rl.clients.update("user-a", |record| {
            rl.leak(record, rl.clock.now());
            record.queued
        });
        assert_eq!(queued, Some(1.0));
        assert!(!rl.is_request_allowed("user-a"));
    }

    #[test]
    fn test_waiting_the_hint_is_enough() {
        for rate in [3.0, 0.3, 1.7, 9.9, 33.0] {
            let (clock, mock) = Clock::mock();
            let rl = LeakyBucket::with_clock(size(2), rate, clock);

            assert!(rl.is_request_allowed("user-a"));
            mock.increment(Duration::from_millis(7));
            assert!(rl.is_request_allowed("user-a"));
            while rl.is_request_allowed("user-a") {}

            mock.increment(rl.retry_after("user-a"));
            assert!(rl.is_request_allowed("user-a"), "rate {rate}");
        }
    }

    #[test]
    fn test_retry_after() {
        let (clock, mock) = Clock::mock();
        // Leaks one request every 0.5s
        let rl = LeakyBucket::with_clock(size(1), 2.0, clock);

        assert_eq!(rl.retry_after("user-a"), Duration::ZERO);
        assert!(rl.is_request_allowed("user-a"));
        assert_eq!(rl.retry_after("user-a"), Duration::from_millis(500));
        assert_eq!(
            rl.process("user-a"),
            ControlFlow::Break(Reason::Overloaded {
                retry_after: Duration::from_millis(500)
            })
        );

        mock.increment(Duration::from_millis(600));
        assert_eq!(rl.retry_after("user-a"), Duration::ZERO);
        assert!(rl.is_request_allowed("user-a"));
        assert!(!rl.is_request_allowed("user-a"));
    }

    #[test]
    fn test_retry_after_does_not_consume() {
        let (clock, _mock) = Clock::mock();
        let rl = LeakyBucket::with_clock(size(2), 0.0, clock);

        for _ in 0..10 {
            assert_eq!(rl.retry_after("user-a"), Duration::ZERO);
        }
        assert_eq!(rl.tracked_clients(), 0);

        assert!(rl.is_request_allowed("user-a"));
        assert!(rl.is_request_allowed("user-a"));
        assert!(!rl.is_request_allowed("user-a"));
    }

    #[test]
    fn test_long_idle_empties_bucket() {
        let (clock, mock) = Clock::mock();
        let rl = LeakyBucket::with_clock(size(2), 1.0, clock);

        assert!(rl.is_request_allowed("user-a"));
        assert!(rl.is_request_allowed("user-a"));
        mock.increment(Duration::from_secs(60 * 60 * 24 * 365));

        let queued = rl.clients.update("user-a", |record| {
            rl.leak(record, rl.clock.now());
            record.queued
        });
        assert_eq!(queued, Some(0.0));
        assert!(rl.is_request_allowed("user-a"));
        assert!(rl.is_request_allowed("user-a"));
        assert!(!rl.is_request_allowed("user-a"));
    }

    #[tokio::test]
    async fn test_actual_concurrency() {
        let capacity = 50;
        let rl = Arc::new(LeakyBucket::new(size(capacity), 0.0));

        let mut handles = vec![];
        for _ in 0..100 {
            let rl_clone = Arc::clone(&rl);
            handles.push(tokio::spawn(async move { rl_clone.process("user-a") }));
        }

        let results = futures::future::join_all(handles).await;
        let success_count = results
            .into_iter()
            .filter(|r| matches!(r, Ok(ControlFlow::Continue(()))))
            .count();

        assert_eq!(success_count, capacity);
    }

    #[test]
    fn test_concurrent_multiple_clients() {
        use std::thread;

        let capacity = 20;
        let rl = Arc::new(LeakyBucket::new(size(capacity), 0.0));

        let handles: Vec<_> = (0..2 * capacity)
            .flat_map(|_| ["user-a", "user-b"])
            .map(|user| {
                let rl = Arc::clone(&rl);
                thread::spawn(move || (user, rl.is_request_allowed(user)))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for user in ["user-a", "user-b"] {
            let allowed = results.iter().filter(|r| **r == (user, true)).count();
            assert_eq!(allowed, capacity, "{user} should get its own bucket");
        }
    }
}
