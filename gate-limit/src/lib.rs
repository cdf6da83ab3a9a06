//! # gate-limit
//!
//! `gate-limit` provides per-client admission control strategies.
//!
//! ## Core Philosophy
//!
//! Every strategy tracks a separate accounting record for each client identifier. Records
//! live in a [`Store`] owned by the strategy. The default [`MutexStore`] guards the whole
//! map with a single lock, so every decision for a client is linearized: out of any burst of
//! concurrent calls exactly `min(burst, available capacity)` are admitted.
//!
//! ## Key Concepts
//!
//! * **Keyed**: Each client identifier gets its own window or bucket, created on first sight.
//! * **Lazy Evaluation**: Windows expire and buckets refill/leak at the moment of the request,
//!   eliminating the need for background worker threads or timers.
//! * **Strategy Trait**: A unified interface for the four limiting algorithms.
//!
//! ## Limitations
//!
//! Records are never evicted. Memory grows with the number of distinct client identifiers
//! seen since the strategy was created.
//!
//! ## Example
//!
//! ```rust
//! use gate_limit::TokenBucket;
//! use gate_limit::Strategy;
//! use std::num::NonZeroUsize;
//!
//! let bucket_size = NonZeroUsize::new(100).unwrap();
//! let bucket = TokenBucket::new(bucket_size, 10.0);
//!
//! if bucket.process("203.0.113.7").is_continue() {
//!     // Request allowed
//! }
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod config;
mod fixed_window;
mod leaky_bucket;
mod sliding_window;
mod store;
mod token_bucket;

pub use config::ConfigError;
pub use config::LimiterConfig;
pub use config::StoreKind;
pub use config::StrategyConfig;
pub use fixed_window::FixedWindow;
pub use fixed_window::WindowRecord;
pub use leaky_bucket::LeakyBucket;
pub use leaky_bucket::LeakRecord;
pub use sliding_window::SlidingWindow;
pub use sliding_window::TimestampLog;
pub use store::MutexStore;
pub use store::ShardedStore;
pub use store::Store;
pub use token_bucket::RefillRecord;
pub use token_bucket::TokenBucket;

/// Retry hint meaning "capacity will never free up".
///
/// Returned by the bucket strategies when their rate is zero and the bucket is exhausted.
/// Callers must treat it as "no finite wait", not as a real duration.
pub const UNBOUNDED: Duration = Duration::MAX;

/// Reasons why a request might be rejected by a strategy.
#[derive(Debug, PartialEq)]
pub enum Reason {
    Overloaded { retry_after: Duration },
}

/// The core trait for all rate-limiting algorithms.
///
/// Strategies must be `Send` and `Sync` to allow sharing across thread boundaries
/// via `Arc`.
pub trait Strategy: Debug {
    /// Attempts to process a single request for `key`.
    ///
    /// Evaluation and consumption of one unit of capacity happen atomically. A key that
    /// has never been seen starts with full capacity.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if the rate limit has been reached for `key`. The enclosed
    /// `retry_after` is computed from the same state that caused the rejection.
    fn process(&self, key: &str) -> ControlFlow<Reason>;

    /// How long `key` should wait before capacity is guaranteed to exist.
    ///
    /// Returns [`Duration::ZERO`] if the next request would be admitted now, including
    /// for keys that have never been seen. Never consumes capacity.
    fn retry_after(&self, key: &str) -> Duration;

    /// Returns `true` and consumes capacity if a request for `key` may proceed.
    fn is_request_allowed(&self, key: &str) -> bool {
        self.process(key).is_continue()
    }

    /// A short, stable name for logs and metrics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Converts a (possibly fractional) number of seconds into a retry hint.
///
/// The hint is rounded up to whole nanoseconds and then nudged until `ready` accepts the
/// amount `hint * rate` that accrues over it, so waiting exactly the hint is always enough.
/// Anything that does not fit in a `Duration` is reported as [`UNBOUNDED`].
pub(crate) fn secs_to_retry(secs: f64, rate: f64, ready: impl Fn(f64) -> bool) -> Duration {
    if secs <= 0.0 {
        return Duration::ZERO;
    }
    let Ok(mut wait) = Duration::try_from_secs_f64(secs) else {
        return UNBOUNDED;
    };
    // A handful of nanoseconds covers the rounding of the conversion and of the caller's sums.
    for _ in 0..8 {
        if ready(wait.as_secs_f64() * rate) {
            break;
        }
        wait = wait.saturating_add(Duration::from_nanos(1));
    }
    wait
}

/// Stores a caller supplied rate, treating negative and NaN rates as zero.
pub(crate) fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_nan() { 0.0 } else { rate.max(0.0) }
}
