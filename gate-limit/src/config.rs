//! Declarative strategy selection.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use quanta::Clock;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::FixedWindow;
use crate::LeakyBucket;
use crate::ShardedStore;
use crate::SlidingWindow;
use crate::Strategy;
use crate::TokenBucket;

/// Errors raised while turning a [`LimiterConfig`] into a strategy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be a finite, non-negative number; got {value}")]
    InvalidRate { field: &'static str, value: f64 },
}

/// Which algorithm to run and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum StrategyConfig {
    FixedWindow { limit: usize, window_ms: u64 },
    SlidingWindow { limit: usize, window_ms: u64 },
    TokenBucket { bucket_size: usize, refill_rate: f64 },
    LeakyBucket { bucket_size: usize, leak_rate: f64 },
}

/// How client records are held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// One lock over every client.
    #[default]
    Mutex,
    /// Lock striping across `DashMap` shards.
    Sharded,
}

/// A complete limiter definition, e.g.
///
/// ```json
/// { "algorithm": "token_bucket", "bucket_size": 20, "refill_rate": 5.0, "store": "sharded" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    #[serde(flatten)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub store: StoreKind,
}

impl From<StrategyConfig> for LimiterConfig {
    fn from(strategy: StrategyConfig) -> Self {
        Self {
            strategy,
            store: StoreKind::default(),
        }
    }
}

impl LimiterConfig {
    /// Builds the configured strategy on the real clock.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for zero limits, sizes or windows, and for rates that are
    /// negative or not finite.
    pub fn build(&self) -> Result<Arc<dyn Strategy + Send + Sync>, ConfigError> {
        self.build_with_clock(Clock::new())
    }

    pub fn build_with_clock(
        &self,
        clock: Clock,
    ) -> Result<Arc<dyn Strategy + Send + Sync>, ConfigError> {
        let strategy: Arc<dyn Strategy + Send + Sync> = match (&self.strategy, self.store) {
            (StrategyConfig::FixedWindow { limit, window_ms }, store) => {
                let limit = non_zero("limit", *limit)?;
                let window = window("window_ms", *window_ms)?;
                match store {
                    StoreKind::Mutex => Arc::new(FixedWindow::with_clock(limit, window, clock)),
                    StoreKind::Sharded => Arc::new(FixedWindow::with_store(
                        limit,
                        window,
                        clock,
                        ShardedStore::new(),
                    )),
                }
            }
            (StrategyConfig::SlidingWindow { limit, window_ms }, store) => {
                let limit = non_zero("limit", *limit)?;
                let window = window("window_ms", *window_ms)?;
                match store {
                    StoreKind::Mutex => Arc::new(SlidingWindow::with_clock(limit, window, clock)),
                    StoreKind::Sharded => Arc::new(SlidingWindow::with_store(
                        limit,
                        window,
                        clock,
                        ShardedStore::new(),
                    )),
                }
            }
            (
                StrategyConfig::TokenBucket {
                    bucket_size,
                    refill_rate,
                },
                store,
            ) => {
                let size = non_zero("bucket_size", *bucket_size)?;
                let rate = rate("refill_rate", *refill_rate)?;
                match store {
                    StoreKind::Mutex => Arc::new(TokenBucket::with_clock(size, rate, clock)),
                    StoreKind::Sharded => Arc::new(TokenBucket::with_store(
                        size,
                        rate,
                        clock,
                        ShardedStore::new(),
                    )),
                }
            }
            (
                StrategyConfig::LeakyBucket {
                    bucket_size,
                    leak_rate,
                },
                store,
            ) => {
                let size = non_zero("bucket_size", *bucket_size)?;
                let rate = rate("leak_rate", *leak_rate)?;
                match store {
                    StoreKind::Mutex => Arc::new(LeakyBucket::with_clock(size, rate, clock)),
                    StoreKind::Sharded => Arc::new(LeakyBucket::with_store(
                        size,
                        rate,
                        clock,
                        ShardedStore::new(),
                    )),
                }
            }
        };

        debug!(
            strategy = strategy.name(),
            store = ?self.store,
            "built rate limiting strategy"
        );
        Ok(strategy)
    }
}

fn non_zero(field: &'static str, value: usize) -> Result<NonZeroUsize, ConfigError> {
    NonZeroUsize::new(value).ok_or(ConfigError::Zero { field })
}

fn window(field: &'static str, millis: u64) -> Result<Duration, ConfigError> {
    match millis {
        0 => Err(ConfigError::Zero { field }),
        ms => Ok(Duration::from_millis(ms)),
    }
}

fn rate(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidRate { field, value })
    }
}
