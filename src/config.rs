//! Accumulator configuration and live (hot-reloadable) settings.

use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of items that triggers a flush.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
/// Default maximum time a batch stays open.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
/// Default bound of the handoff / completed-batch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;
/// Default number of idle buffers kept by the fast variant's pool.
pub const DEFAULT_POOL_RETENTION: usize = 16;

/// Shortest flush interval accepted by the live setters.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

const ENV_BATCH_SIZE: &str = "BATCH_ACCUMULATOR_BATCH_SIZE";
const ENV_FLUSH_INTERVAL_MS: &str = "BATCH_ACCUMULATOR_FLUSH_INTERVAL_MS";
const ENV_REUSE_BUFFERS: &str = "BATCH_ACCUMULATOR_REUSE_BUFFERS";
const ENV_QUEUE_CAPACITY: &str = "BATCH_ACCUMULATOR_QUEUE_CAPACITY";

/// Construction-time configuration shared by both accumulator variants.
///
/// `batch_size` and `flush_interval` are only initial values: both can be
/// changed on a running accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorConfig {
    /// Flush as soon as the open batch holds this many items.
    pub batch_size: usize,
    /// Flush at least this often, even when the batch is empty.
    #[serde(rename = "flush_interval_ms", with = "duration_ms")]
    pub flush_interval: Duration,
    /// Keep (and recycle) emptied buffers instead of reallocating.
    pub reuse_buffers: bool,
    /// Bound of the item handoff queue (simple) or completed-batch queue (fast).
    /// `0` makes every handoff synchronous: a producer (simple) or a full
    /// batch (fast) only moves on while the background task is waiting for it.
    pub queue_capacity: usize,
    /// Maximum number of idle buffers the fast variant's pool retains.
    pub pool_retention: usize,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            reuse_buffers: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pool_retention: DEFAULT_POOL_RETENTION,
        }
    }
}

impl AccumulatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Disable buffer reuse: every flushed batch is released and a new one allocated.
    pub fn without_buffer_reuse(mut self) -> Self {
        self.reuse_buffers = false;
        self
    }

    pub fn with_reuse_buffers(mut self, reuse: bool) -> Self {
        self.reuse_buffers = reuse;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_pool_retention(mut self, retention: usize) -> Self {
        self.pool_retention = retention;
        self
    }

    /// Defaults overridden by `BATCH_ACCUMULATOR_*` environment variables.
    ///
    /// - `BATCH_ACCUMULATOR_BATCH_SIZE`
    /// - `BATCH_ACCUMULATOR_FLUSH_INTERVAL_MS`
    /// - `BATCH_ACCUMULATOR_REUSE_BUFFERS` (`true`/`false`/`1`/`0`)
    /// - `BATCH_ACCUMULATOR_QUEUE_CAPACITY`
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_BATCH_SIZE) {
            self.batch_size = parse_env(ENV_BATCH_SIZE, &v)?;
        }
        if let Some(v) = lookup(ENV_FLUSH_INTERVAL_MS) {
            self.flush_interval = Duration::from_millis(parse_env(ENV_FLUSH_INTERVAL_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_REUSE_BUFFERS) {
            self.reuse_buffers = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(env_error(ENV_REUSE_BUFFERS, &v)),
            };
        }
        if let Some(v) = lookup(ENV_QUEUE_CAPACITY) {
            self.queue_capacity = parse_env(ENV_QUEUE_CAPACITY, &v)?;
        }
        Ok(self)
    }

    /// Reject values that would make the accumulator non-functional.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::configuration_with_context(
                "batch size must be at least 1",
                ErrorContext::new()
                    .with_field_path("batch_size")
                    .with_source("accumulator_config"),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::configuration_with_context(
                "flush interval must be greater than zero",
                ErrorContext::new()
                    .with_field_path("flush_interval")
                    .with_source("accumulator_config"),
            ));
        }
        Ok(())
    }
}

fn parse_env<V: std::str::FromStr>(key: &str, raw: &str) -> Result<V> {
    raw.trim().parse::<V>().map_err(|_| env_error(key, raw))
}

fn env_error(key: &str, raw: &str) -> Error {
    Error::configuration_with_context(
        "invalid environment override",
        ErrorContext::new()
            .with_field_path(format!("env.{}", key))
            .with_details(format!("got {:?}", raw))
            .with_source("accumulator_config"),
    )
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LiveSettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

/// Batch size and flush interval, swapped atomically and read at every
/// flush decision.
pub(crate) struct SharedSettings {
    current: ArcSwap<LiveSettings>,
}

impl SharedSettings {
    pub fn new(batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            current: ArcSwap::from_pointee(LiveSettings {
                batch_size: batch_size.max(1),
                flush_interval: flush_interval.max(MIN_FLUSH_INTERVAL),
            }),
        }
    }

    pub fn from_config(cfg: &AccumulatorConfig) -> Self {
        Self::new(cfg.batch_size, cfg.flush_interval)
    }

    pub fn batch_size(&self) -> usize {
        self.current.load().batch_size
    }

    pub fn flush_interval(&self) -> Duration {
        self.current.load().flush_interval
    }

    pub fn set_batch_size(&self, size: usize) {
        let size = size.max(1);
        self.current.rcu(|cur| LiveSettings {
            batch_size: size,
            ..**cur
        });
    }

    pub fn set_flush_interval(&self, interval: Duration) {
        let interval = interval.max(MIN_FLUSH_INTERVAL);
        self.current.rcu(|cur| LiveSettings {
            flush_interval: interval,
            ..**cur
        });
    }
}
