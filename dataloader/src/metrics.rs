use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the loader.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub(crate) struct Metrics {
  // --- Lookups ---
  pub(crate) loads: CachePadded<AtomicU64>,
  pub(crate) cache_hits: CachePadded<AtomicU64>,
  pub(crate) cache_misses: CachePadded<AtomicU64>,

  // --- Cache maintenance ---
  pub(crate) primes: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,

  // --- Batching ---
  pub(crate) batches_dispatched: CachePadded<AtomicU64>,
  pub(crate) keys_dispatched: CachePadded<AtomicU64>,
  pub(crate) largest_batch: CachePadded<AtomicU64>,

  // --- Failures ---
  pub(crate) batch_failures: CachePadded<AtomicU64>,
  pub(crate) contract_violations: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      loads: CachePadded::new(AtomicU64::new(0)),
      cache_hits: CachePadded::new(AtomicU64::new(0)),
      cache_misses: CachePadded::new(AtomicU64::new(0)),
      primes: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      batches_dispatched: CachePadded::new(AtomicU64::new(0)),
      keys_dispatched: CachePadded::new(AtomicU64::new(0)),
      largest_batch: CachePadded::new(AtomicU64::new(0)),
      batch_failures: CachePadded::new(AtomicU64::new(0)),
      contract_violations: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Records a batch of `len` keys being handed to the batch function.
  pub(crate) fn record_dispatch(&self, len: usize) {
    let len = len as u64;
    self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
    self.keys_dispatched.fetch_add(len, Ordering::Relaxed);
    self.largest_batch.fetch_max(len, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let cache_hits = self.cache_hits.load(Ordering::Relaxed);
    let cache_misses = self.cache_misses.load(Ordering::Relaxed);
    let total_lookups = cache_hits + cache_misses;
    let batches_dispatched = self.batches_dispatched.load(Ordering::Relaxed);
    let keys_dispatched = self.keys_dispatched.load(Ordering::Relaxed);

    MetricsSnapshot {
      loads: self.loads.load(Ordering::Relaxed),
      cache_hits,
      cache_misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        cache_hits as f64 / total_lookups as f64
      },
      primes: self.primes.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      batches_dispatched,
      keys_dispatched,
      average_batch_size: if batches_dispatched == 0 {
        0.0
      } else {
        keys_dispatched as f64 / batches_dispatched as f64
      },
      largest_batch: self.largest_batch.load(Ordering::Relaxed),
      batch_failures: self.batch_failures.load(Ordering::Relaxed),
      contract_violations: self.contract_violations.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of a loader's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// The number of `load` calls, including those made by `load_many`.
  pub loads: u64,
  /// The number of loads that joined an existing cache entry.
  pub cache_hits: u64,
  /// The number of loads that had to be sent to the batch function.
  pub cache_misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// The number of `prime` calls that inserted a value.
  pub primes: u64,
  /// The number of `clear` and `clear_all` calls.
  pub invalidations: u64,
  /// The number of times the batch function was invoked.
  pub batches_dispatched: u64,
  /// The total number of keys passed to the batch function.
  pub keys_dispatched: u64,
  /// keys_dispatched / batches_dispatched
  pub average_batch_size: f64,
  /// The largest number of keys passed in a single invocation.
  pub largest_batch: u64,
  /// The number of invocations that failed as a whole (error or panic).
  pub batch_failures: u64,
  /// The number of invocations that returned the wrong number of results.
  pub contract_violations: u64,
  /// The number of seconds the loader has existed.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("loads", &self.loads)
      .field("cache_hits", &self.cache_hits)
      .field("cache_misses", &self.cache_misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("primes", &self.primes)
      .field("invalidations", &self.invalidations)
      .field("batches_dispatched", &self.batches_dispatched)
      .field("keys_dispatched", &self.keys_dispatched)
      .field("average_batch_size", &format!("{:.2}", self.average_batch_size))
      .field("largest_batch", &self.largest_batch)
      .field("batch_failures", &self.batch_failures)
      .field("contract_violations", &self.contract_violations)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
