use crate::batch::{Batch, BatchEntry, Request};
use crate::builder::LoaderBuilder;
use crate::cache_map::{CacheMap, PendingResult};
use crate::error::LoadResult;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::scheduler::Dispatch;

use core::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::future;
use parking_lot::Mutex;

/// What a batch function returns: one result per key, in key order, or an
/// error that fails the whole batch.
pub type BatchResult<V, E> = Result<Vec<Result<V, E>>, E>;

pub(crate) type BatchFn<K, V, E, C> = Arc<
  dyn Fn(DataLoader<K, V, E, C>, Vec<K>) -> Pin<Box<dyn Future<Output = BatchResult<V, E>> + Send>>
    + Send
    + Sync,
>;
pub(crate) type CacheKeyFn<K, V, E, C> = Arc<dyn Fn(&DataLoader<K, V, E, C>, &K) -> C + Send + Sync>;
pub(crate) type ScheduleFn<K, V, E, C> = Arc<dyn Fn(&DataLoader<K, V, E, C>, Dispatch) + Send + Sync>;

/// The mutable part of a loader, guarded by one lock so that "find or open a
/// batch" and "insert into the cache" happen as a single step.
pub(crate) struct LoaderState<K, V, E, C> {
  pub(crate) current_batch: Option<Arc<Batch<K, V, E, C>>>,
  pub(crate) cache_map: Option<Box<dyn CacheMap<C, PendingResult<V, E>>>>,
}

impl<K, V, E, C> LoaderState<K, V, E, C> {
  /// Adds the request to the open batch, or opens a new batch for it.
  ///
  /// Returns the new batch when one was opened; it still needs scheduling.
  fn enqueue(
    &mut self,
    request: Request<K, V, E, C>,
    max_batch_size: usize,
  ) -> Option<Arc<Batch<K, V, E, C>>> {
    let request = match &self.current_batch {
      Some(batch) => match batch.try_add(request) {
        Ok(()) => return None,
        Err(request) => request,
      },
      None => request,
    };

    let batch = Arc::new(Batch::with_request(max_batch_size, request));
    self.current_batch = Some(Arc::clone(&batch));
    Some(batch)
  }
}

/// The internal, thread-safe core of a loader.
pub(crate) struct LoaderShared<K, V, E, C> {
  pub(crate) batch_fn: BatchFn<K, V, E, C>,
  pub(crate) cache_key_fn: CacheKeyFn<K, V, E, C>,
  pub(crate) schedule_fn: ScheduleFn<K, V, E, C>,
  pub(crate) max_batch_size: usize,
  pub(crate) caching: bool,
  pub(crate) state: Mutex<LoaderState<K, V, E, C>>,
  pub(crate) metrics: Metrics,
}

/// A batching, caching loader.
///
/// Every `load` issued while a batch is open is collected into that batch and
/// handed to the batch function in one call. Loads of a cache key that is
/// already cached (loaded or still loading) share the cached result instead of
/// being fetched again.
///
/// `DataLoader` is a cheap handle; clones share the same batches and cache.
pub struct DataLoader<K, V, E, C = K> {
  pub(crate) shared: Arc<LoaderShared<K, V, E, C>>,
}

impl<K, V, E> DataLoader<K, V, E, K>
where
  K: Eq + Hash + Clone + Send + 'static,
  V: Clone + Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// Creates a builder for a loader that caches by the key itself.
  pub fn builder() -> LoaderBuilder<K, V, E, K> {
    LoaderBuilder::new()
  }
}

impl<K, V, E, C> DataLoader<K, V, E, C>
where
  K: Send + 'static,
  V: Clone + Send + Sync + 'static,
  E: Send + Sync + 'static,
  C: Eq + Hash + Clone + Send + 'static,
{
  /// Creates a builder for a loader that caches by a key derived with `f`.
  ///
  /// Keys that map to the same cache key are treated as the same item.
  pub fn builder_with_cache_key<F>(f: F) -> LoaderBuilder<K, V, E, C>
  where
    F: Fn(&DataLoader<K, V, E, C>, &K) -> C + Send + Sync + 'static,
  {
    LoaderBuilder::with_cache_key_fn(f)
  }
}

impl<K, V, E, C> DataLoader<K, V, E, C>
where
  K: Clone + fmt::Debug + Send + 'static,
  V: Clone + fmt::Debug + Send + Sync + 'static,
  E: fmt::Debug + Send + Sync + 'static,
  C: Clone + Send + 'static,
{
  /// Loads the value for `key`.
  ///
  /// The key joins the currently open batch unless its cache key is already
  /// cached, in which case the cached outcome (success or failure) is returned.
  pub async fn load(&self, key: K) -> LoadResult<V, E> {
    let pending = self.register(key);
    pending.wait().await
  }

  /// Loads many keys concurrently.
  ///
  /// The returned list matches `keys` in length and order, duplicates
  /// included. Failures are returned in place and never abort the other loads.
  pub async fn load_many<I>(&self, keys: I) -> Vec<LoadResult<V, E>>
  where
    I: IntoIterator<Item = K>,
  {
    future::join_all(keys.into_iter().map(|key| self.load(key))).await
  }

  /// Removes `key` from the cache. Batches already holding the key are not
  /// affected.
  pub fn clear(&self, key: &K) {
    if !self.shared.caching {
      return;
    }
    let cache_key = (self.shared.cache_key_fn)(self, key);
    if let Some(cache_map) = self.shared.state.lock().cache_map.as_mut() {
      cache_map.delete(&cache_key);
    }
    self.shared.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
  }

  /// Empties the cache. Batches in flight are not affected.
  pub fn clear_all(&self) {
    if !self.shared.caching {
      return;
    }
    if let Some(cache_map) = self.shared.state.lock().cache_map.as_mut() {
      cache_map.clear();
    }
    self.shared.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
  }

  /// Caches `value` for `key` unless the key is already cached.
  pub fn prime(&self, key: &K, value: V) {
    self.prime_result(key, Ok(value));
  }

  /// Caches `result` for `key` unless the key is already cached. Priming never
  /// overwrites an existing entry.
  pub fn prime_result(&self, key: &K, result: Result<V, E>) {
    if !self.shared.caching {
      return;
    }
    let cache_key = (self.shared.cache_key_fn)(self, key);

    let mut state = self.shared.state.lock();
    let Some(cache_map) = state.cache_map.as_mut() else {
      return;
    };
    if cache_map.get(&cache_key).is_some() {
      return;
    }
    cache_map.set(cache_key, PendingResult::from_result(result));
    self.shared.metrics.primes.fetch_add(1, Ordering::Relaxed);
  }

  /// Routes a key into the cache or the open batch and returns the slot its
  /// caller waits on.
  fn register(&self, key: K) -> PendingResult<V, E> {
    let shared = &self.shared;
    shared.metrics.loads.fetch_add(1, Ordering::Relaxed);

    let cache_key = if shared.caching {
      Some((shared.cache_key_fn)(self, &key))
    } else {
      None
    };
    let pending = PendingResult::new();

    let opened = {
      let mut state = shared.state.lock();
      let cached = match (&cache_key, state.cache_map.as_ref()) {
        (Some(cache_key), Some(cache_map)) => cache_map.get(cache_key),
        _ => None,
      };

      let request = match cached {
        Some(cached) => {
          shared.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
          tracing::trace!(?key, "cache hit");
          let local = pending.clone();
          Request::CacheHit(Box::new(move || {
            cached.slot.on_complete(move |result| {
              local.slot.complete(result.clone());
            });
          }))
        }
        None => {
          shared.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);
          tracing::trace!(?key, "cache miss");
          if let (Some(cache_key), Some(cache_map)) = (&cache_key, state.cache_map.as_mut()) {
            cache_map.set(cache_key.clone(), pending.clone());
          }
          Request::Load(BatchEntry {
            key,
            cache_key,
            result: pending.clone(),
          })
        }
      };

      state.enqueue(request, shared.max_batch_size)
    };

    if let Some(batch) = opened {
      self.schedule(batch);
    }
    pending
  }

  fn schedule(&self, batch: Arc<Batch<K, V, E, C>>) {
    tracing::trace!("opened new batch");
    let loader = self.clone();
    let dispatch = Dispatch::new(async move { batch.dispatch(loader).await });
    (self.shared.schedule_fn)(self, dispatch);
  }
}

impl<K, V, E, C> DataLoader<K, V, E, C> {
  /// Returns a point-in-time snapshot of the loader's metrics.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// Returns `true` if both handles refer to the same loader.
  pub fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.shared, &other.shared)
  }
}

impl<K, V, E, C> Clone for DataLoader<K, V, E, C> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<K, V, E, C> fmt::Debug for DataLoader<K, V, E, C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DataLoader")
      .field("max_batch_size", &self.shared.max_batch_size)
      .field("caching", &self.shared.caching)
      .field("metrics", &self.shared.metrics.snapshot())
      .finish_non_exhaustive()
  }
}
