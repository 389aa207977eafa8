use crate::cache_map::PendingResult;
use crate::error::{BatchSizeMismatch, LoadError};
use crate::loader::DataLoader;

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;

/// A deferred bridge from an existing cache entry into a caller's slot.
pub(crate) type CacheHit = Box<dyn FnOnce() + Send>;

/// A request that is sent to the batch function.
pub(crate) struct BatchEntry<K, V, E, C> {
  pub(crate) key: K,
  pub(crate) cache_key: Option<C>,
  pub(crate) result: PendingResult<V, E>,
}

/// What was added to a batch.
pub(crate) enum Request<K, V, E, C> {
  Load(BatchEntry<K, V, E, C>),
  CacheHit(CacheHit),
}

struct BatchInner<K, V, E, C> {
  dispatched: bool,
  entries: Vec<BatchEntry<K, V, E, C>>,
  cache_hits: Vec<CacheHit>,
}

impl<K, V, E, C> BatchInner<K, V, E, C> {
  fn push(&mut self, request: Request<K, V, E, C>) {
    match request {
      Request::Load(entry) => self.entries.push(entry),
      Request::CacheHit(hit) => self.cache_hits.push(hit),
    }
  }
}

/// One accumulation unit of keys, dispatched to the batch function exactly once.
pub(crate) struct Batch<K, V, E, C> {
  max_size: usize,
  inner: Mutex<BatchInner<K, V, E, C>>,
}

impl<K, V, E, C> Batch<K, V, E, C> {
  pub(crate) fn new(max_size: usize) -> Self {
    Self {
      max_size,
      inner: Mutex::new(BatchInner {
        dispatched: false,
        entries: Vec::new(),
        cache_hits: Vec::new(),
      }),
    }
  }

  /// Creates a batch holding `request` as its first entry.
  pub(crate) fn with_request(max_size: usize, request: Request<K, V, E, C>) -> Self {
    let batch = Self::new(max_size);
    batch.inner.lock().push(request);
    batch
  }

  /// Appends the request if the batch still accepts it, otherwise hands it back.
  ///
  /// Real entries and cache hits are capped independently by the batch size.
  pub(crate) fn try_add(&self, request: Request<K, V, E, C>) -> Result<(), Request<K, V, E, C>> {
    let mut inner = self.inner.lock();
    if inner.dispatched
      || inner.entries.len() >= self.max_size
      || inner.cache_hits.len() >= self.max_size
    {
      return Err(request);
    }
    inner.push(request);
    Ok(())
  }

  /// Marks the batch as dispatched and takes everything queued so far.
  fn close(&self) -> (Vec<BatchEntry<K, V, E, C>>, Vec<CacheHit>) {
    let mut inner = self.inner.lock();
    inner.dispatched = true;
    (
      std::mem::take(&mut inner.entries),
      std::mem::take(&mut inner.cache_hits),
    )
  }
}

impl<K, V, E, C> Batch<K, V, E, C>
where
  K: Clone + fmt::Debug + Send + 'static,
  V: Clone + fmt::Debug + Send + Sync + 'static,
  E: fmt::Debug + Send + Sync + 'static,
  C: Send + 'static,
{
  /// Loads every key of the batch and completes each caller's slot.
  ///
  /// Cache hits always resolve before the batch's own entries.
  pub(crate) async fn dispatch(&self, loader: DataLoader<K, V, E, C>) {
    let (entries, cache_hits) = self.close();

    if entries.is_empty() {
      tracing::trace!(cache_hits = cache_hits.len(), "resolving cache-hit-only batch");
      resolve_cache_hits(cache_hits);
      return;
    }

    let keys: Vec<K> = entries.iter().map(|entry| entry.key.clone()).collect();
    let metrics = &loader.shared.metrics;
    metrics.record_dispatch(keys.len());
    tracing::debug!(
      keys = keys.len(),
      cache_hits = cache_hits.len(),
      "dispatching batch"
    );

    // Calling the batch function inside the future catches panics raised
    // before its first await as well.
    let call = {
      let batch_fn = Arc::clone(&loader.shared.batch_fn);
      let loader = loader.clone();
      let keys = keys.clone();
      async move { batch_fn(loader, keys).await }
    };
    let outcome = AssertUnwindSafe(call).catch_unwind().await;

    match outcome {
      Ok(Ok(results)) if results.len() == entries.len() => {
        tracing::debug!(keys = keys.len(), "batch loaded");
        resolve_cache_hits(cache_hits);
        for (entry, result) in entries.into_iter().zip(results) {
          let result = result.map_err(|error| LoadError::Rejected(Arc::new(error)));
          entry.result.slot.complete(result);
        }
      }
      Ok(Ok(results)) => {
        let mismatch = BatchSizeMismatch::new(&keys, &results);
        tracing::error!(
          expected = mismatch.expected,
          received = mismatch.received,
          "batch function broke the one-result-per-key contract"
        );
        metrics.contract_violations.fetch_add(1, Ordering::Relaxed);
        fail_entries(
          &loader,
          entries,
          cache_hits,
          LoadError::SizeMismatch(Arc::new(mismatch)),
        );
      }
      Ok(Err(error)) => {
        tracing::warn!(keys = keys.len(), error = ?error, "batch function failed");
        metrics.batch_failures.fetch_add(1, Ordering::Relaxed);
        fail_entries(&loader, entries, cache_hits, LoadError::BatchFailed(Arc::new(error)));
      }
      Err(payload) => {
        let message = panic_message(payload);
        tracing::warn!(keys = keys.len(), panic = %message, "batch function panicked");
        metrics.batch_failures.fetch_add(1, Ordering::Relaxed);
        fail_entries(&loader, entries, cache_hits, LoadError::Panicked(message));
      }
    }
  }
}

fn resolve_cache_hits(cache_hits: Vec<CacheHit>) {
  for hit in cache_hits {
    hit();
  }
}

/// Completes every entry with the same error and evicts their cache keys, so a
/// later load retries.
///
/// A key is only evicted while the cache still holds this entry's own result;
/// a newer load of the same key started after a `clear` is left alone.
fn fail_entries<K, V, E, C>(
  loader: &DataLoader<K, V, E, C>,
  entries: Vec<BatchEntry<K, V, E, C>>,
  cache_hits: Vec<CacheHit>,
  error: LoadError<E>,
) where
  V: Clone + 'static,
  E: 'static,
  C: 'static,
{
  resolve_cache_hits(cache_hits);

  {
    let mut state = loader.shared.state.lock();
    if let Some(cache_map) = state.cache_map.as_mut() {
      for entry in &entries {
        let Some(cache_key) = entry.cache_key.as_ref() else {
          continue;
        };
        let owned = cache_map
          .get(cache_key)
          .is_some_and(|cached| cached.ptr_eq(&entry.result));
        if owned {
          cache_map.delete(cache_key);
        }
      }
    }
  }

  for entry in entries {
    entry.result.slot.complete(Err(error.clone()));
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> Arc<str> {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    Arc::from(*message)
  } else if let Some(message) = payload.downcast_ref::<String>() {
    Arc::from(message.as_str())
  } else {
    Arc::from("unknown panic payload")
  }
}
