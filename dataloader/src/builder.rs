use crate::cache_map::{CacheMap, InMemoryCacheMap, PendingResult};
use crate::error::BuildError;
use crate::loader::{
  BatchFn, BatchResult, CacheKeyFn, DataLoader, LoaderShared, LoaderState, ScheduleFn,
};
use crate::metrics::Metrics;
use crate::options::LoaderOptions;
use crate::scheduler::{BatchScheduler, DeferredScheduler, Dispatch};
use crate::TaskSpawner;

use core::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;

/// A builder for creating `DataLoader` instances.
///
/// The batch function is given last, to [`LoaderBuilder::build`], so that its
/// argument types can be inferred from the rest of the configuration.
pub struct LoaderBuilder<K, V, E, C> {
  options: LoaderOptions,
  cache_key_fn: CacheKeyFn<K, V, E, C>,
  cache_map: Option<Box<dyn CacheMap<C, PendingResult<V, E>>>>,
  schedule_fn: Option<ScheduleFn<K, V, E, C>>,
  spawner: Option<Arc<dyn TaskSpawner>>,
}

// Manual Debug implementation for LoaderBuilder.
impl<K, V, E, C> fmt::Debug for LoaderBuilder<K, V, E, C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoaderBuilder")
      .field("options", &self.options)
      .field("has_cache_map", &self.cache_map.is_some())
      .field("has_scheduler", &self.schedule_fn.is_some())
      .field("has_spawner", &self.spawner.is_some())
      .finish_non_exhaustive()
  }
}

// --- Constructors ---
impl<K, V, E> LoaderBuilder<K, V, E, K>
where
  K: Eq + Hash + Clone + Send + 'static,
  V: Clone + Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// Creates a builder whose loader caches by the key itself.
  pub fn new() -> Self {
    Self::with_cache_key_fn(|_, key: &K| key.clone())
  }
}

impl<K, V, E> Default for LoaderBuilder<K, V, E, K>
where
  K: Eq + Hash + Clone + Send + 'static,
  V: Clone + Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V, E, C> LoaderBuilder<K, V, E, C>
where
  K: Send + 'static,
  V: Clone + Send + Sync + 'static,
  E: Send + Sync + 'static,
  C: Eq + Hash + Clone + Send + 'static,
{
  /// Creates a builder whose loader caches by a key derived with `f`.
  pub fn with_cache_key_fn<F>(f: F) -> Self
  where
    F: Fn(&DataLoader<K, V, E, C>, &K) -> C + Send + Sync + 'static,
  {
    Self {
      options: LoaderOptions::default(),
      cache_key_fn: Arc::new(f),
      cache_map: Some(Box::new(InMemoryCacheMap::new())),
      schedule_fn: None,
      spawner: None,
    }
  }
}

// --- General Configuration Methods ---
impl<K, V, E, C> LoaderBuilder<K, V, E, C> {
  /// Enables or disables batching. Without batching every key is sent to the
  /// batch function on its own.
  pub fn batch(mut self, batch: bool) -> Self {
    self.options.batch = batch;
    self
  }

  /// Enables or disables caching. Without caching identical keys are not
  /// deduplicated.
  pub fn cache(mut self, cache: bool) -> Self {
    self.options.cache = cache;
    self
  }

  /// Sets the largest number of keys passed to the batch function at once.
  /// Must be positive.
  pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
    self.options.max_batch_size = max_batch_size;
    self
  }

  /// Replaces all plain-data options at once.
  pub fn options(mut self, options: LoaderOptions) -> Self {
    self.options = options;
    self
  }

  /// Sets the cache map. Defaults to an [`InMemoryCacheMap`].
  pub fn cache_map<M>(mut self, cache_map: M) -> Self
  where
    M: CacheMap<C, PendingResult<V, E>>,
  {
    self.cache_map = Some(Box::new(cache_map));
    self
  }

  /// Removes the cache map, which disables caching like `cache(false)`.
  pub fn no_cache_map(mut self) -> Self {
    self.cache_map = None;
    self
  }

  /// Sets the spawner the default scheduler runs dispatches on.
  ///
  /// Without one, the current Tokio runtime is used.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }
}

// --- Scheduling ---
impl<K, V, E, C> LoaderBuilder<K, V, E, C>
where
  K: 'static,
  V: 'static,
  E: 'static,
  C: 'static,
{
  /// Sets the scheduler deciding when batches are dispatched.
  pub fn batch_scheduler<S>(mut self, scheduler: S) -> Self
  where
    S: BatchScheduler,
  {
    let scheduler = Arc::new(scheduler);
    self.schedule_fn = Some(Arc::new(move |_: &DataLoader<K, V, E, C>, dispatch: Dispatch| {
      scheduler.schedule(dispatch)
    }));
    self
  }

  /// Sets a scheduling closure that also receives the loader the batch
  /// belongs to.
  pub fn batch_schedule_fn<F>(mut self, f: F) -> Self
  where
    F: Fn(&DataLoader<K, V, E, C>, Dispatch) + Send + Sync + 'static,
  {
    self.schedule_fn = Some(Arc::new(f));
    self
  }
}

// --- Build Methods ---
impl<K, V, E, C> LoaderBuilder<K, V, E, C>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
  C: Send + 'static,
{
  /// Builds the loader around `batch_fn`.
  ///
  /// `batch_fn` receives the loader and the keys of one batch, and must return
  /// exactly one result per key, in the same order.
  pub fn build<F, Fut>(mut self, batch_fn: F) -> Result<DataLoader<K, V, E, C>, BuildError>
  where
    F: Fn(DataLoader<K, V, E, C>, Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BatchResult<V, E>> + Send + 'static,
  {
    self.validate()?;

    let schedule_fn = match self.schedule_fn.take() {
      Some(schedule_fn) => schedule_fn,
      None => self.default_schedule_fn()?,
    };
    let batch_fn: BatchFn<K, V, E, C> = Arc::new(
      move |loader: DataLoader<K, V, E, C>,
            keys: Vec<K>|
            -> Pin<Box<dyn Future<Output = BatchResult<V, E>> + Send>> {
        Box::pin(batch_fn(loader, keys))
      },
    );

    let cache_map = if self.options.cache {
      self.cache_map.take()
    } else {
      None
    };
    let max_batch_size = self.options.effective_max_batch_size();

    tracing::debug!(
      max_batch_size,
      caching = cache_map.is_some(),
      "building data loader"
    );

    Ok(DataLoader {
      shared: Arc::new(LoaderShared {
        batch_fn,
        cache_key_fn: self.cache_key_fn,
        schedule_fn,
        max_batch_size,
        caching: cache_map.is_some(),
        state: Mutex::new(LoaderState {
          current_batch: None,
          cache_map,
        }),
        metrics: Metrics::new(),
      }),
    })
  }

  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.options.max_batch_size == 0 {
      return Err(BuildError::InvalidMaxBatchSize(self.options.max_batch_size));
    }
    Ok(())
  }

  fn default_schedule_fn(&mut self) -> Result<ScheduleFn<K, V, E, C>, BuildError> {
    #[allow(unused_mut)]
    let mut spawner = self.spawner.take();
    #[cfg(feature = "tokio")]
    if spawner.is_none() {
      spawner = crate::runtime::TokioSpawner::try_current()
        .map(|spawner| Arc::new(spawner) as Arc<dyn TaskSpawner>);
    }
    let spawner = spawner.ok_or(BuildError::SpawnerRequired)?;

    let scheduler = DeferredScheduler::new(spawner);
    Ok(Arc::new(move |_: &DataLoader<K, V, E, C>, dispatch: Dispatch| {
      scheduler.schedule(dispatch)
    }))
  }
}
