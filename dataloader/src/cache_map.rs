use crate::error::{LoadError, LoadResult};
use crate::slot::ResultSlot;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// The storage a `DataLoader` uses to remember loads by cache key.
///
/// Implementations do not need their own synchronization: the loader only
/// touches its cache map while holding its internal state lock. Any store with
/// these four capabilities can be plugged in (bounded, TTL based, instrumented).
pub trait CacheMap<C, T>: Send + 'static {
  /// Returns the entry for `key`, if present.
  fn get(&self, key: &C) -> Option<T>;
  /// Inserts or replaces the entry for `key`.
  fn set(&mut self, key: C, value: T);
  /// Removes the entry for `key`, if present.
  fn delete(&mut self, key: &C);
  /// Removes all entries.
  fn clear(&mut self);
}

/// A shared handle to a result that may still be loading.
///
/// This is the value type a `DataLoader` stores in its [`CacheMap`]. Every
/// clone refers to the same underlying slot.
pub struct PendingResult<V, E> {
  pub(crate) slot: Arc<ResultSlot<LoadResult<V, E>>>,
}

impl<V, E> PendingResult<V, E>
where
  V: Clone,
{
  pub(crate) fn new() -> Self {
    Self {
      slot: Arc::new(ResultSlot::new()),
    }
  }

  pub(crate) fn resolved(result: LoadResult<V, E>) -> Self {
    Self {
      slot: Arc::new(ResultSlot::resolved(result)),
    }
  }

  /// Creates a handle that already holds `result`.
  pub fn from_result(result: Result<V, E>) -> Self {
    Self::resolved(result.map_err(|error| LoadError::Rejected(Arc::new(error))))
  }

  /// Returns `true` once the result is available.
  pub fn is_complete(&self) -> bool {
    self.slot.is_complete()
  }

  /// Returns the result if it is available, without waiting.
  pub fn try_get(&self) -> Option<LoadResult<V, E>> {
    self.slot.try_get()
  }

  /// Waits for the result.
  pub async fn wait(&self) -> LoadResult<V, E> {
    (&*self.slot).await
  }

  /// Returns `true` if both handles refer to the same slot.
  pub fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.slot, &other.slot)
  }
}

impl<V, E> Clone for PendingResult<V, E> {
  fn clone(&self) -> Self {
    Self {
      slot: Arc::clone(&self.slot),
    }
  }
}

impl<V, E> fmt::Debug for PendingResult<V, E>
where
  V: Clone + fmt::Debug,
  E: fmt::Debug,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PendingResult")
      .field("result", &self.slot.try_get())
      .finish()
  }
}

/// The default cache map: an unsynchronized in-memory hash map.
pub struct InMemoryCacheMap<C, T, H = ahash::RandomState> {
  map: HashMap<C, T, H>,
}

impl<C, T> InMemoryCacheMap<C, T, ahash::RandomState> {
  /// Creates an empty map using the default `ahash` hasher.
  pub fn new() -> Self {
    Self {
      map: HashMap::with_hasher(ahash::RandomState::new()),
    }
  }
}

impl<C, T> Default for InMemoryCacheMap<C, T, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

impl<C, T, H> InMemoryCacheMap<C, T, H>
where
  C: Eq + Hash,
  H: BuildHasher,
{
  /// Creates an empty map with the given hasher.
  pub fn with_hasher(hasher: H) -> Self {
    Self {
      map: HashMap::with_hasher(hasher),
    }
  }

  /// The number of cached entries.
  pub fn len(&self) -> usize {
    self.map.len()
  }

  /// Returns `true` if nothing is cached.
  pub fn is_empty(&self) -> bool {
    self.map.is_empty()
  }

  /// Returns `true` if an entry exists for `key`.
  pub fn contains_key(&self, key: &C) -> bool {
    self.map.contains_key(key)
  }
}

impl<C, T, H> fmt::Debug for InMemoryCacheMap<C, T, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("InMemoryCacheMap")
      .field("len", &self.map.len())
      .finish()
  }
}

impl<C, T, H> CacheMap<C, T> for InMemoryCacheMap<C, T, H>
where
  C: Eq + Hash + Send + 'static,
  T: Clone + Send + 'static,
  H: BuildHasher + Send + 'static,
{
  fn get(&self, key: &C) -> Option<T> {
    self.map.get(key).cloned()
  }

  fn set(&mut self, key: C, value: T) {
    self.map.insert(key, value);
  }

  fn delete(&mut self, key: &C) {
    self.map.remove(key);
  }

  fn clear(&mut self) {
    self.map.clear();
  }
}
