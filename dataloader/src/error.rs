use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur when building a `DataLoader`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// The loader was configured with a maximum batch size of zero.
  #[error("'max_batch_size' must be positive: {0}")]
  InvalidMaxBatchSize(usize),
  /// The default batch scheduler was selected, but no `TaskSpawner` was
  /// configured and no Tokio runtime could be found.
  #[error("the default batch scheduler requires a task spawner or a running Tokio runtime")]
  SpawnerRequired,
}

/// The batch function broke its contract of returning exactly one result per
/// key it received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BatchSizeMismatch {
  /// The number of keys passed to the batch function.
  pub expected: usize,
  /// The number of results the batch function returned.
  pub received: usize,
  message: String,
}

impl BatchSizeMismatch {
  pub(crate) fn new<K, R>(keys: &[K], results: &[R]) -> Self
  where
    K: fmt::Debug,
    R: fmt::Debug,
  {
    let message = format!(
      "batch function returned {} results for {} keys.\n\nKeys:\n{}\n\nResults:\n{}",
      results.len(),
      keys.len(),
      join_debug(keys),
      join_debug(results),
    );

    Self {
      expected: keys.len(),
      received: results.len(),
      message,
    }
  }
}

fn join_debug<T: fmt::Debug>(items: &[T]) -> String {
  items
    .iter()
    .map(|item| format!("{:?}", item))
    .collect::<Vec<_>>()
    .join(", ")
}

/// The failure side of a load.
///
/// Every variant holds its payload behind an `Arc`, so all callers that
/// observe the same failure (coalesced loads, cache hits, every key of a failed
/// batch) receive the same instance. Use [`LoadError::ptr_eq`] to check that.
pub enum LoadError<E> {
  /// The batch function returned a failure for this particular key.
  Rejected(Arc<E>),
  /// The batch function itself failed. Every key of the batch receives this
  /// same error and its cache entry is evicted.
  BatchFailed(Arc<E>),
  /// The batch function returned a different number of results than keys.
  SizeMismatch(Arc<BatchSizeMismatch>),
  /// The batch function panicked while producing results.
  Panicked(Arc<str>),
}

impl<E> LoadError<E> {
  /// Returns the user error carried by this failure, if there is one.
  pub fn inner(&self) -> Option<&E> {
    match self {
      LoadError::Rejected(error) | LoadError::BatchFailed(error) => Some(error.as_ref()),
      LoadError::SizeMismatch(_) | LoadError::Panicked(_) => None,
    }
  }

  /// Returns `true` if the failure concerns the whole batch rather than this key.
  pub fn is_batch_failure(&self) -> bool {
    !matches!(self, LoadError::Rejected(_))
  }

  /// Returns `true` if both errors are the very same failure instance.
  pub fn ptr_eq(&self, other: &Self) -> bool {
    match (self, other) {
      (LoadError::Rejected(a), LoadError::Rejected(b))
      | (LoadError::BatchFailed(a), LoadError::BatchFailed(b)) => Arc::ptr_eq(a, b),
      (LoadError::SizeMismatch(a), LoadError::SizeMismatch(b)) => Arc::ptr_eq(a, b),
      (LoadError::Panicked(a), LoadError::Panicked(b)) => Arc::ptr_eq(a, b),
      _ => false,
    }
  }
}

// Manual Clone so that `E` does not need to be `Clone`.
impl<E> Clone for LoadError<E> {
  fn clone(&self) -> Self {
    match self {
      LoadError::Rejected(error) => LoadError::Rejected(Arc::clone(error)),
      LoadError::BatchFailed(error) => LoadError::BatchFailed(Arc::clone(error)),
      LoadError::SizeMismatch(error) => LoadError::SizeMismatch(Arc::clone(error)),
      LoadError::Panicked(message) => LoadError::Panicked(Arc::clone(message)),
    }
  }
}

impl<E: fmt::Debug> fmt::Debug for LoadError<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LoadError::Rejected(error) => f.debug_tuple("Rejected").field(error).finish(),
      LoadError::BatchFailed(error) => f.debug_tuple("BatchFailed").field(error).finish(),
      LoadError::SizeMismatch(error) => f.debug_tuple("SizeMismatch").field(error).finish(),
      LoadError::Panicked(message) => f.debug_tuple("Panicked").field(message).finish(),
    }
  }
}

impl<E: fmt::Display> fmt::Display for LoadError<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LoadError::Rejected(error) => write!(f, "{}", error),
      LoadError::BatchFailed(error) => write!(f, "batch load failed: {}", error),
      LoadError::SizeMismatch(error) => write!(f, "{}", error),
      LoadError::Panicked(message) => write!(f, "batch function panicked: {}", message),
    }
  }
}

impl<E> StdError for LoadError<E>
where
  E: StdError + 'static,
{
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    match self {
      LoadError::Rejected(error) | LoadError::BatchFailed(error) => Some(&**error),
      LoadError::SizeMismatch(error) => Some(&**error),
      LoadError::Panicked(_) => None,
    }
  }
}

/// The outcome of loading a single key.
pub type LoadResult<V, E> = Result<V, LoadError<E>>;
