#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The plain-data part of a loader's configuration.
///
/// With the `serde` feature enabled this can be read straight from a
/// configuration file and applied with `LoaderBuilder::options`. Missing
/// fields take their default values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LoaderOptions {
  /// Whether distinct keys are collected into batches. `false` sends every
  /// key to the batch function on its own.
  pub batch: bool,
  /// Whether loads are remembered in the cache map.
  pub cache: bool,
  /// The largest number of keys handed to the batch function at once.
  pub max_batch_size: usize,
}

impl LoaderOptions {
  /// The batch size actually used, taking `batch` into account.
  pub fn effective_max_batch_size(&self) -> usize {
    if self.batch {
      self.max_batch_size
    } else {
      1
    }
  }
}

impl Default for LoaderOptions {
  fn default() -> Self {
    Self {
      batch: true,
      cache: true,
      max_batch_size: usize::MAX,
    }
  }
}
