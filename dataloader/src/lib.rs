//! A batching and caching data loader.
//!
//! A [`DataLoader`] sits between the code asking for items by key and a bulk
//! fetch function. Independent loads issued close together are collected into
//! one batch and fetched with a single call; repeated loads of the same key
//! share one cached result.
//!
//! # Features
//! - **Batching**: Distinct keys loaded in the same unit of work are handed to
//!   the batch function together, capped by `max_batch_size`.
//! - **Coalescing & Caching**: Loads of a key that is already loading or
//!   loaded join the existing result, through a pluggable [`CacheMap`].
//! - **Pluggable Scheduling**: A [`BatchScheduler`] decides when a batch is
//!   dispatched. The default defers on any [`TaskSpawner`]; [`ManualScheduler`]
//!   leaves it to the caller.
//! - **Shared Failures**: A failed batch hands the same error instance to every
//!   key in it and evicts them, so later loads retry.
//! - **Observability**: Exposes metrics on hits, batches, and failures.
//!
//! # Example
//!
//! ```no_run
//! use fibre_dataloader::DataLoader;
//!
//! # async fn run() {
//! let loader = DataLoader::<u64, String, String>::builder()
//!   .max_batch_size(100)
//!   .build(|_loader, ids: Vec<u64>| async move {
//!     Ok(ids.into_iter().map(|id| Ok(format!("user-{}", id))).collect())
//!   })
//!   .unwrap();
//!
//! let (a, b) = tokio::join!(loader.load(1), loader.load(2));
//! assert_eq!(a.unwrap(), "user-1");
//! assert_eq!(b.unwrap(), "user-2");
//! # }
//! ```

// Public modules that form the API
pub mod builder;
pub mod cache_map;
pub mod error;
pub mod metrics;
pub mod options;
pub mod runtime;
pub mod scheduler;

// Internal, crate-only modules
mod batch;
mod loader;
mod slot;

// Re-export the primary user-facing types for convenience
pub use builder::LoaderBuilder;
pub use cache_map::{CacheMap, InMemoryCacheMap, PendingResult};
pub use error::{BatchSizeMismatch, BuildError, LoadError, LoadResult};
pub use loader::{BatchResult, DataLoader};
pub use metrics::MetricsSnapshot;
pub use options::LoaderOptions;
pub use runtime::TaskSpawner;
#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
pub use scheduler::{BatchScheduler, DeferredScheduler, Dispatch, ManualScheduler, DEFAULT_DEFER_TICKS};
