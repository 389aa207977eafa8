//! Strategies deciding when an open batch is dispatched.

use crate::runtime::TaskSpawner;

use core::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;

/// The number of executor turns the default scheduler yields before dispatching.
pub const DEFAULT_DEFER_TICKS: usize = 6;

/// The continuation that dispatches one batch.
///
/// A scheduler receives exactly one `Dispatch` per batch and must eventually
/// await it. Until it does, the batch keeps accepting keys; once it starts,
/// the batch is closed and the next load opens a new one.
#[must_use = "a batch is never loaded unless its dispatch is awaited"]
pub struct Dispatch {
  future: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl Dispatch {
  pub(crate) fn new(future: impl Future<Output = ()> + Send + 'static) -> Self {
    Self {
      future: Box::pin(future),
    }
  }

  /// Runs the batch to completion.
  pub async fn run(self) {
    self.future.await
  }
}

impl IntoFuture for Dispatch {
  type Output = ();
  type IntoFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

  fn into_future(self) -> Self::IntoFuture {
    self.future
  }
}

impl fmt::Debug for Dispatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Dispatch").finish_non_exhaustive()
  }
}

/// Decides when a batch's dispatch runs.
pub trait BatchScheduler: Send + Sync + 'static {
  /// Called once per batch, when the batch receives its first entry.
  fn schedule(&self, dispatch: Dispatch);
}

/// The default scheduler: spawns the dispatch and lets it yield a few executor
/// turns first.
///
/// Loads issued by nested tasks in the same unit of work get a chance to join
/// the batch before it closes.
#[derive(Clone)]
pub struct DeferredScheduler {
  spawner: Arc<dyn TaskSpawner>,
  ticks: usize,
}

impl DeferredScheduler {
  /// Creates a scheduler deferring by [`DEFAULT_DEFER_TICKS`] turns.
  pub fn new(spawner: Arc<dyn TaskSpawner>) -> Self {
    Self {
      spawner,
      ticks: DEFAULT_DEFER_TICKS,
    }
  }

  /// Sets how many executor turns to yield before dispatching.
  pub fn ticks(mut self, ticks: usize) -> Self {
    self.ticks = ticks;
    self
  }
}

impl fmt::Debug for DeferredScheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DeferredScheduler")
      .field("ticks", &self.ticks)
      .finish_non_exhaustive()
  }
}

impl BatchScheduler for DeferredScheduler {
  fn schedule(&self, dispatch: Dispatch) {
    let ticks = self.ticks;
    self.spawner.spawn(Box::pin(async move {
      for _ in 0..ticks {
        YieldNow::default().await;
      }
      dispatch.await;
    }));
  }
}

/// A scheduler that holds dispatches until [`ManualScheduler::flush`] is called.
///
/// Clones share the same queue, so one clone can be handed to the loader
/// builder while another drives the flushes.
#[derive(Clone, Default)]
pub struct ManualScheduler {
  pending: Arc<Mutex<Vec<Dispatch>>>,
}

impl ManualScheduler {
  /// Creates a scheduler with an empty queue.
  pub fn new() -> Self {
    Self::default()
  }

  /// The number of batches waiting to be flushed.
  pub fn pending(&self) -> usize {
    self.pending.lock().len()
  }

  /// Dispatches every batch scheduled so far, in the order they were opened.
  ///
  /// Returns the number of batches dispatched.
  pub async fn flush(&self) -> usize {
    let batches = std::mem::take(&mut *self.pending.lock());
    let count = batches.len();
    for dispatch in batches {
      dispatch.await;
    }
    count
  }
}

impl fmt::Debug for ManualScheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManualScheduler")
      .field("pending", &self.pending())
      .finish()
  }
}

impl BatchScheduler for ManualScheduler {
  fn schedule(&self, dispatch: Dispatch) {
    self.pending.lock().push(dispatch);
  }
}

/// Yields once to the executor.
#[derive(Default)]
struct YieldNow {
  yielded: bool,
}

impl Future for YieldNow {
  type Output = ();

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
    if self.yielded {
      return Poll::Ready(());
    }
    self.yielded = true;
    cx.waker().wake_by_ref();
    Poll::Pending
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};

  #[test]
  fn manual_scheduler_runs_dispatches_on_flush() {
    let scheduler = ManualScheduler::new();
    let ran = Arc::new(AtomicBool::new(false));

    let flag = ran.clone();
    scheduler.schedule(Dispatch::new(async move {
      flag.store(true, Ordering::SeqCst);
    }));
    assert_eq!(scheduler.pending(), 1);
    assert!(!ran.load(Ordering::SeqCst));

    let flushed = futures_executor::block_on(scheduler.flush());
    assert_eq!(flushed, 1);
    assert_eq!(scheduler.pending(), 0);
    assert!(ran.load(Ordering::SeqCst));
  }

  #[test]
  fn yield_now_completes_on_second_poll() {
    futures_executor::block_on(async {
      YieldNow::default().await;
      YieldNow::default().await;
    });
  }
}
