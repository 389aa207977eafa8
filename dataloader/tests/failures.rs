mod common;

use common::init_tracing;
use fibre_dataloader::{DataLoader, LoadError, ManualScheduler};
use futures_util::{future, poll};
use parking_lot::Mutex;
use std::error::Error as _;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Builds a loader whose batch function fails as a whole while `failing` is set.
fn flaky_loader(
  failing: Arc<AtomicBool>,
  recorded: Arc<Mutex<Vec<Vec<u32>>>>,
) -> DataLoader<u32, u32, String> {
  DataLoader::builder()
    .build(move |_, keys: Vec<u32>| {
      recorded.lock().push(keys.clone());
      let fail = failing.load(Ordering::SeqCst);
      async move {
        if fail {
          Err("database unavailable".to_string())
        } else {
          Ok(keys.into_iter().map(Ok).collect())
        }
      }
    })
    .unwrap()
}

#[tokio::test]
async fn test_batch_failure_is_shared_by_every_key() {
  init_tracing();
  let failing = Arc::new(AtomicBool::new(true));
  let recorded: Arc<Mutex<Vec<Vec<u32>>>> = Arc::default();
  let loader = flaky_loader(failing.clone(), recorded.clone());

  let (a, b) = future::join(loader.load(1), loader.load(2)).await;
  let (a, b) = (a.unwrap_err(), b.unwrap_err());
  assert!(matches!(a, LoadError::BatchFailed(_)));
  assert!(a.is_batch_failure());
  assert!(a.ptr_eq(&b), "Both keys observe the same error instance");
  assert_eq!(a.to_string(), "batch load failed: database unavailable");
  assert_eq!(loader.metrics().batch_failures, 1);

  // The failed keys were evicted, so they are retried.
  failing.store(false, Ordering::SeqCst);
  let values = loader.load_many(vec![1, 2]).await;
  assert_eq!(values[0].as_ref().unwrap(), &1);
  assert_eq!(values[1].as_ref().unwrap(), &2);
  assert_eq!(*recorded.lock(), vec![vec![1, 2], vec![1, 2]]);
}

#[tokio::test]
async fn test_cache_hits_survive_a_failing_batch() {
  let failing = Arc::new(AtomicBool::new(true));
  let loader = flaky_loader(failing, Arc::default());

  loader.prime(&1, 10);
  let (hit, miss) = future::join(loader.load(1), loader.load(2)).await;
  assert_eq!(hit.unwrap(), 10);
  assert!(miss.unwrap_err().is_batch_failure());

  // Key 2 was evicted, which leaves room to prime it.
  loader.prime(&2, 20);
  assert_eq!(loader.load(2).await.unwrap(), 20);
}

#[tokio::test]
async fn test_size_mismatch_fails_the_batch() {
  let loader = DataLoader::<u32, u32, String>::builder()
    .build(|_, keys: Vec<u32>| async move {
      Ok(keys.into_iter().skip(1).map(Ok).collect())
    })
    .unwrap();

  let (a, b) = future::join(loader.load(1), loader.load(2)).await;
  let (a, b) = (a.unwrap_err(), b.unwrap_err());
  assert!(a.ptr_eq(&b));
  let LoadError::SizeMismatch(mismatch) = &a else {
    panic!("expected a size mismatch, got {:?}", a);
  };
  assert_eq!(mismatch.expected, 2);
  assert_eq!(mismatch.received, 1);
  assert_eq!(
    a.to_string(),
    "batch function returned 1 results for 2 keys.\n\nKeys:\n1, 2\n\nResults:\nOk(2)"
  );
  assert_eq!(loader.metrics().contract_violations, 1);

  // Mismatched keys are evicted as well.
  loader.prime(&1, 100);
  assert_eq!(loader.load(1).await.unwrap(), 100);
}

#[tokio::test]
async fn test_panicking_batch_function_fails_its_keys() {
  let loader = DataLoader::<u32, u32, String>::builder()
    .build(|_, keys: Vec<u32>| async move {
      if keys.contains(&13) {
        panic!("unlucky key");
      }
      Ok(keys.into_iter().map(Ok).collect())
    })
    .unwrap();

  let (a, b) = future::join(loader.load(12), loader.load(13)).await;
  let (a, b) = (a.unwrap_err(), b.unwrap_err());
  assert!(a.ptr_eq(&b));
  assert!(matches!(&a, LoadError::Panicked(message) if &**message == "unlucky key"));
  assert!(a.inner().is_none());

  // The loader keeps working afterwards.
  assert_eq!(loader.load(12).await.unwrap(), 12);
}

#[tokio::test]
async fn test_panic_before_the_future_is_returned() {
  let loader = DataLoader::<u32, u32, String>::builder()
    .build(|_, keys: Vec<u32>| {
      if keys.contains(&0) {
        panic!("zero is reserved");
      }
      async move { Ok(keys.into_iter().map(Ok).collect()) }
    })
    .unwrap();

  let error = loader.load(0).await.unwrap_err();
  assert_eq!(error.to_string(), "batch function panicked: zero is reserved");
}

#[derive(Debug, thiserror::Error)]
#[error("row {0} is missing")]
struct MissingRow(u32);

#[tokio::test]
async fn test_errors_expose_their_source() {
  let loader = DataLoader::<u32, u32, MissingRow>::builder()
    .build(|_, keys: Vec<u32>| async move {
      Ok(keys.into_iter().map(|key| Err(MissingRow(key))).collect())
    })
    .unwrap();

  let error = loader.load(4).await.unwrap_err();
  assert_eq!(error.to_string(), "row 4 is missing");
  assert_eq!(error.source().unwrap().to_string(), "row 4 is missing");
  assert_eq!(error.inner().unwrap().0, 4);
}

#[tokio::test]
async fn test_failed_batch_keeps_a_newer_load_of_the_same_key() {
  let scheduler = ManualScheduler::new();
  let gate = Arc::new(Semaphore::new(0));
  let load_count = Arc::new(AtomicUsize::new(0));

  let loader = DataLoader::<u32, u32, String>::builder()
    .batch_scheduler(scheduler.clone())
    .build({
      let gate = gate.clone();
      let load_count = load_count.clone();
      move |_, keys: Vec<u32>| {
        let call = load_count.fetch_add(1, Ordering::SeqCst);
        let gate = gate.clone();
        async move {
          if call == 0 {
            // The first batch stays in flight until released, then fails.
            gate.acquire().await.unwrap().forget();
            return Err("stale".to_string());
          }
          Ok(keys.into_iter().map(Ok).collect())
        }
      }
    })
    .unwrap();

  let mut first = Box::pin(loader.load(1));
  assert!(poll!(&mut first).is_pending());
  let mut first_flush = Box::pin(scheduler.flush());
  assert!(poll!(&mut first_flush).is_pending(), "The first batch is in flight");

  // A new load after the clear opens its own batch and cache entry.
  loader.clear(&1);
  let mut second = Box::pin(loader.load(1));
  assert!(poll!(&mut second).is_pending());

  gate.add_permits(1);
  assert_eq!(first_flush.await, 1);
  assert!(first.await.unwrap_err().is_batch_failure());

  let (second, flushed) = future::join(second, scheduler.flush()).await;
  assert_eq!(second.unwrap(), 1);
  assert_eq!(flushed, 1);

  // The failing batch did not evict the newer entry.
  let (third, _) = future::join(loader.load(1), scheduler.flush()).await;
  assert_eq!(third.unwrap(), 1);
  assert_eq!(load_count.load(Ordering::SeqCst), 2);
}
