#![allow(dead_code)]

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use fibre_dataloader::{DataLoader, LoaderBuilder};
use parking_lot::Mutex;

/// Every key list the batch function was called with, in call order.
pub type Calls<K> = Arc<Mutex<Vec<Vec<K>>>>;

/// Builds a loader that resolves every key to itself and records its calls.
pub fn identity_loader<K>(builder: LoaderBuilder<K, K, String, K>) -> (DataLoader<K, K, String>, Calls<K>)
where
  K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
  let calls: Calls<K> = Arc::default();
  let recorded = calls.clone();
  let loader = builder
    .build(move |_, keys: Vec<K>| {
      recorded.lock().push(keys.clone());
      async move { Ok(keys.into_iter().map(Ok).collect()) }
    })
    .unwrap();
  (loader, calls)
}

/// Snapshot of the recorded calls.
pub fn calls<K: Clone>(calls: &Calls<K>) -> Vec<Vec<K>> {
  calls.lock().clone()
}

pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}
