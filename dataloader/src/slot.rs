use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// Represents a waiter registered on a `ResultSlot`.
enum Waiter<T> {
  Async(Waker),
  Callback(Box<dyn FnOnce(&T) + Send>),
}

impl<T> Waiter<T> {
  fn notify(self, value: &T) {
    match self {
      Waiter::Async(waker) => waker.wake(),
      Waiter::Callback(callback) => callback(value),
    }
  }
}

/// The internal state of a slot.
enum State<T> {
  Pending,
  Complete(T),
}

/// The internal, mutex-protected core of the slot.
struct Inner<T> {
  state: State<T>,
  waiters: Vec<Waiter<T>>,
}

/// A single-assignment value that can be awaited by many tasks at once.
///
/// The first call to `complete` wins; later calls are ignored. Awaiting a
/// completed slot yields a clone of its value.
pub(crate) struct ResultSlot<T> {
  inner: Mutex<Inner<T>>,
}

impl<T: Clone> ResultSlot<T> {
  /// Creates a new slot in the "Pending" state.
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Pending,
        waiters: Vec::new(),
      }),
    }
  }

  /// Creates a slot that is already complete.
  pub(crate) fn resolved(value: T) -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Complete(value),
        waiters: Vec::new(),
      }),
    }
  }

  pub(crate) fn is_complete(&self) -> bool {
    matches!(self.inner.lock().state, State::Complete(_))
  }

  /// Returns a clone of the value if the slot is complete.
  pub(crate) fn try_get(&self) -> Option<T> {
    match &self.inner.lock().state {
      State::Complete(value) => Some(value.clone()),
      State::Pending => None,
    }
  }

  /// Completes the slot, waking all waiters and running registered callbacks.
  ///
  /// Returns `false` if the slot was already complete.
  pub(crate) fn complete(&self, value: T) -> bool {
    let waiters = {
      let mut inner = self.inner.lock();
      if let State::Complete(_) = inner.state {
        return false;
      }
      inner.state = State::Complete(value.clone());
      std::mem::take(&mut inner.waiters)
    };

    // Notified outside the lock: callbacks complete other slots.
    for waiter in waiters {
      waiter.notify(&value);
    }
    true
  }

  /// Runs `callback` with the value once the slot completes. If it already is
  /// complete, the callback runs immediately on the calling thread.
  pub(crate) fn on_complete(&self, callback: impl FnOnce(&T) + Send + 'static) {
    let value = {
      let mut inner = self.inner.lock();
      match &inner.state {
        State::Complete(value) => value.clone(),
        State::Pending => {
          inner.waiters.push(Waiter::Callback(Box::new(callback)));
          return;
        }
      }
    };
    callback(&value);
  }
}

impl<T: Clone> Future for &ResultSlot<T> {
  type Output = T;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Complete(value) => Poll::Ready(value.clone()),
      State::Pending => {
        let registered = inner.waiters.iter().any(|waiter| match waiter {
          Waiter::Async(waker) => waker.will_wake(cx.waker()),
          Waiter::Callback(_) => false,
        });
        if !registered {
          inner.waiters.push(Waiter::Async(cx.waker().clone()));
        }
        Poll::Pending
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[test]
  fn completes_only_once() {
    let slot = ResultSlot::new();
    assert!(!slot.is_complete());
    assert!(slot.complete(1));
    assert!(!slot.complete(2));
    assert_eq!(slot.try_get(), Some(1));
  }

  #[test]
  fn callbacks_run_on_completion_or_immediately() {
    let calls = Arc::new(AtomicUsize::new(0));
    let slot = ResultSlot::new();

    let counter = calls.clone();
    slot.on_complete(move |value: &usize| {
      counter.fetch_add(*value, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    slot.complete(5);
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    let counter = calls.clone();
    slot.on_complete(move |value: &usize| {
      counter.fetch_add(*value, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 10);
  }

  #[test]
  fn many_waiters_observe_the_same_value() {
    let slot = Arc::new(ResultSlot::new());
    let waiters: Vec<_> = (0..4)
      .map(|_| {
        let slot = slot.clone();
        std::thread::spawn(move || futures_executor::block_on(&*slot))
      })
      .collect();

    std::thread::sleep(std::time::Duration::from_millis(20));
    slot.complete("done".to_string());

    for waiter in waiters {
      assert_eq!(waiter.join().unwrap(), "done");
    }
  }

  #[test]
  fn resolved_slot_is_ready() {
    let slot = ResultSlot::resolved(7);
    assert!(slot.is_complete());
    assert_eq!(futures_executor::block_on(&slot), 7);
  }
}
