//! Blocking sinks (spec.md §4.L): the three operations that park the
//! calling thread until the observable reaches a terminal state,
//! translating the push protocol back into a synchronous call. Built on a
//! `Condvar` + `Mutex<State>` the way
//! `examples/original_source/rx/include/rx/observers/blocking_first_observer.h`,
//! `blocking_last_observer.h`, and `blocking_for_each_observer.h` each wait
//! on their own outcome slot.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Condvar, Mutex};

use crate::disposable::{Disposable, DisposableHandle, SequentialDisposable};
use crate::error::{self, RxError};
use crate::observable::Observable;
use crate::observer::{Observer, ObserverRef};

enum FirstOutcome<T> {
  Value(T),
  Error(RxError),
  Complete,
}

struct FirstState<T> {
  slot: Mutex<Option<FirstOutcome<T>>>,
  cv: Condvar,
}

/// `blockingFirst(default?)`: parks until the first `onNext` (disposing
/// upstream immediately once it arrives), or until a terminal event with
/// no elements seen. Absent a `default`, an empty source surfaces
/// [RxError::NoElements].
impl<T: Send + 'static> Observable<T> {
  pub fn blocking_first(&self, default: Option<T>) -> Result<T, RxError> {
    let state = Arc::new(FirstState { slot: Mutex::new(None), cv: Condvar::new() });
    let upstream = Arc::new(SequentialDisposable::new());
    let frame: ObserverRef<T> = Arc::new(BlockingFirstFrame { state: state.clone(), upstream });
    self.subscribe_with(frame);

    let mut guard = state.slot.lock().unwrap();
    while guard.is_none() {
      guard = state.cv.wait(guard).unwrap();
    }
    match guard.take().unwrap() {
      FirstOutcome::Value(v) => Ok(v),
      FirstOutcome::Error(e) => Err(e),
      FirstOutcome::Complete => default.ok_or(RxError::NoElements),
    }
  }
}

struct BlockingFirstFrame<T> {
  state: Arc<FirstState<T>>,
  upstream: Arc<SequentialDisposable>,
}

impl<T: Send + 'static> Observer<T> for BlockingFirstFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }

  fn on_next(&self, v: T) {
    let mut guard = self.state.slot.lock().unwrap();
    if guard.is_none() {
      *guard = Some(FirstOutcome::Value(v));
      self.upstream.dispose();
      self.state.cv.notify_all();
    }
  }

  fn on_error(&self, e: RxError) {
    let mut guard = self.state.slot.lock().unwrap();
    if guard.is_none() {
      *guard = Some(FirstOutcome::Error(e));
      self.state.cv.notify_all();
    }
  }

  fn on_complete(&self) {
    let mut guard = self.state.slot.lock().unwrap();
    if guard.is_none() {
      *guard = Some(FirstOutcome::Complete);
      self.state.cv.notify_all();
    }
  }
}

enum TerminalOutcome {
  Error(RxError),
  Complete,
}

struct LastState<T> {
  latest: Mutex<Option<T>>,
  outcome: Mutex<Option<TerminalOutcome>>,
  cv: Condvar,
}

/// `blockingLast(default?)`: parks until termination, then returns the
/// most recent value seen (or `default`, or [RxError::NoElements]).
impl<T: Send + 'static> Observable<T> {
  pub fn blocking_last(&self, default: Option<T>) -> Result<T, RxError> {
    let state = Arc::new(LastState { latest: Mutex::new(None), outcome: Mutex::new(None), cv: Condvar::new() });
    let upstream = Arc::new(SequentialDisposable::new());
    let frame: ObserverRef<T> = Arc::new(BlockingLastFrame { state: state.clone(), upstream });
    self.subscribe_with(frame);

    let mut guard = state.outcome.lock().unwrap();
    while guard.is_none() {
      guard = state.cv.wait(guard).unwrap();
    }
    match guard.take().unwrap() {
      TerminalOutcome::Complete => state.latest.lock().unwrap().take().or(default).ok_or(RxError::NoElements),
      TerminalOutcome::Error(e) => Err(e),
    }
  }
}

struct BlockingLastFrame<T> {
  state: Arc<LastState<T>>,
  upstream: Arc<SequentialDisposable>,
}

impl<T: Send + 'static> Observer<T> for BlockingLastFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) { *self.state.latest.lock().unwrap() = Some(v); }

  fn on_error(&self, e: RxError) {
    let mut guard = self.state.outcome.lock().unwrap();
    if guard.is_none() {
      *guard = Some(TerminalOutcome::Error(e));
      self.state.cv.notify_all();
    }
  }

  fn on_complete(&self) {
    let mut guard = self.state.outcome.lock().unwrap();
    if guard.is_none() {
      *guard = Some(TerminalOutcome::Complete);
      self.state.cv.notify_all();
    }
  }
}

struct ForEachState {
  outcome: Mutex<Option<Result<(), RxError>>>,
  cv: Condvar,
}

/// `blockingForEach(f)`: invokes `f` for every value on whatever thread
/// upstream emits from, parking the caller until termination. A panic
/// from `f` disposes upstream and surfaces as `Err` on the calling thread
/// instead of unwinding through the producer.
impl<T: Send + 'static> Observable<T> {
  pub fn blocking_for_each(&self, f: impl FnMut(T) + Send + 'static) -> Result<(), RxError> {
    let state = Arc::new(ForEachState { outcome: Mutex::new(None), cv: Condvar::new() });
    let upstream = Arc::new(SequentialDisposable::new());
    let frame: ObserverRef<T> = Arc::new(BlockingForEachFrame {
      state: state.clone(),
      upstream,
      f: Mutex::new(Box::new(f)),
    });
    self.subscribe_with(frame);

    let mut guard = state.outcome.lock().unwrap();
    while guard.is_none() {
      guard = state.cv.wait(guard).unwrap();
    }
    guard.take().unwrap()
  }
}

struct BlockingForEachFrame<T> {
  state: Arc<ForEachState>,
  upstream: Arc<SequentialDisposable>,
  f: Mutex<Box<dyn FnMut(T) + Send>>,
}

impl<T: Send + 'static> BlockingForEachFrame<T> {
  fn finish(&self, outcome: Result<(), RxError>) {
    let mut guard = self.state.outcome.lock().unwrap();
    if guard.is_none() {
      *guard = Some(outcome);
      self.state.cv.notify_all();
    }
  }
}

impl<T: Send + 'static> Observer<T> for BlockingForEachFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }

  fn on_next(&self, v: T) {
    let mut f = self.f.lock().unwrap();
    if let Err(e) = error::catch(AssertUnwindSafe(|| (f)(v))) {
      drop(f);
      self.upstream.dispose();
      self.finish(Err(e));
    }
  }

  fn on_error(&self, e: RxError) { self.finish(Err(e)); }
  fn on_complete(&self) { self.finish(Ok(())); }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::observable::source;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  #[test]
  fn blocking_first_returns_the_first_value() {
    assert_eq!(source::from_array(vec![1, 2, 3]).blocking_first(None).unwrap(), 1);
  }

  #[test]
  fn blocking_first_on_empty_uses_default() {
    assert_eq!(source::empty::<i32>().blocking_first(Some(-1)).unwrap(), -1);
  }

  #[test]
  fn blocking_first_on_empty_without_default_errors() {
    assert!(matches!(source::empty::<i32>().blocking_first(None), Err(RxError::NoElements)));
  }

  #[test]
  fn blocking_first_surfaces_error() {
    assert!(matches!(source::error::<i32>(RxError::Timeout).blocking_first(None), Err(RxError::Timeout)));
  }

  #[test]
  fn blocking_first_does_not_wait_for_later_values() {
    let start = std::time::Instant::now();
    let v = source::interval(Duration::ZERO, Duration::from_millis(500)).blocking_first(None).unwrap();
    assert_eq!(v, 0);
    assert!(start.elapsed() < Duration::from_millis(400));
  }

  #[test]
  fn blocking_last_returns_the_final_value() {
    assert_eq!(source::from_array(vec![1, 2, 3]).blocking_last(None).unwrap(), 3);
  }

  #[test]
  fn blocking_last_on_empty_uses_default() {
    assert_eq!(source::empty::<i32>().blocking_last(Some(7)).unwrap(), 7);
  }

  #[test]
  fn blocking_last_surfaces_error() {
    assert!(matches!(source::error::<i32>(RxError::Timeout).blocking_last(None), Err(RxError::Timeout)));
  }

  #[test]
  fn blocking_for_each_visits_every_value_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let result = source::from_array(vec![1, 2, 3]).blocking_for_each(move |v| seen2.lock().unwrap().push(v));
    assert!(result.is_ok());
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
  }

  #[test]
  fn blocking_for_each_surfaces_upstream_error() {
    let count = Arc::new(AtomicUsize::new(0));
    let count2 = count.clone();
    let result = source::error::<i32>(RxError::Timeout).blocking_for_each(move |_| { count2.fetch_add(1, Ordering::SeqCst); });
    assert!(matches!(result, Err(RxError::Timeout)));
    assert_eq!(count.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn blocking_for_each_panic_surfaces_as_error() {
    let result = source::from_array(vec![1, 2, 3]).blocking_for_each(|v| if v == 2 { panic!("boom") });
    assert!(result.is_err());
  }
}
