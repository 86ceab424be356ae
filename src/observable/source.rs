//! Source factories (spec.md §4.F): the leaves of an operator chain, each
//! implemented directly as an `Observable::new` `subscribeActual`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::Observable;
use crate::disposable::{terminal, CallbackDisposable, Disposable};
use crate::error::{self, RxError};
use crate::observer::{EmitterHandle, EmitterImpl, ObserverRef};
use crate::scheduler::{self, SchedulerRef};

/// `create(fn)`: builds an emitter, calls `downstream.onSubscribe(emitter)`,
/// then invokes `fn(emitter)`. A panic from `fn` is converted to `onError`
/// on the emitter rather than unwinding into the subscriber.
pub fn create<T: Send + 'static>(
  producer: impl Fn(EmitterHandle<T>) + Send + Sync + 'static,
) -> Observable<T> {
  Observable::new(move |downstream: ObserverRef<T>| {
    let emitter = EmitterImpl::new(downstream.clone());
    downstream.on_subscribe(emitter.clone());
    let emitter_for_producer: EmitterHandle<T> = emitter.clone();
    if error::catch(std::panic::AssertUnwindSafe(|| producer(emitter_for_producer))).is_err() {
      emitter.on_error(RxError::custom(ProducerPanicked));
    }
  })
}

#[derive(Debug)]
struct ProducerPanicked;
impl std::fmt::Display for ProducerPanicked {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "create() producer panicked") }
}
impl std::error::Error for ProducerPanicked {}

/// `fromArray([v…])`: emits each item synchronously on the subscribing
/// thread, then completes. Disposal observed between items stops emission.
pub fn from_array<T: Clone + Send + 'static>(items: Vec<T>) -> Observable<T> {
  Observable::new(move |downstream: ObserverRef<T>| {
    let d = crate::disposable::SimpleDisposable::new();
    let d: Arc<crate::disposable::SimpleDisposable> = Arc::new(d);
    downstream.on_subscribe(d.clone());
    for item in items.iter().cloned() {
      if d.is_disposed() { return; }
      downstream.on_next(item);
    }
    if !d.is_disposed() {
      downstream.on_complete();
    }
  })
}

/// `just(v)`: a single-element [from_array].
pub fn just<T: Clone + Send + 'static>(v: T) -> Observable<T> { from_array(vec![v]) }

/// `range(start, count)`: emits `count` consecutive integers starting at
/// `start`, rejecting overflow at construction time the way spec.md §4.F
/// requires rather than wrapping silently.
pub fn range(start: i64, count: u64) -> Observable<i64> {
  if count > 0 {
    let last = count - 1;
    start.checked_add(last as i64).expect("range(start, count) overflows i64");
  }
  Observable::new(move |downstream: ObserverRef<i64>| {
    let d: Arc<crate::disposable::SimpleDisposable> = Arc::new(crate::disposable::SimpleDisposable::new());
    downstream.on_subscribe(d.clone());
    for i in 0..count {
      if d.is_disposed() { return; }
      downstream.on_next(start + i as i64);
    }
    if !d.is_disposed() {
      downstream.on_complete();
    }
  })
}

/// `empty`: `onSubscribe(terminal) ; onComplete()`.
pub fn empty<T: Send + 'static>() -> Observable<T> {
  Observable::new(|downstream: ObserverRef<T>| {
    downstream.on_subscribe(terminal());
    downstream.on_complete();
  })
}

/// `never`: `onSubscribe(terminal)`, then silence forever.
pub fn never<T: Send + 'static>() -> Observable<T> {
  Observable::new(|downstream: ObserverRef<T>| {
    downstream.on_subscribe(terminal());
  })
}

/// `error(e)`: `onSubscribe(terminal) ; onError(e)`.
pub fn error<T: Send + 'static>(e: RxError) -> Observable<T> {
  Observable::new(move |downstream: ObserverRef<T>| {
    downstream.on_subscribe(terminal());
    downstream.on_error(e.clone());
  })
}

/// `defer(src)`: forwards `subscribe` to whatever `src()` returns, so state
/// captured by the factory closure is re-built fresh per subscription.
pub fn defer<T: Send + 'static>(factory: impl Fn() -> Observable<T> + Send + Sync + 'static) -> Observable<T> {
  Observable::new(move |downstream: ObserverRef<T>| {
    factory().subscribe_with(downstream);
  })
}

/// `fromCallable(fn)`: calls `fn` at subscribe time on the subscribing
/// thread; emits its result then completes, or `onError` on panic/`Err`.
pub fn from_callable<T: Send + 'static>(
  f: impl Fn() -> Result<T, RxError> + Send + Sync + 'static,
) -> Observable<T> {
  Observable::new(move |downstream: ObserverRef<T>| {
    let d: Arc<crate::disposable::SimpleDisposable> = Arc::new(crate::disposable::SimpleDisposable::new());
    downstream.on_subscribe(d.clone());
    if d.is_disposed() { return; }
    match error::catch(std::panic::AssertUnwindSafe(&f)) {
      Ok(Ok(v)) => {
        if d.is_disposed() { return; }
        downstream.on_next(v);
        if !d.is_disposed() {
          downstream.on_complete();
        }
      }
      Ok(Err(e)) => downstream.on_error(e),
      Err(e) => downstream.on_error(e),
    }
  })
}

/// `timer(delay)`: schedules a single `onNext(0); onComplete()` on a worker
/// drawn from the global scheduler.
pub fn timer(delay: Duration) -> Observable<i64> { timer_on(delay, scheduler::global()) }

/// `timer(delay)` against an explicit scheduler (spec.md §9: time operators
/// default to the global scheduler but accept an explicit one).
pub fn timer_on(delay: Duration, sched: SchedulerRef) -> Observable<i64> {
  Observable::new(move |downstream: ObserverRef<i64>| {
    let worker = sched.create_worker();
    downstream.on_subscribe(worker_disposable(&worker));
    worker.schedule(delay, Box::new(move || {
      downstream.on_next(0);
      downstream.on_complete();
    }));
  })
}

/// A [Disposable] handle that disposes `worker`, for handing a worker to
/// `onSubscribe` without relying on trait-object upcasting from `dyn
/// Worker` to `dyn Disposable`.
fn worker_disposable(worker: &scheduler::WorkerRef) -> crate::disposable::DisposableHandle {
  let worker = worker.clone();
  CallbackDisposable::new(move || worker.dispose())
}

/// `interval(initialDelay, period)`: periodic emissions of a monotonically
/// increasing counter until disposed.
pub fn interval(initial_delay: Duration, period: Duration) -> Observable<i64> {
  interval_on(initial_delay, period, scheduler::global())
}

/// `interval` against an explicit scheduler.
pub fn interval_on(initial_delay: Duration, period: Duration, sched: SchedulerRef) -> Observable<i64> {
  Observable::new(move |downstream: ObserverRef<i64>| {
    let worker = sched.create_worker();
    downstream.on_subscribe(worker_disposable(&worker));
    let counter = Arc::new(AtomicI64::new(0));
    schedule_tick(worker, downstream, counter, initial_delay, period);
  })
}

fn schedule_tick(
  worker: scheduler::WorkerRef,
  downstream: ObserverRef<i64>,
  counter: Arc<AtomicI64>,
  delay: Duration,
  period: Duration,
) {
  let worker_for_tick = worker.clone();
  worker.schedule(delay, Box::new(move || {
    if worker_for_tick.is_disposed() { return; }
    let n = counter.fetch_add(1, Ordering::AcqRel);
    downstream.on_next(n);
    schedule_tick(worker_for_tick, downstream, counter, period, period);
  }));
}

#[cfg(test)]
mod test {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering as O};
  use std::sync::mpsc::channel;
  use std::sync::Mutex;

  #[test]
  fn just_emits_one_then_completes() {
    let (tx, rx) = channel();
    just(42).subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.recv().unwrap(), 42);
  }

  #[test]
  fn from_array_emits_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let completed = Arc::new(AtomicUsize::new(0));
    let completed2 = completed.clone();
    from_array(vec![1, 2, 3]).subscribe(
      move |v| seen2.lock().unwrap().push(v),
      |_| {},
      move || { completed2.fetch_add(1, O::SeqCst); },
    );
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(completed.load(O::SeqCst), 1);
  }

  #[test]
  fn range_rejects_overflowing_construction() {
    let result = std::panic::catch_unwind(|| range(i64::MAX - 1, 5));
    assert!(result.is_err());
  }

  #[test]
  fn range_emits_consecutive_values() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    range(5, 3).subscribe(move |v| seen2.lock().unwrap().push(v), |_| {}, || {});
    assert_eq!(*seen.lock().unwrap(), vec![5, 6, 7]);
  }

  #[test]
  fn empty_completes_immediately() {
    let (tx, rx) = channel();
    empty::<i32>().subscribe(|_| {}, |_| {}, move || tx.send(()).unwrap());
    rx.recv().unwrap();
  }

  #[test]
  fn never_delivers_nothing() {
    let (tx, rx) = channel::<()>();
    let _d = never::<i32>().subscribe(move |_| { tx.send(()).unwrap(); }, |_| {}, || {});
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
  }

  #[test]
  fn error_delivers_the_given_error() {
    let (tx, rx) = channel();
    error::<i32>(RxError::NoElements).subscribe(|_| {}, move |e| tx.send(e.to_string()).unwrap(), || {});
    assert_eq!(rx.recv().unwrap(), RxError::NoElements.to_string());
  }

  #[test]
  fn defer_rebuilds_state_per_subscription() {
    let counter = Arc::new(AtomicUsize::new(0));
    let c2 = counter.clone();
    let src = defer(move || {
      let n = c2.fetch_add(1, O::SeqCst);
      just(n)
    });
    let (tx, rx) = channel();
    let tx2 = tx.clone();
    src.subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    src.subscribe(move |v| tx2.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.recv().unwrap(), 0);
    assert_eq!(rx.recv().unwrap(), 1);
  }

  #[test]
  fn from_callable_emits_ok_result() {
    let (tx, rx) = channel();
    from_callable(|| Ok(7)).subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.recv().unwrap(), 7);
  }

  #[test]
  fn from_callable_surfaces_err_result() {
    let (tx, rx) = channel();
    from_callable(|| Err(RxError::Timeout)).subscribe(|_| {}, move |e| tx.send(e.to_string()).unwrap(), || {});
    assert_eq!(rx.recv().unwrap(), RxError::Timeout.to_string());
  }

  #[test]
  fn timer_fires_once_after_delay() {
    let (tx, rx) = channel();
    let start = std::time::Instant::now();
    timer(Duration::from_millis(20)).subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 0);
    assert!(start.elapsed() >= Duration::from_millis(15));
  }

  #[test]
  fn interval_ticks_with_increasing_counter() {
    let (tx, rx) = channel();
    let d = interval(Duration::from_millis(5), Duration::from_millis(5)).subscribe(
      move |v| tx.send(v).unwrap(),
      |_| {},
      || {},
    );
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 0);
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
    d.dispose();
  }
}
