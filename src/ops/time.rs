//! Time and cross-scheduler operators (spec.md §4.J): the operators that
//! move emission from one thread to another, or gate it by elapsed time.
//! `delay`/`debounce`/`timeout`/`sample` default to the global scheduler
//! when none is given (spec.md §9), hence the `Option<SchedulerRef>`
//! parameter threaded through each constructor here.
//!
//! Grounded on `examples/original_source/rx/include/rx/operators/observable_observe_on.h`
//! (the `VecDeque` + work-in-progress drain discipline, reused here via
//! [crate::drain::WipLoop]) and the sibling `observable_{delay,debounce,
//! sample,timeout}.h` files for each operator's own state machine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::frame_ref;
use crate::disposable::{CallbackDisposable, Disposable, DisposableHandle, SequentialDisposable};
use crate::drain::WipLoop;
use crate::error::RxError;
use crate::observable::Observable;
use crate::observer::{Done, Observer, ObserverRef};
use crate::scheduler::{self, SchedulerRef, WorkerRef};

fn resolve(sched: Option<SchedulerRef>) -> SchedulerRef { sched.unwrap_or_else(scheduler::global) }

/// `observeOn(sched)`: every event is appended to a per-subscription queue;
/// a drain routine guarded by a [WipLoop] runs on the scheduler and
/// forwards events one at a time to downstream, preserving upstream order
/// regardless of which thread(s) produced them.
impl<T: Send + 'static> Observable<T> {
  pub fn observe_on(&self, sched: SchedulerRef) -> Observable<T> {
    let source = self.clone();
    Observable::new(move |downstream: ObserverRef<T>| {
      let state = Arc::new(ObserveOnState {
        downstream,
        upstream: SequentialDisposable::new(),
        worker: sched.create_worker(),
        queue: Mutex::new(VecDeque::new()),
        wip: WipLoop::new(),
        done: Done::new(),
      });
      let for_dispose = state.clone();
      state.downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
      let frame = Arc::new(ObserveOnFrame { state: state.clone() });
      source.subscribe_with(frame_ref(frame));
    })
  }
}

enum ObserveOnEvent<T> {
  Next(T),
  Error(RxError),
  Complete,
}

struct ObserveOnState<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  worker: WorkerRef,
  queue: Mutex<VecDeque<ObserveOnEvent<T>>>,
  wip: WipLoop,
  done: Done,
}

impl<T: Send + 'static> ObserveOnState<T> {
  fn dispose_all(&self) {
    if self.done.mark() {
      self.upstream.dispose();
      self.worker.dispose();
      self.queue.lock().unwrap().clear();
    }
  }

  fn push(self: &Arc<Self>, ev: ObserveOnEvent<T>) {
    if self.done.is_done() {
      return;
    }
    self.queue.lock().unwrap().push_back(ev);
    if self.wip.schedule() {
      let this = self.clone();
      self.worker.schedule(Duration::ZERO, Box::new(move || this.drain()));
    }
  }

  fn drain(self: &Arc<Self>) {
    let this = self.clone();
    self.wip.drain(move || this.drain_step());
  }

  fn drain_step(&self) -> bool {
    if self.done.is_done() {
      return false;
    }
    match self.queue.lock().unwrap().pop_front() {
      Some(ObserveOnEvent::Next(v)) => {
        self.downstream.on_next(v);
        true
      },
      Some(ObserveOnEvent::Error(e)) => {
        if self.done.mark() {
          self.upstream.dispose();
          self.downstream.on_error(e);
        }
        false
      },
      Some(ObserveOnEvent::Complete) => {
        if self.done.mark() {
          self.downstream.on_complete();
        }
        false
      },
      None => false,
    }
  }
}

struct ObserveOnFrame<T> {
  state: Arc<ObserveOnState<T>>,
}

impl<T: Send + 'static> Observer<T> for ObserveOnFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream.set_once(d); }
  fn on_next(&self, v: T) { self.state.push(ObserveOnEvent::Next(v)); }
  fn on_error(&self, e: RxError) { self.state.push(ObserveOnEvent::Error(e)); }
  fn on_complete(&self) { self.state.push(ObserveOnEvent::Complete); }
}

/// `subscribeOn(sched)`: the actual `subscribe(upstream)` call is itself
/// scheduled on `sched`'s worker; downstream still receives events on
/// whatever thread upstream emits from. Disposing the handle downstream
/// was given cancels the pending schedule if it hasn't run yet, or the
/// upstream subscription once it has.
impl<T: Send + 'static> Observable<T> {
  pub fn subscribe_on(&self, sched: SchedulerRef) -> Observable<T> {
    let source = self.clone();
    Observable::new(move |downstream: ObserverRef<T>| {
      let worker = sched.create_worker();
      let upstream = Arc::new(SequentialDisposable::new());
      let worker_for_dispose = worker.clone();
      let upstream_for_dispose = upstream.clone();
      downstream.on_subscribe(CallbackDisposable::new(move || {
        worker_for_dispose.dispose();
        upstream_for_dispose.dispose();
      }));
      let frame = Arc::new(SubscribeOnFrame { downstream: downstream.clone(), upstream: upstream.clone() });
      let source_for_task = source.clone();
      worker.schedule(Duration::ZERO, Box::new(move || source_for_task.subscribe_with(frame_ref(frame))));
    })
  }
}

struct SubscribeOnFrame<T> {
  downstream: ObserverRef<T>,
  upstream: Arc<SequentialDisposable>,
}

impl<T: Send + 'static> Observer<T> for SubscribeOnFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) { self.downstream.on_next(v); }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

/// `delay(d, sched?)`: every event is re-scheduled after `d` on a worker
/// that preserves order (the timer engine is FIFO for equal deadlines —
/// spec.md §4.D — so scheduling each event in arrival order with the same
/// relative delay keeps their relative order).
impl<T: Send + 'static> Observable<T> {
  pub fn delay(&self, delay: Duration, sched: Option<SchedulerRef>) -> Observable<T> {
    let source = self.clone();
    let sched = resolve(sched);
    Observable::new(move |downstream: ObserverRef<T>| {
      let state = Arc::new(DelayState {
        downstream,
        upstream: SequentialDisposable::new(),
        worker: sched.create_worker(),
        delay,
        done: Done::new(),
      });
      let for_dispose = state.clone();
      state.downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
      let frame = Arc::new(DelayFrame { state: state.clone() });
      source.subscribe_with(frame_ref(frame));
    })
  }
}

struct DelayState<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  worker: WorkerRef,
  delay: Duration,
  done: Done,
}

impl<T: Send + 'static> DelayState<T> {
  fn dispose_all(&self) {
    if self.done.mark() {
      self.upstream.dispose();
      self.worker.dispose();
    }
  }
}

struct DelayFrame<T> {
  state: Arc<DelayState<T>>,
}

impl<T: Send + 'static> Observer<T> for DelayFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream.set_once(d); }

  fn on_next(&self, v: T) {
    let state = self.state.clone();
    self.state.worker.schedule(
      self.state.delay,
      Box::new(move || {
        if !state.done.is_done() {
          state.downstream.on_next(v);
        }
      }),
    );
  }

  fn on_error(&self, e: RxError) {
    let state = self.state.clone();
    self.state.worker.schedule(
      self.state.delay,
      Box::new(move || {
        if state.done.mark() {
          state.downstream.on_error(e);
        }
      }),
    );
  }

  fn on_complete(&self) {
    let state = self.state.clone();
    self.state.worker.schedule(
      self.state.delay,
      Box::new(move || {
        if state.done.mark() {
          state.downstream.on_complete();
        }
      }),
    );
  }
}

/// `debounce(d, sched?)`: remember the latest value; each new value cancels
/// any previously scheduled emission (via [SequentialDisposable::set]) and
/// schedules a new one `d` later. On complete, the pending value (if any)
/// is emitted before forwarding completion.
impl<T: Clone + Send + 'static> Observable<T> {
  pub fn debounce(&self, delay: Duration, sched: Option<SchedulerRef>) -> Observable<T> {
    let source = self.clone();
    let sched = resolve(sched);
    Observable::new(move |downstream: ObserverRef<T>| {
      let state = Arc::new(DebounceState {
        downstream,
        upstream: SequentialDisposable::new(),
        pending: SequentialDisposable::new(),
        latest: Mutex::new(None),
        worker: sched.create_worker(),
        delay,
        done: Done::new(),
      });
      let for_dispose = state.clone();
      state.downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
      let frame = Arc::new(DebounceFrame { state: state.clone() });
      source.subscribe_with(frame_ref(frame));
    })
  }
}

struct DebounceState<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  pending: SequentialDisposable,
  latest: Mutex<Option<T>>,
  worker: WorkerRef,
  delay: Duration,
  done: Done,
}

impl<T: Send + 'static> DebounceState<T> {
  fn dispose_all(&self) {
    if self.done.mark() {
      self.upstream.dispose();
      self.pending.dispose();
      self.worker.dispose();
    }
  }
}

struct DebounceFrame<T> {
  state: Arc<DebounceState<T>>,
}

impl<T: Clone + Send + 'static> Observer<T> for DebounceFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream.set_once(d); }

  fn on_next(&self, v: T) {
    if self.state.done.is_done() {
      return;
    }
    *self.state.latest.lock().unwrap() = Some(v);
    let state = self.state.clone();
    let handle = self.state.worker.schedule(
      self.state.delay,
      Box::new(move || {
        if state.done.is_done() {
          return;
        }
        if let Some(v) = state.latest.lock().unwrap().take() {
          state.downstream.on_next(v);
        }
      }),
    );
    self.state.pending.set(handle);
  }

  fn on_error(&self, e: RxError) {
    if self.state.done.mark() {
      self.state.pending.dispose();
      self.state.downstream.on_error(e);
    }
  }

  fn on_complete(&self) {
    if !self.state.done.mark() {
      return;
    }
    self.state.pending.dispose();
    if let Some(v) = self.state.latest.lock().unwrap().take() {
      self.state.downstream.on_next(v);
    }
    self.state.downstream.on_complete();
  }
}

/// `sample(period, sched?)`: on every tick, emit the latest value (if any)
/// exactly once, then wait for the latest value to be replaced again.
impl<T: Send + 'static> Observable<T> {
  pub fn sample(&self, period: Duration, sched: Option<SchedulerRef>) -> Observable<T> {
    let source = self.clone();
    let sched = resolve(sched);
    Observable::new(move |downstream: ObserverRef<T>| {
      let state = Arc::new(SampleState {
        downstream,
        upstream: SequentialDisposable::new(),
        worker: sched.create_worker(),
        period,
        latest: Mutex::new(None),
        done: Done::new(),
      });
      let for_dispose = state.clone();
      state.downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
      schedule_sample_tick(state.clone());
      let frame = Arc::new(SampleFrame { state: state.clone() });
      source.subscribe_with(frame_ref(frame));
    })
  }
}

struct SampleState<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  worker: WorkerRef,
  period: Duration,
  latest: Mutex<Option<T>>,
  done: Done,
}

impl<T: Send + 'static> SampleState<T> {
  fn dispose_all(&self) {
    if self.done.mark() {
      self.upstream.dispose();
      self.worker.dispose();
    }
  }
}

fn schedule_sample_tick<T: Send + 'static>(state: Arc<SampleState<T>>) {
  let worker = state.worker.clone();
  let period = state.period;
  worker.schedule(
    period,
    Box::new(move || {
      if state.worker.is_disposed() {
        return;
      }
      if let Some(v) = state.latest.lock().unwrap().take() {
        state.downstream.on_next(v);
      }
      schedule_sample_tick(state);
    }),
  );
}

struct SampleFrame<T> {
  state: Arc<SampleState<T>>,
}

impl<T: Send + 'static> Observer<T> for SampleFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream.set_once(d); }
  fn on_next(&self, v: T) { *self.state.latest.lock().unwrap() = Some(v); }
  fn on_error(&self, e: RxError) {
    if self.state.done.mark() {
      self.state.worker.dispose();
      self.state.downstream.on_error(e);
    }
  }
  fn on_complete(&self) {
    if self.state.done.mark() {
      self.state.worker.dispose();
      self.state.downstream.on_complete();
    }
  }
}

/// `timeout(d, sched?, fallback?)`: an index counter increments on every
/// `onNext`, resetting a `d`-timer; if the timer fires while the counter is
/// unchanged, either subscribe `fallback` or surface [RxError::Timeout].
impl<T: Send + 'static> Observable<T> {
  pub fn timeout(&self, delay: Duration, sched: Option<SchedulerRef>, fallback: Option<Observable<T>>) -> Observable<T> {
    let source = self.clone();
    let sched = resolve(sched);
    Observable::new(move |downstream: ObserverRef<T>| {
      let state = Arc::new(TimeoutState {
        downstream,
        upstream: SequentialDisposable::new(),
        timer: SequentialDisposable::new(),
        inner: SequentialDisposable::new(),
        worker: sched.create_worker(),
        delay,
        index: AtomicU64::new(0),
        fallback: fallback.clone(),
        done: Done::new(),
        switched: Done::new(),
      });
      let for_dispose = state.clone();
      state.downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
      let frame = Arc::new(TimeoutFrame { state: state.clone() });
      source.subscribe_with(frame_ref(frame));
    })
  }
}

struct TimeoutState<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  timer: SequentialDisposable,
  inner: SequentialDisposable,
  worker: WorkerRef,
  delay: Duration,
  index: AtomicU64,
  fallback: Option<Observable<T>>,
  done: Done,
  switched: Done,
}

impl<T: Send + 'static> TimeoutState<T> {
  fn dispose_all(&self) {
    if self.done.mark() {
      self.upstream.dispose();
      self.timer.dispose();
      self.inner.dispose();
      self.worker.dispose();
    }
  }

  fn reset_timer(self: &Arc<Self>) {
    let my_index = self.index.fetch_add(1, Ordering::AcqRel) + 1;
    let this = self.clone();
    let handle = self.worker.schedule(self.delay, Box::new(move || this.fire(my_index)));
    self.timer.set(handle);
  }

  fn fire(self: &Arc<Self>, expected: u64) {
    if self.done.is_done() {
      return;
    }
    if self.index.load(Ordering::Acquire) != expected {
      return;
    }
    match self.fallback.clone() {
      Some(fb) => {
        if !self.switched.mark() {
          return;
        }
        self.upstream.dispose();
        let frame = Arc::new(TimeoutFallbackFrame { state: self.clone() });
        fb.subscribe_with(frame_ref(frame));
      },
      None => {
        if self.done.mark() {
          self.upstream.dispose();
          self.downstream.on_error(RxError::Timeout);
        }
      },
    }
  }
}

struct TimeoutFrame<T> {
  state: Arc<TimeoutState<T>>,
}

impl<T: Send + 'static> Observer<T> for TimeoutFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) {
    self.state.upstream.set_once(d);
    self.state.reset_timer();
  }

  fn on_next(&self, v: T) {
    if self.state.switched.is_done() || self.state.done.is_done() {
      return;
    }
    self.state.reset_timer();
    self.state.downstream.on_next(v);
  }

  fn on_error(&self, e: RxError) {
    if self.state.switched.is_done() {
      return;
    }
    if self.state.done.mark() {
      self.state.timer.dispose();
      self.state.downstream.on_error(e);
    }
  }

  fn on_complete(&self) {
    if self.state.switched.is_done() {
      return;
    }
    if self.state.done.mark() {
      self.state.timer.dispose();
      self.state.downstream.on_complete();
    }
  }
}

struct TimeoutFallbackFrame<T> {
  state: Arc<TimeoutState<T>>,
}

impl<T: Send + 'static> Observer<T> for TimeoutFallbackFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.inner.set_once(d); }
  fn on_next(&self, v: T) {
    if !self.state.done.is_done() {
      self.state.downstream.on_next(v);
    }
  }
  fn on_error(&self, e: RxError) {
    if self.state.done.mark() {
      self.state.downstream.on_error(e);
    }
  }
  fn on_complete(&self) {
    if self.state.done.mark() {
      self.state.downstream.on_complete();
    }
  }
}

/// `takeUntil(other)`: any event from `other` (including `onComplete`)
/// terminates downstream with `onComplete`; an `onError` from `other`
/// propagates.
impl<T: Send + 'static> Observable<T> {
  pub fn take_until<U: Send + 'static>(&self, other: Observable<U>) -> Observable<T> {
    let source = self.clone();
    Observable::new(move |downstream: ObserverRef<T>| {
      let state = Arc::new(TakeUntilState {
        downstream,
        upstream: SequentialDisposable::new(),
        notifier: SequentialDisposable::new(),
        done: Done::new(),
      });
      let for_dispose = state.clone();
      state.downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
      let notifier_frame = Arc::new(TakeUntilNotifierFrame { state: state.clone(), _marker: std::marker::PhantomData });
      other.subscribe_with(frame_ref(notifier_frame));
      let frame = Arc::new(TakeUntilFrame { state: state.clone() });
      source.subscribe_with(frame_ref(frame));
    })
  }
}

struct TakeUntilState<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  notifier: SequentialDisposable,
  done: Done,
}

impl<T: Send + 'static> TakeUntilState<T> {
  fn dispose_all(&self) {
    if self.done.mark() {
      self.upstream.dispose();
      self.notifier.dispose();
    }
  }
}

struct TakeUntilFrame<T> {
  state: Arc<TakeUntilState<T>>,
}

impl<T: Send + 'static> Observer<T> for TakeUntilFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    if !self.state.done.is_done() {
      self.state.downstream.on_next(v);
    }
  }
  fn on_error(&self, e: RxError) {
    if self.state.done.mark() {
      self.state.notifier.dispose();
      self.state.downstream.on_error(e);
    }
  }
  fn on_complete(&self) {
    if self.state.done.mark() {
      self.state.notifier.dispose();
      self.state.downstream.on_complete();
    }
  }
}

struct TakeUntilNotifierFrame<T, U> {
  state: Arc<TakeUntilState<T>>,
  _marker: std::marker::PhantomData<fn() -> U>,
}

impl<T: Send + 'static, U: Send + 'static> Observer<U> for TakeUntilNotifierFrame<T, U> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.notifier.set_once(d); }
  fn on_next(&self, _v: U) {
    if self.state.done.mark() {
      self.state.upstream.dispose();
      self.state.downstream.on_complete();
    }
  }
  fn on_error(&self, e: RxError) {
    if self.state.done.mark() {
      self.state.upstream.dispose();
      self.state.downstream.on_error(e);
    }
  }
  fn on_complete(&self) {
    if self.state.done.mark() {
      self.state.upstream.dispose();
      self.state.downstream.on_complete();
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::observable::source;
  use crate::scheduler::TaskSystemScheduler;
  use std::sync::mpsc::channel;
  use std::sync::Mutex as StdMutex;

  #[test]
  fn observe_on_delivers_in_order_on_the_scheduler() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    let (tx, rx) = channel();
    source::range(0, 5).observe_on(TaskSystemScheduler::create()).subscribe(
      move |v| out2.lock().unwrap().push(v),
      |_| {},
      move || tx.send(()).unwrap(),
    );
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(*out.lock().unwrap(), vec![0, 1, 2, 3, 4]);
  }

  #[test]
  fn subscribe_on_runs_the_subscribe_call_on_the_scheduler() {
    let (tx, rx) = channel();
    source::just(7).subscribe_on(TaskSystemScheduler::create()).subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 7);
  }

  #[test]
  fn delay_preserves_order_and_postpones_emission() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    let (tx, rx) = channel();
    let start = std::time::Instant::now();
    source::from_array(vec![1, 2, 3]).delay(Duration::from_millis(20), None).subscribe(
      move |v| out2.lock().unwrap().push(v),
      |_| {},
      move || tx.send(()).unwrap(),
    );
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(*out.lock().unwrap(), vec![1, 2, 3]);
    assert!(start.elapsed() >= Duration::from_millis(15));
  }

  #[test]
  fn debounce_collapses_rapid_values_to_the_last() {
    let (tx, rx) = channel();
    let sched = TaskSystemScheduler::create();
    source::from_array(vec![1, 2, 3]).debounce(Duration::from_millis(30), Some(sched)).subscribe(
      move |v| tx.send(v).unwrap(),
      |_| {},
      || {},
    );
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 3);
  }

  #[test]
  fn sample_emits_latest_value_once_per_tick() {
    let (tx, rx) = channel();
    let sched = TaskSystemScheduler::create();
    source::interval_on(Duration::ZERO, Duration::from_millis(5), sched.clone())
      .take(20)
      .sample(Duration::from_millis(30), Some(sched))
      .take(1)
      .subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    let v = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(v > 0);
  }

  #[test]
  fn timeout_without_fallback_errors_after_silence() {
    let (tx, rx) = channel();
    source::never::<i32>().timeout(Duration::from_millis(30), None, None).subscribe(
      |_| {},
      move |e| tx.send(e.to_string()).unwrap(),
      || {},
    );
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), RxError::Timeout.to_string());
  }

  #[test]
  fn timeout_with_fallback_switches_to_it() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    let (tx, rx) = channel();
    source::never::<i32>()
      .timeout(Duration::from_millis(20), None, Some(source::just(99)))
      .subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, move || tx.send(()).unwrap());
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(*out.lock().unwrap(), vec![99]);
  }

  #[test]
  fn take_until_stops_on_notifier_emission() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    let (tx, rx) = channel();
    let sched = TaskSystemScheduler::create();
    source::interval_on(Duration::ZERO, Duration::from_millis(10), sched.clone())
      .take_until(source::timer_on(Duration::from_millis(55), sched))
      .subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, move || tx.send(()).unwrap());
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(!out.lock().unwrap().is_empty());
  }
}
