//! Flattening operators (spec.md §4.H): `flat_map` runs every inner
//! concurrently and serializes delivery behind a gate; `concat_map` runs
//! one inner at a time off a FIFO queue drained through a
//! [crate::drain::WipLoop]; `switch_map` keeps only the most recent inner,
//! tagging events with a generation id so a stale inner cannot deliver
//! after it has been superseded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::frame_ref;
use crate::disposable::{CallbackDisposable, Disposable, DisposableHandle, SequentialDisposable};
use crate::drain::WipLoop;
use crate::error::RxError;
use crate::observable::Observable;
use crate::observer::{Done, Observer, ObserverRef};

/// `flatMap(f)`: every inner subscribed immediately, all run concurrently;
/// emissions are forwarded one at a time into downstream under a mutex
/// gate. A termination count tracks the outer plus every active inner;
/// downstream completes when it reaches zero. Any `onError` disposes
/// everything and terminates the whole chain.
impl<T: Send + 'static> Observable<T> {
  pub fn flat_map<U: Send + 'static>(&self, f: impl Fn(T) -> Observable<U> + Send + Sync + 'static) -> Observable<U> {
    let source = self.clone();
    let f = Arc::new(f);
    Observable::new(move |downstream: ObserverRef<U>| {
      let state = Arc::new(FlatMapState {
        downstream,
        gate: Mutex::new(()),
        pending_terminations: AtomicUsize::new(1),
        done: Done::new(),
        upstream: SequentialDisposable::new(),
        inners: Mutex::new(Vec::new()),
      });
      state.downstream_on_subscribe();
      let frame = Arc::new(FlatMapOuterFrame { state: state.clone(), f: f.clone() });
      source.subscribe_with(frame);
    })
  }
}

struct FlatMapState<U> {
  downstream: ObserverRef<U>,
  gate: Mutex<()>,
  pending_terminations: AtomicUsize,
  done: Done,
  upstream: SequentialDisposable,
  inners: Mutex<Vec<DisposableHandle>>,
}

impl<U: Send + 'static> FlatMapState<U> {
  fn downstream_on_subscribe(self: &Arc<Self>) {
    let this = self.clone();
    self.downstream.on_subscribe(CallbackDisposable::new(move || this.dispose_all()));
  }

  fn dispose_all(&self) {
    if self.done.mark() {
      self.upstream.dispose();
      for inner in self.inners.lock().unwrap().drain(..) {
        inner.dispose();
      }
    }
  }

  fn register_inner(&self, d: DisposableHandle) {
    self.pending_terminations.fetch_add(1, Ordering::AcqRel);
    self.inners.lock().unwrap().push(d);
  }

  fn one_terminated(&self) {
    if self.pending_terminations.fetch_sub(1, Ordering::AcqRel) == 1 && self.done.mark() {
      self.downstream.on_complete();
    }
  }

  fn forward_next(&self, v: U) {
    let _guard = self.gate.lock().unwrap();
    if !self.done.is_done() {
      self.downstream.on_next(v);
    }
  }

  fn forward_error(&self, e: RxError) {
    if self.done.mark() {
      self.upstream.dispose();
      for inner in self.inners.lock().unwrap().drain(..) {
        inner.dispose();
      }
      self.downstream.on_error(e);
    }
  }
}

struct FlatMapOuterFrame<T, U, F> {
  state: Arc<FlatMapState<U>>,
  f: Arc<F>,
  _marker: std::marker::PhantomData<T>,
}

impl<T, U, F> FlatMapOuterFrame<T, U, F> {
  fn new(state: Arc<FlatMapState<U>>, f: Arc<F>) -> Self { Self { state, f, _marker: std::marker::PhantomData } }
}

impl<T: Send + 'static, U: Send + 'static, F: Fn(T) -> Observable<U> + Send + Sync + 'static> Observer<T>
  for FlatMapOuterFrame<T, U, F>
{
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream.replace(d); }
  fn on_next(&self, v: T) {
    let inner = (self.f)(v);
    let inner_state = self.state.clone();
    let inner_disposable = Arc::new(SequentialDisposable::new());
    self.state.register_inner(inner_disposable.clone());
    let frame = Arc::new(FlatMapInnerFrame { state: inner_state, self_disposable: inner_disposable });
    inner.subscribe_with(frame_ref(frame));
  }
  fn on_error(&self, e: RxError) { self.state.forward_error(e); }
  fn on_complete(&self) { self.state.one_terminated(); }
}

struct FlatMapInnerFrame<U> {
  state: Arc<FlatMapState<U>>,
  self_disposable: Arc<SequentialDisposable>,
}

impl<U: Send + 'static> Observer<U> for FlatMapInnerFrame<U> {
  fn on_subscribe(&self, d: DisposableHandle) { self.self_disposable.set_once(d); }
  fn on_next(&self, v: U) { self.state.forward_next(v); }
  fn on_error(&self, e: RxError) { self.state.forward_error(e); }
  fn on_complete(&self) { self.state.one_terminated(); }
}

// `Arc::new(...)` above needed an explicit type fixup since `FlatMapOuterFrame`
// carries a `PhantomData` field; route construction through the helper so
// call sites read like a normal struct literal.
impl<T, U, F> FlatMapOuterFrame<T, U, F> {}

/// `concatMap(f)`: one active inner at a time; upstream values land in an
/// unbounded FIFO drained through a [WipLoop]-guarded routine that
/// subscribes the next inner once the previous one completes.
impl<T: Send + 'static> Observable<T> {
  pub fn concat_map<U: Send + 'static>(&self, f: impl Fn(T) -> Observable<U> + Send + Sync + 'static) -> Observable<U> {
    let source = self.clone();
    let f = Arc::new(f);
    Observable::new(move |downstream: ObserverRef<U>| {
      let state = Arc::new(ConcatMapState {
        downstream,
        f: f.clone(),
        queue: Mutex::new(VecDeque::new()),
        wip: WipLoop::new(),
        active: AtomicBool::new(false),
        upstream: SequentialDisposable::new(),
        inner: SequentialDisposable::new(),
        outer_done: Done::new(),
        done: Done::new(),
      });
      let for_dispose = state.clone();
      state.downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
      let frame = Arc::new(ConcatMapOuterFrame { state: state.clone() });
      source.subscribe_with(frame);
    })
  }
}

struct ConcatMapState<T, U, F> {
  downstream: ObserverRef<U>,
  f: Arc<F>,
  queue: Mutex<VecDeque<T>>,
  wip: WipLoop,
  /// Set while an inner is subscribed and not yet complete; `drive`'s step
  /// must not pop the next queued value until this clears in
  /// `inner_complete` — otherwise a second inner would be subscribed onto
  /// the same `inner` sequential cell and cancel the still-running first
  /// one (spec.md §4.H "concatMap: a single active inner at a time").
  active: AtomicBool,
  upstream: SequentialDisposable,
  inner: SequentialDisposable,
  outer_done: Done,
  done: Done,
}

impl<T: Send + 'static, U: Send + 'static, F: Fn(T) -> Observable<U> + Send + Sync + 'static> ConcatMapState<T, U, F> {
  fn dispose_all(&self) {
    if self.done.mark() {
      self.upstream.dispose();
      self.inner.dispose();
    }
  }

  fn drive(self: &Arc<Self>) {
    if !self.wip.schedule() {
      return;
    }
    let this = self.clone();
    this.wip.drain(move || {
      if this.done.is_done() {
        return false;
      }
      if this.active.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
        // an inner is already running; inner_complete will drive() again.
        return false;
      }
      let next = this.queue.lock().unwrap().pop_front();
      match next {
        Some(v) => {
          let inner = (this.f)(v);
          let frame = Arc::new(ConcatMapInnerFrame { state: this.clone() });
          inner.subscribe_with(frame_ref(frame));
          false
        }
        None => {
          this.active.store(false, Ordering::Release);
          false
        }
      }
    });
  }

  fn push(self: &Arc<Self>, v: T) {
    self.queue.lock().unwrap().push_back(v);
    self.drive();
  }

  fn inner_complete(self: &Arc<Self>) {
    self.active.store(false, Ordering::Release);
    if self.queue.lock().unwrap().is_empty() && self.outer_done.is_done() {
      if self.done.mark() {
        self.downstream.on_complete();
      }
      return;
    }
    self.drive();
  }
}

struct ConcatMapOuterFrame<T, U, F> {
  state: Arc<ConcatMapState<T, U, F>>,
}

impl<T: Send + 'static, U: Send + 'static, F: Fn(T) -> Observable<U> + Send + Sync + 'static> Observer<T>
  for ConcatMapOuterFrame<T, U, F>
{
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream.replace(d); }
  fn on_next(&self, v: T) { self.state.push(v); }
  fn on_error(&self, e: RxError) {
    if self.state.done.mark() {
      self.state.inner.dispose();
      self.state.downstream.on_error(e);
    }
  }
  fn on_complete(&self) {
    self.state.outer_done.mark();
    if self.state.queue.lock().unwrap().is_empty() && self.state.done.mark() {
      self.state.downstream.on_complete();
    }
  }
}

struct ConcatMapInnerFrame<T, U, F> {
  state: Arc<ConcatMapState<T, U, F>>,
}

impl<T: Send + 'static, U: Send + 'static, F: Fn(T) -> Observable<U> + Send + Sync + 'static> Observer<U>
  for ConcatMapInnerFrame<T, U, F>
{
  fn on_subscribe(&self, d: DisposableHandle) { self.state.inner.set(d); }
  fn on_next(&self, v: U) {
    if !self.state.done.is_done() {
      self.state.downstream.on_next(v);
    }
  }
  fn on_error(&self, e: RxError) {
    if self.state.done.mark() {
      self.state.upstream.dispose();
      self.state.downstream.on_error(e);
    }
  }
  fn on_complete(&self) { self.state.inner_complete(); }
}

/// `switchMap(f)`: each new outer value cancels the previous inner via the
/// sequential cell; inner events are delivered only if they belong to the
/// current generation. Outer complete waits for the current inner.
impl<T: Send + 'static> Observable<T> {
  pub fn switch_map<U: Send + 'static>(&self, f: impl Fn(T) -> Observable<U> + Send + Sync + 'static) -> Observable<U> {
    let source = self.clone();
    let f = Arc::new(f);
    Observable::new(move |downstream: ObserverRef<U>| {
      let state = Arc::new(SwitchMapState {
        downstream,
        f: f.clone(),
        upstream: SequentialDisposable::new(),
        inner: SequentialDisposable::new(),
        generation: AtomicUsize::new(0),
        outer_done: Done::new(),
        inner_active: std::sync::atomic::AtomicBool::new(false),
        done: Done::new(),
      });
      let for_dispose = state.clone();
      state.downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
      let frame = Arc::new(SwitchMapOuterFrame { state: state.clone() });
      source.subscribe_with(frame);
    })
  }
}

struct SwitchMapState<T, U, F> {
  downstream: ObserverRef<U>,
  f: Arc<F>,
  upstream: SequentialDisposable,
  inner: SequentialDisposable,
  generation: AtomicUsize,
  outer_done: Done,
  inner_active: std::sync::atomic::AtomicBool,
  done: Done,
}

impl<T: Send + 'static, U: Send + 'static, F: Fn(T) -> Observable<U> + Send + Sync + 'static> SwitchMapState<T, U, F> {
  fn dispose_all(&self) {
    if self.done.mark() {
      self.upstream.dispose();
      self.inner.dispose();
    }
  }

  fn maybe_complete(&self) {
    if self.outer_done.is_done() && !self.inner_active.load(Ordering::Acquire) && self.done.mark() {
      self.downstream.on_complete();
    }
  }
}

struct SwitchMapOuterFrame<T, U, F> {
  state: Arc<SwitchMapState<T, U, F>>,
}

impl<T: Send + 'static, U: Send + 'static, F: Fn(T) -> Observable<U> + Send + Sync + 'static> Observer<T>
  for SwitchMapOuterFrame<T, U, F>
{
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream.replace(d); }
  fn on_next(&self, v: T) {
    let gen = self.state.generation.fetch_add(1, Ordering::AcqRel) + 1;
    self.state.inner_active.store(true, Ordering::Release);
    let inner = (self.state.f)(v);
    let frame = Arc::new(SwitchMapInnerFrame { state: self.state.clone(), generation: gen });
    inner.subscribe_with(frame_ref(frame));
  }
  fn on_error(&self, e: RxError) {
    if self.state.done.mark() {
      self.state.inner.dispose();
      self.state.downstream.on_error(e);
    }
  }
  fn on_complete(&self) {
    self.state.outer_done.mark();
    self.state.maybe_complete();
  }
}

struct SwitchMapInnerFrame<T, U, F> {
  state: Arc<SwitchMapState<T, U, F>>,
  generation: usize,
}

impl<T: Send + 'static, U: Send + 'static, F: Fn(T) -> Observable<U> + Send + Sync + 'static> SwitchMapInnerFrame<T, U, F> {
  fn is_current(&self) -> bool { self.state.generation.load(Ordering::Acquire) == self.generation }
}

impl<T: Send + 'static, U: Send + 'static, F: Fn(T) -> Observable<U> + Send + Sync + 'static> Observer<U>
  for SwitchMapInnerFrame<T, U, F>
{
  fn on_subscribe(&self, d: DisposableHandle) { self.state.inner.set(d); }
  fn on_next(&self, v: U) {
    if self.is_current() {
      self.state.downstream.on_next(v);
    }
  }
  fn on_error(&self, e: RxError) {
    if self.is_current() && self.state.done.mark() {
      self.state.upstream.dispose();
      self.state.downstream.on_error(e);
    }
  }
  fn on_complete(&self) {
    if self.is_current() {
      self.state.inner_active.store(false, Ordering::Release);
      self.state.maybe_complete();
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::observable::source;
  use std::sync::mpsc::channel;
  use std::sync::Mutex as StdMutex;
  use std::time::Duration;

  #[test]
  fn flat_map_forwards_every_inner_value() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    source::from_array(vec![1, 2]).flat_map(|v| source::from_array(vec![v, v * 10])).subscribe(
      move |v| out2.lock().unwrap().push(v),
      |_| {},
      || {},
    );
    let mut got = out.lock().unwrap().clone();
    got.sort();
    assert_eq!(got, vec![1, 2, 10, 20]);
  }

  #[test]
  fn flat_map_completes_once_all_inners_finish() {
    let (tx, rx) = channel();
    source::from_array(vec![1, 2, 3]).flat_map(source::just).subscribe(|_| {}, |_| {}, move || tx.send(()).unwrap());
    rx.recv_timeout(Duration::from_secs(1)).unwrap();
  }

  #[test]
  fn concat_map_preserves_outer_order() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    source::from_array(vec![1, 2, 3]).concat_map(|v| source::from_array(vec![v, v])).subscribe(
      move |v| out2.lock().unwrap().push(v),
      |_| {},
      || {},
    );
    assert_eq!(*out.lock().unwrap(), vec![1, 1, 2, 2, 3, 3]);
  }

  #[test]
  fn concat_map_waits_for_an_asynchronous_inner_before_starting_the_next() {
    // Outer emits synchronously, but each inner delays its value, so the
    // second outer item reaches `drive()` while the first inner is still
    // pending. Without the `active` gate this subscribes inner 2 before
    // inner 1 completes, which disposes inner 1 via the shared
    // `inner` sequential cell and drops its emission.
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    let (tx, rx) = channel();
    source::from_array(vec![1, 2])
      .concat_map(|v| source::just(v).delay(Duration::from_millis(30), None))
      .subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, move || tx.send(()).unwrap());
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(*out.lock().unwrap(), vec![1, 2]);
  }

  #[test]
  fn switch_map_drops_stale_inner() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    source::from_array(vec![1, 2]).switch_map(source::just).subscribe(
      move |v| out2.lock().unwrap().push(v),
      |_| {},
      || {},
    );
    assert_eq!(*out.lock().unwrap(), vec![2]);
  }
}
