//! Stateful passthrough operators (spec.md §4.G): each keeps whatever
//! small amount of state its contract names, behind a `Mutex` since an
//! [crate::observer::Observer] frame is shared (`Arc`) with whatever thread
//! upstream emits from.
//!
//! Every frame here is built through [super::lift], which forwards
//! `onSubscribe` to downstream exactly once (spec.md §4.C) using the frame
//! itself as the disposable handle — so each frame struct implements both
//! [Observer] (the upstream-facing role) and [Disposable] (the
//! downstream-facing cancel token), both backed by the same `upstream`
//! cell.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hashbrown::HashSet;

use super::lift;
use crate::disposable::{CallbackDisposable, Disposable, DisposableHandle, SequentialDisposable};
use crate::error::{self, RxError};
use crate::observable::Observable;
use crate::observer::{Done, Observer, ObserverRef};

/// `map(f)`: no state; a throwing `f` disposes upstream and surfaces
/// `onError`.
impl<T: Send + 'static> Observable<T> {
  pub fn map<U: Send + 'static>(&self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Observable<U> {
    let f = Arc::new(f);
    lift(self.clone(), move |downstream| {
      Arc::new(MapFrame { downstream, upstream: SequentialDisposable::new(), f: f.clone() })
    })
  }
}

struct MapFrame<T, U, F> {
  downstream: ObserverRef<U>,
  upstream: SequentialDisposable,
  f: Arc<F>,
}

impl<T, U: Send + 'static, F: Fn(T) -> U + Send + Sync + 'static> Observer<T> for MapFrame<T, U, F> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    match error::catch(AssertUnwindSafe(|| (self.f)(v))) {
      Ok(u) => self.downstream.on_next(u),
      Err(e) => {
        self.upstream.dispose();
        self.downstream.on_error(e);
      }
    }
  }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

impl<T: Send + 'static, U: Send + 'static, F: Fn(T) -> U + Send + Sync + 'static> Disposable for MapFrame<T, U, F> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `filter(p)`: no state; a throwing `p` disposes upstream and errors.
impl<T: Send + 'static> Observable<T> {
  pub fn filter(&self, p: impl Fn(&T) -> bool + Send + Sync + 'static) -> Observable<T> {
    let p = Arc::new(p);
    lift(self.clone(), move |downstream| {
      Arc::new(FilterFrame { downstream, upstream: SequentialDisposable::new(), p: p.clone() })
    })
  }
}

struct FilterFrame<T, P> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  p: Arc<P>,
}

impl<T: Send + 'static, P: Fn(&T) -> bool + Send + Sync + 'static> Observer<T> for FilterFrame<T, P> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    match error::catch(AssertUnwindSafe(|| (self.p)(&v))) {
      Ok(true) => self.downstream.on_next(v),
      Ok(false) => {}
      Err(e) => {
        self.upstream.dispose();
        self.downstream.on_error(e);
      }
    }
  }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

impl<T: Send + 'static, P: Fn(&T) -> bool + Send + Sync + 'static> Disposable for FilterFrame<T, P> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `scan(acc)`: the first item passes through unchanged; each later value
/// emits `acc(prev, v)` and becomes the new `prev`.
impl<T: Clone + Send + 'static> Observable<T> {
  pub fn scan(&self, acc: impl Fn(T, T) -> T + Send + Sync + 'static) -> Observable<T> {
    let acc = Arc::new(acc);
    lift(self.clone(), move |downstream| {
      Arc::new(ScanFrame {
        downstream,
        upstream: SequentialDisposable::new(),
        acc: acc.clone(),
        prev: Mutex::new(None),
      })
    })
  }
}

struct ScanFrame<T, F> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  acc: Arc<F>,
  prev: Mutex<Option<T>>,
}

impl<T: Clone + Send + 'static, F: Fn(T, T) -> T + Send + Sync + 'static> Observer<T> for ScanFrame<T, F> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    let mut prev = self.prev.lock().unwrap();
    let next = match prev.take() {
      None => v,
      Some(p) => (self.acc)(p, v),
    };
    *prev = Some(next.clone());
    drop(prev);
    self.downstream.on_next(next);
  }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

impl<T: Clone + Send + 'static, F: Fn(T, T) -> T + Send + Sync + 'static> Disposable for ScanFrame<T, F> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `reduce(acc)`: accumulate silently, the first item becoming the running
/// value rather than a caller-supplied seed; emit the single result on
/// complete, or error "no elements" if the source was empty.
impl<T: Clone + Send + 'static> Observable<T> {
  pub fn reduce(&self, acc: impl Fn(T, T) -> T + Send + Sync + 'static) -> Observable<T> {
    let acc = Arc::new(acc);
    lift(self.clone(), move |downstream| {
      Arc::new(ReduceFrame { downstream, upstream: SequentialDisposable::new(), acc: acc.clone(), acc_value: Mutex::new(None) })
    })
  }
}

struct ReduceFrame<T, F> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  acc: Arc<F>,
  acc_value: Mutex<Option<T>>,
}

impl<T: Clone + Send + 'static, F: Fn(T, T) -> T + Send + Sync + 'static> Observer<T> for ReduceFrame<T, F> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    let mut cur = self.acc_value.lock().unwrap();
    *cur = Some(match cur.take() {
      Some(prev) => (self.acc)(prev, v),
      None => v,
    });
  }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) {
    match self.acc_value.lock().unwrap().clone() {
      Some(v) => {
        self.downstream.on_next(v);
        self.downstream.on_complete();
      }
      None => self.downstream.on_error(RxError::NoElements),
    }
  }
}

impl<T: Clone + Send + 'static, F: Fn(T, T) -> T + Send + Sync + 'static> Disposable for ReduceFrame<T, F> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `skip(n)`: drop the first `n` items.
impl<T: Send + 'static> Observable<T> {
  pub fn skip(&self, n: usize) -> Observable<T> {
    let remaining = Arc::new(AtomicUsize::new(n));
    lift(self.clone(), move |downstream| {
      Arc::new(SkipFrame { downstream, upstream: SequentialDisposable::new(), remaining: remaining.clone() })
    })
  }
}

struct SkipFrame<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  remaining: Arc<AtomicUsize>,
}

impl<T: Send + 'static> Observer<T> for SkipFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    if self
      .remaining
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| if n > 0 { Some(n - 1) } else { None })
      .is_ok()
    {
      return;
    }
    self.downstream.on_next(v);
  }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

impl<T: Send + 'static> Disposable for SkipFrame<T> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `take(n)`: emit at most `n` items, then dispose upstream and complete.
/// `take(0)` still subscribes upstream (so any side effects of subscribing
/// run) but disposes it immediately and completes downstream without
/// forwarding any item — `onSubscribe` itself was already forwarded once
/// by [lift], so this never re-delivers it.
impl<T: Send + 'static> Observable<T> {
  pub fn take(&self, n: usize) -> Observable<T> {
    lift(self.clone(), move |downstream| {
      Arc::new(TakeFrame { downstream, upstream: SequentialDisposable::new(), remaining: AtomicUsize::new(n), done: Done::new() })
    })
  }
}

struct TakeFrame<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  remaining: AtomicUsize,
  done: Done,
}

impl<T: Send + 'static> Observer<T> for TakeFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) {
    if self.remaining.load(Ordering::Acquire) == 0 {
      d.dispose();
      if self.done.mark() {
        self.downstream.on_complete();
      }
      return;
    }
    self.upstream.set_once(d);
  }
  fn on_next(&self, v: T) {
    if self.done.is_done() { return; }
    let prev = self.remaining.fetch_sub(1, Ordering::AcqRel);
    if prev == 0 { return; }
    self.downstream.on_next(v);
    if prev == 1 && self.done.mark() {
      self.upstream.dispose();
      self.downstream.on_complete();
    }
  }
  fn on_error(&self, e: RxError) {
    if self.done.mark() { self.downstream.on_error(e); }
  }
  fn on_complete(&self) {
    if self.done.mark() { self.downstream.on_complete(); }
  }
}

impl<T: Send + 'static> Disposable for TakeFrame<T> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `skipLast(n)`: ring buffer of size `n`; on complete, emit whatever never
/// entered the tail window.
impl<T: Send + 'static> Observable<T> {
  pub fn skip_last(&self, n: usize) -> Observable<T> {
    lift(self.clone(), move |downstream| {
      Arc::new(SkipLastFrame { downstream, upstream: SequentialDisposable::new(), n, buf: Mutex::new(VecDeque::new()) })
    })
  }
}

struct SkipLastFrame<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  n: usize,
  buf: Mutex<VecDeque<T>>,
}

impl<T: Send + 'static> Observer<T> for SkipLastFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    if self.n == 0 {
      self.downstream.on_next(v);
      return;
    }
    let mut buf = self.buf.lock().unwrap();
    buf.push_back(v);
    if buf.len() > self.n {
      let out = buf.pop_front().unwrap();
      drop(buf);
      self.downstream.on_next(out);
    }
  }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

impl<T: Send + 'static> Disposable for SkipLastFrame<T> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `takeLast(n)`: ring buffer of size `n`; on complete, emit the tail.
impl<T: Send + 'static> Observable<T> {
  pub fn take_last(&self, n: usize) -> Observable<T> {
    lift(self.clone(), move |downstream| {
      Arc::new(TakeLastFrame { downstream, upstream: SequentialDisposable::new(), n, buf: Mutex::new(VecDeque::new()) })
    })
  }
}

struct TakeLastFrame<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  n: usize,
  buf: Mutex<VecDeque<T>>,
}

impl<T: Send + 'static> Observer<T> for TakeLastFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    if self.n == 0 { return; }
    let mut buf = self.buf.lock().unwrap();
    if buf.len() == self.n { buf.pop_front(); }
    buf.push_back(v);
  }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) {
    for v in self.buf.lock().unwrap().drain(..) {
      self.downstream.on_next(v);
    }
    self.downstream.on_complete();
  }
}

impl<T: Send + 'static> Disposable for TakeLastFrame<T> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `buffer(count, skip)`: open a new buffer every `skip` items; every open
/// buffer receives each item; a buffer reaching `count` is emitted and
/// closed. `buffer(count)` is `buffer(count, count)`.
impl<T: Clone + Send + 'static> Observable<T> {
  pub fn buffer(&self, count: usize, skip: usize) -> Observable<Vec<T>> {
    assert!(count > 0 && skip > 0, "buffer(count, skip) requires both positive");
    lift(self.clone(), move |downstream| {
      Arc::new(BufferFrame {
        downstream,
        upstream: SequentialDisposable::new(),
        count,
        skip,
        index: AtomicUsize::new(0),
        open: Mutex::new(VecDeque::new()),
      })
    })
  }
}

struct BufferFrame<T> {
  downstream: ObserverRef<Vec<T>>,
  upstream: SequentialDisposable,
  count: usize,
  skip: usize,
  index: AtomicUsize,
  open: Mutex<VecDeque<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Observer<T> for BufferFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    let i = self.index.fetch_add(1, Ordering::AcqRel);
    let mut open = self.open.lock().unwrap();
    if i % self.skip == 0 {
      open.push_back(Vec::with_capacity(self.count));
    }
    let mut finished = Vec::new();
    for buf in open.iter_mut() {
      buf.push(v.clone());
    }
    while let Some(front) = open.front() {
      if front.len() >= self.count {
        finished.push(open.pop_front().unwrap());
      } else {
        break;
      }
    }
    drop(open);
    for buf in finished {
      self.downstream.on_next(buf);
    }
  }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) {
    for buf in self.open.lock().unwrap().drain(..) {
      if !buf.is_empty() {
        self.downstream.on_next(buf);
      }
    }
    self.downstream.on_complete();
  }
}

impl<T: Clone + Send + 'static> Disposable for BufferFrame<T> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `distinct(key)`: emit only if `key(v)` was never seen before.
impl<T: Clone + Send + 'static> Observable<T> {
  pub fn distinct<K: std::hash::Hash + Eq + Send + 'static>(
    &self,
    key: impl Fn(&T) -> K + Send + Sync + 'static,
  ) -> Observable<T> {
    let key: Arc<dyn Fn(&T) -> K + Send + Sync> = Arc::new(key);
    lift(self.clone(), move |downstream| {
      Arc::new(DistinctFrame { downstream, upstream: SequentialDisposable::new(), key: key.clone(), seen: Mutex::new(HashSet::new()) })
    })
  }
}

struct DistinctFrame<T, K> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  key: Arc<dyn Fn(&T) -> K + Send + Sync>,
  seen: Mutex<HashSet<K>>,
}

impl<T: Send + 'static, K: std::hash::Hash + Eq + Send + 'static> Observer<T> for DistinctFrame<T, K> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    let k = (self.key)(&v);
    if self.seen.lock().unwrap().insert(k) {
      self.downstream.on_next(v);
    }
  }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

impl<T: Send + 'static, K: std::hash::Hash + Eq + Send + 'static> Disposable for DistinctFrame<T, K> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `distinctUntilChanged(key)`: emit only when `key(v)` differs from the
/// previous item's key.
impl<T: Send + 'static> Observable<T> {
  pub fn distinct_until_changed<K: PartialEq + Send + 'static>(
    &self,
    key: impl Fn(&T) -> K + Send + Sync + 'static,
  ) -> Observable<T> {
    lift(self.clone(), move |downstream| {
      Arc::new(DistinctUntilChangedFrame { downstream, upstream: SequentialDisposable::new(), key: Arc::new(key), prev: Mutex::new(None) })
    })
  }
}

struct DistinctUntilChangedFrame<T, K> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  key: Arc<dyn Fn(&T) -> K + Send + Sync>,
  prev: Mutex<Option<K>>,
}

impl<T: Send + 'static, K: PartialEq + Send + 'static> Observer<T> for DistinctUntilChangedFrame<T, K> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    let k = (self.key)(&v);
    let mut prev = self.prev.lock().unwrap();
    let changed = prev.as_ref() != Some(&k);
    if changed {
      *prev = Some(k);
      drop(prev);
      self.downstream.on_next(v);
    }
  }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

impl<T: Send + 'static, K: PartialEq + Send + 'static> Disposable for DistinctUntilChangedFrame<T, K> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `elementAt(i, default)`: emit the `i`-th item and complete; if the
/// source completes earlier, emit `default` or error with
/// `IndexOutOfBounds`.
impl<T: Send + 'static> Observable<T> {
  pub fn element_at(&self, i: usize, default: Option<T>) -> Observable<T>
  where
    T: Clone,
  {
    lift(self.clone(), move |downstream| {
      Arc::new(ElementAtFrame {
        downstream,
        upstream: SequentialDisposable::new(),
        index: i,
        counter: AtomicUsize::new(0),
        default: default.clone(),
        done: Done::new(),
      })
    })
  }

  /// `first()` is `elementAt(0, None)`.
  pub fn first(&self) -> Observable<T>
  where
    T: Clone,
  {
    self.element_at(0, None)
  }
}

struct ElementAtFrame<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  index: usize,
  counter: AtomicUsize,
  default: Option<T>,
  done: Done,
}

impl<T: Clone + Send + 'static> Observer<T> for ElementAtFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    if self.done.is_done() { return; }
    let i = self.counter.fetch_add(1, Ordering::AcqRel);
    if i == self.index && self.done.mark() {
      self.upstream.dispose();
      self.downstream.on_next(v);
      self.downstream.on_complete();
    }
  }
  fn on_error(&self, e: RxError) {
    if self.done.mark() { self.downstream.on_error(e); }
  }
  fn on_complete(&self) {
    if !self.done.mark() { return; }
    match self.default.clone() {
      Some(v) => {
        self.downstream.on_next(v);
        self.downstream.on_complete();
      }
      None => self.downstream.on_error(RxError::IndexOutOfBounds(self.index)),
    }
  }
}

impl<T: Clone + Send + 'static> Disposable for ElementAtFrame<T> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `last(default)`: remember the last value seen; emit it (or `default`, or
/// `NoElements`) on complete.
impl<T: Clone + Send + 'static> Observable<T> {
  pub fn last(&self, default: Option<T>) -> Observable<T> {
    lift(self.clone(), move |downstream| {
      Arc::new(LastFrame { downstream, upstream: SequentialDisposable::new(), last: Mutex::new(None), default: default.clone() })
    })
  }
}

struct LastFrame<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  last: Mutex<Option<T>>,
  default: Option<T>,
}

impl<T: Clone + Send + 'static> Observer<T> for LastFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) { *self.last.lock().unwrap() = Some(v); }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) {
    match self.last.lock().unwrap().take().or_else(|| self.default.clone()) {
      Some(v) => {
        self.downstream.on_next(v);
        self.downstream.on_complete();
      }
      None => self.downstream.on_error(RxError::NoElements),
    }
  }
}

impl<T: Clone + Send + 'static> Disposable for LastFrame<T> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `ignoreElements`: drop every `onNext`, pass error/complete through.
impl<T: Send + 'static> Observable<T> {
  pub fn ignore_elements(&self) -> Observable<T> {
    lift(self.clone(), move |downstream| {
      Arc::new(IgnoreElementsFrame { downstream, upstream: SequentialDisposable::new() })
    })
  }
}

struct IgnoreElementsFrame<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
}

impl<T: Send + 'static> Observer<T> for IgnoreElementsFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, _v: T) {}
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

impl<T: Send + 'static> Disposable for IgnoreElementsFrame<T> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `startWith(items)`: emit the prefix before subscribing upstream. The
/// shared [SequentialDisposable] given to downstream up front is the one
/// upstream's real disposable slots into once subscribed, so disposing the
/// handle downstream was handed works identically whether it fires during
/// the prefix or after.
impl<T: Clone + Send + 'static> Observable<T> {
  pub fn start_with(&self, items: Vec<T>) -> Observable<T> {
    let source = self.clone();
    Observable::new(move |downstream: ObserverRef<T>| {
      let upstream = Arc::new(SequentialDisposable::new());
      let handle: DisposableHandle = upstream.clone();
      downstream.on_subscribe(handle);
      for item in items.iter().cloned() {
        if upstream.is_disposed() { return; }
        downstream.on_next(item);
      }
      if upstream.is_disposed() { return; }
      let frame = Arc::new(StartWithFrame { downstream: downstream.clone(), upstream: upstream.clone() });
      source.subscribe_with(super::frame_ref(frame));
    })
  }
}

struct StartWithFrame<T> {
  downstream: ObserverRef<T>,
  upstream: Arc<SequentialDisposable>,
}

impl<T: Send + 'static> Observer<T> for StartWithFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) { self.downstream.on_next(v); }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

struct SeenFlag(std::sync::atomic::AtomicBool);
impl SeenFlag {
  fn new() -> Self { Self(std::sync::atomic::AtomicBool::new(false)) }
  fn mark(&self) { self.0.store(true, Ordering::Release); }
  fn get(&self) -> bool { self.0.load(Ordering::Acquire) }
}

/// `defaultIfEmpty(v)`: emit `v` then complete if the source never emitted.
impl<T: Send + 'static> Observable<T> {
  pub fn default_if_empty(&self, v: T) -> Observable<T>
  where
    T: Clone,
  {
    lift(self.clone(), move |downstream| {
      Arc::new(DefaultIfEmptyFrame { downstream, upstream: SequentialDisposable::new(), v: v.clone(), seen: SeenFlag::new() })
    })
  }
}

struct DefaultIfEmptyFrame<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  v: T,
  seen: SeenFlag,
}

impl<T: Clone + Send + 'static> Observer<T> for DefaultIfEmptyFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    self.seen.mark();
    self.downstream.on_next(v);
  }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) {
    if !self.seen.get() {
      self.downstream.on_next(self.v.clone());
    }
    self.downstream.on_complete();
  }
}

impl<T: Clone + Send + 'static> Disposable for DefaultIfEmptyFrame<T> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `all(p)` / `any(p)` / `contains(v)` / `isEmpty`: short-circuit as soon
/// as the boolean result is known.
impl<T: Send + 'static> Observable<T> {
  pub fn all(&self, p: impl Fn(&T) -> bool + Send + Sync + 'static) -> Observable<bool> {
    self.short_circuit(move |v| !p(v), false, true)
  }

  pub fn any(&self, p: impl Fn(&T) -> bool + Send + Sync + 'static) -> Observable<bool> {
    self.short_circuit(p, true, false)
  }

  pub fn contains(&self, target: T) -> Observable<bool>
  where
    T: PartialEq,
  {
    self.short_circuit(move |v| v == &target, true, false)
  }

  pub fn is_empty(&self) -> Observable<bool> { self.short_circuit(|_| true, false, true) }

  /// Shared by `all`/`any`/`contains`/`isEmpty`: stop at the first item for
  /// which `trigger` holds and emit `on_trigger`; otherwise emit
  /// `on_complete` once the source completes without triggering.
  fn short_circuit(
    &self,
    trigger: impl Fn(&T) -> bool + Send + Sync + 'static,
    on_trigger: bool,
    on_complete: bool,
  ) -> Observable<bool> {
    lift(self.clone(), move |downstream| {
      Arc::new(ShortCircuitFrame {
        downstream,
        upstream: SequentialDisposable::new(),
        trigger: Arc::new(trigger),
        on_trigger,
        on_complete,
        done: Done::new(),
      })
    })
  }
}

struct ShortCircuitFrame<T, F> {
  downstream: ObserverRef<bool>,
  upstream: SequentialDisposable,
  trigger: Arc<F>,
  on_trigger: bool,
  on_complete: bool,
  done: Done,
}

impl<T: Send + 'static, F: Fn(&T) -> bool + Send + Sync + 'static> Observer<T> for ShortCircuitFrame<T, F> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    if self.done.is_done() { return; }
    if (self.trigger)(&v) && self.done.mark() {
      self.upstream.dispose();
      self.downstream.on_next(self.on_trigger);
      self.downstream.on_complete();
    }
  }
  fn on_error(&self, e: RxError) {
    if self.done.mark() { self.downstream.on_error(e); }
  }
  fn on_complete(&self) {
    if self.done.mark() {
      self.downstream.on_next(self.on_complete);
      self.downstream.on_complete();
    }
  }
}

impl<T: Send + 'static, F: Fn(&T) -> bool + Send + Sync + 'static> Disposable for ShortCircuitFrame<T, F> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `repeat(n)`: on complete, re-subscribe up to `n` times; the
/// re-subscription itself runs through a [crate::drain::WipLoop] so a chain
/// of immediately-completing sources cannot grow the call stack.
impl<T: Send + 'static> Observable<T> {
  pub fn repeat(&self, n: usize) -> Observable<T> { self.resubscribe_on(n, Trigger::Complete) }

  /// `retry(n)`: same as `repeat`, triggered by `onError` instead.
  pub fn retry(&self, n: usize) -> Observable<T> { self.resubscribe_on(n, Trigger::Error) }

  fn resubscribe_on(&self, n: usize, trigger: Trigger) -> Observable<T> {
    let source = self.clone();
    Observable::new(move |downstream: ObserverRef<T>| {
      let state = Arc::new(RepeatState {
        source: source.clone(),
        downstream: downstream.clone(),
        remaining: AtomicUsize::new(n),
        upstream: SequentialDisposable::new(),
        looping: std::sync::atomic::AtomicBool::new(false),
        pending: std::sync::atomic::AtomicBool::new(false),
        trigger,
      });
      let for_dispose = state.clone();
      downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.upstream.dispose()));
      state.start();
    })
  }
}

#[derive(Clone, Copy)]
enum Trigger {
  Complete,
  Error,
}

struct RepeatState<T> {
  source: Observable<T>,
  downstream: ObserverRef<T>,
  remaining: AtomicUsize,
  upstream: SequentialDisposable,
  looping: std::sync::atomic::AtomicBool,
  pending: std::sync::atomic::AtomicBool,
  trigger: Trigger,
}

impl<T: Send + 'static> RepeatState<T> {
  fn start(self: &Arc<Self>) {
    let frame = Arc::new(RepeatFrame { state: self.clone() });
    self.source.subscribe_with(super::frame_ref(frame));
  }

  /// Re-subscribe via a trampoline: a terminal event that triggers a
  /// resubscription can arrive synchronously from within `start`'s own
  /// call to `subscribe_with` (an immediately-completing source), so a
  /// naive recursive call here would grow the stack by one frame per
  /// repeat/retry. `looping` makes only the outermost caller actually
  /// iterate; a reentrant call just records `pending` and returns.
  fn request_resubscribe(self: &Arc<Self>) {
    self.pending.store(true, Ordering::Release);
    if self.looping.swap(true, Ordering::AcqRel) { return; }
    while self.pending.swap(false, Ordering::AcqRel) {
      self.start();
    }
    self.looping.store(false, Ordering::Release);
  }
}

struct RepeatFrame<T> {
  state: Arc<RepeatState<T>>,
}

impl<T: Send + 'static> Observer<T> for RepeatFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream.replace(d); }
  fn on_next(&self, v: T) { self.state.downstream.on_next(v); }
  fn on_error(&self, e: RxError) {
    match self.state.trigger {
      Trigger::Error => {
        if self.state.remaining.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| if n > 0 { Some(n - 1) } else { None }).is_ok() {
          self.state.request_resubscribe();
        } else {
          self.state.downstream.on_error(e);
        }
      }
      Trigger::Complete => self.state.downstream.on_error(e),
    }
  }
  fn on_complete(&self) {
    match self.state.trigger {
      Trigger::Complete => {
        if self.state.remaining.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| if n > 0 { Some(n - 1) } else { None }).is_ok() {
          self.state.request_resubscribe();
        } else {
          self.state.downstream.on_complete();
        }
      }
      Trigger::Error => self.state.downstream.on_complete(),
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::observable::source;
  use std::sync::mpsc::channel;
  use std::sync::Mutex as StdMutex;

  #[test]
  fn map_transforms_each_item() {
    let (tx, rx) = channel();
    source::from_array(vec![1, 2, 3]).map(|v| v * 2).subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.iter().take(3).collect::<Vec<_>>(), vec![2, 4, 6]);
  }

  #[test]
  fn map_panic_surfaces_as_error() {
    let (tx, rx) = channel();
    source::just(1).map(|_: i32| -> i32 { panic!("boom") }).subscribe(|_| {}, move |e| tx.send(e.to_string()).unwrap(), || {});
    assert!(rx.recv().is_ok());
  }

  #[test]
  fn filter_keeps_matching_items() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    source::from_array(vec![1, 2, 3, 4]).filter(|v| v % 2 == 0).subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, || {});
    assert_eq!(*out.lock().unwrap(), vec![2, 4]);
  }

  #[test]
  fn scan_emits_running_total() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    source::from_array(vec![1, 2, 3]).scan(|a, b| a + b).subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, || {});
    assert_eq!(*out.lock().unwrap(), vec![1, 3, 6]);
  }

  #[test]
  fn reduce_emits_accumulated_result() {
    let (tx, rx) = channel();
    source::from_array(vec![1, 2, 3]).reduce(|a, b| a + b).subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.recv().unwrap(), 6);
  }

  #[test]
  fn reduce_with_non_identity_accumulator_needs_no_seed() {
    let (tx, rx) = channel();
    source::from_array(vec![3, 1, 4, 1, 5]).reduce(|a: i32, b| a.max(b)).subscribe(
      move |v| tx.send(v).unwrap(),
      |_| {},
      || {},
    );
    assert_eq!(rx.recv().unwrap(), 5);
  }

  #[test]
  fn reduce_on_empty_source_errors() {
    let (tx, rx) = channel();
    source::empty::<i32>().reduce(|a, b| a + b).subscribe(|_| {}, move |e| tx.send(e.to_string()).unwrap(), || {});
    assert!(rx.recv().is_ok());
  }

  #[test]
  fn skip_and_take_bound_the_window() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    source::range(0, 10).skip(2).take(3).subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, || {});
    assert_eq!(*out.lock().unwrap(), vec![2, 3, 4]);
  }

  #[test]
  fn take_zero_completes_without_emitting() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    let (tx, rx) = channel();
    source::range(0, 3).take(0).subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, move || tx.send(()).unwrap());
    rx.recv().unwrap();
    assert!(out.lock().unwrap().is_empty());
  }

  #[test]
  fn take_last_keeps_tail() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    source::range(0, 5).take_last(2).subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, || {});
    assert_eq!(*out.lock().unwrap(), vec![3, 4]);
  }

  #[test]
  fn skip_last_drops_tail() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    source::range(0, 5).skip_last(2).subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, || {});
    assert_eq!(*out.lock().unwrap(), vec![0, 1, 2]);
  }

  #[test]
  fn buffer_groups_with_overlap() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    source::range(1, 5).buffer(2, 1).subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, || {});
    assert_eq!(*out.lock().unwrap(), vec![vec![1, 2], vec![2, 3], vec![3, 4], vec![4, 5]]);
  }

  #[test]
  fn buffer_non_overlapping_boundary() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    source::range(1, 7).buffer(3, 3).subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, || {});
    assert_eq!(*out.lock().unwrap(), vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
  }

  #[test]
  fn distinct_drops_repeats() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    source::from_array(vec![1, 2, 1, 3, 2]).distinct(|v: &i32| *v).subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, || {});
    assert_eq!(*out.lock().unwrap(), vec![1, 2, 3]);
  }

  #[test]
  fn distinct_until_changed_drops_only_adjacent_repeats() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    source::from_array(vec![1, 1, 2, 2, 1]).distinct_until_changed(|v: &i32| *v).subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, || {});
    assert_eq!(*out.lock().unwrap(), vec![1, 2, 1]);
  }

  #[test]
  fn first_emits_earliest_item() {
    let (tx, rx) = channel();
    source::range(4, 3).first().subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.recv().unwrap(), 4);
  }

  #[test]
  fn element_at_without_default_errors_past_end() {
    let (tx, rx) = channel();
    source::range(0, 2).element_at(5, None).subscribe(|_| {}, move |e| tx.send(e.to_string()).unwrap(), || {});
    assert!(rx.recv().is_ok());
  }

  #[test]
  fn last_with_default_on_empty_source() {
    let (tx, rx) = channel();
    source::empty::<i32>().last(Some(9)).subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.recv().unwrap(), 9);
  }

  #[test]
  fn ignore_elements_only_forwards_complete() {
    let (tx, rx) = channel();
    source::range(0, 5).ignore_elements().subscribe(|_| panic!("should not emit"), |_| {}, move || tx.send(()).unwrap());
    rx.recv().unwrap();
  }

  #[test]
  fn start_with_emits_prefix_before_source() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    source::just(3).start_with(vec![1, 2]).subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, || {});
    assert_eq!(*out.lock().unwrap(), vec![1, 2, 3]);
  }

  #[test]
  fn default_if_empty_emits_fallback() {
    let (tx, rx) = channel();
    source::empty::<i32>().default_if_empty(7).subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.recv().unwrap(), 7);
  }

  #[test]
  fn any_short_circuits_on_first_match() {
    let (tx, rx) = channel();
    source::range(0, 100).any(|v| *v == 3).subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert!(rx.recv().unwrap());
  }

  #[test]
  fn is_empty_true_for_empty_source() {
    let (tx, rx) = channel();
    source::empty::<i32>().is_empty().subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert!(rx.recv().unwrap());
  }

  #[test]
  fn repeat_resubscribes_n_times() {
    let count = Arc::new(AtomicUsize::new(0));
    let count2 = count.clone();
    let src = source::defer(move || {
      count2.fetch_add(1, Ordering::SeqCst);
      source::just(1)
    });
    let (tx, rx) = channel();
    src.repeat(2).subscribe(move |_| {}, |_| {}, move || tx.send(()).unwrap());
    rx.recv().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn retry_resubscribes_on_error() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts2 = attempts.clone();
    let src = source::defer(move || {
      let n = attempts2.fetch_add(1, Ordering::SeqCst);
      if n < 2 { source::error(RxError::Timeout) } else { source::just(42) }
    });
    let (tx, rx) = channel();
    src.retry(5).subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.recv().unwrap(), 42);
  }

  #[test]
  fn disposing_a_map_chain_cancels_upstream() {
    use std::time::Duration;
    let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let cancelled2 = cancelled.clone();
    let src = crate::observable::source::create::<i32>(move |emitter| {
      let cancelled3 = cancelled2.clone();
      emitter.set_disposable(CallbackDisposable::new(move || {
        cancelled3.store(true, Ordering::SeqCst);
      }));
    });
    let handle = src.map(|v| v * 2).filter(|_| true).subscribe(|_| {}, |_| {}, || {});
    handle.dispose();
    std::thread::sleep(Duration::from_millis(10));
    assert!(cancelled.load(Ordering::SeqCst), "disposing the operator chain must reach the source's resource");
  }
}
