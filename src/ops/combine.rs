//! Combination operators (spec.md §4.I): operators correlating several
//! sources at once. `merge`/`concat` reduce directly to the flattening
//! operators in [super::flatten]; the rest need their own per-subscription
//! state to correlate events across sources instead of just forwarding one
//! of them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;

use super::frame_ref;
use crate::disposable::{CallbackDisposable, Disposable, DisposableHandle, SequentialDisposable};
use crate::error::RxError;
use crate::observable::source;
use crate::observable::Observable;
use crate::observer::{Done, Observer, ObserverRef};

/// `merge(sources)`: `fromArray(sources).flatMap(identity)` (spec.md §4.I).
pub fn merge<T: Send + 'static>(sources: Vec<Observable<T>>) -> Observable<T> {
  source::from_array(sources).flat_map(|o| o)
}

/// `concat(sources)`: `fromArray(sources).concatMap(identity)`.
pub fn concat<T: Send + 'static>(sources: Vec<Observable<T>>) -> Observable<T> {
  source::from_array(sources).concat_map(|o| o)
}

/// `zip(sources, zipper)`: one FIFO queue per source; fires `zipper` once
/// every queue holds at least one item, popping one from each. Completes as
/// soon as any source completes with its queue drained.
pub fn zip<T: Send + 'static, U: Send + 'static>(
  sources: Vec<Observable<T>>,
  zipper: impl Fn(Vec<T>) -> U + Send + Sync + 'static,
) -> Observable<U> {
  let zipper = Arc::new(zipper);
  let n = sources.len();
  Observable::new(move |downstream: ObserverRef<U>| {
    let state = Arc::new(ZipState {
      downstream: downstream.clone(),
      zipper: zipper.clone(),
      queues: Mutex::new((0..n).map(|_| VecDeque::new()).collect()),
      upstreams: (0..n).map(|_| SequentialDisposable::new()).collect(),
      done: Done::new(),
    });
    let for_dispose = state.clone();
    downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
    for (i, src) in sources.iter().cloned().enumerate() {
      let frame = Arc::new(ZipInnerFrame { state: state.clone(), index: i });
      src.subscribe_with(frame_ref(frame));
    }
  })
}

struct ZipState<T, U> {
  downstream: ObserverRef<U>,
  zipper: Arc<dyn Fn(Vec<T>) -> U + Send + Sync>,
  queues: Mutex<Vec<VecDeque<T>>>,
  upstreams: Vec<SequentialDisposable>,
  done: Done,
}

impl<T: Send + 'static, U: Send + 'static> ZipState<T, U> {
  fn dispose_all(&self) {
    if self.done.mark() {
      for u in &self.upstreams {
        u.dispose();
      }
    }
  }

  fn push(&self, index: usize, v: T) {
    let mut queues = self.queues.lock().unwrap();
    queues[index].push_back(v);
    if queues.iter().all(|q| !q.is_empty()) {
      let popped: Vec<T> = queues.iter_mut().map(|q| q.pop_front().unwrap()).collect();
      drop(queues);
      if !self.done.is_done() {
        self.downstream.on_next((self.zipper)(popped));
      }
    }
  }

  fn source_complete(&self, index: usize) {
    let queues = self.queues.lock().unwrap();
    let empty = queues[index].is_empty();
    drop(queues);
    if empty && self.done.mark() {
      for u in &self.upstreams {
        u.dispose();
      }
      self.downstream.on_complete();
    }
  }

  fn source_error(&self, e: RxError) {
    if self.done.mark() {
      for u in &self.upstreams {
        u.dispose();
      }
      self.downstream.on_error(e);
    }
  }
}

struct ZipInnerFrame<T, U> {
  state: Arc<ZipState<T, U>>,
  index: usize,
}

impl<T: Send + 'static, U: Send + 'static> Observer<T> for ZipInnerFrame<T, U> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstreams[self.index].set_once(d); }
  fn on_next(&self, v: T) { self.state.push(self.index, v); }
  fn on_error(&self, e: RxError) { self.state.source_error(e); }
  fn on_complete(&self) { self.state.source_complete(self.index); }
}

/// `zip2(a, b, zipper)`: the ergonomic two-source, heterogeneously-typed
/// overload of [zip] — most call sites combine exactly two observables of
/// different element types, where a homogeneous `Vec<T>` can't express the
/// pairing.
pub fn zip2<A: Send + 'static, B: Send + 'static, U: Send + 'static>(
  a: Observable<A>,
  b: Observable<B>,
  zipper: impl Fn(A, B) -> U + Send + Sync + 'static,
) -> Observable<U> {
  let zipper = Arc::new(zipper);
  Observable::new(move |downstream: ObserverRef<U>| {
    let state = Arc::new(Zip2State {
      downstream: downstream.clone(),
      zipper: zipper.clone(),
      queue_a: Mutex::new(VecDeque::new()),
      queue_b: Mutex::new(VecDeque::new()),
      upstream_a: SequentialDisposable::new(),
      upstream_b: SequentialDisposable::new(),
      done: Done::new(),
    });
    let for_dispose = state.clone();
    downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
    let frame_a = Arc::new(Zip2LeftFrame { state: state.clone() });
    let frame_b = Arc::new(Zip2RightFrame { state: state.clone() });
    a.subscribe_with(frame_ref(frame_a));
    b.subscribe_with(frame_ref(frame_b));
  })
}

struct Zip2State<A, B, U> {
  downstream: ObserverRef<U>,
  zipper: Arc<dyn Fn(A, B) -> U + Send + Sync>,
  queue_a: Mutex<VecDeque<A>>,
  queue_b: Mutex<VecDeque<B>>,
  upstream_a: SequentialDisposable,
  upstream_b: SequentialDisposable,
  done: Done,
}

impl<A: Send + 'static, B: Send + 'static, U: Send + 'static> Zip2State<A, B, U> {
  fn dispose_all(&self) {
    if self.done.mark() {
      self.upstream_a.dispose();
      self.upstream_b.dispose();
    }
  }

  fn push_a(&self, v: A) {
    self.queue_a.lock().unwrap().push_back(v);
    self.try_fire();
  }

  fn push_b(&self, v: B) {
    self.queue_b.lock().unwrap().push_back(v);
    self.try_fire();
  }

  fn try_fire(&self) {
    let mut qa = self.queue_a.lock().unwrap();
    let mut qb = self.queue_b.lock().unwrap();
    if qa.is_empty() || qb.is_empty() {
      return;
    }
    let a = qa.pop_front().unwrap();
    let b = qb.pop_front().unwrap();
    drop(qa);
    drop(qb);
    if !self.done.is_done() {
      self.downstream.on_next((self.zipper)(a, b));
    }
  }

  fn complete_a(&self) {
    if self.queue_a.lock().unwrap().is_empty() && self.done.mark() {
      self.upstream_a.dispose();
      self.upstream_b.dispose();
      self.downstream.on_complete();
    }
  }

  fn complete_b(&self) {
    if self.queue_b.lock().unwrap().is_empty() && self.done.mark() {
      self.upstream_a.dispose();
      self.upstream_b.dispose();
      self.downstream.on_complete();
    }
  }

  fn error(&self, e: RxError) {
    if self.done.mark() {
      self.upstream_a.dispose();
      self.upstream_b.dispose();
      self.downstream.on_error(e);
    }
  }
}

struct Zip2LeftFrame<A, B, U> {
  state: Arc<Zip2State<A, B, U>>,
}

impl<A: Send + 'static, B: Send + 'static, U: Send + 'static> Observer<A> for Zip2LeftFrame<A, B, U> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream_a.set_once(d); }
  fn on_next(&self, v: A) { self.state.push_a(v); }
  fn on_error(&self, e: RxError) { self.state.error(e); }
  fn on_complete(&self) { self.state.complete_a(); }
}

struct Zip2RightFrame<A, B, U> {
  state: Arc<Zip2State<A, B, U>>,
}

impl<A: Send + 'static, B: Send + 'static, U: Send + 'static> Observer<B> for Zip2RightFrame<A, B, U> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream_b.set_once(d); }
  fn on_next(&self, v: B) { self.state.push_b(v); }
  fn on_error(&self, e: RxError) { self.state.error(e); }
  fn on_complete(&self) { self.state.complete_b(); }
}

/// `combineLatest(sources, combiner)`: one slot per source with a
/// has-value flag; fires once every source has produced at least one
/// value, then again on every subsequent `onNext` using the latest value
/// from every source. Completes once all sources complete, or immediately
/// if a source completes having never emitted.
pub fn combine_latest<T: Clone + Send + 'static, U: Send + 'static>(
  sources: Vec<Observable<T>>,
  combiner: impl Fn(Vec<T>) -> U + Send + Sync + 'static,
) -> Observable<U> {
  let combiner = Arc::new(combiner);
  let n = sources.len();
  Observable::new(move |downstream: ObserverRef<U>| {
    let state = Arc::new(CombineLatestState {
      downstream: downstream.clone(),
      combiner: combiner.clone(),
      slots: Mutex::new(vec![None; n]),
      has_value: (0..n).map(|_| AtomicBool::new(false)).collect(),
      completed: (0..n).map(|_| AtomicBool::new(false)).collect(),
      upstreams: (0..n).map(|_| SequentialDisposable::new()).collect(),
      done: Done::new(),
    });
    let for_dispose = state.clone();
    downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
    for (i, src) in sources.iter().cloned().enumerate() {
      let frame = Arc::new(CombineLatestInnerFrame { state: state.clone(), index: i });
      src.subscribe_with(frame_ref(frame));
    }
  })
}

struct CombineLatestState<T, U> {
  downstream: ObserverRef<U>,
  combiner: Arc<dyn Fn(Vec<T>) -> U + Send + Sync>,
  slots: Mutex<Vec<Option<T>>>,
  has_value: Vec<AtomicBool>,
  completed: Vec<AtomicBool>,
  upstreams: Vec<SequentialDisposable>,
  done: Done,
}

impl<T: Clone + Send + 'static, U: Send + 'static> CombineLatestState<T, U> {
  fn dispose_all(&self) {
    if self.done.mark() {
      for u in &self.upstreams {
        u.dispose();
      }
    }
  }

  fn push(&self, index: usize, v: T) {
    let mut slots = self.slots.lock().unwrap();
    slots[index] = Some(v);
    self.has_value[index].store(true, Ordering::Release);
    if self.has_value.iter().all(|h| h.load(Ordering::Acquire)) {
      let values: Vec<T> = slots.iter().map(|s| s.clone().unwrap()).collect();
      drop(slots);
      if !self.done.is_done() {
        self.downstream.on_next((self.combiner)(values));
      }
    }
  }

  fn source_complete(&self, index: usize) {
    self.completed[index].store(true, Ordering::Release);
    if !self.has_value[index].load(Ordering::Acquire) {
      if self.done.mark() {
        for u in &self.upstreams {
          u.dispose();
        }
        self.downstream.on_complete();
      }
      return;
    }
    if self.completed.iter().all(|c| c.load(Ordering::Acquire)) && self.done.mark() {
      self.downstream.on_complete();
    }
  }

  fn source_error(&self, e: RxError) {
    if self.done.mark() {
      for u in &self.upstreams {
        u.dispose();
      }
      self.downstream.on_error(e);
    }
  }
}

struct CombineLatestInnerFrame<T, U> {
  state: Arc<CombineLatestState<T, U>>,
  index: usize,
}

impl<T: Clone + Send + 'static, U: Send + 'static> Observer<T> for CombineLatestInnerFrame<T, U> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstreams[self.index].set_once(d); }
  fn on_next(&self, v: T) { self.state.push(self.index, v); }
  fn on_error(&self, e: RxError) { self.state.source_error(e); }
  fn on_complete(&self) { self.state.source_complete(self.index); }
}

/// `amb(sources)`: the first source to emit any signal wins a
/// compare-and-swap on a winner index; every other subscription is
/// disposed the moment a winner is decided.
pub fn amb<T: Send + 'static>(sources: Vec<Observable<T>>) -> Observable<T> {
  Observable::new(move |downstream: ObserverRef<T>| {
    let n = sources.len();
    let state = Arc::new(AmbState {
      downstream: downstream.clone(),
      winner: AtomicUsize::new(usize::MAX),
      upstreams: (0..n).map(|_| SequentialDisposable::new()).collect(),
      done: Done::new(),
    });
    let for_dispose = state.clone();
    downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
    for (i, src) in sources.iter().cloned().enumerate() {
      let frame = Arc::new(AmbInnerFrame { state: state.clone(), index: i });
      src.subscribe_with(frame_ref(frame));
    }
  })
}

struct AmbState<T> {
  downstream: ObserverRef<T>,
  winner: AtomicUsize,
  upstreams: Vec<SequentialDisposable>,
  done: Done,
}

impl<T: Send + 'static> AmbState<T> {
  fn dispose_all(&self) {
    if self.done.mark() {
      for u in &self.upstreams {
        u.dispose();
      }
    }
  }

  /// Returns whether `index` is the (possibly newly-decided) winner. The
  /// losing subscriptions are disposed exactly once, at the point a winner
  /// is first decided.
  fn is_winner(&self, index: usize) -> bool {
    match self.winner.compare_exchange(usize::MAX, index, Ordering::AcqRel, Ordering::Acquire) {
      Ok(_) => {
        for (i, u) in self.upstreams.iter().enumerate() {
          if i != index {
            u.dispose();
          }
        }
        true
      }
      Err(w) => w == index,
    }
  }
}

struct AmbInnerFrame<T> {
  state: Arc<AmbState<T>>,
  index: usize,
}

impl<T: Send + 'static> Observer<T> for AmbInnerFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstreams[self.index].set_once(d); }
  fn on_next(&self, v: T) {
    if self.state.is_winner(self.index) {
      self.state.downstream.on_next(v);
    }
  }
  fn on_error(&self, e: RxError) {
    if self.state.is_winner(self.index) && self.state.done.mark() {
      self.state.downstream.on_error(e);
    }
  }
  fn on_complete(&self) {
    if self.state.is_winner(self.index) && self.state.done.mark() {
      self.state.downstream.on_complete();
    }
  }
}

/// `sequenceEqual(a, b, eq, bufferSize)`: two FIFO queues (pre-sized to
/// `buffer_size`, which unbounded growth can still exceed); a drain pass
/// runs after every event, popping matched pairs until either a mismatch
/// decides `false`, one side ends with the other still holding a value
/// (also `false`), or both end empty (`true`).
pub fn sequence_equal<T: Send + 'static>(
  a: Observable<T>,
  b: Observable<T>,
  eq: impl Fn(&T, &T) -> bool + Send + Sync + 'static,
  buffer_size: usize,
) -> Observable<bool> {
  let eq = Arc::new(eq);
  Observable::new(move |downstream: ObserverRef<bool>| {
    let state = Arc::new(SequenceEqualState {
      downstream: downstream.clone(),
      eq: eq.clone(),
      queue_a: Mutex::new(VecDeque::with_capacity(buffer_size)),
      queue_b: Mutex::new(VecDeque::with_capacity(buffer_size)),
      completed_a: AtomicBool::new(false),
      completed_b: AtomicBool::new(false),
      upstream_a: SequentialDisposable::new(),
      upstream_b: SequentialDisposable::new(),
      done: Done::new(),
    });
    let for_dispose = state.clone();
    downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
    let frame_a = Arc::new(SeqEqLeftFrame { state: state.clone() });
    let frame_b = Arc::new(SeqEqRightFrame { state: state.clone() });
    a.subscribe_with(frame_ref(frame_a));
    b.subscribe_with(frame_ref(frame_b));
  })
}

struct SequenceEqualState<T> {
  downstream: ObserverRef<bool>,
  eq: Arc<dyn Fn(&T, &T) -> bool + Send + Sync>,
  queue_a: Mutex<VecDeque<T>>,
  queue_b: Mutex<VecDeque<T>>,
  completed_a: AtomicBool,
  completed_b: AtomicBool,
  upstream_a: SequentialDisposable,
  upstream_b: SequentialDisposable,
  done: Done,
}

impl<T: Send + 'static> SequenceEqualState<T> {
  fn dispose_all(&self) {
    if self.done.mark() {
      self.upstream_a.dispose();
      self.upstream_b.dispose();
    }
  }

  fn finish(&self, result: bool) {
    if self.done.mark() {
      self.upstream_a.dispose();
      self.upstream_b.dispose();
      self.downstream.on_next(result);
      self.downstream.on_complete();
    }
  }

  fn drain(&self) {
    loop {
      let mut qa = self.queue_a.lock().unwrap();
      let mut qb = self.queue_b.lock().unwrap();
      if !qa.is_empty() && !qb.is_empty() {
        let va = qa.pop_front().unwrap();
        let vb = qb.pop_front().unwrap();
        drop(qa);
        drop(qb);
        if !(self.eq)(&va, &vb) {
          self.finish(false);
          return;
        }
        continue;
      }
      let a_done = self.completed_a.load(Ordering::Acquire);
      let b_done = self.completed_b.load(Ordering::Acquire);
      if qa.is_empty() && qb.is_empty() {
        if a_done && b_done {
          drop(qa);
          drop(qb);
          self.finish(true);
        }
        return;
      }
      if (qa.is_empty() && a_done) || (qb.is_empty() && b_done) {
        drop(qa);
        drop(qb);
        self.finish(false);
        return;
      }
      return;
    }
  }

  fn push_a(&self, v: T) {
    self.queue_a.lock().unwrap().push_back(v);
    self.drain();
  }

  fn push_b(&self, v: T) {
    self.queue_b.lock().unwrap().push_back(v);
    self.drain();
  }

  fn complete_a(&self) {
    self.completed_a.store(true, Ordering::Release);
    self.drain();
  }

  fn complete_b(&self) {
    self.completed_b.store(true, Ordering::Release);
    self.drain();
  }

  fn error(&self, e: RxError) {
    if self.done.mark() {
      self.upstream_a.dispose();
      self.upstream_b.dispose();
      self.downstream.on_error(e);
    }
  }
}

struct SeqEqLeftFrame<T> {
  state: Arc<SequenceEqualState<T>>,
}

impl<T: Send + 'static> Observer<T> for SeqEqLeftFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream_a.set_once(d); }
  fn on_next(&self, v: T) { self.state.push_a(v); }
  fn on_error(&self, e: RxError) { self.state.error(e); }
  fn on_complete(&self) { self.state.complete_a(); }
}

struct SeqEqRightFrame<T> {
  state: Arc<SequenceEqualState<T>>,
}

impl<T: Send + 'static> Observer<T> for SeqEqRightFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream_b.set_once(d); }
  fn on_next(&self, v: T) { self.state.push_b(v); }
  fn on_error(&self, e: RxError) { self.state.error(e); }
  fn on_complete(&self) { self.state.complete_b(); }
}

/// A one-subscriber multicast buffer: events pushed before the single
/// subscriber attaches are queued, then flushed before forwarding goes
/// live. Backing both `groupBy`'s per-key groups and `window`'s per-window
/// observables — both are expected to be subscribed exactly once, so this
/// is simpler than a full broadcasting subject.
struct GroupSubject<T> {
  state: Mutex<GroupSubjectState<T>>,
}

struct GroupSubjectState<T> {
  subscriber: Option<ObserverRef<T>>,
  buffer: VecDeque<T>,
  terminal: Option<GroupTerminal>,
}

enum GroupTerminal {
  Complete,
  Error(RxError),
}

impl<T: Send + 'static> GroupSubject<T> {
  fn new() -> Arc<Self> {
    Arc::new(Self { state: Mutex::new(GroupSubjectState { subscriber: None, buffer: VecDeque::new(), terminal: None }) })
  }

  fn push(&self, v: T) {
    let mut s = self.state.lock().unwrap();
    match s.subscriber.clone() {
      Some(sub) => {
        drop(s);
        sub.on_next(v);
      }
      None => s.buffer.push_back(v),
    }
  }

  fn complete(&self) {
    let mut s = self.state.lock().unwrap();
    match s.subscriber.clone() {
      Some(sub) => {
        drop(s);
        sub.on_complete();
      }
      None => s.terminal = Some(GroupTerminal::Complete),
    }
  }

  fn error(&self, e: RxError) {
    let mut s = self.state.lock().unwrap();
    match s.subscriber.clone() {
      Some(sub) => {
        drop(s);
        sub.on_error(e);
      }
      None => s.terminal = Some(GroupTerminal::Error(e)),
    }
  }

  fn subscribe(self: &Arc<Self>, downstream: ObserverRef<T>) {
    downstream.on_subscribe(crate::disposable::terminal());
    let mut s = self.state.lock().unwrap();
    let buffered: Vec<T> = s.buffer.drain(..).collect();
    let terminal = s.terminal.take();
    s.subscriber = Some(downstream.clone());
    drop(s);
    for v in buffered {
      downstream.on_next(v);
    }
    match terminal {
      Some(GroupTerminal::Complete) => downstream.on_complete(),
      Some(GroupTerminal::Error(e)) => downstream.on_error(e),
      None => {}
    }
  }

  fn as_observable(self: &Arc<Self>) -> Observable<T> {
    let this = self.clone();
    Observable::new(move |downstream: ObserverRef<T>| this.subscribe(downstream))
  }
}

/// A group produced by [Observable::group_by]: the key that identifies it
/// plus the observable of its values. Derefs to the inner observable so
/// `group.subscribe(...)` reads the way subscribing any observable does.
pub struct GroupedObservable<K, V> {
  key: K,
  observable: Observable<V>,
}

impl<K: Clone, V> GroupedObservable<K, V> {
  pub fn key(&self) -> K { self.key.clone() }
}

impl<K, V> std::ops::Deref for GroupedObservable<K, V> {
  type Target = Observable<V>;
  fn deref(&self) -> &Observable<V> { &self.observable }
}

/// `groupBy(keySel, valueSel)`: a map from key to a per-group
/// [GroupSubject]; the first item under a new key emits a
/// [GroupedObservable] downstream, and every later item under that key
/// feeds the same group. Terminal events fan out to every group that has
/// been created so far.
impl<T: Send + 'static> Observable<T> {
  pub fn group_by<K, V>(
    &self,
    key_sel: impl Fn(&T) -> K + Send + Sync + 'static,
    value_sel: impl Fn(T) -> V + Send + Sync + 'static,
  ) -> Observable<GroupedObservable<K, V>>
  where
    K: Clone + Eq + std::hash::Hash + Send + 'static,
    V: Send + 'static,
  {
    let source = self.clone();
    let key_sel = Arc::new(key_sel);
    let value_sel = Arc::new(value_sel);
    Observable::new(move |downstream: ObserverRef<GroupedObservable<K, V>>| {
      let state = Arc::new(GroupByState {
        downstream: downstream.clone(),
        groups: Mutex::new(HashMap::new()),
        upstream: SequentialDisposable::new(),
      });
      let for_dispose = state.clone();
      downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.upstream.dispose()));
      let frame = Arc::new(GroupByFrame { state, key_sel: key_sel.clone(), value_sel: value_sel.clone() });
      source.subscribe_with(frame_ref(frame));
    })
  }
}

struct GroupByState<K, V> {
  downstream: ObserverRef<GroupedObservable<K, V>>,
  groups: Mutex<HashMap<K, Arc<GroupSubject<V>>>>,
  upstream: SequentialDisposable,
}

struct GroupByFrame<T, K, V> {
  state: Arc<GroupByState<K, V>>,
  key_sel: Arc<dyn Fn(&T) -> K + Send + Sync>,
  value_sel: Arc<dyn Fn(T) -> V + Send + Sync>,
}

impl<T: Send + 'static, K: Clone + Eq + std::hash::Hash + Send + 'static, V: Send + 'static> Observer<T>
  for GroupByFrame<T, K, V>
{
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream.set_once(d); }

  fn on_next(&self, v: T) {
    let key = (self.key_sel)(&v);
    let mut groups = self.state.groups.lock().unwrap();
    let is_new = !groups.contains_key(&key);
    let subject = groups.entry(key.clone()).or_insert_with(GroupSubject::new).clone();
    drop(groups);
    if is_new {
      self.state.downstream.on_next(GroupedObservable { key, observable: subject.as_observable() });
    }
    subject.push((self.value_sel)(v));
  }

  fn on_error(&self, e: RxError) {
    let groups = self.state.groups.lock().unwrap();
    for subject in groups.values() {
      subject.error(e.clone());
    }
    drop(groups);
    self.state.downstream.on_error(e);
  }

  fn on_complete(&self) {
    let groups = self.state.groups.lock().unwrap();
    for subject in groups.values() {
      subject.complete();
    }
    drop(groups);
    self.state.downstream.on_complete();
  }
}

/// `window(count, skip)`: like [Observable::buffer] but each window is
/// emitted as a nested observable rather than a materialized `Vec`. Built
/// on the same sliding-ring-of-open-windows shape as `buffer`, with each
/// open window backed by a [GroupSubject] instead of a `Vec`.
impl<T: Clone + Send + 'static> Observable<T> {
  pub fn window(&self, count: usize, skip: usize) -> Observable<Observable<T>> {
    assert!(count > 0 && skip > 0, "window(count, skip) requires both positive");
    super::lift(self.clone(), move |downstream| {
      Arc::new(WindowFrame { downstream, upstream: SequentialDisposable::new(), count, skip, index: AtomicUsize::new(0), open: Mutex::new(VecDeque::new()) })
    })
  }
}

struct WindowFrame<T> {
  downstream: ObserverRef<Observable<T>>,
  upstream: SequentialDisposable,
  count: usize,
  skip: usize,
  index: AtomicUsize,
  open: Mutex<VecDeque<(Arc<GroupSubject<T>>, usize)>>,
}

impl<T: Clone + Send + 'static> Observer<T> for WindowFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }

  fn on_next(&self, v: T) {
    let i = self.index.fetch_add(1, Ordering::AcqRel);
    let mut open = self.open.lock().unwrap();
    let mut newly_opened = None;
    if i % self.skip == 0 {
      let subj = GroupSubject::new();
      newly_opened = Some(subj.clone());
      open.push_back((subj, 0));
    }
    let mut finished = Vec::new();
    for (subj, cnt) in open.iter_mut() {
      subj.push(v.clone());
      *cnt += 1;
    }
    while let Some((_, cnt)) = open.front() {
      if *cnt >= self.count {
        finished.push(open.pop_front().unwrap().0);
      } else {
        break;
      }
    }
    drop(open);
    if let Some(subj) = newly_opened {
      self.downstream.on_next(subj.as_observable());
    }
    for subj in finished {
      subj.complete();
    }
  }

  fn on_error(&self, e: RxError) {
    for (subj, _) in self.open.lock().unwrap().drain(..) {
      subj.error(e.clone());
    }
    self.downstream.on_error(e);
  }

  fn on_complete(&self) {
    for (subj, _) in self.open.lock().unwrap().drain(..) {
      subj.complete();
    }
    self.downstream.on_complete();
  }
}

impl<T: Clone + Send + 'static> Disposable for WindowFrame<T> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `join(other, leftDur, rightDur, result)`: every left value pairs with
/// every currently-active right value through `result` (and vice versa);
/// a value stays "active" until its duration observable emits or
/// completes, at which point it's removed from the active map keyed by an
/// internal id.
pub fn join<T, U, DL, DR, R>(
  left: Observable<T>,
  right: Observable<U>,
  left_duration: impl Fn(&T) -> Observable<DL> + Send + Sync + 'static,
  right_duration: impl Fn(&U) -> Observable<DR> + Send + Sync + 'static,
  result: impl Fn(&T, &U) -> R + Send + Sync + 'static,
) -> Observable<R>
where
  T: Clone + Send + 'static,
  U: Clone + Send + 'static,
  DL: Send + 'static,
  DR: Send + 'static,
  R: Send + 'static,
{
  let left_duration = Arc::new(left_duration);
  let right_duration = Arc::new(right_duration);
  let result = Arc::new(result);
  Observable::new(move |downstream: ObserverRef<R>| {
    let state = Arc::new(JoinState {
      downstream: downstream.clone(),
      result: result.clone(),
      left: Mutex::new(HashMap::new()),
      right: Mutex::new(HashMap::new()),
      next_id: AtomicU64::new(0),
      left_upstream: SequentialDisposable::new(),
      right_upstream: SequentialDisposable::new(),
      left_complete: AtomicBool::new(false),
      right_complete: AtomicBool::new(false),
      done: Done::new(),
    });
    let for_dispose = state.clone();
    downstream.on_subscribe(CallbackDisposable::new(move || for_dispose.dispose_all()));
    let left_frame = Arc::new(JoinLeftFrame { state: state.clone(), duration: left_duration.clone() });
    let right_frame = Arc::new(JoinRightFrame { state: state.clone(), duration: right_duration.clone() });
    left.subscribe_with(frame_ref(left_frame));
    right.subscribe_with(frame_ref(right_frame));
  })
}

struct JoinState<T, U, R> {
  downstream: ObserverRef<R>,
  result: Arc<dyn Fn(&T, &U) -> R + Send + Sync>,
  left: Mutex<HashMap<u64, T>>,
  right: Mutex<HashMap<u64, U>>,
  next_id: AtomicU64,
  left_upstream: SequentialDisposable,
  right_upstream: SequentialDisposable,
  left_complete: AtomicBool,
  right_complete: AtomicBool,
  done: Done,
}

impl<T: Clone + Send + 'static, U: Clone + Send + 'static, R: Send + 'static> JoinState<T, U, R> {
  fn dispose_all(&self) {
    if self.done.mark() {
      self.left_upstream.dispose();
      self.right_upstream.dispose();
    }
  }

  fn error(&self, e: RxError) {
    if self.done.mark() {
      self.left_upstream.dispose();
      self.right_upstream.dispose();
      self.downstream.on_error(e);
    }
  }

  fn maybe_complete(&self) {
    if self.left_complete.load(Ordering::Acquire) && self.right_complete.load(Ordering::Acquire) && self.done.mark() {
      self.downstream.on_complete();
    }
  }

  fn expire_left(&self, id: u64) { self.left.lock().unwrap().remove(&id); }
  fn expire_right(&self, id: u64) { self.right.lock().unwrap().remove(&id); }
}

struct JoinLeftFrame<T, U, DL, R> {
  state: Arc<JoinState<T, U, R>>,
  duration: Arc<dyn Fn(&T) -> Observable<DL> + Send + Sync>,
}

impl<T, U, DL, R> Observer<T> for JoinLeftFrame<T, U, DL, R>
where
  T: Clone + Send + 'static,
  U: Clone + Send + 'static,
  DL: Send + 'static,
  R: Send + 'static,
{
  fn on_subscribe(&self, d: DisposableHandle) { self.state.left_upstream.set_once(d); }

  fn on_next(&self, v: T) {
    let id = self.state.next_id.fetch_add(1, Ordering::AcqRel);
    self.state.left.lock().unwrap().insert(id, v.clone());
    let snapshot: Vec<U> = self.state.right.lock().unwrap().values().cloned().collect();
    for r in snapshot {
      if self.state.done.is_done() {
        break;
      }
      self.state.downstream.on_next((self.state.result)(&v, &r));
    }
    let dur = (self.duration)(&v);
    let expiry = Arc::new(JoinExpiryFrame { state: self.state.clone(), id, side: JoinSide::Left, fired: Done::new(), _marker: std::marker::PhantomData });
    dur.subscribe_with(frame_ref(expiry));
  }

  fn on_error(&self, e: RxError) { self.state.error(e); }
  fn on_complete(&self) {
    self.state.left_complete.store(true, Ordering::Release);
    self.state.maybe_complete();
  }
}

struct JoinRightFrame<T, U, DR, R> {
  state: Arc<JoinState<T, U, R>>,
  duration: Arc<dyn Fn(&U) -> Observable<DR> + Send + Sync>,
}

impl<T, U, DR, R> Observer<U> for JoinRightFrame<T, U, DR, R>
where
  T: Clone + Send + 'static,
  U: Clone + Send + 'static,
  DR: Send + 'static,
  R: Send + 'static,
{
  fn on_subscribe(&self, d: DisposableHandle) { self.state.right_upstream.set_once(d); }

  fn on_next(&self, v: U) {
    let id = self.state.next_id.fetch_add(1, Ordering::AcqRel);
    self.state.right.lock().unwrap().insert(id, v.clone());
    let snapshot: Vec<T> = self.state.left.lock().unwrap().values().cloned().collect();
    for l in snapshot {
      if self.state.done.is_done() {
        break;
      }
      self.state.downstream.on_next((self.state.result)(&l, &v));
    }
    let dur = (self.duration)(&v);
    let expiry = Arc::new(JoinExpiryFrame { state: self.state.clone(), id, side: JoinSide::Right, fired: Done::new(), _marker: std::marker::PhantomData });
    dur.subscribe_with(frame_ref(expiry));
  }

  fn on_error(&self, e: RxError) { self.state.error(e); }
  fn on_complete(&self) {
    self.state.right_complete.store(true, Ordering::Release);
    self.state.maybe_complete();
  }
}

enum JoinSide {
  Left,
  Right,
}

struct JoinExpiryFrame<T, U, D, R> {
  state: Arc<JoinState<T, U, R>>,
  id: u64,
  side: JoinSide,
  fired: Done,
  _marker: std::marker::PhantomData<D>,
}

impl<T, U, D, R> JoinExpiryFrame<T, U, D, R>
where
  T: Clone + Send + 'static,
  U: Clone + Send + 'static,
  R: Send + 'static,
{
  fn expire(&self) {
    if self.fired.mark() {
      match self.side {
        JoinSide::Left => self.state.expire_left(self.id),
        JoinSide::Right => self.state.expire_right(self.id),
      }
    }
  }
}

impl<T, U, D, R> Observer<D> for JoinExpiryFrame<T, U, D, R>
where
  T: Clone + Send + 'static,
  U: Clone + Send + 'static,
  D: Send + 'static,
  R: Send + 'static,
{
  fn on_subscribe(&self, _d: DisposableHandle) {}
  fn on_next(&self, _v: D) { self.expire(); }
  fn on_error(&self, _e: RxError) { self.expire(); }
  fn on_complete(&self) { self.expire(); }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::sync::mpsc::channel;
  use std::sync::Mutex as StdMutex;
  use std::time::Duration;

  #[test]
  fn merge_interleaves_all_sources() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    merge(vec![source::from_array(vec![1, 2]), source::from_array(vec![3, 4])]).subscribe(
      move |v| out2.lock().unwrap().push(v),
      |_| {},
      || {},
    );
    let mut got = out.lock().unwrap().clone();
    got.sort();
    assert_eq!(got, vec![1, 2, 3, 4]);
  }

  #[test]
  fn concat_preserves_source_order() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    concat(vec![source::from_array(vec![1, 2]), source::from_array(vec![3, 4])]).subscribe(
      move |v| out2.lock().unwrap().push(v),
      |_| {},
      || {},
    );
    assert_eq!(*out.lock().unwrap(), vec![1, 2, 3, 4]);
  }

  #[test]
  fn zip_pairs_by_position() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    zip(vec![source::range(0, 3), source::range(10, 3)], |v| v[0] + v[1]).subscribe(
      move |v| out2.lock().unwrap().push(v),
      |_| {},
      || {},
    );
    assert_eq!(*out.lock().unwrap(), vec![10, 12, 14]);
  }

  #[test]
  fn zip_completes_when_shortest_drains() {
    let (tx, rx) = channel();
    zip(vec![source::range(0, 1), source::range(0, 5)], |v| v[0] + v[1]).subscribe(
      |_| {},
      |_| {},
      move || tx.send(()).unwrap(),
    );
    rx.recv_timeout(Duration::from_secs(1)).unwrap();
  }

  #[test]
  fn zip2_pairs_heterogeneous_types() {
    let (tx, rx) = channel();
    zip2(source::just(1), source::just("a".to_string()), |n, s| format!("{n}{s}")).subscribe(
      move |v| tx.send(v).unwrap(),
      |_| {},
      || {},
    );
    assert_eq!(rx.recv().unwrap(), "1a");
  }

  #[test]
  fn combine_latest_waits_for_every_source_then_follows_latest() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    combine_latest(vec![source::from_array(vec![1, 2]), source::just(10)], |v| v.iter().sum::<i64>()).subscribe(
      move |v| out2.lock().unwrap().push(v),
      |_| {},
      || {},
    );
    assert_eq!(*out.lock().unwrap(), vec![12]);
  }

  #[test]
  fn amb_takes_the_first_source_to_signal() {
    let (tx, rx) = channel();
    amb(vec![
      source::timer(Duration::from_millis(40)).map(|_| 1),
      source::timer(Duration::from_millis(5)).map(|_| 2),
    ])
    .subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 2);
  }

  #[test]
  fn sequence_equal_true_for_identical_sequences() {
    let (tx, rx) = channel();
    sequence_equal(source::from_array(vec![1, 2, 3]), source::from_array(vec![1, 2, 3]), |a, b| a == b, 16)
      .subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert!(rx.recv().unwrap());
  }

  #[test]
  fn sequence_equal_false_on_length_mismatch() {
    let (tx, rx) = channel();
    sequence_equal(source::from_array(vec![1, 2]), source::from_array(vec![1, 2, 3]), |a, b| a == b, 16)
      .subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert!(!rx.recv().unwrap());
  }

  #[test]
  fn group_by_buckets_items_by_key() {
    let groups = Arc::new(StdMutex::new(HashMap::<bool, Vec<i32>>::new()));
    let groups2 = groups.clone();
    source::range(0, 6).group_by(|v| v % 2 == 0, |v| v as i32).subscribe(
      move |g| {
        let key = g.key();
        let out = groups2.clone();
        g.subscribe(move |v| { out.lock().unwrap().entry(key).or_default().push(v); }, |_| {}, || {});
      },
      |_| {},
      || {},
    );
    let g = groups.lock().unwrap();
    assert_eq!(g[&true], vec![0, 2, 4]);
    assert_eq!(g[&false], vec![1, 3, 5]);
  }

  #[test]
  fn window_emits_nested_observables_of_the_given_size() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    source::range(1, 4).window(2, 2).subscribe(
      {
        let out = out.clone();
        move |w| {
          let chunk = Arc::new(StdMutex::new(Vec::new()));
          let chunk2 = chunk.clone();
          w.subscribe(move |v| chunk2.lock().unwrap().push(v), |_| {}, || {});
          out.lock().unwrap().push(chunk.lock().unwrap().clone());
        }
      },
      |_| {},
      || {},
    );
    assert_eq!(*out.lock().unwrap(), vec![vec![1, 2], vec![3, 4]]);
  }

  #[test]
  fn join_pairs_every_active_value_on_both_sides() {
    let out = Arc::new(StdMutex::new(Vec::new()));
    let out2 = out.clone();
    join(
      source::from_array(vec!["a", "b"]),
      source::from_array(vec![1, 2]),
      |_: &&str| source::never::<()>(),
      |_: &i32| source::never::<()>(),
      |l: &&str, r: &i32| format!("{l}{r}"),
    )
    .subscribe(move |v| out2.lock().unwrap().push(v), |_| {}, || {});
    let mut got = out.lock().unwrap().clone();
    got.sort();
    assert_eq!(got, vec!["a1", "a2", "b1", "b2"]);
  }
}
