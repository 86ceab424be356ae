//! Error/lifecycle operators (spec.md §4.K): side-effect hooks that
//! observe the protocol without altering it, plus the two operators that
//! let a subscriber recover from an `onError` instead of just seeing it.
//!
//! Grounded on `examples/original_source/rx/include/rx/operators/observable_do.h`
//! and `observable_on_error_resume_next.h`.

use std::sync::Arc;

use super::{frame_ref, lift};
use crate::disposable::{Disposable, DisposableHandle, SequentialDisposable};
use crate::error::{self, RxError};
use crate::observable::Observable;
use crate::observer::{Done, Observer, ObserverRef};

/// `doOnNext(f)`: runs `f(&v)` before forwarding `v` downstream. A panic
/// from `f` is converted to `onError` instead of unwinding through the
/// upstream producer.
impl<T: Send + 'static> Observable<T> {
  pub fn do_on_next(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Observable<T> {
    let f = Arc::new(f);
    lift(self.clone(), move |downstream| {
      Arc::new(DoOnNextFrame { downstream, upstream: SequentialDisposable::new(), f: f.clone() })
    })
  }
}

struct DoOnNextFrame<T, F> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  f: Arc<F>,
}

impl<T: Send + 'static, F: Fn(&T) + Send + Sync + 'static> Observer<T> for DoOnNextFrame<T, F> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) {
    match error::catch(std::panic::AssertUnwindSafe(|| (self.f)(&v))) {
      Ok(()) => self.downstream.on_next(v),
      Err(e) => {
        self.upstream.dispose();
        self.downstream.on_error(e);
      },
    }
  }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

impl<T: Send + 'static, F: Fn(&T) + Send + Sync + 'static> Disposable for DoOnNextFrame<T, F> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `doOnError(f)`: runs `f(&e)` before forwarding `e` downstream. A panic
/// from `f` is logged and swallowed — the stream is already terminating,
/// there is no second terminal event to deliver it through.
impl<T: Send + 'static> Observable<T> {
  pub fn do_on_error(&self, f: impl Fn(&RxError) + Send + Sync + 'static) -> Observable<T> {
    let f = Arc::new(f);
    lift(self.clone(), move |downstream| {
      Arc::new(DoOnErrorFrame { downstream, upstream: SequentialDisposable::new(), f: f.clone() })
    })
  }
}

struct DoOnErrorFrame<T, F> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  f: Arc<F>,
}

impl<T: Send + 'static, F: Fn(&RxError) + Send + Sync + 'static> Observer<T> for DoOnErrorFrame<T, F> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) { self.downstream.on_next(v); }
  fn on_error(&self, e: RxError) {
    let _ = error::catch(std::panic::AssertUnwindSafe(|| (self.f)(&e)));
    self.downstream.on_error(e);
  }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

impl<T: Send + 'static, F: Fn(&RxError) + Send + Sync + 'static> Disposable for DoOnErrorFrame<T, F> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `doOnComplete(f)`: runs `f()` before forwarding `onComplete` downstream.
impl<T: Send + 'static> Observable<T> {
  pub fn do_on_complete(&self, f: impl Fn() + Send + Sync + 'static) -> Observable<T> {
    let f = Arc::new(f);
    lift(self.clone(), move |downstream| {
      Arc::new(DoOnCompleteFrame { downstream, upstream: SequentialDisposable::new(), f: f.clone() })
    })
  }
}

struct DoOnCompleteFrame<T, F> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  f: Arc<F>,
}

impl<T: Send + 'static, F: Fn() + Send + Sync + 'static> Observer<T> for DoOnCompleteFrame<T, F> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) { self.downstream.on_next(v); }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) {
    let _ = error::catch(std::panic::AssertUnwindSafe(|| (self.f)()));
    self.downstream.on_complete();
  }
}

impl<T: Send + 'static, F: Fn() + Send + Sync + 'static> Disposable for DoOnCompleteFrame<T, F> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `doOnSubscribe(f)`: runs `f()` before `onSubscribe` reaches downstream —
/// built directly on `Observable::new` rather than [lift] so the callback
/// runs ahead of anything else in the subscription, including building the
/// frame that forwards events.
impl<T: Send + 'static> Observable<T> {
  pub fn do_on_subscribe(&self, f: impl Fn() + Send + Sync + 'static) -> Observable<T> {
    let source = self.clone();
    Observable::new(move |downstream: ObserverRef<T>| {
      f();
      let upstream = Arc::new(SequentialDisposable::new());
      let handle: DisposableHandle = upstream.clone();
      downstream.on_subscribe(handle);
      let frame = Arc::new(ForwardFrame { downstream: downstream.clone(), upstream: upstream.clone() });
      source.subscribe_with(frame_ref(frame));
    })
  }
}

struct ForwardFrame<T> {
  downstream: ObserverRef<T>,
  upstream: Arc<SequentialDisposable>,
}

impl<T: Send + 'static> Observer<T> for ForwardFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) { self.downstream.on_next(v); }
  fn on_error(&self, e: RxError) { self.downstream.on_error(e); }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

/// `doFinally(f)`: runs `f()` exactly once, on whichever comes first —
/// the terminal event or disposal.
impl<T: Send + 'static> Observable<T> {
  pub fn do_finally(&self, f: impl Fn() + Send + Sync + 'static) -> Observable<T> {
    let f = Arc::new(f);
    lift(self.clone(), move |downstream| {
      Arc::new(DoFinallyFrame {
        downstream,
        upstream: SequentialDisposable::new(),
        f: f.clone(),
        fired: Done::new(),
      })
    })
  }
}

struct DoFinallyFrame<T, F> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  f: Arc<F>,
  fired: Done,
}

impl<T, F: Fn() + Send + Sync + 'static> DoFinallyFrame<T, F> {
  fn fire(&self) {
    if self.fired.mark() {
      (self.f)();
    }
  }
}

impl<T: Send + 'static, F: Fn() + Send + Sync + 'static> Observer<T> for DoFinallyFrame<T, F> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) { self.downstream.on_next(v); }
  fn on_error(&self, e: RxError) {
    self.fire();
    self.downstream.on_error(e);
  }
  fn on_complete(&self) {
    self.fire();
    self.downstream.on_complete();
  }
}

impl<T: Send + 'static, F: Fn() + Send + Sync + 'static> Disposable for DoFinallyFrame<T, F> {
  fn dispose(&self) {
    self.fire();
    self.upstream.dispose();
  }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `onErrorReturn(v)`: an `onError` becomes `onNext(v); onComplete()`
/// instead of propagating.
impl<T: Clone + Send + 'static> Observable<T> {
  pub fn on_error_return(&self, v: T) -> Observable<T> {
    lift(self.clone(), move |downstream| {
      Arc::new(OnErrorReturnFrame { downstream, upstream: SequentialDisposable::new(), v: v.clone() })
    })
  }
}

struct OnErrorReturnFrame<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  v: T,
}

impl<T: Clone + Send + 'static> Observer<T> for OnErrorReturnFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }
  fn on_next(&self, v: T) { self.downstream.on_next(v); }
  fn on_error(&self, _e: RxError) {
    self.downstream.on_next(self.v.clone());
    self.downstream.on_complete();
  }
  fn on_complete(&self) { self.downstream.on_complete(); }
}

impl<T: Clone + Send + 'static> Disposable for OnErrorReturnFrame<T> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// `onErrorResumeNext(fn)`: an `onError(e)` subscribes to `fn(e)` instead
/// of propagating; a second error, from the resume source, surfaces
/// untouched.
impl<T: Send + 'static> Observable<T> {
  pub fn on_error_resume_next(&self, resume: impl Fn(RxError) -> Observable<T> + Send + Sync + 'static) -> Observable<T> {
    let source = self.clone();
    let resume = Arc::new(resume);
    Observable::new(move |downstream: ObserverRef<T>| {
      let state = Arc::new(ResumeState {
        downstream,
        upstream: SequentialDisposable::new(),
        resume: resume.clone(),
        done: Done::new(),
      });
      let for_dispose = state.clone();
      downstream_on_subscribe(&for_dispose);
      let frame = Arc::new(ResumeFrame { state: state.clone() });
      source.subscribe_with(frame_ref(frame));
    })
  }
}

fn downstream_on_subscribe<T: Send + 'static>(state: &Arc<ResumeState<T>>) {
  let for_dispose = state.clone();
  state.downstream.on_subscribe(crate::disposable::CallbackDisposable::new(move || for_dispose.dispose_all()));
}

struct ResumeState<T> {
  downstream: ObserverRef<T>,
  upstream: SequentialDisposable,
  resume: Arc<dyn Fn(RxError) -> Observable<T> + Send + Sync>,
  done: Done,
}

impl<T: Send + 'static> ResumeState<T> {
  fn dispose_all(&self) {
    if self.done.mark() {
      self.upstream.dispose();
    }
  }
}

struct ResumeFrame<T> {
  state: Arc<ResumeState<T>>,
}

impl<T: Send + 'static> Observer<T> for ResumeFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream.set(d); }
  fn on_next(&self, v: T) {
    if !self.state.done.is_done() {
      self.state.downstream.on_next(v);
    }
  }
  fn on_error(&self, e: RxError) {
    let resume_obs = (self.state.resume)(e);
    let frame = Arc::new(ResumeFallbackFrame { state: self.state.clone() });
    resume_obs.subscribe_with(frame_ref(frame));
  }
  fn on_complete(&self) {
    if self.state.done.mark() {
      self.state.downstream.on_complete();
    }
  }
}

struct ResumeFallbackFrame<T> {
  state: Arc<ResumeState<T>>,
}

impl<T: Send + 'static> Observer<T> for ResumeFallbackFrame<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.state.upstream.set(d); }
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

#[cfg(test)]
mod test {
  use super::*;
  use crate::observable::source;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::mpsc::channel;
  use std::sync::Mutex;

  #[test]
  fn do_on_next_runs_side_effect_before_forwarding() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    source::from_array(vec![1, 2, 3]).do_on_next(move |v| seen2.lock().unwrap().push(*v)).subscribe(|_| {}, |_| {}, || {});
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
  }

  #[test]
  fn do_on_next_panic_becomes_on_error() {
    let (tx, rx) = channel();
    source::just(1).do_on_next(|_| panic!("boom")).subscribe(|_| {}, move |e| tx.send(e.to_string()).unwrap(), || {});
    assert!(rx.recv().unwrap().len() > 0);
  }

  #[test]
  fn do_on_error_runs_before_propagating() {
    let ran = Arc::new(AtomicUsize::new(0));
    let ran2 = ran.clone();
    let (tx, rx) = channel();
    source::error::<i32>(RxError::Timeout)
      .do_on_error(move |_| { ran2.fetch_add(1, Ordering::SeqCst); })
      .subscribe(|_| {}, move |e| tx.send(e.to_string()).unwrap(), || {});
    rx.recv().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn do_on_complete_runs_before_completion() {
    let ran = Arc::new(AtomicUsize::new(0));
    let ran2 = ran.clone();
    let (tx, rx) = channel();
    source::just(1).do_on_complete(move || { ran2.fetch_add(1, Ordering::SeqCst); }).subscribe(
      |_| {},
      |_| {},
      move || tx.send(()).unwrap(),
    );
    rx.recv().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn do_on_subscribe_runs_before_any_event() {
    let ran = Arc::new(AtomicUsize::new(0));
    let ran2 = ran.clone();
    source::just(1).do_on_subscribe(move || { ran2.fetch_add(1, Ordering::SeqCst); }).subscribe(|_| {}, |_| {}, || {});
    assert_eq!(ran.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn do_finally_runs_exactly_once_on_completion() {
    let ran = Arc::new(AtomicUsize::new(0));
    let ran2 = ran.clone();
    source::just(1).do_finally(move || { ran2.fetch_add(1, Ordering::SeqCst); }).subscribe(|_| {}, |_| {}, || {});
    assert_eq!(ran.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn do_finally_runs_exactly_once_on_dispose() {
    let ran = Arc::new(AtomicUsize::new(0));
    let ran2 = ran.clone();
    let d = source::never::<i32>().do_finally(move || { ran2.fetch_add(1, Ordering::SeqCst); }).subscribe(
      |_| {},
      |_| {},
      || {},
    );
    d.dispose();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn on_error_return_substitutes_a_value() {
    let (tx, rx) = channel();
    source::error::<i32>(RxError::Timeout).on_error_return(-1).subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.recv().unwrap(), -1);
  }

  #[test]
  fn on_error_resume_next_switches_to_the_resume_source() {
    let (tx, rx) = channel();
    source::error::<i32>(RxError::Timeout)
      .on_error_resume_next(|_e| source::from_array(vec![8, 9]))
      .subscribe(move |v| tx.send(v).unwrap(), |_| {}, || {});
    assert_eq!(rx.recv().unwrap(), 8);
    assert_eq!(rx.recv().unwrap(), 9);
  }

  #[test]
  fn on_error_resume_next_second_error_surfaces_untouched() {
    let (tx, rx) = channel();
    source::error::<i32>(RxError::Timeout)
      .on_error_resume_next(|_e| source::error(RxError::NoElements))
      .subscribe(|_| {}, move |e| tx.send(e.to_string()).unwrap(), || {});
    assert_eq!(rx.recv().unwrap(), RxError::NoElements.to_string());
  }
}
