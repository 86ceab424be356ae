use std::panic::AssertUnwindSafe;
use std::sync::Mutex;

use super::{Done, Observer};
use crate::disposable::{Disposable, DisposableCell, DisposableHandle};
use crate::error::{self, RxError};

type NextFn<T> = Box<dyn FnMut(T) + Send>;
type ErrorFn = Box<dyn FnOnce(RxError) + Send>;
type CompleteFn = Box<dyn FnOnce() + Send>;

/// The terminal sink built by `Observable::subscribe(on_next, on_error,
/// on_complete)` (spec.md §4.E "convenience subscribe"). It has no
/// upstream of its own beyond the one cell handed to it by `on_subscribe`,
/// owns its callbacks until termination, and disposes itself once a
/// terminal event has been delivered.
pub struct CallbackObserver<T> {
  on_next: Mutex<Option<NextFn<T>>>,
  on_error: Mutex<Option<ErrorFn>>,
  on_complete: Mutex<Option<CompleteFn>>,
  done: Done,
  upstream: DisposableCell,
}

impl<T> CallbackObserver<T> {
  pub fn new(
    on_next: impl FnMut(T) + Send + 'static,
    on_error: impl FnOnce(RxError) + Send + 'static,
    on_complete: impl FnOnce() + Send + 'static,
  ) -> std::sync::Arc<Self> {
    std::sync::Arc::new(Self {
      on_next: Mutex::new(Some(Box::new(on_next))),
      on_error: Mutex::new(Some(Box::new(on_error))),
      on_complete: Mutex::new(Some(Box::new(on_complete))),
      done: Done::new(),
      upstream: DisposableCell::new(),
    })
  }
}

impl<T> Observer<T> for CallbackObserver<T> {
  fn on_subscribe(&self, d: DisposableHandle) { self.upstream.set_once(d); }

  fn on_next(&self, v: T) {
    if self.done.is_done() { return; }
    let mut slot = self.on_next.lock().unwrap();
    if let Some(f) = slot.as_mut() {
      if error::catch(AssertUnwindSafe(|| f(v))).is_err() {
        drop(slot);
        self.upstream.dispose();
        self.on_error(RxError::custom(CallbackPanicked));
      }
    }
  }

  fn on_error(&self, e: RxError) {
    if !self.done.mark() { return; }
    self.upstream.dispose();
    if let Some(f) = self.on_error.lock().unwrap().take() {
      f(e);
    }
  }

  fn on_complete(&self) {
    if !self.done.mark() { return; }
    self.upstream.dispose();
    if let Some(f) = self.on_complete.lock().unwrap().take() {
      f();
    }
  }
}

impl<T> Disposable for CallbackObserver<T> {
  fn dispose(&self) { self.upstream.dispose(); }
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

#[derive(Debug)]
struct CallbackPanicked;
impl std::fmt::Display for CallbackPanicked {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "onNext callback panicked")
  }
}
impl std::error::Error for CallbackPanicked {}
