//! The cancellation machinery: a uniform cancel token, a terminal sentinel
//! meaning "this slot is closed", and the single-assignment cell every
//! operator frame uses to hold its upstream.

mod cell;
mod sequential;

pub use cell::{CellState, DisposableCell};
pub use sequential::SequentialDisposable;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// A cancel token. `dispose` is idempotent; once it returns, `is_disposed`
/// is true forever.
pub trait Disposable: Send + Sync {
  /// Cancel whatever this disposable represents. Safe to call from any
  /// thread, including reentrantly from inside the callback it cancels.
  fn dispose(&self);
  /// Whether `dispose` has (ever) been called.
  fn is_disposed(&self) -> bool;
}

/// The handle type passed around the subscription graph.
pub type DisposableHandle = Arc<dyn Disposable + Send + Sync>;

struct TerminalDisposable;
impl Disposable for TerminalDisposable {
  fn dispose(&self) {}
  fn is_disposed(&self) -> bool { true }
}

static TERMINAL: Lazy<DisposableHandle> = Lazy::new(|| Arc::new(TerminalDisposable));

/// The process-wide terminal sentinel: a disposable whose `dispose` is a
/// no-op and which reports itself disposed unconditionally. Used as a
/// placeholder wherever a slot must be "closed" without holding a real
/// resource (e.g. `empty`, `never`, `error`).
pub fn terminal() -> DisposableHandle { TERMINAL.clone() }

/// True iff `d` is the terminal sentinel (by identity, not by
/// `is_disposed()`, since an ordinary disposed disposable must not be
/// mistaken for the sentinel).
pub fn is_terminal(d: &DisposableHandle) -> bool { Arc::ptr_eq(d, &TERMINAL) }

/// A disposable backed by a single `FnOnce`, for wrapping scheduled tasks
/// and other one-shot cancellations in the `Disposable` vocabulary.
pub struct CallbackDisposable<F: Fn() + Send + Sync> {
  disposed: AtomicBool,
  action: F,
}

impl<F: Fn() + Send + Sync> CallbackDisposable<F> {
  pub fn new(action: F) -> Arc<Self> { Arc::new(Self { disposed: AtomicBool::new(false), action }) }
}

impl<F: Fn() + Send + Sync> Disposable for CallbackDisposable<F> {
  fn dispose(&self) {
    if !self.disposed.swap(true, Ordering::AcqRel) {
      (self.action)();
    }
  }
  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}

/// A disposable that owns nothing and reports itself as never disposed
/// except once `dispose` is actually called — the plain case, for
/// operator frames that serve as their own disposable.
pub struct SimpleDisposable(AtomicBool);
impl SimpleDisposable {
  pub fn new() -> Self { Self(AtomicBool::new(false)) }
}
impl Default for SimpleDisposable {
  fn default() -> Self { Self::new() }
}
impl Disposable for SimpleDisposable {
  fn dispose(&self) { self.0.store(true, Ordering::Release); }
  fn is_disposed(&self) -> bool { self.0.load(Ordering::Acquire) }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn terminal_is_singleton_and_inert() {
    let a = terminal();
    let b = terminal();
    assert!(Arc::ptr_eq(&a, &b));
    a.dispose();
    assert!(a.is_disposed());
    assert!(b.is_disposed());
  }

  #[test]
  fn callback_disposable_runs_once() {
    use std::sync::atomic::AtomicUsize;
    let count = Arc::new(AtomicUsize::new(0));
    let c2 = count.clone();
    let d = CallbackDisposable::new(move || { c2.fetch_add(1, Ordering::SeqCst); });
    d.dispose();
    d.dispose();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(d.is_disposed());
  }
}
