use super::{Disposable, DisposableCell, DisposableHandle};

/// A named wrapper around a [DisposableCell] — the only construct
/// operators should use to track "the current upstream/inner disposable".
/// Using this instead of a raw `DisposableCell` makes the intent at each
/// call site legible: this slot tracks *one thing at a time*, and
/// swapping it in under a race is safe.
#[derive(Default)]
pub struct SequentialDisposable(DisposableCell);

impl SequentialDisposable {
  pub fn new() -> Self { Self(DisposableCell::new()) }

  /// Accept `d` as the first (and only) occupant this cell will ever
  /// silently accept; a second call is a protocol violation.
  pub fn set_once(&self, d: DisposableHandle) -> bool { self.0.set_once(d) }

  /// Replace the current occupant, disposing it.
  pub fn set(&self, d: DisposableHandle) { self.0.set(d) }

  /// Replace the current occupant without disposing it — for
  /// `switchMap`/`debounce`-style "this slot now tracks the next inner"
  /// handoffs where the caller disposes the old inner itself.
  pub fn replace(&self, d: DisposableHandle) { self.0.replace(d) }

  pub fn is_disposed(&self) -> bool { self.0.is_disposed() }
}

impl Disposable for SequentialDisposable {
  fn dispose(&self) { self.0.dispose() }
  fn is_disposed(&self) -> bool { self.0.is_disposed() }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::disposable::CallbackDisposable;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[test]
  fn disposing_the_sequential_disposes_current_occupant() {
    let seq = SequentialDisposable::new();
    let count = Arc::new(AtomicUsize::new(0));
    let c2 = count.clone();
    seq.set(CallbackDisposable::new(move || { c2.fetch_add(1, Ordering::SeqCst); }));
    seq.dispose();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(seq.is_disposed());
  }
}
