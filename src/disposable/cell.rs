use std::sync::Mutex;

use super::{terminal, DisposableHandle};
use crate::error::report_protocol_violation;

/// The three states a single-assignment slot can occupy (spec.md §3
/// `DisposableCell`).
#[derive(Clone)]
pub enum CellState {
  Empty,
  Live(DisposableHandle),
  Terminal,
}

/// A single-assignment slot holding at most one live disposable.
///
/// This is the primitive the rest of the crate builds on: every operator
/// frame's "upstream" reference and every `SequentialDisposable` is one of
/// these underneath.
pub struct DisposableCell(Mutex<CellState>);

impl DisposableCell {
  pub fn new() -> Self { Self(Mutex::new(CellState::Empty)) }

  pub fn state(&self) -> CellState { self.0.lock().unwrap().clone() }

  pub fn is_disposed(&self) -> bool { matches!(*self.0.lock().unwrap(), CellState::Terminal) }

  /// Accept `d` only if the slot is still `Empty`. A second call disposes
  /// `d` and reports a protocol violation (spec.md §3/§4.C): this is how
  /// `onSubscribe` called twice is detected.
  pub fn set_once(&self, d: DisposableHandle) -> bool {
    let mut guard = self.0.lock().unwrap();
    match &*guard {
      CellState::Empty => {
        *guard = CellState::Live(d);
        true
      },
      CellState::Terminal => {
        drop(guard);
        d.dispose();
        false
      },
      CellState::Live(_) => {
        drop(guard);
        d.dispose();
        report_protocol_violation("onSubscribe called twice / setOnce called twice");
        false
      },
    }
  }

  /// Swap in `d`, disposing whatever previously occupied the slot. If the
  /// slot was already `Terminal`, `d` is disposed immediately instead
  /// (there is no "previous occupant" left to replace).
  pub fn set(&self, d: DisposableHandle) {
    let previous = {
      let mut guard = self.0.lock().unwrap();
      match &*guard {
        CellState::Terminal => None,
        _ => {
          let old = std::mem::replace(&mut *guard, CellState::Live(d.clone()));
          match old {
            CellState::Live(old) => Some(old),
            _ => None,
          }
        },
      }
    };
    match previous {
      Some(old) => old.dispose(),
      None if self.is_disposed() => d.dispose(),
      None => (),
    }
  }

  /// Swap in `d` without disposing the previous occupant — used when some
  /// other owner is still responsible for disposing it.
  pub fn replace(&self, d: DisposableHandle) {
    let mut guard = self.0.lock().unwrap();
    if let CellState::Terminal = &*guard {
      drop(guard);
      d.dispose();
    } else {
      *guard = CellState::Live(d);
    }
  }

  /// Transition to `Terminal`, disposing whatever was previously held.
  /// Idempotent: a second call is a no-op.
  pub fn dispose(&self) {
    let previous = {
      let mut guard = self.0.lock().unwrap();
      std::mem::replace(&mut *guard, CellState::Terminal)
    };
    if let CellState::Live(d) = previous {
      d.dispose();
    }
  }
}

impl Default for DisposableCell {
  fn default() -> Self { Self::new() }
}

impl super::Disposable for DisposableCell {
  fn dispose(&self) { DisposableCell::dispose(self) }
  fn is_disposed(&self) -> bool { DisposableCell::is_disposed(self) }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::disposable::{CallbackDisposable, Disposable};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  fn counting() -> (Arc<AtomicUsize>, DisposableHandle) {
    let count = Arc::new(AtomicUsize::new(0));
    let c2 = count.clone();
    (count, CallbackDisposable::new(move || { c2.fetch_add(1, Ordering::SeqCst); }))
  }

  #[test]
  fn set_once_accepts_first_rejects_second() {
    let cell = DisposableCell::new();
    let (n1, d1) = counting();
    let (n2, d2) = counting();
    assert!(cell.set_once(d1));
    assert!(!cell.set_once(d2));
    assert_eq!(n1.load(Ordering::SeqCst), 0);
    assert_eq!(n2.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn set_disposes_previous() {
    let cell = DisposableCell::new();
    let (n1, d1) = counting();
    let (_n2, d2) = counting();
    cell.set(d1);
    cell.set(d2);
    assert_eq!(n1.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn replace_does_not_dispose_previous() {
    let cell = DisposableCell::new();
    let (n1, d1) = counting();
    let (_n2, d2) = counting();
    cell.replace(d1);
    cell.replace(d2);
    assert_eq!(n1.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn dispose_is_idempotent_and_terminal() {
    let cell = DisposableCell::new();
    let (n1, d1) = counting();
    cell.set(d1);
    cell.dispose();
    cell.dispose();
    assert_eq!(n1.load(Ordering::SeqCst), 1);
    assert!(cell.is_disposed());
    let (n2, d2) = counting();
    cell.set(d2);
    assert_eq!(n2.load(Ordering::SeqCst), 1, "late set disposes its argument instead of storing it");
  }

  #[test]
  fn terminal_sentinel_accepted_by_set_once_is_disposed() {
    let cell = DisposableCell::new();
    cell.dispose();
    let (n, d) = counting();
    assert!(!cell.set_once(d));
    assert_eq!(n.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn default_state_is_not_disposed() {
    let cell = DisposableCell::new();
    assert!(!cell.is_disposed());
    assert!(matches!(cell.state(), CellState::Empty));
    let _ = terminal();
  }
}
