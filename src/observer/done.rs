use std::sync::atomic::{AtomicBool, Ordering};

/// The atomically-set "first terminal event wins" flag every operator
/// frame carries (spec.md §4.C). `mark()` answers "am I the one delivering
/// the terminal event", so exactly one caller proceeds to forward it and
/// release references.
#[derive(Default)]
pub struct Done(AtomicBool);

impl Done {
  pub fn new() -> Self { Self(AtomicBool::new(false)) }

  /// True once a terminal event (or disposal) has been recorded.
  pub fn is_done(&self) -> bool { self.0.load(Ordering::Acquire) }

  /// Attempt to claim the terminal transition. Returns `true` exactly once,
  /// for the first caller; all later callers get `false`.
  pub fn mark(&self) -> bool { !self.0.swap(true, Ordering::AcqRel) }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn only_first_mark_wins() {
    let done = Done::new();
    assert!(!done.is_done());
    assert!(done.mark());
    assert!(done.is_done());
    assert!(!done.mark());
  }
}
