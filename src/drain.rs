//! The single reusable "work-in-progress" drain loop spec.md §9 asks
//! every multi-threaded producer/single-threaded consumer boundary to
//! share: `observe_on`, `flat_map`'s downstream gate, `concat_map`'s
//! queue, and `repeat`/`retry`'s re-subscription all serialize through one
//! of these instead of holding a lock around the callback body.
//!
//! Grounded on the missed-counter drain in
//! `examples/original_source/rx/include/rx/operators/observable_observe_on.h`.

use std::sync::atomic::{AtomicI64, Ordering};

/// An atomic counter that turns a queue fed from multiple threads into a
/// single-reader drain loop.
#[derive(Default)]
pub struct WipLoop(AtomicI64);

impl WipLoop {
  pub fn new() -> Self { Self(AtomicI64::new(0)) }

  /// Record that there is work to do. Returns `true` if the caller is the
  /// one that must run (or schedule) [Self::drain] — i.e. the loop was
  /// previously idle; any other caller can trust that an in-progress or
  /// about-to-start drain will pick up its contribution.
  #[must_use]
  pub fn schedule(&self) -> bool { self.0.fetch_add(1, Ordering::AcqRel) == 0 }

  /// Run `step` to exhaustion (it returns `true` while it did useful work,
  /// `false` once the queue looks empty), then atomically check whether
  /// more work was scheduled while draining; if so, loop again instead of
  /// letting a racing producer believe nobody is driving the queue.
  pub fn drain(&self, mut step: impl FnMut() -> bool) {
    let mut missed: i64 = 1;
    loop {
      while step() {}
      missed = self.0.fetch_sub(missed, Ordering::AcqRel) - missed;
      if missed == 0 {
        break;
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::sync::Mutex;

  #[test]
  fn single_producer_drains_everything() {
    let wip = WipLoop::new();
    let queue: Mutex<Vec<i32>> = Mutex::new(vec![1, 2, 3]);
    let out: Mutex<Vec<i32>> = Mutex::new(Vec::new());
    if wip.schedule() {
      wip.drain(|| match queue.lock().unwrap().pop() {
        Some(v) => {
          out.lock().unwrap().push(v);
          true
        },
        None => false,
      });
    }
    assert_eq!(*out.lock().unwrap(), vec![3, 2, 1]);
  }

  #[test]
  fn concurrent_schedule_during_drain_is_not_lost() {
    let wip = WipLoop::new();
    let queue: Mutex<Vec<i32>> = Mutex::new(vec![1]);
    let out: Mutex<Vec<i32>> = Mutex::new(Vec::new());
    let mut first_pass = true;
    if wip.schedule() {
      wip.drain(|| match queue.lock().unwrap().pop() {
        Some(v) => {
          out.lock().unwrap().push(v);
          // simulate a second producer racing in mid-drain
          if first_pass {
            first_pass = false;
            queue.lock().unwrap().push(2);
            wip.schedule();
          }
          true
        },
        None => false,
      });
    }
    assert_eq!(*out.lock().unwrap(), vec![1, 2]);
  }
}
