use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use super::{MainThreadScheduler, Scheduler, SchedulerRef};

/// The process-wide registerable scheduler slot (spec.md §5 "no global
/// mutable state other than ... the process-wide main-thread timer
/// scheduler registered via a global setter"). Operators that need a
/// scheduler but weren't given one explicitly (`delay`, `debounce`,
/// `timeout`, `sample`) fall back to this.
static GLOBAL: Lazy<Mutex<SchedulerRef>> = Lazy::new(|| Mutex::new(MainThreadScheduler::create()));

/// Replace the global scheduler.
pub fn make_global(scheduler: SchedulerRef) { *GLOBAL.lock().unwrap() = scheduler; }

/// The current global scheduler — a [MainThreadScheduler] until
/// [make_global] is called.
pub fn global() -> SchedulerRef { GLOBAL.lock().unwrap().clone() }

#[cfg(test)]
mod test {
  use super::*;
  use crate::scheduler::NewThreadScheduler;

  #[test]
  fn make_global_replaces_default() {
    let before = global();
    let replacement = NewThreadScheduler::create(Default::default()) as SchedulerRef;
    make_global(replacement.clone());
    let after = global();
    assert!(Arc::ptr_eq(&after, &replacement));
    assert!(!Arc::ptr_eq(&before, &after));
    // restore so other tests in this binary still see a main-thread scheduler
    make_global(MainThreadScheduler::create());
  }
}
