use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::timer_engine::TimerEngine;
use super::{Scheduler, Worker, WorkerRef};
use crate::disposable::{CallbackDisposable, Disposable, DisposableHandle};

/// Models "main-thread" semantics: every [Worker] this scheduler creates
/// posts onto the same single owned thread, run in expiry order. Typically
/// installed once as the process-global scheduler via
/// [crate::scheduler::make_global] (spec.md §4.D).
pub struct MainThreadScheduler {
  engine: Arc<TimerEngine>,
}

impl MainThreadScheduler {
  pub fn create() -> Arc<Self> { Arc::new(Self { engine: Arc::new(TimerEngine::new()) }) }
}

impl Scheduler for MainThreadScheduler {
  fn create_worker(&self) -> WorkerRef {
    Arc::new(MainThreadWorker { engine: self.engine.clone(), disposed: Arc::new(AtomicBool::new(false)) })
  }
}

struct MainThreadWorker {
  engine: Arc<TimerEngine>,
  disposed: Arc<AtomicBool>,
}

impl Worker for MainThreadWorker {
  fn schedule(&self, delay: Duration, action: Box<dyn FnOnce() + Send>) -> DisposableHandle {
    let worker_disposed = self.disposed.clone();
    let cancelled = self.engine.schedule(
      delay,
      Box::new(move || {
        if !worker_disposed.load(Ordering::Acquire) {
          action();
        }
      }),
    );
    CallbackDisposable::new(move || cancelled.store(true, Ordering::Release))
  }
}

impl Disposable for MainThreadWorker {
  fn dispose(&self) { self.disposed.store(true, Ordering::Release); }
  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::scheduler::test::{assert_dispose_before_fire_skips_callback, assert_runs_after_delay};

  #[test]
  fn runs_after_delay() { assert_runs_after_delay(MainThreadScheduler::create().as_ref()); }

  #[test]
  fn dispose_before_fire_skips_callback() {
    assert_dispose_before_fire_skips_callback(MainThreadScheduler::create().as_ref());
  }

  #[test]
  fn disposing_worker_cancels_its_pending_tasks() {
    use std::sync::mpsc::channel;
    use std::time::Duration as D;
    let sched = MainThreadScheduler::create();
    let worker = sched.create_worker();
    let (tx, rx) = channel();
    worker.schedule(D::from_millis(40), Box::new(move || tx.send(()).unwrap()));
    worker.dispose();
    assert!(rx.recv_timeout(D::from_millis(150)).is_err());
  }
}
