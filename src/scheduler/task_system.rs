use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::thread_pool::ThreadPool;
use super::timer_engine::TimerEngine;
use super::{Scheduler, Worker, WorkerRef};
use crate::disposable::{CallbackDisposable, Disposable, DisposableHandle};

/// Submits jobs to a worker pool; delays are achieved by posting to a
/// timer engine that, when the deadline fires, submits the actual job to
/// the pool (spec.md §4.D "ThreadPool/TaskSystem scheduler").
pub struct TaskSystemScheduler {
  pool: Arc<ThreadPool>,
  engine: Arc<TimerEngine>,
}

impl TaskSystemScheduler {
  /// Create a scheduler backed by a fresh, privately-owned pool.
  pub fn create() -> Arc<Self> { Self::with_pool(Arc::new(ThreadPool::new())) }

  /// Create a scheduler that dispatches onto an existing, possibly shared,
  /// pool.
  pub fn with_pool(pool: Arc<ThreadPool>) -> Arc<Self> { Arc::new(Self { pool, engine: Arc::new(TimerEngine::new()) }) }
}

impl Scheduler for TaskSystemScheduler {
  fn create_worker(&self) -> WorkerRef {
    Arc::new(TaskSystemWorker {
      pool: self.pool.clone(),
      engine: self.engine.clone(),
      disposed: Arc::new(AtomicBool::new(false)),
    })
  }
}

struct TaskSystemWorker {
  pool: Arc<ThreadPool>,
  engine: Arc<TimerEngine>,
  disposed: Arc<AtomicBool>,
}

impl Worker for TaskSystemWorker {
  fn schedule(&self, delay: Duration, action: Box<dyn FnOnce() + Send>) -> DisposableHandle {
    let worker_disposed = self.disposed.clone();
    if delay.is_zero() {
      let pool = self.pool.clone();
      pool.submit(Box::new(move || {
        if !worker_disposed.load(Ordering::Acquire) {
          action();
        }
      }));
      return CallbackDisposable::new(|| {});
    }
    let pool = self.pool.clone();
    let cancelled = self.engine.schedule(
      delay,
      Box::new(move || {
        if worker_disposed.load(Ordering::Acquire) {
          return;
        }
        let worker_disposed = worker_disposed.clone();
        pool.submit(Box::new(move || {
          if !worker_disposed.load(Ordering::Acquire) {
            action();
          }
        }));
      }),
    );
    CallbackDisposable::new(move || cancelled.store(true, Ordering::Release))
  }
}

impl Disposable for TaskSystemWorker {
  fn dispose(&self) { self.disposed.store(true, Ordering::Release); }
  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::scheduler::test::{assert_dispose_before_fire_skips_callback, assert_runs_after_delay};

  #[test]
  fn runs_after_delay() { assert_runs_after_delay(TaskSystemScheduler::create().as_ref()); }

  #[test]
  fn dispose_before_fire_skips_callback() {
    assert_dispose_before_fire_skips_callback(TaskSystemScheduler::create().as_ref());
  }

  #[test]
  fn zero_delay_runs_on_pool() {
    use std::sync::mpsc::channel;
    use std::time::Duration as D;
    let sched = TaskSystemScheduler::create();
    let worker = sched.create_worker();
    let (tx, rx) = channel();
    worker.schedule(D::ZERO, Box::new(move || tx.send(42).unwrap()));
    assert_eq!(rx.recv_timeout(D::from_secs(1)).unwrap(), 42);
  }
}
