use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread::{spawn, Builder};
use std::time::Duration;

use super::timer_engine::TimerEngine;
use super::{Priority, Scheduler, Worker, WorkerRef};
use crate::disposable::{CallbackDisposable, Disposable, DisposableHandle};

/// A pool of size one per scheduler instance, dedicated to a single
/// subscription's work — the Rust stand-in for "spawn a fresh thread"
/// (spec.md §4.D "NewThread scheduler"). Every [Worker] created from the
/// same instance shares that one dedicated thread; creating a second
/// instance spawns a second thread.
pub struct NewThreadScheduler {
  job_tx: Sender<Box<dyn FnOnce() + Send>>,
  engine: Arc<TimerEngine>,
}

impl NewThreadScheduler {
  pub fn create(priority: Priority) -> Arc<Self> {
    let (job_tx, job_rx) = channel::<Box<dyn FnOnce() + Send>>();
    let name = match priority {
      Priority::Low => "rxrs-new-thread-low",
      Priority::Normal => "rxrs-new-thread",
      Priority::High => "rxrs-new-thread-high",
      Priority::Realtime => "rxrs-new-thread-rt",
    };
    let spawn_result = Builder::new().name(name.into()).spawn(move || {
      while let Ok(job) = job_rx.recv() {
        job();
      }
    });
    // Thread creation failure here would only happen under OS resource
    // exhaustion; fall back to an unnamed thread rather than panicking.
    if spawn_result.is_err() {
      let (job_tx2, job_rx2) = channel::<Box<dyn FnOnce() + Send>>();
      spawn(move || {
        while let Ok(job) = job_rx2.recv() {
          job();
        }
      });
      return Arc::new(Self { job_tx: job_tx2, engine: Arc::new(TimerEngine::new()) });
    }
    Arc::new(Self { job_tx, engine: Arc::new(TimerEngine::new()) })
  }
}

impl Scheduler for NewThreadScheduler {
  fn create_worker(&self) -> WorkerRef {
    Arc::new(NewThreadWorker {
      job_tx: self.job_tx.clone(),
      engine: self.engine.clone(),
      disposed: Arc::new(AtomicBool::new(false)),
    })
  }
}

struct NewThreadWorker {
  job_tx: Sender<Box<dyn FnOnce() + Send>>,
  engine: Arc<TimerEngine>,
  disposed: Arc<AtomicBool>,
}

impl Worker for NewThreadWorker {
  fn schedule(&self, delay: Duration, action: Box<dyn FnOnce() + Send>) -> DisposableHandle {
    let worker_disposed = self.disposed.clone();
    if delay.is_zero() {
      let _ = self.job_tx.send(Box::new(move || {
        if !worker_disposed.load(Ordering::Acquire) {
          action();
        }
      }));
      return CallbackDisposable::new(|| {});
    }
    let job_tx = self.job_tx.clone();
    let cancelled = self.engine.schedule(
      delay,
      Box::new(move || {
        if worker_disposed.load(Ordering::Acquire) {
          return;
        }
        let worker_disposed = worker_disposed.clone();
        let _ = job_tx.send(Box::new(move || {
          if !worker_disposed.load(Ordering::Acquire) {
            action();
          }
        }));
      }),
    );
    CallbackDisposable::new(move || cancelled.store(true, Ordering::Release))
  }
}

impl Disposable for NewThreadWorker {
  fn dispose(&self) { self.disposed.store(true, Ordering::Release); }
  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::scheduler::test::{assert_dispose_before_fire_skips_callback, assert_runs_after_delay};

  #[test]
  fn runs_after_delay() { assert_runs_after_delay(NewThreadScheduler::create(Priority::Normal).as_ref()); }

  #[test]
  fn dispose_before_fire_skips_callback() {
    assert_dispose_before_fire_skips_callback(NewThreadScheduler::create(Priority::Normal).as_ref());
  }
}
