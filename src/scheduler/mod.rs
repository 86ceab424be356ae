//! The scheduler abstraction (spec.md §4.D): how work is dispatched to
//! threads, timers, or the current thread, and how a worker's scheduled
//! tasks interact with disposal.

mod global;
mod main_thread;
mod new_thread;
mod task_system;
mod thread_pool;
mod timer_engine;

pub use global::{global, make_global};
pub use main_thread::MainThreadScheduler;
pub use new_thread::NewThreadScheduler;
pub use task_system::TaskSystemScheduler;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::disposable::{Disposable, DisposableHandle};

/// Thread priority hint for schedulers that dedicate OS threads (spec.md
/// §6 "scheduler thread priority"). Plain data: this crate has no
/// platform-specific priority API, so it is carried through to thread
/// naming/diagnostics only, the way an embeddable library would until a
/// platform layer wires it to real OS calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
  Low,
  #[default]
  Normal,
  High,
  Realtime,
}

/// A work queue bound to some execution context (a thread, a pool, a
/// timer). Created by a [Scheduler].
pub trait Worker: Disposable + Send + Sync {
  /// Schedule `action` to run at or after `delay` from now. Disposing the
  /// returned handle cancels the task if it has not yet started; spec.md
  /// §9's open question leaves whether an in-flight task can be
  /// interrupted as implementation freedom — here it cannot be, only
  /// further downstream delivery is guaranteed to stop.
  fn schedule(&self, delay: Duration, action: Box<dyn FnOnce() + Send>) -> DisposableHandle;
  /// This worker's monotonic time source.
  fn now(&self) -> Instant { Instant::now() }
}

/// A factory of [Worker]s.
pub trait Scheduler: Send + Sync {
  fn create_worker(&self) -> WorkerRef;
}

/// Shared-ownership handle to a [Worker].
pub type WorkerRef = Arc<dyn Worker + Send + Sync>;
/// Shared-ownership handle to a [Scheduler].
pub type SchedulerRef = Arc<dyn Scheduler + Send + Sync>;

#[cfg(test)]
mod test {
  use super::*;
  use std::sync::mpsc::channel;

  pub(crate) fn assert_runs_after_delay(scheduler: &dyn Scheduler) {
    let worker = scheduler.create_worker();
    let (tx, rx) = channel();
    let start = Instant::now();
    worker.schedule(Duration::from_millis(20), Box::new(move || tx.send(()).unwrap()));
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(15));
  }

  pub(crate) fn assert_dispose_before_fire_skips_callback(scheduler: &dyn Scheduler) {
    let worker = scheduler.create_worker();
    let (tx, rx) = channel();
    let d = worker.schedule(Duration::from_millis(50), Box::new(move || tx.send(()).unwrap()));
    d.dispose();
    assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
  }
}
