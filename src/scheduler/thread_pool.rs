//! A thread pool that spawns threads as workload increases and lets them
//! exit as work dries up, backing
//! [crate::scheduler::TaskSystemScheduler] and
//! [crate::scheduler::NewThreadScheduler].
//!
//! Adapted from `examples/lbfalvy-orchid/src/utils/thread_pool.rs`: the
//! teacher's version dispatches a single statically-typed `Task`; this one
//! dispatches boxed closures since a scheduler's jobs have no common
//! result type to report back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::spawn;

type Job = Box<dyn FnOnce() + Send>;

enum Message {
  Stop,
  Job(Job),
}

struct PoolData {
  rdv_point: Mutex<Option<SyncSender<Message>>>,
  stopping: AtomicBool,
}

/// A thread pool for dispatching jobs in parallel. If multiple threads
/// finish their jobs, one waiting thread is kept and the rest exit; if all
/// threads are busy, a new one is spawned. Dropping the pool terminates
/// the last waiting thread.
pub struct ThreadPool {
  data: Arc<PoolData>,
}

impl ThreadPool {
  pub fn new() -> Self {
    Self { data: Arc::new(PoolData { rdv_point: Mutex::new(None), stopping: AtomicBool::new(false) }) }
  }

  pub fn submit(&self, job: Job) {
    let mut standby = self.data.rdv_point.lock().unwrap();
    if let Some(port) = standby.take() {
      let _ = port.try_send(Message::Job(job));
    } else {
      drop(standby);
      let data = self.data.clone();
      spawn(move || {
        let mut current = job;
        loop {
          current();
          let mut standby_spot = data.rdv_point.lock().unwrap();
          if standby_spot.is_some() {
            return;
          }
          let (sender, receiver) = sync_channel(1);
          *standby_spot = Some(sender);
          drop(standby_spot);
          if data.stopping.load(Ordering::SeqCst) {
            return;
          }
          match receiver.recv() {
            Ok(Message::Job(job)) => current = job,
            _ => return,
          }
        }
      });
    }
  }
}

impl Default for ThreadPool {
  fn default() -> Self { Self::new() }
}

impl Drop for ThreadPool {
  fn drop(&mut self) {
    self.data.stopping.store(true, Ordering::SeqCst);
    if let Some(pending) = self.data.rdv_point.lock().unwrap().take() {
      let _ = pending.try_send(Message::Stop);
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::sync::mpsc::channel;
  use std::time::Duration;

  #[test]
  fn runs_submitted_jobs() {
    let pool = ThreadPool::new();
    let (tx, rx) = channel();
    for i in 0..4 {
      let tx = tx.clone();
      pool.submit(Box::new(move || tx.send(i).unwrap()));
    }
    let mut got: Vec<i32> = (0..4).map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap()).collect();
    got.sort();
    assert_eq!(got, vec![0, 1, 2, 3]);
  }
}
