use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{spawn, JoinHandle};
use std::time::{Duration, Instant};

/// A priority-queue-driven loop that runs posted callbacks at or after
/// their scheduled time, on a single owned thread (spec.md §4.D
/// "SingleThreadTimer scheduler"). [crate::scheduler::MainThreadScheduler]
/// uses one instance directly; [crate::scheduler::TaskSystemScheduler]
/// uses one to post the real job onto its pool once the deadline fires.
///
/// Adapted from the teacher's `Rc`-based, single-thread-only
/// `examples/lbfalvy-orchid/src/utils/poller.rs` to an `Arc`-based engine
/// that can accept submissions from any thread.
pub struct TimerEngine {
  sender: SyncSender<Msg>,
  _handle: JoinHandle<()>,
}

enum Msg {
  Schedule(TimerEntry),
  Stop,
}

struct TimerEntry {
  expires: Instant,
  seq: u64,
  cancelled: Arc<AtomicBool>,
  action: Box<dyn FnOnce() + Send>,
}

impl PartialEq for TimerEntry {
  fn eq(&self, other: &Self) -> bool { self.expires == other.expires && self.seq == other.seq }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}
impl Ord for TimerEntry {
  // Reversed so a std max-heap `BinaryHeap` behaves as a min-heap by
  // expiry, with `seq` breaking ties FIFO (spec.md §4.D "timer workers
  // are FIFO for equal deadlines", load-bearing for `delay`'s ordering).
  fn cmp(&self, other: &Self) -> Ordering {
    other.expires.cmp(&self.expires).then_with(|| other.seq.cmp(&self.seq))
  }
}

impl TimerEngine {
  pub fn new() -> Self {
    let (sender, receiver) = sync_channel::<Msg>(1024);
    let handle = spawn(move || {
      let mut heap: BinaryHeap<TimerEntry> = BinaryHeap::new();
      loop {
        let recv_result = match heap.peek() {
          Some(next) => {
            let wait = next.expires.saturating_duration_since(Instant::now());
            receiver.recv_timeout(wait)
          },
          None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match recv_result {
          Ok(Msg::Schedule(entry)) => heap.push(entry),
          Ok(Msg::Stop) => return,
          Err(RecvTimeoutError::Disconnected) => return,
          Err(RecvTimeoutError::Timeout) => {
            if let Some(entry) = heap.peek() {
              if entry.expires <= Instant::now() {
                let entry = heap.pop().expect("just peeked");
                if !entry.cancelled.load(AtomicOrdering::Acquire) {
                  (entry.action)();
                }
              }
            }
          },
        }
      }
    });
    Self { sender, _handle: handle }
  }

  /// Post `action` to run at or after `delay`. Returns the flag that, when
  /// set, makes the engine skip the callback if it has not already
  /// started running.
  pub fn schedule(&self, delay: Duration, action: Box<dyn FnOnce() + Send>) -> Arc<AtomicBool> {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let cancelled = Arc::new(AtomicBool::new(false));
    let entry = TimerEntry {
      expires: Instant::now() + delay,
      seq: SEQ.fetch_add(1, AtomicOrdering::Relaxed),
      cancelled: cancelled.clone(),
      action,
    };
    // The engine thread outlives every sender; a send failure only happens
    // if the engine already shut down, in which case the task simply never
    // runs — consistent with "no further delivery after dispose".
    let _ = self.sender.send(Msg::Schedule(entry));
    cancelled
  }
}

impl Drop for TimerEngine {
  fn drop(&mut self) { let _ = self.sender.send(Msg::Stop); }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::sync::mpsc::channel;

  #[test]
  fn fires_in_expiry_order() {
    let engine = TimerEngine::new();
    let (tx, rx) = channel();
    let tx2 = tx.clone();
    engine.schedule(Duration::from_millis(40), Box::new(move || tx.send("late").unwrap()));
    engine.schedule(Duration::from_millis(5), Box::new(move || tx2.send("early").unwrap()));
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "early");
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "late");
  }

  #[test]
  fn cancelled_before_fire_never_runs() {
    let engine = TimerEngine::new();
    let (tx, rx) = channel();
    let cancelled = engine.schedule(Duration::from_millis(30), Box::new(move || tx.send(()).unwrap()));
    cancelled.store(true, AtomicOrdering::Release);
    assert!(rx.recv_timeout(Duration::from_millis(120)).is_err());
  }
}
