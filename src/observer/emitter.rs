use std::sync::Arc;

use super::ObserverRef;
use crate::disposable::{Disposable, DisposableHandle, SequentialDisposable};
use crate::error::RxError;

/// The producer-side view used by [crate::observable::source::create]. Same
/// event vocabulary as [super::Observer], except it also owns a replaceable
/// disposable slot (the resource the producing closure may want disposed
/// alongside the subscription) and it ignores events after termination
/// rather than signalling a protocol violation — a well-behaved `create`
/// closure commonly keeps emitting into a cancelled emitter and that must
/// not be treated as a bug (spec.md §3 `Emitter`).
pub trait Emitter<T> {
  fn on_next(&self, v: T);
  fn on_error(&self, e: RxError);
  fn on_complete(&self);
  /// Attach (or replace) the disposable representing whatever resource the
  /// producing closure is holding.
  fn set_disposable(&self, d: DisposableHandle);
  fn is_disposed(&self) -> bool;
}

pub type EmitterHandle<T> = Arc<dyn Emitter<T> + Send + Sync>;

/// The emitter `create` hands to its producing closure. It is itself the
/// [Disposable] passed to `downstream.on_subscribe` (spec.md §4.F "create:
/// ... calls downstream.onSubscribe(emitter)") — disposing it both stops
/// further delivery and releases whatever resource the closure attached via
/// `set_disposable`.
pub struct EmitterImpl<T> {
  downstream: ObserverRef<T>,
  done: super::Done,
  resource: SequentialDisposable,
}

impl<T: Send + 'static> EmitterImpl<T> {
  pub fn new(downstream: ObserverRef<T>) -> Arc<Self> {
    Arc::new(Self { downstream, done: super::Done::new(), resource: SequentialDisposable::new() })
  }
}

impl<T: Send + 'static> Emitter<T> for EmitterImpl<T> {
  fn on_next(&self, v: T) {
    if self.is_disposed() { return; }
    self.downstream.on_next(v);
  }

  fn on_error(&self, e: RxError) {
    if !self.done.mark() { return; }
    self.resource.dispose();
    self.downstream.on_error(e);
  }

  fn on_complete(&self) {
    if !self.done.mark() { return; }
    self.resource.dispose();
    self.downstream.on_complete();
  }

  fn set_disposable(&self, d: DisposableHandle) { self.resource.replace(d); }

  fn is_disposed(&self) -> bool { self.done.is_done() }
}

impl<T: Send + 'static> Disposable for EmitterImpl<T> {
  fn dispose(&self) {
    if self.done.mark() {
      self.resource.dispose();
    }
  }
  fn is_disposed(&self) -> bool { self.done.is_done() }
}
