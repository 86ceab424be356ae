//! The observer/emitter protocol (spec.md §3/§4.C): the grammar every
//! producer/consumer interaction obeys —
//! `onSubscribe → onNext* → (onError | onComplete)`, strict and terminal.

mod callback;
mod done;
mod emitter;

pub use callback::CallbackObserver;
pub use done::Done;
pub use emitter::{Emitter, EmitterHandle, EmitterImpl};

use std::sync::Arc;

use crate::disposable::DisposableHandle;
use crate::error::RxError;

/// The downstream endpoint of a subscription.
///
/// Methods take `&self` rather than `&mut self`: operator frames are
/// shared (via `Arc`) with the scheduler tasks and inner subscriptions that
/// may invoke them concurrently, so any mutable state they carry uses
/// interior mutability (atomics, mutexes) guarded by [Done] or a per-operator
/// lock, exactly as spec.md §4.C describes.
pub trait Observer<T> {
  /// Called exactly once, before any other event, delivering the cancel
  /// token for this subscription.
  fn on_subscribe(&self, d: DisposableHandle);
  /// Called zero or more times, strictly after `on_subscribe` and strictly
  /// before termination.
  fn on_next(&self, v: T);
  /// Terminal: exactly one of `on_error`/`on_complete` is ever called,
  /// exactly once.
  fn on_error(&self, e: RxError);
  /// Terminal: see `on_error`.
  fn on_complete(&self);
}

/// The shared-ownership handle observers are passed around as. Operator
/// frames hold one of these as their "downstream".
pub type ObserverRef<T> = Arc<dyn Observer<T> + Send + Sync>;
