//! The observable base and source factories (spec.md §4.E/§4.F):
//! `subscribe` is a non-virtual dispatcher over a per-operator
//! `subscribe_actual`; operators are built by wrapping one `Observable` in
//! another.

pub mod source;

use std::sync::Arc;

use crate::disposable::DisposableHandle;
use crate::error::RxError;
use crate::observer::{CallbackObserver, Observer, ObserverRef};

/// A factory that, on each subscription, builds a private subscription
/// graph (spec.md §3 `Observable`). Stateless between subscriptions by
/// default — `subscribe_actual` is a plain `Arc<dyn Fn>`, so cloning an
/// `Observable` is cheap and subscribing twice re-runs the same recipe
/// independently, exactly as a fresh `subscribeActual` call would in the
/// original protocol.
pub struct Observable<T> {
  subscribe_actual: Arc<dyn Fn(ObserverRef<T>) + Send + Sync>,
}

impl<T> Clone for Observable<T> {
  fn clone(&self) -> Self { Self { subscribe_actual: self.subscribe_actual.clone() } }
}

impl<T: Send + 'static> Observable<T> {
  /// Build an observable from its `subscribeActual` implementation
  /// directly. Every operator in this crate is defined in terms of this.
  pub fn new(subscribe_actual: impl Fn(ObserverRef<T>) + Send + Sync + 'static) -> Self {
    Self { subscribe_actual: Arc::new(subscribe_actual) }
  }

  /// `subscribe(observer)` (spec.md §4.E): a non-virtual dispatcher that
  /// simply calls the per-operator `subscribeActual`.
  pub fn subscribe_with(&self, observer: ObserverRef<T>) { (self.subscribe_actual)(observer) }

  /// The convenience `subscribe(onNext, onError, onComplete)` overload: it
  /// builds a [CallbackObserver] (a frame with no upstream of its own) that
  /// owns its callbacks until termination and returns it as the
  /// subscription's [DisposableHandle].
  pub fn subscribe(
    &self,
    on_next: impl FnMut(T) + Send + 'static,
    on_error: impl FnOnce(RxError) + Send + 'static,
    on_complete: impl FnOnce() + Send + 'static,
  ) -> DisposableHandle {
    let observer = CallbackObserver::new(on_next, on_error, on_complete);
    self.subscribe_with(observer.clone());
    observer
  }

  /// Subscribe with only an `onNext` callback; errors are logged as
  /// protocol-sink warnings rather than silently dropped, completion is a
  /// no-op.
  pub fn subscribe_next(&self, on_next: impl FnMut(T) + Send + 'static) -> DisposableHandle {
    self.subscribe(on_next, |e| log::warn!("unhandled onError: {e}"), || {})
  }
}

/// Helper shared by operator implementations for building the
/// `Arc<dyn Observer<T> + Send + Sync>` downstream handle from a concrete
/// frame type.
pub(crate) fn observer_ref<T, O: Observer<T> + Send + Sync + 'static>(o: Arc<O>) -> ObserverRef<T> { o }
