//! Operators (spec.md §4.G-§4.K): each submodule adds methods directly to
//! [crate::observable::Observable] so a chain reads `source.map(f).take(3)`
//! the way the original protocol's fluent operators do.

pub mod combine;
pub mod flatten;
pub mod lifecycle;
pub mod time;
pub mod transform;

use std::sync::Arc;

use crate::disposable::{Disposable, DisposableHandle};
use crate::observable::Observable;
use crate::observer::{Observer, ObserverRef};

/// Build the `Arc<dyn Observer<T> + Send + Sync>` downstream handle from a
/// concrete per-subscription frame. Used by operators (`flat_map`,
/// `concat_map`, `switch_map`, …) that manage their own `on_subscribe`
/// forwarding instead of going through [lift].
pub(crate) fn frame_ref<T, O: Observer<T> + Send + Sync + 'static>(o: Arc<O>) -> ObserverRef<T> { o }

/// Build an `Observable<U>` whose `subscribeActual` subscribes `source`
/// with a fresh per-subscription frame built from the downstream observer.
/// Most operators in `ops::*` reduce to one frame struct plus a call to
/// this — the Rust stand-in for the teacher's one-`subscribeActual`-per-
/// operator shape.
///
/// Per spec.md §4.C, a frame "exposes itself as the disposable given to
/// downstream" — `build` must hand back a type that is both the
/// [Observer] subscribed upstream and the [Disposable] downstream
/// receives via `onSubscribe`, so `lift` forwards `onSubscribe` exactly
/// once before subscribing `source`, instead of every frame re-deriving
/// that wiring by hand.
pub(crate) fn lift<T: Send + 'static, U: Send + 'static, O: Observer<T> + Disposable + Send + Sync + 'static>(
  source: Observable<T>,
  build: impl Fn(ObserverRef<U>) -> Arc<O> + Send + Sync + 'static,
) -> Observable<U> {
  Observable::new(move |downstream: ObserverRef<U>| {
    let frame = build(downstream.clone());
    let handle: DisposableHandle = frame.clone();
    downstream.on_subscribe(handle);
    source.subscribe_with(frame);
  })
}
