//! The error vocabulary carried on `onError` and the sink protocol
//! violations are reported to.
//!
//! [RxError] is the concrete realization of the opaque "exception variant"
//! of the value carrier this crate otherwise treats as external (see the
//! crate-level docs): every operator that can fail produces one of these
//! variants rather than an arbitrary user type, which keeps `Observable<T>`
//! generic over only the success payload.

use std::fmt;
use std::sync::Arc;

/// The error type flowing through `onError`.
///
/// Cloneable because the same error may need to reach several downstream
/// branches (e.g. `amb`, `merge`) without forcing operators to wrap it in an
/// `Arc` themselves.
#[derive(Clone)]
pub enum RxError {
  /// No emission arrived within a `timeout` window.
  Timeout,
  /// `first`/`last`/`reduce`/`elementAt` on a source that completed without
  /// enough items.
  NoElements,
  /// `elementAt(i)` on a source that completed with fewer than `i + 1`
  /// items and no default was supplied.
  IndexOutOfBounds(usize),
  /// A user-supplied callback panicked, or a source handed back a foreign
  /// error. Carries the original cause so callers can downcast it.
  Custom(Arc<dyn std::error::Error + Send + Sync>),
}

impl RxError {
  /// Wrap an arbitrary error as a [RxError::Custom].
  pub fn custom<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    Self::Custom(Arc::new(e))
  }

  /// Build a [RxError::Custom] from a payload caught by
  /// `std::panic::catch_unwind` at an operator boundary (the nearest
  /// equivalent, in Rust, of "a user callback threw").
  pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
      s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "operator callback panicked".to_string()
    };
    Self::Custom(Arc::new(PanicError(msg)))
  }
}

#[derive(Debug)]
struct PanicError(String);
impl fmt::Display for PanicError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
impl std::error::Error for PanicError {}

impl fmt::Debug for RxError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{self}") }
}

impl fmt::Display for RxError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Timeout => write!(f, "Timeout"),
      Self::NoElements => write!(f, "Observable emitted no items"),
      Self::IndexOutOfBounds(i) => write!(f, "index {i} out of bounds"),
      Self::Custom(e) => write!(f, "{e}"),
    }
  }
}

impl std::error::Error for RxError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Custom(e) => Some(e.as_ref()),
      _ => None,
    }
  }
}

/// Run a user callback, converting a panic into a [RxError::Custom] rather
/// than unwinding into operator internals. This is the boundary spec.md §9
/// asks every reimplementation to make explicit.
pub fn catch<R>(f: impl FnOnce() -> R + std::panic::UnwindSafe) -> Result<R, RxError> {
  std::panic::catch_unwind(f).map_err(RxError::from_panic)
}

/// Report a protocol violation (double subscribe, double terminal, a second
/// `setOnce`). Per spec §4.C / §7 this is logged and never delivered
/// downstream.
pub fn report_protocol_violation(what: &str) {
  log::warn!("rxrs protocol violation: {what}");
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn custom_carries_source() {
    let e = RxError::custom(PanicError("boom".into()));
    assert_eq!(e.to_string(), "boom");
  }

  #[test]
  fn catch_converts_panic() {
    let r = catch(|| -> i32 { panic!("nope") });
    assert!(matches!(r, Err(RxError::Custom(_))));
  }

  #[test]
  fn display_variants() {
    assert_eq!(RxError::Timeout.to_string(), "Timeout");
    assert_eq!(RxError::IndexOutOfBounds(3).to_string(), "index 3 out of bounds");
  }
}
