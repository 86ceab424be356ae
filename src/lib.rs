//! A push-based reactive streams library: observables, operators and
//! schedulers for composing asynchronous event pipelines across threads.
//!
//! The protocol is strict and terminal: `onSubscribe` exactly once, then
//! zero or more `onNext`, then exactly one of `onError`/`onComplete`. Every
//! subscription yields a [disposable::DisposableHandle] that cancels it.
//!
//! ```
//! use rxrs::observable::source;
//!
//! let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
//! let seen2 = seen.clone();
//! source::range(1, 3).subscribe(move |v| seen2.lock().unwrap().push(v), |_| {}, || {});
//! assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
//! ```

pub mod blocking;
pub mod disposable;
pub mod drain;
pub mod error;
pub mod observable;
pub mod observer;
pub mod ops;
pub mod scheduler;

pub use error::RxError;
pub use observable::Observable;
