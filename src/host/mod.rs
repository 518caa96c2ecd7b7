//! Host language side of the bridge.
//!
//! The host is a dynamically typed, single-threaded language. This module models the parts
//! of it the bridge touches:
//!
//! - [`HostValue`] - A dynamically typed host value: primitives, functions, and the bridge's
//!   namespace, class and object projections
//! - [`HostFunction`] - A callable host value
//! - [`EventLoop`] / [`HostDispatcher`] - The host thread's event loop, and the thread-safe
//!   handle other threads use to run work on it
//! - [`global`] / [`set_global`] - The per-thread global scope
//!
//! # Threading
//!
//! Host functions and callbacks run only on the thread that owns the [`EventLoop`]. Managed
//! worker threads reach the host exclusively through a [`HostDispatcher`].

mod event_loop;
mod function;
mod globals;
mod value;

pub use event_loop::{EventLoop, HostDispatcher, HostJob, OutstandingGuard, TimerId};
pub use function::HostFunction;
pub use globals::{clear_globals, global, global_names, remove_global, set_global};
pub use value::HostValue;
