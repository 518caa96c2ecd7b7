// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # dotbridge
//!
//! A cross-runtime bridge that projects a managed, .NET-style runtime into a dynamically typed,
//! single-threaded host language. Managed namespaces, types, objects and delegates show up on
//! the host side as ordinary namespace, class, object and function values.
//!
//! ## Features
//!
//! - **Lazy namespace tree** - Namespaces and types materialise on first access and are
//!   memoised per session
//! - **Member projection** - Static and instance properties, fields, methods, indexers, nested
//!   types and events
//! - **Overload resolution** - Argument-shape scoring with widening, coercion and `params`
//!   expansion, cached per call shape
//! - **Two-way marshalling** - Host values convert to managed values and back; host functions
//!   become managed delegates and vice versa
//! - **Async bridging** - Work on the managed thread pool completes into the host event loop,
//!   never on a pool thread
//! - **Reference runtime** - [`runtime::ClrRuntime`] implements the runtime contract over a
//!   small base class library, so everything runs in-process
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotbridge::prelude::*;
//!
//! let root = dotbridge::init(&BridgeConfig::default())?;
//! let system = root.namespace("System")?;
//!
//! // Static members
//! let string = system.class("String")?;
//! assert_eq!(string.get("Empty")?, HostValue::from(""));
//! let hello = string.call("Format", &["Hello, {0}!".into(), "world".into()])?;
//! assert_eq!(hello, HostValue::from("Hello, world!"));
//!
//! // Instances
//! let date = system.class("DateTime")?.construct(&[1970.into(), 1.into(), 1.into()])?;
//! assert_eq!(date.get("Year")?, HostValue::Number(1970.0));
//! assert!(dotbridge::is_bridged_object(&HostValue::Object(date)));
//! # Ok::<(), dotbridge::Error>(())
//! ```
//!
//! ## Asynchronous Calls
//!
//! ```rust,no_run
//! use dotbridge::prelude::*;
//!
//! let root = dotbridge::init(&BridgeConfig::default())?;
//! let console = root.namespace("System")?.class("Console")?;
//!
//! let done = HostFunction::new("done", |args| {
//!     assert!(args[0].is_nullish());
//!     Ok(HostValue::Undefined)
//! });
//! console.invoke_async("WriteLine", &["from the pool".into()], done)?;
//!
//! // The callback runs here, on the host thread
//! EventLoop::current().run()?;
//! # Ok::<(), dotbridge::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`runtime`] - The [`runtime::RuntimeHost`] contract and the reference runtime
//! - [`host`] - Host values, functions, the per-thread event loop and global scope
//! - [`bridge`] - Projections, marshalling, overload resolution and async bridging
//! - [`config`] - Bridge and runtime configuration
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. Faults raised by managed code arrive as
//! [`Error::InvocationError`] or [`Error::ConstructionError`] carrying a [`ManagedFault`].
//!
//! ## Logging
//!
//! The crate logs through [`tracing`] and installs no subscriber.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

pub mod bridge;
pub mod config;
pub mod host;
pub mod prelude;
pub mod runtime;

use std::sync::Arc;

use tracing::info;

/// `dotbridge` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

pub use bridge::{ClassProjection, NamespaceNode, ObjectHandle, Session};
pub use config::{AsyncFaultPolicy, BridgeConfig, ConsoleMode, RuntimeConfig};
pub use error::{Error, ManagedFault};
pub use host::{EventLoop, HostFunction, HostValue};

/// Starts a bridge session over the process-wide reference runtime.
///
/// Every call creates a fresh session with its own caches; the runtime and its loaded
/// assemblies are shared. With [`BridgeConfig::global`] set, the root's top-level
/// namespaces are also published into the calling thread's global scope.
///
/// # Errors
/// Returns an error if the shared runtime fails to start.
///
/// # Example
///
/// ```rust,no_run
/// use dotbridge::{host::global, init, BridgeConfig};
///
/// let root = init(&BridgeConfig::global())?;
/// let system = root.namespace("System")?;
/// assert_eq!(global("System").and_then(|v| v.as_namespace().cloned()), Some(system));
/// # Ok::<(), dotbridge::Error>(())
/// ```
pub fn init(config: &BridgeConfig) -> Result<NamespaceNode> {
    init_with(runtime::ClrRuntime::shared()?, config)
}

/// Starts a bridge session over the given runtime
///
/// # Errors
/// Never fails for [`runtime::ClrRuntime`]; fallible to match [`init`].
pub fn init_with(
    runtime: Arc<dyn runtime::RuntimeHost>,
    config: &BridgeConfig,
) -> Result<NamespaceNode> {
    let session = Session::new(runtime, config.clone());
    let root = session.root();
    if config.global {
        session.merge_globals();
    }
    info!(session = session.id(), global = config.global, "bridge initialised");
    Ok(root)
}

/// True when `value` is an object produced by the bridge
pub fn is_bridged_object(value: &HostValue) -> bool {
    matches!(value, HostValue::Object(_))
}
