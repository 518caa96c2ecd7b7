//! The bridge between the managed runtime and the host.
//!
//! Everything host code touches is a projection created here: namespaces become
//! [`NamespaceNode`]s, types become [`ClassProjection`]s, managed instances become
//! [`ObjectHandle`]s and delegates become host functions. Projections are created lazily and
//! cached per [`Session`].
//!
//! # Architecture
//!
//! ```text
//! host code
//!     │ get / set / call / construct
//!     ▼
//! NamespaceNode ─► ClassProjection ─► ObjectHandle
//!     │                  │                 │
//!     └──────────────────┴────────┬────────┘
//!                                 ▼
//!                  MemberResolver + marshal (overload pick, conversion)
//!                                 │
//!                                 ▼
//!                      RuntimeHost (managed runtime)
//!                                 │ thread pool
//!                                 ▼
//!                    AsyncBridge ─► host EventLoop ─► callback
//! ```
//!
//! # Key Components
//!
//! - [`Session`] - Owns the runtime handle, configuration and caches; carries the reflection
//!   surface (`import`, `assemblies`, `types`, `members`)
//! - [`NamespaceNode`] - Lazily materialised namespace tree
//! - [`ClassProjection`] - Static members, construction, nested types, static events
//! - [`ObjectHandle`] - Instance members, indexers, instance events, disposal
//! - [`MemberDescriptor`] - A resolved member, cached for the session's lifetime
//! - [`marshal`] - Host ↔ managed value conversion and overload scoring
//! - [`AsyncBridge`] / [`HostDelegate`] - Thread-pool completions and managed-to-host calls
//!
//! # Thread Safety
//!
//! All projections are `Send + Sync`, and so are the caches behind them. Host callbacks still
//! run only on the host thread; see [`AsyncBridge`].

mod asyncbridge;
mod class;
mod descriptor;
mod handle;
pub mod marshal;
mod namespace;
mod resolver;
mod session;

pub use asyncbridge::{AsyncBridge, AsyncOperation, AsyncState, HostDelegate, PendingCallback};
pub use class::ClassProjection;
pub use descriptor::{MemberAccess, MemberDescriptor};
pub use handle::ObjectHandle;
pub use namespace::NamespaceNode;
pub use session::{MemberSummary, Session};

pub(crate) use session::WeakSession;
