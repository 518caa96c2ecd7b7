//! # dotbridge Prelude
//!
//! The types most bridge users need, in one import.
//!
//! ```rust,no_run
//! use dotbridge::prelude::*;
//!
//! let root = dotbridge::init(&BridgeConfig::default())?;
//! let ports = root.namespace("System.IO.Ports")?;
//! # Ok::<(), dotbridge::Error>(())
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotbridge operations
pub use crate::Error;

/// The result type used throughout dotbridge
pub use crate::Result;

/// A fault raised by managed code
pub use crate::ManagedFault;

// ================================================================================================
// Configuration
// ================================================================================================

pub use crate::config::{AsyncFaultPolicy, BridgeConfig, ConsoleMode, RuntimeConfig};

// ================================================================================================
// Projections
// ================================================================================================

pub use crate::bridge::{
    AsyncOperation, AsyncState, ClassProjection, MemberAccess, MemberSummary, NamespaceNode,
    ObjectHandle, Session,
};

// ================================================================================================
// Host Side
// ================================================================================================

pub use crate::host::{EventLoop, HostFunction, HostValue};

// ================================================================================================
// Runtime Side
// ================================================================================================

pub use crate::runtime::{ClrRuntime, ManagedValue, RuntimeHost};
