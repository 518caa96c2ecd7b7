use std::fmt;

use thiserror::Error;

use crate::runtime::ObjectRef;

macro_rules! mismatch_error {
    // Expected type name and a found description
    ($expected:expr, $found:expr) => {
        crate::Error::TypeMismatch {
            expected: $expected.to_string(),
            found: $found.to_string(),
        }
    };

    // Expected type name and a format string for the found description
    ($expected:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::TypeMismatch {
            expected: $expected.to_string(),
            found: format!($fmt, $($arg)*),
        }
    };
}

/// A fault raised by managed code.
///
/// Managed exceptions never cross the bridge as raw runtime objects; they are captured
/// into a `ManagedFault` which records the exception type, its message and, when the
/// runtime materialised one, the managed exception object itself. Bridge operations wrap
/// a fault in [`Error::ConstructionError`] or [`Error::InvocationError`] depending on
/// where it was raised.
///
/// # Examples
///
/// ```rust
/// use dotbridge::ManagedFault;
///
/// let fault = ManagedFault::new("System.InvalidOperationException", "bad state");
/// assert_eq!(fault.type_name(), "System.InvalidOperationException");
/// assert_eq!(fault.to_string(), "System.InvalidOperationException: bad state");
/// ```
#[derive(Clone)]
pub struct ManagedFault {
    type_name: String,
    message: String,
    exception: Option<ObjectRef>,
}

impl ManagedFault {
    /// Creates a fault without a backing exception object.
    ///
    /// ## Arguments
    /// * `type_name` - Full name of the managed exception type
    /// * `message`   - The exception message
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        ManagedFault {
            type_name: type_name.into(),
            message: message.into(),
            exception: None,
        }
    }

    /// Attaches the managed exception object that carried this fault.
    #[must_use]
    pub fn with_exception(mut self, exception: ObjectRef) -> Self {
        self.exception = Some(exception);
        self
    }

    /// Full name of the managed exception type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The exception message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The managed exception object, if the runtime created one.
    pub fn exception(&self) -> Option<&ObjectRef> {
        self.exception.as_ref()
    }
}

impl fmt::Display for ManagedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl fmt::Debug for ManagedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedFault")
            .field("type_name", &self.type_name)
            .field("message", &self.message)
            .field("has_exception", &self.exception.is_some())
            .finish()
    }
}

impl PartialEq for ManagedFault {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.message == other.message
    }
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure surfaces synchronously at the bridge operation that caused it. Nothing is
/// retried, and managed faults are never swallowed: they are wrapped into
/// [`Error::ConstructionError`] or [`Error::InvocationError`] and handed back to the host.
///
/// # Error Categories
///
/// ## Resolution Errors
/// - [`Error::TypeNotFound`] - Name is neither a loadable type nor a namespace
/// - [`Error::MemberNotFound`] - No public member matches the name, context or arity
/// - [`Error::AmbiguousMember`] - Overload resolution ended in a tie
/// - [`Error::AssemblyNotFound`] - Assembly import failed
///
/// ## Access Errors
/// - [`Error::TypeMismatch`] - A value cannot be converted losslessly to the required type
/// - [`Error::ReadOnlyMember`] - Write to a member without a setter, or an init-only field
/// - [`Error::InvalidMemberAccess`] - Member kind does not support the requested access
/// - [`Error::NotCallable`] / [`Error::NotConstructible`] - Wrong kind of host value
/// - [`Error::ObjectDisposed`] - Use of a handle after `dispose()`
///
/// ## Managed Faults
/// - [`Error::ConstructionError`] - A constructor raised a managed exception
/// - [`Error::InvocationError`] - A method or accessor raised a managed exception
///
/// ## Host Errors
/// - [`Error::HostError`] - A host function failed
/// - [`Error::LoopClosed`] - The host event loop is gone
///
/// # Examples
///
/// ```rust,no_run
/// use dotbridge::{init, BridgeConfig, Error};
///
/// let root = init(&BridgeConfig::default())?;
/// match root.namespace("System")?.get("NoSuchType") {
///     Err(Error::TypeNotFound(name)) => eprintln!("missing: {}", name),
///     Err(e) => eprintln!("other error: {}", e),
///     Ok(_) => {}
/// }
/// # Ok::<(), dotbridge::Error>(())
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The requested name is neither a loadable type nor a namespace.
    #[error("Type or namespace not found - {0}")]
    TypeNotFound(String),

    /// No public member with this name exists in the requested context.
    ///
    /// Also raised when a method exists but no overload accepts the given argument count or
    /// argument types.
    #[error("Member not found - {type_name}.{member}")]
    MemberNotFound {
        /// Full name of the type that was searched
        type_name: String,
        /// The member name
        member: String,
    },

    /// Two or more overloads scored equally for the supplied arguments.
    #[error("Ambiguous member - {type_name}.{member} matches {}", candidates.join(", "))]
    AmbiguousMember {
        /// Full name of the type that was searched
        type_name: String,
        /// The member name
        member: String,
        /// Signatures of the tied overloads
        candidates: Vec<String>,
    },

    /// A value cannot be converted to the required managed type without loss.
    #[error("Type mismatch - expected {expected}, found {found}")]
    TypeMismatch {
        /// The required type
        expected: String,
        /// Description of the supplied value
        found: String,
    },

    /// The member has no setter, or is an init-only or literal field.
    #[error("Member is read-only - {type_name}.{member}")]
    ReadOnlyMember {
        /// Full name of the declaring type
        type_name: String,
        /// The member name
        member: String,
    },

    /// The member exists but its kind does not support the requested access, such as
    /// reading an event as a value.
    #[error("Invalid access to {kind} {type_name}.{member}")]
    InvalidMemberAccess {
        /// Full name of the declaring type
        type_name: String,
        /// The member name
        member: String,
        /// Kind of the member
        kind: String,
    },

    /// A managed constructor raised an exception, or the type cannot be instantiated.
    #[error("Construction failed - {0}")]
    ConstructionError(ManagedFault),

    /// A managed method or accessor raised an exception.
    #[error("Invocation failed - {0}")]
    InvocationError(ManagedFault),

    /// The requested assembly is not known to the runtime.
    #[error("Assembly not found - {0}")]
    AssemblyNotFound(String),

    /// The value is not a function.
    #[error("Value is not callable - {0}")]
    NotCallable(String),

    /// The value is not a class and cannot be used with `new`.
    #[error("Value is not a constructor - {0}")]
    NotConstructible(String),

    /// The object handle was disposed.
    #[error("Object has been disposed - {0}")]
    ObjectDisposed(String),

    /// A host function reported a failure.
    #[error("Host error - {0}")]
    HostError(String),

    /// The host event loop this operation depends on has shut down.
    #[error("The host event loop is closed")]
    LoopClosed,

    /// Generic error for miscellaneous failures
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns the managed fault carried by this error, if any.
    pub fn fault(&self) -> Option<&ManagedFault> {
        match self {
            Error::ConstructionError(fault) | Error::InvocationError(fault) => Some(fault),
            _ => None,
        }
    }

    /// Converts this error into a managed fault, for errors that must travel back into
    /// managed code (for example a failing host delegate).
    pub fn into_fault(self) -> ManagedFault {
        match self {
            Error::ConstructionError(fault) | Error::InvocationError(fault) => fault,
            other => ManagedFault::new("System.Exception", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::MemberNotFound {
            type_name: "System.String".into(),
            member: "Nope".into(),
        };
        assert_eq!(err.to_string(), "Member not found - System.String.Nope");

        let err = mismatch_error!("System.Byte", "number {}", 300);
        assert_eq!(
            err.to_string(),
            "Type mismatch - expected System.Byte, found number 300"
        );
    }

    #[test]
    fn test_fault_roundtrip() {
        let fault = ManagedFault::new("System.FormatException", "bad");
        let err = Error::InvocationError(fault.clone());
        assert_eq!(err.fault(), Some(&fault));
        assert_eq!(err.into_fault(), fault);

        let host = Error::HostError("boom".into()).into_fault();
        assert_eq!(host.type_name(), "System.Exception");
        assert_eq!(host.message(), "Host error - boom");
    }
}
