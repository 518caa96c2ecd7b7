//! Execution context handed to native member bodies.

use std::any::Any;

use crate::{
    error::ManagedFault,
    runtime::{ClrRuntime, ManagedResult, ManagedValue, MemberDef, ObjectRef, RuntimeType},
};

/// Context of one native member invocation.
///
/// Gives a member body access to the runtime (allocation, exceptions, statics, the thread
/// pool), to the target object for instance members, and to its own definition.
pub struct CallContext<'a> {
    runtime: &'a ClrRuntime,
    declaring: &'a RuntimeType,
    member: &'a MemberDef,
    this: Option<&'a ObjectRef>,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(
        runtime: &'a ClrRuntime,
        declaring: &'a RuntimeType,
        member: &'a MemberDef,
        this: Option<&'a ObjectRef>,
    ) -> Self {
        CallContext {
            runtime,
            declaring,
            member,
            this,
        }
    }

    /// The runtime executing the member
    pub fn runtime(&self) -> &'a ClrRuntime {
        self.runtime
    }

    /// The type declaring the executing member
    pub fn declaring_type(&self) -> &'a RuntimeType {
        self.declaring
    }

    /// The executing member
    pub fn member(&self) -> &'a MemberDef {
        self.member
    }

    /// The target object of an instance member
    ///
    /// # Errors
    /// `System.NullReferenceException` when invoked without a target.
    pub fn this(&self) -> ManagedResult<&'a ObjectRef> {
        self.this.ok_or_else(|| {
            self.throw(
                "System.NullReferenceException",
                "Object reference not set to an instance of an object.",
            )
        })
    }

    /// Native state of the target object
    ///
    /// # Errors
    /// `System.NullReferenceException` without a target, `System.InvalidCastException` when
    /// the target carries no state of type `T`.
    pub fn native<T: Any + Send + Sync>(&self) -> ManagedResult<&'a T> {
        let this = self.this()?;
        this.native::<T>().ok_or_else(|| {
            self.throw(
                "System.InvalidCastException",
                format!(
                    "Object of type '{}' is not a {}.",
                    this.ty().full_name(),
                    self.declaring.full_name()
                ),
            )
        })
    }

    /// Reads a field of the target object
    ///
    /// # Errors
    /// `System.NullReferenceException` without a target, `System.MissingFieldException` when
    /// the field does not exist.
    pub fn field(&self, name: &str) -> ManagedResult<ManagedValue> {
        let this = self.this()?;
        this.field(name).ok_or_else(|| {
            self.throw(
                "System.MissingFieldException",
                format!("Field not found: '{}.{}'.", this.ty().full_name(), name),
            )
        })
    }

    /// Writes a field of the target object
    ///
    /// # Errors
    /// `System.NullReferenceException` without a target, `System.MissingFieldException` when
    /// the field does not exist.
    pub fn set_field(&self, name: &str, value: ManagedValue) -> ManagedResult<()> {
        let this = self.this()?;
        if this.set_field(name, value) {
            Ok(())
        } else {
            Err(self.throw(
                "System.MissingFieldException",
                format!("Field not found: '{}.{}'.", this.ty().full_name(), name),
            ))
        }
    }

    /// Creates a fault backed by a managed exception object
    ///
    /// ## Arguments
    /// * `type_name` - Full name of the exception type
    /// * `message`   - The exception message
    pub fn throw(&self, type_name: &str, message: impl Into<String>) -> ManagedFault {
        self.runtime.raise(type_name, message)
    }
}
