//! Managed runtime side of the bridge.
//!
//! This module defines the [`RuntimeHost`] contract through which the bridge reaches a managed
//! runtime, and ships [`ClrRuntime`], an in-process reference runtime implementing it over a
//! small base class library.
//!
//! # Key Components
//!
//! - [`RuntimeHost`] - The adapter contract: type resolution, namespace enumeration, member
//!   invocation, construction, thread-pool scheduling, assembly loading
//! - [`ClrRuntime`] - The reference runtime
//! - [`TypeRegistry`] / [`TypeBuilder`] / [`RuntimeType`] - The type model
//! - [`ManagedValue`] / [`ManagedObject`] / [`ManagedHeap`] - Values and objects
//! - [`StaticFieldStorage`] - Type-level state
//! - [`ManagedThreadPool`] - Background execution
//! - [`bcl`] - The base class library assemblies
//!
//! # Threading
//!
//! Every [`RuntimeHost`] operation except [`RuntimeHost::schedule`] runs synchronously on the
//! calling thread. All runtime state is `Send + Sync`; the bridge calls in from the host thread
//! and from pool threads alike.
//!
//! # Example
//!
//! ```rust,no_run
//! use dotbridge::runtime::{ClrRuntime, RuntimeHost};
//!
//! let runtime = ClrRuntime::shared()?;
//! let string = runtime.resolve_type("System.String")?;
//! assert_eq!(string.assembly_qualified_name(),
//!     "System.String, mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089");
//! assert!(runtime.is_namespace("System.IO.Ports"));
//! # Ok::<(), dotbridge::Error>(())
//! ```

mod assembly;
pub mod bcl;
mod builder;
mod clr;
mod context;
mod heap;
mod pool;
pub mod reentry;
mod registry;
mod statics;
mod types;
mod value;

pub use assembly::{AssemblyDef, AssemblyFactory, AssemblyInfo};
pub use builder::TypeBuilder;
pub use clr::ClrRuntime;
pub use context::CallContext;
pub use heap::{ManagedHeap, ManagedObject, ObjectRef};
pub use pool::ManagedThreadPool;
pub use registry::{NamespaceEntry, TypeRegistry};
pub use statics::StaticFieldStorage;
pub use types::{
    ElementType, Hierarchy, MemberBody, MemberDef, MemberFlags, MemberKind, NativeMethod,
    RuntimeType, RuntimeTypeRef, TypeFlags, TypeSig,
};
pub use value::{
    ArgsExt, DelegateRef, ManagedCallable, ManagedResult, ManagedValue, NativeDelegate,
};

use crate::{bridge::MemberDescriptor, Result};

/// A unit of work for the managed thread pool
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// The contract between the bridge and a managed runtime.
///
/// Member-level operations take a [`MemberDescriptor`] produced by the bridge's resolver;
/// descriptors identify a member by declaring type and slot, so the runtime never repeats
/// name lookup or overload resolution.
///
/// Managed exceptions surface as [`crate::Error::InvocationError`] (or
/// [`crate::Error::ConstructionError`] from [`RuntimeHost::construct`]) carrying the
/// [`crate::ManagedFault`].
pub trait RuntimeHost: Send + Sync {
    /// Resolves a public type by full or assembly-qualified name
    ///
    /// # Errors
    /// [`crate::Error::TypeNotFound`] when no public type has that name.
    fn resolve_type(&self, name: &str) -> Result<RuntimeTypeRef>;

    /// True when `path` names a namespace containing public types, directly or below
    fn is_namespace(&self, path: &str) -> bool;

    /// Lazily enumerates namespaces in order, with the public types each contains
    fn namespaces(&self) -> Box<dyn Iterator<Item = NamespaceEntry> + '_>;

    /// Last segments of the namespaces directly below `path`; `""` lists the roots
    fn child_namespaces(&self, path: &str) -> Vec<String>;

    /// Invokes a method
    ///
    /// # Errors
    /// [`crate::Error::InvocationError`] when the method raises.
    fn invoke(
        &self,
        ty: &RuntimeTypeRef,
        member: &MemberDescriptor,
        target: Option<&ObjectRef>,
        args: Vec<ManagedValue>,
    ) -> Result<ManagedValue>;

    /// Reads a static (`target == None`) or instance field
    ///
    /// # Errors
    /// Returns an error if the field cannot be read from the given target.
    fn get_field(&self, member: &MemberDescriptor, target: Option<&ObjectRef>)
        -> Result<ManagedValue>;

    /// Writes a static or instance field
    ///
    /// # Errors
    /// [`crate::Error::ReadOnlyMember`] for init-only and literal fields.
    fn set_field(
        &self,
        member: &MemberDescriptor,
        target: Option<&ObjectRef>,
        value: ManagedValue,
    ) -> Result<()>;

    /// Reads a property through its getter; `index` holds indexer arguments
    ///
    /// # Errors
    /// [`crate::Error::InvocationError`] when the getter raises.
    fn get_property(
        &self,
        member: &MemberDescriptor,
        target: Option<&ObjectRef>,
        index: Vec<ManagedValue>,
    ) -> Result<ManagedValue>;

    /// Writes a property through its setter
    ///
    /// # Errors
    /// [`crate::Error::ReadOnlyMember`] without a setter, [`crate::Error::InvocationError`]
    /// when the setter raises.
    fn set_property(
        &self,
        member: &MemberDescriptor,
        target: Option<&ObjectRef>,
        index: Vec<ManagedValue>,
        value: ManagedValue,
    ) -> Result<()>;

    /// Allocates an instance of `ty` and runs the constructor `ctor`
    ///
    /// # Errors
    /// [`crate::Error::ConstructionError`] for abstract types or when the constructor raises.
    fn construct(
        &self,
        ty: &RuntimeTypeRef,
        ctor: &MemberDescriptor,
        args: Vec<ManagedValue>,
    ) -> Result<ObjectRef>;

    /// Subscribes a delegate to an event
    ///
    /// # Errors
    /// [`crate::Error::InvocationError`] when the add accessor raises.
    fn add_event_handler(
        &self,
        member: &MemberDescriptor,
        target: Option<&ObjectRef>,
        handler: ManagedValue,
    ) -> Result<()>;

    /// Unsubscribes a delegate from an event
    ///
    /// # Errors
    /// [`crate::Error::InvocationError`] when the remove accessor raises.
    fn remove_event_handler(
        &self,
        member: &MemberDescriptor,
        target: Option<&ObjectRef>,
        handler: ManagedValue,
    ) -> Result<()>;

    /// Queues work on the managed thread pool and returns immediately
    fn schedule(&self, work: WorkItem);

    /// Loads an assembly by simple name, or by a file path whose stem is a known assembly
    ///
    /// # Errors
    /// [`crate::Error::AssemblyNotFound`] when the assembly is unknown.
    fn load_assembly(&self, name: &str) -> Result<AssemblyInfo>;

    /// Identities of all loaded assemblies
    fn assemblies(&self) -> Vec<AssemblyInfo>;

    /// All loaded types
    fn types(&self) -> Vec<RuntimeTypeRef>;

    /// Runtime type of an object
    fn type_of(&self, object: &ObjectRef) -> RuntimeTypeRef;
}
