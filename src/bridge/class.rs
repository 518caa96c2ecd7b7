use std::{
    fmt,
    sync::{Arc, Weak},
};

use dashmap::DashMap;
use tracing::debug;

use crate::{
    bridge::{
        asyncbridge::{AsyncBridge, AsyncOperation},
        marshal::{delegate_for, to_host, to_managed_as},
        resolver::marshal_args,
        MemberDescriptor, MemberSummary, ObjectHandle, Session,
    },
    error::ManagedFault,
    host::{HostFunction, HostValue},
    runtime::{MemberKind, ObjectRef, RuntimeTypeRef},
    Error, Result,
};

pub(crate) struct ClassInner {
    ty: RuntimeTypeRef,
    session: Session,
    statics: DashMap<String, Arc<MemberDescriptor>>,
}

/// A projected managed type.
///
/// A `ClassProjection` is the host-visible face of a managed type: it constructs instances,
/// reads and writes static properties and fields, calls static methods, exposes nested types
/// and static events. Projections are cached per session, so every path to a type yields
/// the same projection while any of them is alive.
///
/// # Example
///
/// ```rust,no_run
/// use dotbridge::{init, BridgeConfig, HostValue};
///
/// let root = init(&BridgeConfig::default())?;
/// let string = root.namespace("System")?.class("String")?;
/// assert_eq!(string.get("Empty")?, HostValue::from(""));
///
/// let greeting = string.call("Format", &["Hello, {0}!".into(), "world".into()])?;
/// assert_eq!(greeting, HostValue::from("Hello, world!"));
/// # Ok::<(), dotbridge::Error>(())
/// ```
#[derive(Clone)]
pub struct ClassProjection {
    inner: Arc<ClassInner>,
}

impl ClassProjection {
    pub(crate) fn new(ty: RuntimeTypeRef, session: Session) -> Self {
        debug!(ty = ty.full_name(), "class projection created");
        ClassProjection {
            inner: Arc::new(ClassInner {
                ty,
                session,
                statics: DashMap::new(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ClassInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<ClassInner>) -> Option<Self> {
        weak.upgrade().map(|inner| ClassProjection { inner })
    }

    /// The projected runtime type
    pub fn runtime_type(&self) -> &RuntimeTypeRef {
        &self.inner.ty
    }

    /// Full name, e.g. `System.Environment+SpecialFolder`
    pub fn full_name(&self) -> &str {
        self.inner.ty.full_name()
    }

    /// Simple name
    pub fn name(&self) -> &str {
        self.inner.ty.name()
    }

    /// Namespace
    pub fn namespace(&self) -> &str {
        self.inner.ty.namespace()
    }

    /// Assembly-qualified name
    pub fn assembly_qualified_name(&self) -> String {
        self.inner.ty.assembly_qualified_name()
    }

    /// The session this projection belongs to
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    fn static_member(&self, name: &str) -> Result<Arc<MemberDescriptor>> {
        if let Some(hit) = self.inner.statics.get(name) {
            return Ok(hit.clone());
        }
        let resolved = self
            .inner
            .session
            .resolver()
            .resolve_access(&self.inner.ty, name, true)?;
        Ok(self
            .inner
            .statics
            .entry(name.to_string())
            .or_insert(resolved)
            .clone())
    }

    /// Reads a static member: a property or field value, a static method as a callable
    /// function, or a nested type as a class
    ///
    /// # Errors
    /// - [`Error::MemberNotFound`] - No public static member with this name
    /// - [`Error::InvalidMemberAccess`] - The name is an event
    /// - [`Error::InvocationError`] - The getter raised
    pub fn get(&self, name: &str) -> Result<HostValue> {
        let member = self.static_member(name)?;
        read_member(&self.inner.session, &member, None, || {
            let class = self.clone();
            let method = name.to_string();
            HostFunction::new(format!("{}.{}", self.full_name(), name), move |args| {
                class.call(&method, args)
            })
        })
    }

    /// Writes a static property or field
    ///
    /// # Errors
    /// - [`Error::ReadOnlyMember`] - No setter, init-only or literal field, method or nested type
    /// - [`Error::TypeMismatch`] - The value does not fit the member type
    pub fn set(&self, name: &str, value: HostValue) -> Result<()> {
        let member = self.static_member(name)?;
        write_member(&self.inner.session, &member, None, &value)
    }

    /// Calls a static method, picking the overload by argument types
    ///
    /// # Errors
    /// Resolution errors, [`Error::TypeMismatch`] for arguments that do not convert, and
    /// [`Error::InvocationError`] when the method raises.
    pub fn call(&self, name: &str, args: &[HostValue]) -> Result<HostValue> {
        let session = &self.inner.session;
        let member = session
            .resolver()
            .resolve_call(session.host(), &self.inner.ty, name, true, args)?;
        let managed = marshal_args(session, &member, args)?;
        let result = session.host().invoke(&self.inner.ty, &member, None, managed)?;
        Ok(to_host(session, result))
    }

    /// Calls a static method on the managed thread pool.
    ///
    /// Resolution and argument conversion happen immediately; `callback` runs later on the
    /// host loop with `(error, result)`.
    ///
    /// # Errors
    /// Resolution and conversion errors, or [`Error::LoopClosed`].
    pub fn invoke_async(
        &self,
        name: &str,
        args: &[HostValue],
        callback: HostFunction,
    ) -> Result<AsyncOperation> {
        let session = &self.inner.session;
        let member = session
            .resolver()
            .resolve_call(session.host(), &self.inner.ty, name, true, args)?;
        let managed = marshal_args(session, &member, args)?;

        let host = session.host_arc();
        let ty = self.inner.ty.clone();
        AsyncBridge::new(session).start(move || host.invoke(&ty, &member, None, managed), callback)
    }

    /// Creates an instance, picking the constructor by argument types
    ///
    /// # Errors
    /// - [`Error::ConstructionError`] - Abstract or static type, or the constructor raised
    /// - [`Error::MemberNotFound`] - No public constructor takes this many arguments
    /// - [`Error::TypeMismatch`] / [`Error::AmbiguousMember`] - Overload resolution failed
    pub fn construct(&self, args: &[HostValue]) -> Result<ObjectHandle> {
        let ty = &self.inner.ty;
        if ty.is_abstract() {
            return Err(Error::ConstructionError(ManagedFault::new(
                "System.MemberAccessException",
                format!("Cannot create an abstract class '{}'.", ty.full_name()),
            )));
        }

        let session = &self.inner.session;
        let ctor = session
            .resolver()
            .resolve_constructor(session.host(), ty, args)?;
        let managed = marshal_args(session, &ctor, args)?;
        let object = session.host().construct(ty, &ctor, managed)?;
        let class = session.class_for(session.host().type_of(&object));
        Ok(ObjectHandle::new(class, object))
    }

    /// Subscribes a host function to a static event
    ///
    /// # Errors
    /// [`Error::InvalidMemberAccess`] when the name is not an event.
    pub fn subscribe(&self, event: &str, handler: &HostFunction) -> Result<()> {
        let member = self.static_member(event)?;
        subscribe(&self.inner.session, &member, None, handler, true)
    }

    /// Removes a handler added with [`ClassProjection::subscribe`]
    ///
    /// # Errors
    /// [`Error::InvalidMemberAccess`] when the name is not an event.
    pub fn unsubscribe(&self, event: &str, handler: &HostFunction) -> Result<()> {
        let member = self.static_member(event)?;
        subscribe(&self.inner.session, &member, None, handler, false)
    }

    /// Summaries of the public static members
    pub fn members(&self) -> Vec<MemberSummary> {
        self.inner.session.members(self, false)
    }
}

impl PartialEq for ClassProjection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.session == other.inner.session
                && self.inner.ty.full_name() == other.inner.ty.full_name())
    }
}

impl fmt::Debug for ClassProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassProjection")
            .field("full_name", &self.full_name())
            .field("cached_statics", &self.inner.statics.len())
            .finish()
    }
}

fn invalid_access(member: &MemberDescriptor, kind: &str) -> Error {
    Error::InvalidMemberAccess {
        type_name: member.declaring_type().full_name().to_string(),
        member: member.name().to_string(),
        kind: kind.to_string(),
    }
}

fn read_only(member: &MemberDescriptor) -> Error {
    Error::ReadOnlyMember {
        type_name: member.declaring_type().full_name().to_string(),
        member: member.name().to_string(),
    }
}

/// Reads a resolved member as a host value; `method` builds the bound function for method
/// groups
pub(super) fn read_member<F>(
    session: &Session,
    member: &MemberDescriptor,
    target: Option<&ObjectRef>,
    method: F,
) -> Result<HostValue>
where
    F: FnOnce() -> HostFunction,
{
    match member.kind() {
        MemberKind::Property if member.is_indexed() => Err(invalid_access(member, "indexer")),
        MemberKind::Property if !member.can_read() => {
            Err(invalid_access(member, "write-only property"))
        }
        MemberKind::Property => {
            let value = session.host().get_property(member, target, Vec::new())?;
            Ok(to_host(session, value))
        }
        MemberKind::Field => {
            let value = session.host().get_field(member, target)?;
            Ok(to_host(session, value))
        }
        MemberKind::Method => Ok(HostValue::Function(method())),
        MemberKind::NestedType => {
            let name = member
                .nested_type()
                .ok_or_else(|| invalid_access(member, "nestedType"))?;
            Ok(HostValue::Class(session.class_named(name)?))
        }
        kind @ (MemberKind::Event | MemberKind::Constructor) => {
            Err(invalid_access(member, kind.as_ref()))
        }
    }
}

/// Writes a resolved property or field
pub(super) fn write_member(
    session: &Session,
    member: &MemberDescriptor,
    target: Option<&ObjectRef>,
    value: &HostValue,
) -> Result<()> {
    match member.kind() {
        MemberKind::Property if member.is_indexed() => Err(invalid_access(member, "indexer")),
        MemberKind::Property | MemberKind::Field if !member.can_write() => Err(read_only(member)),
        MemberKind::Property => {
            let value = to_managed_as(session, value, member.ty())?;
            session
                .host()
                .set_property(member, target, Vec::new(), value)
        }
        MemberKind::Field => {
            let value = to_managed_as(session, value, member.ty())?;
            session.host().set_field(member, target, value)
        }
        MemberKind::Event => Err(invalid_access(member, "event")),
        MemberKind::Method | MemberKind::NestedType | MemberKind::Constructor => {
            Err(read_only(member))
        }
    }
}

/// Adds or removes an event handler
pub(super) fn subscribe(
    session: &Session,
    member: &MemberDescriptor,
    target: Option<&ObjectRef>,
    handler: &HostFunction,
    add: bool,
) -> Result<()> {
    if member.kind() != MemberKind::Event {
        return Err(invalid_access(member, member.kind().as_ref()));
    }
    let delegate = delegate_for(session, handler, member.ty().type_name());
    if add {
        debug!(event = member.name(), handler = handler.name(), "event handler added");
        session.host().add_event_handler(member, target, delegate)
    } else {
        debug!(event = member.name(), handler = handler.name(), "event handler removed");
        session.host().remove_event_handler(member, target, delegate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RuntimeConfig, runtime::ClrRuntime, BridgeConfig};

    fn system() -> crate::bridge::NamespaceNode {
        let runtime = ClrRuntime::new(RuntimeConfig::for_testing()).unwrap();
        Session::new(runtime, BridgeConfig::default())
            .root()
            .namespace("System")
            .unwrap()
    }

    #[test]
    fn test_static_members() {
        let system = system();
        let string = system.class("String").unwrap();
        assert_eq!(string.get("Empty"), Ok(HostValue::from("")));
        assert!(matches!(
            string.set("Empty", "x".into()),
            Err(Error::ReadOnlyMember { .. })
        ));

        let format = string.get("Format").unwrap();
        let format = format.as_function().unwrap();
        assert_eq!(
            format.call(&["{0}-{1}".into(), 1.into(), true.into()]),
            Ok(HostValue::from("1-True"))
        );
    }

    #[test]
    fn test_nested_type() {
        let system = system();
        let environment = system.class("Environment").unwrap();
        let folder = environment.get("SpecialFolder").unwrap();
        let folder = folder.as_class().unwrap();
        assert_eq!(folder.full_name(), "System.Environment+SpecialFolder");
        assert!(matches!(
            environment.set("SpecialFolder", HostValue::Null),
            Err(Error::ReadOnlyMember { .. })
        ));
    }

    #[test]
    fn test_abstract_types_refuse_construction() {
        let system = system();
        let stream = system.namespace("IO").unwrap().class("Stream").unwrap();
        let error = stream.construct(&[]).unwrap_err();
        let fault = error.fault().unwrap();
        assert_eq!(fault.type_name(), "System.MemberAccessException");
        assert_eq!(fault.message(), "Cannot create an abstract class 'System.IO.Stream'.");
    }

    #[test]
    fn test_construct_and_projection_identity() {
        let system = system();
        let date = system.class("DateTime").unwrap();
        let epoch = date
            .construct(&[1970.into(), 1.into(), 1.into()])
            .unwrap();
        assert_eq!(epoch.get("Year"), Ok(HostValue::Number(1970.0)));
        assert_eq!(epoch.class(), &date);
    }
}
