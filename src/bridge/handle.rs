use std::{
    fmt,
    sync::{Arc, RwLock},
};

use tracing::debug;

use crate::{
    bridge::{
        asyncbridge::{AsyncBridge, AsyncOperation},
        class::{read_member, subscribe, write_member},
        marshal::{to_host, to_managed_as},
        resolver::marshal_args,
        ClassProjection, MemberDescriptor, MemberSummary,
    },
    host::{HostFunction, HostValue},
    runtime::ObjectRef,
    Error, Result,
};

const INDEXER: &str = "Item";

struct HandleInner {
    object: RwLock<Option<ObjectRef>>,
    class: ClassProjection,
    id: u64,
}

/// A bridged managed object.
///
/// The handle keeps the managed object alive until the last clone of the handle is dropped,
/// or until [`ObjectHandle::dispose`] releases it early. Handles compare equal when they
/// reference the same managed object, even if they were produced separately.
///
/// Member lookups use the object's runtime type in instance context.
///
/// # Example
///
/// ```rust,no_run
/// use dotbridge::{init, BridgeConfig, HostValue};
///
/// let root = init(&BridgeConfig::default())?;
/// let exception = root.namespace("System")?.class("Exception")?.construct(&[])?;
/// exception.set("Source", "my source".into())?;
/// assert_eq!(exception.get("Source")?, HostValue::from("my source"));
/// # Ok::<(), dotbridge::Error>(())
/// ```
#[derive(Clone)]
pub struct ObjectHandle {
    inner: Arc<HandleInner>,
}

impl ObjectHandle {
    pub(crate) fn new(class: ClassProjection, object: ObjectRef) -> Self {
        ObjectHandle {
            inner: Arc::new(HandleInner {
                id: object.id(),
                object: RwLock::new(Some(object)),
                class,
            }),
        }
    }

    /// The referenced managed object
    ///
    /// # Errors
    /// [`Error::ObjectDisposed`] after [`ObjectHandle::dispose`].
    pub fn object(&self) -> Result<ObjectRef> {
        read_lock!(self.inner.object)
            .clone()
            .ok_or_else(|| Error::ObjectDisposed(self.type_name().to_string()))
    }

    /// Projection of the object's runtime type
    pub fn class(&self) -> &ClassProjection {
        &self.inner.class
    }

    /// Full name of the object's runtime type
    pub fn type_name(&self) -> &str {
        self.inner.class.full_name()
    }

    /// Identity of the managed object
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// True once the handle was disposed
    pub fn is_disposed(&self) -> bool {
        read_lock!(self.inner.object).is_none()
    }

    fn member(&self, name: &str) -> Result<Arc<MemberDescriptor>> {
        let class = &self.inner.class;
        class
            .session()
            .resolver()
            .resolve_access(class.runtime_type(), name, false)
    }

    /// Reads an instance property or field, or returns an instance method bound to this object
    ///
    /// # Errors
    /// - [`Error::MemberNotFound`] - No public instance member with this name
    /// - [`Error::InvalidMemberAccess`] - Events and indexers
    /// - [`Error::ObjectDisposed`] - The handle was disposed
    /// - [`Error::InvocationError`] - The getter raised
    pub fn get(&self, name: &str) -> Result<HostValue> {
        let object = self.object()?;
        let member = self.member(name)?;
        read_member(self.inner.class.session(), &member, Some(&object), || {
            let handle = self.clone();
            let method = name.to_string();
            HostFunction::new(format!("{}.{}", self.type_name(), name), move |args| {
                handle.call(&method, args)
            })
        })
    }

    /// Writes an instance property or field
    ///
    /// # Errors
    /// - [`Error::ReadOnlyMember`] - No setter, or an init-only field
    /// - [`Error::TypeMismatch`] - The value does not fit the member type
    /// - [`Error::ObjectDisposed`] - The handle was disposed
    pub fn set(&self, name: &str, value: HostValue) -> Result<()> {
        let object = self.object()?;
        let member = self.member(name)?;
        write_member(self.inner.class.session(), &member, Some(&object), &value)
    }

    /// Calls an instance method, picking the overload by argument types
    ///
    /// # Errors
    /// Resolution and conversion errors, [`Error::ObjectDisposed`], and
    /// [`Error::InvocationError`] when the method raises.
    pub fn call(&self, name: &str, args: &[HostValue]) -> Result<HostValue> {
        let object = self.object()?;
        let session = self.inner.class.session();
        let ty = self.inner.class.runtime_type();
        let member = session
            .resolver()
            .resolve_call(session.host(), ty, name, false, args)?;
        let managed = marshal_args(session, &member, args)?;
        let result = session.host().invoke(ty, &member, Some(&object), managed)?;
        Ok(to_host(session, result))
    }

    /// Calls an instance method on the managed thread pool; `callback` runs later on the host
    /// loop with `(error, result)`
    ///
    /// # Errors
    /// Resolution and conversion errors, [`Error::ObjectDisposed`], [`Error::LoopClosed`].
    pub fn invoke_async(
        &self,
        name: &str,
        args: &[HostValue],
        callback: HostFunction,
    ) -> Result<AsyncOperation> {
        let object = self.object()?;
        let session = self.inner.class.session();
        let ty = self.inner.class.runtime_type().clone();
        let member = session
            .resolver()
            .resolve_call(session.host(), &ty, name, false, args)?;
        let managed = marshal_args(session, &member, args)?;

        let host = session.host_arc();
        AsyncBridge::new(session).start(
            move || host.invoke(&ty, &member, Some(&object), managed),
            callback,
        )
    }

    fn indexer(&self, index: &[HostValue]) -> Result<Arc<MemberDescriptor>> {
        let session = self.inner.class.session();
        session.resolver().resolve_indexer(
            session.host(),
            self.inner.class.runtime_type(),
            INDEXER,
            index,
        )
    }

    /// Reads through the type's indexer
    ///
    /// # Errors
    /// [`Error::MemberNotFound`] when the type has no indexer taking these arguments, and the
    /// getter's faults.
    pub fn index_get(&self, index: &[HostValue]) -> Result<HostValue> {
        let object = self.object()?;
        let member = self.indexer(index)?;
        if !member.can_read() {
            return Err(Error::InvalidMemberAccess {
                type_name: self.type_name().to_string(),
                member: INDEXER.to_string(),
                kind: "write-only indexer".to_string(),
            });
        }
        let session = self.inner.class.session();
        let managed = marshal_args(session, &member, index)?;
        let value = session.host().get_property(&member, Some(&object), managed)?;
        Ok(to_host(session, value))
    }

    /// Writes through the type's indexer
    ///
    /// # Errors
    /// [`Error::ReadOnlyMember`] without a setter, conversion errors, and the setter's faults.
    pub fn index_set(&self, index: &[HostValue], value: HostValue) -> Result<()> {
        let object = self.object()?;
        let member = self.indexer(index)?;
        if !member.can_write() {
            return Err(Error::ReadOnlyMember {
                type_name: self.type_name().to_string(),
                member: INDEXER.to_string(),
            });
        }
        let session = self.inner.class.session();
        let managed = marshal_args(session, &member, index)?;
        let value = to_managed_as(session, &value, member.ty())?;
        session
            .host()
            .set_property(&member, Some(&object), managed, value)
    }

    /// Subscribes a host function to an instance event
    ///
    /// # Errors
    /// [`Error::InvalidMemberAccess`] when the name is not an event.
    pub fn subscribe(&self, event: &str, handler: &HostFunction) -> Result<()> {
        let object = self.object()?;
        let member = self.member(event)?;
        subscribe(self.inner.class.session(), &member, Some(&object), handler, true)
    }

    /// Removes a handler added with [`ObjectHandle::subscribe`]
    ///
    /// # Errors
    /// [`Error::InvalidMemberAccess`] when the name is not an event.
    pub fn unsubscribe(&self, event: &str, handler: &HostFunction) -> Result<()> {
        let object = self.object()?;
        let member = self.member(event)?;
        subscribe(self.inner.class.session(), &member, Some(&object), handler, false)
    }

    /// Summaries of the public instance members
    pub fn members(&self) -> Vec<MemberSummary> {
        self.inner.class.session().members(&self.inner.class, true)
    }

    /// Releases the managed object.
    ///
    /// Calls the object's public parameterless `Dispose()` when its type has one. Later
    /// access through any clone of this handle fails with [`Error::ObjectDisposed`]; disposing
    /// twice is a no-op.
    ///
    /// # Errors
    /// [`Error::InvocationError`] when `Dispose()` raises; the reference is released anyway.
    pub fn dispose(&self) -> Result<()> {
        let Some(object) = write_lock!(self.inner.object).take() else {
            return Ok(());
        };

        let session = self.inner.class.session();
        let ty = self.inner.class.runtime_type();
        debug!(ty = ty.full_name(), id = self.inner.id, "disposing object handle");
        match session
            .resolver()
            .resolve_call(session.host(), ty, "Dispose", false, &[])
        {
            Ok(member) => session
                .host()
                .invoke(ty, &member, Some(&object), Vec::new())
                .map(|_| ()),
            Err(Error::MemberNotFound { .. }) => Ok(()),
            Err(other) => Err(other),
        }
    }
}

/// Handles are equal when they reference the same managed object: same heap id in the same
/// runtime. Sessions over one runtime share object identity.
impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
            && self
                .inner
                .class
                .session()
                .shares_host(other.inner.class.session())
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("type", &self.type_name())
            .field("id", &self.inner.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bridge::Session, config::RuntimeConfig, runtime::ClrRuntime, BridgeConfig};

    fn session() -> (std::sync::Arc<ClrRuntime>, Session) {
        let runtime = ClrRuntime::new(RuntimeConfig::for_testing()).unwrap();
        let session = Session::new(runtime.clone(), BridgeConfig::default());
        (runtime, session)
    }

    #[test]
    fn test_instance_members() {
        let (_, session) = session();
        let builder = session
            .class_named("System.Text.StringBuilder")
            .unwrap()
            .construct(&[])
            .unwrap();
        builder.call("Append", &["abc".into()]).unwrap();
        let append = builder.get("Append").unwrap();
        append.as_function().unwrap().call(&["def".into()]).unwrap();
        assert_eq!(builder.get("Length"), Ok(HostValue::Number(6.0)));
        assert_eq!(builder.call("ToString", &[]), Ok(HostValue::from("abcdef")));
    }

    #[test]
    fn test_identity_is_per_runtime() {
        let builder = |session: &Session, text: &str| {
            let handle = session
                .class_named("System.Text.StringBuilder")
                .unwrap()
                .construct(&[])
                .unwrap();
            handle.call("Append", &[text.into()]).unwrap();
            handle
        };
        let (runtime, first) = session();
        let (_, second) = session();
        let x = builder(&first, "x");
        let y = builder(&second, "y");
        assert_eq!(x.id(), y.id());
        assert_ne!(x, y);

        let same_runtime = Session::new(runtime, BridgeConfig::default());
        let again = ObjectHandle::new(
            same_runtime.class_named("System.Text.StringBuilder").unwrap(),
            x.object().unwrap(),
        );
        assert_eq!(again, x);
        assert_eq!(again.call("ToString", &[]), Ok(HostValue::from("x")));
    }

    #[test]
    fn test_indexer() {
        let (_, session) = session();
        let list = session
            .class_named("System.Collections.ArrayList")
            .unwrap()
            .construct(&[])
            .unwrap();
        list.call("Add", &["a".into()]).unwrap();
        list.call("Add", &[2.into()]).unwrap();
        assert_eq!(list.index_get(&[1.into()]), Ok(HostValue::Number(2.0)));
        list.index_set(&[0.into()], "b".into()).unwrap();
        assert_eq!(list.index_get(&[0.into()]), Ok(HostValue::from("b")));
        assert!(matches!(list.get("Item"), Err(Error::InvalidMemberAccess { .. })));
    }

    #[test]
    fn test_dispose_releases_object() {
        let (runtime, session) = session();
        let stream = session
            .class_named("System.IO.MemoryStream")
            .unwrap()
            .construct(&[])
            .unwrap();
        let copy = stream.clone();
        let live = runtime.heap().live_objects();

        stream.dispose().unwrap();
        assert!(copy.is_disposed());
        assert!(matches!(copy.get("Length"), Err(Error::ObjectDisposed(_))));
        assert!(stream.dispose().is_ok());
        assert!(runtime.heap().live_objects() < live);
    }
}
