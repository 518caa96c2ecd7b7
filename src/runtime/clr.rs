//! The reference managed runtime.
//!
//! [`ClrRuntime`] hosts the type registry, heap, static storage and thread pool, and executes
//! native member bodies. Assemblies come from a catalog of factories; the base class library
//! registers `mscorlib`, `System` and `System.Data`, and embedders can add their own with
//! [`ClrRuntime::add_to_catalog`] or load a definition directly with [`ClrRuntime::load`].
//!
//! # Assembly Loading
//!
//! | Request | Result |
//! |---------|--------|
//! | `"System.Data"` | catalog lookup, case-insensitive |
//! | `"/opt/lib/System.Data.dll"` | catalog lookup by file stem |
//! | already loaded | the existing identity, no event |
//! | unknown | [`Error::AssemblyNotFound`] |
//!
//! Every successful load raises `System.AppDomain.AssemblyLoad` on the loading thread.

use std::{
    path::Path,
    sync::{Arc, Mutex, OnceLock},
};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::{
    bridge::MemberDescriptor,
    config::RuntimeConfig,
    error::ManagedFault,
    runtime::{
        bcl::{self, AppDomainState, ConsoleState},
        AssemblyDef, AssemblyFactory, AssemblyInfo, CallContext, ManagedHeap, ManagedResult,
        ManagedThreadPool, ManagedValue, MemberBody, MemberDef, MemberKind, NamespaceEntry,
        ObjectRef, RuntimeHost, RuntimeType, RuntimeTypeRef, StaticFieldStorage, TypeRegistry,
        WorkItem,
    },
    Error, Result,
};

static SHARED: OnceLock<Arc<ClrRuntime>> = OnceLock::new();

/// The reference managed runtime
pub struct ClrRuntime {
    config: RuntimeConfig,
    registry: TypeRegistry,
    catalog: DashMap<String, AssemblyFactory>,
    loaded: DashMap<String, AssemblyInfo>,
    load_lock: Mutex<()>,
    statics: StaticFieldStorage,
    heap: ManagedHeap,
    pool: ManagedThreadPool,
    console: ConsoleState,
    domain: OnceLock<ObjectRef>,
}

impl ClrRuntime {
    /// Creates an isolated runtime and loads the configured assemblies
    ///
    /// ## Arguments
    /// * `config` - Runtime settings
    ///
    /// # Errors
    /// Returns an error if the thread pool cannot start or a preload assembly is unknown.
    pub fn new(config: RuntimeConfig) -> Result<Arc<Self>> {
        let pool = ManagedThreadPool::new(config.worker_threads, &config.thread_name_prefix)?;
        let runtime = Arc::new(ClrRuntime {
            console: ConsoleState::new(config.console),
            config,
            registry: TypeRegistry::new(),
            catalog: DashMap::new(),
            loaded: DashMap::new(),
            load_lock: Mutex::new(()),
            statics: StaticFieldStorage::new(),
            heap: ManagedHeap::new(),
            pool,
            domain: OnceLock::new(),
        });

        for (name, factory) in bcl::catalog() {
            runtime.add_to_catalog(name, factory);
        }
        for name in runtime.config.preload.clone() {
            runtime.load_assembly(&name)?;
        }

        info!(
            types = runtime.registry.len(),
            workers = runtime.pool.threads(),
            "managed runtime started"
        );
        Ok(runtime)
    }

    /// The process-wide runtime with default settings, created on first use
    ///
    /// # Errors
    /// Returns an error if the runtime cannot be started.
    pub fn shared() -> Result<Arc<Self>> {
        if let Some(runtime) = SHARED.get() {
            return Ok(runtime.clone());
        }
        let runtime = ClrRuntime::new(RuntimeConfig::default())?;
        Ok(SHARED.get_or_init(|| runtime).clone())
    }

    /// The runtime settings
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The type registry
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// The managed heap
    pub fn heap(&self) -> &ManagedHeap {
        &self.heap
    }

    /// Static field storage
    pub fn statics(&self) -> &StaticFieldStorage {
        &self.statics
    }

    /// The managed thread pool
    pub fn pool(&self) -> &ManagedThreadPool {
        &self.pool
    }

    /// `System.Console` state
    pub fn console(&self) -> &ConsoleState {
        &self.console
    }

    /// Drains console output captured under [`crate::ConsoleMode::Capture`]
    pub fn take_console_output(&self) -> String {
        self.console.take_output()
    }

    /// Makes an assembly importable by name
    ///
    /// ## Arguments
    /// * `name`    - Simple assembly name, matched case-insensitively
    /// * `factory` - Produces the assembly definition on load
    pub fn add_to_catalog(&self, name: &str, factory: AssemblyFactory) {
        self.catalog.insert(name.to_ascii_lowercase(), factory);
    }

    /// Loads an assembly definition directly
    ///
    /// # Errors
    /// Returns an error if one of its types is already loaded or a base type is missing.
    pub fn load(&self, def: AssemblyDef) -> Result<AssemblyInfo> {
        let key = def.info().name.to_ascii_lowercase();
        let info = {
            let _guard = lock!(self.load_lock);
            if let Some(existing) = self.loaded.get(&key) {
                return Ok(existing.value().clone());
            }
            let info = self.registry.register(def)?;
            self.loaded.insert(key, info.clone());
            info
        };

        info!(assembly = %info, "assembly loaded");
        self.fire_assembly_load(&info);
        Ok(info)
    }

    fn fire_assembly_load(&self, info: &AssemblyInfo) {
        let Some(domain) = self.domain.get() else {
            return;
        };
        let handlers = match domain.native::<AppDomainState>() {
            Some(state) => state.handlers(),
            None => return,
        };
        if handlers.is_empty() {
            return;
        }

        let args = match bcl::assembly_load_args(self, info) {
            Ok(args) => args,
            Err(fault) => {
                warn!(%fault, "failed to create AssemblyLoad event arguments");
                return;
            }
        };
        for handler in handlers {
            if let Err(fault) = handler.invoke(&[
                ManagedValue::Object(domain.clone()),
                ManagedValue::Object(args.clone()),
            ]) {
                warn!(%fault, assembly = %info, "AssemblyLoad handler failed");
            }
        }
    }

    /// The `System.AppDomain.CurrentDomain` singleton
    ///
    /// # Errors
    /// Faults when `mscorlib` is not loaded.
    pub fn current_domain(&self) -> ManagedResult<ObjectRef> {
        if let Some(domain) = self.domain.get() {
            return Ok(domain.clone());
        }
        let domain = self.allocate("System.AppDomain")?;
        domain.set_native(AppDomainState::new("dotbridge"));
        Ok(self.domain.get_or_init(|| domain).clone())
    }

    /// Allocates an object without running a constructor
    ///
    /// # Errors
    /// `System.TypeLoadException` when the type is not loaded.
    pub fn allocate(&self, type_name: &str) -> ManagedResult<ObjectRef> {
        match self.registry.get(type_name) {
            Some(ty) => Ok(self.heap.allocate(&ty)),
            None => Err(ManagedFault::new(
                "System.TypeLoadException",
                format!("Could not load type '{}'.", type_name),
            )),
        }
    }

    /// Creates a fault backed by a new exception object of `type_name`.
    ///
    /// Falls back to a fault without an object when the exception type is not loaded.
    pub fn raise(&self, type_name: &str, message: impl Into<String>) -> ManagedFault {
        let message = message.into();
        let fault = ManagedFault::new(type_name, message.clone());
        match self.registry.get(type_name) {
            Some(ty) if ty.is_assignable_to("System.Exception") => {
                let exception = self.heap.allocate(&ty);
                exception.set_field("_message", ManagedValue::from(message));
                fault.with_exception(exception)
            }
            _ => fault,
        }
    }

    /// Returns the exception object for a fault, materialising one when the fault has none
    ///
    /// # Errors
    /// Faults when `System.Exception` is not loaded.
    pub fn exception_object(&self, fault: &ManagedFault) -> ManagedResult<ObjectRef> {
        if let Some(exception) = fault.exception() {
            return Ok(exception.clone());
        }
        let type_name = match self.registry.get(fault.type_name()) {
            Some(ty) if ty.is_assignable_to("System.Exception") => fault.type_name(),
            _ => "System.Exception",
        };
        let exception = self.allocate(type_name)?;
        exception.set_field("_message", ManagedValue::from(fault.message()));
        Ok(exception)
    }

    /// Invokes an instance method by name and argument count, with virtual dispatch on the
    /// target's runtime type
    ///
    /// # Errors
    /// `System.MissingMethodException` when no such method exists, or the method's fault.
    pub fn call_method(
        &self,
        target: &ObjectRef,
        name: &str,
        args: &[ManagedValue],
    ) -> ManagedResult {
        let lookup = |expanded: bool| {
            target.ty().hierarchy().find_map(|ty| {
                ty.members()
                    .iter()
                    .find(|m| {
                        let arity = if expanded {
                            m.param_array.is_some() && args.len() >= m.params.len()
                        } else {
                            m.param_array.is_none() && m.params.len() == args.len()
                        };
                        m.kind == MemberKind::Method && !m.is_static() && &*m.name == name && arity
                    })
                    .map(|m| (ty, m))
            })
        };
        let found = lookup(false).or_else(|| lookup(true));

        match found {
            Some((declaring, member)) => match &member.body {
                MemberBody::Method(body) => {
                    body(&CallContext::new(self, declaring, member, Some(target)), args)
                }
                _ => Err(self.missing_method(target.ty(), name)),
            },
            None => Err(self.missing_method(target.ty(), name)),
        }
    }

    fn missing_method(&self, ty: &RuntimeType, name: &str) -> ManagedFault {
        self.raise(
            "System.MissingMethodException",
            format!("Method not found: '{}.{}'.", ty.full_name(), name),
        )
    }

    /// Formats a value the way `Object.ToString` would
    ///
    /// # Errors
    /// Propagates faults raised by a managed `ToString` override.
    pub fn display(&self, value: &ManagedValue) -> ManagedResult<String> {
        Ok(match value {
            ManagedValue::Void | ManagedValue::Null => String::new(),
            ManagedValue::Bool(true) => "True".to_string(),
            ManagedValue::Bool(false) => "False".to_string(),
            ManagedValue::Char(c) => c.to_string(),
            ManagedValue::I1(v) => v.to_string(),
            ManagedValue::U1(v) => v.to_string(),
            ManagedValue::I2(v) => v.to_string(),
            ManagedValue::U2(v) => v.to_string(),
            ManagedValue::I4(v) => v.to_string(),
            ManagedValue::U4(v) => v.to_string(),
            ManagedValue::I8(v) => v.to_string(),
            ManagedValue::U8(v) => v.to_string(),
            ManagedValue::R4(v) => bcl::format_double(f64::from(*v)),
            ManagedValue::R8(v) => bcl::format_double(*v),
            ManagedValue::String(s) => s.to_string(),
            ManagedValue::Object(obj) => {
                let text = self.call_method(obj, "ToString", &[])?;
                text.as_str().unwrap_or_default().to_string()
            }
            ManagedValue::Delegate(delegate) => delegate.delegate_type().to_string(),
        })
    }

    fn execute(
        &self,
        declaring: &RuntimeType,
        member: &MemberDef,
        body: &crate::runtime::NativeMethod,
        target: Option<&ObjectRef>,
        args: &[ManagedValue],
    ) -> ManagedResult {
        if !member.is_static() && target.is_none() {
            return Err(self.raise(
                "System.NullReferenceException",
                "Object reference not set to an instance of an object.",
            ));
        }
        body(&CallContext::new(self, declaring, member, target), args)
    }

    fn member_error(member: &MemberDescriptor, kind: &str) -> Error {
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

    fn normalize_assembly_name(name: &str) -> String {
        let path = Path::new(name);
        let looks_like_file = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("dll") || ext.eq_ignore_ascii_case("exe"));

        let simple = if looks_like_file || path.components().count() > 1 {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or(name)
        } else {
            name.split(',').next().unwrap_or(name).trim()
        };
        simple.to_ascii_lowercase()
    }
}

impl RuntimeHost for ClrRuntime {
    fn resolve_type(&self, name: &str) -> Result<RuntimeTypeRef> {
        match self.registry.resolve(name) {
            Some(ty) if ty.is_public() => Ok(ty),
            _ => Err(Error::TypeNotFound(name.to_string())),
        }
    }

    fn is_namespace(&self, path: &str) -> bool {
        self.registry.is_namespace(path)
    }

    fn namespaces(&self) -> Box<dyn Iterator<Item = NamespaceEntry> + '_> {
        Box::new(self.registry.namespaces())
    }

    fn child_namespaces(&self, path: &str) -> Vec<String> {
        self.registry.child_namespaces(path)
    }

    fn invoke(
        &self,
        ty: &RuntimeTypeRef,
        member: &MemberDescriptor,
        target: Option<&ObjectRef>,
        args: Vec<ManagedValue>,
    ) -> Result<ManagedValue> {
        let def = member.definition();
        match &def.body {
            MemberBody::Method(body) => {
                debug!(
                    ty = ty.full_name(),
                    member = %def.signature(),
                    "invoking managed method"
                );
                self.execute(member.declaring_type(), def, body, target, &args)
                    .map_err(Error::InvocationError)
            }
            _ => Err(Self::member_error(member, def.kind.as_ref())),
        }
    }

    fn get_field(
        &self,
        member: &MemberDescriptor,
        target: Option<&ObjectRef>,
    ) -> Result<ManagedValue> {
        let def = member.definition();
        if def.kind != MemberKind::Field {
            return Err(Self::member_error(member, def.kind.as_ref()));
        }

        if def.is_static() {
            let declaring = member.declaring_type();
            self.statics.ensure_initialized(declaring);
            return Ok(self
                .statics
                .get(declaring.full_name(), &def.name)
                .unwrap_or_else(|| match &def.body {
                    MemberBody::Field {
                        initial: Some(initial),
                    } => initial.clone(),
                    _ => ManagedValue::default_for(&def.ty),
                }));
        }

        let target = target.ok_or_else(|| {
            Error::InvocationError(self.raise(
                "System.NullReferenceException",
                "Object reference not set to an instance of an object.",
            ))
        })?;
        target.field(&def.name).ok_or_else(|| Error::MemberNotFound {
            type_name: target.ty().full_name().to_string(),
            member: def.name.to_string(),
        })
    }

    fn set_field(
        &self,
        member: &MemberDescriptor,
        target: Option<&ObjectRef>,
        value: ManagedValue,
    ) -> Result<()> {
        let def = member.definition();
        if def.kind != MemberKind::Field {
            return Err(Self::member_error(member, def.kind.as_ref()));
        }
        if def.is_read_only_field() {
            return Err(Self::read_only(member));
        }

        if def.is_static() {
            let declaring = member.declaring_type();
            self.statics.ensure_initialized(declaring);
            self.statics.set(declaring.full_name(), &def.name, value);
            return Ok(());
        }

        let target = target.ok_or_else(|| {
            Error::InvocationError(self.raise(
                "System.NullReferenceException",
                "Object reference not set to an instance of an object.",
            ))
        })?;
        if target.set_field(&def.name, value) {
            Ok(())
        } else {
            Err(Error::MemberNotFound {
                type_name: target.ty().full_name().to_string(),
                member: def.name.to_string(),
            })
        }
    }

    fn get_property(
        &self,
        member: &MemberDescriptor,
        target: Option<&ObjectRef>,
        index: Vec<ManagedValue>,
    ) -> Result<ManagedValue> {
        let def = member.definition();
        match &def.body {
            MemberBody::Property {
                getter: Some(getter),
                ..
            } => self
                .execute(member.declaring_type(), def, getter, target, &index)
                .map_err(Error::InvocationError),
            MemberBody::Property { getter: None, .. } => {
                Err(Self::member_error(member, "write-only property"))
            }
            _ => Err(Self::member_error(member, def.kind.as_ref())),
        }
    }

    fn set_property(
        &self,
        member: &MemberDescriptor,
        target: Option<&ObjectRef>,
        mut index: Vec<ManagedValue>,
        value: ManagedValue,
    ) -> Result<()> {
        let def = member.definition();
        match &def.body {
            MemberBody::Property {
                setter: Some(setter),
                ..
            } => {
                index.push(value);
                self.execute(member.declaring_type(), def, setter, target, &index)
                    .map(|_| ())
                    .map_err(Error::InvocationError)
            }
            MemberBody::Property { setter: None, .. } => Err(Self::read_only(member)),
            _ => Err(Self::member_error(member, def.kind.as_ref())),
        }
    }

    fn construct(
        &self,
        ty: &RuntimeTypeRef,
        ctor: &MemberDescriptor,
        args: Vec<ManagedValue>,
    ) -> Result<ObjectRef> {
        if ty.is_abstract() {
            return Err(Error::ConstructionError(self.raise(
                "System.MemberAccessException",
                format!("Cannot create an abstract class '{}'.", ty.full_name()),
            )));
        }

        let def = ctor.definition();
        let MemberBody::Constructor(body) = &def.body else {
            return Err(Self::member_error(ctor, def.kind.as_ref()));
        };

        let object = self.heap.allocate(ty);
        debug!(
            ty = ty.full_name(),
            ctor = %def.signature(),
            id = object.id(),
            "constructing managed object"
        );
        body(
            &CallContext::new(self, ctor.declaring_type(), def, Some(&object)),
            &args,
        )
        .map_err(Error::ConstructionError)?;
        Ok(object)
    }

    fn add_event_handler(
        &self,
        member: &MemberDescriptor,
        target: Option<&ObjectRef>,
        handler: ManagedValue,
    ) -> Result<()> {
        let def = member.definition();
        match &def.body {
            MemberBody::Event { add, .. } => self
                .execute(member.declaring_type(), def, add, target, &[handler])
                .map(|_| ())
                .map_err(Error::InvocationError),
            _ => Err(Self::member_error(member, def.kind.as_ref())),
        }
    }

    fn remove_event_handler(
        &self,
        member: &MemberDescriptor,
        target: Option<&ObjectRef>,
        handler: ManagedValue,
    ) -> Result<()> {
        let def = member.definition();
        match &def.body {
            MemberBody::Event { remove, .. } => self
                .execute(member.declaring_type(), def, remove, target, &[handler])
                .map(|_| ())
                .map_err(Error::InvocationError),
            _ => Err(Self::member_error(member, def.kind.as_ref())),
        }
    }

    fn schedule(&self, work: WorkItem) {
        self.pool.spawn(work);
    }

    fn load_assembly(&self, name: &str) -> Result<AssemblyInfo> {
        let key = Self::normalize_assembly_name(name);
        if let Some(existing) = self.loaded.get(&key) {
            return Ok(existing.value().clone());
        }

        let factory = self
            .catalog
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::AssemblyNotFound(name.to_string()))?;
        self.load(factory())
    }

    fn assemblies(&self) -> Vec<AssemblyInfo> {
        self.registry.assemblies()
    }

    fn types(&self) -> Vec<RuntimeTypeRef> {
        self.registry.iter().collect()
    }

    fn type_of(&self, object: &ObjectRef) -> RuntimeTypeRef {
        object.ty().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn runtime() -> Arc<ClrRuntime> {
        ClrRuntime::new(RuntimeConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_preloaded_assemblies() {
        let runtime = runtime();
        let names: Vec<String> = runtime.assemblies().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["mscorlib", "System"]);
        assert!(runtime.resolve_type("System.String").is_ok());
        assert!(runtime.resolve_type("System.IO.Ports.SerialPort").is_ok());
        assert!(runtime.resolve_type("System.Data.DataTable").is_err());
    }

    #[test]
    fn test_load_by_name_and_path() {
        let runtime = runtime();
        let info = runtime.load_assembly("system.data").unwrap();
        assert_eq!(info.name, "System.Data");
        assert!(runtime.resolve_type("System.Data.DataTable").is_ok());

        let again = runtime.load_assembly("/usr/lib/mono/System.Data.dll").unwrap();
        assert_eq!(again, info);
        assert_eq!(runtime.assemblies().len(), 3);

        assert_eq!(
            runtime.load_assembly("Nope.Assembly").unwrap_err(),
            Error::AssemblyNotFound("Nope.Assembly".into())
        );
    }

    #[test]
    fn test_non_public_types_hidden() {
        let runtime = runtime();
        assert!(runtime
            .registry()
            .get("<PrivateImplementationDetails>")
            .is_some());
        assert!(runtime
            .resolve_type("<PrivateImplementationDetails>")
            .is_err());
    }

    #[test]
    fn test_raise_creates_exception_object() {
        let runtime = runtime();
        let fault = runtime.raise("System.InvalidOperationException", "nope");
        let exception = fault.exception().unwrap();
        assert_eq!(
            exception.ty().full_name(),
            "System.InvalidOperationException"
        );
        assert_eq!(
            runtime.display(&ManagedValue::Object(exception.clone())).unwrap(),
            "System.InvalidOperationException: nope"
        );

        let bare = runtime.raise("No.Such.Exception", "x");
        assert!(bare.exception().is_none());
        let materialised = runtime.exception_object(&bare).unwrap();
        assert_eq!(materialised.ty().full_name(), "System.Exception");
    }

    #[test]
    fn test_display_primitives() {
        let runtime = runtime();
        assert_eq!(runtime.display(&ManagedValue::Bool(true)).unwrap(), "True");
        assert_eq!(runtime.display(&ManagedValue::R8(7.5)).unwrap(), "7.5");
        assert_eq!(runtime.display(&ManagedValue::R8(7.0)).unwrap(), "7");
        assert_eq!(runtime.display(&ManagedValue::Null).unwrap(), "");
    }

    #[test]
    fn test_current_domain_singleton() {
        let runtime = runtime();
        let a = runtime.current_domain().unwrap();
        let b = runtime.current_domain().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.ty().full_name(), "System.AppDomain");
    }
}
