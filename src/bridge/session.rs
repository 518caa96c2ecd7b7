use std::{
    collections::BTreeSet,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock, Weak,
    },
};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::{
    bridge::{
        asyncbridge::{AsyncBridge, AsyncOperation},
        class::ClassInner,
        namespace::NodeInner,
        resolver::MemberResolver,
        ClassProjection, MemberAccess, NamespaceNode, ObjectHandle,
    },
    config::BridgeConfig,
    host::{set_global, HostFunction, HostValue},
    runtime::{AssemblyInfo, MemberKind, NamespaceEntry, RuntimeHost, RuntimeTypeRef},
    Result,
};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

struct SessionInner {
    id: u64,
    host: Arc<dyn RuntimeHost>,
    config: BridgeConfig,
    resolver: MemberResolver,
    classes: DashMap<String, Weak<ClassInner>>,
    root: RwLock<Weak<NodeInner>>,
}

/// One bridge session: a runtime, its configuration, and every cache the projections share.
///
/// Each [`crate::init`] call creates a fresh session; projections from different sessions
/// never compare equal. Every node, class and object handle keeps its session alive.
///
/// Besides the projections, the session carries the reflection surface: assembly import and
/// enumeration of assemblies, types, namespaces and members.
///
/// # Example
///
/// ```rust,no_run
/// use dotbridge::{init, BridgeConfig};
///
/// let root = init(&BridgeConfig::default())?;
/// let session = root.session();
/// session.import("System.Data")?;
/// assert!(session
///     .types()
///     .iter()
///     .any(|name| name.starts_with("System.Data.DataTable,")));
/// # Ok::<(), dotbridge::Error>(())
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// A session reference that does not keep the session alive
#[derive(Clone)]
pub(crate) struct WeakSession(Weak<SessionInner>);

impl WeakSession {
    pub(crate) fn upgrade(&self) -> Option<Session> {
        self.0.upgrade().map(|inner| Session { inner })
    }
}

/// Reflection summary of one member name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSummary {
    /// Member name
    pub name: String,
    /// Kind of the member plain access yields
    pub kind: MemberKind,
    /// Readable and writable flags
    pub access: MemberAccess,
    /// Static or instance context
    pub is_static: bool,
    /// True for indexed properties
    pub indexed: bool,
    /// Full name of the type, for nested types
    pub nested_type: Option<String>,
    /// Number of members of that kind sharing the name
    pub overloads: usize,
}

impl Session {
    /// Creates a session over `host`
    pub(crate) fn new(host: Arc<dyn RuntimeHost>, config: BridgeConfig) -> Self {
        let id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, global = config.global, "bridge session created");
        Session {
            inner: Arc::new(SessionInner {
                id,
                host,
                config,
                resolver: MemberResolver::new(),
                classes: DashMap::new(),
                root: RwLock::new(Weak::new()),
            }),
        }
    }

    /// Process-unique session id
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The runtime behind this session
    pub fn host(&self) -> &dyn RuntimeHost {
        self.inner.host.as_ref()
    }

    pub(crate) fn host_arc(&self) -> Arc<dyn RuntimeHost> {
        self.inner.host.clone()
    }

    /// True when both sessions project the same runtime instance
    pub(crate) fn shares_host(&self, other: &Session) -> bool {
        Arc::as_ptr(&self.inner.host).cast::<()>() == Arc::as_ptr(&other.inner.host).cast::<()>()
    }

    /// The configuration the session was created with
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub(crate) fn resolver(&self) -> &MemberResolver {
        &self.inner.resolver
    }

    pub(crate) fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.inner))
    }

    /// The root of the namespace tree.
    ///
    /// The session holds the root weakly; while any clone of it is alive, every call
    /// returns the same node.
    pub fn root(&self) -> NamespaceNode {
        if let Some(root) = NamespaceNode::upgrade(&read_lock!(self.inner.root)) {
            return root;
        }

        let mut slot = write_lock!(self.inner.root);
        if let Some(root) = NamespaceNode::upgrade(&slot) {
            return root;
        }
        let root = NamespaceNode::new(String::new(), self.clone());
        *slot = root.downgrade();
        root
    }

    /// The projection of `ty`, shared by every path that reaches the type
    pub fn class_for(&self, ty: RuntimeTypeRef) -> ClassProjection {
        let key = ty.full_name().to_string();
        if let Some(class) = self
            .inner
            .classes
            .get(&key)
            .and_then(|weak| ClassProjection::upgrade(&weak))
        {
            return class;
        }

        let mut entry = self.inner.classes.entry(key).or_default();
        if let Some(class) = ClassProjection::upgrade(&entry) {
            return class;
        }
        let class = ClassProjection::new(ty, self.clone());
        *entry = class.downgrade();
        class
    }

    /// The projection of a type by full or assembly-qualified name
    ///
    /// # Errors
    /// [`crate::Error::TypeNotFound`] when the runtime has no such public type.
    pub fn class_named(&self, name: &str) -> Result<ClassProjection> {
        let ty = self.host().resolve_type(name)?;
        Ok(self.class_for(ty))
    }

    /// Loads an assembly by simple name, or by a path whose file stem names one.
    ///
    /// Namespaces the assembly adds become reachable from the root at once. In global mode
    /// new top-level namespaces are merged into the global scope.
    ///
    /// # Errors
    /// [`crate::Error::AssemblyNotFound`] when the runtime knows no such assembly.
    pub fn import(&self, name: &str) -> Result<AssemblyInfo> {
        let info = self.host().load_assembly(name)?;
        info!(session = self.inner.id, assembly = %info, "assembly imported");
        if self.inner.config.global {
            self.merge_globals();
        }
        Ok(info)
    }

    /// Publishes the root's top-level namespaces into the host thread's global scope
    pub(crate) fn merge_globals(&self) {
        let root = self.root();
        for name in self.host().child_namespaces("") {
            if let Ok(value) = root.get(&name) {
                debug!(name = %name, "namespace merged into global scope");
                set_global(&name, value);
            }
        }
    }

    /// Full names of the loaded assemblies
    pub fn assemblies(&self) -> Vec<String> {
        self.host()
            .assemblies()
            .iter()
            .map(AssemblyInfo::full_name)
            .collect()
    }

    /// Assembly-qualified names of the public, non-nested, non-special types, sorted
    pub fn types(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .host()
            .types()
            .iter()
            .filter(|ty| ty.is_public() && !ty.is_nested() && !ty.is_special_name())
            .map(|ty| ty.assembly_qualified_name())
            .collect();
        names.sort();
        names
    }

    /// Every namespace with the public types it directly contains
    pub fn namespaces(&self) -> Vec<NamespaceEntry> {
        self.host().namespaces().collect()
    }

    /// Summaries of the public members of `class` in instance or static context, by name
    pub fn members(&self, class: &ClassProjection, instance: bool) -> Vec<MemberSummary> {
        let ty = class.runtime_type();
        let is_static = !instance;
        let names: BTreeSet<&str> = ty
            .hierarchy()
            .flat_map(|declaring| declaring.members())
            .filter(|def| {
                def.is_public() && def.kind != MemberKind::Constructor && def.is_static() == is_static
            })
            .map(|def| &*def.name)
            .collect();

        names
            .into_iter()
            .filter_map(|name| {
                let member = self.resolver().resolve_access(ty, name, is_static).ok()?;
                let overloads = self
                    .resolver()
                    .group(ty, name, is_static)
                    .iter()
                    .filter(|candidate| candidate.kind() == member.kind())
                    .count();
                Some(MemberSummary {
                    name: name.to_string(),
                    kind: member.kind(),
                    access: member.access(),
                    is_static,
                    indexed: member.is_indexed(),
                    nested_type: member.nested_type().map(str::to_string),
                    overloads,
                })
            })
            .collect()
    }

    /// The projection of an object's runtime type
    pub fn get_type(&self, handle: &ObjectHandle) -> ClassProjection {
        handle.class().clone()
    }

    /// True when `value` is a class projection that can be constructed
    pub fn is_constructor(&self, value: &HostValue) -> bool {
        match value {
            HostValue::Class(class) => {
                let ty = class.runtime_type();
                !ty.is_abstract()
                    && (ty.is_value_type()
                        || ty
                            .members()
                            .iter()
                            .any(|def| def.kind == MemberKind::Constructor && def.is_public()))
            }
            _ => false,
        }
    }

    /// Assembly-qualified name of the projected type
    pub fn type_of(&self, class: &ClassProjection) -> String {
        class.assembly_qualified_name()
    }

    /// Calls `callback` on the host loop once the managed `Task` behind `task` completes
    ///
    /// # Errors
    /// See [`AsyncBridge::when_completed`].
    pub fn when_completed(&self, task: &ObjectHandle, callback: HostFunction) -> Result<AsyncOperation> {
        AsyncBridge::new(self).when_completed(task, callback)
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("classes", &self.inner.classes.len())
            .field("descriptors", &self.inner.resolver.descriptor_count())
            .finish()
    }
}
