use std::{
    fmt,
    sync::{Arc, Weak},
};

use dashmap::DashMap;
use tracing::debug;

use crate::{
    bridge::{ClassProjection, Session},
    host::HostValue,
    Error, Result,
};

#[derive(Clone)]
enum Child {
    Namespace(NamespaceNode),
    Class(ClassProjection),
}

impl From<Child> for HostValue {
    fn from(child: Child) -> Self {
        match child {
            Child::Namespace(node) => HostValue::Namespace(node),
            Child::Class(class) => HostValue::Class(class),
        }
    }
}

pub(crate) struct NodeInner {
    path: String,
    session: Session,
    children: DashMap<String, Child>,
}

/// A projected managed namespace.
///
/// Children materialise on first access and are memoised: reading the same name twice yields
/// the same [`NamespaceNode`] or [`ClassProjection`]. Names that resolve to nothing are not
/// remembered, so a name becomes reachable once an assembly defining it is imported.
///
/// When a name is both a type and a namespace, the type wins.
///
/// # Example
///
/// ```rust,no_run
/// use dotbridge::{init, BridgeConfig};
///
/// let root = init(&BridgeConfig::default())?;
/// let ports = root.namespace("System")?.namespace("IO")?.namespace("Ports")?;
/// assert_eq!(ports.path(), "System.IO.Ports");
/// let serial = ports.class("SerialPort")?;
/// assert_eq!(serial.full_name(), "System.IO.Ports.SerialPort");
/// # Ok::<(), dotbridge::Error>(())
/// ```
#[derive(Clone)]
pub struct NamespaceNode {
    inner: Arc<NodeInner>,
}

impl NamespaceNode {
    pub(crate) fn new(path: String, session: Session) -> Self {
        NamespaceNode {
            inner: Arc::new(NodeInner {
                path,
                session,
                children: DashMap::new(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<NodeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<NodeInner>) -> Option<Self> {
        weak.upgrade().map(|inner| NamespaceNode { inner })
    }

    /// Dotted path of the namespace; empty for the root
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Last path segment; empty for the root
    pub fn name(&self) -> &str {
        self.inner
            .path
            .rsplit_once('.')
            .map_or(self.inner.path.as_str(), |(_, name)| name)
    }

    /// True for the root of the tree
    pub fn is_root(&self) -> bool {
        self.inner.path.is_empty()
    }

    /// The session this node belongs to
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    fn child_path(&self, name: &str) -> String {
        if self.is_root() {
            name.to_string()
        } else {
            format!("{}.{}", self.inner.path, name)
        }
    }

    /// Resolves a child by name: a class when `path.name` is a loadable type, otherwise a
    /// namespace. Dotted names walk several levels; past a class the rest is a member of that
    /// class, so `Environment.SpecialFolder` reaches the nested type.
    ///
    /// # Errors
    /// [`Error::TypeNotFound`] when the name is neither a type nor a namespace.
    pub fn get(&self, name: &str) -> Result<HostValue> {
        if let Some(child) = self.inner.children.get(name) {
            return Ok(child.clone().into());
        }
        if let Some((head, rest)) = name.split_once('.') {
            return match self.get(head)? {
                HostValue::Namespace(node) => node.get(rest),
                HostValue::Class(class) => class.get(rest),
                other => Err(mismatch_error!(
                    "namespace",
                    crate::bridge::marshal::describe(&other)
                )),
            };
        }

        let path = self.child_path(name);
        let session = &self.inner.session;
        let child = match session.host().resolve_type(&path) {
            Ok(ty) => {
                debug!(path = %path, "class projected from namespace");
                Child::Class(session.class_for(ty))
            }
            Err(Error::TypeNotFound(_)) if session.host().is_namespace(&path) => {
                debug!(path = %path, "namespace materialised");
                Child::Namespace(NamespaceNode::new(path, session.clone()))
            }
            Err(Error::TypeNotFound(_)) => return Err(Error::TypeNotFound(path)),
            Err(other) => return Err(other),
        };

        let stored = self
            .inner
            .children
            .entry(name.to_string())
            .or_insert(child)
            .clone();
        Ok(stored.into())
    }

    /// Resolves a child namespace
    ///
    /// # Errors
    /// [`Error::TypeNotFound`] when the name does not exist, [`Error::TypeMismatch`] when it
    /// names a type.
    pub fn namespace(&self, name: &str) -> Result<NamespaceNode> {
        match self.get(name)? {
            HostValue::Namespace(node) => Ok(node),
            other => Err(mismatch_error!("namespace", crate::bridge::marshal::describe(&other))),
        }
    }

    /// Resolves a class in this namespace
    ///
    /// # Errors
    /// [`Error::TypeNotFound`] when the name does not exist, [`Error::TypeMismatch`] when it
    /// names a namespace.
    pub fn class(&self, name: &str) -> Result<ClassProjection> {
        match self.get(name)? {
            HostValue::Class(class) => Ok(class),
            other => Err(mismatch_error!("class", crate::bridge::marshal::describe(&other))),
        }
    }

    /// Names of the namespaces and public top-level types directly below this node, sorted
    pub fn child_names(&self) -> Vec<String> {
        let host = self.inner.session.host();
        let mut names = host.child_namespaces(&self.inner.path);
        if let Some(entry) = host.namespaces().find(|entry| entry.path == self.inner.path) {
            names.extend(entry.types);
        }
        names.sort();
        names.dedup();
        names
    }

    /// Number of children materialised so far
    pub fn materialised(&self) -> usize {
        self.inner.children.len()
    }
}

impl PartialEq for NamespaceNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for NamespaceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceNode")
            .field("path", &self.inner.path)
            .field("materialised", &self.inner.children.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RuntimeConfig, runtime::ClrRuntime, BridgeConfig};

    fn root() -> NamespaceNode {
        let runtime = ClrRuntime::new(RuntimeConfig::for_testing()).unwrap();
        Session::new(runtime, BridgeConfig::default()).root()
    }

    #[test]
    fn test_children_are_memoised() {
        let root = root();
        let system = root.namespace("System").unwrap();
        assert_eq!(system, root.namespace("System").unwrap());
        assert_eq!(system.name(), "System");

        let io = system.namespace("IO").unwrap();
        let ports = io.namespace("Ports").unwrap();
        assert_eq!(ports.path(), "System.IO.Ports");
        assert_eq!(root.namespace("System.IO.Ports").unwrap(), ports);

        let string = system.class("String").unwrap();
        assert_eq!(system.class("String").unwrap(), string);
    }

    #[test]
    fn test_misses_are_not_cached() {
        let root = root();
        let system = root.namespace("System").unwrap();
        assert_eq!(
            system.get("Data").unwrap_err(),
            Error::TypeNotFound("System.Data".into())
        );
        let before = system.materialised();

        system.session().import("System.Data").unwrap();
        let data = system.namespace("Data").unwrap();
        assert!(data.class("DataTable").is_ok());
        assert_eq!(system.materialised(), before + 1);
    }

    #[test]
    fn test_dotted_walk_through_class() {
        let root = root();
        let system = root.namespace("System").unwrap();
        match system.get("Environment.SpecialFolder") {
            Ok(HostValue::Class(folder)) => {
                assert_eq!(folder.full_name(), "System.Environment+SpecialFolder");
            }
            other => panic!("expected the nested type, got {other:?}"),
        }
        assert_eq!(root.get("System.String.Empty"), Ok(HostValue::from("")));
        assert!(matches!(
            system.get("String.Nope"),
            Err(Error::MemberNotFound { .. })
        ));
    }

    #[test]
    fn test_kind_mismatch() {
        let root = root();
        let system = root.namespace("System").unwrap();
        assert!(matches!(system.namespace("String"), Err(Error::TypeMismatch { .. })));
        assert!(matches!(system.class("IO"), Err(Error::TypeMismatch { .. })));

        let names = system.child_names();
        assert!(names.contains(&"IO".to_string()));
        assert!(names.contains(&"String".to_string()));
    }
}
