//! Registry of loaded types.
//!
//! [`TypeRegistry`] owns every type the runtime has loaded and answers the lookups the bridge
//! needs: by full or assembly-qualified name, by namespace, and enumeration of namespaces.
//!
//! # Registry Architecture
//!
//! - **Full-name lookup**: primary storage in an ordered `SkipMap`, so enumeration is stable
//!   and sorted
//! - **Namespace index**: `DashMap` from namespace to the public top-level types it contains
//! - **Namespace set**: ordered `SkipMap` of every namespace path including all parent
//!   prefixes (`System`, `System.IO`, `System.IO.Ports`), which makes prefix queries cheap
//! - **Assemblies**: append-only `boxcar::Vec` of loaded assembly identities
//!
//! # Thread Safety
//!
//! All collections are lock-free or shard-locked; lookups never block registration of a
//! newly imported assembly for longer than a shard write.

use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use tracing::trace;

use crate::{
    runtime::{AssemblyDef, AssemblyInfo, RuntimeTypeRef},
    Error, Result,
};

/// A namespace and the public top-level types it directly contains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceEntry {
    /// Dotted namespace path
    pub path: String,
    /// Simple names of the public, non-nested types in the namespace
    pub types: Vec<String>,
}

/// Central registry of loaded types
pub struct TypeRegistry {
    types: SkipMap<String, RuntimeTypeRef>,
    types_by_namespace: DashMap<String, Vec<String>>,
    types_by_name: DashMap<String, Vec<String>>,
    namespaces: SkipMap<String, ()>,
    assemblies: boxcar::Vec<AssemblyInfo>,
}

impl TypeRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        TypeRegistry {
            types: SkipMap::new(),
            types_by_namespace: DashMap::new(),
            types_by_name: DashMap::new(),
            namespaces: SkipMap::new(),
            assemblies: boxcar::Vec::new(),
        }
    }

    /// Registers all types of an assembly and links their base types.
    ///
    /// Base types must either be registered already or be defined by the same assembly.
    ///
    /// # Arguments
    /// * `def` - The assembly to register
    ///
    /// # Errors
    /// Returns an error on duplicate type names, or [`Error::TypeNotFound`] when a base type
    /// cannot be found. Nothing is registered in either case.
    pub fn register(&self, def: AssemblyDef) -> Result<AssemblyInfo> {
        let (info, types) = def.into_parts();

        for (index, ty) in types.iter().enumerate() {
            let duplicate_local = types[..index]
                .iter()
                .any(|other| other.full_name() == ty.full_name());
            if duplicate_local || self.types.contains_key(ty.full_name()) {
                return Err(Error::Error(format!(
                    "Type already registered - {}",
                    ty.full_name()
                )));
            }
            if let Some(base) = ty.base_name() {
                let local = types.iter().any(|other| other.full_name() == base);
                if !local && !self.types.contains_key(base) {
                    return Err(Error::TypeNotFound(base.to_string()));
                }
            }
        }

        let assembly: Arc<str> = Arc::from(info.full_name());
        let types: Vec<RuntimeTypeRef> = types.into_iter().map(Arc::new).collect();

        for ty in &types {
            ty.set_assembly(assembly.clone());
            self.types.insert(ty.full_name().to_string(), ty.clone());
            self.types_by_name
                .entry(ty.name().to_string())
                .or_default()
                .push(ty.full_name().to_string());

            if ty.is_public() && !ty.is_nested() && !ty.namespace().is_empty() {
                self.types_by_namespace
                    .entry(ty.namespace().to_string())
                    .or_default()
                    .push(ty.name().to_string());
                self.add_namespace(ty.namespace());
            }
            trace!(ty = ty.full_name(), "registered type");
        }

        for ty in &types {
            if let Some(base) = ty.base_name().and_then(|name| self.get(name)) {
                ty.link_base(base);
            }
        }

        self.assemblies.push(info.clone());
        Ok(info)
    }

    fn add_namespace(&self, namespace: &str) {
        let mut end = 0;
        for segment in namespace.split('.') {
            end += segment.len();
            self.namespaces.get_or_insert(namespace[..end].to_string(), ());
            end += 1;
        }
    }

    /// Looks up a type by full name
    #[must_use]
    pub fn get(&self, full_name: &str) -> Option<RuntimeTypeRef> {
        self.types.get(full_name).map(|entry| entry.value().clone())
    }

    /// Looks up a type by full or assembly-qualified name
    ///
    /// ## Arguments
    /// * `name` - `System.String` or `System.String, mscorlib, Version=...`
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<RuntimeTypeRef> {
        let type_part = name.split(',').next().unwrap_or(name).trim();
        self.get(type_part)
    }

    /// Full names of all types with the given simple name
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Vec<String> {
        self.types_by_name
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// True when `path` is a namespace containing public types, directly or below
    #[must_use]
    pub fn is_namespace(&self, path: &str) -> bool {
        self.namespaces.contains_key(path)
    }

    /// Simple names of the public top-level types in `namespace`
    #[must_use]
    pub fn types_in(&self, namespace: &str) -> Vec<String> {
        let mut names = self
            .types_by_namespace
            .get(namespace)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Last segments of the namespaces directly below `path`; `""` lists the roots
    #[must_use]
    pub fn child_namespaces(&self, path: &str) -> Vec<String> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}.", path)
        };

        self.namespaces
            .range(prefix.clone()..)
            .take_while(|entry| entry.key().starts_with(&prefix))
            .filter_map(|entry| {
                let rest = &entry.key()[prefix.len()..];
                (!rest.is_empty() && !rest.contains('.')).then(|| rest.to_string())
            })
            .collect()
    }

    /// Iterates all namespaces in order, lazily
    pub fn namespaces(&self) -> impl Iterator<Item = NamespaceEntry> + '_ {
        self.namespaces.iter().map(move |entry| NamespaceEntry {
            path: entry.key().clone(),
            types: self.types_in(entry.key()),
        })
    }

    /// Iterates all registered types ordered by full name
    pub fn iter(&self) -> impl Iterator<Item = RuntimeTypeRef> + '_ {
        self.types.iter().map(|entry| entry.value().clone())
    }

    /// Identities of the loaded assemblies, in load order
    #[must_use]
    pub fn assemblies(&self) -> Vec<AssemblyInfo> {
        self.assemblies.iter().map(|(_, info)| info.clone()).collect()
    }

    /// Number of registered types
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True when no type is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TypeBuilder;

    fn core() -> AssemblyDef {
        AssemblyDef::new("core")
            .with_type(TypeBuilder::root().build())
            .with_type(TypeBuilder::class("System.IO", "Stream").build())
            .with_type(TypeBuilder::class("System.IO.Ports", "SerialPort").build())
            .with_type(TypeBuilder::class("System", "Hidden").non_public().build())
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = TypeRegistry::new();
        let info = registry.register(core()).unwrap();
        assert_eq!(info.name, "core");
        assert_eq!(registry.len(), 4);

        let stream = registry.get("System.IO.Stream").unwrap();
        assert_eq!(stream.base().unwrap().full_name(), "System.Object");
        assert!(stream.assembly().starts_with("core, Version=1.0.0.0"));

        let qualified = format!("System.IO.Stream, {}", info.full_name());
        assert!(registry.resolve(&qualified).is_some());
        assert_eq!(registry.get_by_name("Stream"), vec!["System.IO.Stream"]);
    }

    #[test]
    fn test_namespace_prefixes() {
        let registry = TypeRegistry::new();
        registry.register(core()).unwrap();

        assert!(registry.is_namespace("System"));
        assert!(registry.is_namespace("System.IO"));
        assert!(registry.is_namespace("System.IO.Ports"));
        assert!(!registry.is_namespace("System.IO.Port"));
        assert!(!registry.is_namespace("Microsoft"));

        assert_eq!(registry.child_namespaces(""), vec!["System"]);
        assert_eq!(registry.child_namespaces("System"), vec!["IO"]);
        assert_eq!(registry.child_namespaces("System.IO"), vec!["Ports"]);
        assert_eq!(registry.types_in("System.IO"), vec!["Stream"]);
        assert!(registry.types_in("System").contains(&"Object".to_string()));
        assert!(!registry.types_in("System").contains(&"Hidden".to_string()));
    }

    #[test]
    fn test_namespace_enumeration_is_ordered() {
        let registry = TypeRegistry::new();
        registry.register(core()).unwrap();

        let paths: Vec<String> = registry.namespaces().map(|entry| entry.path).collect();
        assert_eq!(paths, vec!["System", "System.IO", "System.IO.Ports"]);
    }

    #[test]
    fn test_missing_base_rejected() {
        let registry = TypeRegistry::new();
        let def = AssemblyDef::new("broken").with_type(TypeBuilder::class("A", "B").build());
        assert_eq!(
            registry.register(def).unwrap_err(),
            Error::TypeNotFound("System.Object".into())
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = TypeRegistry::new();
        registry.register(core()).unwrap();
        let again = AssemblyDef::new("again").with_type(TypeBuilder::class("System.IO", "Stream").build());
        assert!(registry.register(again).is_err());
        assert_eq!(registry.assemblies().len(), 1);
    }
}
