//! Member Resolver.
//!
//! Maps a (type, name, context) triple, plus the argument list for calls, onto exactly one
//! [`MemberDescriptor`].
//!
//! # Lookup
//!
//! Candidates are the public members named `name` in the requested context (static or
//! instance), collected from the type and then its base chain. A derived member hides a base
//! member with the same parameter list.
//!
//! Plain access (no call) picks by kind: property, then field, then event, then method
//! group, then nested type.
//!
//! # Overload Resolution
//!
//! Every overload whose arity matches is scored argument by argument (see
//! [`score`](super::marshal::score)); an argument that cannot be converted drops the
//! overload. A `params` array expands to take the trailing arguments, at a one-point penalty
//! so a fixed overload with the same fit wins. The highest total wins; a tie is
//! [`Error::AmbiguousMember`].
//!
//! # Caching
//!
//! All four caches live as long as the session and are never invalidated: types are immutable
//! once loaded. Entries are inserted first-writer-wins, so lookups racing in from the async
//! re-entry path agree on one descriptor.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::{
    bridge::{
        marshal::{score, to_managed_as, ArgShape},
        MemberDescriptor, Session,
    },
    host::HostValue,
    runtime::{ManagedValue, MemberKind, RuntimeHost, RuntimeTypeRef},
    Error, Result,
};

const CONSTRUCTOR: &str = ".ctor";

type Group = Arc<[Arc<MemberDescriptor>]>;

#[derive(Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    ty: String,
    name: String,
    is_static: bool,
}

#[derive(PartialEq, Eq, Hash)]
struct PickKey {
    group: GroupKey,
    kind: MemberKind,
    shapes: Vec<ArgShape>,
}

/// Session-lifetime member lookup with caching
#[derive(Default)]
pub(crate) struct MemberResolver {
    descriptors: DashMap<(String, usize), Arc<MemberDescriptor>>,
    groups: DashMap<GroupKey, Group>,
    access: DashMap<GroupKey, Arc<MemberDescriptor>>,
    picks: DashMap<PickKey, Arc<MemberDescriptor>>,
}

fn access_rank(kind: MemberKind) -> u8 {
    match kind {
        MemberKind::Property => 0,
        MemberKind::Field => 1,
        MemberKind::Event => 2,
        MemberKind::Method => 3,
        MemberKind::NestedType => 4,
        MemberKind::Constructor => 5,
    }
}

fn not_found(ty: &RuntimeTypeRef, name: &str) -> Error {
    Error::MemberNotFound {
        type_name: ty.full_name().to_string(),
        member: name.to_string(),
    }
}

impl MemberResolver {
    pub(crate) fn new() -> Self {
        MemberResolver::default()
    }

    /// The session's descriptor for a member slot
    pub(crate) fn descriptor(
        &self,
        declaring: &RuntimeTypeRef,
        slot: usize,
    ) -> Option<Arc<MemberDescriptor>> {
        let key = (declaring.full_name().to_string(), slot);
        if let Some(existing) = self.descriptors.get(&key) {
            return Some(existing.clone());
        }
        let created = MemberDescriptor::new(declaring.clone(), slot)?;
        Some(self.descriptors.entry(key).or_insert(created).clone())
    }

    /// Number of descriptors created so far
    pub(crate) fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    /// All public members named `name` in the given context, with hiding applied
    pub(crate) fn group(&self, ty: &RuntimeTypeRef, name: &str, is_static: bool) -> Group {
        let key = GroupKey {
            ty: ty.full_name().to_string(),
            name: name.to_string(),
            is_static,
        };
        if let Some(group) = self.groups.get(&key) {
            return group.clone();
        }

        let group: Group = if name == CONSTRUCTOR {
            ty.members()
                .iter()
                .enumerate()
                .filter(|(_, def)| def.kind == MemberKind::Constructor && def.is_public())
                .filter_map(|(slot, _)| self.descriptor(ty, slot))
                .collect()
        } else {
            self.collect(ty, name, is_static).into()
        };

        debug!(
            ty = ty.full_name(),
            member = name,
            is_static,
            candidates = group.len(),
            "member group resolved"
        );
        self.groups.entry(key).or_insert(group).clone()
    }

    fn collect(&self, ty: &RuntimeTypeRef, name: &str, is_static: bool) -> Vec<Arc<MemberDescriptor>> {
        let mut found: Vec<Arc<MemberDescriptor>> = Vec::new();
        let mut current = Some(ty.clone());

        while let Some(declaring) = current {
            let derived = found.len();
            for (slot, def) in declaring.members().iter().enumerate() {
                if !def.is_public()
                    || def.kind == MemberKind::Constructor
                    || def.is_static() != is_static
                    || &*def.name != name
                {
                    continue;
                }
                if found[..derived]
                    .iter()
                    .any(|seen| seen.definition().same_parameters(def))
                {
                    trace!(ty = declaring.full_name(), member = name, "hidden by derived member");
                    continue;
                }
                if let Some(descriptor) = self.descriptor(&declaring, slot) {
                    found.push(descriptor);
                }
            }
            current = declaring.base().cloned();
        }
        found
    }

    /// Resolves `name` for plain access: property, field, event, method group, nested type
    ///
    /// For a method group the first overload is returned; calls go through
    /// [`MemberResolver::resolve_call`].
    ///
    /// # Errors
    /// [`Error::MemberNotFound`] when no public member of that name exists in the context.
    pub(crate) fn resolve_access(
        &self,
        ty: &RuntimeTypeRef,
        name: &str,
        is_static: bool,
    ) -> Result<Arc<MemberDescriptor>> {
        let key = GroupKey {
            ty: ty.full_name().to_string(),
            name: name.to_string(),
            is_static,
        };
        if let Some(hit) = self.access.get(&key) {
            return Ok(hit.clone());
        }

        let group = self.group(ty, name, is_static);
        let winner = group
            .iter()
            .min_by_key(|candidate| access_rank(candidate.kind()))
            .cloned()
            .ok_or_else(|| not_found(ty, name))?;
        Ok(self.access.entry(key).or_insert(winner).clone())
    }

    /// Resolves a method call by argument shapes
    ///
    /// # Errors
    /// - [`Error::MemberNotFound`] - No method of that name takes this many arguments
    /// - [`Error::TypeMismatch`] - Methods of this arity exist but none accepts the arguments
    /// - [`Error::AmbiguousMember`] - Two or more overloads fit equally well
    pub(crate) fn resolve_call(
        &self,
        host: &dyn RuntimeHost,
        ty: &RuntimeTypeRef,
        name: &str,
        is_static: bool,
        args: &[HostValue],
    ) -> Result<Arc<MemberDescriptor>> {
        self.resolve_overload(host, ty, name, is_static, MemberKind::Method, args)
    }

    /// Resolves a constructor declared on `ty`
    ///
    /// # Errors
    /// As [`MemberResolver::resolve_call`].
    pub(crate) fn resolve_constructor(
        &self,
        host: &dyn RuntimeHost,
        ty: &RuntimeTypeRef,
        args: &[HostValue],
    ) -> Result<Arc<MemberDescriptor>> {
        self.resolve_overload(host, ty, CONSTRUCTOR, false, MemberKind::Constructor, args)
    }

    /// Resolves an indexed instance property by index argument shapes
    ///
    /// # Errors
    /// As [`MemberResolver::resolve_call`].
    pub(crate) fn resolve_indexer(
        &self,
        host: &dyn RuntimeHost,
        ty: &RuntimeTypeRef,
        name: &str,
        index: &[HostValue],
    ) -> Result<Arc<MemberDescriptor>> {
        self.resolve_overload(host, ty, name, false, MemberKind::Property, index)
    }

    fn resolve_overload(
        &self,
        host: &dyn RuntimeHost,
        ty: &RuntimeTypeRef,
        name: &str,
        is_static: bool,
        kind: MemberKind,
        args: &[HostValue],
    ) -> Result<Arc<MemberDescriptor>> {
        let shapes = args.iter().map(ArgShape::of).collect::<Result<Vec<_>>>()?;
        let key = PickKey {
            group: GroupKey {
                ty: ty.full_name().to_string(),
                name: name.to_string(),
                is_static,
            },
            kind,
            shapes,
        };
        if let Some(hit) = self.picks.get(&key) {
            return Ok(hit.clone());
        }

        let candidates: Vec<Arc<MemberDescriptor>> = self
            .group(ty, name, is_static)
            .iter()
            .filter(|candidate| {
                candidate.kind() == kind
                    && (kind != MemberKind::Property || candidate.is_indexed())
            })
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(not_found(ty, name));
        }

        let picked = pick(host, ty, name, &candidates, &key.shapes)?;
        debug!(
            ty = ty.full_name(),
            member = %picked.signature(),
            arity = key.shapes.len(),
            "overload selected"
        );
        Ok(self.picks.entry(key).or_insert(picked).clone())
    }
}

/// Scores every candidate against `shapes` and returns the single best
fn pick(
    host: &dyn RuntimeHost,
    ty: &RuntimeTypeRef,
    name: &str,
    candidates: &[Arc<MemberDescriptor>],
    shapes: &[ArgShape],
) -> Result<Arc<MemberDescriptor>> {
    let mut arity_matched = Vec::new();
    let mut best: Option<i64> = None;
    let mut winners: Vec<&Arc<MemberDescriptor>> = Vec::new();

    for candidate in candidates {
        let params = candidate.params();
        let expanded = candidate.param_array();
        let arity_ok = match expanded {
            None => shapes.len() == params.len(),
            Some(_) => shapes.len() >= params.len(),
        };
        if !arity_ok {
            continue;
        }
        arity_matched.push(candidate.signature());

        let total = shapes.iter().enumerate().try_fold(0i64, |total, (index, shape)| {
            let sig = params.get(index).or(expanded)?;
            score(host, shape, sig).map(|points| total + i64::from(points))
        });
        let Some(mut total) = total else {
            continue;
        };
        if expanded.is_some() {
            total -= 1;
        }

        match best {
            Some(current) if total < current => {}
            Some(current) if total == current => winners.push(candidate),
            _ => {
                best = Some(total);
                winners.clear();
                winners.push(candidate);
            }
        }
    }

    match winners.as_slice() {
        [winner] => Ok((*winner).clone()),
        [] if arity_matched.is_empty() => Err(not_found(ty, name)),
        [] => Err(Error::TypeMismatch {
            expected: arity_matched.join(" | "),
            found: format!(
                "({})",
                shapes
                    .iter()
                    .map(ArgShape::describe)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }),
        tied => Err(Error::AmbiguousMember {
            type_name: ty.full_name().to_string(),
            member: name.to_string(),
            candidates: tied.iter().map(|candidate| candidate.signature()).collect(),
        }),
    }
}

/// Converts call arguments to the parameter types of `member`.
///
/// Arguments matching an expanded `params` array are passed flattened after the fixed ones.
///
/// # Errors
/// [`Error::TypeMismatch`] when an argument does not convert losslessly.
pub(crate) fn marshal_args(
    session: &Session,
    member: &MemberDescriptor,
    args: &[HostValue],
) -> Result<Vec<ManagedValue>> {
    let params = member.params();
    args.iter()
        .enumerate()
        .map(|(index, arg)| {
            let sig = params
                .get(index)
                .or(member.param_array())
                .ok_or_else(|| Error::MemberNotFound {
                    type_name: member.declaring_type().full_name().to_string(),
                    member: member.name().to_string(),
                })?;
            to_managed_as(session, arg, sig)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::RuntimeConfig,
        runtime::{AssemblyDef, ClrRuntime, ElementType, TypeBuilder, TypeSig},
        BridgeConfig,
    };

    const I4: TypeSig = TypeSig::Primitive(ElementType::I4);
    const I8: TypeSig = TypeSig::Primitive(ElementType::I8);
    const R8: TypeSig = TypeSig::Primitive(ElementType::R8);
    const STRING: TypeSig = TypeSig::Primitive(ElementType::String);

    fn session() -> (Arc<ClrRuntime>, Session) {
        let runtime = ClrRuntime::new(RuntimeConfig::for_testing()).unwrap();
        runtime
            .load(
                AssemblyDef::new("Contoso")
                    .with_type(
                        TypeBuilder::class("Contoso", "Shape")
                            .method("Describe", &[], STRING, |_, _| Ok("shape".into()))
                            .method("Scale", &[I4], I4, |_, args| Ok(args[0].clone()))
                            .build(),
                    )
                    .with_type(
                        TypeBuilder::class("Contoso", "Circle")
                            .extends("Contoso.Shape")
                            .method("Describe", &[], STRING, |_, _| Ok("circle".into()))
                            .method("Scale", &[R8], R8, |_, args| Ok(args[0].clone()))
                            .static_method("Measure", &[I8], STRING, |_, _| Ok("long".into()))
                            .static_method("Measure", &[R8], STRING, |_, _| Ok("double".into()))
                            .static_method("Measure", &[STRING], STRING, |_, _| Ok("text".into()))
                            .build(),
                    ),
            )
            .unwrap();
        let session = Session::new(runtime.clone(), BridgeConfig::default());
        (runtime, session)
    }

    #[test]
    fn test_descriptors_are_shared() {
        let (runtime, session) = session();
        let circle = runtime.resolve_type("Contoso.Circle").unwrap();
        let resolver = session.resolver();
        let a = resolver.resolve_access(&circle, "Describe", false).unwrap();
        let b = resolver.resolve_access(&circle, "Describe", false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.declaring_type().full_name(), "Contoso.Circle");
    }

    #[test]
    fn test_hiding_and_inheritance() {
        let (runtime, session) = session();
        let circle = runtime.resolve_type("Contoso.Circle").unwrap();
        let resolver = session.resolver();

        let describe = resolver.group(&circle, "Describe", false);
        assert_eq!(describe.len(), 1);
        assert_eq!(describe[0].declaring_type().full_name(), "Contoso.Circle");

        let scale = resolver.group(&circle, "Scale", false);
        assert_eq!(scale.len(), 2);

        let to_string = resolver.resolve_access(&circle, "ToString", false).unwrap();
        assert_eq!(to_string.declaring_type().full_name(), "System.Object");
    }

    #[test]
    fn test_overload_scoring() {
        let (runtime, session) = session();
        let circle = runtime.resolve_type("Contoso.Circle").unwrap();
        let resolver = session.resolver();
        let host = session.host();

        let scale = resolver
            .resolve_call(host, &circle, "Scale", false, &[HostValue::Number(2.0)])
            .unwrap();
        assert_eq!(scale.declaring_type().full_name(), "Contoso.Shape");
        let scale = resolver
            .resolve_call(host, &circle, "Scale", false, &[HostValue::Number(2.5)])
            .unwrap();
        assert_eq!(scale.declaring_type().full_name(), "Contoso.Circle");

        let text = resolver
            .resolve_call(host, &circle, "Measure", true, &["x".into()])
            .unwrap();
        assert_eq!(text.signature(), "Measure(System.String)");

        let tie = resolver.resolve_call(host, &circle, "Measure", true, &[HostValue::Number(5.0)]);
        assert!(matches!(tie, Err(Error::AmbiguousMember { candidates, .. }) if candidates.len() == 2));

        let mismatch = resolver.resolve_call(host, &circle, "Measure", true, &[HostValue::Bool(true)]);
        assert!(matches!(mismatch, Err(Error::TypeMismatch { .. })));

        let arity = resolver.resolve_call(host, &circle, "Measure", true, &[]);
        assert!(matches!(arity, Err(Error::MemberNotFound { .. })));
    }

    #[test]
    fn test_params_expansion_penalty() {
        let (runtime, session) = session();
        let string = runtime.resolve_type("System.String").unwrap();
        let resolver = session.resolver();
        let host = session.host();

        let fixed = resolver
            .resolve_call(host, &string, "Format", true, &["{0}".into(), "a".into()])
            .unwrap();
        assert!(fixed.param_array().is_none());

        let args: Vec<HostValue> = vec!["{0}{1}{2}{3}".into(), 1.into(), 2.into(), 3.into(), 4.into()];
        let expanded = resolver
            .resolve_call(host, &string, "Format", true, &args)
            .unwrap();
        assert!(expanded.param_array().is_some());
        assert_eq!(
            marshal_args(&session, &expanded, &args).unwrap().len(),
            5
        );
    }
}
