//! Builder for managed type definitions.
//!
//! This module provides the [`TypeBuilder`] struct, a fluent API for declaring managed types
//! together with their members and native member bodies. The base class library and custom
//! assemblies are both defined through it.
//!
//! # Example
//!
//! ```rust
//! use dotbridge::runtime::{ArgsExt, ElementType, ManagedValue, TypeBuilder};
//!
//! let point = TypeBuilder::class("Contoso.Geometry", "Point")
//!     .field("X", ElementType::I4)
//!     .field("Y", ElementType::I4)
//!     .constructor(&[ElementType::I4.into(), ElementType::I4.into()], |ctx, args| {
//!         let this = ctx.this()?;
//!         this.set_field("X", ManagedValue::I4(args.i32_at(0)?));
//!         this.set_field("Y", ManagedValue::I4(args.i32_at(1)?));
//!         Ok(ManagedValue::Void)
//!     })
//!     .build();
//!
//! assert_eq!(point.full_name(), "Contoso.Geometry.Point");
//! ```

use std::sync::Arc;

use crate::runtime::{
    CallContext, ElementType, ManagedResult, ManagedValue, MemberBody, MemberDef, MemberFlags,
    MemberKind, NativeMethod, RuntimeType, TypeFlags, TypeSig,
};

/// Provides a fluent API for building type definitions
pub struct TypeBuilder {
    namespace: String,
    name: String,
    flags: TypeFlags,
    declaring: Option<String>,
    base: Option<String>,
    element: Option<ElementType>,
    members: Vec<MemberDef>,
}

fn native<F>(body: F) -> NativeMethod
where
    F: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
{
    Arc::new(body)
}

impl TypeBuilder {
    fn new(namespace: &str, name: &str, flags: TypeFlags, base: Option<&str>) -> Self {
        TypeBuilder {
            namespace: namespace.to_string(),
            name: name.to_string(),
            flags: flags | TypeFlags::PUBLIC,
            declaring: None,
            base: base.map(str::to_string),
            element: None,
            members: Vec::new(),
        }
    }

    /// Start building a public class deriving from `System.Object`
    ///
    /// ## Arguments
    /// * `namespace` - Namespace of the class
    /// * `name`      - Simple name of the class
    pub fn class(namespace: &str, name: &str) -> Self {
        TypeBuilder::new(namespace, name, TypeFlags::empty(), Some("System.Object"))
    }

    /// Start building a sealed value type deriving from `System.ValueType`
    ///
    /// ## Arguments
    /// * `namespace` - Namespace of the type
    /// * `name`      - Simple name of the type
    pub fn value_type(namespace: &str, name: &str) -> Self {
        TypeBuilder::new(
            namespace,
            name,
            TypeFlags::VALUE_TYPE | TypeFlags::SEALED,
            Some("System.ValueType"),
        )
    }

    /// Start building a static class (no instances, static members only)
    ///
    /// ## Arguments
    /// * `namespace` - Namespace of the class
    /// * `name`      - Simple name of the class
    pub fn static_class(namespace: &str, name: &str) -> Self {
        TypeBuilder::new(
            namespace,
            name,
            TypeFlags::STATIC | TypeFlags::ABSTRACT | TypeFlags::SEALED,
            Some("System.Object"),
        )
    }

    /// Start building an enumeration; values are added with [`TypeBuilder::constant`]
    ///
    /// ## Arguments
    /// * `namespace` - Namespace of the enum
    /// * `name`      - Simple name of the enum
    pub fn enumeration(namespace: &str, name: &str) -> Self {
        TypeBuilder::new(
            namespace,
            name,
            TypeFlags::VALUE_TYPE | TypeFlags::SEALED | TypeFlags::ENUM,
            Some("System.Enum"),
        )
    }

    /// Start building `System.Object`, the root of the hierarchy
    pub fn root() -> Self {
        TypeBuilder::new("System", "Object", TypeFlags::empty(), None)
    }

    /// Set the base type
    ///
    /// ## Arguments
    /// * `base` - Full name of the base type
    #[must_use]
    pub fn extends(mut self, base: &str) -> Self {
        self.base = Some(base.to_string());
        self
    }

    /// Declare the type as nested inside `declaring`
    ///
    /// ## Arguments
    /// * `declaring` - Full name of the enclosing type
    #[must_use]
    pub fn nested_in(mut self, declaring: &str) -> Self {
        self.declaring = Some(declaring.to_string());
        self.flags |= TypeFlags::NESTED;
        self
    }

    /// Mark the type abstract
    #[must_use]
    pub fn abstract_type(mut self) -> Self {
        self.flags |= TypeFlags::ABSTRACT;
        self
    }

    /// Mark the type sealed
    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.flags |= TypeFlags::SEALED;
        self
    }

    /// Hide the type from everything outside its assembly
    #[must_use]
    pub fn non_public(mut self) -> Self {
        self.flags.remove(TypeFlags::PUBLIC);
        self
    }

    /// Mark the type as compiler generated
    #[must_use]
    pub fn special_name(mut self) -> Self {
        self.flags |= TypeFlags::SPECIAL_NAME;
        self
    }

    /// Associate a primitive element type
    #[must_use]
    pub fn primitive(mut self, element: ElementType) -> Self {
        self.element = Some(element);
        self
    }

    fn push(
        mut self,
        name: &str,
        kind: MemberKind,
        flags: MemberFlags,
        params: &[TypeSig],
        ty: TypeSig,
        body: MemberBody,
    ) -> Self {
        self.members.push(MemberDef {
            name: Arc::from(name),
            kind,
            flags,
            params: params.to_vec(),
            param_array: None,
            ty,
            body,
        });
        self
    }

    /// Add a public, writable instance field
    #[must_use]
    pub fn field(self, name: &str, ty: impl Into<TypeSig>) -> Self {
        self.push(
            name,
            MemberKind::Field,
            MemberFlags::PUBLIC,
            &[],
            ty.into(),
            MemberBody::Field { initial: None },
        )
    }

    /// Add a non-public instance field, invisible to the bridge
    #[must_use]
    pub fn private_field(self, name: &str, ty: impl Into<TypeSig>) -> Self {
        self.push(
            name,
            MemberKind::Field,
            MemberFlags::empty(),
            &[],
            ty.into(),
            MemberBody::Field { initial: None },
        )
    }

    /// Add a public, init-only instance field
    #[must_use]
    pub fn readonly_instance_field(self, name: &str, ty: impl Into<TypeSig>) -> Self {
        self.push(
            name,
            MemberKind::Field,
            MemberFlags::PUBLIC | MemberFlags::INIT_ONLY,
            &[],
            ty.into(),
            MemberBody::Field { initial: None },
        )
    }

    /// Add a public, writable static field
    #[must_use]
    pub fn static_field(self, name: &str, ty: impl Into<TypeSig>, initial: ManagedValue) -> Self {
        self.push(
            name,
            MemberKind::Field,
            MemberFlags::PUBLIC | MemberFlags::STATIC,
            &[],
            ty.into(),
            MemberBody::Field {
                initial: Some(initial),
            },
        )
    }

    /// Add a public, init-only static field
    #[must_use]
    pub fn readonly_field(self, name: &str, ty: impl Into<TypeSig>, initial: ManagedValue) -> Self {
        self.push(
            name,
            MemberKind::Field,
            MemberFlags::PUBLIC | MemberFlags::STATIC | MemberFlags::INIT_ONLY,
            &[],
            ty.into(),
            MemberBody::Field {
                initial: Some(initial),
            },
        )
    }

    /// Add a public literal (constant); enumeration values use this too
    #[must_use]
    pub fn constant(self, name: &str, ty: impl Into<TypeSig>, value: ManagedValue) -> Self {
        self.push(
            name,
            MemberKind::Field,
            MemberFlags::PUBLIC | MemberFlags::STATIC | MemberFlags::LITERAL,
            &[],
            ty.into(),
            MemberBody::Field {
                initial: Some(value),
            },
        )
    }

    /// Add a public constructor
    #[must_use]
    pub fn constructor<F>(self, params: &[TypeSig], body: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
    {
        self.push(
            ".ctor",
            MemberKind::Constructor,
            MemberFlags::PUBLIC,
            params,
            ElementType::Void.into(),
            MemberBody::Constructor(native(body)),
        )
    }

    /// Add a non-public constructor, used by abstract types
    #[must_use]
    pub fn protected_constructor<F>(self, body: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
    {
        self.push(
            ".ctor",
            MemberKind::Constructor,
            MemberFlags::empty(),
            &[],
            ElementType::Void.into(),
            MemberBody::Constructor(native(body)),
        )
    }

    /// Add a public instance method
    #[must_use]
    pub fn method<F>(self, name: &str, params: &[TypeSig], ret: impl Into<TypeSig>, body: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
    {
        self.push(
            name,
            MemberKind::Method,
            MemberFlags::PUBLIC,
            params,
            ret.into(),
            MemberBody::Method(native(body)),
        )
    }

    /// Add a public static method
    #[must_use]
    pub fn static_method<F>(
        self,
        name: &str,
        params: &[TypeSig],
        ret: impl Into<TypeSig>,
        body: F,
    ) -> Self
    where
        F: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
    {
        self.push(
            name,
            MemberKind::Method,
            MemberFlags::PUBLIC | MemberFlags::STATIC,
            params,
            ret.into(),
            MemberBody::Method(native(body)),
        )
    }

    /// Turn the most recently added method or constructor into a `params` method whose
    /// trailing arguments are all of type `element`
    #[must_use]
    pub fn params(mut self, element: impl Into<TypeSig>) -> Self {
        if let Some(last) = self.members.last_mut() {
            last.param_array = Some(element.into());
        }
        self
    }

    fn accessor_property(
        self,
        name: &str,
        flags: MemberFlags,
        index: &[TypeSig],
        ty: TypeSig,
        getter: Option<NativeMethod>,
        setter: Option<NativeMethod>,
    ) -> Self {
        self.push(
            name,
            MemberKind::Property,
            flags,
            index,
            ty,
            MemberBody::Property { getter, setter },
        )
    }

    /// Add a public read-only instance property
    #[must_use]
    pub fn property<G>(self, name: &str, ty: impl Into<TypeSig>, getter: G) -> Self
    where
        G: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
    {
        self.accessor_property(
            name,
            MemberFlags::PUBLIC,
            &[],
            ty.into(),
            Some(native(getter)),
            None,
        )
    }

    /// Add a public read-write instance property
    #[must_use]
    pub fn property_rw<G, S>(self, name: &str, ty: impl Into<TypeSig>, getter: G, setter: S) -> Self
    where
        G: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
        S: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
    {
        self.accessor_property(
            name,
            MemberFlags::PUBLIC,
            &[],
            ty.into(),
            Some(native(getter)),
            Some(native(setter)),
        )
    }

    /// Add a public read-only static property
    #[must_use]
    pub fn static_property<G>(self, name: &str, ty: impl Into<TypeSig>, getter: G) -> Self
    where
        G: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
    {
        self.accessor_property(
            name,
            MemberFlags::PUBLIC | MemberFlags::STATIC,
            &[],
            ty.into(),
            Some(native(getter)),
            None,
        )
    }

    /// Add a public read-write static property
    #[must_use]
    pub fn static_property_rw<G, S>(
        self,
        name: &str,
        ty: impl Into<TypeSig>,
        getter: G,
        setter: S,
    ) -> Self
    where
        G: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
        S: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
    {
        self.accessor_property(
            name,
            MemberFlags::PUBLIC | MemberFlags::STATIC,
            &[],
            ty.into(),
            Some(native(getter)),
            Some(native(setter)),
        )
    }

    /// Add a public indexed instance property (an indexer, conventionally named `Item`)
    #[must_use]
    pub fn indexer<G, S>(
        self,
        name: &str,
        index: &[TypeSig],
        ty: impl Into<TypeSig>,
        getter: G,
        setter: S,
    ) -> Self
    where
        G: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
        S: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
    {
        self.accessor_property(
            name,
            MemberFlags::PUBLIC,
            index,
            ty.into(),
            Some(native(getter)),
            Some(native(setter)),
        )
    }

    /// Add a public instance event
    #[must_use]
    pub fn event<A, R>(self, name: &str, handler: TypeSig, add: A, remove: R) -> Self
    where
        A: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
        R: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
    {
        self.push(
            name,
            MemberKind::Event,
            MemberFlags::PUBLIC,
            &[],
            handler,
            MemberBody::Event {
                add: native(add),
                remove: native(remove),
            },
        )
    }

    /// Add a public static event
    #[must_use]
    pub fn static_event<A, R>(self, name: &str, handler: TypeSig, add: A, remove: R) -> Self
    where
        A: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
        R: Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
    {
        self.push(
            name,
            MemberKind::Event,
            MemberFlags::PUBLIC | MemberFlags::STATIC,
            &[],
            handler,
            MemberBody::Event {
                add: native(add),
                remove: native(remove),
            },
        )
    }

    /// Add a public nested type member
    ///
    /// ## Arguments
    /// * `name`      - Simple name of the nested type
    /// * `full_name` - Full name of the nested type, `Outer+Inner`
    #[must_use]
    pub fn nested(self, name: &str, full_name: &str) -> Self {
        let sig = TypeSig::class(full_name);
        self.push(
            name,
            MemberKind::NestedType,
            MemberFlags::PUBLIC | MemberFlags::STATIC,
            &[],
            sig,
            MemberBody::NestedType(Arc::from(full_name)),
        )
    }

    /// Finish the type
    #[must_use]
    pub fn build(self) -> RuntimeType {
        RuntimeType::new(
            self.namespace,
            self.name,
            self.flags,
            self.declaring,
            self.base,
            self.element,
            self.members,
        )
    }
}
