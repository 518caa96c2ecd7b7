//! Managed type model.
//!
//! A [`RuntimeType`] is the runtime's view of one loaded type: its identity (namespace, name,
//! declaring assembly), its [`TypeFlags`], a lazily linked base type and a table of
//! [`MemberDef`]s. Types are immutable once registered and are shared as [`RuntimeTypeRef`].
//!
//! Member bodies are native closures taking a [`CallContext`] and the already-coerced argument
//! list. Field members carry no body; their storage lives in the object (instance fields) or in
//! the runtime's static storage (static fields).
//!
//! # Naming
//!
//! | Kind | Full name |
//! |------|-----------|
//! | Top-level type | `System.IO.MemoryStream` |
//! | Nested type | `System.Environment+SpecialFolder` |
//! | Assembly-qualified | `System.String, mscorlib, Version=4.0.0.0, ...` |

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use bitflags::bitflags;
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::runtime::{CallContext, ManagedResult, ManagedValue};

/// A reference-counted pointer to a registered type
pub type RuntimeTypeRef = Arc<RuntimeType>;

/// Native implementation of a method, constructor or accessor.
///
/// For instance members the target object is available through [`CallContext::this`]. Property
/// setters receive the index arguments followed by the new value.
pub type NativeMethod =
    Arc<dyn Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync>;

/// Built-in element types with a direct host mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
pub enum ElementType {
    /// `System.Void`
    Void,
    /// `System.Boolean`
    Boolean,
    /// `System.Char`
    Char,
    /// `System.SByte`
    I1,
    /// `System.Byte`
    U1,
    /// `System.Int16`
    I2,
    /// `System.UInt16`
    U2,
    /// `System.Int32`
    I4,
    /// `System.UInt32`
    U4,
    /// `System.Int64`
    I8,
    /// `System.UInt64`
    U8,
    /// `System.Single`
    R4,
    /// `System.Double`
    R8,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
}

impl ElementType {
    /// Returns the full managed type name of this element type
    #[must_use]
    pub fn full_name(self) -> &'static str {
        match self {
            ElementType::Void => "System.Void",
            ElementType::Boolean => "System.Boolean",
            ElementType::Char => "System.Char",
            ElementType::I1 => "System.SByte",
            ElementType::U1 => "System.Byte",
            ElementType::I2 => "System.Int16",
            ElementType::U2 => "System.UInt16",
            ElementType::I4 => "System.Int32",
            ElementType::U4 => "System.UInt32",
            ElementType::I8 => "System.Int64",
            ElementType::U8 => "System.UInt64",
            ElementType::R4 => "System.Single",
            ElementType::R8 => "System.Double",
            ElementType::String => "System.String",
            ElementType::Object => "System.Object",
        }
    }

    /// Maps a full managed type name back to its element type
    ///
    /// ## Arguments
    /// * `name` - Full type name, e.g. `System.Int32`
    #[must_use]
    pub fn from_full_name(name: &str) -> Option<Self> {
        use strum::IntoEnumIterator;
        ElementType::iter().find(|element| element.full_name() == name)
    }

    /// True for the integral element types (excluding `Char` and `Boolean`)
    #[must_use]
    pub fn is_integer(self) -> bool {
        self.integer_range().is_some()
    }

    /// Inclusive value range of an integral element type
    #[must_use]
    pub fn integer_range(self) -> Option<(i128, i128)> {
        match self {
            ElementType::I1 => Some((i8::MIN.into(), i8::MAX.into())),
            ElementType::U1 => Some((0, u8::MAX.into())),
            ElementType::I2 => Some((i16::MIN.into(), i16::MAX.into())),
            ElementType::U2 => Some((0, u16::MAX.into())),
            ElementType::I4 => Some((i32::MIN.into(), i32::MAX.into())),
            ElementType::U4 => Some((0, u32::MAX.into())),
            ElementType::I8 => Some((i64::MIN.into(), i64::MAX.into())),
            ElementType::U8 => Some((0, u64::MAX.into())),
            _ => None,
        }
    }

    /// True for element types that are value types in the managed runtime
    #[must_use]
    pub fn is_value_type(self) -> bool {
        !matches!(
            self,
            ElementType::String | ElementType::Object | ElementType::Void
        )
    }
}

/// A type as it appears in a member signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// One of the built-in element types
    Primitive(ElementType),
    /// A class or value type by full name
    Class(Arc<str>),
    /// A delegate type by full name
    Delegate(Arc<str>),
}

impl TypeSig {
    /// Creates a class signature, normalising `System.Object`, `System.String` and the
    /// primitive value types to their element type
    ///
    /// ## Arguments
    /// * `name` - Full type name
    pub fn class(name: &str) -> Self {
        match ElementType::from_full_name(name) {
            Some(element) => TypeSig::Primitive(element),
            None => TypeSig::Class(Arc::from(name)),
        }
    }

    /// Creates a delegate signature
    ///
    /// ## Arguments
    /// * `name` - Full delegate type name, e.g. `System.Action`
    pub fn delegate(name: &str) -> Self {
        TypeSig::Delegate(Arc::from(name))
    }

    /// Full managed name of the type
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            TypeSig::Primitive(element) => element.full_name(),
            TypeSig::Class(name) | TypeSig::Delegate(name) => name,
        }
    }

    /// Returns the element type for primitive signatures
    #[must_use]
    pub fn element(&self) -> Option<ElementType> {
        match self {
            TypeSig::Primitive(element) => Some(*element),
            _ => None,
        }
    }

    /// True for `System.Void`
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Primitive(ElementType::Void))
    }
}

impl From<ElementType> for TypeSig {
    fn from(element: ElementType) -> Self {
        TypeSig::Primitive(element)
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Type attributes relevant to projection
    pub struct TypeFlags: u32 {
        /// Visible outside the declaring assembly
        const PUBLIC = 0x0001;
        /// Cannot be instantiated
        const ABSTRACT = 0x0002;
        /// Cannot be derived from
        const SEALED = 0x0004;
        /// Value type semantics
        const VALUE_TYPE = 0x0008;
        /// Static class (abstract and sealed, no instances)
        const STATIC = 0x0010;
        /// Declared inside another type
        const NESTED = 0x0020;
        /// Compiler generated or otherwise special name
        const SPECIAL_NAME = 0x0040;
        /// Enumeration
        const ENUM = 0x0080;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Member attributes relevant to resolution and access
    pub struct MemberFlags: u32 {
        /// Publicly accessible
        const PUBLIC = 0x0001;
        /// Static member
        const STATIC = 0x0002;
        /// Field can only be assigned during initialisation
        const INIT_ONLY = 0x0004;
        /// Compile-time constant field
        const LITERAL = 0x0008;
    }
}

/// Kinds of type members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum MemberKind {
    /// Data field
    Field,
    /// Property with optional accessors
    Property,
    /// Method
    Method,
    /// Instance constructor
    Constructor,
    /// Event with add/remove accessors
    Event,
    /// Nested type
    NestedType,
}

/// Implementation of a member
#[derive(Clone)]
pub enum MemberBody {
    /// Field storage, with the initial value for static and literal fields
    Field {
        /// Initial (or constant) value
        initial: Option<ManagedValue>,
    },
    /// Method implementation
    Method(NativeMethod),
    /// Constructor implementation, run against a freshly allocated object
    Constructor(NativeMethod),
    /// Property accessors
    Property {
        /// Getter, receives index arguments
        getter: Option<NativeMethod>,
        /// Setter, receives index arguments followed by the value
        setter: Option<NativeMethod>,
    },
    /// Event accessors, each receiving the handler delegate
    Event {
        /// Adds a handler
        add: NativeMethod,
        /// Removes a handler
        remove: NativeMethod,
    },
    /// Nested type, by full name
    NestedType(Arc<str>),
}

/// A single member of a [`RuntimeType`]
#[derive(Clone)]
pub struct MemberDef {
    /// Member name
    pub name: Arc<str>,
    /// Member kind
    pub kind: MemberKind,
    /// Member attributes
    pub flags: MemberFlags,
    /// Fixed parameter types (index parameters for indexed properties)
    pub params: Vec<TypeSig>,
    /// Element type of a trailing `params` array
    pub param_array: Option<TypeSig>,
    /// Return type, field type, property type, or handler type for events
    pub ty: TypeSig,
    /// Implementation
    pub body: MemberBody,
}

impl MemberDef {
    /// True for static members
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MemberFlags::STATIC)
    }

    /// True for public members
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.flags.contains(MemberFlags::PUBLIC)
    }

    /// True for fields that reject writes
    #[must_use]
    pub fn is_read_only_field(&self) -> bool {
        self.flags
            .intersects(MemberFlags::INIT_ONLY | MemberFlags::LITERAL)
    }

    /// Human readable signature, e.g. `Format(System.String, params System.Object[])`
    #[must_use]
    pub fn signature(&self) -> String {
        let mut params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        if let Some(element) = &self.param_array {
            params.push(format!("params {}[]", element));
        }
        format!("{}({})", self.name, params.join(", "))
    }

    /// True when both members take the same parameter list
    #[must_use]
    pub fn same_parameters(&self, other: &MemberDef) -> bool {
        self.params == other.params && self.param_array == other.param_array
    }
}

impl fmt::Debug for MemberDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .field("signature", &self.signature())
            .field("ty", &self.ty)
            .finish()
    }
}

/// One loaded managed type
pub struct RuntimeType {
    namespace: String,
    name: String,
    full_name: String,
    flags: TypeFlags,
    declaring: Option<String>,
    base_name: Option<String>,
    base: OnceLock<RuntimeTypeRef>,
    assembly: OnceLock<Arc<str>>,
    element: Option<ElementType>,
    members: Vec<MemberDef>,
}

impl RuntimeType {
    pub(crate) fn new(
        namespace: String,
        name: String,
        flags: TypeFlags,
        declaring: Option<String>,
        base_name: Option<String>,
        element: Option<ElementType>,
        members: Vec<MemberDef>,
    ) -> Self {
        let full_name = match &declaring {
            Some(outer) => format!("{}+{}", outer, name),
            None if namespace.is_empty() => name.clone(),
            None => format!("{}.{}", namespace, name),
        };

        RuntimeType {
            namespace,
            name,
            full_name,
            flags,
            declaring,
            base_name,
            base: OnceLock::new(),
            assembly: OnceLock::new(),
            element,
            members,
        }
    }

    /// The namespace (of the outermost declaring type for nested types)
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The simple name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full name, `Namespace.Name` or `Outer+Inner`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// The type attributes
    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    /// Full name of the declaring type for nested types
    pub fn declaring_type(&self) -> Option<&str> {
        self.declaring.as_deref()
    }

    /// Full name of the base type, if any
    pub fn base_name(&self) -> Option<&str> {
        self.base_name.as_deref()
    }

    /// The linked base type; `None` for `System.Object` or before linking
    pub fn base(&self) -> Option<&RuntimeTypeRef> {
        self.base.get()
    }

    pub(crate) fn link_base(&self, base: RuntimeTypeRef) {
        let _ = self.base.set(base);
    }

    pub(crate) fn set_assembly(&self, assembly: Arc<str>) {
        let _ = self.assembly.set(assembly);
    }

    /// Full name of the declaring assembly
    pub fn assembly(&self) -> &str {
        self.assembly.get().map_or("", |name| name)
    }

    /// Assembly-qualified name, e.g. `System.String, mscorlib, Version=4.0.0.0, ...`
    #[must_use]
    pub fn assembly_qualified_name(&self) -> String {
        match self.assembly.get() {
            Some(assembly) => format!("{}, {}", self.full_name, assembly),
            None => self.full_name.clone(),
        }
    }

    /// Element type for the primitive types
    pub fn element_type(&self) -> Option<ElementType> {
        self.element
    }

    /// All members declared on this type (not inherited ones)
    pub fn members(&self) -> &[MemberDef] {
        &self.members
    }

    /// Member by slot index
    pub fn member(&self, slot: usize) -> Option<&MemberDef> {
        self.members.get(slot)
    }

    /// Public type
    pub fn is_public(&self) -> bool {
        self.flags.contains(TypeFlags::PUBLIC)
    }

    /// Abstract or static type, cannot be instantiated
    pub fn is_abstract(&self) -> bool {
        self.flags.intersects(TypeFlags::ABSTRACT | TypeFlags::STATIC)
    }

    /// Value type
    pub fn is_value_type(&self) -> bool {
        self.flags.contains(TypeFlags::VALUE_TYPE)
    }

    /// Nested type
    pub fn is_nested(&self) -> bool {
        self.flags.contains(TypeFlags::NESTED)
    }

    /// Special-name type
    pub fn is_special_name(&self) -> bool {
        self.flags.contains(TypeFlags::SPECIAL_NAME)
    }

    /// Iterates this type followed by its base chain
    pub fn hierarchy(&self) -> Hierarchy<'_> {
        Hierarchy {
            current: Some(self),
        }
    }

    /// True when a value of this type can be assigned to a location of type `name`
    ///
    /// ## Arguments
    /// * `name` - Full name of the target type
    #[must_use]
    pub fn is_assignable_to(&self, name: &str) -> bool {
        name == "System.Object" || self.hierarchy().any(|ty| ty.full_name == name)
    }

    /// Finds the first member with `name` and `kind` that takes no parameters, walking the
    /// base chain
    pub fn find_parameterless(
        &self,
        name: &str,
        kind: MemberKind,
    ) -> Option<(&RuntimeType, &MemberDef)> {
        self.hierarchy().find_map(|ty| {
            ty.members
                .iter()
                .find(|m| {
                    m.kind == kind
                        && &*m.name == name
                        && m.params.is_empty()
                        && m.param_array.is_none()
                })
                .map(|m| (ty, m))
        })
    }
}

impl fmt::Debug for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeType")
            .field("full_name", &self.full_name)
            .field("flags", &self.flags)
            .field("base", &self.base_name)
            .field("members", &self.members.len())
            .finish()
    }
}

/// Iterator over a type and its base types
pub struct Hierarchy<'a> {
    current: Option<&'a RuntimeType>,
}

impl<'a> Iterator for Hierarchy<'a> {
    type Item = &'a RuntimeType;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = current.base().map(|base| &**base);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TypeBuilder;

    #[test]
    fn test_element_names() {
        assert_eq!(ElementType::I4.full_name(), "System.Int32");
        assert_eq!(
            ElementType::from_full_name("System.Double"),
            Some(ElementType::R8)
        );
        assert_eq!(ElementType::from_full_name("System.DateTime"), None);
        assert_eq!(ElementType::U1.integer_range(), Some((0, 255)));
        assert!(!ElementType::R8.is_integer());
    }

    #[test]
    fn test_sig_normalisation() {
        assert_eq!(
            TypeSig::class("System.Object"),
            TypeSig::Primitive(ElementType::Object)
        );
        assert_eq!(
            TypeSig::class("System.DateTime").type_name(),
            "System.DateTime"
        );
    }

    #[test]
    fn test_nested_full_name() {
        let ty = TypeBuilder::enumeration("System", "SpecialFolder")
            .nested_in("System.Environment")
            .build();
        assert_eq!(ty.full_name(), "System.Environment+SpecialFolder");
        assert!(ty.is_nested());
        assert_eq!(ty.namespace(), "System");
    }

    #[test]
    fn test_member_kind_names() {
        assert_eq!(MemberKind::NestedType.to_string(), "nestedType");
        assert_eq!(MemberKind::Property.as_ref(), "property");
    }
}
