use std::{fmt, sync::Arc};

use bitflags::bitflags;

use crate::runtime::{MemberBody, MemberDef, MemberKind, RuntimeTypeRef, TypeSig};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// How a member may be accessed as a value
    pub struct MemberAccess: u8 {
        /// The member can be read
        const READ = 0x01;
        /// The member can be written
        const WRITE = 0x02;
    }
}

/// A resolved managed member.
///
/// Descriptors are produced by the resolver and cached for the lifetime of a session: asking
/// for the same member twice hands back the same `Arc<MemberDescriptor>`. A descriptor
/// identifies its member by declaring type and slot, so runtime adapters reach the definition
/// without repeating the lookup.
pub struct MemberDescriptor {
    declaring: RuntimeTypeRef,
    slot: usize,
    access: MemberAccess,
}

impl MemberDescriptor {
    /// Returns `None` when `slot` is out of range for `declaring`
    pub(crate) fn new(declaring: RuntimeTypeRef, slot: usize) -> Option<Arc<Self>> {
        let def = declaring.member(slot)?;
        let access = match (&def.kind, &def.body) {
            (MemberKind::Field, _) if def.is_read_only_field() => MemberAccess::READ,
            (MemberKind::Field, _) => MemberAccess::READ | MemberAccess::WRITE,
            (MemberKind::Property, MemberBody::Property { getter, setter }) => {
                let mut access = MemberAccess::empty();
                access.set(MemberAccess::READ, getter.is_some());
                access.set(MemberAccess::WRITE, setter.is_some());
                access
            }
            (MemberKind::Method | MemberKind::NestedType, _) => MemberAccess::READ,
            _ => MemberAccess::empty(),
        };

        Some(Arc::new(MemberDescriptor {
            declaring,
            slot,
            access,
        }))
    }

    /// The type declaring the member
    pub fn declaring_type(&self) -> &RuntimeTypeRef {
        &self.declaring
    }

    /// Slot of the member in its declaring type
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The member definition
    pub fn definition(&self) -> &MemberDef {
        &self.declaring.members()[self.slot]
    }

    /// Member name
    pub fn name(&self) -> &str {
        &self.definition().name
    }

    /// Member kind
    pub fn kind(&self) -> MemberKind {
        self.definition().kind
    }

    /// True for static members
    pub fn is_static(&self) -> bool {
        self.definition().is_static()
    }

    /// Fixed parameter types; index types for indexers
    pub fn params(&self) -> &[TypeSig] {
        &self.definition().params
    }

    /// Element type of a trailing `params` array
    pub fn param_array(&self) -> Option<&TypeSig> {
        self.definition().param_array.as_ref()
    }

    /// Return, field, property or handler type
    pub fn ty(&self) -> &TypeSig {
        &self.definition().ty
    }

    /// Read/write access
    pub fn access(&self) -> MemberAccess {
        self.access
    }

    /// True for readable members
    pub fn can_read(&self) -> bool {
        self.access.contains(MemberAccess::READ)
    }

    /// True for writable members
    pub fn can_write(&self) -> bool {
        self.access.contains(MemberAccess::WRITE)
    }

    /// True for properties taking index arguments
    pub fn is_indexed(&self) -> bool {
        self.kind() == MemberKind::Property && !self.params().is_empty()
    }

    /// Full name of the nested type this member names
    pub fn nested_type(&self) -> Option<&str> {
        match &self.definition().body {
            MemberBody::NestedType(full_name) => Some(full_name),
            _ => None,
        }
    }

    /// Signature, e.g. `Format(System.String, params System.Object[])`
    pub fn signature(&self) -> String {
        self.definition().signature()
    }
}

impl fmt::Debug for MemberDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberDescriptor")
            .field("declaring", &self.declaring.full_name())
            .field("slot", &self.slot)
            .field("kind", &self.kind())
            .field("signature", &self.signature())
            .field("access", &self.access)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::runtime::{ElementType, ManagedValue, TypeBuilder};

    #[test]
    fn test_access_flags() {
        let int = TypeSig::Primitive(ElementType::I4);
        let ty = Arc::new(
            TypeBuilder::class("Contoso", "Widget")
                .field("Size", int.clone())
                .constant("Max", int.clone(), ManagedValue::I4(10))
                .property("Name", TypeSig::Primitive(ElementType::String), |_, _| {
                    Ok(ManagedValue::Null)
                })
                .indexer(
                    "Item",
                    &[int.clone()],
                    int,
                    |_, _| Ok(ManagedValue::I4(0)),
                    |_, _| Ok(ManagedValue::Void),
                )
                .build(),
        );

        let size = MemberDescriptor::new(ty.clone(), 0).unwrap();
        assert!(size.can_read() && size.can_write());
        assert_eq!(size.name(), "Size");

        let max = MemberDescriptor::new(ty.clone(), 1).unwrap();
        assert_eq!(max.access(), MemberAccess::READ);
        assert!(max.is_static());

        let name = MemberDescriptor::new(ty.clone(), 2).unwrap();
        assert!(name.can_read() && !name.can_write());
        assert!(!name.is_indexed());

        let item = MemberDescriptor::new(ty.clone(), 3).unwrap();
        assert!(item.is_indexed());
        assert_eq!(item.signature(), "Item(System.Int32)");

        assert!(MemberDescriptor::new(ty, 4).is_none());
    }
}
