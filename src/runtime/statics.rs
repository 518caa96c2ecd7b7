//! Static field storage.
//!
//! This module provides [`StaticFieldStorage`] for static (type-level) fields. Static fields
//! are shared by all users of a type and persist for the lifetime of the runtime.
//!
//! # Type Initialization
//!
//! A type's statics are initialised on first static access: every static field declared by
//! the type receives its declared initial value (or the default for its type). The storage
//! tracks which types have been initialised via
//! [`is_type_initialized`](StaticFieldStorage::is_type_initialized) and
//! [`ensure_initialized`](StaticFieldStorage::ensure_initialized).
//!
//! # Thread Safety
//!
//! Fields and initialisation markers live in `DashMap`s, so concurrent access from the host
//! thread and pool threads needs no external locking.

use dashmap::{DashMap, DashSet};

use crate::runtime::{ManagedValue, MemberBody, MemberKind, RuntimeType};

/// Storage for static fields, keyed by declaring type and field name.
///
/// # Example
///
/// ```rust
/// use dotbridge::runtime::{StaticFieldStorage, ManagedValue};
///
/// let storage = StaticFieldStorage::new();
/// storage.set("Contoso.Counter", "Count", ManagedValue::I4(42));
/// assert_eq!(storage.get("Contoso.Counter", "Count"), Some(ManagedValue::I4(42)));
/// ```
#[derive(Debug, Default)]
pub struct StaticFieldStorage {
    fields: DashMap<(String, String), ManagedValue>,
    initialized_types: DashSet<String>,
}

impl StaticFieldStorage {
    /// Creates new empty static field storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a static field value.
    ///
    /// # Arguments
    ///
    /// * `type_name` - Full name of the declaring type
    /// * `field` - The field name
    #[must_use]
    pub fn get(&self, type_name: &str, field: &str) -> Option<ManagedValue> {
        self.fields
            .get(&(type_name.to_string(), field.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Sets a static field value, replacing any previous value.
    ///
    /// # Arguments
    ///
    /// * `type_name` - Full name of the declaring type
    /// * `field` - The field name
    /// * `value` - The value to store
    pub fn set(&self, type_name: &str, field: &str, value: ManagedValue) {
        self.fields
            .insert((type_name.to_string(), field.to_string()), value);
    }

    /// Returns true if a static field has a value.
    #[must_use]
    pub fn contains(&self, type_name: &str, field: &str) -> bool {
        self.fields
            .contains_key(&(type_name.to_string(), field.to_string()))
    }

    /// Checks whether a type's statics have been initialised.
    #[must_use]
    pub fn is_type_initialized(&self, type_name: &str) -> bool {
        self.initialized_types.contains(type_name)
    }

    /// Initialises the static fields declared by `ty`, once.
    ///
    /// The first caller to mark the type wins; initial values never overwrite values
    /// written afterwards.
    ///
    /// # Arguments
    ///
    /// * `ty` - The type whose statics to initialise
    pub fn ensure_initialized(&self, ty: &RuntimeType) {
        if self.initialized_types.contains(ty.full_name()) {
            return;
        }
        if !self.initialized_types.insert(ty.full_name().to_string()) {
            return;
        }

        for member in ty.members() {
            if member.kind != MemberKind::Field || !member.is_static() {
                continue;
            }
            let value = match &member.body {
                MemberBody::Field {
                    initial: Some(initial),
                } => initial.clone(),
                _ => ManagedValue::default_for(&member.ty),
            };
            self.fields
                .entry((ty.full_name().to_string(), member.name.to_string()))
                .or_insert(value);
        }
    }

    /// Returns the number of stored static fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no static fields are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ElementType, TypeBuilder};

    #[test]
    fn test_static_storage_basic() {
        let storage = StaticFieldStorage::new();
        assert!(storage.is_empty());

        storage.set("T", "A", ManagedValue::I4(42));
        assert!(storage.contains("T", "A"));
        assert!(!storage.contains("T", "B"));
        assert_eq!(storage.get("T", "A"), Some(ManagedValue::I4(42)));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_static_storage_overwrite() {
        let storage = StaticFieldStorage::new();
        storage.set("T", "A", ManagedValue::I4(1));
        storage.set("T", "A", ManagedValue::I4(2));
        assert_eq!(storage.get("T", "A"), Some(ManagedValue::I4(2)));
    }

    #[test]
    fn test_type_initialization() {
        let ty = TypeBuilder::class("Test", "Counter")
            .static_field("Count", ElementType::I4, ManagedValue::I4(10))
            .readonly_field("Name", ElementType::String, ManagedValue::from("counter"))
            .build();

        let storage = StaticFieldStorage::new();
        assert!(!storage.is_type_initialized("Test.Counter"));

        storage.ensure_initialized(&ty);
        assert!(storage.is_type_initialized("Test.Counter"));
        assert_eq!(
            storage.get("Test.Counter", "Count"),
            Some(ManagedValue::I4(10))
        );
        assert_eq!(
            storage.get("Test.Counter", "Name"),
            Some(ManagedValue::from("counter"))
        );

        storage.set("Test.Counter", "Count", ManagedValue::I4(11));
        storage.ensure_initialized(&ty);
        assert_eq!(
            storage.get("Test.Counter", "Count"),
            Some(ManagedValue::I4(11))
        );
    }
}
