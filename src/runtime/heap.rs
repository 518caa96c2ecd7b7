//! Managed heap.
//!
//! This module provides [`ManagedHeap`], the allocator for managed objects, and
//! [`ManagedObject`], the object representation itself.
//!
//! # Object Lifetime
//!
//! Objects are reference counted ([`ObjectRef`] is an `Arc`). There is no tracing
//! collector: an object is released when the last reference held by managed state or by
//! a host handle goes away. The heap keeps a live-object counter that every object
//! decrements on drop, which makes reference release observable for diagnostics.
//!
//! # Field Storage
//!
//! Instance fields of the whole type hierarchy live in one map keyed by field name, guarded
//! by a `RwLock`. Native state that has no managed field representation (a string builder's
//! buffer, a task's completion state) is attached once through [`ManagedObject::set_native`].

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, OnceLock, RwLock,
    },
};

use crate::runtime::{ManagedValue, MemberBody, MemberKind, RuntimeTypeRef};

/// A reference-counted managed object
pub type ObjectRef = Arc<ManagedObject>;

/// A managed object instance
pub struct ManagedObject {
    id: u64,
    ty: RuntimeTypeRef,
    fields: RwLock<HashMap<Arc<str>, ManagedValue>>,
    native: OnceLock<Arc<dyn Any + Send + Sync>>,
    live: Arc<AtomicUsize>,
}

impl ManagedObject {
    /// Heap-unique object id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runtime type of the object
    pub fn ty(&self) -> &RuntimeTypeRef {
        &self.ty
    }

    /// Reads an instance field
    ///
    /// ## Arguments
    /// * `name` - The field name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<ManagedValue> {
        read_lock!(self.fields).get(name).cloned()
    }

    /// Writes an instance field, returning false when the object has no such field
    ///
    /// ## Arguments
    /// * `name`  - The field name
    /// * `value` - The new value
    pub fn set_field(&self, name: &str, value: ManagedValue) -> bool {
        let mut fields = write_lock!(self.fields);
        match fields.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Attaches native state; only the first call has an effect
    ///
    /// ## Arguments
    /// * `state` - The native state
    pub fn set_native<T: Any + Send + Sync>(&self, state: T) -> bool {
        self.native.set(Arc::new(state)).is_ok()
    }

    /// Returns the attached native state if it has type `T`
    pub fn native<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.native.get()?.downcast_ref::<T>()
    }
}

impl Drop for ManagedObject {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObject")
            .field("id", &self.id)
            .field("type", &self.ty.full_name())
            .finish()
    }
}

/// Allocator and bookkeeping for managed objects
#[derive(Debug)]
pub struct ManagedHeap {
    next_id: AtomicU64,
    allocated: AtomicU64,
    live: Arc<AtomicUsize>,
}

impl ManagedHeap {
    /// Creates an empty heap
    #[must_use]
    pub fn new() -> Self {
        ManagedHeap {
            next_id: AtomicU64::new(1),
            allocated: AtomicU64::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Allocates an object of `ty` with every instance field of the hierarchy set to its
    /// default value. No constructor runs.
    ///
    /// ## Arguments
    /// * `ty` - The object's runtime type
    pub fn allocate(&self, ty: &RuntimeTypeRef) -> ObjectRef {
        let mut fields = HashMap::new();
        for level in ty.hierarchy() {
            for member in level.members() {
                if member.kind != MemberKind::Field || member.is_static() {
                    continue;
                }
                let value = match &member.body {
                    MemberBody::Field {
                        initial: Some(initial),
                    } => initial.clone(),
                    _ => ManagedValue::default_for(&member.ty),
                };
                fields.entry(member.name.clone()).or_insert(value);
            }
        }

        self.live.fetch_add(1, Ordering::AcqRel);
        self.allocated.fetch_add(1, Ordering::Relaxed);

        Arc::new(ManagedObject {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            ty: ty.clone(),
            fields: RwLock::new(fields),
            native: OnceLock::new(),
            live: self.live.clone(),
        })
    }

    /// Number of objects currently alive
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Total number of objects ever allocated
    #[must_use]
    pub fn total_allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl Default for ManagedHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::runtime::{ElementType, TypeBuilder};

    fn point_type() -> RuntimeTypeRef {
        Arc::new(
            TypeBuilder::class("Test", "Point")
                .field("X", ElementType::I4)
                .field("Label", ElementType::String)
                .build(),
        )
    }

    #[test]
    fn test_allocate_defaults() {
        let heap = ManagedHeap::new();
        let obj = heap.allocate(&point_type());

        assert_eq!(obj.field("X"), Some(ManagedValue::I4(0)));
        assert_eq!(obj.field("Label"), Some(ManagedValue::Null));
        assert_eq!(obj.field("Missing"), None);
    }

    #[test]
    fn test_set_field() {
        let heap = ManagedHeap::new();
        let obj = heap.allocate(&point_type());

        assert!(obj.set_field("X", ManagedValue::I4(5)));
        assert!(!obj.set_field("Y", ManagedValue::I4(5)));
        assert_eq!(obj.field("X"), Some(ManagedValue::I4(5)));
    }

    #[test]
    fn test_live_tracking() {
        let heap = ManagedHeap::new();
        let ty = point_type();

        let a = heap.allocate(&ty);
        let b = heap.allocate(&ty);
        assert_ne!(a.id(), b.id());
        assert_eq!(heap.live_objects(), 2);

        drop(a);
        assert_eq!(heap.live_objects(), 1);
        drop(b);
        assert_eq!(heap.live_objects(), 0);
        assert_eq!(heap.total_allocated(), 2);
    }

    #[test]
    fn test_native_state() {
        let heap = ManagedHeap::new();
        let obj = heap.allocate(&point_type());

        assert!(obj.set_native(String::from("state")));
        assert!(!obj.set_native(String::from("again")));
        assert_eq!(obj.native::<String>().map(String::as_str), Some("state"));
        assert!(obj.native::<u32>().is_none());
    }
}
