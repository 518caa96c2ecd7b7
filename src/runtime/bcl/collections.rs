//! `System.Collections.ArrayList`.
//!
//! Elements are stored as [`ManagedValue`]s; `Contains` and `IndexOf` compare with value
//! equality for primitives and strings and reference equality for objects.
//!
//! | Member | Description |
//! |--------|-------------|
//! | `.ctor()` | Empty list |
//! | `Add(Object)` | Appends, returns the index |
//! | `Insert(Int32, Object)` | Inserts at an index |
//! | `Item[Int32]` | Indexer |
//! | `Count` | Number of elements |
//! | `Contains(Object)`, `IndexOf(Object)` | Search |
//! | `RemoveAt(Int32)`, `Clear()` | Removal |

use std::sync::RwLock;

use crate::runtime::{
    bcl::{BOOL, I4, OBJECT, VOID},
    ArgsExt, AssemblyDef, CallContext, ManagedResult, ManagedValue, TypeBuilder,
};

#[derive(Default)]
struct ArrayListState {
    items: RwLock<Vec<ManagedValue>>,
}

fn index_arg(ctx: &CallContext<'_>, args: &[ManagedValue], len: usize) -> ManagedResult<usize> {
    usize::try_from(args.i32_at(0)?)
        .ok()
        .filter(|index| *index < len)
        .ok_or_else(|| {
            ctx.throw(
                "System.ArgumentOutOfRangeException",
                "Index was out of range. Must be non-negative and less than the size of the collection. (Parameter 'index')",
            )
        })
}

fn count(len: usize) -> ManagedValue {
    ManagedValue::I4(i32::try_from(len).unwrap_or(i32::MAX))
}

pub(crate) fn register(asm: &mut AssemblyDef) {
    let ty = TypeBuilder::class("System.Collections", "ArrayList")
        .constructor(&[], |ctx, _| {
            ctx.this()?.set_native(ArrayListState::default());
            Ok(ManagedValue::Void)
        })
        .method("Add", &[OBJECT], I4, |ctx, args| {
            let state = ctx.native::<ArrayListState>()?;
            let value = args.value_at(0).clone();
            let index = with_write!(state.items, |items: &mut Vec<ManagedValue>| {
                items.push(value);
                items.len() - 1
            });
            Ok(count(index))
        })
        .method("Insert", &[I4, OBJECT], VOID, |ctx, args| {
            let state = ctx.native::<ArrayListState>()?;
            let mut items = write_lock!(state.items);
            let len = items.len();
            let index = index_arg(ctx, args, len + 1)?;
            items.insert(index, args.value_at(1).clone());
            Ok(ManagedValue::Void)
        })
        .property("Count", I4, |ctx, _| {
            let state = ctx.native::<ArrayListState>()?;
            Ok(count(with_read!(state.items, |items: &Vec<ManagedValue>| items.len())))
        })
        .indexer(
            "Item",
            &[I4],
            OBJECT,
            |ctx, args| {
                let state = ctx.native::<ArrayListState>()?;
                let items = read_lock!(state.items);
                let index = index_arg(ctx, args, items.len())?;
                Ok(items[index].clone())
            },
            |ctx, args| {
                let state = ctx.native::<ArrayListState>()?;
                let mut items = write_lock!(state.items);
                let index = index_arg(ctx, args, items.len())?;
                items[index] = args.value_at(1).clone();
                Ok(ManagedValue::Void)
            },
        )
        .method("Contains", &[OBJECT], BOOL, |ctx, args| {
            let state = ctx.native::<ArrayListState>()?;
            let needle = args.value_at(0);
            Ok(with_read!(state.items, |items: &Vec<ManagedValue>| items.contains(needle)).into())
        })
        .method("IndexOf", &[OBJECT], I4, |ctx, args| {
            let state = ctx.native::<ArrayListState>()?;
            let needle = args.value_at(0);
            let position = with_read!(state.items, |items: &Vec<ManagedValue>| {
                items.iter().position(|item| item == needle)
            });
            Ok(position.map_or(ManagedValue::I4(-1), count))
        })
        .method("RemoveAt", &[I4], VOID, |ctx, args| {
            let state = ctx.native::<ArrayListState>()?;
            let mut items = write_lock!(state.items);
            let index = index_arg(ctx, args, items.len())?;
            items.remove(index);
            Ok(ManagedValue::Void)
        })
        .method("Clear", &[], VOID, |ctx, _| {
            let state = ctx.native::<ArrayListState>()?;
            with_write!(state.items, |items: &mut Vec<ManagedValue>| items.clear());
            Ok(ManagedValue::Void)
        })
        .build();
    asm.add(ty);
}
