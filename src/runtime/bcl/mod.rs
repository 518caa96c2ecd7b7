//! Base class library of the reference runtime.
//!
//! Each submodule contributes a group of types to an [`AssemblyDef`] through a `register`
//! function, the way the assemblies of the real framework group their namespaces. The
//! assembly factories at this level put the groups together.
//!
//! # Assemblies
//!
//! | Assembly | Contents | Preloaded |
//! |----------|----------|-----------|
//! | `mscorlib` | `System`, `System.IO`, `System.Text`, `System.Collections`, `System.Threading`, `System.Threading.Tasks`, `System.Reflection` | yes |
//! | `System` | `System.IO.Ports` | yes |
//! | `System.Data` | `System.Data` | no |
//!
//! # Submodules
//!
//! - `object` - `Object`, `ValueType`, `Enum`, `Type`, delegates, primitives, `Math`, `Environment`
//! - `console` - `Console` and its output sink
//! - `string` - `String` and composite formatting
//! - `text` - `StringBuilder`
//! - `datetime` - `DateTime`
//! - `exception` - The exception hierarchy
//! - `appdomain` - `AppDomain`, `AssemblyLoad`, `System.Reflection.Assembly`
//! - `collections` - `ArrayList`
//! - `io` - `Stream`, `MemoryStream`, `Path`, `File`
//! - `tasks` - `Task`, `TaskStatus`, `Thread`
//! - `ports` - `SerialPort` and friends
//! - `data` - `DataTable`, `ConnectionState`

use std::sync::Arc;

use crate::runtime::{AssemblyDef, AssemblyFactory, ElementType, TypeSig};

mod appdomain;
mod collections;
mod console;
mod data;
mod datetime;
mod exception;
mod io;
mod object;
mod ports;
mod string;
mod tasks;
mod text;

pub use appdomain::AppDomainState;
pub use console::ConsoleState;
pub use tasks::{TaskState, TaskStatus};

pub(crate) use appdomain::assembly_load_args;
pub(crate) use string::{format_composite, format_double};

pub(crate) const VOID: TypeSig = TypeSig::Primitive(ElementType::Void);
pub(crate) const BOOL: TypeSig = TypeSig::Primitive(ElementType::Boolean);
pub(crate) const CHAR: TypeSig = TypeSig::Primitive(ElementType::Char);
pub(crate) const U1: TypeSig = TypeSig::Primitive(ElementType::U1);
pub(crate) const I4: TypeSig = TypeSig::Primitive(ElementType::I4);
pub(crate) const I8: TypeSig = TypeSig::Primitive(ElementType::I8);
pub(crate) const R8: TypeSig = TypeSig::Primitive(ElementType::R8);
pub(crate) const STRING: TypeSig = TypeSig::Primitive(ElementType::String);
pub(crate) const OBJECT: TypeSig = TypeSig::Primitive(ElementType::Object);

const FRAMEWORK_TOKEN: &str = "b77a5c561934e089";

/// `mscorlib`, the core library
#[must_use]
pub fn mscorlib() -> AssemblyDef {
    let mut asm = AssemblyDef::new("mscorlib")
        .version(4, 0, 0, 0)
        .public_key_token(FRAMEWORK_TOKEN);

    object::register(&mut asm);
    string::register(&mut asm);
    text::register(&mut asm);
    console::register(&mut asm);
    datetime::register(&mut asm);
    exception::register(&mut asm);
    appdomain::register(&mut asm);
    collections::register(&mut asm);
    io::register(&mut asm);
    tasks::register(&mut asm);
    asm
}

/// `System`, home of `System.IO.Ports`
#[must_use]
pub fn system() -> AssemblyDef {
    let mut asm = AssemblyDef::new("System")
        .version(4, 0, 0, 0)
        .public_key_token(FRAMEWORK_TOKEN);
    ports::register(&mut asm);
    asm
}

/// `System.Data`, loaded on demand
#[must_use]
pub fn system_data() -> AssemblyDef {
    let mut asm = AssemblyDef::new("System.Data")
        .version(4, 0, 0, 0)
        .public_key_token(FRAMEWORK_TOKEN);
    data::register(&mut asm);
    asm
}

/// The importable framework assemblies, by simple name
#[must_use]
pub fn catalog() -> Vec<(&'static str, AssemblyFactory)> {
    vec![
        ("mscorlib", Arc::new(mscorlib) as AssemblyFactory),
        ("System", Arc::new(system) as AssemblyFactory),
        ("System.Data", Arc::new(system_data) as AssemblyFactory),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::{
        config::RuntimeConfig,
        runtime::{
            CallContext, ClrRuntime, ManagedResult, ManagedValue, MemberBody, MemberKind,
            ObjectRef, TypeSig,
        },
    };

    pub(crate) fn runtime() -> Arc<ClrRuntime> {
        ClrRuntime::new(RuntimeConfig::for_testing()).unwrap()
    }

    pub(crate) fn call_static(
        runtime: &ClrRuntime,
        ty: &str,
        name: &str,
        params: &[TypeSig],
        args: &[ManagedValue],
    ) -> ManagedResult {
        let ty = runtime.registry().get(ty).unwrap();
        let member = ty
            .members()
            .iter()
            .find(|m| {
                m.kind == MemberKind::Method && m.is_static() && &*m.name == name && m.params == params
            })
            .unwrap();
        match &member.body {
            MemberBody::Method(body) => body(&CallContext::new(runtime, &ty, member, None), args),
            _ => unreachable!(),
        }
    }

    pub(crate) fn construct(
        runtime: &ClrRuntime,
        ty: &str,
        params: &[TypeSig],
        args: &[ManagedValue],
    ) -> ManagedResult<ObjectRef> {
        let ty = runtime.registry().get(ty).unwrap();
        let object = runtime.heap().allocate(&ty);
        let member = ty
            .members()
            .iter()
            .find(|m| m.kind == MemberKind::Constructor && m.params == params)
            .unwrap();
        match &member.body {
            MemberBody::Constructor(body) => {
                body(&CallContext::new(runtime, &ty, member, Some(&object)), args)?;
            }
            _ => unreachable!(),
        }
        Ok(object)
    }

    pub(crate) fn static_value(runtime: &ClrRuntime, ty: &str, name: &str) -> ManagedValue {
        let ty = runtime.registry().get(ty).unwrap();
        runtime.statics().ensure_initialized(&ty);
        runtime.statics().get(ty.full_name(), name).unwrap()
    }

    fn property(
        runtime: &ClrRuntime,
        ty: &str,
        target: Option<&ObjectRef>,
        name: &str,
        value: Option<ManagedValue>,
    ) -> ManagedResult {
        let ty = match target {
            Some(object) => object.ty().clone(),
            None => runtime.registry().get(ty).unwrap(),
        };
        let (declaring, member) = ty
            .hierarchy()
            .find_map(|level| {
                level
                    .members()
                    .iter()
                    .find(|m| m.kind == MemberKind::Property && &*m.name == name)
                    .map(|m| (level, m))
            })
            .unwrap();
        let ctx = CallContext::new(runtime, declaring, member, target);
        match (&member.body, value) {
            (MemberBody::Property { getter: Some(getter), .. }, None) => getter(&ctx, &[]),
            (MemberBody::Property { setter: Some(setter), .. }, Some(value)) => {
                setter(&ctx, &[value])
            }
            _ => unreachable!(),
        }
    }

    pub(crate) fn get_property(
        runtime: &ClrRuntime,
        target: &ObjectRef,
        name: &str,
    ) -> ManagedResult {
        property(runtime, "", Some(target), name, None)
    }

    pub(crate) fn set_property(
        runtime: &ClrRuntime,
        target: &ObjectRef,
        name: &str,
        value: ManagedValue,
    ) -> ManagedResult {
        property(runtime, "", Some(target), name, Some(value))
    }

    pub(crate) fn get_static_property(runtime: &ClrRuntime, ty: &str, name: &str) -> ManagedResult {
        property(runtime, ty, None, name, None)
    }

    pub(crate) fn set_static_property(
        runtime: &ClrRuntime,
        ty: &str,
        name: &str,
        value: ManagedValue,
    ) -> ManagedResult {
        property(runtime, ty, None, name, Some(value))
    }
}
