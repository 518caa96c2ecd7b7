//! The exception hierarchy.
//!
//! Every exception type carries the private fields `_message`, `_source`,
//! `_innerException` and `_hresult`, declared once on `System.Exception`. Derived types only
//! add their three standard constructors. [`ClrRuntime::raise`](crate::runtime::ClrRuntime::raise)
//! allocates these types directly and fills `_message`, without running a constructor.
//!
//! # Types
//!
//! | Type | Base |
//! |------|------|
//! | `System.Exception` | `System.Object` |
//! | `System.SystemException` | `System.Exception` |
//! | `System.ArgumentException` | `System.SystemException` |
//! | `System.ArgumentNullException`, `System.ArgumentOutOfRangeException` | `System.ArgumentException` |
//! | `System.InvalidOperationException` | `System.SystemException` |
//! | `System.ObjectDisposedException` | `System.InvalidOperationException` |
//! | `System.ArithmeticException` | `System.SystemException` |
//! | `System.OverflowException` | `System.ArithmeticException` |
//! | `System.MemberAccessException` | `System.SystemException` |
//! | `System.MissingMemberException` | `System.MemberAccessException` |
//! | `System.MissingFieldException`, `System.MissingMethodException` | `System.MissingMemberException` |
//! | `System.NotSupportedException`, `System.NotImplementedException`, `System.FormatException`, `System.NullReferenceException`, `System.InvalidCastException`, `System.IndexOutOfRangeException`, `System.TypeLoadException` | `System.SystemException` |
//! | `System.AggregateException` | `System.Exception` |
//! | `System.IO.IOException` | `System.SystemException` |
//! | `System.IO.FileNotFoundException` | `System.IO.IOException` |

use crate::runtime::{
    bcl::{I4, STRING},
    ArgsExt, AssemblyDef, CallContext, ManagedResult, ManagedValue, TypeBuilder, TypeSig,
};

const EXCEPTION: &str = "System.Exception";
const COR_E_EXCEPTION: i32 = -2_146_233_088;

const HIERARCHY: &[(&str, &str, &str)] = &[
    ("System", "SystemException", "System.Exception"),
    ("System", "ArgumentException", "System.SystemException"),
    ("System", "ArgumentNullException", "System.ArgumentException"),
    ("System", "ArgumentOutOfRangeException", "System.ArgumentException"),
    ("System", "InvalidOperationException", "System.SystemException"),
    ("System", "ObjectDisposedException", "System.InvalidOperationException"),
    ("System", "ArithmeticException", "System.SystemException"),
    ("System", "OverflowException", "System.ArithmeticException"),
    ("System", "MemberAccessException", "System.SystemException"),
    ("System", "MissingMemberException", "System.MemberAccessException"),
    ("System", "MissingFieldException", "System.MissingMemberException"),
    ("System", "MissingMethodException", "System.MissingMemberException"),
    ("System", "NotSupportedException", "System.SystemException"),
    ("System", "NotImplementedException", "System.SystemException"),
    ("System", "FormatException", "System.SystemException"),
    ("System", "NullReferenceException", "System.SystemException"),
    ("System", "InvalidCastException", "System.SystemException"),
    ("System", "IndexOutOfRangeException", "System.SystemException"),
    ("System", "TypeLoadException", "System.SystemException"),
    ("System", "AggregateException", "System.Exception"),
    ("System.IO", "IOException", "System.SystemException"),
    ("System.IO", "FileNotFoundException", "System.IO.IOException"),
];

fn initialise(ctx: &CallContext<'_>, message: ManagedValue, inner: ManagedValue) -> ManagedResult {
    ctx.set_field("_message", message)?;
    ctx.set_field("_innerException", inner)?;
    ctx.set_field("_hresult", ManagedValue::I4(COR_E_EXCEPTION))?;
    Ok(ManagedValue::Void)
}

fn with_constructors(builder: TypeBuilder) -> TypeBuilder {
    builder
        .constructor(&[], |ctx, _| initialise(ctx, ManagedValue::Null, ManagedValue::Null))
        .constructor(&[STRING], |ctx, args| {
            initialise(ctx, args.value_at(0).clone(), ManagedValue::Null)
        })
        .constructor(&[STRING, TypeSig::class(EXCEPTION)], |ctx, args| {
            initialise(ctx, args.value_at(0).clone(), args.value_at(1).clone())
        })
}

fn default_message(type_name: &str) -> String {
    match type_name {
        "System.AggregateException" => "One or more errors occurred.".to_string(),
        _ => format!("Exception of type '{}' was thrown.", type_name),
    }
}

fn message(ctx: &CallContext<'_>) -> ManagedResult<String> {
    match ctx.field("_message")? {
        ManagedValue::String(message) => Ok(message.to_string()),
        _ => Ok(default_message(ctx.this()?.ty().full_name())),
    }
}

pub(crate) fn register(asm: &mut AssemblyDef) {
    let exception = TypeSig::class(EXCEPTION);

    let root = with_constructors(TypeBuilder::class("System", "Exception"))
        .private_field("_message", STRING)
        .private_field("_source", STRING)
        .private_field("_innerException", exception.clone())
        .private_field("_hresult", I4)
        .property("Message", STRING, |ctx, _| Ok(message(ctx)?.into()))
        .property_rw(
            "Source",
            STRING,
            |ctx, _| ctx.field("_source"),
            |ctx, args| {
                ctx.set_field("_source", args.value_at(0).clone())?;
                Ok(ManagedValue::Void)
            },
        )
        .property("InnerException", exception.clone(), |ctx, _| {
            ctx.field("_innerException")
        })
        .property_rw(
            "HResult",
            I4,
            |ctx, _| ctx.field("_hresult"),
            |ctx, args| {
                ctx.set_field("_hresult", ManagedValue::I4(args.i32_at(0)?))?;
                Ok(ManagedValue::Void)
            },
        )
        .method("GetBaseException", &[], exception, |ctx, _| {
            let mut current = ctx.this()?.clone();
            while let Some(ManagedValue::Object(inner)) = current.field("_innerException") {
                current = inner;
            }
            Ok(current.into())
        })
        .method("ToString", &[], STRING, |ctx, _| {
            let mut text = format!("{}: {}", ctx.this()?.ty().full_name(), message(ctx)?);
            if let ManagedValue::Object(inner) = ctx.field("_innerException")? {
                let inner = ctx.runtime().display(&ManagedValue::Object(inner))?;
                text.push_str(" ---> ");
                text.push_str(&inner);
            }
            Ok(text.into())
        })
        .build();
    asm.add(root);

    for (namespace, name, base) in HIERARCHY {
        asm.add(with_constructors(TypeBuilder::class(namespace, name).extends(base)).build());
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::bcl::testing::{construct, get_property, runtime, set_property};
    use crate::runtime::bcl::STRING;
    use crate::runtime::{ManagedValue, TypeSig};

    #[test]
    fn test_source_round_trip() {
        let runtime = runtime();
        let ex = construct(&runtime, "System.Exception", &[], &[]).unwrap();
        assert_eq!(get_property(&runtime, &ex, "Source"), Ok(ManagedValue::Null));
        set_property(&runtime, &ex, "Source", "a source".into()).unwrap();
        assert_eq!(
            get_property(&runtime, &ex, "Source"),
            Ok(ManagedValue::from("a source"))
        );
        assert_eq!(
            get_property(&runtime, &ex, "Message"),
            Ok(ManagedValue::from("Exception of type 'System.Exception' was thrown."))
        );
    }

    #[test]
    fn test_inner_exception_chain() {
        let runtime = runtime();
        let inner = construct(&runtime, "System.FormatException", &[STRING], &["bad".into()]).unwrap();
        let outer = construct(
            &runtime,
            "System.InvalidOperationException",
            &[STRING, TypeSig::class("System.Exception")],
            &["outer".into(), inner.clone().into()],
        )
        .unwrap();

        assert_eq!(
            runtime.display(&ManagedValue::Object(outer.clone())).unwrap(),
            "System.InvalidOperationException: outer ---> System.FormatException: bad"
        );
        let base = runtime.call_method(&outer, "GetBaseException", &[]).unwrap();
        assert_eq!(base, ManagedValue::Object(inner));
        assert!(outer.ty().is_assignable_to("System.SystemException"));
    }
}
