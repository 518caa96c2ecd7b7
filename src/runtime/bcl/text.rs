//! `System.Text.StringBuilder`.
//!
//! The buffer lives in native state behind a `RwLock`; every `Append` overload returns the
//! builder itself so calls chain from the host the same way they do in managed code.

use std::sync::RwLock;

use crate::runtime::{
    bcl::{format_composite, BOOL, CHAR, I4, I8, OBJECT, R8, STRING},
    ArgsExt, AssemblyDef, CallContext, ManagedResult, ManagedValue, TypeBuilder, TypeSig,
};

const BUILDER: &str = "System.Text.StringBuilder";

#[derive(Default)]
struct StringBuilderState {
    text: RwLock<String>,
}

fn append(ctx: &CallContext<'_>, text: &str) -> ManagedResult {
    let state = ctx.native::<StringBuilderState>()?;
    with_write!(state.text, |buffer: &mut String| buffer.push_str(text));
    Ok(ctx.this()?.clone().into())
}

pub(crate) fn register(asm: &mut AssemblyDef) {
    let builder = TypeSig::class(BUILDER);

    let mut ty = TypeBuilder::class("System.Text", "StringBuilder")
        .sealed()
        .constructor(&[], |ctx, _| {
            ctx.this()?.set_native(StringBuilderState::default());
            Ok(ManagedValue::Void)
        })
        .constructor(&[STRING], |ctx, args| {
            let initial = args.opt_str_at(0).unwrap_or_default().to_string();
            ctx.this()?.set_native(StringBuilderState {
                text: RwLock::new(initial),
            });
            Ok(ManagedValue::Void)
        });

    for sig in [STRING, CHAR, BOOL, I4, I8, R8, OBJECT] {
        ty = ty.method("Append", &[sig], builder.clone(), |ctx, args| {
            let text = ctx.runtime().display(args.value_at(0))?;
            append(ctx, &text)
        });
    }

    let ty = ty
        .method("AppendLine", &[], builder.clone(), |ctx, _| append(ctx, "\n"))
        .method("AppendLine", &[STRING], builder.clone(), |ctx, args| {
            let mut text = args.opt_str_at(0).unwrap_or_default().to_string();
            text.push('\n');
            append(ctx, &text)
        })
        .method("AppendFormat", &[STRING], builder.clone(), |ctx, args| {
            let text = format_composite(ctx.runtime(), args.str_at(0)?, &args[1..])?;
            append(ctx, &text)
        })
        .params(OBJECT)
        .method("Clear", &[], builder, |ctx, _| {
            let state = ctx.native::<StringBuilderState>()?;
            with_write!(state.text, |buffer: &mut String| buffer.clear());
            Ok(ctx.this()?.clone().into())
        })
        .property_rw(
            "Length",
            I4,
            |ctx, _| {
                let state = ctx.native::<StringBuilderState>()?;
                let length = with_read!(state.text, |buffer: &String| buffer.chars().count());
                Ok(ManagedValue::I4(i32::try_from(length).unwrap_or(i32::MAX)))
            },
            |ctx, args| {
                let length = usize::try_from(args.i32_at(0)?).map_err(|_| {
                    ctx.throw(
                        "System.ArgumentOutOfRangeException",
                        "Length cannot be less than zero. (Parameter 'value')",
                    )
                })?;
                let state = ctx.native::<StringBuilderState>()?;
                with_write!(state.text, |buffer: &mut String| {
                    let current = buffer.chars().count();
                    if length < current {
                        *buffer = buffer.chars().take(length).collect();
                    } else {
                        buffer.extend(std::iter::repeat('\0').take(length - current));
                    }
                });
                Ok(ManagedValue::Void)
            },
        )
        .method("ToString", &[], STRING, |ctx, _| {
            let state = ctx.native::<StringBuilderState>()?;
            Ok(with_read!(state.text, |buffer: &String| ManagedValue::string(buffer)))
        })
        .build();
    asm.add(ty);
}
