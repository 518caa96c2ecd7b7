//! `System.Console`.
//!
//! | Member | Description |
//! |--------|-------------|
//! | `WriteLine()` | Writes a line terminator |
//! | `WriteLine(String/Object/Boolean/Int32/Int64/Double)` | Writes the value and a line terminator |
//! | `WriteLine(String, params Object[])` | Composite formatting |
//! | `Write(String/Object)` | Writes without terminator |
//! | `Title` | Static read-write property |

use std::{
    io::Write as _,
    sync::{Mutex, RwLock},
};

use crate::{
    config::ConsoleMode,
    runtime::{
        bcl::{format_composite, BOOL, I4, I8, OBJECT, R8, STRING, VOID},
        ArgsExt, AssemblyDef, CallContext, ManagedResult, ManagedValue, TypeBuilder,
    },
};

/// Output sink and settings behind `System.Console`
pub struct ConsoleState {
    mode: ConsoleMode,
    captured: Mutex<String>,
    title: RwLock<String>,
}

impl ConsoleState {
    /// Creates the console state for the given output mode
    pub fn new(mode: ConsoleMode) -> Self {
        ConsoleState {
            mode,
            captured: Mutex::new(String::new()),
            title: RwLock::new(String::new()),
        }
    }

    /// Writes text to the configured destination
    pub fn write(&self, text: &str) {
        match self.mode {
            ConsoleMode::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(text.as_bytes());
                let _ = out.flush();
            }
            ConsoleMode::Capture => lock!(self.captured).push_str(text),
        }
    }

    /// Drains captured output
    pub fn take_output(&self) -> String {
        std::mem::take(&mut *lock!(self.captured))
    }

    /// The console window title
    pub fn title(&self) -> String {
        read_lock!(self.title).clone()
    }

    /// Sets the console window title
    pub fn set_title(&self, title: &str) {
        *write_lock!(self.title) = title.to_string();
    }
}

fn write_value(ctx: &CallContext<'_>, value: &ManagedValue, newline: bool) -> ManagedResult {
    let mut text = ctx.runtime().display(value)?;
    if newline {
        text.push('\n');
    }
    ctx.runtime().console().write(&text);
    Ok(ManagedValue::Void)
}

pub(crate) fn register(asm: &mut AssemblyDef) {
    let mut ty = TypeBuilder::static_class("System", "Console").static_method(
        "WriteLine",
        &[],
        VOID,
        |ctx, _| {
            ctx.runtime().console().write("\n");
            Ok(ManagedValue::Void)
        },
    );

    for sig in [STRING, OBJECT, BOOL, I4, I8, R8] {
        ty = ty
            .static_method("WriteLine", &[sig.clone()], VOID, |ctx, args| {
                write_value(ctx, args.value_at(0), true)
            })
            .static_method("Write", &[sig], VOID, |ctx, args| {
                write_value(ctx, args.value_at(0), false)
            });
    }

    let ty = ty
        .static_method("WriteLine", &[STRING], VOID, |ctx, args| {
            let text = format_composite(ctx.runtime(), args.str_at(0)?, &args[1..])?;
            write_value(ctx, &ManagedValue::from(text), true)
        })
        .params(OBJECT)
        .static_property_rw(
            "Title",
            STRING,
            |ctx, _| Ok(ManagedValue::from(ctx.runtime().console().title())),
            |ctx, args| {
                ctx.runtime().console().set_title(args.opt_str_at(0).unwrap_or_default());
                Ok(ManagedValue::Void)
            },
        )
        .build();
    asm.add(ty);
}

#[cfg(test)]
mod tests {
    use crate::runtime::bcl::testing::{call_static, get_static_property, runtime, set_static_property};
    use crate::runtime::bcl::{I4, R8, STRING};
    use crate::runtime::ManagedValue;

    #[test]
    fn test_console_capture() {
        let runtime = runtime();
        call_static(&runtime, "System.Console", "WriteLine", &[I4], &[42.into()]).unwrap();
        call_static(&runtime, "System.Console", "Write", &[R8], &[1.5.into()]).unwrap();
        call_static(&runtime, "System.Console", "WriteLine", &[STRING], &["!".into()]).unwrap();
        assert_eq!(runtime.take_console_output(), "42\n1.5!\n");
        assert_eq!(runtime.take_console_output(), "");
    }

    #[test]
    fn test_title() {
        let runtime = runtime();
        set_static_property(&runtime, "System.Console", "Title", "bridge".into()).unwrap();
        assert_eq!(
            get_static_property(&runtime, "System.Console", "Title"),
            Ok(ManagedValue::from("bridge"))
        );
    }
}
