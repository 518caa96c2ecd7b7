//! Core `System` types.
//!
//! # Types
//!
//! | Type | Members |
//! |------|---------|
//! | `System.Object` | `.ctor()`, `ToString`, `Equals`, `GetHashCode`, `GetType`, static `ReferenceEquals`, static `Equals` |
//! | `System.ValueType` / `System.Enum` | abstract bases |
//! | `System.Type` | `FullName`, `Name`, `Namespace`, `AssemblyQualifiedName`, `IsValueType`, `IsAbstract`, `IsClass`, `BaseType`, static `GetType(String)` |
//! | `System.Delegate` family | `Action`, ``Action`1``, `EventHandler`, `AssemblyLoadEventHandler` |
//! | `System.Int32` / `Int64` / `Byte` | `MaxValue`, `MinValue`, `Parse` |
//! | `System.Double` | `MaxValue`, `MinValue`, `Epsilon`, `NaN`, infinities, `Parse`, `IsNaN`, `IsInfinity` |
//! | `System.Boolean` | `TrueString`, `FalseString`, `Parse` |
//! | `System.Char` | `MaxValue`, `MinValue`, `IsDigit`, `IsLetter`, `IsWhiteSpace`, `ToUpper`, `ToLower` |
//! | `System.Math` | `PI`, `E`, `Abs`, `Max`, `Min`, `Pow`, `Sqrt`, `Floor`, `Ceiling`, `Round` |
//! | `System.Environment` | `NewLine`, `ProcessorCount`, `MachineName`, `CurrentDirectory`, `TickCount`, `GetEnvironmentVariable`, nested `SpecialFolder` |
//!
//! `<PrivateImplementationDetails>` is registered as a non-public, special-name type; it
//! must never become visible through the bridge.

use std::{sync::OnceLock, time::Instant};

use crate::runtime::{
    bcl::{BOOL, CHAR, I4, I8, OBJECT, R8, STRING, U1},
    ArgsExt, AssemblyDef, CallContext, ClrRuntime, ElementType, ManagedResult, ManagedValue,
    ObjectRef, RuntimeTypeRef, TypeBuilder, TypeSig,
};

/// Native state of a `System.Type` instance
pub(crate) struct TypeState(pub(crate) RuntimeTypeRef);

/// Creates a `System.Type` object describing `ty`
pub(crate) fn type_object(runtime: &ClrRuntime, ty: &RuntimeTypeRef) -> ManagedResult<ObjectRef> {
    let object = runtime.allocate("System.Type")?;
    object.set_native(TypeState(ty.clone()));
    Ok(object)
}

fn described(ctx: &CallContext<'_>) -> ManagedResult<RuntimeTypeRef> {
    Ok(ctx.native::<TypeState>()?.0.clone())
}

fn format_error(ctx: &CallContext<'_>) -> crate::ManagedFault {
    ctx.throw(
        "System.FormatException",
        "Input string was not in a correct format.",
    )
}

fn parse_integer(ctx: &CallContext<'_>, text: &str, element: ElementType) -> ManagedResult<i128> {
    let value: i128 = text.trim().parse().map_err(|_| format_error(ctx))?;
    match element.integer_range() {
        Some((min, max)) if value < min || value > max => Err(ctx.throw(
            "System.OverflowException",
            format!(
                "Value was either too large or too small for {}.",
                element.full_name().trim_start_matches("System.")
            ),
        )),
        _ => Ok(value),
    }
}

fn register_object(asm: &mut AssemblyDef) {
    let ty = TypeBuilder::root()
        .constructor(&[], |_, _| Ok(ManagedValue::Void))
        .method("ToString", &[], STRING, |ctx, _| {
            Ok(ManagedValue::string(ctx.this()?.ty().full_name()))
        })
        .method("Equals", &[OBJECT], BOOL, |ctx, args| {
            let this = ctx.this()?;
            let same = args
                .value_at(0)
                .as_object()
                .is_some_and(|other| ObjectRef::ptr_eq(this, other));
            Ok(ManagedValue::Bool(same))
        })
        .method("GetHashCode", &[], I4, |ctx, _| {
            #[allow(clippy::cast_possible_truncation)]
            let hash = (ctx.this()?.id() & 0x7fff_ffff) as i32;
            Ok(ManagedValue::I4(hash))
        })
        .method("GetType", &[], TypeSig::class("System.Type"), |ctx, _| {
            let ty = ctx.this()?.ty().clone();
            Ok(type_object(ctx.runtime(), &ty)?.into())
        })
        .static_method("ReferenceEquals", &[OBJECT, OBJECT], BOOL, |_, args| {
            let same = match (args.value_at(0), args.value_at(1)) {
                (ManagedValue::Null, ManagedValue::Null) => true,
                (ManagedValue::Object(a), ManagedValue::Object(b)) => ObjectRef::ptr_eq(a, b),
                _ => false,
            };
            Ok(ManagedValue::Bool(same))
        })
        .static_method("Equals", &[OBJECT, OBJECT], BOOL, |ctx, args| {
            let equal = match (args.value_at(0), args.value_at(1)) {
                (ManagedValue::Object(a), b) => ctx
                    .runtime()
                    .call_method(a, "Equals", std::slice::from_ref(b))?
                    .as_bool()
                    .unwrap_or(false),
                (a, b) => a == b,
            };
            Ok(ManagedValue::Bool(equal))
        })
        .build();
    asm.add(ty);

    asm.add(
        TypeBuilder::class("System", "ValueType")
            .abstract_type()
            .protected_constructor(|_, _| Ok(ManagedValue::Void))
            .build(),
    );
    asm.add(
        TypeBuilder::class("System", "Enum")
            .extends("System.ValueType")
            .abstract_type()
            .build(),
    );
}

fn register_type(asm: &mut AssemblyDef) {
    let ty = TypeBuilder::class("System", "Type")
        .property("FullName", STRING, |ctx, _| {
            Ok(ManagedValue::string(described(ctx)?.full_name()))
        })
        .property("Name", STRING, |ctx, _| {
            Ok(ManagedValue::string(described(ctx)?.name()))
        })
        .property("Namespace", STRING, |ctx, _| {
            let ty = described(ctx)?;
            Ok(if ty.namespace().is_empty() {
                ManagedValue::Null
            } else {
                ManagedValue::string(ty.namespace())
            })
        })
        .property("AssemblyQualifiedName", STRING, |ctx, _| {
            Ok(ManagedValue::from(described(ctx)?.assembly_qualified_name()))
        })
        .property("IsValueType", BOOL, |ctx, _| {
            Ok(ManagedValue::Bool(described(ctx)?.is_value_type()))
        })
        .property("IsAbstract", BOOL, |ctx, _| {
            Ok(ManagedValue::Bool(described(ctx)?.is_abstract()))
        })
        .property("IsClass", BOOL, |ctx, _| {
            Ok(ManagedValue::Bool(!described(ctx)?.is_value_type()))
        })
        .property("BaseType", TypeSig::class("System.Type"), |ctx, _| {
            match described(ctx)?.base() {
                Some(base) => Ok(type_object(ctx.runtime(), base)?.into()),
                None => Ok(ManagedValue::Null),
            }
        })
        .method("ToString", &[], STRING, |ctx, _| {
            Ok(ManagedValue::string(described(ctx)?.full_name()))
        })
        .method("Equals", &[OBJECT], BOOL, |ctx, args| {
            let this = described(ctx)?;
            let same = args
                .value_at(0)
                .as_object()
                .and_then(|other| other.native::<TypeState>())
                .is_some_and(|other| other.0.full_name() == this.full_name());
            Ok(ManagedValue::Bool(same))
        })
        .static_method(
            "GetType",
            &[STRING],
            TypeSig::class("System.Type"),
            |ctx, args| match ctx.runtime().registry().resolve(args.str_at(0)?) {
                Some(ty) if ty.is_public() => Ok(type_object(ctx.runtime(), &ty)?.into()),
                _ => Ok(ManagedValue::Null),
            },
        )
        .build();
    asm.add(ty);
}

fn register_delegates(asm: &mut AssemblyDef) {
    asm.add(
        TypeBuilder::class("System", "Delegate")
            .abstract_type()
            .build(),
    );
    asm.add(
        TypeBuilder::class("System", "MulticastDelegate")
            .extends("System.Delegate")
            .abstract_type()
            .build(),
    );
    for name in ["Action", "Action`1", "EventHandler", "AssemblyLoadEventHandler"] {
        asm.add(
            TypeBuilder::class("System", name)
                .extends("System.MulticastDelegate")
                .sealed()
                .build(),
        );
    }
}

fn register_primitives(asm: &mut AssemblyDef) {
    asm.add(
        TypeBuilder::value_type("System", "Int32")
            .primitive(ElementType::I4)
            .constant("MaxValue", I4, ManagedValue::I4(i32::MAX))
            .constant("MinValue", I4, ManagedValue::I4(i32::MIN))
            .static_method("Parse", &[STRING], I4, |ctx, args| {
                let value = parse_integer(ctx, args.str_at(0)?, ElementType::I4)?;
                Ok(ManagedValue::I4(i32::try_from(value).unwrap_or_default()))
            })
            .build(),
    );

    asm.add(
        TypeBuilder::value_type("System", "Int64")
            .primitive(ElementType::I8)
            .constant("MaxValue", I8, ManagedValue::I8(i64::MAX))
            .constant("MinValue", I8, ManagedValue::I8(i64::MIN))
            .static_method("Parse", &[STRING], I8, |ctx, args| {
                let value = parse_integer(ctx, args.str_at(0)?, ElementType::I8)?;
                Ok(ManagedValue::I8(i64::try_from(value).unwrap_or_default()))
            })
            .build(),
    );

    asm.add(
        TypeBuilder::value_type("System", "Byte")
            .primitive(ElementType::U1)
            .constant("MaxValue", U1, ManagedValue::U1(u8::MAX))
            .constant("MinValue", U1, ManagedValue::U1(u8::MIN))
            .static_method("Parse", &[STRING], U1, |ctx, args| {
                let value = parse_integer(ctx, args.str_at(0)?, ElementType::U1)?;
                Ok(ManagedValue::U1(u8::try_from(value).unwrap_or_default()))
            })
            .build(),
    );

    asm.add(
        TypeBuilder::value_type("System", "Double")
            .primitive(ElementType::R8)
            .constant("MaxValue", R8, ManagedValue::R8(f64::MAX))
            .constant("MinValue", R8, ManagedValue::R8(f64::MIN))
            .constant("Epsilon", R8, ManagedValue::R8(f64::from_bits(1)))
            .constant("NaN", R8, ManagedValue::R8(f64::NAN))
            .constant("PositiveInfinity", R8, ManagedValue::R8(f64::INFINITY))
            .constant("NegativeInfinity", R8, ManagedValue::R8(f64::NEG_INFINITY))
            .static_method("Parse", &[STRING], R8, |ctx, args| {
                let text = args.str_at(0)?.trim();
                let value = match text {
                    "NaN" => f64::NAN,
                    "Infinity" => f64::INFINITY,
                    "-Infinity" => f64::NEG_INFINITY,
                    _ if text.contains("inf") || text.contains("nan") => {
                        return Err(format_error(ctx))
                    }
                    _ => text.parse().map_err(|_| format_error(ctx))?,
                };
                Ok(ManagedValue::R8(value))
            })
            .static_method("IsNaN", &[R8], BOOL, |_, args| {
                Ok(ManagedValue::Bool(args.f64_at(0)?.is_nan()))
            })
            .static_method("IsInfinity", &[R8], BOOL, |_, args| {
                Ok(ManagedValue::Bool(args.f64_at(0)?.is_infinite()))
            })
            .build(),
    );

    asm.add(
        TypeBuilder::value_type("System", "Boolean")
            .primitive(ElementType::Boolean)
            .readonly_field("TrueString", STRING, ManagedValue::from("True"))
            .readonly_field("FalseString", STRING, ManagedValue::from("False"))
            .static_method("Parse", &[STRING], BOOL, |ctx, args| {
                let text = args.str_at(0)?.trim();
                if text.eq_ignore_ascii_case("true") {
                    Ok(ManagedValue::Bool(true))
                } else if text.eq_ignore_ascii_case("false") {
                    Ok(ManagedValue::Bool(false))
                } else {
                    Err(ctx.throw(
                        "System.FormatException",
                        "String was not recognized as a valid Boolean.",
                    ))
                }
            })
            .build(),
    );

    asm.add(
        TypeBuilder::value_type("System", "Char")
            .primitive(ElementType::Char)
            .constant("MaxValue", CHAR, ManagedValue::Char('\u{ffff}'))
            .constant("MinValue", CHAR, ManagedValue::Char('\0'))
            .static_method("IsDigit", &[CHAR], BOOL, |_, args| {
                Ok(char_arg(args).is_some_and(|c| c.is_ascii_digit()).into())
            })
            .static_method("IsLetter", &[CHAR], BOOL, |_, args| {
                Ok(char_arg(args).is_some_and(char::is_alphabetic).into())
            })
            .static_method("IsWhiteSpace", &[CHAR], BOOL, |_, args| {
                Ok(char_arg(args).is_some_and(char::is_whitespace).into())
            })
            .static_method("ToUpper", &[CHAR], CHAR, |_, args| {
                let c = char_arg(args).unwrap_or_default();
                Ok(ManagedValue::Char(c.to_uppercase().next().unwrap_or(c)))
            })
            .static_method("ToLower", &[CHAR], CHAR, |_, args| {
                let c = char_arg(args).unwrap_or_default();
                Ok(ManagedValue::Char(c.to_lowercase().next().unwrap_or(c)))
            })
            .build(),
    );
}

fn char_arg(args: &[ManagedValue]) -> Option<char> {
    match args.value_at(0) {
        ManagedValue::Char(c) => Some(*c),
        _ => None,
    }
}

fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round_ties_even() / scale
}

fn register_math(asm: &mut AssemblyDef) {
    let ty = TypeBuilder::static_class("System", "Math")
        .constant("PI", R8, ManagedValue::R8(std::f64::consts::PI))
        .constant("E", R8, ManagedValue::R8(std::f64::consts::E))
        .static_method("Abs", &[I4], I4, |ctx, args| {
            args.i32_at(0)?.checked_abs().map(ManagedValue::I4).ok_or_else(|| {
                ctx.throw(
                    "System.OverflowException",
                    "Negating the minimum value of a twos complement number is invalid.",
                )
            })
        })
        .static_method("Abs", &[I8], I8, |ctx, args| {
            args.i64_at(0)?.checked_abs().map(ManagedValue::I8).ok_or_else(|| {
                ctx.throw(
                    "System.OverflowException",
                    "Negating the minimum value of a twos complement number is invalid.",
                )
            })
        })
        .static_method("Abs", &[R8], R8, |_, args| {
            Ok(ManagedValue::R8(args.f64_at(0)?.abs()))
        })
        .static_method("Max", &[I4, I4], I4, |_, args| {
            Ok(ManagedValue::I4(args.i32_at(0)?.max(args.i32_at(1)?)))
        })
        .static_method("Max", &[I8, I8], I8, |_, args| {
            Ok(ManagedValue::I8(args.i64_at(0)?.max(args.i64_at(1)?)))
        })
        .static_method("Max", &[R8, R8], R8, |_, args| {
            let (a, b) = (args.f64_at(0)?, args.f64_at(1)?);
            Ok(ManagedValue::R8(if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.max(b)
            }))
        })
        .static_method("Min", &[I4, I4], I4, |_, args| {
            Ok(ManagedValue::I4(args.i32_at(0)?.min(args.i32_at(1)?)))
        })
        .static_method("Min", &[I8, I8], I8, |_, args| {
            Ok(ManagedValue::I8(args.i64_at(0)?.min(args.i64_at(1)?)))
        })
        .static_method("Min", &[R8, R8], R8, |_, args| {
            let (a, b) = (args.f64_at(0)?, args.f64_at(1)?);
            Ok(ManagedValue::R8(if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.min(b)
            }))
        })
        .static_method("Pow", &[R8, R8], R8, |_, args| {
            Ok(ManagedValue::R8(args.f64_at(0)?.powf(args.f64_at(1)?)))
        })
        .static_method("Sqrt", &[R8], R8, |_, args| {
            Ok(ManagedValue::R8(args.f64_at(0)?.sqrt()))
        })
        .static_method("Floor", &[R8], R8, |_, args| {
            Ok(ManagedValue::R8(args.f64_at(0)?.floor()))
        })
        .static_method("Ceiling", &[R8], R8, |_, args| {
            Ok(ManagedValue::R8(args.f64_at(0)?.ceil()))
        })
        .static_method("Round", &[R8], R8, |_, args| {
            Ok(ManagedValue::R8(args.f64_at(0)?.round_ties_even()))
        })
        .static_method("Round", &[R8, I4], R8, |ctx, args| {
            let digits = args.i32_at(1)?;
            if !(0..=15).contains(&digits) {
                return Err(ctx.throw(
                    "System.ArgumentOutOfRangeException",
                    "Rounding digits must be between 0 and 15, inclusive. (Parameter 'digits')",
                ));
            }
            Ok(ManagedValue::R8(round_to(args.f64_at(0)?, digits)))
        })
        .build();
    asm.add(ty);
}

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

fn register_environment(asm: &mut AssemblyDef) {
    let ty = TypeBuilder::static_class("System", "Environment")
        .static_property("NewLine", STRING, |_, _| {
            Ok(ManagedValue::from(if cfg!(windows) { "\r\n" } else { "\n" }))
        })
        .static_property("ProcessorCount", I4, |_, _| {
            let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
            Ok(ManagedValue::I4(i32::try_from(cores).unwrap_or(i32::MAX)))
        })
        .static_property("MachineName", STRING, |_, _| {
            let name = std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("COMPUTERNAME"))
                .unwrap_or_else(|_| "localhost".to_string());
            Ok(ManagedValue::from(name))
        })
        .static_property("CurrentDirectory", STRING, |ctx, _| {
            let dir = std::env::current_dir()
                .map_err(|e| ctx.throw("System.IO.IOException", e.to_string()))?;
            Ok(ManagedValue::from(dir.to_string_lossy().into_owned()))
        })
        .static_property("TickCount", I4, |_, _| {
            #[allow(clippy::cast_possible_truncation)]
            let ticks = process_start().elapsed().as_millis() as i32;
            Ok(ManagedValue::I4(ticks))
        })
        .static_method("GetEnvironmentVariable", &[STRING], STRING, |_, args| {
            Ok(std::env::var(args.str_at(0)?).ok().into())
        })
        .nested("SpecialFolder", "System.Environment+SpecialFolder")
        .build();
    asm.add(ty);

    let mut folders = TypeBuilder::enumeration("System", "SpecialFolder").nested_in("System.Environment");
    for (name, value) in [
        ("Desktop", 0),
        ("Programs", 2),
        ("Personal", 5),
        ("MyDocuments", 5),
        ("Favorites", 6),
        ("Startup", 7),
        ("ApplicationData", 26),
        ("LocalApplicationData", 28),
        ("UserProfile", 40),
    ] {
        folders = folders.constant(name, I4, ManagedValue::I4(value));
    }
    asm.add(folders.build());
}

pub(crate) fn register(asm: &mut AssemblyDef) {
    register_object(asm);
    register_type(asm);
    register_delegates(asm);
    register_primitives(asm);
    register_math(asm);
    register_environment(asm);

    asm.add(
        TypeBuilder::class("", "<PrivateImplementationDetails>")
            .non_public()
            .special_name()
            .sealed()
            .build(),
    );
}

#[cfg(test)]
mod tests {
    use crate::runtime::bcl::testing::{call_static, get_property, runtime, static_value};
    use crate::runtime::bcl::{I4, I8, R8, STRING};
    use crate::runtime::ManagedValue;

    #[test]
    fn test_math_overloads() {
        let runtime = runtime();
        assert_eq!(
            call_static(&runtime, "System.Math", "Max", &[I4, I4], &[3.into(), 9.into()]),
            Ok(ManagedValue::I4(9))
        );
        assert_eq!(
            call_static(&runtime, "System.Math", "Round", &[R8], &[2.5.into()]),
            Ok(ManagedValue::R8(2.0))
        );
        let fault = call_static(&runtime, "System.Math", "Abs", &[I8], &[i64::MIN.into()]).unwrap_err();
        assert_eq!(fault.type_name(), "System.OverflowException");
        assert_eq!(
            static_value(&runtime, "System.Math", "PI"),
            ManagedValue::R8(std::f64::consts::PI)
        );
    }

    #[test]
    fn test_parse() {
        let runtime = runtime();
        assert_eq!(
            call_static(&runtime, "System.Int32", "Parse", &[STRING], &[" 42 ".into()]),
            Ok(ManagedValue::I4(42))
        );
        let overflow =
            call_static(&runtime, "System.Byte", "Parse", &[STRING], &["300".into()]).unwrap_err();
        assert_eq!(overflow.type_name(), "System.OverflowException");
        let format =
            call_static(&runtime, "System.Int32", "Parse", &[STRING], &["x".into()]).unwrap_err();
        assert_eq!(format.type_name(), "System.FormatException");
    }

    #[test]
    fn test_type_objects() {
        let runtime = runtime();
        let ty = call_static(
            &runtime,
            "System.Type",
            "GetType",
            &[STRING],
            &["System.DateTime".into()],
        )
        .unwrap();
        let ty = ty.as_object().unwrap();
        assert_eq!(
            get_property(&runtime, ty, "FullName"),
            Ok(ManagedValue::from("System.DateTime"))
        );
        assert_eq!(
            get_property(&runtime, ty, "IsValueType"),
            Ok(ManagedValue::Bool(true))
        );

        let hidden = call_static(
            &runtime,
            "System.Type",
            "GetType",
            &[STRING],
            &["<PrivateImplementationDetails>".into()],
        );
        assert_eq!(hidden, Ok(ManagedValue::Null));
    }
}
