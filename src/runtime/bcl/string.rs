//! `System.String` and composite formatting.
//!
//! Strings cross the bridge as host strings, so only the static surface of `System.String`
//! is reachable from the host.
//!
//! # Emulated Members
//!
//! | Member | Description |
//! |--------|-------------|
//! | `Empty` | Init-only static field, `""` |
//! | `Format(String, Object[, Object[, Object]])` | Composite formatting, fixed arity |
//! | `Format(String, params Object[])` | Composite formatting, any arity |
//! | `Concat(String, String)` / `Concat(Object, Object)` / `Concat(params String[])` | Concatenation |
//! | `Join(String, params String[])` | Joins with a separator |
//! | `IsNullOrEmpty(String)` / `IsNullOrWhiteSpace(String)` | Null checks |
//! | `Compare(String, String)` | Ordinal comparison, returns -1, 0 or 1 |
//! | `Equals(String, String)` | Ordinal equality |
//!
//! # Composite Format Syntax
//!
//! `{index[,alignment][:format]}` with `{{` and `}}` as escapes. Supported format strings:
//!
//! | Format | Applies to | Example |
//! |--------|------------|---------|
//! | `D<n>` | integers | `{0:D4}` → `0042` |
//! | `X` / `x` | integers | `{0:X}` → `2A` |
//! | `F<n>` | numbers | `{0:F2}` → `3.14` |
//! | `N<n>` | numbers | `{0:N0}` → `1,234` |
//! | anything | objects with `ToString(String)` | `{0:yyyy}` on a `DateTime` |

use std::cmp::Ordering;

use crate::{
    error::ManagedFault,
    runtime::{
        bcl::{BOOL, I4, OBJECT, STRING},
        ArgsExt, AssemblyDef, ClrRuntime, ElementType, ManagedResult, ManagedValue, TypeBuilder,
    },
};

/// Formats a double the way `Double.ToString()` does: integral values without a fraction,
/// `NaN`, `Infinity` and `-Infinity` spelled out, large magnitudes in exponent notation.
pub(crate) fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-5..1e15).contains(&magnitude) {
        let text = format!("{:E}", value);
        return match text.split_once('E') {
            Some((mantissa, exponent)) if exponent.starts_with('-') => {
                format!("{}E-{:0>2}", mantissa, &exponent[1..])
            }
            Some((mantissa, exponent)) => format!("{}E+{:0>2}", mantissa, exponent),
            None => text,
        };
    }
    if value == value.trunc() {
        format!("{:.0}", value)
    } else {
        value.to_string()
    }
}

fn invalid_format(runtime: &ClrRuntime) -> ManagedFault {
    runtime.raise(
        "System.FormatException",
        "Input string was not in a correct format.",
    )
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, c) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

fn format_fixed(value: f64, spec: &str, grouped: bool) -> Option<String> {
    let precision: usize = if spec.len() > 1 {
        spec[1..].parse().ok()?
    } else {
        2
    };
    let text = format!("{:.*}", precision, value.abs());
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole.to_string(), Some(fraction.to_string())),
        None => (text, None),
    };
    let whole = if grouped { group_thousands(&whole) } else { whole };
    let sign = if value < 0.0 && text_is_nonzero(&whole, fraction.as_deref()) {
        "-"
    } else {
        ""
    };
    Some(match fraction {
        Some(fraction) => format!("{}{}.{}", sign, whole, fraction),
        None => format!("{}{}", sign, whole),
    })
}

fn text_is_nonzero(whole: &str, fraction: Option<&str>) -> bool {
    whole.chars().chain(fraction.unwrap_or("").chars()).any(|c| c.is_ascii_digit() && c != '0')
}

fn format_integer(value: i128, spec: &str) -> Option<String> {
    let kind = spec.chars().next()?;
    let width: usize = if spec.len() > 1 { spec[1..].parse().ok()? } else { 0 };
    match kind {
        'D' | 'd' => {
            let digits = format!("{:0>width$}", value.unsigned_abs(), width = width);
            Some(if value < 0 { format!("-{}", digits) } else { digits })
        }
        'X' => Some(format!("{:0>width$X}", hex_bits(value), width = width)),
        'x' => Some(format!("{:0>width$x}", hex_bits(value), width = width)),
        #[allow(clippy::cast_precision_loss)]
        'F' | 'f' => format_fixed(value as f64, spec, false),
        #[allow(clippy::cast_precision_loss)]
        'N' | 'n' => format_fixed(value as f64, spec, true),
        _ => None,
    }
}

fn hex_bits(value: i128) -> u128 {
    if value >= 0 {
        value.unsigned_abs()
    } else {
        #[allow(clippy::cast_sign_loss)]
        let bits = value as u128;
        bits & u128::from(u32::MAX)
    }
}

fn integer_value(value: &ManagedValue) -> Option<i128> {
    match value {
        ManagedValue::U8(v) => Some((*v).into()),
        ManagedValue::Char(_) | ManagedValue::Bool(_) => None,
        other => other.as_i64().map(Into::into),
    }
}

/// Formats one argument with an optional format string
fn format_value(runtime: &ClrRuntime, value: &ManagedValue, spec: Option<&str>) -> ManagedResult<String> {
    let Some(spec) = spec.filter(|spec| !spec.is_empty()) else {
        return runtime.display(value);
    };

    let formatted = match value {
        ManagedValue::R4(_) | ManagedValue::R8(_) => {
            let number = value.as_f64().unwrap_or_default();
            match spec.chars().next() {
                Some('F' | 'f') => format_fixed(number, spec, false),
                Some('N' | 'n') => format_fixed(number, spec, true),
                _ => None,
            }
        }
        ManagedValue::Object(object) => {
            match runtime.call_method(object, "ToString", &[ManagedValue::from(spec)]) {
                Ok(text) => text.as_str().map(str::to_string),
                Err(fault) if fault.type_name() == "System.MissingMethodException" => None,
                Err(fault) => return Err(fault),
            }
        }
        other => integer_value(other).and_then(|number| format_integer(number, spec)),
    };

    match formatted {
        Some(text) => Ok(text),
        None => runtime.display(value),
    }
}

/// Expands a composite format string
///
/// ## Arguments
/// * `runtime` - Runtime used to format object arguments
/// * `format`  - The composite format string
/// * `args`    - Values referenced by index
///
/// # Errors
/// `System.FormatException` for malformed placeholders or indices out of range.
pub(crate) fn format_composite(
    runtime: &ClrRuntime,
    format: &str,
    args: &[ManagedValue],
) -> ManagedResult<String> {
    let mut out = String::with_capacity(format.len() + args.len() * 8);
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(invalid_format(runtime)),
            '{' => {
                let mut item = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => return Err(invalid_format(runtime)),
                        Some(c) => item.push(c),
                    }
                }

                let (head, spec) = match item.split_once(':') {
                    Some((head, spec)) => (head, Some(spec)),
                    None => (item.as_str(), None),
                };
                let (index, alignment) = match head.split_once(',') {
                    Some((index, alignment)) => (index, Some(alignment)),
                    None => (head, None),
                };

                let index: usize = index.trim().parse().map_err(|_| invalid_format(runtime))?;
                let alignment: i64 = match alignment {
                    Some(alignment) => alignment.trim().parse().map_err(|_| invalid_format(runtime))?,
                    None => 0,
                };
                let value = args.get(index).ok_or_else(|| {
                    runtime.raise(
                        "System.FormatException",
                        "Index (zero based) must be greater than or equal to zero and less than the size of the argument list.",
                    )
                })?;

                let text = format_value(runtime, value, spec)?;
                let width = usize::try_from(alignment.unsigned_abs()).unwrap_or(usize::MAX);
                let padding = width.saturating_sub(text.chars().count());
                if alignment > 0 {
                    out.extend(std::iter::repeat(' ').take(padding));
                    out.push_str(&text);
                } else {
                    out.push_str(&text);
                    out.extend(std::iter::repeat(' ').take(padding));
                }
            }
            c => out.push(c),
        }
    }

    Ok(out)
}

fn concat(runtime: &ClrRuntime, args: &[ManagedValue]) -> ManagedResult {
    let mut out = String::new();
    for value in args {
        out.push_str(&runtime.display(value)?);
    }
    Ok(ManagedValue::from(out))
}

pub(crate) fn register(asm: &mut AssemblyDef) {
    let mut ty = TypeBuilder::class("System", "String")
        .sealed()
        .primitive(ElementType::String)
        .readonly_field("Empty", STRING, ManagedValue::from(""));

    for arity in 1..=3 {
        let mut params = vec![STRING];
        params.extend(std::iter::repeat(OBJECT).take(arity));
        ty = ty.static_method("Format", &params, STRING, |ctx, args| {
            Ok(format_composite(ctx.runtime(), args.str_at(0)?, &args[1..])?.into())
        });
    }

    let ty = ty
        .static_method("Format", &[STRING], STRING, |ctx, args| {
            Ok(format_composite(ctx.runtime(), args.str_at(0)?, &args[1..])?.into())
        })
        .params(OBJECT)
        .static_method("Concat", &[STRING, STRING], STRING, |ctx, args| {
            concat(ctx.runtime(), args)
        })
        .static_method("Concat", &[OBJECT, OBJECT], STRING, |ctx, args| {
            concat(ctx.runtime(), args)
        })
        .static_method("Concat", &[], STRING, |ctx, args| concat(ctx.runtime(), args))
        .params(STRING)
        .static_method("Join", &[STRING], STRING, |ctx, args| {
            let separator = args.opt_str_at(0).unwrap_or_default();
            let mut parts = Vec::with_capacity(args.len().saturating_sub(1));
            for value in &args[1..] {
                parts.push(ctx.runtime().display(value)?);
            }
            Ok(ManagedValue::from(parts.join(separator)))
        })
        .params(STRING)
        .static_method("IsNullOrEmpty", &[STRING], BOOL, |_, args| {
            Ok(args.opt_str_at(0).map_or(true, str::is_empty).into())
        })
        .static_method("IsNullOrWhiteSpace", &[STRING], BOOL, |_, args| {
            Ok(args
                .opt_str_at(0)
                .map_or(true, |s| s.chars().all(char::is_whitespace))
                .into())
        })
        .static_method("Compare", &[STRING, STRING], I4, |_, args| {
            let ordering = match (args.opt_str_at(0), args.opt_str_at(1)) {
                (Some(a), Some(b)) => a.cmp(b),
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
            };
            Ok(ManagedValue::I4(ordering as i32))
        })
        .static_method("Equals", &[STRING, STRING], BOOL, |_, args| {
            Ok((args.opt_str_at(0) == args.opt_str_at(1)).into())
        })
        .build();
    asm.add(ty);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::bcl::testing::{call_static, runtime, static_value};

    #[test]
    fn test_empty_field() {
        let runtime = runtime();
        assert_eq!(
            static_value(&runtime, "System.String", "Empty"),
            ManagedValue::from("")
        );
    }

    #[test]
    fn test_format() {
        let runtime = runtime();
        let text = call_static(
            &runtime,
            "System.String",
            "Format",
            &[STRING, OBJECT],
            &["Hello, {0}!".into(), "world".into()],
        );
        assert_eq!(text, Ok(ManagedValue::from("Hello, world!")));

        let text = format_composite(
            &runtime,
            "{0,5}|{1,-4}|{{{2:D3}}}|{3:F2}|{4:X}|{5:N0}",
            &[
                "ab".into(),
                true.into(),
                7.into(),
                3.14159.into(),
                255.into(),
                1234567.into(),
            ],
        )
        .unwrap();
        assert_eq!(text, "   ab|True|{007}|3.14|FF|1,234,567");
    }

    #[test]
    fn test_format_errors() {
        let runtime = runtime();
        let err = format_composite(&runtime, "{1}", &["x".into()]).unwrap_err();
        assert_eq!(err.type_name(), "System.FormatException");
        assert!(format_composite(&runtime, "{0", &["x".into()]).is_err());
        assert!(format_composite(&runtime, "a}b", &[]).is_err());
        assert_eq!(format_composite(&runtime, "}}{{", &[]).unwrap(), "}{");
    }

    #[test]
    fn test_format_double() {
        assert_eq!(format_double(7.0), "7");
        assert_eq!(format_double(-0.5), "-0.5");
        assert_eq!(format_double(f64::NAN), "NaN");
        assert_eq!(format_double(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_double(1e20), "1E+20");
    }

    #[test]
    fn test_join_and_compare() {
        let runtime = runtime();
        let joined = call_static(
            &runtime,
            "System.String",
            "Join",
            &[STRING],
            &[", ".into(), "a".into(), "b".into()],
        );
        assert_eq!(joined, Ok(ManagedValue::from("a, b")));
        let order = call_static(
            &runtime,
            "System.String",
            "Compare",
            &[STRING, STRING],
            &["a".into(), "b".into()],
        );
        assert_eq!(order, Ok(ManagedValue::I4(-1)));
    }
}
