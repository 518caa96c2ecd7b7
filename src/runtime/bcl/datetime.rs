//! `System.DateTime`.
//!
//! A `DateTime` is a reference-counted object holding a single private `_ticks` field
//! (100-nanosecond intervals since 0001-01-01T00:00:00). Calendar conversions use
//! proleptic Gregorian day arithmetic; there is no time zone database, so local time is UTC.
//!
//! # Emulated Members
//!
//! | Member | Description |
//! |--------|-------------|
//! | `.ctor()` / `.ctor(Int64)` | `MinValue` / from ticks |
//! | `.ctor(Int32, Int32, Int32[, Int32, Int32, Int32])` | From calendar components |
//! | `Now`, `UtcNow`, `Today`, `MinValue`, `MaxValue` | Static properties |
//! | `IsLeapYear(Int32)`, `DaysInMonth(Int32, Int32)`, `Compare(DateTime, DateTime)` | Static helpers |
//! | `Year` .. `Millisecond`, `DayOfWeek`, `DayOfYear`, `Ticks`, `Date` | Components |
//! | `AddTicks`, `AddMilliseconds`, `AddSeconds`, `AddMinutes`, `AddHours`, `AddDays`, `AddMonths`, `AddYears` | Arithmetic, returning a new instance |
//! | `ToString()` | `yyyy/MM/dd H:mm:ss` |
//! | `ToString(String)` | Standard (`d`, `D`, `t`, `T`, `g`, `G`, `s`, `u`) and custom formats |
//! | `Equals(Object)`, `GetHashCode()` | Value equality on ticks |

use std::time::{SystemTime, UNIX_EPOCH};

use crate::runtime::{
    bcl::{BOOL, I4, I8, OBJECT, R8, STRING},
    ArgsExt, AssemblyDef, CallContext, ClrRuntime, ManagedResult, ManagedValue, ObjectRef,
    TypeBuilder, TypeSig,
};

const DATETIME: &str = "System.DateTime";
const TICKS_FIELD: &str = "_ticks";

const TICKS_PER_MILLISECOND: i64 = 10_000;
const TICKS_PER_SECOND: i64 = TICKS_PER_MILLISECOND * 1_000;
const TICKS_PER_MINUTE: i64 = TICKS_PER_SECOND * 60;
const TICKS_PER_HOUR: i64 = TICKS_PER_MINUTE * 60;
const TICKS_PER_DAY: i64 = TICKS_PER_HOUR * 24;

/// Days from 0001-01-01 to 1970-01-01
const DAYS_TO_UNIX_EPOCH: i64 = 719_162;
/// Ticks of 9999-12-31T23:59:59.9999999
const MAX_TICKS: i64 = 3_155_378_975_999_999_999;

const DEFAULT_PATTERN: &str = "yyyy/MM/dd H:mm:ss";

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Calendar components of a tick count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Civil {
    year: i64,
    month: i64,
    day: i64,
    hour: i64,
    minute: i64,
    second: i64,
    fraction: i64,
}

fn is_leap_year(year: i64) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

fn days_in_month(year: i64, month: i64) -> i64 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Days since 1970-01-01 of a proleptic Gregorian date
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let yoe = year - era * 400;
    let mp = if month > 2 { month - 3 } else { month + 9 };
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Proleptic Gregorian date of a day count since 1970-01-01
fn civil_from_days(days: i64) -> (i64, i64, i64) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400;
    (if month <= 2 { year + 1 } else { year }, month, day)
}

fn civil(ticks: i64) -> Civil {
    let days = ticks / TICKS_PER_DAY;
    let time = ticks % TICKS_PER_DAY;
    let (year, month, day) = civil_from_days(days - DAYS_TO_UNIX_EPOCH);
    Civil {
        year,
        month,
        day,
        hour: time / TICKS_PER_HOUR,
        minute: time / TICKS_PER_MINUTE % 60,
        second: time / TICKS_PER_SECOND % 60,
        fraction: time % TICKS_PER_SECOND,
    }
}

fn date_ticks(year: i64, month: i64, day: i64) -> i64 {
    (days_from_civil(year, month, day) + DAYS_TO_UNIX_EPOCH) * TICKS_PER_DAY
}

fn now_ticks() -> i64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ticks = i64::try_from(since_epoch.as_nanos() / 100).unwrap_or(MAX_TICKS);
    (DAYS_TO_UNIX_EPOCH * TICKS_PER_DAY + ticks).min(MAX_TICKS)
}

fn out_of_range(ctx: &CallContext<'_>, message: &str) -> crate::ManagedFault {
    ctx.throw("System.ArgumentOutOfRangeException", message)
}

/// Allocates a `DateTime` holding `ticks`
fn datetime(runtime: &ClrRuntime, ticks: i64) -> ManagedResult<ObjectRef> {
    let object = runtime.allocate(DATETIME)?;
    object.set_field(TICKS_FIELD, ManagedValue::I8(ticks));
    Ok(object)
}

fn ticks_of(ctx: &CallContext<'_>) -> ManagedResult<i64> {
    let ticks = ctx.field(TICKS_FIELD)?;
    ticks.as_i64().ok_or_else(|| {
        ctx.throw(
            "System.InvalidCastException",
            format!("Object of type '{}' is not a DateTime.", ctx.this().map_or("", |t| t.ty().full_name())),
        )
    })
}

fn ticks_of_object(object: &ObjectRef) -> Option<i64> {
    if !object.ty().is_assignable_to(DATETIME) {
        return None;
    }
    object.field(TICKS_FIELD)?.as_i64()
}

fn init_ticks(ctx: &CallContext<'_>, ticks: i64) -> ManagedResult {
    ctx.set_field(TICKS_FIELD, ManagedValue::I8(ticks))?;
    Ok(ManagedValue::Void)
}

fn from_components(ctx: &CallContext<'_>, args: &[ManagedValue]) -> ManagedResult<i64> {
    let mut parts = [0i64; 6];
    for (index, part) in parts.iter_mut().enumerate().take(args.len()) {
        *part = args.i64_at(index)?;
    }
    let [year, month, day, hour, minute, second] = parts;

    if !(1..=9999).contains(&year)
        || !(1..=12).contains(&month)
        || day < 1
        || day > days_in_month(year, month)
    {
        return Err(out_of_range(
            ctx,
            "Year, Month, and Day parameters describe an un-representable DateTime.",
        ));
    }
    if !(0..24).contains(&hour) || !(0..60).contains(&minute) || !(0..60).contains(&second) {
        return Err(out_of_range(
            ctx,
            "Hour, Minute, and Second parameters describe an un-representable DateTime.",
        ));
    }

    Ok(date_ticks(year, month, day)
        + hour * TICKS_PER_HOUR
        + minute * TICKS_PER_MINUTE
        + second * TICKS_PER_SECOND)
}

fn shifted(ctx: &CallContext<'_>, delta: Option<i64>) -> ManagedResult {
    let ticks = ticks_of(ctx)?;
    match delta.and_then(|delta| ticks.checked_add(delta)) {
        Some(result) if (0..=MAX_TICKS).contains(&result) => {
            Ok(datetime(ctx.runtime(), result)?.into())
        }
        _ => Err(out_of_range(
            ctx,
            "The added or subtracted value results in an un-representable DateTime. (Parameter 'value')",
        )),
    }
}

fn add_scaled(ctx: &CallContext<'_>, args: &[ManagedValue], millis_per_unit: f64) -> ManagedResult {
    let value = args.f64_at(0)?;
    let millis = value * millis_per_unit + if value >= 0.0 { 0.5 } else { -0.5 };
    #[allow(clippy::cast_possible_truncation)]
    let delta = (millis.is_finite() && millis.abs() < 3.2e14)
        .then(|| millis.trunc() as i64 * TICKS_PER_MILLISECOND);
    shifted(ctx, delta)
}

fn add_months(ctx: &CallContext<'_>, months: i64) -> ManagedResult {
    let ticks = ticks_of(ctx)?;
    let parts = civil(ticks);
    let total = parts.year * 12 + (parts.month - 1) + months;
    let (year, month) = (total.div_euclid(12), total.rem_euclid(12) + 1);
    if !(1..=9999).contains(&year) {
        return Err(out_of_range(
            ctx,
            "The added or subtracted value results in an un-representable DateTime. (Parameter 'months')",
        ));
    }
    let day = parts.day.min(days_in_month(year, month));
    let result = date_ticks(year, month, day) + ticks % TICKS_PER_DAY;
    Ok(datetime(ctx.runtime(), result)?.into())
}

fn push_number(out: &mut String, value: i64, width: usize) {
    out.push_str(&format!("{:0>width$}", value, width = width));
}

/// Formats ticks with a custom format pattern
fn format_custom(ticks: i64, pattern: &str) -> String {
    let parts = civil(ticks);
    let weekday = usize::try_from((ticks / TICKS_PER_DAY + 1) % 7).unwrap_or_default();
    let month_name = MONTH_NAMES[usize::try_from(parts.month - 1).unwrap_or_default()];
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let run = chars[i..].iter().take_while(|&&next| next == c).count();
        match c {
            'y' => match run {
                1 => out.push_str(&(parts.year % 100).to_string()),
                2 => push_number(&mut out, parts.year % 100, 2),
                _ => push_number(&mut out, parts.year, run),
            },
            'M' => match run {
                1 => out.push_str(&parts.month.to_string()),
                2 => push_number(&mut out, parts.month, 2),
                3 => out.push_str(&month_name[..3]),
                _ => out.push_str(month_name),
            },
            'd' => match run {
                1 => out.push_str(&parts.day.to_string()),
                2 => push_number(&mut out, parts.day, 2),
                3 => out.push_str(&DAY_NAMES[weekday][..3]),
                _ => out.push_str(DAY_NAMES[weekday]),
            },
            'H' => push_number(&mut out, parts.hour, run.min(2)),
            'h' => {
                let hour = match parts.hour % 12 {
                    0 => 12,
                    hour => hour,
                };
                push_number(&mut out, hour, run.min(2));
            }
            'm' => push_number(&mut out, parts.minute, run.min(2)),
            's' => push_number(&mut out, parts.second, run.min(2)),
            'f' | 'F' => {
                let digits = run.min(7);
                let fraction = format!("{:07}", parts.fraction);
                let fraction = &fraction[..digits];
                if c == 'F' {
                    out.push_str(fraction.trim_end_matches('0'));
                } else {
                    out.push_str(fraction);
                }
            }
            't' => {
                let designator = if parts.hour < 12 { "AM" } else { "PM" };
                out.push_str(if run == 1 { &designator[..1] } else { designator });
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&next| next == c)
                    .map_or(chars.len(), |offset| i + 1 + offset);
                out.extend(&chars[i + 1..end]);
                i = end + 1;
                continue;
            }
            '\\' => {
                if let Some(next) = chars.get(i + 1) {
                    out.push(*next);
                }
                i += 2;
                continue;
            }
            other => {
                for _ in 0..run {
                    out.push(other);
                }
            }
        }
        i += run;
    }

    out
}

/// Formats ticks with a standard or custom format string
fn format_ticks(ctx: &CallContext<'_>, ticks: i64, format: &str) -> ManagedResult<String> {
    let pattern = match format {
        "" | "G" => DEFAULT_PATTERN,
        "d" => "yyyy/MM/dd",
        "D" => "dddd, MMMM d, yyyy",
        "t" => "H:mm",
        "T" => "H:mm:ss",
        "g" => "yyyy/MM/dd H:mm",
        "s" => "yyyy'-'MM'-'dd'T'HH':'mm':'ss",
        "u" => "yyyy'-'MM'-'dd HH':'mm':'ss'Z'",
        single if single.chars().count() == 1 => {
            return Err(ctx.throw(
                "System.FormatException",
                "Input string was not in a correct format.",
            ))
        }
        custom => custom,
    };
    Ok(format_custom(ticks, pattern))
}

fn component(
    extract: fn(&Civil) -> i64,
) -> impl Fn(&CallContext<'_>, &[ManagedValue]) -> ManagedResult + Send + Sync + 'static {
    move |ctx: &CallContext<'_>, _: &[ManagedValue]| {
        let value = extract(&civil(ticks_of(ctx)?));
        Ok(ManagedValue::I4(i32::try_from(value).unwrap_or_default()))
    }
}

pub(crate) fn register(asm: &mut AssemblyDef) {
    let this_type = TypeSig::class(DATETIME);

    let ty = TypeBuilder::value_type("System", "DateTime")
        .private_field(TICKS_FIELD, I8)
        .constructor(&[], |ctx, _| init_ticks(ctx, 0))
        .constructor(&[I8], |ctx, args| {
            let ticks = args.i64_at(0)?;
            if !(0..=MAX_TICKS).contains(&ticks) {
                return Err(out_of_range(
                    ctx,
                    "Ticks must be between DateTime.MinValue.Ticks and DateTime.MaxValue.Ticks. (Parameter 'ticks')",
                ));
            }
            init_ticks(ctx, ticks)
        })
        .constructor(&[I4, I4, I4], |ctx, args| {
            let ticks = from_components(ctx, args)?;
            init_ticks(ctx, ticks)
        })
        .constructor(&[I4, I4, I4, I4, I4, I4], |ctx, args| {
            let ticks = from_components(ctx, args)?;
            init_ticks(ctx, ticks)
        })
        .static_property("Now", this_type.clone(), |ctx, _| {
            Ok(datetime(ctx.runtime(), now_ticks())?.into())
        })
        .static_property("UtcNow", this_type.clone(), |ctx, _| {
            Ok(datetime(ctx.runtime(), now_ticks())?.into())
        })
        .static_property("Today", this_type.clone(), |ctx, _| {
            let now = now_ticks();
            Ok(datetime(ctx.runtime(), now - now % TICKS_PER_DAY)?.into())
        })
        .static_property("MinValue", this_type.clone(), |ctx, _| {
            Ok(datetime(ctx.runtime(), 0)?.into())
        })
        .static_property("MaxValue", this_type.clone(), |ctx, _| {
            Ok(datetime(ctx.runtime(), MAX_TICKS)?.into())
        })
        .static_method("IsLeapYear", &[I4], BOOL, |ctx, args| {
            let year = i64::from(args.i32_at(0)?);
            if !(1..=9999).contains(&year) {
                return Err(out_of_range(ctx, "Year must be between 1 and 9999. (Parameter 'year')"));
            }
            Ok(ManagedValue::Bool(is_leap_year(year)))
        })
        .static_method("DaysInMonth", &[I4, I4], I4, |ctx, args| {
            let (year, month) = (i64::from(args.i32_at(0)?), i64::from(args.i32_at(1)?));
            if !(1..=12).contains(&month) {
                return Err(out_of_range(ctx, "Month must be between one and twelve. (Parameter 'month')"));
            }
            #[allow(clippy::cast_possible_truncation)]
            Ok(ManagedValue::I4(days_in_month(year, month) as i32))
        })
        .static_method("Compare", &[this_type.clone(), this_type.clone()], I4, |ctx, args| {
            let a = ticks_of_object(args.object_at(0)?);
            let b = ticks_of_object(args.object_at(1)?);
            match (a, b) {
                (Some(a), Some(b)) => Ok(ManagedValue::I4(a.cmp(&b) as i32)),
                _ => Err(ctx.throw("System.ArgumentException", "Object must be of type DateTime.")),
            }
        })
        .property("Year", I4, component(|c| c.year))
        .property("Month", I4, component(|c| c.month))
        .property("Day", I4, component(|c| c.day))
        .property("Hour", I4, component(|c| c.hour))
        .property("Minute", I4, component(|c| c.minute))
        .property("Second", I4, component(|c| c.second))
        .property("Millisecond", I4, component(|c| c.fraction / TICKS_PER_MILLISECOND))
        .property("DayOfWeek", I4, |ctx, _| {
            let days = ticks_of(ctx)? / TICKS_PER_DAY;
            #[allow(clippy::cast_possible_truncation)]
            Ok(ManagedValue::I4(((days + 1) % 7) as i32))
        })
        .property("DayOfYear", I4, |ctx, _| {
            let ticks = ticks_of(ctx)?;
            let year = civil(ticks).year;
            let day = ticks / TICKS_PER_DAY - date_ticks(year, 1, 1) / TICKS_PER_DAY + 1;
            #[allow(clippy::cast_possible_truncation)]
            Ok(ManagedValue::I4(day as i32))
        })
        .property("Ticks", I8, |ctx, _| Ok(ManagedValue::I8(ticks_of(ctx)?)))
        .property("Date", this_type.clone(), |ctx, _| {
            let ticks = ticks_of(ctx)?;
            Ok(datetime(ctx.runtime(), ticks - ticks % TICKS_PER_DAY)?.into())
        })
        .method("AddTicks", &[I8], this_type.clone(), |ctx, args| {
            shifted(ctx, Some(args.i64_at(0)?))
        })
        .method("AddMilliseconds", &[R8], this_type.clone(), |ctx, args| {
            add_scaled(ctx, args, 1.0)
        })
        .method("AddSeconds", &[R8], this_type.clone(), |ctx, args| {
            add_scaled(ctx, args, 1_000.0)
        })
        .method("AddMinutes", &[R8], this_type.clone(), |ctx, args| {
            add_scaled(ctx, args, 60_000.0)
        })
        .method("AddHours", &[R8], this_type.clone(), |ctx, args| {
            add_scaled(ctx, args, 3_600_000.0)
        })
        .method("AddDays", &[R8], this_type.clone(), |ctx, args| {
            add_scaled(ctx, args, 86_400_000.0)
        })
        .method("AddMonths", &[I4], this_type.clone(), |ctx, args| {
            add_months(ctx, args.i64_at(0)?)
        })
        .method("AddYears", &[I4], this_type, |ctx, args| {
            add_months(ctx, args.i64_at(0)? * 12)
        })
        .method("ToString", &[], STRING, |ctx, _| {
            Ok(format_custom(ticks_of(ctx)?, DEFAULT_PATTERN).into())
        })
        .method("ToString", &[STRING], STRING, |ctx, args| {
            let format = args.opt_str_at(0).unwrap_or_default();
            Ok(format_ticks(ctx, ticks_of(ctx)?, format)?.into())
        })
        .method("Equals", &[OBJECT], BOOL, |ctx, args| {
            let ticks = ticks_of(ctx)?;
            let other = args.value_at(0).as_object().and_then(ticks_of_object);
            Ok(ManagedValue::Bool(other == Some(ticks)))
        })
        .method("GetHashCode", &[], I4, |ctx, _| {
            let ticks = ticks_of(ctx)?;
            #[allow(clippy::cast_possible_truncation)]
            Ok(ManagedValue::I4((ticks ^ (ticks >> 32)) as i32))
        })
        .build();
    asm.add(ty);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::bcl::testing::{call_static, construct, get_property, runtime};

    #[test]
    fn test_civil_round_trip() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(date_ticks(1970, 1, 1), 621_355_968_000_000_000);
        assert_eq!(date_ticks(1, 1, 1), 0);
        assert_eq!(civil(MAX_TICKS).year, 9999);
        assert_eq!(civil_from_days(days_from_civil(2024, 2, 29)), (2024, 2, 29));
    }

    #[test]
    fn test_epoch_components() {
        let runtime = runtime();
        let date = construct(&runtime, DATETIME, &[I4, I4, I4], &[1970.into(), 1.into(), 1.into()])
            .unwrap();
        assert_eq!(get_property(&runtime, &date, "Year"), Ok(ManagedValue::I4(1970)));
        assert_eq!(get_property(&runtime, &date, "DayOfWeek"), Ok(ManagedValue::I4(4)));
        assert_eq!(
            runtime.display(&ManagedValue::Object(date)).unwrap(),
            "1970/01/01 0:00:00"
        );
    }

    #[test]
    fn test_invalid_components() {
        let runtime = runtime();
        let fault = construct(&runtime, DATETIME, &[I4, I4, I4], &[2023.into(), 2.into(), 29.into()])
            .unwrap_err();
        assert_eq!(fault.type_name(), "System.ArgumentOutOfRangeException");
    }

    #[test]
    fn test_arithmetic_and_formats() {
        let runtime = runtime();
        let date = construct(
            &runtime,
            DATETIME,
            &[I4, I4, I4, I4, I4, I4],
            &[2024.into(), 1.into(), 31.into(), 13.into(), 5.into(), 0.into()],
        )
        .unwrap();

        let next = runtime.call_method(&date, "AddMonths", &[1.into()]).unwrap();
        let next = next.as_object().unwrap();
        assert_eq!(
            runtime
                .call_method(next, "ToString", &["yyyy-MM-dd HH:mm tt ddd MMMM".into()])
                .unwrap(),
            ManagedValue::from("2024-02-29 13:05 PM Thu February")
        );

        let later = runtime.call_method(&date, "AddDays", &[1.5.into()]).unwrap();
        assert_eq!(
            runtime.display(&later).unwrap(),
            "2024/02/02 1:05:00"
        );
        assert_eq!(
            runtime.call_method(&date, "ToString", &["s".into()]).unwrap(),
            ManagedValue::from("2024-01-31T13:05:00")
        );
    }

    #[test]
    fn test_leap_years() {
        let runtime = runtime();
        let leap = |year: i32| call_static(&runtime, DATETIME, "IsLeapYear", &[I4], &[year.into()]);
        assert_eq!(leap(2000), Ok(ManagedValue::Bool(true)));
        assert_eq!(leap(1900), Ok(ManagedValue::Bool(false)));
        assert_eq!(leap(0).unwrap_err().type_name(), "System.ArgumentOutOfRangeException");
    }
}
