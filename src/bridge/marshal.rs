//! Value Marshaller.
//!
//! Converts values between the host and the managed runtime.
//!
//! # Host to Managed
//!
//! | Host value | Natural form | Targeted form |
//! |------------|--------------|---------------|
//! | `undefined`, `null` | `null` | `null` for reference types, mismatch for value types |
//! | boolean | `Boolean` | `Boolean` |
//! | number | `Int32`, `Int64` or `Double`, narrowest lossless | any numeric type that holds it exactly; enum types |
//! | string | `String` | `String`; `Char` for one-character strings |
//! | function | delegate calling back into the host | delegate of the parameter's type |
//! | object handle | the referenced object | the object, when assignable |
//!
//! Functions that were produced from a managed delegate hand back that delegate instead of a
//! new wrapper, so subscribing and unsubscribing the same value works in both directions.
//!
//! # Managed to Host
//!
//! Primitives become numbers, booleans and strings (a `Char` becomes a one-character string),
//! `void` becomes `undefined`, objects become new [`ObjectHandle`]s and delegates become
//! host functions. A delegate that wraps a host function unwraps to that function.
//!
//! Round-tripping `undefined` yields `null`.

use std::{
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::{
    bridge::{asyncbridge::HostDelegate, ObjectHandle, Session},
    host::{EventLoop, HostFunction, HostValue},
    runtime::{DelegateRef, ElementType, ManagedValue, RuntimeHost, RuntimeTypeRef, TypeSig},
    Error, Result,
};

const EXACT: u32 = 3;
const WIDENING: u32 = 2;
const COERCION: u32 = 1;

const NUMERIC: [ElementType; 10] = [
    ElementType::I1,
    ElementType::U1,
    ElementType::I2,
    ElementType::U2,
    ElementType::I4,
    ElementType::U4,
    ElementType::I8,
    ElementType::U8,
    ElementType::R4,
    ElementType::R8,
];

/// Smallest value outside the `Int64` range on the positive side, `2^63`
const INT64_LIMIT: f64 = 9.223_372_036_854_775_808e18;

/// Describes a host value for mismatch errors
pub(crate) fn describe(value: &HostValue) -> String {
    match value {
        HostValue::Undefined => "undefined".to_string(),
        HostValue::Null => "null".to_string(),
        HostValue::Bool(_) => "boolean".to_string(),
        HostValue::Number(n) => format!("number {}", HostValue::Number(*n)),
        HostValue::String(s) => format!("string {:?}", s),
        HostValue::Function(f) => format!("function {}", f.name()),
        HostValue::Namespace(node) => format!("namespace {}", node.path()),
        HostValue::Class(class) => format!("class {}", class.full_name()),
        HostValue::Object(handle) => format!("object {}", handle.type_name()),
        HostValue::Error(_) => "error".to_string(),
    }
}

/// Natural managed form of a host number
pub fn natural_number(n: f64) -> ManagedValue {
    if n.is_finite() && n.fract() == 0.0 {
        if n >= f64::from(i32::MIN) && n <= f64::from(i32::MAX) {
            return ManagedValue::I4(n as i32);
        }
        if (-INT64_LIMIT..INT64_LIMIT).contains(&n) {
            return ManagedValue::I8(n as i64);
        }
    }
    ManagedValue::R8(n)
}

fn integral(n: f64, element: ElementType) -> Result<ManagedValue> {
    let mismatch = || mismatch_error!(element.full_name(), "number {}", HostValue::Number(n));
    if !n.is_finite() || n.fract() != 0.0 {
        return Err(mismatch());
    }

    // Integral doubles outside the i128 range saturate, which still fails every check below
    let wide = n as i128;
    let value = match element {
        ElementType::I1 => i8::try_from(wide).map(ManagedValue::I1).ok(),
        ElementType::U1 => u8::try_from(wide).map(ManagedValue::U1).ok(),
        ElementType::I2 => i16::try_from(wide).map(ManagedValue::I2).ok(),
        ElementType::U2 => u16::try_from(wide).map(ManagedValue::U2).ok(),
        ElementType::I4 => i32::try_from(wide).map(ManagedValue::I4).ok(),
        ElementType::U4 => u32::try_from(wide).map(ManagedValue::U4).ok(),
        ElementType::I8 => i64::try_from(wide).map(ManagedValue::I8).ok(),
        ElementType::U8 => u64::try_from(wide).map(ManagedValue::U8).ok(),
        _ => None,
    };
    value.ok_or_else(mismatch)
}

fn single(n: f64) -> Result<ManagedValue> {
    let narrowed = n as f32;
    if f64::from(narrowed) == n || n.is_nan() {
        Ok(ManagedValue::R4(narrowed))
    } else {
        Err(mismatch_error!("System.Single", "number {}", HostValue::Number(n)))
    }
}

fn number_as(n: f64, element: ElementType) -> Result<ManagedValue> {
    match element {
        ElementType::R8 => Ok(ManagedValue::R8(n)),
        ElementType::R4 => single(n),
        _ => integral(n, element),
    }
}

pub(crate) fn delegate_for(session: &Session, function: &HostFunction, delegate_type: &str) -> ManagedValue {
    if let Some(origin) = function.origin() {
        return ManagedValue::Delegate(origin.clone());
    }
    let dispatcher = EventLoop::current().dispatcher();
    ManagedValue::Delegate(Arc::new(HostDelegate::new(
        session,
        function.clone(),
        dispatcher,
        delegate_type,
    )))
}

fn exception_of(error: &Error) -> Option<ManagedValue> {
    error
        .fault()
        .and_then(|fault| fault.exception())
        .map(|exception| ManagedValue::Object(exception.clone()))
}

/// Converts a host value to its natural managed form
///
/// # Errors
/// [`Error::TypeMismatch`] for namespaces and classes, [`Error::ObjectDisposed`] for
/// disposed handles.
pub fn to_managed(session: &Session, value: &HostValue) -> Result<ManagedValue> {
    match value {
        HostValue::Undefined | HostValue::Null => Ok(ManagedValue::Null),
        HostValue::Bool(b) => Ok(ManagedValue::Bool(*b)),
        HostValue::Number(n) => Ok(natural_number(*n)),
        HostValue::String(s) => Ok(ManagedValue::String(s.clone())),
        HostValue::Function(function) => Ok(delegate_for(session, function, "System.Delegate")),
        HostValue::Object(handle) => Ok(ManagedValue::Object(handle.object()?)),
        HostValue::Error(error) => {
            exception_of(error).ok_or_else(|| mismatch_error!("System.Object", describe(value)))
        }
        HostValue::Namespace(_) | HostValue::Class(_) => {
            Err(mismatch_error!("System.Object", describe(value)))
        }
    }
}

/// Converts a host value to the managed type `sig` without loss
///
/// # Errors
/// [`Error::TypeMismatch`] when the value does not fit the target type.
pub fn to_managed_as(session: &Session, value: &HostValue, sig: &TypeSig) -> Result<ManagedValue> {
    let mismatch = || mismatch_error!(sig.type_name(), describe(value));

    match sig {
        TypeSig::Primitive(ElementType::Object) => to_managed(session, value),
        TypeSig::Primitive(element) => match (element, value) {
            (ElementType::Boolean, HostValue::Bool(b)) => Ok(ManagedValue::Bool(*b)),
            (ElementType::String, HostValue::String(s)) => Ok(ManagedValue::String(s.clone())),
            (ElementType::String, v) if v.is_nullish() => Ok(ManagedValue::Null),
            (ElementType::Char, HostValue::String(s)) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(ManagedValue::Char(c)),
                    _ => Err(mismatch()),
                }
            }
            (element, HostValue::Number(n)) if NUMERIC.contains(element) => number_as(*n, *element),
            _ => Err(mismatch()),
        },
        TypeSig::Delegate(name) => match value {
            HostValue::Function(function) => Ok(delegate_for(session, function, name)),
            v if v.is_nullish() => Ok(ManagedValue::Null),
            _ => Err(mismatch()),
        },
        TypeSig::Class(name) => {
            let target = session.host().resolve_type(name).ok();
            match value {
                v if v.is_nullish() => match target {
                    Some(ty) if ty.is_value_type() => Err(mismatch()),
                    _ => Ok(ManagedValue::Null),
                },
                HostValue::Object(handle) => {
                    let object = handle.object()?;
                    if object.ty().is_assignable_to(name) {
                        Ok(ManagedValue::Object(object))
                    } else {
                        Err(mismatch())
                    }
                }
                HostValue::Number(n) if target.as_ref().is_some_and(|ty| is_enum(ty)) => {
                    integral(*n, ElementType::I4).map_err(|_| mismatch())
                }
                HostValue::Error(error) => match exception_of(error) {
                    Some(ManagedValue::Object(exception))
                        if exception.ty().is_assignable_to(name) =>
                    {
                        Ok(ManagedValue::Object(exception))
                    }
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            }
        }
    }
}

fn is_enum(ty: &RuntimeTypeRef) -> bool {
    ty.flags().contains(crate::runtime::TypeFlags::ENUM)
}

/// Converts a managed value to a host value
pub fn to_host(session: &Session, value: ManagedValue) -> HostValue {
    match value {
        ManagedValue::Void => HostValue::Undefined,
        ManagedValue::Null => HostValue::Null,
        ManagedValue::Bool(b) => HostValue::Bool(b),
        ManagedValue::Char(c) => HostValue::string(c.to_string()),
        ManagedValue::I1(v) => HostValue::Number(f64::from(v)),
        ManagedValue::U1(v) => HostValue::Number(f64::from(v)),
        ManagedValue::I2(v) => HostValue::Number(f64::from(v)),
        ManagedValue::U2(v) => HostValue::Number(f64::from(v)),
        ManagedValue::I4(v) => HostValue::Number(f64::from(v)),
        ManagedValue::U4(v) => HostValue::Number(f64::from(v)),
        ManagedValue::I8(v) => HostValue::Number(v as f64),
        ManagedValue::U8(v) => HostValue::Number(v as f64),
        ManagedValue::R4(v) => HostValue::Number(f64::from(v)),
        ManagedValue::R8(v) => HostValue::Number(v),
        ManagedValue::String(s) => HostValue::String(s),
        ManagedValue::Object(object) => {
            let class = session.class_for(session.host().type_of(&object));
            HostValue::Object(ObjectHandle::new(class, object))
        }
        ManagedValue::Delegate(delegate) => {
            match delegate.as_any().downcast_ref::<HostDelegate>() {
                Some(host) => HostValue::Function(host.function().clone()),
                None => HostValue::Function(wrap_delegate(session, delegate)),
            }
        }
    }
}

/// Wraps a managed delegate as a host function
pub(crate) fn wrap_delegate(session: &Session, delegate: DelegateRef) -> HostFunction {
    let target = delegate.clone();
    let session = session.clone();
    HostFunction::wrapping(delegate, move |args| {
        let managed = args
            .iter()
            .map(|arg| to_managed(&session, arg))
            .collect::<Result<Vec<_>>>()?;
        let result = target.invoke(&managed).map_err(Error::InvocationError)?;
        Ok(to_host(&session, result))
    })
}

/// The overload-relevant shape of a host argument.
///
/// Two argument lists with equal shapes select the same overload, which is what makes
/// overload picks cacheable.
#[derive(Clone, Debug)]
pub(crate) enum ArgShape {
    Null,
    Bool,
    Number { natural: ElementType, fits: u16 },
    String { single_char: bool },
    Function,
    Object(RuntimeTypeRef),
    Opaque,
}

fn numeric_bit(element: ElementType) -> u16 {
    NUMERIC
        .iter()
        .position(|candidate| *candidate == element)
        .map_or(0, |index| 1 << index)
}

impl ArgShape {
    pub(crate) fn of(value: &HostValue) -> Result<ArgShape> {
        Ok(match value {
            HostValue::Undefined | HostValue::Null => ArgShape::Null,
            HostValue::Bool(_) => ArgShape::Bool,
            HostValue::Number(n) => {
                let natural = natural_number(*n)
                    .element_type()
                    .unwrap_or(ElementType::R8);
                let fits = NUMERIC
                    .iter()
                    .filter(|element| number_as(*n, **element).is_ok())
                    .fold(0, |mask, element| mask | numeric_bit(*element));
                ArgShape::Number { natural, fits }
            }
            HostValue::String(s) => ArgShape::String {
                single_char: s.chars().count() == 1,
            },
            HostValue::Function(_) => ArgShape::Function,
            HostValue::Object(handle) => ArgShape::Object(handle.object()?.ty().clone()),
            HostValue::Error(error) => match exception_of(error) {
                Some(ManagedValue::Object(exception)) => ArgShape::Object(exception.ty().clone()),
                _ => ArgShape::Opaque,
            },
            HostValue::Namespace(_) | HostValue::Class(_) => ArgShape::Opaque,
        })
    }

    /// Host-side description used in mismatch errors
    pub(crate) fn describe(&self) -> String {
        match self {
            ArgShape::Null => "null".to_string(),
            ArgShape::Bool => "boolean".to_string(),
            ArgShape::Number { natural, .. } => format!("number ({})", natural.full_name()),
            ArgShape::String { .. } => "string".to_string(),
            ArgShape::Function => "function".to_string(),
            ArgShape::Object(ty) => ty.full_name().to_string(),
            ArgShape::Opaque => "opaque value".to_string(),
        }
    }
}

impl PartialEq for ArgShape {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ArgShape::Object(a), ArgShape::Object(b)) => a.full_name() == b.full_name(),
            (
                ArgShape::Number { natural: a, fits: fa },
                ArgShape::Number { natural: b, fits: fb },
            ) => a == b && fa == fb,
            (ArgShape::String { single_char: a }, ArgShape::String { single_char: b }) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl Eq for ArgShape {}

impl Hash for ArgShape {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ArgShape::Number { natural, fits } => {
                natural.hash(state);
                fits.hash(state);
            }
            ArgShape::String { single_char } => single_char.hash(state),
            ArgShape::Object(ty) => ty.full_name().hash(state),
            _ => {}
        }
    }
}

fn widens(from: ElementType, to: ElementType) -> bool {
    matches!(
        (from, to),
        (ElementType::I4, ElementType::I8 | ElementType::R4 | ElementType::R8)
            | (ElementType::I8, ElementType::R4 | ElementType::R8)
    )
}

/// Scores how well an argument of `shape` matches a parameter of type `sig`.
///
/// `None` means the argument cannot be converted at all.
///
/// | Match | Score |
/// |-------|-------|
/// | exact type | 3 |
/// | assignable, or a widening numeric conversion | 2 |
/// | lossless coercion, including anything to `System.Object` | 1 |
pub(crate) fn score(host: &dyn RuntimeHost, shape: &ArgShape, sig: &TypeSig) -> Option<u32> {
    match sig {
        TypeSig::Primitive(ElementType::Object) => match shape {
            ArgShape::Opaque => None,
            _ => Some(COERCION),
        },
        TypeSig::Primitive(element) => match shape {
            ArgShape::Null => (*element == ElementType::String).then_some(COERCION),
            ArgShape::Bool => (*element == ElementType::Boolean).then_some(EXACT),
            ArgShape::Number { natural, fits } => {
                if natural == element {
                    Some(EXACT)
                } else if fits & numeric_bit(*element) == 0 {
                    None
                } else if widens(*natural, *element) {
                    Some(WIDENING)
                } else {
                    Some(COERCION)
                }
            }
            ArgShape::String { single_char } => match element {
                ElementType::String => Some(EXACT),
                ElementType::Char if *single_char => Some(COERCION),
                _ => None,
            },
            _ => None,
        },
        TypeSig::Delegate(_) => match shape {
            ArgShape::Function => Some(WIDENING),
            ArgShape::Null => Some(COERCION),
            _ => None,
        },
        TypeSig::Class(name) => match shape {
            ArgShape::Object(ty) if ty.full_name() == &**name => Some(EXACT),
            ArgShape::Object(ty) if ty.is_assignable_to(name) => Some(WIDENING),
            ArgShape::Null => match host.resolve_type(name) {
                Ok(ty) if ty.is_value_type() => None,
                _ => Some(COERCION),
            },
            ArgShape::Number { fits, .. } if fits & numeric_bit(ElementType::I4) != 0 => {
                match host.resolve_type(name) {
                    Ok(ty) if is_enum(&ty) => Some(COERCION),
                    _ => None,
                }
            }
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bridge::Session, config::RuntimeConfig, runtime::ClrRuntime, BridgeConfig,
    };

    fn session() -> Session {
        let runtime = ClrRuntime::new(RuntimeConfig::for_testing()).unwrap();
        Session::new(runtime, BridgeConfig::default())
    }

    #[test]
    fn test_natural_numbers() {
        assert_eq!(natural_number(42.0), ManagedValue::I4(42));
        assert_eq!(natural_number(-2147483648.0), ManagedValue::I4(i32::MIN));
        assert_eq!(natural_number(2147483648.0), ManagedValue::I8(2147483648));
        assert_eq!(natural_number(1.5), ManagedValue::R8(1.5));
        assert_eq!(natural_number(INT64_LIMIT), ManagedValue::R8(INT64_LIMIT));
        assert!(matches!(natural_number(f64::NAN), ManagedValue::R8(n) if n.is_nan()));
    }

    #[test]
    fn test_targeted_conversion() {
        let session = session();
        let byte = TypeSig::Primitive(ElementType::U1);
        assert_eq!(
            to_managed_as(&session, &HostValue::Number(255.0), &byte),
            Ok(ManagedValue::U1(255))
        );
        assert!(matches!(
            to_managed_as(&session, &HostValue::Number(256.0), &byte),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(to_managed_as(&session, &HostValue::Number(1.5), &TypeSig::Primitive(ElementType::I8)).is_err());

        let single = TypeSig::Primitive(ElementType::R4);
        assert_eq!(
            to_managed_as(&session, &HostValue::Number(0.5), &single),
            Ok(ManagedValue::R4(0.5))
        );
        assert!(to_managed_as(&session, &HostValue::Number(0.1), &single).is_err());

        let char_sig = TypeSig::Primitive(ElementType::Char);
        assert_eq!(
            to_managed_as(&session, &"x".into(), &char_sig),
            Ok(ManagedValue::Char('x'))
        );
        assert!(to_managed_as(&session, &"xy".into(), &char_sig).is_err());

        let date = TypeSig::class("System.DateTime");
        assert!(to_managed_as(&session, &HostValue::Null, &date).is_err());
        assert_eq!(
            to_managed_as(&session, &HostValue::Undefined, &TypeSig::class("System.Exception")),
            Ok(ManagedValue::Null)
        );
    }

    #[test]
    fn test_managed_to_host() {
        let session = session();
        assert_eq!(to_host(&session, ManagedValue::Void), HostValue::Undefined);
        assert_eq!(to_host(&session, ManagedValue::Char('q')), HostValue::from("q"));
        assert_eq!(to_host(&session, ManagedValue::U8(7)), HostValue::Number(7.0));
        assert_eq!(to_host(&session, ManagedValue::R4(0.25)), HostValue::Number(0.25));
    }

    #[test]
    fn test_scores() {
        let session = session();
        let host = session.host();
        let int = ArgShape::of(&HostValue::Number(5.0)).unwrap();
        assert_eq!(score(host, &int, &TypeSig::Primitive(ElementType::I4)), Some(3));
        assert_eq!(score(host, &int, &TypeSig::Primitive(ElementType::I8)), Some(2));
        assert_eq!(score(host, &int, &TypeSig::Primitive(ElementType::U1)), Some(1));
        assert_eq!(score(host, &int, &TypeSig::Primitive(ElementType::Object)), Some(1));
        assert_eq!(score(host, &int, &TypeSig::Primitive(ElementType::String)), None);

        let fraction = ArgShape::of(&HostValue::Number(2.5)).unwrap();
        assert_eq!(score(host, &fraction, &TypeSig::Primitive(ElementType::I4)), None);
        assert_eq!(score(host, &fraction, &TypeSig::Primitive(ElementType::R4)), Some(1));

        let status = TypeSig::class("System.Threading.Tasks.TaskStatus");
        assert_eq!(score(host, &int, &status), Some(1));
        assert_eq!(
            score(host, &ArgShape::Null, &TypeSig::class("System.DateTime")),
            None
        );
    }

    #[test]
    fn test_shape_keys() {
        let a = ArgShape::of(&HostValue::Number(1.0)).unwrap();
        let b = ArgShape::of(&HostValue::Number(2.0)).unwrap();
        let c = ArgShape::of(&HostValue::Number(300.0)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(
            ArgShape::of(&"a".into()).unwrap(),
            ArgShape::of(&"ab".into()).unwrap()
        );
    }
}
