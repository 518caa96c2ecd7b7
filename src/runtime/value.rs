//! Managed values.
//!
//! [`ManagedValue`] is the currency of the runtime: arguments, return values, field contents
//! and property values are all `ManagedValue`s. Numeric variants keep their exact managed width
//! so the marshaller can enforce lossless conversion at the boundary.
//!
//! Delegates are trait objects implementing [`ManagedCallable`]. The runtime never needs to know
//! whether a delegate wraps native code or a host function; it only invokes it.

use std::{any::Any, fmt, sync::Arc};

use crate::{
    error::ManagedFault,
    runtime::{ElementType, ObjectRef, TypeSig},
};

/// Result of executing managed code
pub type ManagedResult<T = ManagedValue> = std::result::Result<T, ManagedFault>;

/// A reference-counted delegate
pub type DelegateRef = Arc<dyn ManagedCallable>;

/// Anything managed code can invoke as a delegate.
pub trait ManagedCallable: Send + Sync {
    /// Invokes the delegate
    ///
    /// # Errors
    /// Returns the managed fault raised by the delegate target.
    fn invoke(&self, args: &[ManagedValue]) -> ManagedResult;

    /// Full name of the delegate type
    fn delegate_type(&self) -> &str {
        "System.Delegate"
    }

    /// Identity of the invocation target, used for `Delegate.Equals` and event removal.
    ///
    /// Two delegates wrapping the same target compare equal even when the wrappers differ.
    fn target_id(&self) -> usize {
        self as *const Self as *const () as usize
    }

    /// Access to the concrete delegate type
    fn as_any(&self) -> &dyn Any;
}

/// A delegate backed by a Rust closure.
pub struct NativeDelegate {
    name: String,
    func: Box<dyn Fn(&[ManagedValue]) -> ManagedResult + Send + Sync>,
}

impl NativeDelegate {
    /// Creates a new delegate
    ///
    /// ## Arguments
    /// * `name` - Delegate type name reported by [`ManagedCallable::delegate_type`]
    /// * `func` - The delegate body
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[ManagedValue]) -> ManagedResult + Send + Sync + 'static,
    {
        NativeDelegate {
            name: name.into(),
            func: Box::new(func),
        }
    }

    /// Wraps this delegate into a [`ManagedValue`]
    pub fn into_value(self) -> ManagedValue {
        ManagedValue::Delegate(Arc::new(self))
    }
}

impl ManagedCallable for NativeDelegate {
    fn invoke(&self, args: &[ManagedValue]) -> ManagedResult {
        (self.func)(args)
    }

    fn delegate_type(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A value in the managed runtime
#[derive(Clone, Default)]
pub enum ManagedValue {
    /// Result of a void method
    #[default]
    Void,
    /// Null reference
    Null,
    /// `System.Boolean`
    Bool(bool),
    /// `System.Char`
    Char(char),
    /// `System.SByte`
    I1(i8),
    /// `System.Byte`
    U1(u8),
    /// `System.Int16`
    I2(i16),
    /// `System.UInt16`
    U2(u16),
    /// `System.Int32`
    I4(i32),
    /// `System.UInt32`
    U4(u32),
    /// `System.Int64`
    I8(i64),
    /// `System.UInt64`
    U8(u64),
    /// `System.Single`
    R4(f32),
    /// `System.Double`
    R8(f64),
    /// `System.String`
    String(Arc<str>),
    /// Reference to a heap object
    Object(ObjectRef),
    /// Delegate
    Delegate(DelegateRef),
}

impl ManagedValue {
    /// Creates a string value
    pub fn string(value: impl AsRef<str>) -> Self {
        ManagedValue::String(Arc::from(value.as_ref()))
    }

    /// Default value for a location of the given type
    ///
    /// ## Arguments
    /// * `sig` - The location's type
    #[must_use]
    pub fn default_for(sig: &TypeSig) -> Self {
        match sig.element() {
            Some(ElementType::Boolean) => ManagedValue::Bool(false),
            Some(ElementType::Char) => ManagedValue::Char('\0'),
            Some(ElementType::I1) => ManagedValue::I1(0),
            Some(ElementType::U1) => ManagedValue::U1(0),
            Some(ElementType::I2) => ManagedValue::I2(0),
            Some(ElementType::U2) => ManagedValue::U2(0),
            Some(ElementType::I4) => ManagedValue::I4(0),
            Some(ElementType::U4) => ManagedValue::U4(0),
            Some(ElementType::I8) => ManagedValue::I8(0),
            Some(ElementType::U8) => ManagedValue::U8(0),
            Some(ElementType::R4) => ManagedValue::R4(0.0),
            Some(ElementType::R8) => ManagedValue::R8(0.0),
            Some(ElementType::Void) => ManagedValue::Void,
            _ => ManagedValue::Null,
        }
    }

    /// Element type of primitive values
    #[must_use]
    pub fn element_type(&self) -> Option<ElementType> {
        match self {
            ManagedValue::Void => Some(ElementType::Void),
            ManagedValue::Bool(_) => Some(ElementType::Boolean),
            ManagedValue::Char(_) => Some(ElementType::Char),
            ManagedValue::I1(_) => Some(ElementType::I1),
            ManagedValue::U1(_) => Some(ElementType::U1),
            ManagedValue::I2(_) => Some(ElementType::I2),
            ManagedValue::U2(_) => Some(ElementType::U2),
            ManagedValue::I4(_) => Some(ElementType::I4),
            ManagedValue::U4(_) => Some(ElementType::U4),
            ManagedValue::I8(_) => Some(ElementType::I8),
            ManagedValue::U8(_) => Some(ElementType::U8),
            ManagedValue::R4(_) => Some(ElementType::R4),
            ManagedValue::R8(_) => Some(ElementType::R8),
            ManagedValue::String(_) => Some(ElementType::String),
            ManagedValue::Null | ManagedValue::Object(_) | ManagedValue::Delegate(_) => None,
        }
    }

    /// Managed type name of the value, for diagnostics
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            ManagedValue::Null => "null".to_string(),
            ManagedValue::Object(obj) => obj.ty().full_name().to_string(),
            ManagedValue::Delegate(delegate) => delegate.delegate_type().to_string(),
            other => other
                .element_type()
                .map_or("unknown", ElementType::full_name)
                .to_string(),
        }
    }

    /// True for `Null`
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, ManagedValue::Null)
    }

    /// Returns the boolean value
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ManagedValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns any integral value widened to `i64`, if it fits
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ManagedValue::I1(v) => Some((*v).into()),
            ManagedValue::U1(v) => Some((*v).into()),
            ManagedValue::I2(v) => Some((*v).into()),
            ManagedValue::U2(v) => Some((*v).into()),
            ManagedValue::I4(v) => Some((*v).into()),
            ManagedValue::U4(v) => Some((*v).into()),
            ManagedValue::I8(v) => Some(*v),
            ManagedValue::U8(v) => i64::try_from(*v).ok(),
            ManagedValue::Char(c) => Some(u32::from(*c).into()),
            _ => None,
        }
    }

    /// Returns any integral value that fits in `i32`
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    /// Returns any numeric value as `f64`
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ManagedValue::R4(v) => Some((*v).into()),
            ManagedValue::R8(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            ManagedValue::U8(v) => Some(*v as f64),
            #[allow(clippy::cast_precision_loss)]
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Returns the string contents
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ManagedValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the referenced object
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            ManagedValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Returns the delegate
    #[must_use]
    pub fn as_delegate(&self) -> Option<&DelegateRef> {
        match self {
            ManagedValue::Delegate(delegate) => Some(delegate),
            _ => None,
        }
    }
}

impl PartialEq for ManagedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ManagedValue::Void, ManagedValue::Void) | (ManagedValue::Null, ManagedValue::Null) => {
                true
            }
            (ManagedValue::Bool(a), ManagedValue::Bool(b)) => a == b,
            (ManagedValue::Char(a), ManagedValue::Char(b)) => a == b,
            (ManagedValue::I1(a), ManagedValue::I1(b)) => a == b,
            (ManagedValue::U1(a), ManagedValue::U1(b)) => a == b,
            (ManagedValue::I2(a), ManagedValue::I2(b)) => a == b,
            (ManagedValue::U2(a), ManagedValue::U2(b)) => a == b,
            (ManagedValue::I4(a), ManagedValue::I4(b)) => a == b,
            (ManagedValue::U4(a), ManagedValue::U4(b)) => a == b,
            (ManagedValue::I8(a), ManagedValue::I8(b)) => a == b,
            (ManagedValue::U8(a), ManagedValue::U8(b)) => a == b,
            (ManagedValue::R4(a), ManagedValue::R4(b)) => a == b,
            (ManagedValue::R8(a), ManagedValue::R8(b)) => a == b,
            (ManagedValue::String(a), ManagedValue::String(b)) => a == b,
            (ManagedValue::Object(a), ManagedValue::Object(b)) => Arc::ptr_eq(a, b),
            (ManagedValue::Delegate(a), ManagedValue::Delegate(b)) => {
                a.target_id() == b.target_id()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for ManagedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagedValue::Void => write!(f, "Void"),
            ManagedValue::Null => write!(f, "Null"),
            ManagedValue::Bool(v) => write!(f, "Bool({})", v),
            ManagedValue::Char(v) => write!(f, "Char({:?})", v),
            ManagedValue::I1(v) => write!(f, "I1({})", v),
            ManagedValue::U1(v) => write!(f, "U1({})", v),
            ManagedValue::I2(v) => write!(f, "I2({})", v),
            ManagedValue::U2(v) => write!(f, "U2({})", v),
            ManagedValue::I4(v) => write!(f, "I4({})", v),
            ManagedValue::U4(v) => write!(f, "U4({})", v),
            ManagedValue::I8(v) => write!(f, "I8({})", v),
            ManagedValue::U8(v) => write!(f, "U8({})", v),
            ManagedValue::R4(v) => write!(f, "R4({})", v),
            ManagedValue::R8(v) => write!(f, "R8({})", v),
            ManagedValue::String(v) => write!(f, "String({:?})", v),
            ManagedValue::Object(obj) => {
                write!(f, "Object({}#{})", obj.ty().full_name(), obj.id())
            }
            ManagedValue::Delegate(delegate) => write!(f, "Delegate({})", delegate.delegate_type()),
        }
    }
}

impl From<bool> for ManagedValue {
    fn from(value: bool) -> Self {
        ManagedValue::Bool(value)
    }
}

impl From<i32> for ManagedValue {
    fn from(value: i32) -> Self {
        ManagedValue::I4(value)
    }
}

impl From<i64> for ManagedValue {
    fn from(value: i64) -> Self {
        ManagedValue::I8(value)
    }
}

impl From<f64> for ManagedValue {
    fn from(value: f64) -> Self {
        ManagedValue::R8(value)
    }
}

impl From<char> for ManagedValue {
    fn from(value: char) -> Self {
        ManagedValue::Char(value)
    }
}

impl From<&str> for ManagedValue {
    fn from(value: &str) -> Self {
        ManagedValue::string(value)
    }
}

impl From<String> for ManagedValue {
    fn from(value: String) -> Self {
        ManagedValue::String(Arc::from(value))
    }
}

impl From<ObjectRef> for ManagedValue {
    fn from(value: ObjectRef) -> Self {
        ManagedValue::Object(value)
    }
}

impl<T: Into<ManagedValue>> From<Option<T>> for ManagedValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ManagedValue::Null, Into::into)
    }
}

/// Typed access to native-method argument lists.
///
/// Arguments arrive already coerced to the member signature, so a mismatch here means a
/// caller bypassed the marshaller; it surfaces as `System.InvalidCastException`.
pub trait ArgsExt {
    /// Argument at `index`, or `Void` when absent
    fn value_at(&self, index: usize) -> &ManagedValue;

    /// `System.Int32` argument
    ///
    /// # Errors
    /// `System.InvalidCastException` when the argument is not an `Int32`-compatible value.
    fn i32_at(&self, index: usize) -> ManagedResult<i32>;

    /// `System.Int64` argument
    ///
    /// # Errors
    /// `System.InvalidCastException` when the argument is not integral.
    fn i64_at(&self, index: usize) -> ManagedResult<i64>;

    /// `System.Double` argument
    ///
    /// # Errors
    /// `System.InvalidCastException` when the argument is not numeric.
    fn f64_at(&self, index: usize) -> ManagedResult<f64>;

    /// `System.Boolean` argument
    ///
    /// # Errors
    /// `System.InvalidCastException` when the argument is not a boolean.
    fn bool_at(&self, index: usize) -> ManagedResult<bool>;

    /// Non-null string argument
    ///
    /// # Errors
    /// `System.ArgumentNullException` for null, `System.InvalidCastException` for non-strings.
    fn str_at(&self, index: usize) -> ManagedResult<&str>;

    /// Nullable string argument
    fn opt_str_at(&self, index: usize) -> Option<&str>;

    /// Non-null object argument
    ///
    /// # Errors
    /// `System.ArgumentNullException` for null, `System.InvalidCastException` for non-objects.
    fn object_at(&self, index: usize) -> ManagedResult<&ObjectRef>;

    /// Non-null delegate argument
    ///
    /// # Errors
    /// `System.ArgumentNullException` for null, `System.InvalidCastException` for non-delegates.
    fn delegate_at(&self, index: usize) -> ManagedResult<&DelegateRef>;
}

fn invalid_cast(value: &ManagedValue, target: &str) -> ManagedFault {
    ManagedFault::new(
        "System.InvalidCastException",
        format!(
            "Unable to cast object of type '{}' to type '{}'.",
            value.type_name(),
            target
        ),
    )
}

fn null_argument(index: usize) -> ManagedFault {
    ManagedFault::new(
        "System.ArgumentNullException",
        format!("Value cannot be null. (Parameter 'arg{}')", index),
    )
}

impl ArgsExt for [ManagedValue] {
    fn value_at(&self, index: usize) -> &ManagedValue {
        static VOID: ManagedValue = ManagedValue::Void;
        self.get(index).unwrap_or(&VOID)
    }

    fn i32_at(&self, index: usize) -> ManagedResult<i32> {
        let value = self.value_at(index);
        value
            .as_i32()
            .ok_or_else(|| invalid_cast(value, "System.Int32"))
    }

    fn i64_at(&self, index: usize) -> ManagedResult<i64> {
        let value = self.value_at(index);
        value
            .as_i64()
            .ok_or_else(|| invalid_cast(value, "System.Int64"))
    }

    fn f64_at(&self, index: usize) -> ManagedResult<f64> {
        let value = self.value_at(index);
        value
            .as_f64()
            .ok_or_else(|| invalid_cast(value, "System.Double"))
    }

    fn bool_at(&self, index: usize) -> ManagedResult<bool> {
        let value = self.value_at(index);
        value
            .as_bool()
            .ok_or_else(|| invalid_cast(value, "System.Boolean"))
    }

    fn str_at(&self, index: usize) -> ManagedResult<&str> {
        match self.value_at(index) {
            ManagedValue::String(value) => Ok(value),
            ManagedValue::Null => Err(null_argument(index)),
            other => Err(invalid_cast(other, "System.String")),
        }
    }

    fn opt_str_at(&self, index: usize) -> Option<&str> {
        self.value_at(index).as_str()
    }

    fn object_at(&self, index: usize) -> ManagedResult<&ObjectRef> {
        match self.value_at(index) {
            ManagedValue::Object(obj) => Ok(obj),
            ManagedValue::Null => Err(null_argument(index)),
            other => Err(invalid_cast(other, "System.Object")),
        }
    }

    fn delegate_at(&self, index: usize) -> ManagedResult<&DelegateRef> {
        match self.value_at(index) {
            ManagedValue::Delegate(delegate) => Ok(delegate),
            ManagedValue::Null => Err(null_argument(index)),
            other => Err(invalid_cast(other, "System.Delegate")),
        }
    }
}
