//! Host values.
//!
//! [`HostValue`] models the values of a dynamically typed host language: `undefined`,
//! `null`, booleans, double-precision numbers, strings, functions, plus the projections the
//! bridge hands out (namespaces, classes and object handles) and error values passed to
//! node-style callbacks.
//!
//! # Equality
//!
//! Equality follows the host language: numbers compare as IEEE doubles (`NaN != NaN`),
//! strings by content, functions and projections by identity, object handles by the
//! identity of the managed object they reference.

use std::{fmt, sync::Arc};

use crate::{
    bridge::{ClassProjection, NamespaceNode, ObjectHandle},
    host::HostFunction,
    Error,
};

/// A value of the host language
#[derive(Clone, Default)]
pub enum HostValue {
    /// Absence of a value
    #[default]
    Undefined,
    /// The null value
    Null,
    /// A boolean
    Bool(bool),
    /// A double-precision number
    Number(f64),
    /// A string
    String(Arc<str>),
    /// A function
    Function(HostFunction),
    /// A projected managed namespace
    Namespace(NamespaceNode),
    /// A projected managed type
    Class(ClassProjection),
    /// A bridged managed object
    Object(ObjectHandle),
    /// An error value, as passed to node-style callbacks
    Error(Error),
}

impl HostValue {
    /// Creates a string value
    pub fn string(value: impl AsRef<str>) -> Self {
        HostValue::String(Arc::from(value.as_ref()))
    }

    /// True for `undefined` and `null`
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    /// The host `typeof` of the value
    #[must_use]
    pub fn type_of(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::String(_) => "string",
            HostValue::Function(_) | HostValue::Class(_) => "function",
            HostValue::Null | HostValue::Namespace(_) | HostValue::Object(_) | HostValue::Error(_) => {
                "object"
            }
        }
    }

    /// Returns the boolean value
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the numeric value
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            HostValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the string contents
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the function
    #[must_use]
    pub fn as_function(&self) -> Option<&HostFunction> {
        match self {
            HostValue::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Returns the namespace node
    #[must_use]
    pub fn as_namespace(&self) -> Option<&NamespaceNode> {
        match self {
            HostValue::Namespace(node) => Some(node),
            _ => None,
        }
    }

    /// Returns the class projection
    #[must_use]
    pub fn as_class(&self) -> Option<&ClassProjection> {
        match self {
            HostValue::Class(class) => Some(class),
            _ => None,
        }
    }

    /// Returns the object handle
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectHandle> {
        match self {
            HostValue::Object(handle) => Some(handle),
            _ => None,
        }
    }

    /// Returns the error
    #[must_use]
    pub fn as_error(&self) -> Option<&Error> {
        match self {
            HostValue::Error(error) => Some(error),
            _ => None,
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Undefined, HostValue::Undefined) | (HostValue::Null, HostValue::Null) => {
                true
            }
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Number(a), HostValue::Number(b)) => a == b,
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::Function(a), HostValue::Function(b)) => a.ptr_eq(b),
            (HostValue::Namespace(a), HostValue::Namespace(b)) => a == b,
            (HostValue::Class(a), HostValue::Class(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => a == b,
            (HostValue::Error(a), HostValue::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::String(value) => write!(f, "{:?}", value),
            HostValue::Function(function) => write!(f, "{:?}", function),
            HostValue::Error(error) => write!(f, "Error({})", error),
            other => write!(f, "{}", other),
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Undefined => f.write_str("undefined"),
            HostValue::Null => f.write_str("null"),
            HostValue::Bool(value) => write!(f, "{}", value),
            HostValue::Number(value) if value.fract() == 0.0 && value.abs() < 1e21 => {
                write!(f, "{:.0}", value)
            }
            HostValue::Number(value) => write!(f, "{}", value),
            HostValue::String(value) => f.write_str(value),
            HostValue::Function(function) => write!(f, "[Function: {}]", function.name()),
            HostValue::Namespace(node) => write!(f, "[Namespace: {}]", node.path()),
            HostValue::Class(class) => write!(f, "[Class: {}]", class.full_name()),
            HostValue::Object(handle) => write!(f, "[Object: {}]", handle.type_name()),
            HostValue::Error(error) => write!(f, "Error: {}", error),
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Number(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        HostValue::Number(value.into())
    }
}

impl From<i64> for HostValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        HostValue::Number(value as f64)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::string(value)
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::String(Arc::from(value))
    }
}

impl From<HostFunction> for HostValue {
    fn from(value: HostFunction) -> Self {
        HostValue::Function(value)
    }
}

impl From<NamespaceNode> for HostValue {
    fn from(value: NamespaceNode) -> Self {
        HostValue::Namespace(value)
    }
}

impl From<ClassProjection> for HostValue {
    fn from(value: ClassProjection) -> Self {
        HostValue::Class(value)
    }
}

impl From<ObjectHandle> for HostValue {
    fn from(value: ObjectHandle) -> Self {
        HostValue::Object(value)
    }
}

impl From<Error> for HostValue {
    fn from(value: Error) -> Self {
        HostValue::Error(value)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(HostValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_follows_host_rules() {
        assert_eq!(HostValue::from(3), HostValue::Number(3.0));
        assert_ne!(HostValue::Number(f64::NAN), HostValue::Number(f64::NAN));
        assert_ne!(HostValue::Null, HostValue::Undefined);
        assert_eq!(HostValue::from("a"), HostValue::string("a"));
        assert_eq!(HostValue::from(None::<bool>), HostValue::Null);
    }

    #[test]
    fn test_type_of_and_display() {
        assert_eq!(HostValue::Undefined.type_of(), "undefined");
        assert_eq!(HostValue::Null.type_of(), "object");
        assert_eq!(HostValue::from(1.5).to_string(), "1.5");
        assert_eq!(HostValue::from(1970).to_string(), "1970");
        assert_eq!(HostValue::from(true).to_string(), "true");
        assert!(HostValue::Null.is_nullish());
        assert!(!HostValue::from(0).is_nullish());
    }
}
