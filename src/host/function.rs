//! Host functions.

use std::{fmt, sync::Arc};

use crate::{host::HostValue, runtime::DelegateRef, Result};

type Body = dyn Fn(&[HostValue]) -> Result<HostValue> + Send + Sync;

/// A callable host value.
///
/// Cloning is cheap and preserves identity: clones compare equal under
/// [`HostFunction::ptr_eq`] and share one [`HostFunction::id`]. A function produced by
/// marshalling a managed delegate remembers that delegate, so passing it back into managed
/// code hands over the original delegate instead of a new wrapper.
#[derive(Clone)]
pub struct HostFunction {
    inner: Arc<FunctionInner>,
}

struct FunctionInner {
    name: String,
    body: Box<Body>,
    origin: Option<DelegateRef>,
}

impl HostFunction {
    /// Creates a function from a closure
    ///
    /// ## Arguments
    /// * `name` - Name used in diagnostics
    /// * `body` - The function body
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&[HostValue]) -> Result<HostValue> + Send + Sync + 'static,
    {
        HostFunction {
            inner: Arc::new(FunctionInner {
                name: name.into(),
                body: Box::new(body),
                origin: None,
            }),
        }
    }

    pub(crate) fn wrapping<F>(delegate: DelegateRef, body: F) -> Self
    where
        F: Fn(&[HostValue]) -> Result<HostValue> + Send + Sync + 'static,
    {
        HostFunction {
            inner: Arc::new(FunctionInner {
                name: delegate.delegate_type().to_string(),
                body: Box::new(body),
                origin: Some(delegate),
            }),
        }
    }

    /// The function name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Calls the function
    ///
    /// # Errors
    /// Whatever the function body returns.
    pub fn call(&self, args: &[HostValue]) -> Result<HostValue> {
        (self.inner.body)(args)
    }

    /// The managed delegate this function wraps, if it was produced from one
    pub fn origin(&self) -> Option<&DelegateRef> {
        self.inner.origin.as_ref()
    }

    /// Identity shared by all clones
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// True when both values are the same function
    pub fn ptr_eq(&self, other: &HostFunction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.inner.name)
    }
}
