//! The host global scope.
//!
//! Each host thread has its own global scope, like each isolate of a scripting engine.
//! The bridge writes into it only when a session is created with
//! [`BridgeConfig::global`](crate::BridgeConfig::global) enabled.

use std::{cell::RefCell, collections::BTreeMap};

use crate::host::HostValue;

thread_local! {
    static GLOBALS: RefCell<BTreeMap<String, HostValue>> = const { RefCell::new(BTreeMap::new()) };
}

/// Reads a global
#[must_use]
pub fn global(name: &str) -> Option<HostValue> {
    GLOBALS.with(|globals| globals.borrow().get(name).cloned())
}

/// Writes a global, returning the previous value
pub fn set_global(name: &str, value: HostValue) -> Option<HostValue> {
    GLOBALS.with(|globals| globals.borrow_mut().insert(name.to_string(), value))
}

/// Removes a global
pub fn remove_global(name: &str) -> Option<HostValue> {
    GLOBALS.with(|globals| globals.borrow_mut().remove(name))
}

/// Names of all globals, sorted
#[must_use]
pub fn global_names() -> Vec<String> {
    GLOBALS.with(|globals| globals.borrow().keys().cloned().collect())
}

/// Removes every global of the current thread
pub fn clear_globals() {
    let _ = GLOBALS.try_with(|globals| globals.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_is_per_thread() {
        set_global("answer", HostValue::from(42));
        assert_eq!(global("answer"), Some(HostValue::Number(42.0)));

        let elsewhere = std::thread::spawn(|| global("answer").is_none()).join().unwrap();
        assert!(elsewhere);

        assert_eq!(remove_global("answer"), Some(HostValue::Number(42.0)));
        assert!(global_names().is_empty());
    }
}
