//! Bridge and runtime configuration types.
//!
//! # Overview
//!
//! - [`BridgeConfig`] - Per-session bridge behaviour, passed to [`crate::init`]
//! - [`AsyncFaultPolicy`] - How asynchronous managed faults reach the host
//! - [`RuntimeConfig`] - Settings for the reference managed runtime
//! - [`ConsoleMode`] - Where `System.Console` output goes
//!
//! # Configuration Presets
//!
//! - [`BridgeConfig::global()`] - Merge namespaces into the host's global scope
//! - [`RuntimeConfig::for_testing()`] - Captured console, small worker pool
//!
//! # Example
//!
//! ```rust
//! use dotbridge::{AsyncFaultPolicy, BridgeConfig, RuntimeConfig};
//!
//! let bridge = BridgeConfig::default()
//!     .with_global(true)
//!     .with_async_fault_policy(AsyncFaultPolicy::RaiseOnLoop);
//! assert!(bridge.global);
//!
//! let runtime = RuntimeConfig::for_testing().with_worker_threads(2);
//! assert_eq!(runtime.worker_threads, 2);
//! ```

/// How a fault raised by an asynchronous managed operation is delivered to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsyncFaultPolicy {
    /// The completion callback is invoked exactly once with node-style arguments:
    /// `(error, undefined)` on fault, `(null, result)` on success.
    #[default]
    ErrorArgument,
    /// On fault the callback is not invoked; the error is returned from the host loop turn
    /// that would have run it.
    RaiseOnLoop,
}

/// Per-session bridge configuration.
///
/// # Default Configuration
///
/// | Setting | Default |
/// |---------|---------|
/// | `global` | `false` |
/// | `async_fault_policy` | [`AsyncFaultPolicy::ErrorArgument`] |
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Merge the root namespace's top-level namespaces into the host global scope.
    ///
    /// When false, the namespace root is only returned to the caller. The tree shape is the
    /// same in both modes.
    pub global: bool,

    /// Delivery of asynchronous faults.
    pub async_fault_policy: AsyncFaultPolicy,
}

impl BridgeConfig {
    /// Preset that merges namespaces into the host global scope
    #[must_use]
    pub fn global() -> Self {
        BridgeConfig {
            global: true,
            ..Default::default()
        }
    }

    /// Sets the global merge flag
    #[must_use]
    pub fn with_global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    /// Sets the asynchronous fault policy
    #[must_use]
    pub fn with_async_fault_policy(mut self, policy: AsyncFaultPolicy) -> Self {
        self.async_fault_policy = policy;
        self
    }
}

/// Destination of `System.Console` output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleMode {
    /// Write to the process stdout
    #[default]
    Stdout,
    /// Buffer in memory; read back with `ClrRuntime::take_console_output`
    Capture,
}

/// Configuration of the reference managed runtime.
///
/// # Default Configuration
///
/// | Setting | Default |
/// |---------|---------|
/// | `worker_threads` | available parallelism, at least 4 |
/// | `thread_name_prefix` | `clr-worker` |
/// | `console` | [`ConsoleMode::Stdout`] |
/// | `preload` | `mscorlib`, `System` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of managed pool threads.
    ///
    /// Pool work may block on host callbacks, so this should exceed the number of
    /// simultaneously blocked operations you expect.
    pub worker_threads: usize,

    /// Prefix of pool thread names.
    pub thread_name_prefix: String,

    /// Console output destination.
    pub console: ConsoleMode,

    /// Catalog assemblies loaded at startup, by simple name.
    pub preload: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        RuntimeConfig {
            worker_threads: cores.max(4),
            thread_name_prefix: "clr-worker".to_string(),
            console: ConsoleMode::Stdout,
            preload: vec!["mscorlib".to_string(), "System".to_string()],
        }
    }
}

impl RuntimeConfig {
    /// Preset for isolated tests: captured console, four workers
    #[must_use]
    pub fn for_testing() -> Self {
        RuntimeConfig {
            worker_threads: 4,
            console: ConsoleMode::Capture,
            ..Default::default()
        }
    }

    /// Sets the number of pool threads
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Sets the pool thread name prefix
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: &str) -> Self {
        self.thread_name_prefix = prefix.to_string();
        self
    }

    /// Sets the console destination
    #[must_use]
    pub fn with_console(mut self, console: ConsoleMode) -> Self {
        self.console = console;
        self
    }

    /// Sets the assemblies loaded at startup
    #[must_use]
    pub fn with_preload(mut self, assemblies: &[&str]) -> Self {
        self.preload = assemblies.iter().map(|name| (*name).to_string()).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let bridge = BridgeConfig::default();
        assert!(!bridge.global);
        assert_eq!(bridge.async_fault_policy, AsyncFaultPolicy::ErrorArgument);
        assert!(BridgeConfig::global().global);

        let runtime = RuntimeConfig::default();
        assert!(runtime.worker_threads >= 4);
        assert_eq!(runtime.preload, vec!["mscorlib", "System"]);
    }

    #[test]
    fn test_builders() {
        let runtime = RuntimeConfig::for_testing()
            .with_worker_threads(0)
            .with_thread_name_prefix("t")
            .with_preload(&["mscorlib"]);
        assert_eq!(runtime.worker_threads, 1);
        assert_eq!(runtime.thread_name_prefix, "t");
        assert_eq!(runtime.console, ConsoleMode::Capture);
        assert_eq!(runtime.preload, vec!["mscorlib"]);
    }
}
