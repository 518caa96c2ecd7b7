//! Async Bridge.
//!
//! Managed work runs on the managed thread pool; host callbacks run on the host thread only.
//! This module joins the two:
//!
//! - [`AsyncBridge::start`] schedules managed work and hands its completion back to the host
//!   loop as a [`PendingCallback`], which runs exactly once when the loop turns
//! - [`HostDelegate`] lets managed code invoke a host function from any thread; off the host
//!   thread the call is posted to the loop and the managed caller blocks for the result
//! - [`AsyncBridge::when_completed`] attaches a host callback to a managed `Task`
//!
//! # Operation States
//!
//! ```text
//! Created --(pool picks it up)--> Running --(work returns)--> Completed
//! ```
//!
//! A fault is kept on the completed operation. How it reaches the callback depends on the
//! session's [`AsyncFaultPolicy`].

use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use strum::{AsRefStr, Display};
use tracing::{debug, trace, warn};

use crate::{
    bridge::{
        marshal::{to_host, to_managed, wrap_delegate},
        ObjectHandle, Session, WeakSession,
    },
    config::AsyncFaultPolicy,
    error::ManagedFault,
    host::{EventLoop, HostDispatcher, HostFunction, HostValue, OutstandingGuard},
    runtime::{ManagedCallable, ManagedResult, ManagedValue, NativeDelegate, ObjectRef},
    Error, Result,
};

const TASK: &str = "System.Threading.Tasks.Task";

static NEXT_OPERATION: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of an asynchronous operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum AsyncState {
    /// Scheduled, not picked up yet
    Created,
    /// Executing on the managed thread pool
    Running,
    /// Finished, successfully or with a fault
    Completed,
}

struct OperationState {
    state: AsyncState,
    fault: Option<Error>,
}

struct OperationInner {
    id: u64,
    state: Mutex<OperationState>,
}

/// Handle to an asynchronous managed operation.
///
/// The handle only observes the operation. Dropping it neither cancels the work nor
/// suppresses the callback.
#[derive(Clone)]
pub struct AsyncOperation {
    inner: Arc<OperationInner>,
}

impl AsyncOperation {
    fn new() -> Self {
        AsyncOperation {
            inner: Arc::new(OperationInner {
                id: NEXT_OPERATION.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(OperationState {
                    state: AsyncState::Created,
                    fault: None,
                }),
            }),
        }
    }

    /// Process-unique operation id
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Current state
    pub fn state(&self) -> AsyncState {
        lock!(self.inner.state).state
    }

    /// True once the work has finished
    pub fn is_completed(&self) -> bool {
        self.state() == AsyncState::Completed
    }

    /// The fault of a completed operation, if it faulted
    pub fn fault(&self) -> Option<Error> {
        lock!(self.inner.state).fault.clone()
    }

    fn transition(&self, to: AsyncState, fault: Option<Error>) {
        let mut state = lock!(self.inner.state);
        trace!(operation = self.inner.id, from = %state.state, to = %to, "async state change");
        state.state = to;
        if fault.is_some() {
            state.fault = fault;
        }
    }
}

impl fmt::Debug for AsyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

/// A completion waiting to be delivered on the host thread.
///
/// Firing consumes the callback, so it runs at most once. A `PendingCallback` dropped unrun,
/// because the host loop closed, releases its hold on the loop without calling anything.
pub struct PendingCallback {
    callback: HostFunction,
    outcome: Result<ManagedValue>,
    operation: AsyncOperation,
    session: Session,
    policy: AsyncFaultPolicy,
    _guard: OutstandingGuard,
}

impl PendingCallback {
    /// Runs the callback with node-style arguments
    ///
    /// # Errors
    /// The callback's own error, or the operation's fault under
    /// [`AsyncFaultPolicy::RaiseOnLoop`].
    pub fn fire(self) -> Result<()> {
        let PendingCallback {
            callback,
            outcome,
            operation,
            session,
            policy,
            _guard,
        } = self;

        match outcome {
            Ok(value) => {
                trace!(operation = operation.id(), "delivering async result");
                callback.call(&[HostValue::Null, to_host(&session, value)])?;
            }
            Err(error) => {
                warn!(operation = operation.id(), %error, "asynchronous operation faulted");
                match policy {
                    AsyncFaultPolicy::ErrorArgument => {
                        callback.call(&[HostValue::Error(error), HostValue::Undefined])?;
                    }
                    AsyncFaultPolicy::RaiseOnLoop => return Err(error),
                }
            }
        }
        Ok(())
    }

    /// The operation this callback completes
    pub fn operation(&self) -> &AsyncOperation {
        &self.operation
    }
}

fn deliver(dispatcher: &HostDispatcher, pending: PendingCallback) {
    let operation = pending.operation.id();
    if dispatcher.post(Box::new(move || pending.fire())).is_err() {
        warn!(operation, "host loop closed, completion dropped");
    }
}

/// Schedules managed work and routes completions to the host loop of the creating thread
pub struct AsyncBridge {
    session: Session,
    dispatcher: HostDispatcher,
}

impl AsyncBridge {
    /// Creates a bridge delivering to the calling thread's [`EventLoop`]
    pub fn new(session: &Session) -> Self {
        AsyncBridge {
            session: session.clone(),
            dispatcher: EventLoop::current().dispatcher(),
        }
    }

    /// Runs `work` on the managed thread pool and returns immediately.
    ///
    /// `callback` runs on the host loop once the work is done: `(null, result)` on success,
    /// and on fault as the session's [`AsyncFaultPolicy`] says. It never runs inside this
    /// call.
    ///
    /// # Errors
    /// [`Error::LoopClosed`] when the host loop has shut down.
    pub fn start<F>(&self, work: F, callback: HostFunction) -> Result<AsyncOperation>
    where
        F: FnOnce() -> Result<ManagedValue> + Send + 'static,
    {
        if self.dispatcher.is_closed() {
            return Err(Error::LoopClosed);
        }

        let operation = AsyncOperation::new();
        let guard = self.dispatcher.track();
        let dispatcher = self.dispatcher.clone();
        let session = self.session.clone();
        let policy = session.config().async_fault_policy;
        let running = operation.clone();
        debug!(operation = operation.id(), "asynchronous operation scheduled");

        self.session.host().schedule(Box::new(move || {
            running.transition(AsyncState::Running, None);
            let outcome = work();
            running.transition(AsyncState::Completed, outcome.as_ref().err().cloned());
            deliver(
                &dispatcher,
                PendingCallback {
                    callback,
                    outcome,
                    operation: running,
                    session,
                    policy,
                    _guard: guard,
                },
            );
        }));
        Ok(operation)
    }

    /// Calls `callback` on the host loop once the managed `Task` behind `task` completes.
    ///
    /// The callback receives `(null, undefined)` when the task ran to completion; a faulted
    /// task is reported through the session's [`AsyncFaultPolicy`] with the fault `Wait()`
    /// raises.
    ///
    /// # Errors
    /// [`Error::TypeMismatch`] when `task` is not a `System.Threading.Tasks.Task`, and
    /// [`Error::ObjectDisposed`] for disposed handles.
    pub fn when_completed(&self, task: &ObjectHandle, callback: HostFunction) -> Result<AsyncOperation> {
        let object = task.object()?;
        if !object.ty().is_assignable_to(TASK) {
            return Err(mismatch_error!(TASK, "object {}", task.type_name()));
        }

        let operation = AsyncOperation::new();
        let slot = Mutex::new(Some((callback, self.dispatcher.track(), operation.clone())));
        let dispatcher = self.dispatcher.clone();
        let weak = self.session.downgrade();
        let policy = self.session.config().async_fault_policy;

        let continuation = NativeDelegate::new("System.Action`1", move |args| {
            let Some((callback, guard, operation)) = lock!(slot).take() else {
                return Ok(ManagedValue::Void);
            };
            let Some(session) = weak.upgrade() else {
                return Ok(ManagedValue::Void);
            };

            operation.transition(AsyncState::Running, None);
            let outcome = match args.first() {
                Some(ManagedValue::Object(antecedent)) => wait_task(&session, antecedent),
                _ => Ok(ManagedValue::Void),
            };
            operation.transition(AsyncState::Completed, outcome.as_ref().err().cloned());
            deliver(
                &dispatcher,
                PendingCallback {
                    callback,
                    outcome,
                    operation,
                    session,
                    policy,
                    _guard: guard,
                },
            );
            Ok(ManagedValue::Void)
        });

        let function = wrap_delegate(&self.session, Arc::new(continuation));
        task.call("ContinueWith", &[HostValue::Function(function)])?;
        debug!(operation = operation.id(), task = task.id(), "task continuation attached");
        Ok(operation)
    }
}

/// Observes a finished task's outcome through its `Wait()` method
fn wait_task(session: &Session, task: &ObjectRef) -> Result<ManagedValue> {
    let ty = task.ty();
    let wait = session
        .resolver()
        .resolve_call(session.host(), ty, "Wait", false, &[])?;
    session
        .host()
        .invoke(ty, &wait, Some(task), Vec::new())
        .map(|_| ManagedValue::Void)
}

fn call_host(session: &Session, function: &HostFunction, args: Vec<ManagedValue>) -> ManagedResult {
    let args: Vec<HostValue> = args
        .into_iter()
        .map(|arg| to_host(session, arg))
        .collect();
    let result = function.call(&args).map_err(Error::into_fault)?;
    to_managed(session, &result).map_err(Error::into_fault)
}

/// Reports a host function that failed while managed code on a pool thread was calling it.
///
/// The managed caller still receives the fault. Under [`AsyncFaultPolicy::RaiseOnLoop`] the
/// fault is also returned from the current host loop run. Runs on the host thread.
fn surface_delegate_fault(policy: AsyncFaultPolicy, function: &HostFunction, fault: &ManagedFault) {
    warn!(
        function = function.name(),
        fault = %fault,
        ?policy,
        "host function failed under a managed caller"
    );
    if policy == AsyncFaultPolicy::RaiseOnLoop {
        EventLoop::current().defer(Error::InvocationError(fault.clone()));
    }
}

/// A managed delegate that calls a host function.
///
/// Invoked on the host thread, the function runs directly. Invoked from any other thread,
/// the call is posted to the host loop and the invoking thread blocks until the loop has run
/// it; a failure there is also reported to the host per the session's fault policy. If the
/// loop is gone the managed caller gets `System.InvalidOperationException`.
///
/// Two `HostDelegate`s wrapping the same function share a target identity, so removing an
/// event handler with a fresh wrapper works.
pub struct HostDelegate {
    function: HostFunction,
    session: WeakSession,
    dispatcher: HostDispatcher,
    delegate_type: String,
}

impl HostDelegate {
    pub(crate) fn new(
        session: &Session,
        function: HostFunction,
        dispatcher: HostDispatcher,
        delegate_type: &str,
    ) -> Self {
        HostDelegate {
            function,
            session: session.downgrade(),
            dispatcher,
            delegate_type: delegate_type.to_string(),
        }
    }

    /// The wrapped host function
    pub fn function(&self) -> &HostFunction {
        &self.function
    }
}

impl ManagedCallable for HostDelegate {
    fn invoke(&self, args: &[ManagedValue]) -> ManagedResult {
        let Some(session) = self.session.upgrade() else {
            return Err(ManagedFault::new(
                "System.ObjectDisposedException",
                "The bridge session that created this delegate is gone.",
            ));
        };

        if self.dispatcher.is_host_thread() {
            return call_host(&session, &self.function, args.to_vec());
        }

        trace!(function = self.function.name(), "dispatching delegate to host thread");
        let function = self.function.clone();
        let args = args.to_vec();
        match self.dispatcher.call(move || {
            let outcome = call_host(&session, &function, args);
            if let Err(fault) = &outcome {
                surface_delegate_fault(session.config().async_fault_policy, &function, fault);
            }
            outcome
        }) {
            Ok(result) => result,
            Err(error) => Err(ManagedFault::new(
                "System.InvalidOperationException",
                error.to_string(),
            )),
        }
    }

    fn delegate_type(&self) -> &str {
        &self.delegate_type
    }

    fn target_id(&self) -> usize {
        self.function.id()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{config::RuntimeConfig, runtime::ClrRuntime, BridgeConfig};

    fn session(policy: AsyncFaultPolicy) -> Session {
        let runtime = ClrRuntime::new(RuntimeConfig::for_testing()).unwrap();
        Session::new(
            runtime,
            BridgeConfig::default().with_async_fault_policy(policy),
        )
    }

    fn recorder() -> (HostFunction, Arc<Mutex<Vec<Vec<HostValue>>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let callback = HostFunction::new("record", move |args| {
            sink.lock().unwrap().push(args.to_vec());
            Ok(HostValue::Undefined)
        });
        (callback, calls)
    }

    #[test]
    fn test_completion_runs_on_loop_once() {
        let event_loop = EventLoop::current();
        let session = session(AsyncFaultPolicy::ErrorArgument);
        let (callback, calls) = recorder();

        let operation = AsyncBridge::new(&session)
            .start(|| Ok(ManagedValue::I4(7)), callback)
            .unwrap();
        assert!(calls.lock().unwrap().is_empty());

        event_loop.run().unwrap();
        assert!(operation.is_completed());
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec![HostValue::Null, HostValue::Number(7.0)]);
    }

    #[test]
    fn test_fault_as_error_argument() {
        let event_loop = EventLoop::current();
        let session = session(AsyncFaultPolicy::ErrorArgument);
        let (callback, calls) = recorder();
        let fault = ManagedFault::new("System.InvalidOperationException", "nope");

        let failing = fault.clone();
        let operation = AsyncBridge::new(&session)
            .start(move || Err(Error::InvocationError(failing)), callback)
            .unwrap();
        event_loop.run().unwrap();

        assert_eq!(operation.fault(), Some(Error::InvocationError(fault.clone())));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            vec![HostValue::Error(Error::InvocationError(fault)), HostValue::Undefined]
        );
    }

    #[test]
    fn test_fault_raised_on_loop() {
        let event_loop = EventLoop::current();
        let session = session(AsyncFaultPolicy::RaiseOnLoop);
        let (callback, calls) = recorder();

        AsyncBridge::new(&session)
            .start(|| Err(Error::HostError("boom".into())), callback)
            .unwrap();
        assert_eq!(event_loop.run(), Err(Error::HostError("boom".into())));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_host_delegate_from_pool_thread() {
        let event_loop = EventLoop::current();
        let session = session(AsyncFaultPolicy::ErrorArgument);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let host_thread = std::thread::current().id();

        let function = HostFunction::new("double", move |args| {
            assert_eq!(std::thread::current().id(), host_thread);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HostValue::Number(args[0].as_number().unwrap_or(0.0) * 2.0))
        });
        let delegate: Arc<dyn ManagedCallable> = Arc::new(HostDelegate::new(
            &session,
            function,
            event_loop.dispatcher(),
            "System.Func`2",
        ));

        let worker = std::thread::spawn(move || delegate.invoke(&[ManagedValue::I4(21)]));
        assert!(event_loop
            .run_until(|| hits.load(Ordering::SeqCst) == 1, Duration::from_secs(5))
            .unwrap());
        assert_eq!(worker.join().unwrap(), Ok(ManagedValue::I4(42)));
    }

    #[test]
    fn test_closed_loop_faults_delegate() {
        let event_loop = EventLoop::current();
        let session = session(AsyncFaultPolicy::ErrorArgument);
        let delegate: Arc<dyn ManagedCallable> = Arc::new(HostDelegate::new(
            &session,
            HostFunction::new("noop", |_| Ok(HostValue::Undefined)),
            event_loop.dispatcher(),
            "System.Action",
        ));
        event_loop.close();

        let fault = std::thread::spawn(move || delegate.invoke(&[]))
            .join()
            .unwrap()
            .unwrap_err();
        assert_eq!(fault.type_name(), "System.InvalidOperationException");
    }
}
