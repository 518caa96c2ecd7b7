//! `System.Threading.Tasks.Task` and `System.Threading.Thread`.
//!
//! Tasks run on the runtime's [`ManagedThreadPool`](crate::runtime::ManagedThreadPool). A
//! task's lifecycle lives in its native [`TaskState`]; the managed members only translate
//! between that state and managed values.
//!
//! Continuations registered through `ContinueWith` run on the thread that completes the
//! antecedent, or are queued on the pool when the antecedent has already completed.
//!
//! # Emulated Members
//!
//! | Member | Description |
//! |--------|-------------|
//! | `Task(Action)` | Creates an unstarted task |
//! | `Start()` | Queues the task; `InvalidOperationException` if already started |
//! | `Wait()`, `Wait(Int32)` | Blocks until completion, raising `AggregateException` on fault |
//! | `IsCompleted`, `IsFaulted`, `IsCanceled`, `Status`, `Exception`, `Id` | State inspection |
//! | `ContinueWith(Action<Task>)` | Runs a delegate after completion, returns the continuation |
//! | `Task.Run(Action)` | Creates and starts a task |
//! | `Task.Delay(Int32)` | A task that completes after a delay |
//! | `Task.CompletedTask` | An already completed task |
//! | `Thread.Sleep(Int32)` | Blocks the calling thread |
//! | `Thread.CurrentThreadName` | Name of the calling thread |

use std::{
    fmt,
    sync::{
        atomic::{AtomicI32, Ordering},
        Condvar, Mutex,
    },
    time::Duration,
};

use strum::{AsRefStr, EnumIter, IntoEnumIterator};
use tracing::trace;

use crate::{
    error::ManagedFault,
    runtime::{
        bcl::{BOOL, I4, STRING, VOID},
        reentry, ArgsExt, AssemblyDef, CallContext, ClrRuntime, ManagedResult, ManagedValue,
        ObjectRef, TypeBuilder, TypeSig,
    },
};

const TASK: &str = "System.Threading.Tasks.Task";

static NEXT_ID: AtomicI32 = AtomicI32::new(1);

/// Lifecycle states of a task, numbered as `System.Threading.Tasks.TaskStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumIter)]
#[repr(i32)]
pub enum TaskStatus {
    /// Initialised but not started
    Created = 0,
    /// Waiting to be activated internally
    WaitingForActivation = 1,
    /// Queued on the thread pool
    WaitingToRun = 2,
    /// Executing
    Running = 3,
    /// Finished, waiting for attached children
    WaitingForChildrenToComplete = 4,
    /// Completed successfully
    RanToCompletion = 5,
    /// Cancelled
    Canceled = 6,
    /// Completed with a fault
    Faulted = 7,
}

impl TaskStatus {
    /// True for the final states
    #[must_use]
    pub fn is_completed(self) -> bool {
        matches!(
            self,
            TaskStatus::RanToCompletion | TaskStatus::Canceled | TaskStatus::Faulted
        )
    }
}

type Work = Box<dyn FnOnce() -> ManagedResult + Send>;
type Continuation = Box<dyn FnOnce() + Send>;

struct TaskInner {
    status: TaskStatus,
    work: Option<Work>,
    fault: Option<ManagedFault>,
    continuations: Vec<Continuation>,
}

/// Native state of a `Task` object
pub struct TaskState {
    id: i32,
    inner: Mutex<TaskInner>,
    signal: Condvar,
}

impl TaskState {
    fn with(status: TaskStatus, work: Option<Work>) -> Self {
        TaskState {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(TaskInner {
                status,
                work,
                fault: None,
                continuations: Vec::new(),
            }),
            signal: Condvar::new(),
        }
    }

    /// Creates an unstarted task that will run `work`
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() -> ManagedResult + Send + 'static,
    {
        TaskState::with(TaskStatus::Created, Some(Box::new(work)))
    }

    /// Creates a task that has already run to completion
    #[must_use]
    pub fn completed() -> Self {
        TaskState::with(TaskStatus::RanToCompletion, None)
    }

    /// Task id, unique within the process
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Current status
    pub fn status(&self) -> TaskStatus {
        lock!(self.inner).status
    }

    /// True once the task reached a final state
    pub fn is_completed(&self) -> bool {
        self.status().is_completed()
    }

    /// The fault of a faulted task
    pub fn fault(&self) -> Option<ManagedFault> {
        lock!(self.inner).fault.clone()
    }

    /// Blocks until the task completes, pumping host work on host threads.
    ///
    /// Returns false when the timeout elapsed first.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        reentry::wait_until(
            &self.inner,
            &self.signal,
            |inner| inner.status.is_completed(),
            timeout,
        )
    }

    fn begin(&self) -> bool {
        let mut inner = lock!(self.inner);
        if inner.status != TaskStatus::Created {
            return false;
        }
        inner.status = TaskStatus::WaitingToRun;
        true
    }

    fn mark_running(&self) {
        lock!(self.inner).status = TaskStatus::Running;
    }

    fn run(&self) {
        let work = {
            let mut inner = lock!(self.inner);
            inner.status = TaskStatus::Running;
            inner.work.take()
        };
        trace!(task = self.id, "task running");
        let outcome = match work {
            Some(work) => work().map(|_| ()),
            None => Ok(()),
        };
        self.complete(outcome);
    }

    fn complete(&self, outcome: ManagedResult<()>) {
        let continuations = {
            let mut inner = lock!(self.inner);
            match outcome {
                Ok(()) => inner.status = TaskStatus::RanToCompletion,
                Err(fault) => {
                    inner.status = TaskStatus::Faulted;
                    inner.fault = Some(fault);
                }
            }
            std::mem::take(&mut inner.continuations)
        };
        trace!(task = self.id, status = ?self.status(), "task completed");
        self.signal.notify_all();

        for continuation in continuations {
            continuation();
        }
    }

    /// Registers `continuation`, or hands it back when the task already completed
    fn on_completion(&self, continuation: Continuation) -> Option<Continuation> {
        let mut inner = lock!(self.inner);
        if inner.status.is_completed() {
            return Some(continuation);
        }
        inner.continuations.push(continuation);
        None
    }
}

impl fmt::Debug for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskState")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

fn task_object(runtime: &ClrRuntime, state: TaskState) -> ManagedResult<ObjectRef> {
    let task = runtime.allocate(TASK)?;
    task.set_native(state);
    Ok(task)
}

fn schedule(runtime: &ClrRuntime, task: &ObjectRef) {
    let task = task.clone();
    runtime.pool().spawn(move || {
        if let Some(state) = task.native::<TaskState>() {
            state.run();
        }
    });
}

fn start(ctx: &CallContext<'_>, task: &ObjectRef) -> ManagedResult<()> {
    let state = task
        .native::<TaskState>()
        .ok_or_else(|| ctx.throw("System.InvalidOperationException", "Task is not initialised."))?;
    if !state.begin() {
        return Err(ctx.throw(
            "System.InvalidOperationException",
            "Start may not be called on a task that was already started.",
        ));
    }
    schedule(ctx.runtime(), task);
    Ok(())
}

fn action_work(action: crate::runtime::DelegateRef) -> impl FnOnce() -> ManagedResult + Send {
    move || action.invoke(&[])
}

/// Wraps a task fault the way `Task.Wait` reports it
fn aggregate(runtime: &ClrRuntime, fault: &ManagedFault) -> ManagedFault {
    let wrapped = runtime.raise(
        "System.AggregateException",
        format!("One or more errors occurred. ({})", fault.message()),
    );
    if let (Some(exception), Ok(inner)) = (wrapped.exception(), runtime.exception_object(fault)) {
        exception.set_field("_innerException", inner.into());
    }
    wrapped
}

fn wait(ctx: &CallContext<'_>, timeout: Option<Duration>) -> ManagedResult<bool> {
    let state = ctx.native::<TaskState>()?;
    if !state.wait(timeout) {
        return Ok(false);
    }
    match state.fault() {
        Some(fault) => Err(aggregate(ctx.runtime(), &fault)),
        None => Ok(true),
    }
}

fn register_status(asm: &mut AssemblyDef) {
    let mut status = TypeBuilder::enumeration("System.Threading.Tasks", "TaskStatus");
    for value in TaskStatus::iter() {
        status = status.constant(value.as_ref(), I4, ManagedValue::I4(value as i32));
    }
    asm.add(status.build());
}

fn register_task(asm: &mut AssemblyDef) {
    let task = TypeSig::class(TASK);
    let action = TypeSig::delegate("System.Action");

    asm.add(
        TypeBuilder::class("System.Threading.Tasks", "Task")
            .constructor(&[action.clone()], |ctx, args| {
                let work = action_work(args.delegate_at(0)?.clone());
                ctx.this()?.set_native(TaskState::new(work));
                Ok(ManagedValue::Void)
            })
            .method("Start", &[], VOID, |ctx, _| {
                start(ctx, ctx.this()?)?;
                Ok(ManagedValue::Void)
            })
            .method("Wait", &[], VOID, |ctx, _| {
                wait(ctx, None)?;
                Ok(ManagedValue::Void)
            })
            .method("Wait", &[I4], BOOL, |ctx, args| {
                let timeout = match args.i32_at(0)? {
                    -1 => None,
                    ms => Some(Duration::from_millis(u64::try_from(ms).map_err(|_| {
                        ctx.throw(
                            "System.ArgumentOutOfRangeException",
                            "The timeout must be -1 or non-negative. (Parameter 'millisecondsTimeout')",
                        )
                    })?)),
                };
                Ok(wait(ctx, timeout)?.into())
            })
            .property("Id", I4, |ctx, _| Ok(ctx.native::<TaskState>()?.id().into()))
            .property(
                "Status",
                TypeSig::class("System.Threading.Tasks.TaskStatus"),
                |ctx, _| Ok(ManagedValue::I4(ctx.native::<TaskState>()?.status() as i32)),
            )
            .property("IsCompleted", BOOL, |ctx, _| {
                Ok(ctx.native::<TaskState>()?.is_completed().into())
            })
            .property("IsFaulted", BOOL, |ctx, _| {
                Ok((ctx.native::<TaskState>()?.status() == TaskStatus::Faulted).into())
            })
            .property("IsCanceled", BOOL, |ctx, _| {
                Ok((ctx.native::<TaskState>()?.status() == TaskStatus::Canceled).into())
            })
            .property("Exception", TypeSig::class("System.AggregateException"), |ctx, _| {
                Ok(match ctx.native::<TaskState>()?.fault() {
                    Some(fault) => aggregate(ctx.runtime(), &fault)
                        .exception()
                        .cloned()
                        .map_or(ManagedValue::Null, ManagedValue::Object),
                    None => ManagedValue::Null,
                })
            })
            .method(
                "ContinueWith",
                &[TypeSig::delegate("System.Action`1")],
                task.clone(),
                |ctx, args| {
                    let antecedent = ctx.this()?.clone();
                    let callback = args.delegate_at(0)?.clone();
                    let argument = ManagedValue::Object(antecedent.clone());
                    let continuation = task_object(
                        ctx.runtime(),
                        TaskState::new(move || callback.invoke(&[argument])),
                    )?;
                    let state = ctx.native::<TaskState>()?;

                    let pending = continuation.clone();
                    if let Some(state) = pending.native::<TaskState>() {
                        state.begin();
                    }
                    let run: Continuation = Box::new(move || {
                        if let Some(state) = pending.native::<TaskState>() {
                            state.run();
                        }
                    });
                    if let Some(run) = state.on_completion(run) {
                        ctx.runtime().pool().spawn(run);
                    }
                    Ok(continuation.into())
                },
            )
            .static_method("Run", &[action], task.clone(), |ctx, args| {
                let work = action_work(args.delegate_at(0)?.clone());
                let task = task_object(ctx.runtime(), TaskState::new(work))?;
                start(ctx, &task)?;
                Ok(task.into())
            })
            .static_method("Delay", &[I4], task.clone(), |ctx, args| {
                let delay = u64::try_from(args.i32_at(0)?).map_err(|_| {
                    ctx.throw(
                        "System.ArgumentOutOfRangeException",
                        "The value needs to be either -1 or non-negative. (Parameter 'millisecondsDelay')",
                    )
                })?;
                let task = task_object(ctx.runtime(), TaskState::with(TaskStatus::Created, None))?;
                if let Some(state) = task.native::<TaskState>() {
                    state.mark_running();
                }
                let timer = task.clone();
                ctx.runtime().pool().spawn(move || {
                    std::thread::sleep(Duration::from_millis(delay));
                    if let Some(state) = timer.native::<TaskState>() {
                        state.complete(Ok(()));
                    }
                });
                Ok(task.into())
            })
            .static_property("CompletedTask", task, |ctx, _| {
                Ok(task_object(ctx.runtime(), TaskState::completed())?.into())
            })
            .build(),
    );
}

fn register_thread(asm: &mut AssemblyDef) {
    asm.add(
        TypeBuilder::static_class("System.Threading", "Thread")
            .static_method("Sleep", &[I4], VOID, |ctx, args| {
                let ms = u64::try_from(args.i32_at(0)?).map_err(|_| {
                    ctx.throw(
                        "System.ArgumentOutOfRangeException",
                        "Number must be either non-negative or -1. (Parameter 'millisecondsTimeout')",
                    )
                })?;
                std::thread::sleep(Duration::from_millis(ms));
                Ok(ManagedValue::Void)
            })
            .static_property("CurrentThreadName", STRING, |_, _| {
                Ok(std::thread::current().name().map(str::to_string).into())
            })
            .build(),
    );
}

pub(crate) fn register(asm: &mut AssemblyDef) {
    register_status(asm);
    register_task(asm);
    register_thread(asm);
}
