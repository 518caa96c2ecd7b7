//! Managed thread-pool work completing into the host event loop.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use dotbridge::{
    bridge::AsyncState, init_with, runtime::ClrRuntime, AsyncFaultPolicy, BridgeConfig, Error,
    EventLoop, HostFunction, HostValue, NamespaceNode, RuntimeConfig,
};

fn root(policy: AsyncFaultPolicy) -> NamespaceNode {
    let runtime = ClrRuntime::new(RuntimeConfig::for_testing()).unwrap();
    init_with(
        runtime,
        &BridgeConfig::default().with_async_fault_policy(policy),
    )
    .unwrap()
}

fn counter() -> (HostFunction, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let function = HostFunction::new("count", move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(HostValue::Undefined)
    });
    (function, calls)
}

#[test]
fn task_callback_runs_once_and_asynchronously() {
    let event_loop = EventLoop::current();
    let root = root(AsyncFaultPolicy::ErrorArgument);
    let (action, calls) = counter();

    let task = root
        .namespace("System.Threading.Tasks")
        .unwrap()
        .class("Task")
        .unwrap()
        .construct(&[action.into()])
        .unwrap();
    task.call("Start", &[]).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    event_loop.run_for(Duration::from_millis(100)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    event_loop.run_for(Duration::from_millis(20)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn invoke_async_delivers_result_on_host_thread() {
    let event_loop = EventLoop::current();
    let root = root(AsyncFaultPolicy::ErrorArgument);
    let host_thread = std::thread::current().id();
    let results = Arc::new(Mutex::new(Vec::new()));

    let sink = results.clone();
    let callback = HostFunction::new("done", move |args| {
        assert_eq!(std::thread::current().id(), host_thread);
        sink.lock().unwrap().push(args.to_vec());
        Ok(HostValue::Undefined)
    });

    let string = root.namespace("System").unwrap().class("String").unwrap();
    let operation = string
        .invoke_async("Format", &["{0} + {1}".into(), 1.into(), 2.into()], callback)
        .unwrap();
    assert!(results.lock().unwrap().is_empty());

    assert!(event_loop
        .run_until(|| !results.lock().unwrap().is_empty(), Duration::from_secs(5))
        .unwrap());
    assert_eq!(operation.state(), AsyncState::Completed);
    assert_eq!(
        results.lock().unwrap()[0],
        vec![HostValue::Null, HostValue::from("1 + 2")]
    );
}

#[test]
fn async_fault_is_the_error_argument() {
    let event_loop = EventLoop::current();
    let root = root(AsyncFaultPolicy::ErrorArgument);
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    let callback = HostFunction::new("done", move |args| {
        sink.lock().unwrap().push(args.to_vec());
        Ok(HostValue::Undefined)
    });

    let port = root
        .namespace("System.IO.Ports")
        .unwrap()
        .class("SerialPort")
        .unwrap()
        .construct(&["COM7".into()])
        .unwrap();
    let operation = port.invoke_async("Open", &[], callback).unwrap();
    event_loop.run().unwrap();

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    match &results[0][..] {
        [HostValue::Error(Error::InvocationError(fault)), HostValue::Undefined] => {
            assert_eq!(fault.type_name(), "System.IO.IOException");
        }
        other => panic!("unexpected callback arguments {other:?}"),
    }
    assert!(operation.fault().is_some());
}

#[test]
fn async_fault_raised_from_loop() {
    let event_loop = EventLoop::current();
    let root = root(AsyncFaultPolicy::RaiseOnLoop);
    let (callback, calls) = counter();

    let port = root
        .namespace("System.IO.Ports")
        .unwrap()
        .class("SerialPort")
        .unwrap()
        .construct(&[])
        .unwrap();
    port.invoke_async("Open", &[], callback).unwrap();

    let raised = event_loop.run();
    assert!(matches!(raised, Err(Error::InvocationError(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn when_completed_follows_a_task() {
    let event_loop = EventLoop::current();
    let root = root(AsyncFaultPolicy::ErrorArgument);
    let (action, ran) = counter();
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    let callback = HostFunction::new("done", move |args| {
        sink.lock().unwrap().push(args.to_vec());
        Ok(HostValue::Undefined)
    });

    let task = root
        .namespace("System.Threading.Tasks")
        .unwrap()
        .class("Task")
        .unwrap()
        .construct(&[action.into()])
        .unwrap();
    root.session().when_completed(&task, callback).unwrap();
    task.call("Start", &[]).unwrap();

    assert!(event_loop
        .run_until(|| !results.lock().unwrap().is_empty(), Duration::from_secs(5))
        .unwrap());
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(
        results.lock().unwrap()[0],
        vec![HostValue::Null, HostValue::Undefined]
    );
}

#[test]
fn when_completed_reports_task_faults() {
    let event_loop = EventLoop::current();
    let root = root(AsyncFaultPolicy::ErrorArgument);
    let failing = HostFunction::new("fail", |_| Err(Error::HostError("no luck".into())));
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    let callback = HostFunction::new("done", move |args| {
        sink.lock().unwrap().push(args.to_vec());
        Ok(HostValue::Undefined)
    });

    let task = root
        .namespace("System.Threading.Tasks")
        .unwrap()
        .class("Task")
        .unwrap()
        .construct(&[failing.into()])
        .unwrap();
    root.session().when_completed(&task, callback).unwrap();
    task.call("Start", &[]).unwrap();

    assert!(event_loop
        .run_until(|| !results.lock().unwrap().is_empty(), Duration::from_secs(5))
        .unwrap());
    assert_eq!(task.get("IsFaulted"), Ok(HostValue::Bool(true)));
    let results = results.lock().unwrap();
    assert!(matches!(
        &results[0][..],
        [HostValue::Error(Error::InvocationError(_)), HostValue::Undefined]
    ));
}

#[test]
fn when_completed_rejects_non_tasks() {
    let _event_loop = EventLoop::current();
    let root = root(AsyncFaultPolicy::ErrorArgument);
    let (callback, _) = counter();
    let exception = root
        .namespace("System")
        .unwrap()
        .class("Exception")
        .unwrap()
        .construct(&[])
        .unwrap();
    assert!(matches!(
        root.session().when_completed(&exception, callback),
        Err(Error::TypeMismatch { .. })
    ));
}

fn failing_task(root: &NamespaceNode) -> (dotbridge::ObjectHandle, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let fail = HostFunction::new("fail", move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Err(Error::HostError("boom".into()))
    });
    let task = root
        .namespace("System.Threading.Tasks")
        .unwrap()
        .class("Task")
        .unwrap()
        .construct(&[fail.into()])
        .unwrap();
    (task, calls)
}

#[test]
fn failing_task_action_is_raised_from_loop() {
    let event_loop = EventLoop::current();
    let root = root(AsyncFaultPolicy::RaiseOnLoop);
    let (task, calls) = failing_task(&root);

    task.call("Start", &[]).unwrap();
    let raised = event_loop.run_for(Duration::from_millis(200));
    match raised {
        Err(Error::InvocationError(fault)) => assert!(fault.message().contains("boom")),
        other => panic!("expected the action's failure, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(event_loop
        .run_until(
            || task.get("IsFaulted") == Ok(HostValue::Bool(true)),
            Duration::from_secs(5)
        )
        .unwrap());
    assert_eq!(event_loop.run(), Ok(0));
}

#[test]
fn failing_task_action_stays_on_the_task() {
    let event_loop = EventLoop::current();
    let root = root(AsyncFaultPolicy::ErrorArgument);
    let (task, calls) = failing_task(&root);

    task.call("Start", &[]).unwrap();
    assert!(event_loop
        .run_until(
            || task.get("IsFaulted") == Ok(HostValue::Bool(true)),
            Duration::from_secs(5)
        )
        .unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        task.call("Wait", &[]),
        Err(Error::InvocationError(_))
    ));
}
